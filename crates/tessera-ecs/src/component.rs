//! Component type registration and metadata.
//!
//! Every Rust type used as a component receives a [`ComponentTypeId`] the
//! first time it is seen. Ids are dense (`0..N`) and never reused for the
//! lifetime of the process, so they index bit sets and column tables
//! directly. The registry is process-wide and append-only; concurrent
//! registrations are serialized by a write lock.

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::bitfield::Bitfield;

/// Largest alignment a component type may require. Chunk columns are backed
/// by blocks of this alignment.
pub const MAX_COMPONENT_ALIGN: usize = 16;

// ---------------------------------------------------------------------------
// Component trait
// ---------------------------------------------------------------------------

/// Plain-old-data component values.
///
/// Components live in raw fixed-stride columns and are moved between chunks
/// by byte copy, so they must be `Pod`: no references, no heap ownership,
/// no padding-dependent invariants. Implemented for every eligible type.
pub trait Component: bytemuck::Pod + Send + Sync {}

impl<T: bytemuck::Pod + Send + Sync> Component for T {}

// ---------------------------------------------------------------------------
// ComponentTypeId
// ---------------------------------------------------------------------------

/// Dense, process-wide identifier of a component type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentTypeId(pub(crate) u32);

impl ComponentTypeId {
    /// The id as an index into bit sets and lookup tables.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index as u32)
    }
}

impl fmt::Debug for ComponentTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentTypeId({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// ComponentType
// ---------------------------------------------------------------------------

/// Metadata for one registered component type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComponentType {
    /// Dense id assigned at registration.
    pub id: ComponentTypeId,
    /// `size_of::<T>()`, the column stride in bytes.
    pub size: usize,
    /// `align_of::<T>()`
    pub align: usize,
    /// Rust type name, for diagnostics.
    pub name: &'static str,
}

impl ComponentType {
    /// Register `T` (idempotent) and return its metadata.
    pub fn of<T: Component>() -> Self {
        register::<T>()
    }

    /// Metadata for a previously registered id.
    pub fn info(id: ComponentTypeId) -> Option<Self> {
        REGISTRY.read().infos.get(id.index()).copied()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ComponentRegistry {
    by_type: HashMap<TypeId, ComponentTypeId>,
    /// Indexed by `ComponentTypeId.0`.
    infos: Vec<ComponentType>,
}

static REGISTRY: Lazy<RwLock<ComponentRegistry>> =
    Lazy::new(|| RwLock::new(ComponentRegistry::default()));

/// Register `T` as a component type.
///
/// Returns the same metadata on every call for the same `T`, and a fresh id
/// for each new type.
///
/// # Panics
///
/// Panics if `T` is zero-sized or needs an alignment above
/// [`MAX_COMPONENT_ALIGN`]; neither can be laid out in chunk columns.
pub fn register<T: Component>() -> ComponentType {
    let rust_type = TypeId::of::<T>();
    {
        let registry = REGISTRY.read();
        if let Some(&id) = registry.by_type.get(&rust_type) {
            return registry.infos[id.index()];
        }
    }

    let size = std::mem::size_of::<T>();
    let align = std::mem::align_of::<T>();
    assert!(
        size > 0,
        "component type {} is zero-sized; add a byte of payload",
        type_name::<T>()
    );
    assert!(
        align <= MAX_COMPONENT_ALIGN,
        "component type {} requires alignment {align}, maximum is {MAX_COMPONENT_ALIGN}",
        type_name::<T>()
    );

    let mut registry = REGISTRY.write();
    // Another thread may have won the race between the two locks.
    if let Some(&id) = registry.by_type.get(&rust_type) {
        return registry.infos[id.index()];
    }
    let info = ComponentType {
        id: ComponentTypeId::from_index(registry.infos.len()),
        size,
        align,
        name: type_name::<T>(),
    };
    registry.infos.push(info);
    registry.by_type.insert(rust_type, info.id);
    tracing::debug!(id = info.id.0, size, name = info.name, "registered component type");
    info
}

/// Look up `T` without registering it.
pub fn lookup<T: Component>() -> Option<ComponentTypeId> {
    REGISTRY.read().by_type.get(&TypeId::of::<T>()).copied()
}

/// Number of component types registered so far in this process.
pub fn registered_count() -> usize {
    REGISTRY.read().infos.len()
}

/// Metadata for every component type whose bit is set in `bits`, in id order.
pub fn reflect(bits: &Bitfield) -> Vec<ComponentType> {
    let registry = REGISTRY.read();
    bits.ones()
        .filter_map(|index| registry.infos.get(index).copied())
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
