//! Archetype identities.
//!
//! An [`Archetype`] names one exact component composition: a dense id plus
//! the [`Bitfield`] of component type ids it contains. Archetypes are created
//! once and never change; the [`ArchetypeIndex`] guarantees that the same
//! set of component types always resolves to the same id, no matter the
//! order the types were listed in.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::bitfield::Bitfield;
use crate::component::{self, ComponentType, ComponentTypeId};

// ---------------------------------------------------------------------------
// ArchetypeId
// ---------------------------------------------------------------------------

/// Identifies an archetype within a context. Ids are handed out
/// monotonically starting at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArchetypeId(pub(crate) u32);

impl ArchetypeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

// ---------------------------------------------------------------------------
// Archetype
// ---------------------------------------------------------------------------

/// An immutable component composition.
///
/// Equality and hashing use only the id; two archetypes from the same
/// context with equal ids always carry equal bit sets.
#[derive(Clone)]
pub struct Archetype {
    id: ArchetypeId,
    component_types: Arc<Bitfield>,
}

impl Archetype {
    pub(crate) fn new(id: ArchetypeId, component_types: Bitfield) -> Self {
        Self {
            id,
            component_types: Arc::new(component_types),
        }
    }

    #[inline]
    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    /// The bit set of component type ids in this archetype.
    #[inline]
    pub fn component_types(&self) -> &Bitfield {
        &self.component_types
    }

    /// Whether this archetype stores the given component type.
    #[inline]
    pub fn contains(&self, id: ComponentTypeId) -> bool {
        self.component_types.contains(id)
    }

    /// Whether every type in `required` is stored by this archetype.
    #[inline]
    pub fn satisfies(&self, required: &Bitfield) -> bool {
        required.is_subset_of(&self.component_types)
    }

    /// Number of component types in the composition.
    pub fn component_count(&self) -> usize {
        self.component_types.count_ones()
    }

    /// Metadata for each component type, in id order.
    pub fn types(&self) -> Vec<ComponentType> {
        component::reflect(&self.component_types)
    }
}

impl PartialEq for Archetype {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Archetype {}

impl std::hash::Hash for Archetype {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Archetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archetype")
            .field("id", &self.id.0)
            .field("component_types", &*self.component_types)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ArchetypeIndex
// ---------------------------------------------------------------------------

/// Bit set to archetype lookup, plus the archetypes in id order.
#[derive(Debug, Default)]
pub(crate) struct ArchetypeIndex {
    by_bits: HashMap<Bitfield, Archetype>,
    archetypes: Vec<Archetype>,
}

impl ArchetypeIndex {
    /// Resolve `bits` to an archetype, creating one if this composition has
    /// not been seen. The flag is `true` when a new archetype was created.
    pub fn get_or_create(&mut self, bits: &Bitfield) -> (Archetype, bool) {
        if let Some(existing) = self.by_bits.get(bits) {
            return (existing.clone(), false);
        }
        let archetype = Archetype::new(ArchetypeId(self.archetypes.len() as u32), bits.clone());
        self.by_bits.insert(bits.clone(), archetype.clone());
        self.archetypes.push(archetype.clone());
        (archetype, true)
    }

    pub fn get(&self, id: ArchetypeId) -> Option<&Archetype> {
        self.archetypes.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Archetype> {
        self.archetypes.iter()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
