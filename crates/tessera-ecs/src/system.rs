//! Typed systems and the component sets they iterate.
//!
//! A [`System`] declares the tuple of component types it touches through
//! [`System::Components`]. At run time the context visits every archetype
//! whose composition is a superset of that tuple (plus anything returned by
//! [`System::required`]) and calls [`System::run`] once per live row with a
//! mutable reference to each requested component.
//!
//! ```
//! use tessera_ecs::prelude::*;
//!
//! struct Gravity;
//!
//! impl System for Gravity {
//!     type Components = ([f32; 2],);
//!
//!     fn run(&self, (velocity,): (&mut [f32; 2],)) {
//!         velocity[1] -= 9.81;
//!     }
//! }
//! ```

use std::any::type_name;

use crate::bitfield::Bitfield;
use crate::component::{Component, ComponentType, ComponentTypeId};
use crate::storage::{ArchetypeBufferChunk, Column};

// ---------------------------------------------------------------------------
// ComponentSet
// ---------------------------------------------------------------------------

/// A tuple of distinct component types that can be borrowed mutably from one
/// chunk row at a time.
///
/// Implemented for tuples of one to sixteen [`Component`] types.
pub trait ComponentSet: Sized + 'static {
    /// Per-row mutable references, `(&mut A, &mut B, ...)`.
    type Refs<'r>;

    /// Metadata for each member, registering types as needed.
    ///
    /// # Panics
    ///
    /// Panics if the same type appears twice.
    fn component_types() -> Vec<ComponentType>;

    /// Run `system` over every live row of a compacted chunk. `columns[i]`
    /// is the chunk column holding the `i`-th member.
    #[doc(hidden)]
    fn for_each_row<S>(chunk: &mut ArchetypeBufferChunk, columns: &[usize], system: &S)
    where
        S: System<Components = Self>;
}

fn ensure_distinct(types: &[ComponentType]) {
    for (i, ty) in types.iter().enumerate() {
        assert!(
            !types[..i].iter().any(|other| other.id == ty.id),
            "component type {} appears more than once in a component set",
            ty.name
        );
    }
}

/// Hand out each requested column at most once.
fn take_column<'c>(
    slots: &mut [Option<&'c mut Column>],
    columns: &[usize],
    member: usize,
) -> Option<&'c mut Column> {
    slots.get_mut(*columns.get(member)?)?.take()
}

macro_rules! impl_component_set {
    ($(($T:ident $v:ident $n:tt))+) => {
        impl<$($T: Component),+> ComponentSet for ($($T,)+) {
            type Refs<'r> = ($(&'r mut $T,)+);

            fn component_types() -> Vec<ComponentType> {
                let types = vec![$(ComponentType::of::<$T>()),+];
                ensure_distinct(&types);
                types
            }

            fn for_each_row<S>(chunk: &mut ArchetypeBufferChunk, columns: &[usize], system: &S)
            where
                S: System<Components = Self>,
            {
                let len = chunk.used_slots();
                let mut slots: Vec<Option<&mut Column>> =
                    chunk.columns_mut().iter_mut().map(Some).collect();
                $(
                    let Some($v) = take_column(&mut slots, columns, $n) else {
                        return;
                    };
                    let $v = $v.typed_mut::<$T>(len);
                )+
                for row in 0..len {
                    system.run(($(&mut $v[row],)+));
                }
            }
        }
    };
}

impl_component_set!((A a 0));
impl_component_set!((A a 0) (B b 1));
impl_component_set!((A a 0) (B b 1) (C c 2));
impl_component_set!((A a 0) (B b 1) (C c 2) (D d 3));
impl_component_set!((A a 0) (B b 1) (C c 2) (D d 3) (E e 4));
impl_component_set!((A a 0) (B b 1) (C c 2) (D d 3) (E e 4) (F f 5));
impl_component_set!((A a 0) (B b 1) (C c 2) (D d 3) (E e 4) (F f 5) (G g 6));
impl_component_set!((A a 0) (B b 1) (C c 2) (D d 3) (E e 4) (F f 5) (G g 6) (H h 7));
impl_component_set!((A a 0) (B b 1) (C c 2) (D d 3) (E e 4) (F f 5) (G g 6) (H h 7) (I i 8));
impl_component_set!(
    (A a 0) (B b 1) (C c 2) (D d 3) (E e 4) (F f 5) (G g 6) (H h 7) (I i 8) (J j 9)
);
impl_component_set!(
    (A a 0) (B b 1) (C c 2) (D d 3) (E e 4) (F f 5) (G g 6) (H h 7) (I i 8) (J j 9)
    (K k 10)
);
impl_component_set!(
    (A a 0) (B b 1) (C c 2) (D d 3) (E e 4) (F f 5) (G g 6) (H h 7) (I i 8) (J j 9)
    (K k 10) (L l 11)
);
impl_component_set!(
    (A a 0) (B b 1) (C c 2) (D d 3) (E e 4) (F f 5) (G g 6) (H h 7) (I i 8) (J j 9)
    (K k 10) (L l 11) (M m 12)
);
impl_component_set!(
    (A a 0) (B b 1) (C c 2) (D d 3) (E e 4) (F f 5) (G g 6) (H h 7) (I i 8) (J j 9)
    (K k 10) (L l 11) (M m 12) (N n 13)
);
impl_component_set!(
    (A a 0) (B b 1) (C c 2) (D d 3) (E e 4) (F f 5) (G g 6) (H h 7) (I i 8) (J j 9)
    (K k 10) (L l 11) (M m 12) (N n 13) (O o 14)
);
impl_component_set!(
    (A a 0) (B b 1) (C c 2) (D d 3) (E e 4) (F f 5) (G g 6) (H h 7) (I i 8) (J j 9)
    (K k 10) (L l 11) (M m 12) (N n 13) (O o 14) (P p 15)
);

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

/// Per-row logic run over every archetype that stores its components.
///
/// Systems are shared between worker threads while they run, so `run`
/// takes `&self`; any mutable state must be synchronized by the system.
pub trait System: Send + Sync + 'static {
    /// The component types handed to [`run`](Self::run).
    type Components: ComponentSet;

    /// Additional component types an archetype must contain for this system
    /// to visit it, beyond [`Components`](Self::Components).
    fn required(&self) -> Vec<ComponentType> {
        Vec::new()
    }

    /// Process one row.
    fn run(&self, components: <Self::Components as ComponentSet>::Refs<'_>);

    /// Name used in diagnostics.
    fn name(&self) -> &'static str {
        type_name::<Self>()
    }
}

// ---------------------------------------------------------------------------
// Type-erased registration
// ---------------------------------------------------------------------------

/// Object-safe view of a registered system.
pub(crate) trait ErasedSystem: Send + Sync {
    fn name(&self) -> &'static str;

    /// Every component type an archetype must contain.
    fn required(&self) -> &Bitfield;

    /// Component ids in the order `run_chunk` expects their columns.
    fn components(&self) -> &[ComponentTypeId];

    fn run_chunk(&self, chunk: &mut ArchetypeBufferChunk, columns: &[usize]);
}

struct SystemEntry<S> {
    system: S,
    required: Bitfield,
    components: Vec<ComponentTypeId>,
}

impl<S: System> ErasedSystem for SystemEntry<S> {
    fn name(&self) -> &'static str {
        self.system.name()
    }

    fn required(&self) -> &Bitfield {
        &self.required
    }

    fn components(&self) -> &[ComponentTypeId] {
        &self.components
    }

    fn run_chunk(&self, chunk: &mut ArchetypeBufferChunk, columns: &[usize]) {
        S::Components::for_each_row(chunk, columns, &self.system);
    }
}

pub(crate) fn erase<S: System>(system: S) -> Box<dyn ErasedSystem> {
    let components: Vec<ComponentTypeId> = S::Components::component_types()
        .into_iter()
        .map(|ty| ty.id)
        .collect();
    let required = components
        .iter()
        .copied()
        .chain(system.required().into_iter().map(|ty| ty.id))
        .collect();
    Box::new(SystemEntry {
        system,
        required,
        components,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
