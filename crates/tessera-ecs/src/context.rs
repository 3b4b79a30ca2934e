//! The [`Context`]: archetypes, entities, storage and systems behind one
//! façade.
//!
//! All structural operations (creating archetypes and entities, destroying
//! entities, adding or removing components, registering and running systems,
//! optimising storage) take `&mut self` and are expected to happen on the
//! thread that owns the context. Debug builds assert this; ownership can be
//! handed to another thread with [`Context::adopt_current_thread`].
//!
//! Only [`Context::run_systems`] uses more than one thread: the chunks of
//! each matching buffer are distributed over the context's worker pool, so
//! every worker holds exclusive access to a distinct chunk.

use std::any::{type_name, TypeId};
use std::collections::HashSet;
use std::thread::{self, ThreadId};

use rayon::prelude::*;

use crate::archetype::{Archetype, ArchetypeIndex};
use crate::bitfield::Bitfield;
use crate::component::{Component, ComponentType};
use crate::config::EcsConfig;
use crate::entity::{Entity, EntityLocation, EntityRegistry};
use crate::storage::{self, ArchetypeBuffer, ArchetypeBufferChunk};
use crate::system::{self, ComponentSet, ErasedSystem, System};
use crate::EcsError;

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Counts describing a context at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContextStats {
    pub entities: usize,
    pub archetypes: usize,
    pub chunks: usize,
    pub systems: usize,
}

/// Outcome of one [`Context::optimise`] pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OptimiseReport {
    pub chunks_before: usize,
    pub chunks_after: usize,
    /// Rows moved between chunks.
    pub rows_moved: usize,
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// An independent ECS world.
pub struct Context {
    config: EcsConfig,
    archetypes: ArchetypeIndex,
    /// Indexed by archetype id. Buffers live as long as the context.
    buffers: Vec<ArchetypeBuffer>,
    entities: EntityRegistry,
    systems: Vec<Box<dyn ErasedSystem>>,
    system_types: HashSet<TypeId>,
    pool: Option<rayon::ThreadPool>,
    owner: ThreadId,
}

fn build_pool(config: &EcsConfig) -> Result<rayon::ThreadPool, rayon::ThreadPoolBuildError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(config.worker_threads())
        .thread_name(|i| format!("tessera-worker-{i}"))
        .build()
}

/// Mutable access to two distinct buffers.
fn pair_mut(
    buffers: &mut [ArchetypeBuffer],
    a: usize,
    b: usize,
) -> (&mut ArchetypeBuffer, &mut ArchetypeBuffer) {
    debug_assert_ne!(a, b);
    if a < b {
        let (left, right) = buffers.split_at_mut(b);
        (&mut left[a], &mut right[0])
    } else {
        let (left, right) = buffers.split_at_mut(a);
        (&mut right[0], &mut left[b])
    }
}

impl Context {
    /// Create a context with the default configuration.
    ///
    /// If the worker pool cannot be started, systems run on the calling
    /// thread and a warning is logged.
    pub fn new() -> Self {
        let config = EcsConfig::default();
        let pool = match build_pool(&config) {
            Ok(pool) => Some(pool),
            Err(err) => {
                tracing::warn!(%err, "worker pool unavailable, systems will run sequentially");
                None
            }
        };
        Self::assemble(config, pool)
    }

    /// Create a context from a validated configuration.
    pub fn with_config(config: EcsConfig) -> Result<Self, EcsError> {
        config.validate()?;
        let pool = if config.parallel {
            Some(build_pool(&config)?)
        } else {
            None
        };
        Ok(Self::assemble(config, pool))
    }

    fn assemble(config: EcsConfig, pool: Option<rayon::ThreadPool>) -> Self {
        tracing::debug!(
            chunk_capacity = config.chunk_capacity,
            workers = pool.as_ref().map_or(0, |p| p.current_num_threads()),
            "created ECS context"
        );
        Self {
            entities: EntityRegistry::with_capacity(config.initial_entity_capacity),
            config,
            archetypes: ArchetypeIndex::default(),
            buffers: Vec::new(),
            systems: Vec::new(),
            system_types: HashSet::new(),
            pool,
            owner: thread::current().id(),
        }
    }

    pub fn config(&self) -> &EcsConfig {
        &self.config
    }

    /// Make the calling thread the owner of this context.
    pub fn adopt_current_thread(&mut self) {
        self.owner = thread::current().id();
    }

    #[inline]
    fn check_thread(&self, operation: &str) {
        debug_assert!(
            thread::current().id() == self.owner,
            "Context::{operation} called from a thread that does not own the context"
        );
    }

    // -- archetypes ---------------------------------------------------------

    fn archetype_for_bits(&mut self, bits: &Bitfield) -> Archetype {
        let (archetype, created) = self.archetypes.get_or_create(bits);
        if created {
            tracing::debug!(
                id = archetype.id().0,
                components = ?archetype.component_types(),
                "created archetype"
            );
            self.buffers
                .push(ArchetypeBuffer::new(archetype.clone(), self.config.chunk_capacity));
        }
        archetype
    }

    /// Resolve a set of component types to its archetype, creating it on
    /// first use. Order and repetition of `types` do not matter.
    pub fn create_archetype(&mut self, types: &[ComponentType]) -> Archetype {
        self.check_thread("create_archetype");
        let bits: Bitfield = types.iter().map(|ty| ty.id).collect();
        self.archetype_for_bits(&bits)
    }

    /// The archetype made of exactly the members of `C`.
    pub fn archetype_of<C: ComponentSet>(&mut self) -> Archetype {
        self.create_archetype(&C::component_types())
    }

    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    pub fn archetypes(&self) -> impl Iterator<Item = &Archetype> {
        self.archetypes.iter()
    }

    /// Storage for `archetype`, if it belongs to this context.
    pub fn buffer(&self, archetype: &Archetype) -> Option<&ArchetypeBuffer> {
        self.buffers
            .get(archetype.id().index())
            .filter(|b| b.archetype().component_types() == archetype.component_types())
    }

    // -- entities -----------------------------------------------------------

    /// Create an entity with no components.
    pub fn create_entity(&mut self) -> Entity {
        self.check_thread("create_entity");
        self.entities.create()
    }

    /// Create an entity stored in `archetype`, every component zeroed.
    pub fn create_entity_in(&mut self, archetype: &Archetype) -> Entity {
        self.check_thread("create_entity_in");
        let archetype = self.archetype_for_bits(archetype.component_types());
        let entity = self.entities.create();
        let slot = self.buffers[archetype.id().index()].get_slot(entity.index());
        let location = EntityLocation {
            archetype: archetype.id(),
            slot,
        };
        let placed = self.entities.set_location(entity, Some(location));
        debug_assert!(placed.is_ok(), "freshly created handle rejected");
        entity
    }

    /// Destroy an entity and release its storage slot.
    pub fn destroy_entity(&mut self, entity: Entity) -> Result<(), EcsError> {
        self.check_thread("destroy_entity");
        if let Some(location) = self.entities.destroy(entity)? {
            self.release(location);
        }
        Ok(())
    }

    /// Destroy entities in order. Stops at the first invalid handle, leaving
    /// the ones before it destroyed.
    pub fn destroy_entities(&mut self, entities: &[Entity]) -> Result<(), EcsError> {
        self.check_thread("destroy_entities");
        let buffers = &mut self.buffers;
        self.entities.destroy_batch(entities, |_, location| {
            if let Some(location) = location {
                let returned = buffers[location.archetype.index()].return_slot(location.slot);
                debug_assert!(returned, "entity location named a free slot");
            }
        })
    }

    fn release(&mut self, location: EntityLocation) {
        let returned = self.buffers[location.archetype.index()].return_slot(location.slot);
        debug_assert!(returned, "entity location named a free slot");
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.alive_count()
    }

    /// Every live entity in index order.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.entities.iter()
    }

    /// The archetype `entity` is stored in, or `None` if it has no
    /// components yet.
    pub fn archetype(&self, entity: Entity) -> Result<Option<Archetype>, EcsError> {
        Ok(self
            .entities
            .location(entity)?
            .and_then(|loc| self.archetypes.get(loc.archetype).cloned()))
    }

    // -- components ---------------------------------------------------------

    /// Move `entity` into `to`, carrying over every component both
    /// archetypes share.
    fn migrate(
        &mut self,
        entity: Entity,
        from: Option<EntityLocation>,
        to: &Archetype,
    ) -> Result<EntityLocation, EcsError> {
        let dst = to.id().index();
        let dst_slot = self.buffers[dst].get_slot(entity.index());
        if let Some(from) = from {
            let (src_buffer, dst_buffer) = pair_mut(&mut self.buffers, from.archetype.index(), dst);
            storage::copy_shared_components(src_buffer, from.slot, dst_buffer, dst_slot);
            let returned = src_buffer.return_slot(from.slot);
            debug_assert!(returned, "entity location named a free slot");
        }
        let location = EntityLocation {
            archetype: to.id(),
            slot: dst_slot,
        };
        self.entities.set_location(entity, Some(location))?;
        Ok(location)
    }

    fn current_bits(&self, location: Option<EntityLocation>) -> Bitfield {
        location
            .and_then(|loc| self.archetypes.get(loc.archetype))
            .map(|arch| arch.component_types().clone())
            .unwrap_or_default()
    }

    /// Attach `value` to `entity`, migrating it to the archetype that also
    /// contains `T`. Returns `Ok(false)` and leaves the entity untouched if
    /// it already has a `T`.
    pub fn add_component<T: Component>(&mut self, entity: Entity, value: T) -> Result<bool, EcsError> {
        self.check_thread("add_component");
        let ty = ComponentType::of::<T>();
        let from = self.entities.location(entity)?;
        let mut bits = self.current_bits(from);
        if bits.contains(ty.id) {
            return Ok(false);
        }
        bits.insert(ty.id);
        let to = self.archetype_for_bits(&bits);
        let location = self.migrate(entity, from, &to)?;
        if let Some(slot) = self.buffers[location.archetype.index()].get_mut::<T>(location.slot) {
            *slot = value;
        }
        Ok(true)
    }

    /// Detach `T` from `entity`, migrating it to the archetype without `T`.
    /// Returns `Ok(false)` if the entity has no `T`.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Result<bool, EcsError> {
        self.check_thread("remove_component");
        let ty = ComponentType::of::<T>();
        let from = self.entities.location(entity)?;
        let mut bits = self.current_bits(from);
        if !bits.contains(ty.id) {
            return Ok(false);
        }
        bits.remove(ty.id);
        let to = self.archetype_for_bits(&bits);
        self.migrate(entity, from, &to)?;
        Ok(true)
    }

    pub fn has_component<T: Component>(&self, entity: Entity) -> Result<bool, EcsError> {
        let bits = self.current_bits(self.entities.location(entity)?);
        Ok(crate::component::lookup::<T>().is_some_and(|id| bits.contains(id)))
    }

    fn missing<T>(entity: Entity) -> EcsError {
        EcsError::MissingComponent {
            entity,
            component: type_name::<T>(),
        }
    }

    /// Copy of `entity`'s `T`.
    pub fn get_component<T: Component>(&self, entity: Entity) -> Result<T, EcsError> {
        let location = self
            .entities
            .location(entity)?
            .ok_or_else(|| Self::missing::<T>(entity))?;
        self.buffers[location.archetype.index()]
            .get::<T>(location.slot)
            .copied()
            .ok_or_else(|| Self::missing::<T>(entity))
    }

    /// Direct mutable access to `entity`'s `T`.
    pub fn component_mut<T: Component>(&mut self, entity: Entity) -> Result<&mut T, EcsError> {
        let location = self
            .entities
            .location(entity)?
            .ok_or_else(|| Self::missing::<T>(entity))?;
        self.buffers[location.archetype.index()]
            .get_mut::<T>(location.slot)
            .ok_or_else(|| Self::missing::<T>(entity))
    }

    /// Overwrite `entity`'s `T`, returning the previous value.
    pub fn set_component<T: Component>(&mut self, entity: Entity, value: T) -> Result<T, EcsError> {
        let slot = self.component_mut::<T>(entity)?;
        Ok(std::mem::replace(slot, value))
    }

    // -- systems ------------------------------------------------------------

    /// Register a system. Returns `false` if a system of the same type is
    /// already registered.
    pub fn register_system<S: System>(&mut self, system: S) -> bool {
        self.check_thread("register_system");
        if !self.system_types.insert(TypeId::of::<S>()) {
            return false;
        }
        let erased = system::erase(system);
        tracing::debug!(
            name = erased.name(),
            required = ?erased.required(),
            "registered system"
        );
        self.systems.push(erased);
        true
    }

    pub fn system_count(&self) -> usize {
        self.systems.len()
    }

    /// Run every registered system, in registration order, over every
    /// archetype that contains the system's required components.
    ///
    /// Chunks are compacted before they are visited. Returns once all
    /// systems have finished.
    pub fn run_systems(&mut self) {
        self.check_thread("run_systems");
        let pool = match &self.pool {
            Some(pool) if self.config.parallel => Some(pool),
            _ => None,
        };
        for system in &self.systems {
            for buffer in &mut self.buffers {
                if buffer.is_empty() || !buffer.archetype().satisfies(system.required()) {
                    continue;
                }
                let Some(columns) = system
                    .components()
                    .iter()
                    .map(|&id| buffer.layout().column_of(id))
                    .collect::<Option<Vec<_>>>()
                else {
                    continue;
                };
                tracing::trace!(
                    system = system.name(),
                    archetype = buffer.archetype().id().0,
                    rows = buffer.len(),
                    chunks = buffer.chunk_count(),
                    "dispatching system"
                );
                let run = |chunk: &mut ArchetypeBufferChunk| {
                    chunk.compact();
                    if !chunk.is_empty() {
                        system.run_chunk(chunk, &columns);
                    }
                };
                let chunks = buffer.chunks_mut();
                match pool {
                    Some(pool) => pool.install(|| chunks.par_iter_mut().for_each(run)),
                    None => chunks.iter_mut().for_each(run),
                }
            }
        }
    }

    // -- maintenance --------------------------------------------------------

    /// Repack storage: move rows out of sparse chunks, drop empty chunks
    /// and order the rest by occupancy.
    ///
    /// Entity handles stay valid; their locations are updated.
    pub fn optimise(&mut self) -> OptimiseReport {
        self.check_thread("optimise");
        let mut report = OptimiseReport {
            chunks_before: self.chunk_count(),
            ..Default::default()
        };
        for buffer in &mut self.buffers {
            let relocations = buffer.consolidate();
            report.rows_moved += relocations.len();
            for relocation in relocations {
                self.entities.relocate(relocation.owner, relocation.to);
            }
            buffer.trim();
            buffer.compact_all();
            buffer.sort_by_used_slots();
        }
        report.chunks_after = self.chunk_count();
        tracing::info!(
            chunks_before = report.chunks_before,
            chunks_after = report.chunks_after,
            rows_moved = report.rows_moved,
            "optimised storage"
        );
        report
    }

    pub fn chunk_count(&self) -> usize {
        self.buffers.iter().map(|b| b.chunk_count()).sum()
    }

    pub fn stats(&self) -> ContextStats {
        ContextStats {
            entities: self.entity_count(),
            archetypes: self.archetype_count(),
            chunks: self.chunk_count(),
            systems: self.system_count(),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
