//! Entity handles and the registry that issues them.
//!
//! An [`Entity`] is a 64-bit handle that packs a *version* counter in the
//! high 32 bits and an *index* in the low 32 bits. Each index has one record
//! in the [`EntityRegistry`]; the record's version is bumped both when the
//! index is issued and when it is destroyed, so live records always carry an
//! odd version and any handle minted before a destroy compares unequal.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::archetype::ArchetypeId;
use crate::storage::Slot;
use crate::EcsError;

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// A versioned entity handle.
///
/// Layout: `[version: u32 | index: u32]`
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entity(u64);

impl Entity {
    #[inline]
    pub fn new(index: u32, version: u32) -> Self {
        Self((version as u64) << 32 | index as u64)
    }

    /// The index portion (low 32 bits).
    #[inline]
    pub fn index(self) -> u32 {
        self.0 as u32
    }

    /// The version portion (high 32 bits).
    #[inline]
    pub fn version(self) -> u32 {
        (self.0 >> 32) as u32
    }

    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({}v{})", self.index(), self.version())
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.version())
    }
}

// ---------------------------------------------------------------------------
// EntityLocation
// ---------------------------------------------------------------------------

/// Where a live entity's component data is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityLocation {
    pub archetype: ArchetypeId,
    pub slot: Slot,
}

// ---------------------------------------------------------------------------
// EntityRegistry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct EntityRecord {
    version: u32,
    location: Option<EntityLocation>,
}

impl EntityRecord {
    #[inline]
    fn is_live(&self) -> bool {
        self.version & 1 == 1
    }
}

/// Issues, validates and recycles [`Entity`] handles and tracks each live
/// entity's storage location.
///
/// Freed indices are reused last-in first-out.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    records: Vec<EntityRecord>,
    free: Vec<u32>,
    alive: usize,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-allocate record storage for `capacity` entities.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
            free: Vec::new(),
            alive: 0,
        }
    }

    /// Issue a live handle with no storage location.
    pub fn create(&mut self) -> Entity {
        self.alive += 1;
        if let Some(index) = self.free.pop() {
            let record = &mut self.records[index as usize];
            record.version = record.version.wrapping_add(1);
            return Entity::new(index, record.version);
        }
        let index = self.records.len() as u32;
        self.records.push(EntityRecord {
            version: 1,
            location: None,
        });
        Entity::new(index, 1)
    }

    /// Retire `entity`, returning the location it occupied so the caller can
    /// release the storage slot.
    ///
    /// Fails for stale or never-issued handles; a second destroy of the same
    /// handle is therefore rejected.
    pub fn destroy(&mut self, entity: Entity) -> Result<Option<EntityLocation>, EcsError> {
        let record = self.record_mut(entity)?;
        record.version = record.version.wrapping_add(1);
        let location = record.location.take();
        self.free.push(entity.index());
        self.alive -= 1;
        Ok(location)
    }

    /// Destroy a sequence of entities in order, handing each released
    /// location to `on_destroyed`.
    ///
    /// Free-list growth is reserved once for the whole batch. Processing
    /// stops at the first invalid handle; entities before it stay destroyed.
    pub fn destroy_batch<F>(&mut self, entities: &[Entity], mut on_destroyed: F) -> Result<(), EcsError>
    where
        F: FnMut(Entity, Option<EntityLocation>),
    {
        self.free.reserve(entities.len());
        for &entity in entities {
            let location = self.destroy(entity)?;
            on_destroyed(entity, location);
        }
        Ok(())
    }

    /// `true` if `entity` is the current handle for a live record.
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.record(entity).is_ok()
    }

    /// Return an error unless `entity` is alive.
    pub fn validate(&self, entity: Entity) -> Result<(), EcsError> {
        self.record(entity).map(|_| ())
    }

    /// Current storage location of a live entity; `None` when the entity has
    /// no archetype yet.
    pub fn location(&self, entity: Entity) -> Result<Option<EntityLocation>, EcsError> {
        self.record(entity).map(|r| r.location)
    }

    /// Point a live entity at new storage.
    pub fn set_location(
        &mut self,
        entity: Entity,
        location: Option<EntityLocation>,
    ) -> Result<(), EcsError> {
        self.record_mut(entity)?.location = location;
        Ok(())
    }

    /// Re-point the live entity at `index` after its slot was moved by the
    /// storage layer.
    pub(crate) fn relocate(&mut self, index: u32, slot: Slot) {
        if let Some(location) = self
            .records
            .get_mut(index as usize)
            .and_then(|r| r.location.as_mut())
        {
            location.slot = slot;
        }
    }

    /// The current handle for the live entity at `index`.
    pub fn entity_at(&self, index: u32) -> Option<Entity> {
        self.records
            .get(index as usize)
            .filter(|r| r.is_live())
            .map(|r| Entity::new(index, r.version))
    }

    /// Number of live entities.
    pub fn alive_count(&self) -> usize {
        self.alive
    }

    /// Every live handle in index order.
    pub fn iter(&self) -> impl Iterator<Item = Entity> + '_ {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_live())
            .map(|(index, r)| Entity::new(index as u32, r.version))
    }

    fn record(&self, entity: Entity) -> Result<&EntityRecord, EcsError> {
        self.records
            .get(entity.index() as usize)
            .filter(|r| r.is_live() && r.version == entity.version())
            .ok_or(EcsError::InvalidEntity { entity })
    }

    fn record_mut(&mut self, entity: Entity) -> Result<&mut EntityRecord, EcsError> {
        self.records
            .get_mut(entity.index() as usize)
            .filter(|r| r.is_live() && r.version == entity.version())
            .ok_or(EcsError::InvalidEntity { entity })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_unique_handles() {
        let mut reg = EntityRegistry::new();
        let entities: Vec<Entity> = (0..100).map(|_| reg.create()).collect();
        let mut indices: Vec<u32> = entities.iter().map(|e| e.index()).collect();
        indices.sort();
        indices.dedup();
        assert_eq!(indices.len(), 100);
        assert_eq!(reg.alive_count(), 100);
    }

    #[test]
    fn live_versions_are_odd() {
        let mut reg = EntityRegistry::new();
        let e0 = reg.create();
        assert_eq!(e0.version(), 1);
        reg.destroy(e0).unwrap();
        let e1 = reg.create();
        assert_eq!(e1.index(), e0.index());
        assert_eq!(e1.version(), 3);
    }

    #[test]
    fn stale_handle_rejected() {
        let mut reg = EntityRegistry::new();
        let e0 = reg.create();
        assert!(reg.is_alive(e0));
        reg.destroy(e0).unwrap();
        assert!(!reg.is_alive(e0));
        let _e1 = reg.create();
        assert!(!reg.is_alive(e0), "recycled index must not revive old handle");
        assert!(matches!(
            reg.location(e0),
            Err(EcsError::InvalidEntity { entity }) if entity == e0
        ));
    }

    #[test]
    fn double_destroy_fails() {
        let mut reg = EntityRegistry::new();
        let e = reg.create();
        assert!(reg.destroy(e).is_ok());
        assert!(reg.destroy(e).is_err());
        assert_eq!(reg.alive_count(), 0);
    }

    #[test]
    fn destroy_batch_stops_at_first_invalid() {
        let mut reg = EntityRegistry::new();
        let a = reg.create();
        let b = reg.create();
        let c = reg.create();
        reg.destroy(b).unwrap();

        let mut seen = Vec::new();
        let result = reg.destroy_batch(&[a, b, c], |e, _| seen.push(e));
        assert!(matches!(result, Err(EcsError::InvalidEntity { entity }) if entity == b));
        assert_eq!(seen, vec![a]);
        assert!(reg.is_alive(c));
        assert_eq!(reg.alive_count(), 1);
    }

    #[test]
    fn free_list_is_lifo() {
        let mut reg = EntityRegistry::new();
        let a = reg.create();
        let b = reg.create();
        reg.destroy(a).unwrap();
        reg.destroy(b).unwrap();
        assert_eq!(reg.create().index(), b.index());
        assert_eq!(reg.create().index(), a.index());
    }

    #[test]
    fn never_issued_handle_is_invalid() {
        let reg = EntityRegistry::new();
        assert!(!reg.is_alive(Entity::new(7, 1)));
        // Even versions never name a live record.
        let mut reg = EntityRegistry::new();
        let e = reg.create();
        assert!(!reg.is_alive(Entity::new(e.index(), 2)));
    }

    #[test]
    fn iter_and_entity_at() {
        let mut reg = EntityRegistry::new();
        let a = reg.create();
        let b = reg.create();
        let c = reg.create();
        reg.destroy(b).unwrap();
        assert_eq!(reg.iter().collect::<Vec<_>>(), vec![a, c]);
        assert_eq!(reg.entity_at(c.index()), Some(c));
        assert_eq!(reg.entity_at(b.index()), None);
    }

    #[test]
    fn handle_raw_roundtrip() {
        let e = Entity::new(42, 7);
        assert_eq!(e.index(), 42);
        assert_eq!(e.version(), 7);
        assert_eq!(Entity::from_raw(e.to_raw()), e);
        assert_eq!(e.to_string(), "42v7");
    }
}
