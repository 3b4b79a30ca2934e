//! Tessera ECS -- archetype-based entity component system with chunked
//! structure-of-arrays storage.
//!
//! Entities sharing the same set of component types live in one
//! [`ArchetypeBuffer`](storage::ArchetypeBuffer), split into fixed-capacity
//! chunks with one packed column per component type. Versioned entity
//! handles detect use-after-destroy immediately. Systems declare the
//! component tuple they need and run over every matching chunk in parallel.
//!
//! # Quick Start
//!
//! ```
//! use tessera_ecs::prelude::*;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
//! #[repr(C)]
//! struct Position { x: f32, y: f32 }
//!
//! #[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
//! #[repr(C)]
//! struct Velocity { dx: f32, dy: f32 }
//!
//! struct Movement;
//!
//! impl System for Movement {
//!     type Components = (Position, Velocity);
//!
//!     fn run(&self, (pos, vel): (&mut Position, &mut Velocity)) {
//!         pos.x += vel.dx;
//!         pos.y += vel.dy;
//!     }
//! }
//!
//! let mut ctx = Context::new();
//! let moving = ctx.archetype_of::<(Position, Velocity)>();
//! let entity = ctx.create_entity_in(&moving);
//! ctx.set_component(entity, Velocity { dx: 1.0, dy: 0.5 }).unwrap();
//!
//! ctx.register_system(Movement);
//! ctx.run_systems();
//!
//! assert_eq!(
//!     ctx.get_component::<Position>(entity).unwrap(),
//!     Position { x: 1.0, y: 0.5 }
//! );
//! ```

#![deny(unsafe_code)]

pub mod archetype;
pub mod bitfield;
pub mod component;
pub mod config;
pub mod context;
pub mod entity;
#[allow(unsafe_code)]
pub mod storage;
pub mod system;

pub use context::Context;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by ECS operations.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// The handle was destroyed, recycled or never issued.
    #[error("entity {entity:?} is not alive (destroyed, recycled or never issued)")]
    InvalidEntity { entity: entity::Entity },

    /// The entity's archetype does not store the requested component.
    #[error("entity {entity:?} has no component of type '{component}'")]
    MissingComponent {
        entity: entity::Entity,
        component: &'static str,
    },

    /// A configuration value failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The worker pool could not be started.
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::archetype::{Archetype, ArchetypeId};
    pub use crate::bitfield::Bitfield;
    pub use crate::component::{Component, ComponentType, ComponentTypeId};
    pub use crate::config::EcsConfig;
    pub use crate::context::{Context, ContextStats, OptimiseReport};
    pub use crate::entity::Entity;
    pub use crate::system::{ComponentSet, System};
    pub use crate::EcsError;
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------
