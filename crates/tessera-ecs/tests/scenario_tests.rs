//! End-to-end scenarios: movement over multiple chunks, migration, handle
//! invalidation and system coverage.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tessera_ecs::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
struct Velocity {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
struct Visits(u32);

#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
struct Marker(u8);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Movement;

impl System for Movement {
    type Components = (Position, Velocity);

    fn run(&self, (pos, vel): (&mut Position, &mut Velocity)) {
        pos.x += vel.x;
        pos.y += vel.y;
    }
}

/// Overwrites every velocity with a fixed value.
struct Steer;

impl System for Steer {
    type Components = (Velocity,);

    fn run(&self, (vel,): (&mut Velocity,)) {
        *vel = Velocity { x: 3.0, y: -1.0 };
    }
}

/// Counts rows and marks each visited row.
struct Counter {
    rows: Arc<AtomicUsize>,
}

impl System for Counter {
    type Components = (Position, Velocity, Visits);

    fn run(&self, (_, _, visits): (&mut Position, &mut Velocity, &mut Visits)) {
        visits.0 += 1;
        self.rows.fetch_add(1, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Movement scenario
// ---------------------------------------------------------------------------

#[test]
fn movement_destroy_and_optimise() {
    init_tracing();
    let mut ctx = Context::new();
    assert_eq!(ctx.config().chunk_capacity, 256);

    let archetype = ctx.create_archetype(&[
        ComponentType::of::<Position>(),
        ComponentType::of::<Velocity>(),
    ]);
    let entities: Vec<Entity> = (0..300)
        .map(|i| {
            let e = ctx.create_entity_in(&archetype);
            ctx.set_component(e, Position { x: i as f32, y: 0.0 }).unwrap();
            ctx.set_component(e, Velocity { x: 1.0, y: 2.0 }).unwrap();
            e
        })
        .collect();
    assert_eq!(ctx.chunk_count(), 2);

    ctx.register_system(Movement);
    ctx.run_systems();

    let destroyed: Vec<Entity> = entities.iter().step_by(2).take(50).copied().collect();
    ctx.destroy_entities(&destroyed).unwrap();
    assert_eq!(ctx.entity_count(), 250);

    let report = ctx.optimise();
    assert_eq!(report.chunks_before, 2);
    assert_eq!(report.chunks_after, 1);
    assert_eq!(ctx.chunk_count(), 1);
    let buffer = ctx.buffer(&archetype).unwrap();
    assert_eq!(buffer.len(), 250);
    assert_eq!(buffer.chunks()[0].used_slots(), 250);

    for (i, e) in entities.iter().enumerate() {
        if destroyed.contains(e) {
            assert!(!ctx.is_alive(*e));
            continue;
        }
        assert_eq!(
            ctx.get_component::<Position>(*e).unwrap(),
            Position { x: i as f32 + 1.0, y: 2.0 },
            "entity {i}"
        );
    }

    // Systems still see every survivor exactly once after repacking.
    ctx.run_systems();
    let survivor = entities[1];
    assert_eq!(
        ctx.get_component::<Position>(survivor).unwrap(),
        Position { x: 3.0, y: 4.0 }
    );
}

// ---------------------------------------------------------------------------
// Migration
// ---------------------------------------------------------------------------

#[test]
fn migration_preserves_existing_components() {
    let mut ctx = Context::new();
    let e = ctx.create_entity();
    ctx.add_component(e, Position { x: 1.0, y: 2.0 }).unwrap();
    ctx.add_component(e, Visits(9)).unwrap();

    assert!(ctx.add_component(e, Velocity { x: 3.0, y: 4.0 }).unwrap());
    assert_eq!(ctx.get_component::<Position>(e).unwrap(), Position { x: 1.0, y: 2.0 });
    assert_eq!(ctx.get_component::<Visits>(e).unwrap(), Visits(9));
    assert_eq!(ctx.get_component::<Velocity>(e).unwrap(), Velocity { x: 3.0, y: 4.0 });

    assert!(ctx.remove_component::<Visits>(e).unwrap());
    assert_eq!(ctx.get_component::<Position>(e).unwrap(), Position { x: 1.0, y: 2.0 });
    assert_eq!(ctx.get_component::<Velocity>(e).unwrap(), Velocity { x: 3.0, y: 4.0 });
    assert!(matches!(
        ctx.get_component::<Visits>(e),
        Err(EcsError::MissingComponent { component, .. }) if component.ends_with("Visits")
    ));
}

#[test]
fn migration_leaves_neighbours_untouched() {
    let mut ctx = Context::with_config(EcsConfig {
        chunk_capacity: 8,
        ..Default::default()
    })
    .unwrap();
    let arch = ctx.archetype_of::<(Position,)>();
    let all: Vec<Entity> = (0..20)
        .map(|i| {
            let e = ctx.create_entity_in(&arch);
            ctx.set_component(e, Position { x: i as f32, y: -(i as f32) }).unwrap();
            e
        })
        .collect();

    for e in all.iter().skip(3).step_by(4) {
        ctx.add_component(*e, Marker(1)).unwrap();
    }
    for (i, e) in all.iter().enumerate() {
        assert_eq!(
            ctx.get_component::<Position>(*e).unwrap(),
            Position { x: i as f32, y: -(i as f32) }
        );
        assert_eq!(ctx.has_component::<Marker>(*e).unwrap(), i % 4 == 3);
    }
}

// ---------------------------------------------------------------------------
// Handle invalidation
// ---------------------------------------------------------------------------

#[test]
fn recycled_index_does_not_revive_old_handle() {
    let mut ctx = Context::new();
    let arch = ctx.archetype_of::<(Position,)>();
    let old = ctx.create_entity_in(&arch);
    ctx.destroy_entity(old).unwrap();

    let fresh = ctx.create_entity_in(&arch);
    assert_eq!(fresh.index(), old.index());
    assert_ne!(fresh, old);

    assert!(matches!(ctx.destroy_entity(old), Err(EcsError::InvalidEntity { .. })));
    assert!(matches!(ctx.get_component::<Position>(old), Err(EcsError::InvalidEntity { .. })));
    assert!(matches!(
        ctx.set_component(old, Position { x: 1.0, y: 1.0 }),
        Err(EcsError::InvalidEntity { .. })
    ));
    assert!(ctx.add_component(old, Marker(0)).is_err());
    assert!(ctx.remove_component::<Position>(old).is_err());
    assert!(ctx.archetype(old).is_err());

    // The failed calls did not disturb the live entity.
    assert_eq!(ctx.get_component::<Position>(fresh).unwrap(), Position { x: 0.0, y: 0.0 });
    assert_eq!(ctx.entity_count(), 1);
}

// ---------------------------------------------------------------------------
// System coverage
// ---------------------------------------------------------------------------

#[test]
fn systems_visit_supersets_exactly_once() {
    init_tracing();
    let mut ctx = Context::with_config(EcsConfig {
        chunk_capacity: 32,
        worker_divisor: 1,
        ..Default::default()
    })
    .unwrap();

    let x = ctx.archetype_of::<(Position, Velocity, Visits)>();
    let y = ctx.archetype_of::<(Position, Velocity, Visits, Marker)>();
    let lacking = ctx.archetype_of::<(Position, Visits, Marker)>();

    let in_x: Vec<Entity> = (0..100).map(|_| ctx.create_entity_in(&x)).collect();
    let in_y: Vec<Entity> = (0..70).map(|_| ctx.create_entity_in(&y)).collect();
    let in_lacking: Vec<Entity> = (0..40).map(|_| ctx.create_entity_in(&lacking)).collect();

    // Punch holes so the pass has to compact first.
    ctx.destroy_entities(&in_x[10..20]).unwrap();

    let rows = Arc::new(AtomicUsize::new(0));
    ctx.register_system(Counter { rows: Arc::clone(&rows) });
    ctx.run_systems();
    ctx.run_systems();

    assert_eq!(rows.load(Ordering::Relaxed), 2 * (90 + 70));
    for e in in_x[..10].iter().chain(&in_x[20..]).chain(&in_y) {
        assert_eq!(ctx.get_component::<Visits>(*e).unwrap(), Visits(2));
    }
    for e in &in_lacking {
        assert_eq!(ctx.get_component::<Visits>(*e).unwrap(), Visits(0));
    }
}

#[test]
fn sequential_and_parallel_runs_agree() {
    let run = |parallel: bool| {
        let mut ctx = Context::with_config(EcsConfig {
            chunk_capacity: 16,
            parallel,
            ..Default::default()
        })
        .unwrap();
        let arch = ctx.archetype_of::<(Position, Velocity)>();
        let entities: Vec<Entity> = (0..500)
            .map(|i| {
                let e = ctx.create_entity_in(&arch);
                ctx.set_component(e, Velocity { x: (i % 5) as f32, y: 1.0 }).unwrap();
                e
            })
            .collect();
        ctx.register_system(Movement);
        for _ in 0..3 {
            ctx.run_systems();
        }
        entities
            .iter()
            .map(|e| ctx.get_component::<Position>(*e).unwrap())
            .collect::<Vec<_>>()
    };
    assert_eq!(run(false), run(true));
}

#[test]
fn later_systems_see_earlier_writes_in_the_same_pass() {
    for parallel in [false, true] {
        let run = |steer_first: bool| {
            let mut ctx = Context::with_config(EcsConfig {
                chunk_capacity: 8,
                parallel,
                ..Default::default()
            })
            .unwrap();
            let arch = ctx.archetype_of::<(Position, Velocity)>();
            let entities: Vec<Entity> = (0..100).map(|_| ctx.create_entity_in(&arch)).collect();
            if steer_first {
                ctx.register_system(Steer);
                ctx.register_system(Movement);
            } else {
                ctx.register_system(Movement);
                ctx.register_system(Steer);
            }
            ctx.run_systems();
            entities
                .iter()
                .map(|e| ctx.get_component::<Position>(*e).unwrap())
                .collect::<Vec<_>>()
        };

        let steered = run(true);
        assert!(steered.iter().all(|p| *p == Position { x: 3.0, y: -1.0 }));
        // Registered the other way round, movement still reads the zeroed
        // velocity on the first pass.
        let unsteered = run(false);
        assert!(unsteered.iter().all(|p| *p == Position { x: 0.0, y: 0.0 }));
    }
}

#[test]
fn config_loads_from_partial_json() {
    let config: EcsConfig = serde_json::from_str(r#"{ "chunk_capacity": 64 }"#).unwrap();
    assert_eq!(config.chunk_capacity, 64);
    assert_eq!(config.worker_divisor, 2);
    let ctx = Context::with_config(config).unwrap();
    assert_eq!(ctx.config().chunk_capacity, 64);

    let bad: EcsConfig = serde_json::from_str(r#"{ "worker_divisor": 0 }"#).unwrap();
    assert!(matches!(Context::with_config(bad), Err(EcsError::InvalidConfig(_))));
}
