//! End-to-end engine scenarios driven by a manual clock.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use regionflow_common::{ConfigError, EngineConfig, EntityId, ManualClock, Position, WorldId};
use regionflow_perf::ScriptedMetric;
use regionflow_predict::PreloadAction;
use regionflow_region::{InMemoryCells, RegionError};

use crate::engine::{Engine, TickReport};

struct Harness {
    clock: Arc<ManualClock>,
    cells: Arc<InMemoryCells>,
    engine: Engine,
}

fn harness_with(config: EngineConfig, readings: &[f64]) -> Harness {
    let clock = Arc::new(ManualClock::new());
    let cells = Arc::new(InMemoryCells::new());
    let metric = Arc::new(ScriptedMetric::new(readings.iter().copied()));
    let engine = Engine::new(config, clock.clone(), cells.clone(), metric).unwrap();
    Harness {
        clock,
        cells,
        engine,
    }
}

fn harness() -> Harness {
    harness_with(EngineConfig::default(), &[])
}

fn pos(x: f64, z: f64) -> Position {
    Position::new(WorldId(0), x, 64.0, z)
}

#[test]
fn nearby_joins_share_a_region_and_distant_join_gets_its_own() {
    let h = harness();
    let (a, b, c) = (EntityId::new(), EntityId::new(), EntityId::new());
    let first = h.engine.on_entity_join(a, pos(100.0, 100.0)).unwrap();
    assert_eq!(h.engine.on_entity_join(b, pos(120.0, 100.0)).unwrap(), first);
    let far = h.engine.on_entity_join(c, pos(10000.0, 10000.0)).unwrap();
    assert_ne!(far, first);
    assert_eq!(h.engine.stats().regions.active_regions, 2);
    assert_eq!(h.engine.region(first).unwrap().occupant_count(), 2);
}

#[test]
fn small_moves_keep_membership_and_leaving_reassigns() {
    let h = harness();
    let a = EntityId::new();
    let home = h.engine.on_entity_join(a, pos(256.0, 256.0)).unwrap();

    let stay = h.engine.on_entity_move(a, pos(300.0, 256.0));
    assert_eq!(stay.region, Some(home));
    assert!(!stay.reassigned);

    let moved = h.engine.on_entity_move(a, pos(900.0, 256.0));
    assert!(moved.reassigned);
    let next = moved.region.unwrap();
    assert_ne!(next, home);

    let report = h.engine.tick();
    assert_eq!(report.retired, vec![home]);
    assert!(!h.engine.region(home).unwrap().active);
    assert_eq!(h.engine.entity_region(a).unwrap().id, next);
}

#[test]
fn remove_then_readd_in_same_tick_keeps_region() {
    let h = harness();
    let (a, b) = (EntityId::new(), EntityId::new());
    let region = h.engine.on_entity_join(a, pos(256.0, 256.0)).unwrap();
    assert_eq!(h.engine.on_entity_leave(a), Some(region));
    assert_eq!(h.engine.on_entity_join(b, pos(260.0, 256.0)).unwrap(), region);

    let report = h.engine.tick();
    assert!(report.retired.is_empty(), "stale unload check must be a no-op");
    assert!(h.engine.region(region).unwrap().active);
}

#[test]
fn capacity_exhaustion_leaves_entity_unplaced_until_maintenance() {
    let mut config = EngineConfig::default();
    config.region.max_active_regions = 1;
    config.region.optimize_interval_ticks = 1;
    let h = harness_with(config, &[]);
    let (a, b) = (EntityId::new(), EntityId::new());

    let home = h.engine.on_entity_join(a, pos(256.0, 256.0)).unwrap();
    assert_eq!(
        h.engine.on_entity_join(b, pos(10000.0, 10000.0)),
        Err(RegionError::CapacityExceeded { limit: 1 })
    );
    assert!(h.engine.is_unplaced(b));
    assert_eq!(h.engine.stats().unplaced_entities, 1);

    h.engine.on_entity_leave(a);
    let report = h.engine.tick();
    assert_eq!(report.retired, vec![home]);
    assert_eq!(report.placed, 1);
    assert!(!h.engine.is_unplaced(b));
    assert!(h.engine.entity_region(b).unwrap().active);
}

#[test]
fn unplaced_entity_is_retried_on_next_move() {
    let mut config = EngineConfig::default();
    config.region.max_active_regions = 1;
    let h = harness_with(config, &[]);
    let (a, b) = (EntityId::new(), EntityId::new());

    h.engine.on_entity_join(a, pos(256.0, 256.0)).unwrap();
    assert!(h.engine.on_entity_join(b, pos(10000.0, 10000.0)).is_err());
    h.engine.on_entity_leave(a);
    let report = h.engine.tick();
    assert_eq!(report.placed, 0, "maintenance pass not due yet");
    assert!(h.engine.is_unplaced(b));

    let outcome = h.engine.on_entity_move(b, pos(10010.0, 10000.0));
    assert!(outcome.reassigned);
    assert!(outcome.region.is_some());
    assert!(!h.engine.is_unplaced(b));
}

#[test]
fn sleeping_entity_keeps_region_and_wake_expands_it() {
    let h = harness();
    let a = EntityId::new();
    let home = h.engine.on_entity_join(a, pos(256.0, 256.0)).unwrap();
    assert!(h.engine.on_entity_sleep_start(a));

    let outcome = h.engine.on_entity_move(a, pos(600.0, 256.0));
    assert_eq!(outcome.region, Some(home));
    assert!(!outcome.reassigned);
    assert_eq!(h.engine.region(home).unwrap().size, 512);

    // distance 344: ceil(344 * 1.5) + 16 = 532, clamped to 512.
    assert_eq!(h.engine.on_entity_sleep_end(a, pos(600.0, 256.0)), Some(home));
    assert_eq!(h.engine.region(home).unwrap().size, 1024);
    assert!(!h.engine.predictor().is_sleeping(a));
}

#[test]
fn waking_beyond_maximum_expansion_reassigns() {
    let h = harness();
    let a = EntityId::new();
    let home = h.engine.on_entity_join(a, pos(256.0, 256.0)).unwrap();
    h.engine.on_entity_sleep_start(a);
    let woke_in = h.engine.on_entity_sleep_end(a, pos(5000.0, 256.0)).unwrap();
    assert_ne!(woke_in, home);
    assert!(h.engine.region(woke_in).unwrap().occupants.contains(&a));
}

#[test]
fn ticks_materialize_cells_in_batches() {
    let h = harness();
    let a = EntityId::new();
    h.engine.on_entity_join(a, pos(256.0, 256.0)).unwrap();

    let first = h.engine.tick();
    assert_eq!(first.cell_loads.loaded, 16);
    assert_eq!(first.cell_loads.still_queued, 81 - 16);
    assert_eq!(h.cells.loaded_count(), 16);

    for _ in 0..5 {
        h.engine.tick();
    }
    assert_eq!(h.cells.loaded_count(), 81);
    assert_eq!(h.engine.stats().regions.loaded_cells, 81);
}

#[test]
fn emergency_reclaim_fires_once_per_crossing() {
    let mut config = EngineConfig::default();
    config.region.fast_unload = false;
    config.performance.sample_interval_ticks = 1;
    let h = harness_with(config, &[20.0, 20.0, 14.0, 14.0, 21.0]);
    let (a, b) = (EntityId::new(), EntityId::new());
    let idle = h.engine.on_entity_join(a, pos(256.0, 256.0)).unwrap();
    h.engine.on_entity_leave(a);
    let busy = h.engine.on_entity_join(b, pos(5000.0, 5000.0)).unwrap();

    let reports: Vec<TickReport> = (0..5).map(|_| h.engine.tick()).collect();
    let crossings: Vec<bool> = reports
        .iter()
        .map(|r| r.sample.as_ref().is_some_and(|s| s.crossed_low))
        .collect();
    assert_eq!(crossings, vec![false, false, true, false, false]);
    assert_eq!(reports[2].sample.as_ref().unwrap().retired, vec![idle]);
    assert!(h.engine.region(busy).unwrap().active);
    assert_eq!(h.cells.reclaim_hints(), 1);
    assert_eq!(h.engine.stats().last_metric, Some(20.0));
}

#[test]
fn teleport_resets_history_and_reassigns() {
    let h = harness();
    let a = EntityId::new();
    let home = h.engine.on_entity_join(a, pos(256.0, 256.0)).unwrap();

    h.clock.advance(Duration::from_secs(1));
    let outcome = h.engine.on_entity_move(a, pos(266.0, 256.0));
    let prediction = outcome.prediction.unwrap();
    assert_eq!(prediction.action, PreloadAction::StaysInRegion);
    assert_eq!(h.engine.predictor().history(a).unwrap().len(), 1);

    let landed = h.engine.on_entity_teleport(a, pos(5000.0, 5000.0)).unwrap();
    assert_ne!(landed, home);
    assert!(h.engine.predictor().history(a).is_none());
    assert_eq!(h.engine.predicted_position(a), Some(pos(5000.0, 5000.0)));
}

#[test]
fn world_change_on_move_acts_as_teleport() {
    let h = harness();
    let a = EntityId::new();
    let home = h.engine.on_entity_join(a, pos(256.0, 256.0)).unwrap();
    let other = Position::new(WorldId(1), 256.0, 64.0, 256.0);
    let outcome = h.engine.on_entity_move(a, other);
    assert!(outcome.reassigned);
    let region = h.engine.entity_region(a).unwrap();
    assert_ne!(region.id, home);
    assert_eq!(region.center.world, WorldId(1));
}

#[test]
fn leave_forgets_entity() {
    let h = harness();
    let a = EntityId::new();
    let region = h.engine.on_entity_join(a, pos(256.0, 256.0)).unwrap();
    assert_eq!(h.engine.on_entity_leave(a), Some(region));
    assert!(h.engine.entity_region(a).is_none());
    assert_eq!(h.engine.stats().tracked_entities, 0);
    assert_eq!(h.engine.predicted_position(a), None);
}

#[test]
fn idle_sole_occupant_region_shrinks_on_maintenance() {
    let mut config = EngineConfig::default();
    config.region.optimize_interval_ticks = 1;
    let h = harness_with(config, &[]);
    let a = EntityId::new();
    let region = h.engine.on_entity_join(a, pos(256.0, 256.0)).unwrap();

    assert!(h.engine.tick().shrunk.is_empty());
    h.clock.advance(Duration::from_secs(11));
    assert_eq!(h.engine.tick().shrunk, vec![(region, 128)]);
    assert_eq!(h.engine.region(region).unwrap().size, 256);
}

#[test]
fn invalid_config_aborts_construction() {
    let mut config = EngineConfig::default();
    config.region.size = 511;
    let result = Engine::new(
        config,
        Arc::new(ManualClock::new()),
        Arc::new(InMemoryCells::new()),
        Arc::new(ScriptedMetric::default()),
    );
    assert!(matches!(
        result,
        Err(ConfigError::Invalid {
            key: "region.size",
            ..
        })
    ));
}

#[test]
fn admin_surface_forces_and_unloads() {
    let h = harness();
    let forced = h.engine.force_create_region(&pos(2048.0, 2048.0)).unwrap();
    assert!(h.engine.region(forced).unwrap().forced);
    assert!(h.engine.optimize_now().is_empty());

    let a = EntityId::new();
    assert_eq!(h.engine.on_entity_join(a, pos(2050.0, 2050.0)).unwrap(), forced);
    assert_eq!(
        h.engine.force_unload(forced),
        Err(RegionError::OccupantsPresent {
            region: forced,
            count: 1
        })
    );

    h.engine.on_entity_leave(a);
    h.engine.tick();
    assert!(h.engine.region(forced).unwrap().active, "forced regions survive unload checks");

    h.engine.force_unload(forced).unwrap();
    let snapshot = h.engine.region(forced).unwrap();
    assert!(!snapshot.active);
    assert!(!snapshot.forced);
}

#[test]
fn concurrent_events_keep_occupancy_consistent() {
    let h = harness();
    let engine = &h.engine;
    std::thread::scope(|scope| {
        for t in 0..8u32 {
            scope.spawn(move || {
                for i in 0..25u32 {
                    let n = f64::from(t * 25 + i);
                    let entity = EntityId::new();
                    let start = pos((n * 37.0) % 3000.0, (n * 53.0) % 3000.0);
                    let _ = engine.on_entity_join(entity, start);
                    for step in 1..=4 {
                        let _ = engine.on_entity_move(entity, start.offset(f64::from(step) * 90.0, 0.0));
                    }
                }
            });
        }
    });

    let stats = engine.stats();
    assert_eq!(stats.tracked_entities, 200);
    let mut seen = HashSet::new();
    for region in engine.list_regions() {
        for occupant in region.occupants {
            assert!(seen.insert(occupant), "entity in two regions");
        }
    }
    assert_eq!(seen.len(), 200 - stats.unplaced_entities);
    assert_eq!(stats.regions.total_occupants, seen.len());
}

#[test]
fn stats_serialize_to_json() {
    let h = harness();
    h.engine.on_entity_join(EntityId::new(), pos(256.0, 256.0)).unwrap();
    h.engine.tick();
    let json = serde_json::to_value(h.engine.stats()).unwrap();
    assert_eq!(json["tick"], 1);
    assert_eq!(json["regions"]["active_regions"], 1);
    assert_eq!(json["prediction"]["prediction_distance"], 128.0);
}

#[test]
fn shutdown_releases_everything() {
    let h = harness();
    h.engine.on_entity_join(EntityId::new(), pos(256.0, 256.0)).unwrap();
    for _ in 0..6 {
        h.engine.tick();
    }
    assert!(h.cells.loaded_count() > 0);
    h.engine.shutdown();
    assert_eq!(h.cells.loaded_count(), 0);
    assert!(h.engine.list_regions().is_empty());
    assert_eq!(h.engine.stats().tracked_entities, 0);
}

#[test]
fn concurrent_joins_never_overfill_a_region() {
    let mut config = EngineConfig::default();
    config.region.max_players_per_region = 4;
    let h = harness_with(config, &[]);
    let engine = &h.engine;
    std::thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(move || {
                for _ in 0..5 {
                    let _ = engine.on_entity_join(EntityId::new(), pos(256.0, 256.0));
                }
            });
        }
    });
    for region in engine.list_regions() {
        assert!(region.occupant_count() <= 4, "{} holds {}", region.id, region.occupant_count());
    }
    let stats = engine.stats();
    assert_eq!(stats.regions.total_occupants + stats.unplaced_entities, 40);
}

#[test]
fn region_created_ahead_of_movement_retires_when_unused() {
    let mut config = EngineConfig::default();
    config.region.max_players_per_region = 1;
    let h = harness_with(config, &[]);
    let a = EntityId::new();
    let home = h.engine.on_entity_join(a, pos(256.0, 256.0)).unwrap();

    h.clock.advance(Duration::from_secs(1));
    let outcome = h.engine.on_entity_move(a, pos(480.0, 256.0));
    assert_eq!(outcome.region, Some(home));
    let Some(PreloadAction::Created { region: ahead }) = outcome.prediction.map(|p| p.action) else {
        panic!("expected a region ahead of movement, got {:?}", outcome.prediction);
    };

    let report = h.engine.tick();
    assert_eq!(report.retired, vec![ahead]);
    assert_eq!(h.engine.stats().regions.active_regions, 1);
}

#[test]
fn merged_occupant_stays_put_on_next_move() {
    let h = harness();
    let (a, b) = (EntityId::new(), EntityId::new());
    let first = h.engine.on_entity_join(a, pos(256.0, 256.0)).unwrap();
    let second = h.engine.on_entity_join(b, pos(700.0, 100.0)).unwrap();
    assert_ne!(first, second);

    assert_eq!(h.engine.optimize_now().len(), 1);
    assert_eq!(h.engine.entity_region(b).unwrap().id, first);

    let outcome = h.engine.on_entity_move(b, pos(698.0, 100.0));
    assert!(!outcome.reassigned);
    assert_eq!(outcome.region, Some(first));
    assert_eq!(h.engine.stats().regions.total_regions, 1);
}
