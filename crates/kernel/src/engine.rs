use parking_lot::{Mutex, RwLock};
use regionflow_common::{Clock, ConfigError, EngineConfig, EntityId, Position};
use regionflow_perf::{MetricSource, PerformanceLoop, SampleReport};
use regionflow_predict::{MovementPredictor, Prediction, PredictionStats};
use regionflow_region::{
    CellBackend, CellLoadStats, Merge, RegionError, RegionId, RegionManager, RegionSnapshot,
    RegionStats,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::timer::{Periodic, Timers};

#[derive(Debug, Clone, Copy)]
struct Tracked {
    position: Position,
    /// Where region membership was last evaluated.
    last_check: Position,
    /// Placement failed; retried on the next move and every maintenance pass.
    unplaced: bool,
}

impl Tracked {
    fn at(position: Position) -> Self {
        Self {
            position,
            last_check: position,
            unplaced: false,
        }
    }
}

/// Result of one movement event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveOutcome {
    /// Region holding the entity after the event.
    pub region: Option<RegionId>,
    pub reassigned: bool,
    pub prediction: Option<Prediction>,
}

/// Work done by one [`Engine::tick`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub tick: u64,
    /// Regions retired by due unload checks.
    pub retired: Vec<RegionId>,
    pub cell_loads: CellLoadStats,
    pub merges: Vec<Merge>,
    pub shrunk: Vec<(RegionId, u32)>,
    /// Previously unplaced entities that found a region.
    pub placed: usize,
    pub cleaned: Vec<RegionId>,
    pub sample: Option<SampleReport>,
    pub swept: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStats {
    pub tick: u64,
    pub tracked_entities: usize,
    pub unplaced_entities: usize,
    pub last_metric: Option<f64>,
    pub regions: RegionStats,
    pub prediction: PredictionStats,
}

/// The region engine: owns the region manager, the movement predictor and the
/// performance loop, and turns entity events into calls on them.
///
/// Event methods may be called concurrently from any thread. [`Engine::tick`]
/// belongs to the single tick context.
pub struct Engine {
    config: EngineConfig,
    regions: Arc<RegionManager>,
    predictor: MovementPredictor,
    performance: PerformanceLoop,
    entities: RwLock<HashMap<EntityId, Tracked>>,
    timers: Timers,
    tick: AtomicU64,
    last_sample: Mutex<Option<SampleReport>>,
}

impl Engine {
    /// Validate `config` and wire up the subsystems.
    pub fn new(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        cells: Arc<dyn CellBackend>,
        metric: Arc<dyn MetricSource>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let regions = Arc::new(RegionManager::new(
            config.region.clone(),
            config.cell_loading.clone(),
            clock.clone(),
            cells,
        ));
        let predictor = MovementPredictor::new(config.prediction.clone(), regions.clone(), clock);
        let performance = PerformanceLoop::new(config.performance.clone(), regions.clone(), metric);
        let timers = Timers {
            maintenance: Periodic::every(config.region.optimize_interval_ticks),
            cleanup: Periodic::every(config.region.cleanup_interval_ticks),
            sampler: Periodic::every(config.performance.sample_interval_ticks),
            sweep: Periodic::every(config.prediction.sweep_interval_ticks),
        };
        tracing::info!(
            maintenance = timers.maintenance.interval(),
            sampler = timers.sampler.interval(),
            "engine initialized"
        );
        Ok(Self {
            config,
            regions,
            predictor,
            performance,
            entities: RwLock::new(HashMap::new()),
            timers,
            tick: AtomicU64::new(0),
            last_sample: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn regions(&self) -> &RegionManager {
        &self.regions
    }

    pub fn predictor(&self) -> &MovementPredictor {
        &self.predictor
    }

    pub fn current_tick(&self) -> u64 {
        self.tick.load(Ordering::Relaxed)
    }

    /// Place `entity` at `pos`: nearest containing region, or a new one.
    /// On failure the entity either keeps its previous region
    /// (`keep_on_failure`) or leaves it and is marked unplaced.
    fn assign(
        &self,
        entity: EntityId,
        pos: &Position,
        keep_on_failure: bool,
    ) -> Result<RegionId, RegionError> {
        let outcome = self.regions.place(entity, pos);
        if outcome.is_err() && !keep_on_failure {
            self.regions.remove_occupant(entity);
        }
        let unplaced = self.regions.region_of(entity).is_none();
        if let Some(t) = self.entities.write().get_mut(&entity) {
            t.last_check = *pos;
            t.unplaced = unplaced;
        }
        if let Err(err) = &outcome {
            if unplaced {
                tracing::warn!(%entity, %pos, %err, "entity left unplaced");
            } else {
                tracing::debug!(%entity, %pos, %err, "entity kept in its previous region");
            }
        }
        outcome
    }

    // --- Inbound events ---

    pub fn on_entity_join(&self, entity: EntityId, pos: Position) -> Result<RegionId, RegionError> {
        self.entities.write().insert(entity, Tracked::at(pos));
        self.predictor.track(entity, pos);
        self.assign(entity, &pos, false)
    }

    pub fn on_entity_leave(&self, entity: EntityId) -> Option<RegionId> {
        self.entities.write().remove(&entity);
        self.predictor.forget(entity);
        self.regions.remove_occupant(entity)
    }

    /// A discontinuous jump (teleport, world change, respawn). Motion history
    /// is reset and membership is re-evaluated from scratch.
    pub fn on_entity_teleport(&self, entity: EntityId, to: Position) -> Result<RegionId, RegionError> {
        {
            let mut entities = self.entities.write();
            let t = entities.entry(entity).or_insert_with(|| Tracked::at(to));
            t.position = to;
        }
        self.predictor.track(entity, to);
        self.assign(entity, &to, false)
    }

    pub fn on_entity_move(&self, entity: EntityId, to: Position) -> MoveOutcome {
        let known = self.entities.read().get(&entity).copied();
        let Some(Tracked {
            position: from,
            last_check,
            ..
        }) = known
        else {
            let region = self.on_entity_join(entity, to).ok();
            return MoveOutcome {
                region,
                reassigned: region.is_some(),
                prediction: None,
            };
        };
        if from.world != to.world {
            let region = self.on_entity_teleport(entity, to).ok();
            return MoveOutcome {
                region,
                reassigned: true,
                prediction: None,
            };
        }

        let prediction = self.predictor.on_move(entity, &from, &to);
        if let Some(t) = self.entities.write().get_mut(&entity) {
            t.position = to;
        }
        self.regions.update_position(entity, &to);
        let current = self.regions.region_of(entity);
        let stay = MoveOutcome {
            region: current,
            reassigned: false,
            prediction,
        };

        if self.config.sleep.prevent_region_change && self.predictor.is_sleeping(entity) {
            return stay;
        }
        let inside = current
            .and_then(|id| self.regions.with_region(id, |r| r.contains(&to)))
            .unwrap_or(false);
        let travelled = last_check.planar_distance(&to) >= self.config.region.check_distance;
        if inside {
            if travelled {
                self.mark_checked(entity, to);
            }
            return stay;
        }

        match self.assign(entity, &to, true) {
            Ok(region) => {
                if Some(region) != current {
                    tracing::debug!(%entity, from = ?current, to = %region, "entity changed region");
                }
                MoveOutcome {
                    region: Some(region),
                    reassigned: Some(region) != current,
                    prediction,
                }
            }
            Err(_) => stay,
        }
    }

    fn mark_checked(&self, entity: EntityId, at: Position) {
        if let Some(t) = self.entities.write().get_mut(&entity) {
            t.last_check = at;
        }
    }

    pub fn on_entity_sleep_start(&self, entity: EntityId) -> bool {
        self.predictor.sleep_start(entity)
    }

    /// Wake `entity` at `pos`. A region that no longer covers the wake
    /// position is grown to `ceil(d * multiplier) + buffer` (clamped); if that
    /// is still not enough the entity is reassigned.
    pub fn on_entity_sleep_end(&self, entity: EntityId, pos: Position) -> Option<RegionId> {
        if !self.entities.read().contains_key(&entity) {
            return self.on_entity_join(entity, pos).ok();
        }
        self.predictor.sleep_end(entity, pos);
        if let Some(t) = self.entities.write().get_mut(&entity) {
            t.position = pos;
        }
        self.regions.update_position(entity, &pos);

        let Some(current) = self.regions.region_of(entity) else {
            return self.assign(entity, &pos, false).ok();
        };
        let Some((covered, distance)) = self
            .regions
            .with_region(current, |r| (r.contains(&pos), r.distance_to_center(&pos)))
        else {
            return self.assign(entity, &pos, false).ok();
        };
        if covered {
            self.mark_checked(entity, pos);
            return Some(current);
        }

        if distance.is_finite() {
            let sleep = &self.config.sleep;
            let wanted = ((distance * sleep.expansion_multiplier).ceil() as u32)
                .saturating_add(sleep.expansion_buffer);
            if let Ok(radius) = self.regions.resize_region(current, wanted) {
                tracing::info!(%entity, region = %current, radius, "region expanded around waking entity");
            }
            if self.regions.with_region(current, |r| r.contains(&pos)) == Some(true) {
                self.mark_checked(entity, pos);
                return Some(current);
            }
        }
        self.assign(entity, &pos, true).ok()
    }

    // --- Tick context ---

    /// Advance one tick: due unload checks, one cell-load batch, then every
    /// periodic pass whose interval elapsed.
    pub fn tick(&self) -> TickReport {
        let tick = self.tick.fetch_add(1, Ordering::Relaxed) + 1;
        let mut report = TickReport {
            tick,
            retired: self.regions.run_unload_checks(),
            cell_loads: self.regions.drain_cell_loads(),
            ..TickReport::default()
        };

        if self.timers.maintenance.fires_on(tick) {
            report.merges = self.regions.optimize();
            report.shrunk = self.predictor.shrink_idle_regions();
            report.placed = self.retry_unplaced();
        }
        if self.timers.cleanup.fires_on(tick) {
            report.cleaned = self.performance.cleanup();
        }
        if self.timers.sampler.fires_on(tick) {
            let online = self.online_positions();
            let sample = self.performance.sample(&online);
            *self.last_sample.lock() = Some(sample.clone());
            report.sample = Some(sample);
        }
        if self.timers.sweep.fires_on(tick) {
            report.swept = self.predictor.sweep_stale();
        }
        report
    }

    fn retry_unplaced(&self) -> usize {
        let pending: Vec<(EntityId, Position)> = self
            .entities
            .read()
            .iter()
            .filter(|(_, t)| t.unplaced)
            .map(|(id, t)| (*id, t.position))
            .collect();
        pending
            .into_iter()
            .filter(|(entity, pos)| self.assign(*entity, pos, false).is_ok())
            .count()
    }

    fn online_positions(&self) -> Vec<Position> {
        self.entities.read().values().map(|t| t.position).collect()
    }

    // --- Queries and admin ---

    pub fn list_regions(&self) -> Vec<RegionSnapshot> {
        self.regions.list_regions()
    }

    pub fn region(&self, id: RegionId) -> Option<RegionSnapshot> {
        self.regions.region(id)
    }

    pub fn entity_region(&self, entity: EntityId) -> Option<RegionSnapshot> {
        self.regions.entity_region(entity)
    }

    pub fn predicted_position(&self, entity: EntityId) -> Option<Position> {
        self.predictor.forecast(entity)
    }

    pub fn is_unplaced(&self, entity: EntityId) -> bool {
        self.entities.read().get(&entity).is_some_and(|t| t.unplaced)
    }

    pub fn force_create_region(&self, pos: &Position) -> Result<RegionId, RegionError> {
        self.regions.force_create_region(pos)
    }

    pub fn force_unload(&self, id: RegionId) -> Result<(), RegionError> {
        self.regions.force_unload(id)
    }

    pub fn set_forced(&self, id: RegionId, forced: bool) -> Result<(), RegionError> {
        self.regions.set_forced(id, forced)
    }

    /// Run a merge pass now instead of waiting for the maintenance timer.
    pub fn optimize_now(&self) -> Vec<Merge> {
        self.regions.optimize()
    }

    pub fn last_sample(&self) -> Option<SampleReport> {
        self.last_sample.lock().clone()
    }

    pub fn stats(&self) -> EngineStats {
        let (tracked_entities, unplaced_entities) = {
            let entities = self.entities.read();
            (entities.len(), entities.values().filter(|t| t.unplaced).count())
        };
        EngineStats {
            tick: self.current_tick(),
            tracked_entities,
            unplaced_entities,
            last_metric: self.performance.last_metric(),
            regions: self.regions.stats(),
            prediction: self.predictor.stats(),
        }
    }

    /// Release every region and forget every entity.
    pub fn shutdown(&self) {
        let entities: Vec<EntityId> = self.entities.write().drain().map(|(id, _)| id).collect();
        for entity in entities {
            self.predictor.forget(entity);
        }
        self.regions.shutdown();
        tracing::info!(tick = self.current_tick(), "engine shut down");
    }
}
