use parking_lot::RwLock;
use regionflow_common::{Clock, EntityId, Position, PredictionConfig};
use regionflow_region::{RegionError, RegionId, RegionManager};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::history::{MovementHistory, MovementSample};

/// Expand a target region once the forecast is further than this fraction of
/// its radius from the center.
const EXPAND_TRIGGER: f64 = 0.8;
/// Headroom applied to the forecast distance when expanding.
const EXPAND_FACTOR: f64 = 1.5;

/// Per-entity activity state, advanced by movement events and the idle pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Activity {
    Moving,
    /// No qualifying movement for the idle timeout.
    Idle,
    Sleeping,
}

/// What a forecast did to the region store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PreloadAction {
    /// The forecast stays inside the entity's current region.
    StaysInRegion,
    Expanded { region: RegionId, radius: u32 },
    /// The nearest region already reaches far enough.
    AlreadyCovered { region: RegionId },
    /// The nearest region is already at the maximum size.
    AtMaximum { region: RegionId },
    Created { region: RegionId },
    CapacityExceeded,
    /// The chosen region changed under us before it could be resized.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Prediction {
    pub forecast: Position,
    pub action: PreloadAction,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionStats {
    pub tracked_entities: usize,
    pub prediction_distance: f64,
    pub prediction_seconds: f64,
    /// Mean of the per-entity average speeds.
    pub average_speed: f64,
}

#[derive(Debug, Clone)]
struct EntityTrack {
    position: Position,
    last_event: Duration,
    last_motion: Duration,
    history: Option<MovementHistory>,
    activity: Activity,
}

impl EntityTrack {
    fn new(position: Position, now: Duration) -> Self {
        Self {
            position,
            last_event: now,
            last_motion: now,
            history: None,
            activity: Activity::Moving,
        }
    }
}

/// Tracks entity motion and reshapes regions ahead of it.
pub struct MovementPredictor {
    config: PredictionConfig,
    regions: Arc<RegionManager>,
    clock: Arc<dyn Clock>,
    tracks: RwLock<HashMap<EntityId, EntityTrack>>,
}

impl MovementPredictor {
    pub fn new(config: PredictionConfig, regions: Arc<RegionManager>, clock: Arc<dyn Clock>) -> Self {
        tracing::info!(
            horizon = config.time_seconds,
            max_distance = config.distance,
            "movement predictor initialized"
        );
        Self {
            config,
            regions,
            clock,
            tracks: RwLock::new(HashMap::new()),
        }
    }

    /// Start (or restart after a teleport) tracking at `pos`. Any movement
    /// history is discarded because the jump is not motion.
    pub fn track(&self, entity: EntityId, pos: Position) {
        let now = self.clock.now();
        self.tracks.write().insert(entity, EntityTrack::new(pos, now));
    }

    pub fn forget(&self, entity: EntityId) {
        self.tracks.write().remove(&entity);
    }

    /// Feed one movement event. Returns a prediction when the move qualified
    /// (elapsed time > 0 and displacement >= the speed threshold).
    pub fn on_move(&self, entity: EntityId, from: &Position, to: &Position) -> Option<Prediction> {
        let now = self.clock.now();
        let forecast = {
            let mut tracks = self.tracks.write();
            let track = tracks
                .entry(entity)
                .or_insert_with(|| EntityTrack::new(*from, now));
            let dt = now.saturating_sub(track.last_event);
            track.last_event = now;
            track.position = *to;

            if from.world != to.world {
                track.history = None;
                return None;
            }
            let distance = from.planar_distance(to);
            if dt.is_zero() || distance < self.config.speed_threshold {
                return None;
            }

            let sample = MovementSample {
                speed: distance / dt.as_secs_f64(),
                direction: (to.z() - from.z()).atan2(to.x() - from.x()),
                timestamp: now,
            };
            let capacity = self.config.history_size;
            let history = track
                .history
                .get_or_insert_with(|| MovementHistory::new(capacity, *to, now));
            history.record(sample, *to);
            track.last_motion = now;
            if track.activity == Activity::Sleeping {
                return None;
            }
            track.activity = Activity::Moving;
            self.project(to, history)
        };

        let action = self.preload(entity, &forecast);
        tracing::trace!(%entity, %forecast, ?action, "movement forecast");
        Some(Prediction { forecast, action })
    }

    /// Current position pushed along the averaged heading by
    /// `min(average speed * horizon, max distance)`.
    fn project(&self, pos: &Position, history: &MovementHistory) -> Position {
        let reach = (history.average_speed() * self.config.time_seconds).min(self.config.distance);
        let heading = history.average_direction();
        pos.offset(reach * heading.cos(), reach * heading.sin())
    }

    /// Forecast for an entity; its last known position when it has no history.
    pub fn forecast(&self, entity: EntityId) -> Option<Position> {
        let tracks = self.tracks.read();
        let track = tracks.get(&entity)?;
        Some(match &track.history {
            Some(h) if !h.is_empty() => self.project(&track.position, h),
            _ => track.position,
        })
    }

    fn preload(&self, entity: EntityId, forecast: &Position) -> PreloadAction {
        if let Some(current) = self.regions.region_of(entity) {
            if self.regions.with_region(current, |r| r.contains(forecast)) == Some(true) {
                return PreloadAction::StaysInRegion;
            }
        }

        let Some(target) = self.regions.find_nearest(forecast) else {
            return match self.regions.create_new(forecast) {
                Ok(region) => {
                    tracing::info!(%entity, %region, %forecast, "region created ahead of movement");
                    PreloadAction::Created { region }
                }
                Err(err) => {
                    tracing::debug!(%entity, %err, "no region created ahead of movement");
                    PreloadAction::CapacityExceeded
                }
            };
        };

        let Some((distance, radius)) = self
            .regions
            .with_region(target, |r| (r.distance_to_center(forecast), r.radius()))
        else {
            return PreloadAction::Skipped;
        };
        if distance <= f64::from(radius) * EXPAND_TRIGGER {
            return PreloadAction::AlreadyCovered { region: target };
        }
        let wanted = (distance * EXPAND_FACTOR).ceil() as u32;
        let capped = wanted.min(self.regions.config().max_radius());
        if capped <= radius {
            return PreloadAction::AtMaximum { region: target };
        }
        match self.regions.resize_region(target, capped) {
            Ok(radius) => {
                tracing::info!(%entity, region = %target, radius, "region expanded ahead of movement");
                PreloadAction::Expanded {
                    region: target,
                    radius,
                }
            }
            Err(RegionError::UnknownRegion(_) | RegionError::Retired(_)) => PreloadAction::Skipped,
            Err(err) => {
                tracing::debug!(%err, "expansion rejected");
                PreloadAction::Skipped
            }
        }
    }

    /// Idle pass: entities without qualifying movement for the idle timeout
    /// become `Idle`; an idle sole occupant halves its region's radius, never
    /// below `minSize / 2` and never so far that it falls outside.
    pub fn shrink_idle_regions(&self) -> Vec<(RegionId, u32)> {
        let now = self.clock.now();
        let timeout = self.config.idle_timeout();
        let idle: Vec<(EntityId, Position)> = {
            let mut tracks = self.tracks.write();
            tracks
                .iter_mut()
                .filter(|(_, t)| t.activity != Activity::Sleeping)
                .filter(|(_, t)| now.saturating_sub(t.last_motion) > timeout)
                .map(|(id, t)| {
                    t.activity = Activity::Idle;
                    (*id, t.position)
                })
                .collect()
        };

        let min_radius = self.regions.config().min_radius();
        let mut shrunk = Vec::new();
        for (entity, at) in idle {
            let Some(region) = self.regions.region_of(entity) else {
                continue;
            };
            let Some((count, radius, reach)) = self
                .regions
                .with_region(region, |r| (r.occupant_count(), r.radius(), r.extent_to(&at)))
            else {
                continue;
            };
            let target = (radius / 2).max(min_radius).max(reach.ceil() as u32);
            if count != 1 || target >= radius {
                continue;
            }
            if let Ok(applied) = self.regions.resize_region(region, target) {
                tracing::info!(%entity, %region, radius = applied, "region shrunk for idle occupant");
                shrunk.push((region, applied));
            }
        }
        shrunk
    }

    /// Drop movement histories not updated within the max-age window.
    pub fn sweep_stale(&self) -> usize {
        let now = self.clock.now();
        let max_age = self.config.max_age();
        let mut purged = 0;
        for track in self.tracks.write().values_mut() {
            let stale = track
                .history
                .as_ref()
                .is_some_and(|h| now.saturating_sub(h.last_update()) > max_age);
            if stale {
                track.history = None;
                purged += 1;
            }
        }
        if purged > 0 {
            tracing::debug!(purged, "stale movement histories purged");
        }
        purged
    }

    pub fn sleep_start(&self, entity: EntityId) -> bool {
        match self.tracks.write().get_mut(&entity) {
            Some(track) => {
                track.activity = Activity::Sleeping;
                true
            }
            None => false,
        }
    }

    /// Wake an entity at `pos`. Motion history does not carry over the sleep.
    pub fn sleep_end(&self, entity: EntityId, pos: Position) {
        let now = self.clock.now();
        let mut tracks = self.tracks.write();
        let track = tracks
            .entry(entity)
            .or_insert_with(|| EntityTrack::new(pos, now));
        track.position = pos;
        track.last_event = now;
        track.last_motion = now;
        track.history = None;
        track.activity = Activity::Moving;
    }

    pub fn activity(&self, entity: EntityId) -> Option<Activity> {
        self.tracks.read().get(&entity).map(|t| t.activity)
    }

    pub fn is_sleeping(&self, entity: EntityId) -> bool {
        self.activity(entity) == Some(Activity::Sleeping)
    }

    pub fn history(&self, entity: EntityId) -> Option<MovementHistory> {
        self.tracks.read().get(&entity)?.history.clone()
    }

    pub fn stats(&self) -> PredictionStats {
        let tracks = self.tracks.read();
        let speeds: Vec<f64> = tracks
            .values()
            .filter_map(|t| t.history.as_ref())
            .map(MovementHistory::average_speed)
            .collect();
        let average_speed = if speeds.is_empty() {
            0.0
        } else {
            speeds.iter().sum::<f64>() / speeds.len() as f64
        };
        PredictionStats {
            tracked_entities: speeds.len(),
            prediction_distance: self.config.distance,
            prediction_seconds: self.config.time_seconds,
            average_speed,
        }
    }
}
