//! Engine configuration.
//!
//! Every section has defaults, so an empty document is a valid configuration.
//! Keys are camelCase (`region.minDistanceBetweenRegions`, `prediction.timeSeconds`, ...).
//! Unknown keys are rejected so that typos abort startup instead of silently
//! falling back to defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::clock::ticks_to_duration;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.into(),
    }
}

/// Region sizing, placement and lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct RegionConfig {
    /// Diameter of a freshly placed region and the placement grid pitch.
    pub size: u32,
    pub min_distance_between_regions: u32,
    pub max_active_regions: usize,
    pub max_players_per_region: usize,
    /// Distance an entity must travel before its membership is re-evaluated.
    pub check_distance: f64,
    pub unload_delay_ticks: u64,
    /// Check empty regions on the next tick instead of after `unload_delay_ticks`.
    pub fast_unload: bool,
    pub min_size: u32,
    pub max_size: u32,
    /// Retired regions older than this are dropped from the store.
    pub cleanup_ttl_seconds: u64,
    pub optimize_interval_ticks: u64,
    pub cleanup_interval_ticks: u64,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            size: 512,
            min_distance_between_regions: 256,
            max_active_regions: 50,
            max_players_per_region: 20,
            check_distance: 64.0,
            unload_delay_ticks: 600,
            fast_unload: true,
            min_size: 256,
            max_size: 1024,
            cleanup_ttl_seconds: 600,
            optimize_interval_ticks: 600,
            cleanup_interval_ticks: 6000,
        }
    }
}

impl RegionConfig {
    /// Delay between a region becoming empty and its retirement check.
    pub fn unload_delay(&self) -> Duration {
        if self.fast_unload {
            Duration::ZERO
        } else {
            ticks_to_duration(self.unload_delay_ticks)
        }
    }

    pub fn cleanup_ttl(&self) -> Duration {
        Duration::from_secs(self.cleanup_ttl_seconds)
    }

    pub fn min_radius(&self) -> u32 {
        self.min_size / 2
    }

    pub fn max_radius(&self) -> u32 {
        self.max_size / 2
    }
}

/// Movement forecasting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct PredictionConfig {
    /// Upper bound on how far ahead a forecast may reach.
    pub distance: f64,
    /// Forecast horizon.
    pub time_seconds: f64,
    /// Minimum displacement for a move to count as movement.
    pub speed_threshold: f64,
    pub history_size: usize,
    pub idle_timeout_seconds: u64,
    pub max_age_seconds: u64,
    pub sweep_interval_ticks: u64,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            distance: 128.0,
            time_seconds: 10.0,
            speed_threshold: 0.1,
            history_size: 10,
            idle_timeout_seconds: 10,
            max_age_seconds: 30,
            sweep_interval_ticks: 100,
        }
    }
}

impl PredictionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_seconds)
    }
}

/// Load-metric feedback loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct PerformanceConfig {
    pub target_metric: f64,
    pub min_metric: f64,
    pub force_unload_on_low: bool,
    pub sample_interval_ticks: u64,
    /// Cells with no online entity within this many cells are evicted.
    pub eviction_proximity_cells: i32,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            target_metric: 20.0,
            min_metric: 15.0,
            force_unload_on_low: true,
            sample_interval_ticks: 100,
            eviction_proximity_cells: 2,
        }
    }
}

/// Behavior of sleeping entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct SleepConfig {
    pub prevent_region_change: bool,
    pub expansion_multiplier: f64,
    pub expansion_buffer: u32,
}

impl Default for SleepConfig {
    fn default() -> Self {
        Self {
            prevent_region_change: true,
            expansion_multiplier: 1.5,
            expansion_buffer: 16,
        }
    }
}

/// Resource-cell materialization budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct CellLoadingConfig {
    /// View radius (in cells) loaded around a new occupant.
    pub max_view_distance: i32,
    /// Cells materialized per tick.
    pub max_cells_per_batch: usize,
    pub queue_capacity: usize,
}

impl Default for CellLoadingConfig {
    fn default() -> Self {
        Self {
            max_view_distance: 4,
            max_cells_per_batch: 16,
            queue_capacity: 4096,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct EngineConfig {
    pub region: RegionConfig,
    pub prediction: PredictionConfig,
    pub performance: PerformanceConfig,
    pub sleep: SleepConfig,
    pub cell_loading: CellLoadingConfig,
}

impl EngineConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let r = &self.region;
        if r.size == 0 || r.size % 2 != 0 {
            return Err(invalid("region.size", "must be a positive even number"));
        }
        if r.min_size == 0 || r.min_size % 2 != 0 {
            return Err(invalid("region.minSize", "must be a positive even number"));
        }
        if r.max_size % 2 != 0 || r.max_size < r.min_size {
            return Err(invalid(
                "region.maxSize",
                format!("must be even and at least minSize ({})", r.min_size),
            ));
        }
        if r.size < r.min_size || r.size > r.max_size {
            return Err(invalid(
                "region.size",
                format!("must lie within [{}, {}]", r.min_size, r.max_size),
            ));
        }
        if r.max_active_regions == 0 {
            return Err(invalid("region.maxActiveRegions", "must be at least 1"));
        }
        if r.max_players_per_region == 0 {
            return Err(invalid("region.maxPlayersPerRegion", "must be at least 1"));
        }
        if !(r.check_distance >= 0.0) {
            return Err(invalid("region.checkDistance", "must be non-negative"));
        }
        if r.optimize_interval_ticks == 0 || r.cleanup_interval_ticks == 0 {
            return Err(invalid("region.*IntervalTicks", "must be at least 1"));
        }

        let p = &self.prediction;
        if !(p.distance >= 0.0) {
            return Err(invalid("prediction.distance", "must be non-negative"));
        }
        if !(p.time_seconds > 0.0) {
            return Err(invalid("prediction.timeSeconds", "must be positive"));
        }
        if !(p.speed_threshold >= 0.0) {
            return Err(invalid("prediction.speedThreshold", "must be non-negative"));
        }
        if p.history_size == 0 {
            return Err(invalid("prediction.historySize", "must be at least 1"));
        }
        if p.sweep_interval_ticks == 0 {
            return Err(invalid("prediction.sweepIntervalTicks", "must be at least 1"));
        }

        let perf = &self.performance;
        if !(perf.target_metric > 0.0) {
            return Err(invalid("performance.targetMetric", "must be positive"));
        }
        if !(perf.min_metric >= 0.0) || perf.min_metric > perf.target_metric {
            return Err(invalid(
                "performance.minMetric",
                format!("must lie within [0, {}]", perf.target_metric),
            ));
        }
        if perf.sample_interval_ticks == 0 {
            return Err(invalid("performance.sampleIntervalTicks", "must be at least 1"));
        }
        if perf.eviction_proximity_cells < 0 {
            return Err(invalid("performance.evictionProximityCells", "must be non-negative"));
        }

        if !(self.sleep.expansion_multiplier >= 1.0) {
            return Err(invalid("sleep.expansionMultiplier", "must be at least 1.0"));
        }

        let c = &self.cell_loading;
        if c.max_view_distance < 0 {
            return Err(invalid("cellLoading.maxViewDistance", "must be non-negative"));
        }
        if c.max_cells_per_batch == 0 || c.queue_capacity == 0 {
            return Err(invalid("cellLoading", "batch size and queue capacity must be at least 1"));
        }
        Ok(())
    }
}
