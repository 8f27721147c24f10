use parking_lot::Mutex;
use regionflow_common::{PerformanceConfig, Position};
use regionflow_region::{RegionId, RegionManager};
use serde::Serialize;
use std::sync::Arc;

use crate::meter::MetricSource;

/// Outcome of one performance sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SampleReport {
    /// Clamped metric used for every decision in this sample.
    pub metric: f64,
    /// The metric dropped below the minimum on this sample.
    pub crossed_low: bool,
    /// The metric climbed back to the minimum on this sample.
    pub recovered: bool,
    /// Regions retired by the emergency reclaim.
    pub retired: Vec<RegionId>,
    pub merged: usize,
    pub evicted: usize,
}

#[derive(Debug)]
struct LoopState {
    last_metric: Option<f64>,
    below_minimum: bool,
}

/// Load feedback: emergency reclaim on a downward crossing of the minimum,
/// merge and cell eviction whenever the metric is under target.
pub struct PerformanceLoop {
    config: PerformanceConfig,
    regions: Arc<RegionManager>,
    source: Arc<dyn MetricSource>,
    state: Mutex<LoopState>,
}

impl PerformanceLoop {
    pub fn new(
        config: PerformanceConfig,
        regions: Arc<RegionManager>,
        source: Arc<dyn MetricSource>,
    ) -> Self {
        Self {
            config,
            regions,
            source,
            state: Mutex::new(LoopState {
                last_metric: None,
                below_minimum: false,
            }),
        }
    }

    pub fn config(&self) -> &PerformanceConfig {
        &self.config
    }

    /// Read the source, clamped to `[0, target]`. Missing or non-finite
    /// readings count as on target.
    fn read_metric(&self) -> f64 {
        let target = self.config.target_metric;
        self.source
            .sample()
            .filter(|m| m.is_finite())
            .unwrap_or(target)
            .clamp(0.0, target)
    }

    /// Take one sample and act on it. `online` holds the positions of every
    /// online entity, used to decide which resource cells are still needed.
    pub fn sample(&self, online: &[Position]) -> SampleReport {
        let metric = self.read_metric();
        let (crossed_low, recovered) = {
            let mut state = self.state.lock();
            let below = metric < self.config.min_metric;
            let edges = (below && !state.below_minimum, !below && state.below_minimum);
            state.below_minimum = below;
            state.last_metric = Some(metric);
            edges
        };

        let mut report = SampleReport {
            metric,
            crossed_low,
            recovered,
            ..SampleReport::default()
        };

        if crossed_low {
            tracing::warn!(
                metric,
                min = self.config.min_metric,
                "load metric dropped below minimum"
            );
            if self.config.force_unload_on_low {
                report.retired = self.regions.force_retire_empty();
                tracing::warn!(retired = report.retired.len(), "emergency reclaim complete");
            }
        }
        if recovered {
            tracing::info!(metric, "load metric recovered");
        }

        if metric < self.config.target_metric {
            report.merged = self.regions.optimize().len();
            report.evicted = self
                .regions
                .evict_cells_far_from(online, self.config.eviction_proximity_cells);
        }
        report
    }

    /// Periodic cleanup of long-retired regions, independent of the metric.
    pub fn cleanup(&self) -> Vec<RegionId> {
        self.regions.cleanup()
    }

    pub fn last_metric(&self) -> Option<f64> {
        self.state.lock().last_metric
    }

    pub fn is_below_minimum(&self) -> bool {
        self.state.lock().below_minimum
    }
}
