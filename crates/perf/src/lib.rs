//! Load feedback: metric sources and the loop that reacts to them.
//!
//! # Invariants
//! - Every decision uses the metric clamped to `[0, targetMetric]`.
//! - Emergency reclaim fires once per downward crossing of `minMetric`,
//!   never on consecutive samples that stay below it.
//! - Forced and occupied regions are never retired by the loop.

mod feedback;
mod meter;

pub use feedback::{PerformanceLoop, SampleReport};
pub use meter::{MetricSource, ScriptedMetric, TickRateMeter};

pub fn crate_info() -> &'static str {
    "regionflow-perf v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("perf"));
    }
}
