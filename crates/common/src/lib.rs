//! Shared vocabulary for the region engine: entity and world ids, positions,
//! resource-cell coordinates, clocks and configuration.
//!
//! # Invariants
//! - A position belongs to exactly one world; cross-world distances are infinite.
//! - A validated [`EngineConfig`] always has even, positive region sizes with
//!   `minSize <= size <= maxSize`.

pub mod cell;
pub mod clock;
pub mod config;
pub mod types;

pub use cell::{CELL_SIZE, CellCoord};
pub use clock::{Clock, ManualClock, SystemClock, TICKS_PER_SECOND, ticks_to_duration};
pub use config::{
    CellLoadingConfig, ConfigError, EngineConfig, PerformanceConfig, PredictionConfig,
    RegionConfig, SleepConfig,
};
pub use types::{EntityId, Position, WorldId};

pub fn crate_info() -> &'static str {
    "regionflow-common v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("common"));
    }
}
