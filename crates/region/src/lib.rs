//! Regions: the store, placement, lifecycle state machine and budgeted
//! resource-cell loading.
//!
//! # Invariants
//! - An entity is an occupant of at most one region; the manager's occupancy
//!   index and the regions' occupant sets always agree.
//! - A region never holds more than `maxPlayersPerRegion` occupants, and
//!   adding to a retired region never exceeds `maxActiveRegions`.
//! - Every active, empty, non-forced region has an unload check pending.
//! - A retired region has no occupants and holds no resource cells.
//! - A region's size is always twice the radius it was last resized to.
//! - Only the tick context mutates loaded-cell sets or calls the cell backend.

mod cells;
mod error;
mod manager;
mod region;
mod schedule;

pub use cells::{CellBackend, CellError, CellLoadQueue, CellLoadStats, CellRequest, InMemoryCells};
pub use error::RegionError;
pub use manager::{Merge, RegionManager, RegionStats};
pub use region::{Region, RegionId, RegionSnapshot, RegionState};
pub use schedule::DelayQueue;

pub fn crate_info() -> &'static str {
    "regionflow-region v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("region"));
    }
}
