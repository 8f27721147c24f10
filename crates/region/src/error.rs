use crate::region::RegionId;

/// Errors surfaced by region operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegionError {
    #[error("active region limit reached ({limit})")]
    CapacityExceeded { limit: usize },
    #[error("{region} still has {count} occupant(s)")]
    OccupantsPresent { region: RegionId, count: usize },
    #[error("{region} is full ({limit} occupants)")]
    Full { region: RegionId, limit: usize },
    #[error("unknown region: {0}")]
    UnknownRegion(RegionId),
    #[error("{0} is retired")]
    Retired(RegionId),
}
