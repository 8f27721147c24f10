use glam::DVec3;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::cell::CellCoord;

/// Unique identifier for a tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a world (dimension). Positions in different worlds never
/// share a region.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct WorldId(pub u32);

impl fmt::Display for WorldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "world-{}", self.0)
    }
}

/// A point in a specific world.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub world: WorldId,
    pub coords: DVec3,
}

impl Position {
    pub fn new(world: WorldId, x: f64, y: f64, z: f64) -> Self {
        Self {
            world,
            coords: DVec3::new(x, y, z),
        }
    }

    pub fn x(&self) -> f64 {
        self.coords.x
    }

    pub fn z(&self) -> f64 {
        self.coords.z
    }

    /// Planar (x, z) Euclidean distance. Positions in different worlds are
    /// infinitely far apart.
    pub fn planar_distance(&self, other: &Position) -> f64 {
        if self.world != other.world {
            return f64::INFINITY;
        }
        let dx = self.coords.x - other.coords.x;
        let dz = self.coords.z - other.coords.z;
        dx.hypot(dz)
    }

    /// Same position moved in the (x, z) plane.
    pub fn offset(&self, dx: f64, dz: f64) -> Self {
        Self {
            world: self.world,
            coords: DVec3::new(self.coords.x + dx, self.coords.y, self.coords.z + dz),
        }
    }

    /// Resource cell this position falls into.
    pub fn cell(&self) -> CellCoord {
        CellCoord::from_world(self.coords.x, self.coords.z)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({:.1}, {:.1}, {:.1})",
            self.world, self.coords.x, self.coords.y, self.coords.z
        )
    }
}
