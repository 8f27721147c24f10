use serde::{Deserialize, Serialize};
use std::fmt;

/// Edge length of a resource cell in world units.
pub const CELL_SIZE: i64 = 16;

/// A 2D resource-cell coordinate (ignoring the Y axis).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellCoord {
    pub x: i32,
    pub z: i32,
}

impl CellCoord {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Cell containing the given world coordinates.
    pub fn from_world(x: f64, z: f64) -> Self {
        let to_cell = |v: f64| (v.floor() as i64).div_euclid(CELL_SIZE) as i32;
        Self {
            x: to_cell(x),
            z: to_cell(z),
        }
    }

    /// Chebyshev distance in cells.
    pub fn chebyshev(&self, other: CellCoord) -> i32 {
        (self.x - other.x).abs().max((self.z - other.z).abs())
    }

    /// All cells within a square radius, ordered from the center outward
    /// (by Chebyshev ring, then row-major).
    pub fn square_around(&self, radius: i32) -> Vec<CellCoord> {
        let radius = radius.max(0);
        let mut cells = Vec::with_capacity(((2 * radius + 1) * (2 * radius + 1)) as usize);
        for dx in -radius..=radius {
            for dz in -radius..=radius {
                cells.push(CellCoord::new(self.x + dx, self.z + dz));
            }
        }
        cells.sort_by_key(|c| c.chebyshev(*self));
        cells
    }
}

impl fmt::Display for CellCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.z)
    }
}
