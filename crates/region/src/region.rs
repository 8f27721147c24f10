use regionflow_common::{CellCoord, EntityId, Position, WorldId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::time::Duration;

/// Stable handle of a region in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionId(pub u64);

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "region_{}", self.0)
    }
}

/// Lifecycle state derived from the occupant count and the active flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegionState {
    /// Active with at least one occupant.
    Occupied,
    /// Active, no occupants, retirement check pending.
    Empty,
    /// Inactive; holds no occupants and no resource cells.
    Retired,
}

/// A square area of the world with its occupants and materialized resource cells.
///
/// The region stores occupant ids only. The entity-to-region index lives in
/// the manager.
#[derive(Debug, Clone)]
pub struct Region {
    id: RegionId,
    center: Position,
    size: u32,
    occupants: HashSet<EntityId>,
    loaded_cells: BTreeSet<CellCoord>,
    created_at: Duration,
    last_activity: Duration,
    active: bool,
    forced: bool,
    unload_delay: Duration,
    max_occupants: usize,
}

impl Region {
    pub fn new(
        id: RegionId,
        center: Position,
        size: u32,
        max_occupants: usize,
        unload_delay: Duration,
        now: Duration,
    ) -> Self {
        debug_assert!(size > 0 && size % 2 == 0, "region size must be positive and even");
        Self {
            id,
            center,
            size,
            occupants: HashSet::new(),
            loaded_cells: BTreeSet::new(),
            created_at: now,
            last_activity: now,
            active: true,
            forced: false,
            unload_delay,
            max_occupants,
        }
    }

    pub fn id(&self) -> RegionId {
        self.id
    }

    pub fn center(&self) -> Position {
        self.center
    }

    pub fn world(&self) -> WorldId {
        self.center.world
    }

    /// Edge length of the square.
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn radius(&self) -> u32 {
        self.size / 2
    }

    pub fn occupants(&self) -> &HashSet<EntityId> {
        &self.occupants
    }

    pub fn occupant_count(&self) -> usize {
        self.occupants.len()
    }

    pub fn has_occupant(&self, entity: EntityId) -> bool {
        self.occupants.contains(&entity)
    }

    pub fn loaded_cells(&self) -> &BTreeSet<CellCoord> {
        &self.loaded_cells
    }

    pub fn is_cell_loaded(&self, cell: CellCoord) -> bool {
        self.loaded_cells.contains(&cell)
    }

    pub fn created_at(&self) -> Duration {
        self.created_at
    }

    pub fn last_activity(&self) -> Duration {
        self.last_activity
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_forced(&self) -> bool {
        self.forced
    }

    pub fn set_forced(&mut self, forced: bool) {
        self.forced = forced;
    }

    pub fn unload_delay(&self) -> Duration {
        self.unload_delay
    }

    pub fn state(&self) -> RegionState {
        match (self.active, self.occupants.is_empty()) {
            (false, _) => RegionState::Retired,
            (true, true) => RegionState::Empty,
            (true, false) => RegionState::Occupied,
        }
    }

    /// Chebyshev containment: same world and `max(|dx|, |dz|) <= size / 2`.
    pub fn contains(&self, pos: &Position) -> bool {
        self.extent_to(pos) <= f64::from(self.radius())
    }

    /// Smallest radius that would contain `pos`: `max(|dx|, |dz|)` from the
    /// center, infinite for another world.
    pub fn extent_to(&self, pos: &Position) -> f64 {
        if pos.world != self.center.world {
            return f64::INFINITY;
        }
        let dx = (pos.x() - self.center.x()).abs();
        let dz = (pos.z() - self.center.z()).abs();
        dx.max(dz)
    }

    /// Planar distance from the center; infinite for another world.
    pub fn distance_to_center(&self, pos: &Position) -> f64 {
        self.center.planar_distance(pos)
    }

    pub fn max_occupants(&self) -> usize {
        self.max_occupants
    }

    pub fn can_accept_occupants(&self) -> bool {
        self.active && self.occupants.len() < self.max_occupants
    }

    /// Add an occupant, reactivating a retired region. Returns false if the
    /// entity was already present or the region is full.
    pub fn add_occupant(&mut self, entity: EntityId, now: Duration) -> bool {
        if self.occupants.len() >= self.max_occupants || !self.occupants.insert(entity) {
            return false;
        }
        self.active = true;
        self.last_activity = now;
        true
    }

    /// Remove an occupant. Returns false if the entity was not present.
    pub fn remove_occupant(&mut self, entity: EntityId, now: Duration) -> bool {
        if !self.occupants.remove(&entity) {
            return false;
        }
        self.last_activity = now;
        true
    }

    /// Set the half-extent. Only active regions can be resized.
    pub fn resize(&mut self, radius: u32, now: Duration) -> bool {
        if !self.active || radius == 0 {
            return false;
        }
        self.size = radius * 2;
        self.last_activity = now;
        true
    }

    /// Deactivate an empty region and hand back every cell it held.
    /// Returns `None` while occupants remain.
    pub fn retire(&mut self, now: Duration) -> Option<Vec<CellCoord>> {
        if !self.occupants.is_empty() {
            return None;
        }
        self.active = false;
        self.last_activity = now;
        Some(std::mem::take(&mut self.loaded_cells).into_iter().collect())
    }

    /// Cells within `radius` of `around` that are not loaded yet, nearest first.
    pub fn missing_cells(&self, around: CellCoord, radius: i32) -> Vec<CellCoord> {
        around
            .square_around(radius)
            .into_iter()
            .filter(|c| !self.loaded_cells.contains(c))
            .collect()
    }

    pub fn mark_cell_loaded(&mut self, cell: CellCoord) -> bool {
        self.loaded_cells.insert(cell)
    }

    /// Drop every loaded cell matching `evict` and return them.
    pub fn release_cells_where(&mut self, mut evict: impl FnMut(CellCoord) -> bool) -> Vec<CellCoord> {
        let released: Vec<CellCoord> = self
            .loaded_cells
            .iter()
            .copied()
            .filter(|c| evict(*c))
            .collect();
        for c in &released {
            self.loaded_cells.remove(c);
        }
        released
    }

    /// Take over another region's occupants and cells. Returns the cells both
    /// regions held, which now carry one reference too many.
    pub fn absorb(&mut self, other: Region, now: Duration) -> Vec<CellCoord> {
        self.occupants.extend(other.occupants);
        let mut duplicates = Vec::new();
        for cell in other.loaded_cells {
            if !self.loaded_cells.insert(cell) {
                duplicates.push(cell);
            }
        }
        self.active = true;
        self.last_activity = now;
        duplicates
    }

    pub fn snapshot(&self) -> RegionSnapshot {
        let mut occupants: Vec<EntityId> = self.occupants.iter().copied().collect();
        occupants.sort();
        RegionSnapshot {
            id: self.id,
            center: self.center,
            size: self.size,
            state: self.state(),
            occupants,
            loaded_cells: self.loaded_cells.len(),
            active: self.active,
            forced: self.forced,
            created_at: self.created_at,
            last_activity: self.last_activity,
        }
    }
}

/// Read-only copy of a region handed to query callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionSnapshot {
    pub id: RegionId,
    pub center: Position,
    pub size: u32,
    pub state: RegionState,
    pub occupants: Vec<EntityId>,
    pub loaded_cells: usize,
    pub active: bool,
    pub forced: bool,
    pub created_at: Duration,
    pub last_activity: Duration,
}

impl RegionSnapshot {
    pub fn occupant_count(&self) -> usize {
        self.occupants.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: WorldId = WorldId(0);

    fn region_at(x: f64, z: f64, size: u32) -> Region {
        Region::new(
            RegionId(1),
            Position::new(W, x, 64.0, z),
            size,
            2,
            Duration::ZERO,
            Duration::ZERO,
        )
    }

    fn t(secs: u64) -> Duration {
        Duration::from_secs(secs)
    }

    #[test]
    fn contains_is_chebyshev_square() {
        let r = region_at(0.0, 0.0, 512);
        assert!(r.contains(&Position::new(W, 256.0, 0.0, 256.0)));
        assert!(r.contains(&Position::new(W, -256.0, 0.0, 200.0)));
        assert!(!r.contains(&Position::new(W, 256.5, 0.0, 0.0)));
        // (250, 250) is outside a 256 circle but inside the square.
        assert!(r.contains(&Position::new(W, 250.0, 0.0, 250.0)));
    }

    #[test]
    fn contains_rejects_other_world() {
        let r = region_at(0.0, 0.0, 512);
        assert!(!r.contains(&Position::new(WorldId(1), 0.0, 0.0, 0.0)));
    }

    #[test]
    fn contains_matches_definition_on_a_sweep() {
        let r = region_at(100.0, -40.0, 64);
        for x in (-20..=220).step_by(7) {
            for z in (-160..=80).step_by(11) {
                let p = Position::new(W, x as f64, 0.0, z as f64);
                let expected = (p.x() - 100.0).abs().max((p.z() + 40.0).abs()) <= 32.0;
                assert_eq!(r.contains(&p), expected, "at {p}");
            }
        }
    }

    #[test]
    fn state_follows_occupants() {
        let mut r = region_at(0.0, 0.0, 512);
        let e = EntityId::new();
        assert_eq!(r.state(), RegionState::Empty);
        assert!(r.add_occupant(e, t(1)));
        assert!(!r.add_occupant(e, t(2)));
        assert_eq!(r.state(), RegionState::Occupied);
        assert_eq!(r.last_activity(), t(1));
        assert!(r.retire(t(3)).is_none(), "occupied regions cannot retire");
        assert!(r.remove_occupant(e, t(4)));
        assert!(!r.remove_occupant(e, t(5)));
        assert_eq!(r.state(), RegionState::Empty);
        assert!(r.retire(t(6)).is_some());
        assert_eq!(r.state(), RegionState::Retired);
        assert!(r.add_occupant(e, t(7)));
        assert_eq!(r.state(), RegionState::Occupied);
    }

    #[test]
    fn capacity_limits_acceptance() {
        let mut r = region_at(0.0, 0.0, 512);
        assert!(r.can_accept_occupants());
        r.add_occupant(EntityId::new(), t(0));
        r.add_occupant(EntityId::new(), t(0));
        assert!(!r.can_accept_occupants());
        assert!(!r.add_occupant(EntityId::new(), t(1)), "full regions refuse");
        assert_eq!(r.occupant_count(), 2);
    }

    #[test]
    fn extent_is_radius_needed_to_contain() {
        let r = region_at(100.0, 100.0, 64);
        let p = Position::new(W, 140.0, 0.0, 90.0);
        assert_eq!(r.extent_to(&p), 40.0);
        assert!(!r.contains(&p));
        assert!(r.extent_to(&Position::new(WorldId(1), 100.0, 0.0, 100.0)).is_infinite());
    }

    #[test]
    fn resize_sets_size_to_twice_radius() {
        let mut r = region_at(0.0, 0.0, 512);
        assert!(r.resize(300, t(9)));
        assert_eq!(r.size(), 600);
        assert_eq!(r.last_activity(), t(9));
        r.retire(t(10));
        assert!(!r.resize(100, t(11)));
        assert_eq!(r.size(), 600);
    }

    #[test]
    fn retire_releases_all_cells() {
        let mut r = region_at(0.0, 0.0, 512);
        for c in r.missing_cells(CellCoord::new(0, 0), 1) {
            r.mark_cell_loaded(c);
        }
        assert_eq!(r.loaded_cells().len(), 9);
        let released = r.retire(t(1)).unwrap();
        assert_eq!(released.len(), 9);
        assert!(r.loaded_cells().is_empty());
    }

    #[test]
    fn missing_cells_skips_loaded() {
        let mut r = region_at(0.0, 0.0, 512);
        r.mark_cell_loaded(CellCoord::new(0, 0));
        let missing = r.missing_cells(CellCoord::new(0, 0), 1);
        assert_eq!(missing.len(), 8);
        assert!(!missing.contains(&CellCoord::new(0, 0)));
    }

    #[test]
    fn absorb_reports_shared_cells() {
        let mut a = region_at(0.0, 0.0, 512);
        let mut b = Region::new(
            RegionId(2),
            Position::new(W, 10.0, 64.0, 10.0),
            512,
            2,
            Duration::ZERO,
            Duration::ZERO,
        );
        a.mark_cell_loaded(CellCoord::new(0, 0));
        b.mark_cell_loaded(CellCoord::new(0, 0));
        b.mark_cell_loaded(CellCoord::new(1, 0));
        let e = EntityId::new();
        b.add_occupant(e, t(0));

        let dup = a.absorb(b, t(5));
        assert_eq!(dup, vec![CellCoord::new(0, 0)]);
        assert!(a.has_occupant(e));
        assert_eq!(a.loaded_cells().len(), 2);
    }

    #[test]
    fn snapshot_serializes() {
        let r = region_at(0.0, 0.0, 512);
        let json = serde_json::to_string(&r.snapshot()).unwrap();
        assert!(json.contains("\"size\":512"));
        assert!(json.contains("\"state\":\"Empty\""));
    }
}
