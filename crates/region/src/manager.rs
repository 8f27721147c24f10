use parking_lot::{Mutex, RwLock};
use regionflow_common::{CellCoord, CellLoadingConfig, Clock, EntityId, Position, RegionConfig};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::cells::{CellBackend, CellLoadQueue, CellLoadStats, CellRequest};
use crate::error::RegionError;
use crate::region::{Region, RegionId, RegionSnapshot, RegionState};
use crate::schedule::DelayQueue;

/// Region store plus the entity-to-region index. Both are only touched under
/// the manager's write guard, which keeps them consistent with each other.
#[derive(Debug, Default)]
struct RegionStore {
    regions: BTreeMap<RegionId, Region>,
    occupancy: HashMap<EntityId, RegionId>,
    /// Last reported position of every occupant.
    positions: HashMap<EntityId, Position>,
}

impl RegionStore {
    fn active_count(&self) -> usize {
        self.regions.values().filter(|r| r.is_active()).count()
    }

    /// Nearest active, accepting region in `pos`'s world. Ties go to the
    /// lowest id because the store iterates in id order and only a strictly
    /// smaller distance replaces the current best.
    fn nearest(&self, pos: &Position, require_contains: bool) -> Option<RegionId> {
        let mut best: Option<(RegionId, f64)> = None;
        for region in self.regions.values() {
            if !region.can_accept_occupants() || region.world() != pos.world {
                continue;
            }
            if require_contains && !region.contains(pos) {
                continue;
            }
            let d = region.distance_to_center(pos);
            if best.is_none_or(|(_, bd)| d < bd) {
                best = Some((region.id(), d));
            }
        }
        best.map(|(id, _)| id)
    }

    fn too_close(&self, candidate: &Position, min_distance: f64) -> bool {
        self.regions
            .values()
            .any(|r| r.is_active() && r.center().planar_distance(candidate) < min_distance)
    }

    fn merge_eligible(&self, a: RegionId, b: RegionId, max_distance: f64, max_occupants: usize) -> bool {
        let (Some(ra), Some(rb)) = (self.regions.get(&a), self.regions.get(&b)) else {
            return false;
        };
        ra.is_active()
            && rb.is_active()
            && !rb.is_forced()
            && ra.world() == rb.world()
            && ra.center().planar_distance(&rb.center()) <= max_distance
            && ra.occupant_count() + rb.occupant_count() <= max_occupants
    }

    /// Radius `a` needs to keep its own area and contain every occupant of
    /// `b`. Occupants without a known position count at `b`'s center.
    fn merged_radius(&self, a: RegionId, b: RegionId) -> Option<u32> {
        let (ra, rb) = (self.regions.get(&a)?, self.regions.get(&b)?);
        let reach = rb
            .occupants()
            .iter()
            .map(|e| self.positions.get(e).copied().unwrap_or(rb.center()))
            .map(|p| ra.extent_to(&p))
            .fold(0.0_f64, f64::max);
        Some(ra.radius().max(reach.ceil() as u32))
    }
}

/// Bookkeeping from an add, applied once the store guard is released.
struct Added {
    emptied: Option<(RegionId, Duration)>,
    requests: Vec<CellRequest>,
}

/// Aggregate counters for the query surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionStats {
    pub total_regions: usize,
    pub active_regions: usize,
    pub forced_regions: usize,
    pub total_occupants: usize,
    pub max_active_regions: usize,
    pub loaded_cells: usize,
    pub per_region_occupancy: BTreeMap<RegionId, usize>,
}

/// A completed merge: `absorbed` was folded into `into`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Merge {
    pub into: RegionId,
    pub absorbed: RegionId,
    pub moved_occupants: usize,
}

/// Owns every region, the occupancy index, the delayed unload checks and the
/// cell-load queue.
///
/// All methods take `&self`; lookups share a read guard and mutations take a
/// single write guard, so each operation (merges included) is atomic with
/// respect to concurrent callers. Methods documented as tick-context work
/// (`run_unload_checks`, `drain_cell_loads`, `optimize`, `cleanup`, ...) are
/// the only ones that call into the [`CellBackend`].
pub struct RegionManager {
    config: RegionConfig,
    cell_config: CellLoadingConfig,
    clock: Arc<dyn Clock>,
    cells: Arc<dyn CellBackend>,
    store: RwLock<RegionStore>,
    next_id: AtomicU64,
    unload_checks: Mutex<DelayQueue<RegionId>>,
    cell_queue: Mutex<CellLoadQueue>,
}

impl RegionManager {
    pub fn new(
        config: RegionConfig,
        cell_config: CellLoadingConfig,
        clock: Arc<dyn Clock>,
        cells: Arc<dyn CellBackend>,
    ) -> Self {
        let cell_queue = CellLoadQueue::new(cell_config.queue_capacity);
        tracing::info!(
            size = config.size,
            max_active = config.max_active_regions,
            "region manager initialized"
        );
        Self {
            config,
            cell_config,
            clock,
            cells,
            store: RwLock::new(RegionStore::default()),
            next_id: AtomicU64::new(0),
            unload_checks: Mutex::new(DelayQueue::new()),
            cell_queue: Mutex::new(cell_queue),
        }
    }

    pub fn config(&self) -> &RegionConfig {
        &self.config
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    // --- Placement ---

    /// Find or create a region for `pos` and move `entity` into it, all under
    /// one write guard.
    pub fn place(&self, entity: EntityId, pos: &Position) -> Result<RegionId, RegionError> {
        let now = self.clock.now();
        let (region, added) = {
            let mut store = self.store.write();
            let region = match store.nearest(pos, true) {
                Some(id) => id,
                None => self.create_locked(&mut store, pos, false)?,
            };
            (region, self.add_locked(&mut store, entity, region, pos, now)?)
        };
        self.finish_add(added);
        tracing::debug!(%entity, %region, "occupant placed");
        Ok(region)
    }

    /// An accepting region containing `pos` (nearest center wins), or a new one.
    pub fn find_or_create(&self, pos: &Position) -> Result<RegionId, RegionError> {
        let mut store = self.store.write();
        if let Some(id) = store.nearest(pos, true) {
            return Ok(id);
        }
        self.create_locked(&mut store, pos, false)
    }

    /// Nearest active, accepting region in the same world, regardless of containment.
    pub fn find_nearest(&self, pos: &Position) -> Option<RegionId> {
        self.store.read().nearest(pos, false)
    }

    /// Place a new region for `pos`. Fails once the active-region cap is reached.
    pub fn create_new(&self, pos: &Position) -> Result<RegionId, RegionError> {
        let mut store = self.store.write();
        self.create_locked(&mut store, pos, false)
    }

    /// Create a region exempt from automatic retirement.
    pub fn force_create_region(&self, pos: &Position) -> Result<RegionId, RegionError> {
        let mut store = self.store.write();
        self.create_locked(&mut store, pos, true)
    }

    /// Grid-aligned center for `pos`: the middle of the `size`-pitched grid
    /// square containing it.
    pub fn grid_center(&self, pos: &Position) -> Position {
        let size = i64::from(self.config.size);
        let snap = |v: f64| ((v.floor() as i64).div_euclid(size) * size + size / 2) as f64;
        Position::new(pos.world, snap(pos.x()), pos.coords.y, snap(pos.z()))
    }

    fn placement_center(&self, store: &RegionStore, pos: &Position) -> Position {
        let min = f64::from(self.config.min_distance_between_regions);
        let candidate = self.grid_center(pos);
        if !store.too_close(&candidate, min) {
            return candidate;
        }
        let shifted = candidate.offset(min, min);
        if store.too_close(&shifted, min) {
            tracing::debug!(%shifted, "offset placement still near an existing region");
        }
        shifted
    }

    fn create_locked(
        &self,
        store: &mut RegionStore,
        pos: &Position,
        forced: bool,
    ) -> Result<RegionId, RegionError> {
        let limit = self.config.max_active_regions;
        if store.active_count() >= limit {
            tracing::warn!(limit, "active region limit reached");
            return Err(RegionError::CapacityExceeded { limit });
        }
        let center = self.placement_center(store, pos);
        let id = RegionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let mut region = Region::new(
            id,
            center,
            self.config.size,
            self.config.max_players_per_region,
            self.config.unload_delay(),
            self.clock.now(),
        );
        region.set_forced(forced);
        let delay = region.unload_delay();
        store.regions.insert(id, region);
        if !forced {
            // Retired unless someone joins before the check fires.
            self.schedule_unload_check(id, self.clock.now() + delay);
        }
        tracing::info!(%id, %center, forced, "region created");
        Ok(id)
    }

    // --- Occupants ---

    /// Put `entity` into `region`, leaving its previous region if any, and
    /// queue resource cells around `pos`. Rejected when the region is full,
    /// or retired while the active-region cap is reached.
    pub fn add_occupant(
        &self,
        entity: EntityId,
        region: RegionId,
        pos: &Position,
    ) -> Result<(), RegionError> {
        let now = self.clock.now();
        let added = {
            let mut store = self.store.write();
            self.add_locked(&mut store, entity, region, pos, now)?
        };
        self.finish_add(added);
        tracing::debug!(%entity, %region, "occupant added");
        Ok(())
    }

    fn add_locked(
        &self,
        store: &mut RegionStore,
        entity: EntityId,
        region: RegionId,
        pos: &Position,
        now: Duration,
    ) -> Result<Added, RegionError> {
        let target = store
            .regions
            .get(&region)
            .ok_or(RegionError::UnknownRegion(region))?;
        if !target.has_occupant(entity) {
            if !target.is_active() {
                let limit = self.config.max_active_regions;
                if store.active_count() >= limit {
                    return Err(RegionError::CapacityExceeded { limit });
                }
            } else if !target.can_accept_occupants() {
                return Err(RegionError::Full {
                    region,
                    limit: target.max_occupants(),
                });
            }
        }

        let mut emptied = None;
        if let Some(prev) = store.occupancy.insert(entity, region) {
            if prev != region {
                if let Some(old) = store.regions.get_mut(&prev) {
                    old.remove_occupant(entity, now);
                    if old.occupant_count() == 0 {
                        emptied = Some((prev, old.unload_delay()));
                    }
                }
            }
        }
        store.positions.insert(entity, *pos);
        let Some(target) = store.regions.get_mut(&region) else {
            return Err(RegionError::UnknownRegion(region));
        };
        target.add_occupant(entity, now);
        let world = target.world();
        let requests = target
            .missing_cells(pos.cell(), self.cell_config.max_view_distance)
            .into_iter()
            .map(|cell| CellRequest { region, world, cell })
            .collect();
        Ok(Added { emptied, requests })
    }

    fn finish_add(&self, added: Added) {
        if let Some((prev, delay)) = added.emptied {
            self.schedule_unload_check(prev, self.clock.now() + delay);
        }
        self.enqueue_cells(added.requests);
    }

    /// Record where an occupant is now. Ignored for entities without a region.
    pub fn update_position(&self, entity: EntityId, pos: &Position) {
        let mut store = self.store.write();
        if store.occupancy.contains_key(&entity) {
            store.positions.insert(entity, *pos);
        }
    }

    /// Remove `entity` from whatever region holds it. Absent entities are a no-op.
    pub fn remove_occupant(&self, entity: EntityId) -> Option<RegionId> {
        let now = self.clock.now();
        let (region, emptied) = {
            let mut store = self.store.write();
            let region = store.occupancy.remove(&entity)?;
            store.positions.remove(&entity);
            let mut emptied = None;
            if let Some(r) = store.regions.get_mut(&region) {
                r.remove_occupant(entity, now);
                if r.occupant_count() == 0 {
                    emptied = Some(r.unload_delay());
                }
            }
            (region, emptied)
        };
        if let Some(delay) = emptied {
            self.schedule_unload_check(region, now + delay);
        }
        tracing::debug!(%entity, %region, "occupant removed");
        Some(region)
    }

    pub fn region_of(&self, entity: EntityId) -> Option<RegionId> {
        self.store.read().occupancy.get(&entity).copied()
    }

    fn schedule_unload_check(&self, region: RegionId, due: Duration) {
        tracing::debug!(%region, ?due, "unload check scheduled");
        self.unload_checks.lock().schedule(due, region);
    }

    fn enqueue_cells(&self, requests: Vec<CellRequest>) {
        if requests.is_empty() {
            return;
        }
        let mut queue = self.cell_queue.lock();
        let mut rejected = 0usize;
        for request in requests {
            if !queue.enqueue(request) {
                rejected += 1;
            }
        }
        if rejected > 0 {
            tracing::debug!(rejected, queued = queue.len(), "cell requests not queued");
        }
    }

    // --- Resizing ---

    /// Set a region's half-extent, clamped to `[minSize / 2, maxSize / 2]`.
    /// Returns the radius actually applied.
    pub fn resize_region(&self, id: RegionId, radius: u32) -> Result<u32, RegionError> {
        let radius = radius.clamp(self.config.min_radius(), self.config.max_radius());
        let now = self.clock.now();
        let mut store = self.store.write();
        let region = store
            .regions
            .get_mut(&id)
            .ok_or(RegionError::UnknownRegion(id))?;
        if !region.resize(radius, now) {
            return Err(RegionError::Retired(id));
        }
        tracing::debug!(%id, radius, "region resized");
        Ok(radius)
    }

    /// Read a region in place.
    pub fn with_region<R>(&self, id: RegionId, f: impl FnOnce(&Region) -> R) -> Option<R> {
        self.store.read().regions.get(&id).map(f)
    }

    // --- Tick-context work ---

    /// Fire every due unload check. A check retires the region only if it is
    /// still active, empty and not forced; otherwise it is a stale no-op.
    pub fn run_unload_checks(&self) -> Vec<RegionId> {
        let now = self.clock.now();
        let due = self.unload_checks.lock().pop_due(now);
        if due.is_empty() {
            return Vec::new();
        }
        let mut retired = Vec::new();
        let mut store = self.store.write();
        for id in due {
            let Some(region) = store.regions.get_mut(&id) else {
                tracing::trace!(%id, "unload check for removed region skipped");
                continue;
            };
            if !region.is_active() || region.is_forced() || region.occupant_count() > 0 {
                tracing::trace!(%id, state = ?region.state(), "stale unload check skipped");
                continue;
            }
            if let Some(cells) = region.retire(now) {
                let world = region.world();
                for cell in &cells {
                    self.cells.release(world, *cell);
                }
                tracing::info!(%id, released = cells.len(), "region retired (no occupants)");
                retired.push(id);
            }
        }
        retired
    }

    /// Materialize up to one batch of queued cells.
    pub fn drain_cell_loads(&self) -> CellLoadStats {
        let batch = self
            .cell_queue
            .lock()
            .take_batch(self.cell_config.max_cells_per_batch);
        let mut stats = CellLoadStats::default();
        for request in batch {
            let wanted = self
                .with_region(request.region, |r| {
                    r.is_active() && !r.is_cell_loaded(request.cell)
                })
                .unwrap_or(false);
            if !wanted {
                stats.skipped += 1;
                continue;
            }
            if let Err(err) = self.cells.materialize(request.world, request.cell) {
                tracing::warn!(region = %request.region, %err, "resource cell load failed");
                stats.failed += 1;
                continue;
            }
            let kept = self
                .store
                .write()
                .regions
                .get_mut(&request.region)
                .is_some_and(|r| r.is_active() && r.mark_cell_loaded(request.cell));
            if kept {
                tracing::trace!(region = %request.region, cell = %request.cell, "cell loaded");
                stats.loaded += 1;
            } else {
                self.cells.release(request.world, request.cell);
                stats.skipped += 1;
            }
        }
        stats.still_queued = self.cell_queue.lock().len();
        stats
    }

    /// Merge pass. Pairs are visited in id order against live state, all
    /// under one write guard: `absorbed`'s occupants move into `into`, the
    /// index is rewritten, and `absorbed` leaves the store. `into` grows to
    /// contain every moved occupant; pairs that would need more than
    /// `maxSize / 2` are left alone.
    pub fn optimize(&self) -> Vec<Merge> {
        let _span = tracing::info_span!("region_optimize").entered();
        let started = Instant::now();
        let now = self.clock.now();
        let max_distance = f64::from(self.config.size);
        let max_occupants = self.config.max_players_per_region;
        let max_radius = self.config.max_radius();

        let mut store = self.store.write();
        let ids: Vec<RegionId> = store.regions.keys().copied().collect();
        let mut merges = Vec::new();
        for (i, &a) in ids.iter().enumerate() {
            for &b in &ids[i + 1..] {
                if !store.regions.contains_key(&a) {
                    break;
                }
                if !store.merge_eligible(a, b, max_distance, max_occupants) {
                    continue;
                }
                let Some(radius) = store.merged_radius(a, b).filter(|r| *r <= max_radius) else {
                    continue;
                };
                let Some(source) = store.regions.remove(&b) else {
                    continue;
                };
                let moved: Vec<EntityId> = source.occupants().iter().copied().collect();
                let world = source.world();
                let Some(target) = store.regions.get_mut(&a) else {
                    continue;
                };
                for cell in target.absorb(source, now) {
                    self.cells.release(world, cell);
                }
                if radius > target.radius() {
                    target.resize(radius, now);
                }
                for entity in &moved {
                    store.occupancy.insert(*entity, a);
                }
                tracing::info!(into = %a, absorbed = %b, moved = moved.len(), radius, "regions merged");
                merges.push(Merge {
                    into: a,
                    absorbed: b,
                    moved_occupants: moved.len(),
                });
            }
        }
        tracing::trace!(merges = merges.len(), elapsed = ?started.elapsed(), "optimize complete");
        merges
    }

    /// Drop retired, empty, non-forced regions idle for longer than the TTL.
    pub fn cleanup(&self) -> Vec<RegionId> {
        let now = self.clock.now();
        let ttl = self.config.cleanup_ttl();
        let mut store = self.store.write();
        let stale: Vec<RegionId> = store
            .regions
            .values()
            .filter(|r| {
                !r.is_active()
                    && !r.is_forced()
                    && r.occupant_count() == 0
                    && now.saturating_sub(r.last_activity()) > ttl
            })
            .map(Region::id)
            .collect();
        for id in &stale {
            store.regions.remove(id);
        }
        if !stale.is_empty() {
            tracing::info!(removed = stale.len(), "inactive regions cleaned up");
        }
        stale
    }

    /// Emergency reclaim: retire every active, empty, non-forced region now,
    /// then hint the backend to reclaim memory.
    pub fn force_retire_empty(&self) -> Vec<RegionId> {
        let now = self.clock.now();
        let mut retired = Vec::new();
        {
            let mut store = self.store.write();
            for region in store.regions.values_mut() {
                if !region.is_active() || region.is_forced() || region.occupant_count() > 0 {
                    continue;
                }
                if let Some(cells) = region.retire(now) {
                    let world = region.world();
                    for cell in &cells {
                        self.cells.release(world, *cell);
                    }
                    tracing::info!(id = %region.id(), "region retired (emergency)");
                    retired.push(region.id());
                }
            }
        }
        self.cells.reclaim_hint();
        retired
    }

    /// Release region-held cells with no online entity within `proximity`
    /// cells (same world). Returns the number of cells released.
    pub fn evict_cells_far_from(&self, online: &[Position], proximity: i32) -> usize {
        let mut store = self.store.write();
        let mut evicted = 0;
        for region in store.regions.values_mut() {
            let world = region.world();
            let nearby: Vec<CellCoord> = online
                .iter()
                .filter(|p| p.world == world)
                .map(Position::cell)
                .collect();
            let released =
                region.release_cells_where(|c| !nearby.iter().any(|o| o.chebyshev(c) <= proximity));
            for cell in &released {
                self.cells.release(world, *cell);
            }
            evicted += released.len();
        }
        if evicted > 0 {
            tracing::debug!(evicted, "unused cells evicted");
        }
        evicted
    }

    // --- Admin surface ---

    /// Retire a region immediately. Rejected while occupants remain.
    pub fn force_unload(&self, id: RegionId) -> Result<(), RegionError> {
        let now = self.clock.now();
        let mut store = self.store.write();
        let region = store
            .regions
            .get_mut(&id)
            .ok_or(RegionError::UnknownRegion(id))?;
        let count = region.occupant_count();
        if count > 0 {
            return Err(RegionError::OccupantsPresent { region: id, count });
        }
        region.set_forced(false);
        if let Some(cells) = region.retire(now) {
            let world = region.world();
            for cell in &cells {
                self.cells.release(world, *cell);
            }
        }
        tracing::info!(%id, "region force-unloaded");
        Ok(())
    }

    /// Set or clear the forced flag. Clearing it on an active, empty region
    /// schedules an unload check.
    pub fn set_forced(&self, id: RegionId, forced: bool) -> Result<(), RegionError> {
        let unload_after = {
            let mut store = self.store.write();
            let region = store
                .regions
                .get_mut(&id)
                .ok_or(RegionError::UnknownRegion(id))?;
            region.set_forced(forced);
            (!forced && region.state() == RegionState::Empty).then_some(region.unload_delay())
        };
        if let Some(delay) = unload_after {
            self.schedule_unload_check(id, self.clock.now() + delay);
        }
        tracing::info!(%id, forced, "region forced flag changed");
        Ok(())
    }

    /// Release everything and empty the store.
    pub fn shutdown(&self) {
        let mut store = self.store.write();
        for region in store.regions.values_mut() {
            let world = region.world();
            for cell in region.release_cells_where(|_| true) {
                self.cells.release(world, cell);
            }
        }
        store.regions.clear();
        store.occupancy.clear();
        store.positions.clear();
        self.unload_checks.lock().clear();
        self.cell_queue.lock().clear();
        tracing::info!("region manager shut down");
    }

    // --- Queries ---

    pub fn region(&self, id: RegionId) -> Option<RegionSnapshot> {
        self.with_region(id, Region::snapshot)
    }

    pub fn entity_region(&self, entity: EntityId) -> Option<RegionSnapshot> {
        let store = self.store.read();
        let id = store.occupancy.get(&entity)?;
        store.regions.get(id).map(Region::snapshot)
    }

    pub fn list_regions(&self) -> Vec<RegionSnapshot> {
        self.store.read().regions.values().map(Region::snapshot).collect()
    }

    pub fn active_region_count(&self) -> usize {
        self.store.read().active_count()
    }

    pub fn region_count(&self) -> usize {
        self.store.read().regions.len()
    }

    pub fn pending_unload_checks(&self) -> usize {
        self.unload_checks.lock().len()
    }

    pub fn queued_cell_loads(&self) -> usize {
        self.cell_queue.lock().len()
    }

    pub fn stats(&self) -> RegionStats {
        let store = self.store.read();
        RegionStats {
            total_regions: store.regions.len(),
            active_regions: store.active_count(),
            forced_regions: store.regions.values().filter(|r| r.is_forced()).count(),
            total_occupants: store.occupancy.len(),
            max_active_regions: self.config.max_active_regions,
            loaded_cells: store.regions.values().map(|r| r.loaded_cells().len()).sum(),
            per_region_occupancy: store
                .regions
                .values()
                .map(|r| (r.id(), r.occupant_count()))
                .collect(),
        }
    }
}
