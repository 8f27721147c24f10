use parking_lot::Mutex;
use regionflow_common::{CellCoord, WorldId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::region::RegionId;

/// Failure to materialize a resource cell.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CellError {
    #[error("failed to load cell ({cell}) in {world}: {reason}")]
    LoadFailed {
        world: WorldId,
        cell: CellCoord,
        reason: String,
    },
}

/// The store that actually holds resource cells (terrain chunks and the like).
///
/// Only the tick context calls into the backend.
pub trait CellBackend: Send + Sync {
    fn materialize(&self, world: WorldId, cell: CellCoord) -> Result<(), CellError>;
    fn release(&self, world: WorldId, cell: CellCoord);
    /// Hint that a large amount of state was just released.
    fn reclaim_hint(&self) {}
}

/// Reference-counted in-memory backend. A cell stays loaded while any region holds it.
#[derive(Debug, Default)]
pub struct InMemoryCells {
    refs: Mutex<HashMap<(WorldId, CellCoord), usize>>,
    refused: Mutex<HashSet<(WorldId, CellCoord)>>,
    reclaim_hints: AtomicUsize,
}

impl InMemoryCells {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every future load of this cell fail.
    pub fn refuse(&self, world: WorldId, cell: CellCoord) {
        self.refused.lock().insert((world, cell));
    }

    pub fn is_loaded(&self, world: WorldId, cell: CellCoord) -> bool {
        self.refs.lock().contains_key(&(world, cell))
    }

    pub fn ref_count(&self, world: WorldId, cell: CellCoord) -> usize {
        self.refs.lock().get(&(world, cell)).copied().unwrap_or(0)
    }

    /// Number of distinct loaded cells.
    pub fn loaded_count(&self) -> usize {
        self.refs.lock().len()
    }

    pub fn reclaim_hints(&self) -> usize {
        self.reclaim_hints.load(Ordering::Relaxed)
    }
}

impl CellBackend for InMemoryCells {
    fn materialize(&self, world: WorldId, cell: CellCoord) -> Result<(), CellError> {
        if self.refused.lock().contains(&(world, cell)) {
            return Err(CellError::LoadFailed {
                world,
                cell,
                reason: "refused by backend".into(),
            });
        }
        *self.refs.lock().entry((world, cell)).or_insert(0) += 1;
        Ok(())
    }

    fn release(&self, world: WorldId, cell: CellCoord) {
        let mut refs = self.refs.lock();
        if let Some(count) = refs.get_mut(&(world, cell)) {
            *count -= 1;
            if *count == 0 {
                refs.remove(&(world, cell));
            }
        }
    }

    fn reclaim_hint(&self) {
        self.reclaim_hints.fetch_add(1, Ordering::Relaxed);
    }
}

/// A request to materialize one cell on behalf of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRequest {
    pub region: RegionId,
    pub world: WorldId,
    pub cell: CellCoord,
}

/// Bounded FIFO of pending cell loads.
///
/// Producers enqueue from any thread; the tick context drains a bounded batch
/// per cycle. Duplicate requests for the same region and cell are collapsed.
#[derive(Debug)]
pub struct CellLoadQueue {
    capacity: usize,
    queue: VecDeque<CellRequest>,
    pending: HashSet<(RegionId, CellCoord)>,
    dropped: usize,
}

impl CellLoadQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            queue: VecDeque::new(),
            pending: HashSet::new(),
            dropped: 0,
        }
    }

    /// Returns false if the request was a duplicate or the queue is full.
    pub fn enqueue(&mut self, request: CellRequest) -> bool {
        if self.pending.contains(&(request.region, request.cell)) {
            return false;
        }
        if self.queue.len() >= self.capacity {
            self.dropped += 1;
            return false;
        }
        self.pending.insert((request.region, request.cell));
        self.queue.push_back(request);
        true
    }

    /// Take up to `budget` requests from the front.
    pub fn take_batch(&mut self, budget: usize) -> Vec<CellRequest> {
        let n = budget.min(self.queue.len());
        let batch: Vec<CellRequest> = self.queue.drain(..n).collect();
        for r in &batch {
            self.pending.remove(&(r.region, r.cell));
        }
        batch
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Requests rejected because the queue was full.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.pending.clear();
    }
}

/// Outcome of one drained batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CellLoadStats {
    pub loaded: usize,
    pub failed: usize,
    /// Requests whose region vanished, retired, or already held the cell.
    pub skipped: usize,
    pub still_queued: usize,
}
