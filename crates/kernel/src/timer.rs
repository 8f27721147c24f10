/// A pass that runs every `interval` ticks on the tick context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Periodic {
    interval: u64,
}

impl Periodic {
    pub fn every(interval: u64) -> Self {
        Self {
            interval: interval.max(1),
        }
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }

    /// Whether the pass runs on `tick`. Tick 0 never fires.
    pub fn fires_on(&self, tick: u64) -> bool {
        tick != 0 && tick % self.interval == 0
    }
}

/// The engine's periodic passes.
#[derive(Debug, Clone, Copy)]
pub struct Timers {
    pub maintenance: Periodic,
    pub cleanup: Periodic,
    pub sampler: Periodic,
    pub sweep: Periodic,
}
