use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

/// A source of the global load metric (ticks per second or an analog).
pub trait MetricSource: Send + Sync {
    /// Current value, or `None` when no reading is available.
    fn sample(&self) -> Option<f64>;
}

#[derive(Debug)]
struct TickRing {
    history: Vec<Duration>,
    capacity: usize,
    index: usize,
    filled: bool,
}

impl TickRing {
    fn live(&self) -> &[Duration] {
        let count = if self.filled { self.capacity } else { self.index };
        &self.history[..count]
    }
}

/// Windowed tick-rate meter. The tick context records each tick's duration;
/// the metric is the rate implied by the mean of the window.
#[derive(Debug)]
pub struct TickRateMeter {
    ring: Mutex<TickRing>,
}

impl TickRateMeter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: Mutex::new(TickRing {
                history: vec![Duration::ZERO; capacity],
                capacity,
                index: 0,
                filled: false,
            }),
        }
    }

    pub fn record(&self, dt: Duration) {
        let mut ring = self.ring.lock();
        let i = ring.index;
        ring.history[i] = dt;
        ring.index = (i + 1) % ring.capacity;
        if ring.index == 0 {
            ring.filled = true;
        }
    }

    pub fn average(&self) -> Duration {
        let ring = self.ring.lock();
        let live = ring.live();
        if live.is_empty() {
            return Duration::ZERO;
        }
        live.iter().sum::<Duration>() / live.len() as u32
    }

    pub fn max(&self) -> Duration {
        self.ring.lock().live().iter().copied().max().unwrap_or(Duration::ZERO)
    }

    pub fn len(&self) -> usize {
        self.ring.lock().live().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MetricSource for TickRateMeter {
    fn sample(&self) -> Option<f64> {
        let mean = self.average();
        if mean.is_zero() {
            return None;
        }
        Some(1.0 / mean.as_secs_f64())
    }
}

/// Replays a fixed sequence of readings, then repeats the last one.
/// Drives simulations and feedback-loop tests.
#[derive(Debug, Default)]
pub struct ScriptedMetric {
    queue: Mutex<VecDeque<f64>>,
    last: Mutex<Option<f64>>,
}

impl ScriptedMetric {
    pub fn new(readings: impl IntoIterator<Item = f64>) -> Self {
        Self {
            queue: Mutex::new(readings.into_iter().collect()),
            last: Mutex::new(None),
        }
    }

    pub fn push(&self, reading: f64) {
        self.queue.lock().push_back(reading);
    }
}

impl MetricSource for ScriptedMetric {
    fn sample(&self) -> Option<f64> {
        let mut last = self.last.lock();
        if let Some(next) = self.queue.lock().pop_front() {
            *last = Some(next);
        }
        *last
    }
}
