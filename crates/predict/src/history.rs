use regionflow_common::Position;
use serde::Serialize;
use std::time::Duration;

/// One qualifying movement observation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MovementSample {
    /// Units per second.
    pub speed: f64,
    /// Heading in radians, `atan2(dz, dx)`.
    pub direction: f64,
    pub timestamp: Duration,
}

/// Mean of angles via summed unit vectors: `atan2(Σ sin θ, Σ cos θ)`.
/// Returns 0 for an empty input.
pub fn circular_mean(angles: impl IntoIterator<Item = f64>) -> f64 {
    let (sin_sum, cos_sum) = angles
        .into_iter()
        .fold((0.0, 0.0), |(s, c), a| (s + a.sin(), c + a.cos()));
    if sin_sum == 0.0 && cos_sum == 0.0 {
        return 0.0;
    }
    sin_sum.atan2(cos_sum)
}

/// Fixed-capacity ring of recent movement samples for one entity.
#[derive(Debug, Clone)]
pub struct MovementHistory {
    samples: Vec<MovementSample>,
    capacity: usize,
    index: usize,
    filled: bool,
    last_update: Duration,
    last_location: Position,
}

impl MovementHistory {
    pub fn new(capacity: usize, location: Position, now: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: vec![MovementSample::default(); capacity],
            capacity,
            index: 0,
            filled: false,
            last_update: now,
            last_location: location,
        }
    }

    /// Append a sample, overwriting the oldest once full.
    pub fn record(&mut self, sample: MovementSample, location: Position) {
        self.samples[self.index] = sample;
        self.index = (self.index + 1) % self.capacity;
        if self.index == 0 {
            self.filled = true;
        }
        self.last_update = sample.timestamp;
        self.last_location = location;
    }

    fn live(&self) -> &[MovementSample] {
        if self.filled {
            &self.samples
        } else {
            &self.samples[..self.index]
        }
    }

    pub fn len(&self) -> usize {
        self.live().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last_update(&self) -> Duration {
        self.last_update
    }

    pub fn last_location(&self) -> Position {
        self.last_location
    }

    pub fn average_speed(&self) -> f64 {
        let live = self.live();
        if live.is_empty() {
            return 0.0;
        }
        live.iter().map(|s| s.speed).sum::<f64>() / live.len() as f64
    }

    pub fn average_direction(&self) -> f64 {
        circular_mean(self.live().iter().map(|s| s.direction))
    }

    pub fn last_sample(&self) -> Option<MovementSample> {
        if self.is_empty() {
            return None;
        }
        Some(self.samples[(self.index + self.capacity - 1) % self.capacity])
    }

    pub fn last_speed(&self) -> f64 {
        self.last_sample().map_or(0.0, |s| s.speed)
    }

    pub fn last_direction(&self) -> f64 {
        self.last_sample().map_or(0.0, |s| s.direction)
    }

    pub fn is_moving(&self, threshold: f64) -> bool {
        self.average_speed() > threshold
    }
}
