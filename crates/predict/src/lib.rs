//! Movement forecasting: per-entity motion history, circular-mean headings,
//! and region pre-expansion ahead of boundary crossings.
//!
//! # Invariants
//! - A movement history holds at most `historySize` samples, oldest evicted first.
//! - Only moves with elapsed time > 0 and displacement >= the speed threshold
//!   are recorded.
//! - A forecast never reaches further than `prediction.distance` from the
//!   entity's current position.
//! - Expansion never grows a region past `maxSize / 2` radius; idle shrinking
//!   never drops it below `minSize / 2`.

mod history;
mod predictor;

pub use history::{MovementHistory, MovementSample, circular_mean};
pub use predictor::{Activity, MovementPredictor, Prediction, PredictionStats, PreloadAction};

pub fn crate_info() -> &'static str {
    "regionflow-predict v0.1.0"
}
