//! Engine facade: takes entity join/move/teleport/sleep/leave events, runs the
//! tick loop with its periodic passes, and serves the query surface.
//!
//! # Invariants
//! - Every collaborator (clock, cell backend, metric source) is injected at
//!   construction; there is no global engine instance.
//! - A tracked entity is either an occupant of exactly one region or marked
//!   unplaced and retried on its next move and every maintenance pass.
//! - Due unload checks and cell loading run only from [`Engine::tick`].

pub mod engine;
pub mod timer;

#[cfg(test)]
mod scenarios;

pub use engine::{Engine, EngineStats, MoveOutcome, TickReport};
pub use timer::{Periodic, Timers};

pub fn crate_info() -> &'static str {
    "regionflow-kernel v0.1.0"
}
