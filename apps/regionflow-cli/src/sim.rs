use regionflow_common::{EntityId, ManualClock, Position, TICKS_PER_SECOND, WorldId};
use regionflow_kernel::Engine;
use regionflow_perf::TickRateMeter;
use serde::Serialize;
use std::time::Duration;

/// Splitmix64 step: advances `state` and returns the mixed output.
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[derive(Debug, Clone)]
struct Rng(u64);

impl Rng {
    fn next_u64(&mut self) -> u64 {
        splitmix64(&mut self.0)
    }

    /// Uniform in `[0, 1)`.
    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    fn range(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_f64()
    }

    fn chance(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }
}

#[derive(Debug, Clone)]
struct Walker {
    id: EntityId,
    pos: Position,
    heading: f64,
    /// Units per second.
    speed: f64,
    asleep_until: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub entities: usize,
    pub ticks: u64,
    pub seed: u64,
    /// From this tick on, every tick takes twice as long.
    pub slowdown_at: Option<u64>,
    /// Walkers spawn and teleport within `[-spread, spread]` on both axes.
    pub spread: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SimSummary {
    pub ticks: u64,
    pub joined: usize,
    pub unplaced_joins: usize,
    pub region_changes: usize,
    pub forecasts: usize,
    pub teleports: usize,
    pub sleeps: usize,
    pub retired: usize,
    pub merges: usize,
    pub idle_shrinks: usize,
    pub cells_loaded: usize,
    pub emergency_reclaims: usize,
}

const TELEPORT_CHANCE: f64 = 0.0005;
const SLEEP_CHANCE: f64 = 0.001;

/// Drive `engine` with deterministic random walkers. `clock` and `meter` must
/// be the ones the engine was built with.
pub fn run(engine: &Engine, clock: &ManualClock, meter: &TickRateMeter, config: &SimConfig) -> SimSummary {
    let _span = tracing::info_span!("simulate", seed = config.seed).entered();
    let mut rng = Rng(config.seed);
    let mut summary = SimSummary::default();
    let base_tick = Duration::from_millis(1000 / TICKS_PER_SECOND);

    let mut walkers: Vec<Walker> = (0..config.entities)
        .map(|_| {
            let pos = Position::new(
                WorldId(0),
                rng.range(-config.spread, config.spread),
                64.0,
                rng.range(-config.spread, config.spread),
            );
            Walker {
                id: EntityId::new(),
                pos,
                heading: rng.range(-std::f64::consts::PI, std::f64::consts::PI),
                speed: rng.range(4.0, 10.0),
                asleep_until: None,
            }
        })
        .collect();

    for walker in &walkers {
        summary.joined += 1;
        if engine.on_entity_join(walker.id, walker.pos).is_err() {
            summary.unplaced_joins += 1;
        }
    }

    for tick in 1..=config.ticks {
        let slow = config.slowdown_at.is_some_and(|at| tick >= at);
        let dt = if slow { base_tick * 2 } else { base_tick };
        clock.advance(dt);
        meter.record(dt);

        for walker in &mut walkers {
            step_walker(engine, walker, &mut rng, tick, dt, config.spread, &mut summary);
        }

        let report = engine.tick();
        summary.retired += report.retired.len();
        summary.merges += report.merges.len();
        summary.idle_shrinks += report.shrunk.len();
        summary.cells_loaded += report.cell_loads.loaded;
        if report.sample.as_ref().is_some_and(|s| s.crossed_low) {
            summary.emergency_reclaims += 1;
        }
    }
    summary.ticks = config.ticks;
    tracing::info!(
        ticks = summary.ticks,
        region_changes = summary.region_changes,
        merges = summary.merges,
        "simulation complete"
    );
    summary
}

fn step_walker(
    engine: &Engine,
    walker: &mut Walker,
    rng: &mut Rng,
    tick: u64,
    dt: Duration,
    spread: f64,
    summary: &mut SimSummary,
) {
    if let Some(until) = walker.asleep_until {
        if tick >= until {
            walker.asleep_until = None;
            engine.on_entity_sleep_end(walker.id, walker.pos);
        }
        return;
    }
    if rng.chance(TELEPORT_CHANCE) {
        walker.pos = Position::new(
            walker.pos.world,
            rng.range(-spread, spread),
            64.0,
            rng.range(-spread, spread),
        );
        summary.teleports += 1;
        let _ = engine.on_entity_teleport(walker.id, walker.pos);
        return;
    }
    if rng.chance(SLEEP_CHANCE) {
        walker.asleep_until = Some(tick + 100 + rng.next_u64() % 300);
        summary.sleeps += 1;
        engine.on_entity_sleep_start(walker.id);
        return;
    }

    walker.heading += rng.range(-0.15, 0.15);
    let reach = walker.speed * dt.as_secs_f64();
    walker.pos = walker
        .pos
        .offset(reach * walker.heading.cos(), reach * walker.heading.sin());
    let outcome = engine.on_entity_move(walker.id, walker.pos);
    if outcome.reassigned {
        summary.region_changes += 1;
    }
    if outcome.prediction.is_some() {
        summary.forecasts += 1;
    }
}
