mod sim;

use anyhow::Context;
use clap::{Parser, Subcommand};
use regionflow_common::{EngineConfig, ManualClock};
use regionflow_kernel::Engine;
use regionflow_perf::TickRateMeter;
use regionflow_region::InMemoryCells;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "regionflow-cli", about = "CLI for the region engine")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and crate info
    Info,
    /// Print the effective configuration as YAML
    Config {
        /// YAML file to load; defaults are used when omitted
        #[arg(short, long)]
        path: Option<PathBuf>,
    },
    /// Run a deterministic walker simulation and print the final stats as JSON
    Simulate {
        /// Number of walking entities
        #[arg(short, long, default_value = "50")]
        entities: usize,
        /// Number of ticks to simulate
        #[arg(short, long, default_value = "1200")]
        ticks: u64,
        /// RNG seed for the walkers
        #[arg(short, long, default_value = "42")]
        seed: u64,
        /// YAML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Tick from which every tick takes twice as long
        #[arg(long)]
        slowdown_at: Option<u64>,
        /// Half-width of the spawn area
        #[arg(long, default_value = "2048")]
        spread: f64,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match cli.command {
        Commands::Info => {
            println!("regionflow-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("common: {}", regionflow_common::crate_info());
            println!("region: {}", regionflow_region::crate_info());
            println!("predict: {}", regionflow_predict::crate_info());
            println!("perf: {}", regionflow_perf::crate_info());
            println!("kernel: {}", regionflow_kernel::crate_info());
        }
        Commands::Config { path } => {
            let config = load_config(path.as_ref())?;
            print!("{}", config.to_yaml_string()?);
        }
        Commands::Simulate {
            entities,
            ticks,
            seed,
            config,
            slowdown_at,
            spread,
        } => {
            let config = load_config(config.as_ref())?;
            let window = config.performance.sample_interval_ticks as usize;
            let clock = Arc::new(ManualClock::new());
            let meter = Arc::new(TickRateMeter::new(window));
            let engine = Engine::new(
                config,
                clock.clone(),
                Arc::new(InMemoryCells::new()),
                meter.clone(),
            )
            .context("building engine")?;

            let sim_config = sim::SimConfig {
                entities,
                ticks,
                seed,
                slowdown_at,
                spread,
            };
            let summary = sim::run(&engine, &clock, &meter, &sim_config);
            let output = serde_json::json!({
                "summary": summary,
                "stats": engine.stats(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            engine.shutdown();
        }
    }

    Ok(())
}
