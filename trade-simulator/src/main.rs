//! Synthetic settlement dataset generator
//!
//! Usage:
//!   cargo run --bin generate-trades -- --rows 100000 --seed 42 --output settlement_data.csv
//!   cargo run --bin generate-trades -- --config simulator.toml

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::fmt;
use trade_simulator::{write_csv_file, CausalSimulator, DatasetSummary, SimulatorConfig};

#[derive(Parser, Debug)]
#[command(name = "generate-trades")]
#[command(about = "Generate labeled synthetic trades from the causal failure model")]
struct Args {
    /// Number of trades to generate
    #[arg(long, default_value = "100000")]
    rows: usize,

    /// Random seed (overrides the config file)
    #[arg(long)]
    seed: Option<u64>,

    /// Optional TOML file with field distributions and calendar window
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output CSV path
    #[arg(long, default_value = "settlement_data.csv")]
    output: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: Level,
}

fn main() -> Result<()> {
    let args = Args::parse();
    fmt().with_max_level(args.log_level).init();

    let mut config = match &args.config {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            toml::from_str::<SimulatorConfig>(&content).context("Invalid simulator config file")?
        }
        None => SimulatorConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.seed = seed;
    }

    let simulator = CausalSimulator::new(config).context("Invalid simulator configuration")?;
    let trades = simulator
        .generate(args.rows)
        .context("Failed to generate trades")?;

    DatasetSummary::from_trades(&trades).log();

    write_csv_file(&trades, &args.output)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    info!(path = %args.output.display(), "Saved dataset");

    Ok(())
}
