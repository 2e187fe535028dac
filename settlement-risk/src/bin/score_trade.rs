//! Score a single trade against a trained bundle
//!
//! Usage:
//!   cargo run --bin score-trade -- --request trade.json
//!   cat trade.json | cargo run --bin score-trade -- --model model/ --top 5

use anyhow::{Context, Result};
use clap::Parser;
use settlement_risk::{Attribution, EngineConfig, Explanation, ScoreRequest, ScoringContext};
use std::io::Read;
use std::path::PathBuf;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt;

#[derive(Parser, Debug)]
#[command(name = "score-trade")]
#[command(about = "Print the failure probability, risk tier and attribution for one trade")]
struct Args {
    /// Artifact directory (defaults to serving.model_dir from config)
    #[arg(long)]
    model: Option<PathBuf>,

    /// JSON trade keyed by dataset column names; reads stdin when omitted
    #[arg(long)]
    request: Option<PathBuf>,

    #[arg(long, default_value = "engine.toml")]
    config: PathBuf,

    /// Number of strongest risk factors to log
    #[arg(long, default_value_t = 5)]
    top: usize,

    #[arg(long)]
    log_level: Option<Level>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = EngineConfig::load_layered(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    let level = args
        .log_level
        .unwrap_or_else(|| config.logging.level.parse().unwrap_or(Level::WARN));
    fmt().with_max_level(level).with_writer(std::io::stderr).init();

    let model_dir = args
        .model
        .clone()
        .unwrap_or_else(|| config.serving.model_dir.clone());
    let context = ScoringContext::load(&model_dir, &config.serving);

    let health = context.health();
    eprintln!("{}", serde_json::to_string(&health)?);

    let raw = match &args.request {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read request from stdin")?;
            buf
        }
    };
    let request: ScoreRequest = serde_json::from_str(&raw).context("Request is not valid JSON")?;

    let result = context.score(&request).context("Scoring failed")?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    match (&result.explanation, context.snapshot()) {
        (
            Explanation::Available {
                base_value,
                feature_contributions,
            },
            Some(bundle),
        ) => {
            let attribution = Attribution {
                base_value: *base_value,
                contributions: feature_contributions.clone(),
            };
            for (name, value) in attribution.top(&bundle.feature_names, args.top) {
                info!(feature = name, contribution = value, "Risk factor");
            }
        }
        (Explanation::Unavailable { reason }, _) => {
            warn!(reason = %reason, "No attribution for this prediction");
        }
        _ => {}
    }

    Ok(())
}
