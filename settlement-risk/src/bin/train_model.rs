//! Train the settlement failure model
//!
//! Usage:
//!   cargo run --bin train-model -- --data settlement_data.csv --output model/
//!   cargo run --bin train-model -- --data settlement_data.csv --config engine.toml

use anyhow::{Context, Result};
use clap::Parser;
use settlement_risk::{EngineConfig, SettlementRiskEngine};
use std::path::PathBuf;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt;

#[derive(Parser, Debug)]
#[command(name = "train-model")]
#[command(about = "Fit preprocessing, boosted trees and the attribution model from a labeled CSV")]
struct Args {
    /// Labeled dataset produced by generate-trades
    #[arg(long, default_value = "settlement_data.csv")]
    data: PathBuf,

    /// Artifact directory (defaults to serving.model_dir from config)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Engine configuration file (TOML); SETTLEMENT__* env vars override it
    #[arg(long, default_value = "engine.toml")]
    config: PathBuf,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<Level>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = EngineConfig::load_layered(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    let level = args
        .log_level
        .unwrap_or_else(|| config.logging.level.parse().unwrap_or(Level::INFO));
    fmt().with_max_level(level).init();

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| config.serving.model_dir.clone());

    info!(
        data = %args.data.display(),
        output = %output.display(),
        rounds = config.classifier.n_estimators,
        max_depth = config.classifier.max_depth,
        "Starting training run"
    );

    let engine = SettlementRiskEngine::new(config);
    let outcome = engine
        .train(&args.data, &output)
        .context("Training failed")?;

    let report = &outcome.report;
    info!("--- Evaluation Metrics ---");
    info!("Recall (catching failures): {:.4}", report.failed.recall);
    info!("Precision: {:.4}", report.failed.precision);
    info!("F1 Score: {:.4}", report.failed.f1_score);
    info!("ROC AUC: {:.4}", report.roc_auc);
    info!("Brier score: {:.4}", report.brier_score);

    if !report.policy_passed {
        warn!(
            recall = report.failed.recall,
            minimum = ?report.min_failure_recall,
            "Model saved but failure recall is below policy"
        );
    }
    if outcome.bundle.explainer.is_none() {
        warn!("Model saved without an attribution model");
    }

    info!(
        train_rows = outcome.train_rows,
        test_rows = outcome.test_rows,
        synthetic_rows = outcome.synthetic_rows,
        "Artifacts saved to {}",
        output.display()
    );
    Ok(())
}
