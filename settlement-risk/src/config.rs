//! Engine configuration
//!
//! Training hyperparameters, resampling policy and serving options. Values load
//! from TOML, optionally overlaid by `SETTLEMENT__*` environment variables.

use crate::classifier::BoosterParams;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Overall engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Train/test split, oversampling and model acceptance policy
    #[serde(default)]
    pub training: TrainingConfig,

    /// Gradient-boosted tree hyperparameters
    #[serde(default)]
    pub classifier: BoosterParams,

    /// Scoring-path options
    #[serde(default)]
    pub serving: ServingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Training run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Fraction of rows held out for evaluation (stratified)
    #[serde(default = "default_test_fraction")]
    pub test_fraction: f64,

    #[serde(default = "default_seed")]
    pub split_seed: u64,

    /// Target minority/majority ratio after oversampling
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,

    /// Nearest minority neighbours considered for interpolation
    #[serde(default = "default_k_neighbors")]
    pub k_neighbors: usize,

    #[serde(default = "default_seed")]
    pub smote_seed: u64,

    /// Shift the model intercept back to the pre-oversampling class prior (opt-in)
    #[serde(default)]
    pub calibrate_for_oversampling: bool,

    /// Held-out failure recall the model is expected to reach
    #[serde(default)]
    pub min_failure_recall: Option<f64>,

    /// Abort the run instead of only flagging it when recall falls short
    #[serde(default)]
    pub enforce_min_recall: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            test_fraction: default_test_fraction(),
            split_seed: default_seed(),
            sampling_ratio: default_sampling_ratio(),
            k_neighbors: default_k_neighbors(),
            smote_seed: default_seed(),
            calibrate_for_oversampling: false,
            min_failure_recall: None,
            enforce_min_recall: false,
        }
    }
}

fn default_test_fraction() -> f64 {
    0.2
}

fn default_seed() -> u64 {
    42
}

fn default_sampling_ratio() -> f64 {
    0.5
}

fn default_k_neighbors() -> usize {
    5
}

/// Scoring-path configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServingConfig {
    /// Directory holding the trained artifact bundle
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,

    /// Compute per-feature attributions on every score call
    #[serde(default = "default_attribution_enabled")]
    pub attribution_enabled: bool,

    /// Version tag reported with every prediction
    #[serde(default = "default_model_version")]
    pub model_version: String,
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            attribution_enabled: default_attribution_enabled(),
            model_version: default_model_version(),
        }
    }
}

fn default_model_dir() -> PathBuf {
    PathBuf::from("model")
}

fn default_attribution_enabled() -> bool {
    true
}

fn default_model_version() -> String {
    "v1.0.0".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl EngineConfig {
    /// Load from a TOML file, then apply `SETTLEMENT__SECTION__KEY` overrides.
    pub fn load_layered<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(config::Environment::with_prefix("SETTLEMENT").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        settings
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

/// Load configuration from TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<EngineConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: EngineConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to TOML file
pub fn save_config<P: AsRef<Path>>(config: &EngineConfig, path: P) -> anyhow::Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
