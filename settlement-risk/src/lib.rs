//! Settlement Risk Engine
//!
//! Estimates the probability that a trade fails to settle and breaks each
//! estimate down into per-feature contributions. Offline, the training
//! orchestrator turns a labeled dataset into an artifact bundle; online, a
//! [`ScoringContext`] serves probabilities, risk tiers and attributions from it.

mod artifacts;
mod attribution;
mod classifier;
mod config;
mod error;
mod imbalance;
mod inference;
mod metrics;
mod preprocessing;
mod training;

pub use artifacts::{ArtifactBundle, EXPLAINER_FILE, FEATURE_NAMES_FILE, METRICS_FILE, MODEL_FILE};
pub use attribution::{Attribution, EnsembleFingerprint, TreeExplainer};
pub use classifier::{sigmoid, BoosterParams, GradientBoostedTrees, Node, Tree};
pub use config::{load_config, save_config, EngineConfig, LoggingConfig, ServingConfig, TrainingConfig};
pub use error::{ArtifactError, AttributionError, PreprocessError, ScoringError, TrainingError};
pub use imbalance::{Resampled, Smote};
pub use inference::{
    Explanation, HealthStatus, PredictionResult, RiskLevel, ScoreRequest, ScoringContext, ServiceState,
};
pub use metrics::{brier_score, log_loss, roc_auc, ClassMetrics, ClassificationReport};
pub use preprocessing::{CategoricalVocabulary, Preprocessor, RobustScaler};
pub use training::{load_dataset, TrainingOrchestrator, TrainingOutcome};

use std::path::Path;
use tracing::info;

/// Main entry point tying configuration to the training and scoring paths
#[derive(Debug, Clone, Default)]
pub struct SettlementRiskEngine {
    config: EngineConfig,
}

impl SettlementRiskEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Build from a TOML file plus `SETTLEMENT__*` environment overrides
    pub fn from_config_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        Ok(Self::new(EngineConfig::load_layered(path)?))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Train on a labeled CSV and write the bundle into `artifact_dir`.
    pub fn train<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        csv_path: P,
        artifact_dir: Q,
    ) -> Result<TrainingOutcome, TrainingError> {
        let orchestrator =
            TrainingOrchestrator::new(self.config.training.clone(), self.config.classifier.clone());
        orchestrator.run(csv_path, artifact_dir)
    }

    /// Scoring context over the configured model directory. Never fails; a
    /// missing or broken bundle yields a degraded context.
    pub fn scoring_context(&self) -> ScoringContext {
        info!(dir = %self.config.serving.model_dir.display(), "Opening scoring context");
        ScoringContext::load(&self.config.serving.model_dir, &self.config.serving)
    }
}
