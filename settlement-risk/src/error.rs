//! Typed failures at the engine's boundaries

use std::path::PathBuf;
use thiserror::Error;

/// Failures turning an enriched trade into a model input vector.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PreprocessError {
    #[error("field {field} is not a finite number ({value})")]
    NonFinite { field: &'static str, value: f64 },

    #[error("cannot fit preprocessing on an empty dataset")]
    EmptyInput,

    #[error("preprocessor has not been fitted")]
    NotFitted,
}

/// Failures building or evaluating the attribution model.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AttributionError {
    #[error("tree ensemble is empty")]
    EmptyEnsemble,

    #[error("tree {tree} node {node} has non-positive cover {cover}")]
    InvalidCover { tree: usize, node: usize, cover: f64 },

    #[error("tree {tree} node {node} splits on feature {feature}, model has {n_features}")]
    InvalidFeature {
        tree: usize,
        node: usize,
        feature: usize,
        n_features: usize,
    },

    #[error("tree {tree} node {node} points at missing child {child}")]
    DanglingChild { tree: usize, node: usize, child: usize },

    #[error("expected {expected} features, got {actual}")]
    WidthMismatch { expected: usize, actual: usize },

    #[error("explainer does not match the loaded classifier: {0}")]
    Incompatible(String),
}

/// Failures of a single scoring request.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoringError {
    #[error("model unavailable")]
    ModelUnavailable,

    #[error("missing required field {0}")]
    MissingField(&'static str),

    #[error("invalid value for {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("feature vector has {actual} columns, classifier expects {expected}")]
    FeatureMismatch { expected: usize, actual: usize },

    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
}

/// Failures loading or saving the trained artifact bundle.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact not found: {0}")]
    Missing(PathBuf),

    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("artifact {artifact} is corrupt: {reason}")]
    Corrupt { artifact: &'static str, reason: String },

    #[error("feature contract version mismatch: engine speaks {expected}, artifact was built for {found}")]
    ContractVersion { expected: String, found: String },

    #[error("artifacts are inconsistent: {0}")]
    Incompatible(String),
}

/// Fatal conditions of a training run.
#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("dataset is missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("dataset contains no rows")]
    EmptyDataset,

    #[error("malformed row {row}: {reason}")]
    MalformedRow { row: usize, reason: String },

    #[error("training split contains a single class")]
    SingleClass,

    #[error("need at least 2 minority samples to oversample, found {0}")]
    InsufficientMinority(usize),

    #[error("invalid training configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to read dataset: {0}")]
    Csv(#[from] csv::Error),

    #[error("held-out failure recall {recall:.4} is below the required {minimum:.4}")]
    RecallBelowPolicy { recall: f64, minimum: f64 },

    #[error(transparent)]
    Preprocess(#[from] PreprocessError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}
