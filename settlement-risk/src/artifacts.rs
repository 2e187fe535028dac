//! Trained artifact bundle and its on-disk layout
//!
//! ```text
//! <dir>/model.bin           contract version + preprocessor + classifier (bincode)
//! <dir>/explainer.bin       attribution model (bincode, optional)
//! <dir>/feature_names.json  ordered feature names
//! <dir>/metrics.json        held-out classification report (optional)
//! ```

use crate::attribution::TreeExplainer;
use crate::classifier::GradientBoostedTrees;
use crate::error::ArtifactError;
use crate::metrics::ClassificationReport;
use crate::preprocessing::Preprocessor;
use bincode::Options;
use common::FEATURE_CONTRACT_VERSION;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

pub const MODEL_FILE: &str = "model.bin";
pub const EXPLAINER_FILE: &str = "explainer.bin";
pub const FEATURE_NAMES_FILE: &str = "feature_names.json";
pub const METRICS_FILE: &str = "metrics.json";

/// Upper bound on any length prefix read from a bincode artifact
const MAX_ARTIFACT_BYTES: u64 = 512 * 1024 * 1024;

fn codec() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MAX_ARTIFACT_BYTES)
}

#[derive(Serialize)]
struct ModelFileRef<'a> {
    contract_version: &'a str,
    preprocessor: &'a Preprocessor,
    classifier: &'a GradientBoostedTrees,
}

#[derive(Deserialize)]
struct ModelFile {
    contract_version: String,
    preprocessor: Preprocessor,
    classifier: GradientBoostedTrees,
}

/// Everything the scoring path needs, immutable once built.
#[derive(Debug, Clone)]
pub struct ArtifactBundle {
    pub preprocessor: Preprocessor,
    pub classifier: GradientBoostedTrees,
    pub explainer: Option<TreeExplainer>,
    pub feature_names: Vec<String>,
    pub metrics: Option<ClassificationReport>,
    pub contract_version: String,
    /// Why `explainer` is absent, when it is
    explainer_issue: Option<String>,
}

impl ArtifactBundle {
    pub fn new(
        preprocessor: Preprocessor,
        classifier: GradientBoostedTrees,
        explainer: Result<TreeExplainer, String>,
        metrics: Option<ClassificationReport>,
    ) -> Self {
        let feature_names = preprocessor.feature_names();
        let (explainer, explainer_issue) = match explainer {
            Ok(explainer) => (Some(explainer), None),
            Err(issue) => (None, Some(issue)),
        };

        Self {
            preprocessor,
            classifier,
            explainer,
            feature_names,
            metrics,
            contract_version: FEATURE_CONTRACT_VERSION.to_string(),
            explainer_issue,
        }
    }

    pub fn explainer_issue(&self) -> Option<&str> {
        self.explainer_issue.as_deref()
    }

    pub fn feature_count(&self) -> usize {
        self.classifier.n_features()
    }

    /// Write the bundle into a staging directory next to `dir`, then swap it in
    /// whole. A failed save leaves any previous bundle at `dir` untouched.
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<(), ArtifactError> {
        let dir = dir.as_ref();
        let parent = match dir.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(|source| ArtifactError::Io {
            path: parent.to_path_buf(),
            source,
        })?;

        let staging = tempfile::Builder::new()
            .prefix(".bundle-staging-")
            .tempdir_in(parent)
            .map_err(|source| ArtifactError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        self.write_files(staging.path())?;
        replace_dir(staging.path(), dir)?;

        info!(
            dir = %dir.display(),
            features = self.feature_names.len(),
            trees = self.classifier.trees().len(),
            attribution = self.explainer.is_some(),
            "Saved artifact bundle"
        );
        Ok(())
    }

    fn write_files(&self, dir: &Path) -> Result<(), ArtifactError> {
        let model = ModelFileRef {
            contract_version: &self.contract_version,
            preprocessor: &self.preprocessor,
            classifier: &self.classifier,
        };
        write_bincode(&dir.join(MODEL_FILE), MODEL_FILE, &model)?;
        if let Some(explainer) = &self.explainer {
            write_bincode(&dir.join(EXPLAINER_FILE), EXPLAINER_FILE, explainer)?;
        }
        write_json(&dir.join(FEATURE_NAMES_FILE), FEATURE_NAMES_FILE, &self.feature_names)?;
        if let Some(metrics) = &self.metrics {
            write_json(&dir.join(METRICS_FILE), METRICS_FILE, metrics)?;
        }
        Ok(())
    }

    /// Load a bundle. Problems with the optional explainer or metrics degrade the
    /// bundle instead of failing it.
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self, ArtifactError> {
        let dir = dir.as_ref();

        let model: ModelFile = read_bincode(&dir.join(MODEL_FILE), MODEL_FILE)?;
        if model.contract_version != FEATURE_CONTRACT_VERSION {
            return Err(ArtifactError::ContractVersion {
                expected: FEATURE_CONTRACT_VERSION.to_string(),
                found: model.contract_version,
            });
        }
        model.classifier.validate().map_err(|reason| ArtifactError::Corrupt {
            artifact: MODEL_FILE,
            reason,
        })?;
        if model.preprocessor.width() != model.classifier.n_features() {
            return Err(ArtifactError::Incompatible(format!(
                "preprocessor emits {} features, classifier expects {}",
                model.preprocessor.width(),
                model.classifier.n_features()
            )));
        }

        let feature_names: Vec<String> = read_json(&dir.join(FEATURE_NAMES_FILE), FEATURE_NAMES_FILE)?;
        if feature_names != model.preprocessor.feature_names() {
            return Err(ArtifactError::Incompatible(format!(
                "{} does not match the fitted preprocessor",
                FEATURE_NAMES_FILE
            )));
        }

        let explainer = load_explainer(dir, &model.classifier);
        if let Err(issue) = &explainer {
            warn!(dir = %dir.display(), issue = %issue, "Attribution unavailable");
        }

        let metrics_path = dir.join(METRICS_FILE);
        let metrics = if metrics_path.exists() {
            match read_json::<ClassificationReport>(&metrics_path, METRICS_FILE) {
                Ok(metrics) => Some(metrics),
                Err(e) => {
                    warn!(error = %e, "Ignoring unreadable metrics report");
                    None
                }
            }
        } else {
            None
        };

        let bundle = Self::new(model.preprocessor, model.classifier, explainer, metrics);
        info!(
            dir = %dir.display(),
            features = bundle.feature_count(),
            trees = bundle.classifier.trees().len(),
            attribution = bundle.explainer.is_some(),
            "Loaded artifact bundle"
        );
        Ok(bundle)
    }
}

fn load_explainer(dir: &Path, classifier: &GradientBoostedTrees) -> Result<TreeExplainer, String> {
    let explainer: TreeExplainer =
        read_bincode(&dir.join(EXPLAINER_FILE), EXPLAINER_FILE).map_err(|e| e.to_string())?;
    explainer
        .check_compatible(classifier)
        .map_err(|e| e.to_string())?;
    Ok(explainer)
}

/// Move a fully written `staging` directory to `dir`, restoring the previous
/// contents of `dir` if the final rename fails.
fn replace_dir(staging: &Path, dir: &Path) -> Result<(), ArtifactError> {
    let backup = staging.with_extension("previous");
    let had_previous = dir.exists();
    if had_previous {
        fs::rename(dir, &backup).map_err(|source| ArtifactError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    if let Err(source) = fs::rename(staging, dir) {
        if had_previous {
            if let Err(e) = fs::rename(&backup, dir) {
                error!(dir = %dir.display(), backup = %backup.display(), error = %e, "Failed to restore previous bundle");
            }
        }
        return Err(ArtifactError::Io {
            path: dir.to_path_buf(),
            source,
        });
    }

    if had_previous {
        if let Err(e) = fs::remove_dir_all(&backup) {
            warn!(backup = %backup.display(), error = %e, "Failed to remove replaced bundle");
        }
    }
    Ok(())
}

fn open(path: &Path) -> Result<File, ArtifactError> {
    if !path.exists() {
        return Err(ArtifactError::Missing(path.to_path_buf()));
    }
    File::open(path).map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn create(path: &Path) -> Result<File, ArtifactError> {
    File::create(path).map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_bincode<T: serde::de::DeserializeOwned>(
    path: &Path,
    artifact: &'static str,
) -> Result<T, ArtifactError> {
    let reader = BufReader::new(open(path)?);
    codec().deserialize_from(reader).map_err(|e| ArtifactError::Corrupt {
        artifact,
        reason: e.to_string(),
    })
}

fn write_bincode<T: Serialize + ?Sized>(
    path: &Path,
    artifact: &'static str,
    value: &T,
) -> Result<(), ArtifactError> {
    let mut writer = BufWriter::new(create(path)?);
    codec().serialize_into(&mut writer, value).map_err(|e| ArtifactError::Corrupt {
        artifact,
        reason: e.to_string(),
    })?;
    writer.flush().map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path, artifact: &'static str) -> Result<T, ArtifactError> {
    let reader = BufReader::new(open(path)?);
    serde_json::from_reader(reader).map_err(|e| ArtifactError::Corrupt {
        artifact,
        reason: e.to_string(),
    })
}

fn write_json<T: Serialize + ?Sized>(path: &Path, artifact: &'static str, value: &T) -> Result<(), ArtifactError> {
    let content = serde_json::to_string_pretty(value).map_err(|e| ArtifactError::Corrupt {
        artifact,
        reason: e.to_string(),
    })?;
    fs::write(path, content).map_err(|source| ArtifactError::Io {
        path: PathBuf::from(path),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::BoosterParams;
    use common::EnrichedTrade;

    fn trade(ssi: &str, notional: f64) -> EnrichedTrade {
        EnrichedTrade {
            asset_class: "Equity".to_string(),
            counterparty_rating: "A".to_string(),
            custodian_location: "US".to_string(),
            ssi_status: ssi.to_string(),
            liquidity_score: "High".to_string(),
            operation_type: "DVP".to_string(),
            currency: "USD".to_string(),
            market_volatility_index: 15.0,
            notional_amount_usd: notional,
            trade_day: "Tuesday".to_string(),
            trade_hour: 10,
        }
    }

    fn bundle() -> ArtifactBundle {
        let trades: Vec<EnrichedTrade> = (0..60)
            .map(|i| trade(if i % 4 == 0 { "Mismatch" } else { "Match" }, 1_000.0 * f64::from(i + 1)))
            .collect();
        let labels: Vec<u8> = (0..60).map(|i| u8::from(i % 4 == 0)).collect();

        let preprocessor = Preprocessor::fit(&trades).unwrap();
        let x = preprocessor.transform_batch(&trades).unwrap();
        let params = BoosterParams {
            n_estimators: 5,
            max_depth: 2,
            ..BoosterParams::default()
        };
        let classifier = GradientBoostedTrees::fit(&x, &labels, &params).unwrap();
        let explainer = TreeExplainer::build(&classifier).map_err(|e| e.to_string());
        let probs: Vec<f64> = x.iter().map(|r| classifier.probability(r)).collect();
        let metrics = ClassificationReport::evaluate(&labels, &probs);

        ArtifactBundle::new(preprocessor, classifier, explainer, Some(metrics))
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let original = bundle();
        original.save(dir.path()).unwrap();

        for file in [MODEL_FILE, EXPLAINER_FILE, FEATURE_NAMES_FILE, METRICS_FILE] {
            assert!(dir.path().join(file).exists(), "{} not written", file);
        }

        let loaded = ArtifactBundle::load(dir.path()).unwrap();
        assert_eq!(loaded.classifier, original.classifier);
        assert_eq!(loaded.preprocessor, original.preprocessor);
        assert_eq!(loaded.feature_names, original.feature_names);
        assert_eq!(loaded.metrics, original.metrics);
        assert!(loaded.explainer.is_some());

        let row = loaded.preprocessor.transform(&trade("Mismatch", 3_000.0)).unwrap();
        assert_eq!(loaded.classifier.margin(&row), original.classifier.margin(&row));
    }

    #[test]
    fn test_save_replaces_previous_bundle_whole() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("model");
        bundle().save(&dir).unwrap();
        fs::write(dir.join("stale.txt"), b"left over").unwrap();

        let mut without_explainer = bundle();
        without_explainer.explainer = None;
        without_explainer.save(&dir).unwrap();

        assert!(!dir.join(EXPLAINER_FILE).exists());
        assert!(!dir.join("stale.txt").exists());
        assert!(ArtifactBundle::load(&dir).unwrap().explainer.is_none());

        let entries: Vec<_> = fs::read_dir(root.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("model")]);
    }

    #[test]
    fn test_failed_swap_keeps_previous_bundle() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("model");
        bundle().save(&dir).unwrap();

        let never_written = root.path().join(".bundle-staging-missing");
        let err = replace_dir(&never_written, &dir).unwrap_err();
        assert!(matches!(err, ArtifactError::Io { .. }));

        let loaded = ArtifactBundle::load(&dir).unwrap();
        assert!(loaded.explainer.is_some());
        assert!(!never_written.with_extension("previous").exists());
    }

    #[test]
    fn test_write_surfaces_flush_failure() {
        // Writes to /dev/full fail with ENOSPC once the buffer is flushed
        let full = Path::new("/dev/full");
        if !full.exists() {
            return;
        }
        let err = write_bincode(full, MODEL_FILE, &vec![0u8; 16]).unwrap_err();
        assert!(matches!(err, ArtifactError::Io { .. }));
    }

    #[test]
    fn test_missing_model_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ArtifactBundle::load(dir.path()).unwrap_err();
        assert!(matches!(err, ArtifactError::Missing(_)));
    }

    #[test]
    fn test_corrupt_model_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        bundle().save(dir.path()).unwrap();
        fs::write(dir.path().join(MODEL_FILE), b"not a model").unwrap();

        let err = ArtifactBundle::load(dir.path()).unwrap_err();
        assert!(matches!(err, ArtifactError::Corrupt { artifact: MODEL_FILE, .. }));
    }

    #[test]
    fn test_contract_version_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let mut stale = bundle();
        stale.contract_version = "0".to_string();
        stale.save(dir.path()).unwrap();

        let err = ArtifactBundle::load(dir.path()).unwrap_err();
        assert!(matches!(err, ArtifactError::ContractVersion { .. }));
    }

    #[test]
    fn test_missing_explainer_degrades() {
        let dir = tempfile::tempdir().unwrap();
        bundle().save(dir.path()).unwrap();
        fs::remove_file(dir.path().join(EXPLAINER_FILE)).unwrap();

        let loaded = ArtifactBundle::load(dir.path()).unwrap();
        assert!(loaded.explainer.is_none());
        assert!(loaded.explainer_issue().is_some());
    }

    #[test]
    fn test_corrupt_explainer_degrades() {
        let dir = tempfile::tempdir().unwrap();
        bundle().save(dir.path()).unwrap();
        fs::write(dir.path().join(EXPLAINER_FILE), b"garbage").unwrap();

        let loaded = ArtifactBundle::load(dir.path()).unwrap();
        assert!(loaded.explainer.is_none());
    }

    #[test]
    fn test_feature_names_must_match() {
        let dir = tempfile::tempdir().unwrap();
        bundle().save(dir.path()).unwrap();
        fs::write(dir.path().join(FEATURE_NAMES_FILE), r#"["a", "b"]"#).unwrap();

        let err = ArtifactBundle::load(dir.path()).unwrap_err();
        assert!(matches!(err, ArtifactError::Incompatible(_)));
    }
}
