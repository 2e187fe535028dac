//! Training orchestration
//!
//! CSV -> enrich -> stratified split -> fit preprocessing -> oversample the
//! training split -> boost -> evaluate on the untouched test split -> explainer
//! -> artifact bundle.

use crate::artifacts::ArtifactBundle;
use crate::attribution::TreeExplainer;
use crate::classifier::{BoosterParams, GradientBoostedTrees};
use crate::config::TrainingConfig;
use crate::error::TrainingError;
use crate::imbalance::Smote;
use crate::metrics::ClassificationReport;
use crate::preprocessing::Preprocessor;
use common::contract::REQUIRED_TRAINING_COLUMNS;
use common::{derive_features, DatasetRow, EnrichedTrade, LabeledTrade};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

/// Result of a successful training run
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub bundle: ArtifactBundle,
    pub report: ClassificationReport,
    pub train_rows: usize,
    pub test_rows: usize,
    pub synthetic_rows: usize,
    /// Log-odds shift applied to the intercept (0 when disabled)
    pub prior_shift: f64,
}

pub struct TrainingOrchestrator {
    config: TrainingConfig,
    params: BoosterParams,
}

impl TrainingOrchestrator {
    pub fn new(config: TrainingConfig, params: BoosterParams) -> Self {
        Self { config, params }
    }

    /// Train from a labeled CSV and persist the bundle into `artifact_dir`.
    pub fn run<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        csv_path: P,
        artifact_dir: Q,
    ) -> Result<TrainingOutcome, TrainingError> {
        let started = Instant::now();
        let trades = load_dataset(csv_path.as_ref())?;
        info!(
            rows = trades.len(),
            path = %csv_path.as_ref().display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Loaded dataset"
        );

        let outcome = self.fit_bundle(&trades)?;
        outcome.bundle.save(artifact_dir.as_ref())?;

        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Training run complete"
        );
        Ok(outcome)
    }

    /// In-memory training on already-loaded trades.
    pub fn fit_bundle(&self, trades: &[LabeledTrade]) -> Result<TrainingOutcome, TrainingError> {
        if trades.is_empty() {
            return Err(TrainingError::EmptyDataset);
        }
        if !(self.config.test_fraction > 0.0 && self.config.test_fraction < 1.0) {
            return Err(TrainingError::InvalidConfig(format!(
                "test_fraction must be in (0, 1), got {}",
                self.config.test_fraction
            )));
        }

        let enriched: Vec<EnrichedTrade> = trades
            .iter()
            .enumerate()
            .map(|(i, t)| {
                derive_features(&t.record).map_err(|e| TrainingError::MalformedRow {
                    row: i + 1,
                    reason: e.to_string(),
                })
            })
            .collect::<Result<_, _>>()?;
        let labels: Vec<u8> = trades.iter().map(|t| u8::from(t.is_failed)).collect();

        let (train_idx, test_idx) = stratified_split(&labels, self.config.test_fraction, self.config.split_seed);
        let train_labels: Vec<u8> = train_idx.iter().map(|&i| labels[i]).collect();
        let test_labels: Vec<u8> = test_idx.iter().map(|&i| labels[i]).collect();
        if !train_labels.contains(&0) || !train_labels.contains(&1) {
            return Err(TrainingError::SingleClass);
        }
        info!(
            train = train_idx.len(),
            test = test_idx.len(),
            train_failures = train_labels.iter().filter(|l| **l == 1).count(),
            "Stratified split"
        );

        let step = Instant::now();
        let train_trades: Vec<EnrichedTrade> = train_idx.iter().map(|&i| enriched[i].clone()).collect();
        let test_trades: Vec<EnrichedTrade> = test_idx.iter().map(|&i| enriched[i].clone()).collect();
        let preprocessor = Preprocessor::fit(&train_trades)?;
        let train_x = preprocessor.transform_batch(&train_trades)?;
        let test_x = preprocessor.transform_batch(&test_trades)?;
        info!(
            width = preprocessor.width(),
            elapsed_ms = step.elapsed().as_millis() as u64,
            "Fitted preprocessing"
        );

        let resampled = Smote::from_config(&self.config).resample(&train_x, &train_labels)?;

        let step = Instant::now();
        let mut classifier = GradientBoostedTrees::fit(&resampled.features, &resampled.labels, &self.params)?;
        let prior_shift = if self.config.calibrate_for_oversampling {
            resampled.prior_log_odds_shift()
        } else {
            0.0
        };
        classifier.adjust_base_score(prior_shift);
        info!(
            trees = classifier.trees().len(),
            prior_shift,
            elapsed_ms = step.elapsed().as_millis() as u64,
            "Fitted classifier"
        );

        let probabilities: Vec<f64> = test_x.iter().map(|row| classifier.probability(row)).collect();
        let mut report = ClassificationReport::evaluate(&test_labels, &probabilities);
        info!(
            recall = report.failed.recall,
            precision = report.failed.precision,
            f1 = report.failed.f1_score,
            roc_auc = report.roc_auc,
            brier = report.brier_score,
            "Held-out evaluation"
        );

        if !report.apply_recall_policy(self.config.min_failure_recall) {
            let minimum = self.config.min_failure_recall.unwrap_or_default();
            if self.config.enforce_min_recall {
                return Err(TrainingError::RecallBelowPolicy {
                    recall: report.failed.recall,
                    minimum,
                });
            }
            warn!(
                recall = report.failed.recall,
                minimum,
                "Failure recall below policy; keeping model"
            );
        }

        let explainer = TreeExplainer::build(&classifier).map_err(|e| {
            warn!(error = %e, "Could not build attribution model; saving without it");
            e.to_string()
        });

        Ok(TrainingOutcome {
            bundle: ArtifactBundle::new(preprocessor, classifier, explainer, Some(report.clone())),
            report,
            train_rows: train_idx.len(),
            test_rows: test_idx.len(),
            synthetic_rows: resampled.synthetic,
            prior_shift,
        })
    }
}

/// Read a labeled CSV, checking required columns before any row is parsed.
pub fn load_dataset(path: &Path) -> Result<Vec<LabeledTrade>, TrainingError> {
    let mut reader = csv::Reader::from_path(path)?;

    let headers = reader.headers()?.clone();
    let missing: Vec<String> = REQUIRED_TRAINING_COLUMNS
        .iter()
        .filter(|column| !headers.iter().any(|h| h == **column))
        .map(|column| column.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(TrainingError::MissingColumns(missing));
    }

    let mut trades = Vec::new();
    for (i, result) in reader.deserialize::<DatasetRow>().enumerate() {
        let row = result.map_err(|e| TrainingError::MalformedRow {
            row: i + 1,
            reason: e.to_string(),
        })?;
        if row.is_failed > 1 {
            return Err(TrainingError::MalformedRow {
                row: i + 1,
                reason: format!("IS_FAILED must be 0 or 1, got {}", row.is_failed),
            });
        }
        trades.push(row.into_labeled());
    }

    if trades.is_empty() {
        return Err(TrainingError::EmptyDataset);
    }
    Ok(trades)
}

/// Per-class shuffled split; returns sorted (train, test) row indices.
fn stratified_split(labels: &[u8], test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut test = Vec::new();

    for class in [0u8, 1u8] {
        let mut idx: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|(_, l)| **l == class)
            .map(|(i, _)| i)
            .collect();
        idx.shuffle(&mut rng);

        let n_test = (idx.len() as f64 * test_fraction).round() as usize;
        test.extend_from_slice(&idx[..n_test]);
        train.extend_from_slice(&idx[n_test..]);
    }

    train.sort_unstable();
    test.sort_unstable();
    (train, test)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const HEADER: &str = "Trade_ID,Trade_Date,Asset_Class,Counterparty_Rating,Custodian_Location,SSI_Status,Liquidity_Score,Market_Volatility_Index,Operation_Type,Currency,Notional_Amount_USD,IS_FAILED";

    fn write_csv(lines: &[String]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", HEADER).unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file
    }

    fn synthetic_lines(n: usize) -> Vec<String> {
        (0..n)
            .map(|i| {
                let mismatch = i % 10 == 0;
                format!(
                    "t-{i},2025-02-{day:02} {hour:02}:00:00,Equity,A,US,{ssi},High,{vix},DVP,USD,{notional},{failed}",
                    day = 3 + i % 20,
                    hour = i % 24,
                    ssi = if mismatch { "Mismatch" } else { "Match" },
                    vix = 10.0 + (i % 9) as f64,
                    notional = 1_000_000.0 + (i * 1_000) as f64,
                    failed = u8::from(mismatch || i % 97 == 0),
                )
            })
            .collect()
    }

    fn small_params() -> BoosterParams {
        BoosterParams {
            n_estimators: 20,
            learning_rate: 0.3,
            max_depth: 3,
            ..BoosterParams::default()
        }
    }

    #[test]
    fn test_stratified_split_keeps_class_ratio() {
        let labels: Vec<u8> = (0..1000).map(|i| u8::from(i % 10 == 0)).collect();
        let (train, test) = stratified_split(&labels, 0.2, 42);

        assert_eq!(train.len() + test.len(), 1000);
        assert_eq!(test.len(), 200);
        assert_eq!(test.iter().filter(|&&i| labels[i] == 1).count(), 20);
        assert!(train.iter().all(|i| !test.contains(i)));
        assert_eq!(stratified_split(&labels, 0.2, 42), (train, test));
    }

    #[test]
    fn test_missing_columns_are_listed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Trade_ID,Asset_Class,IS_FAILED").unwrap();
        writeln!(file, "t-1,Equity,0").unwrap();

        match load_dataset(file.path()) {
            Err(TrainingError::MissingColumns(columns)) => {
                assert!(columns.contains(&"SSI_Status".to_string()));
                assert!(columns.contains(&"Notional_Amount_USD".to_string()));
                assert!(!columns.contains(&"Asset_Class".to_string()));
            }
            other => panic!("expected MissingColumns, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_row_reports_position() {
        let mut lines = synthetic_lines(3);
        lines.push("t-x,2025-02-03 10:00:00,Equity,A,US,Match,High,not-a-number,DVP,USD,100,0".to_string());
        let file = write_csv(&lines);

        match load_dataset(file.path()) {
            Err(TrainingError::MalformedRow { row, .. }) => assert_eq!(row, 4),
            other => panic!("expected MalformedRow, got {:?}", other),
        }
    }

    #[test]
    fn test_run_writes_artifacts() {
        let file = write_csv(&synthetic_lines(600));
        let dir = tempfile::tempdir().unwrap();

        let orchestrator = TrainingOrchestrator::new(TrainingConfig::default(), small_params());
        let outcome = orchestrator.run(file.path(), dir.path()).unwrap();

        assert_eq!(outcome.train_rows + outcome.test_rows, 600);
        assert!(outcome.synthetic_rows > 0);
        assert_eq!(outcome.prior_shift, 0.0);
        assert!(outcome.bundle.explainer.is_some());
        assert!(outcome.report.failed.recall > 0.5);
        assert!(dir.path().join("model.bin").exists());
        assert!(dir.path().join("metrics.json").exists());
    }

    #[test]
    fn test_prior_shift_is_opt_in() {
        let trades = load_dataset(write_csv(&synthetic_lines(600)).path()).unwrap();

        let plain = TrainingOrchestrator::new(TrainingConfig::default(), small_params())
            .fit_bundle(&trades)
            .unwrap();
        let shifted = TrainingOrchestrator::new(
            TrainingConfig {
                calibrate_for_oversampling: true,
                ..TrainingConfig::default()
            },
            small_params(),
        )
        .fit_bundle(&trades)
        .unwrap();

        assert_eq!(plain.prior_shift, 0.0);
        assert!(shifted.prior_shift < 0.0);
        assert!(
            (shifted.bundle.classifier.base_score() - plain.bundle.classifier.base_score() - shifted.prior_shift).abs()
                < 1e-9
        );
    }

    #[test]
    fn test_enforced_recall_policy_fails_run() {
        let trades = load_dataset(write_csv(&synthetic_lines(600)).path()).unwrap();
        let config = TrainingConfig {
            min_failure_recall: Some(1.01),
            enforce_min_recall: true,
            ..TrainingConfig::default()
        };

        let err = TrainingOrchestrator::new(config, small_params())
            .fit_bundle(&trades)
            .unwrap_err();
        assert!(matches!(err, TrainingError::RecallBelowPolicy { .. }));
    }

    #[test]
    fn test_unenforced_recall_policy_is_recorded() {
        let trades = load_dataset(write_csv(&synthetic_lines(600)).path()).unwrap();
        let config = TrainingConfig {
            min_failure_recall: Some(1.01),
            ..TrainingConfig::default()
        };

        let outcome = TrainingOrchestrator::new(config, small_params())
            .fit_bundle(&trades)
            .unwrap();
        assert!(!outcome.report.policy_passed);
        assert_eq!(outcome.report.min_failure_recall, Some(1.01));
    }

    #[test]
    fn test_single_class_dataset_rejected() {
        let trades: Vec<LabeledTrade> = load_dataset(write_csv(&synthetic_lines(50)).path())
            .unwrap()
            .into_iter()
            .map(|mut t| {
                t.is_failed = false;
                t
            })
            .collect();

        let err = TrainingOrchestrator::new(TrainingConfig::default(), small_params())
            .fit_bundle(&trades)
            .unwrap_err();
        assert!(matches!(err, TrainingError::SingleClass));
    }
}
