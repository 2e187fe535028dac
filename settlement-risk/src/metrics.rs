//! Held-out evaluation metrics
//!
//! The report keeps the familiar per-class layout (`"0"`, `"1"`, `accuracy`,
//! `macro avg`, `weighted avg`) and adds ranking and calibration diagnostics.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    #[serde(rename = "f1-score")]
    pub f1_score: f64,
    pub support: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    /// Settled trades
    #[serde(rename = "0")]
    pub settled: ClassMetrics,

    /// Failed trades
    #[serde(rename = "1")]
    pub failed: ClassMetrics,

    pub accuracy: f64,

    #[serde(rename = "macro avg")]
    pub macro_avg: ClassMetrics,

    #[serde(rename = "weighted avg")]
    pub weighted_avg: ClassMetrics,

    pub roc_auc: f64,
    pub brier_score: f64,
    pub log_loss: f64,

    /// Failure recall the run was expected to reach, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_failure_recall: Option<f64>,

    #[serde(default = "default_policy_passed")]
    pub policy_passed: bool,
}

fn default_policy_passed() -> bool {
    true
}

impl ClassificationReport {
    /// Score predicted failure probabilities against 0/1 outcomes at the 0.5 cut.
    pub fn evaluate(labels: &[u8], probabilities: &[f64]) -> Self {
        let predictions: Vec<u8> = probabilities.iter().map(|p| u8::from(*p > 0.5)).collect();

        let settled = class_metrics(labels, &predictions, 0);
        let failed = class_metrics(labels, &predictions, 1);
        let total = labels.len();

        let correct = labels.iter().zip(&predictions).filter(|(l, p)| l == p).count();
        let accuracy = safe_div(correct as f64, total as f64);

        let macro_avg = ClassMetrics {
            precision: (settled.precision + failed.precision) / 2.0,
            recall: (settled.recall + failed.recall) / 2.0,
            f1_score: (settled.f1_score + failed.f1_score) / 2.0,
            support: total,
        };

        let weight = |a: f64, b: f64| {
            safe_div(a * settled.support as f64 + b * failed.support as f64, total as f64)
        };
        let weighted_avg = ClassMetrics {
            precision: weight(settled.precision, failed.precision),
            recall: weight(settled.recall, failed.recall),
            f1_score: weight(settled.f1_score, failed.f1_score),
            support: total,
        };

        Self {
            settled,
            failed,
            accuracy,
            macro_avg,
            weighted_avg,
            roc_auc: roc_auc(labels, probabilities),
            brier_score: brier_score(labels, probabilities),
            log_loss: log_loss(labels, probabilities),
            min_failure_recall: None,
            policy_passed: true,
        }
    }

    /// Record the recall expectation and whether the failure class met it.
    pub fn apply_recall_policy(&mut self, min_failure_recall: Option<f64>) -> bool {
        self.min_failure_recall = min_failure_recall;
        self.policy_passed = min_failure_recall.map_or(true, |minimum| self.failed.recall >= minimum);
        self.policy_passed
    }
}

fn class_metrics(labels: &[u8], predictions: &[u8], class: u8) -> ClassMetrics {
    let mut tp = 0usize;
    let mut fp = 0usize;
    let mut fn_ = 0usize;

    for (label, prediction) in labels.iter().zip(predictions) {
        match (*label == class, *prediction == class) {
            (true, true) => tp += 1,
            (false, true) => fp += 1,
            (true, false) => fn_ += 1,
            (false, false) => {}
        }
    }

    let precision = safe_div(tp as f64, (tp + fp) as f64);
    let recall = safe_div(tp as f64, (tp + fn_) as f64);
    let f1_score = safe_div(2.0 * precision * recall, precision + recall);

    ClassMetrics {
        precision,
        recall,
        f1_score,
        support: tp + fn_,
    }
}

fn safe_div(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Area under the ROC curve via the rank-sum statistic, ties averaged.
pub fn roc_auc(labels: &[u8], probabilities: &[f64]) -> f64 {
    let positives = labels.iter().filter(|l| **l == 1).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return 0.5;
    }

    let mut order: Vec<usize> = (0..probabilities.len()).collect();
    order.sort_by(|a, b| probabilities[*a].total_cmp(&probabilities[*b]));

    let mut ranks = vec![0.0; order.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && probabilities[order[j + 1]] == probabilities[order[i]] {
            j += 1;
        }
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for k in i..=j {
            ranks[order[k]] = rank;
        }
        i = j + 1;
    }

    let positive_rank_sum: f64 = labels
        .iter()
        .zip(&ranks)
        .filter(|(l, _)| **l == 1)
        .map(|(_, r)| r)
        .sum();
    let n_pos = positives as f64;
    (positive_rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * negatives as f64)
}

/// Mean squared error of the probabilities
pub fn brier_score(labels: &[u8], probabilities: &[f64]) -> f64 {
    let sum: f64 = labels
        .iter()
        .zip(probabilities)
        .map(|(l, p)| (p - f64::from(*l)).powi(2))
        .sum();
    safe_div(sum, labels.len() as f64)
}

pub fn log_loss(labels: &[u8], probabilities: &[f64]) -> f64 {
    // Add epsilon to avoid log(0)
    let eps = 1e-15;
    let sum: f64 = labels
        .iter()
        .zip(probabilities)
        .map(|(l, p)| {
            let p = p.clamp(eps, 1.0 - eps);
            if *l == 1 {
                -p.ln()
            } else {
                -(1.0 - p).ln()
            }
        })
        .sum();
    safe_div(sum, labels.len() as f64)
}
