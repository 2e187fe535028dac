//! Minority oversampling (SMOTE)
//!
//! Grows the minority class of a training split with synthetic points drawn on
//! segments between a minority sample and one of its nearest minority
//! neighbours. Never applied to evaluation data or at inference.

use crate::config::TrainingConfig;
use crate::error::TrainingError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct Smote {
    /// Minority/majority ratio to reach
    pub sampling_ratio: f64,
    pub k_neighbors: usize,
    pub seed: u64,
}

/// Training split after oversampling. Original rows come first.
#[derive(Debug, Clone)]
pub struct Resampled {
    pub features: Vec<Vec<f64>>,
    pub labels: Vec<u8>,
    /// Number of synthetic rows appended
    pub synthetic: usize,
    positives_before: usize,
    negatives_before: usize,
}

impl Resampled {
    /// Log-odds shift that maps the resampled class prior back to the original one.
    pub fn prior_log_odds_shift(&self) -> f64 {
        let positives_after = self.labels.iter().filter(|l| **l == 1).count();
        let negatives_after = self.labels.len() - positives_after;

        let odds_before = self.positives_before as f64 / self.negatives_before as f64;
        let odds_after = positives_after as f64 / negatives_after as f64;
        (odds_before / odds_after).ln()
    }
}

impl Default for Smote {
    fn default() -> Self {
        Self {
            sampling_ratio: 0.5,
            k_neighbors: 5,
            seed: 42,
        }
    }
}

impl Smote {
    pub fn from_config(config: &TrainingConfig) -> Self {
        Self {
            sampling_ratio: config.sampling_ratio,
            k_neighbors: config.k_neighbors,
            seed: config.smote_seed,
        }
    }

    pub fn resample(&self, features: &[Vec<f64>], labels: &[u8]) -> Result<Resampled, TrainingError> {
        if !(self.sampling_ratio > 0.0 && self.sampling_ratio <= 1.0) {
            return Err(TrainingError::InvalidConfig(format!(
                "sampling_ratio must be in (0, 1], got {}",
                self.sampling_ratio
            )));
        }
        if self.k_neighbors == 0 {
            return Err(TrainingError::InvalidConfig("k_neighbors must be positive".to_string()));
        }

        let positives = labels.iter().filter(|l| **l == 1).count();
        let negatives = labels.len() - positives;
        let (minority_label, minority_count, majority_count) = if positives <= negatives {
            (1u8, positives, negatives)
        } else {
            (0u8, negatives, positives)
        };

        let mut out = Resampled {
            features: features.to_vec(),
            labels: labels.to_vec(),
            synthetic: 0,
            positives_before: positives,
            negatives_before: negatives,
        };

        let target = (self.sampling_ratio * majority_count as f64).ceil() as usize;
        if minority_count >= target {
            debug!(minority = minority_count, target, "Minority already at target ratio");
            return Ok(out);
        }
        if minority_count < 2 {
            return Err(TrainingError::InsufficientMinority(minority_count));
        }

        let minority: Vec<&[f64]> = features
            .iter()
            .zip(labels)
            .filter(|(_, l)| **l == minority_label)
            .map(|(row, _)| row.as_slice())
            .collect();
        let k = self.k_neighbors.min(minority.len() - 1);
        let neighbours = nearest_neighbours(&minority, k);

        let mut rng = StdRng::seed_from_u64(self.seed);
        let needed = target - minority_count;
        out.features.reserve(needed);
        out.labels.reserve(needed);

        for _ in 0..needed {
            let i = rng.gen_range(0..minority.len());
            let j = neighbours[i][rng.gen_range(0..k)];
            let gap: f64 = rng.gen();

            let sample = minority[i]
                .iter()
                .zip(minority[j])
                .map(|(a, b)| a + gap * (b - a))
                .collect();
            out.features.push(sample);
            out.labels.push(minority_label);
        }
        out.synthetic = needed;

        info!(
            minority_before = minority_count,
            minority_after = target,
            majority = majority_count,
            k,
            "Oversampled minority class"
        );

        Ok(out)
    }
}

/// Indices of the `k` nearest other points for every point (Euclidean).
fn nearest_neighbours(points: &[&[f64]], k: usize) -> Vec<Vec<usize>> {
    points
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let mut distances: Vec<(f64, usize)> = points
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(j, q)| (squared_distance(p, q), j))
                .collect();
            distances.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            distances.into_iter().take(k).map(|(_, j)| j).collect()
        })
        .collect()
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
