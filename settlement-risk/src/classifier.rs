//! Gradient-boosted decision trees for binary classification
//!
//! Second-order boosting on the logistic loss with histogram split finding.
//! Each feature is bucketed once into at most `max_bins` quantile bins; every
//! candidate split is a bin boundary and is stored as a real-valued threshold,
//! so a trained tree routes raw vectors with `x[feature] < threshold` going left.

use crate::error::TrainingError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Boosting hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoosterParams {
    /// Number of boosting rounds (trees)
    #[serde(default = "default_n_estimators")]
    pub n_estimators: usize,

    /// Shrinkage applied to every leaf value
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// L2 regularization on leaf weights
    #[serde(default = "default_lambda")]
    pub lambda: f64,

    /// Minimum loss reduction required to split
    #[serde(default)]
    pub gamma: f64,

    /// Minimum hessian sum in each child
    #[serde(default = "default_min_child_weight")]
    pub min_child_weight: f64,

    /// Histogram buckets per feature (2..=256)
    #[serde(default = "default_max_bins")]
    pub max_bins: usize,

    /// Row sampling fraction per tree
    #[serde(default = "default_subsample")]
    pub subsample: f64,

    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for BoosterParams {
    fn default() -> Self {
        Self {
            n_estimators: default_n_estimators(),
            learning_rate: default_learning_rate(),
            max_depth: default_max_depth(),
            lambda: default_lambda(),
            gamma: 0.0,
            min_child_weight: default_min_child_weight(),
            max_bins: default_max_bins(),
            subsample: default_subsample(),
            seed: default_seed(),
        }
    }
}

fn default_n_estimators() -> usize {
    300
}

fn default_learning_rate() -> f64 {
    0.05
}

fn default_max_depth() -> usize {
    6
}

fn default_lambda() -> f64 {
    1.0
}

fn default_min_child_weight() -> f64 {
    1.0
}

fn default_max_bins() -> usize {
    64
}

fn default_subsample() -> f64 {
    1.0
}

fn default_seed() -> u64 {
    42
}

/// One tree node. Children always sit at higher indices than their parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        /// Hessian mass of the training rows that reached this node
        cover: f64,
    },
    Leaf {
        value: f64,
        cover: f64,
    },
}

impl Node {
    pub fn cover(&self) -> f64 {
        match self {
            Node::Split { cover, .. } | Node::Leaf { cover, .. } => *cover,
        }
    }
}

/// A single regression tree; node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    /// Leaf value reached by `x`.
    pub fn predict(&self, x: &[f64]) -> f64 {
        let mut idx = 0usize;
        loop {
            match self.nodes.get(idx) {
                Some(Node::Leaf { value, .. }) => return *value,
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                }) => {
                    let value = x.get(*feature).copied().unwrap_or(f64::NAN);
                    idx = if value < *threshold { *left } else { *right };
                }
                None => return 0.0,
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match nodes.get(idx) {
                Some(Node::Split { left, right, .. }) => 1 + walk(nodes, *left).max(walk(nodes, *right)),
                _ => 0,
            }
        }
        walk(&self.nodes, 0)
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }
}

/// Trained boosted ensemble
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedTrees {
    params: BoosterParams,
    base_score: f64,
    n_features: usize,
    trees: Vec<Tree>,
}

impl GradientBoostedTrees {
    /// Fit on a dense row-major matrix with 0/1 labels.
    pub fn fit(x: &[Vec<f64>], y: &[u8], params: &BoosterParams) -> Result<Self, TrainingError> {
        if x.is_empty() || x.len() != y.len() {
            return Err(TrainingError::EmptyDataset);
        }
        let n_features = x[0].len();
        if let Some(row) = x.iter().position(|r| r.len() != n_features) {
            return Err(TrainingError::MalformedRow {
                row,
                reason: format!("expected {} features, found {}", n_features, x[row].len()),
            });
        }

        let positives = y.iter().filter(|label| **label == 1).count();
        if positives == 0 || positives == y.len() {
            return Err(TrainingError::SingleClass);
        }
        let positive_rate = positives as f64 / y.len() as f64;
        let base_score = (positive_rate / (1.0 - positive_rate)).ln();

        let bins = BinnedMatrix::build(x, params.max_bins.clamp(2, 256));
        let labels: Vec<f64> = y.iter().map(|label| f64::from(*label)).collect();
        let mut margins = vec![base_score; x.len()];
        let mut grad = vec![0.0; x.len()];
        let mut hess = vec![0.0; x.len()];
        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut trees = Vec::with_capacity(params.n_estimators);

        info!(
            rows = x.len(),
            features = n_features,
            positives,
            rounds = params.n_estimators,
            "Fitting gradient-boosted trees"
        );

        for round in 0..params.n_estimators {
            for i in 0..x.len() {
                let p = sigmoid(margins[i]);
                grad[i] = p - labels[i];
                hess[i] = (p * (1.0 - p)).max(1e-16);
            }

            let rows: Vec<u32> = if params.subsample < 1.0 {
                (0..x.len() as u32)
                    .filter(|_| rng.gen_bool(params.subsample.max(0.0)))
                    .collect()
            } else {
                (0..x.len() as u32).collect()
            };
            if rows.is_empty() {
                continue;
            }

            let tree = TreeBuilder {
                bins: &bins,
                grad: &grad,
                hess: &hess,
                params,
                nodes: Vec::new(),
            }
            .grow(rows);

            for (i, row) in x.iter().enumerate() {
                margins[i] += tree.predict(row);
            }

            if round % 50 == 0 {
                debug!(round, leaves = tree.leaf_count(), "Boosting round complete");
            }
            trees.push(tree);
        }

        Ok(Self {
            params: params.clone(),
            base_score,
            n_features,
            trees,
        })
    }

    /// Shift the intercept in log-odds space.
    ///
    /// Used to map a model fitted on a resampled class mix back to the original
    /// class prior. Tree structure is untouched.
    pub fn adjust_base_score(&mut self, delta: f64) {
        self.base_score += delta;
    }

    /// Raw additive score: intercept plus every tree's leaf value.
    pub fn margin(&self, x: &[f64]) -> f64 {
        self.base_score + self.trees.iter().map(|t| t.predict(x)).sum::<f64>()
    }

    /// Probability of the positive (failure) class
    pub fn probability(&self, x: &[f64]) -> f64 {
        sigmoid(self.margin(x))
    }

    pub fn label(&self, x: &[f64]) -> u8 {
        u8::from(self.probability(x) > 0.5)
    }

    pub fn base_score(&self) -> f64 {
        self.base_score
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    pub fn params(&self) -> &BoosterParams {
        &self.params
    }

    /// Structural check for deserialized models.
    pub fn validate(&self) -> Result<(), String> {
        if !self.base_score.is_finite() {
            return Err(format!("base score {} is not finite", self.base_score));
        }
        for (t, tree) in self.trees.iter().enumerate() {
            if tree.nodes.is_empty() {
                return Err(format!("tree {} has no nodes", t));
            }
            for (idx, node) in tree.nodes.iter().enumerate() {
                if let Node::Split {
                    feature,
                    left,
                    right,
                    ..
                } = node
                {
                    if *feature >= self.n_features {
                        return Err(format!("tree {} node {} uses feature {}", t, idx, feature));
                    }
                    for child in [*left, *right] {
                        if child <= idx || child >= tree.nodes.len() {
                            return Err(format!("tree {} node {} has bad child {}", t, idx, child));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

pub fn sigmoid(margin: f64) -> f64 {
    1.0 / (1.0 + (-margin).exp())
}

/// Column-major bin indices plus the threshold that closes each bin.
struct BinnedMatrix {
    n_rows: usize,
    bins: Vec<u8>,
    /// `thresholds[f][k]`: bins `0..=k` hold values strictly below it
    thresholds: Vec<Vec<f64>>,
    offsets: Vec<usize>,
    total_bins: usize,
}

impl BinnedMatrix {
    fn build(x: &[Vec<f64>], max_bins: usize) -> Self {
        let n_rows = x.len();
        let n_features = x[0].len();
        let mut bins = vec![0u8; n_rows * n_features];
        let mut thresholds = Vec::with_capacity(n_features);
        let mut offsets = Vec::with_capacity(n_features);
        let mut total_bins = 0;

        for f in 0..n_features {
            let mut column: Vec<f64> = x.iter().map(|row| row[f]).collect();
            column.sort_by(f64::total_cmp);
            let cuts = bin_thresholds(&column, max_bins);

            for (i, row) in x.iter().enumerate() {
                bins[f * n_rows + i] = cuts.partition_point(|t| *t <= row[f]) as u8;
            }

            offsets.push(total_bins);
            total_bins += cuts.len() + 1;
            thresholds.push(cuts);
        }

        Self {
            n_rows,
            bins,
            thresholds,
            offsets,
            total_bins,
        }
    }

    fn bin(&self, feature: usize, row: u32) -> u8 {
        self.bins[feature * self.n_rows + row as usize]
    }

    fn n_features(&self) -> usize {
        self.thresholds.len()
    }
}

fn bin_thresholds(sorted: &[f64], max_bins: usize) -> Vec<f64> {
    let mut unique = sorted.to_vec();
    unique.dedup();

    if unique.len() <= max_bins {
        return unique.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect();
    }

    let mut cuts: Vec<f64> = (1..max_bins)
        .map(|q| sorted[q * sorted.len() / max_bins])
        .collect();
    cuts.dedup();
    // A cut at the minimum would leave bin 0 empty
    cuts.retain(|c| *c > sorted[0]);
    cuts
}

#[derive(Clone, Copy, Default)]
struct Bucket {
    grad: f64,
    hess: f64,
    count: u32,
}

struct SplitCandidate {
    feature: usize,
    bin: usize,
    gain: f64,
}

struct TreeBuilder<'a> {
    bins: &'a BinnedMatrix,
    grad: &'a [f64],
    hess: &'a [f64],
    params: &'a BoosterParams,
    nodes: Vec<Node>,
}

impl<'a> TreeBuilder<'a> {
    fn grow(mut self, rows: Vec<u32>) -> Tree {
        let histogram = self.histogram(&rows);
        self.build_node(rows, histogram, 0);
        Tree { nodes: self.nodes }
    }

    fn histogram(&self, rows: &[u32]) -> Vec<Bucket> {
        let mut hist = vec![Bucket::default(); self.bins.total_bins];
        for f in 0..self.bins.n_features() {
            let offset = self.bins.offsets[f];
            for &row in rows {
                let bucket = &mut hist[offset + self.bins.bin(f, row) as usize];
                bucket.grad += self.grad[row as usize];
                bucket.hess += self.hess[row as usize];
                bucket.count += 1;
            }
        }
        hist
    }

    fn build_node(&mut self, rows: Vec<u32>, histogram: Vec<Bucket>, depth: usize) -> usize {
        let (g, h) = rows.iter().fold((0.0, 0.0), |(g, h), &r| {
            (g + self.grad[r as usize], h + self.hess[r as usize])
        });
        let idx = self.nodes.len();
        let lambda = self.params.lambda;

        let split = if depth < self.params.max_depth {
            self.best_split(&histogram, g, h)
        } else {
            None
        };

        let Some(split) = split else {
            self.nodes.push(Node::Leaf {
                value: -g / (h + lambda) * self.params.learning_rate,
                cover: h,
            });
            return idx;
        };

        // Reserve the slot so children land after the parent
        self.nodes.push(Node::Leaf { value: 0.0, cover: h });

        let (left_rows, right_rows): (Vec<u32>, Vec<u32>) = rows
            .into_iter()
            .partition(|&r| (self.bins.bin(split.feature, r) as usize) <= split.bin);

        // Build the smaller child's histogram directly, derive the sibling by subtraction
        let (left_hist, right_hist) = if left_rows.len() <= right_rows.len() {
            let small = self.histogram(&left_rows);
            let large = subtract(&histogram, &small);
            (small, large)
        } else {
            let small = self.histogram(&right_rows);
            let large = subtract(&histogram, &small);
            (large, small)
        };
        drop(histogram);

        let left = self.build_node(left_rows, left_hist, depth + 1);
        let right = self.build_node(right_rows, right_hist, depth + 1);

        self.nodes[idx] = Node::Split {
            feature: split.feature,
            threshold: self.bins.thresholds[split.feature][split.bin],
            left,
            right,
            cover: h,
        };
        idx
    }

    fn best_split(&self, histogram: &[Bucket], g: f64, h: f64) -> Option<SplitCandidate> {
        let lambda = self.params.lambda;
        let parent_score = g * g / (h + lambda);
        let mut best: Option<SplitCandidate> = None;

        for f in 0..self.bins.n_features() {
            let n_cuts = self.bins.thresholds[f].len();
            let offset = self.bins.offsets[f];
            let (mut gl, mut hl, mut nl) = (0.0, 0.0, 0u32);
            let total: u32 = histogram[offset..offset + n_cuts + 1]
                .iter()
                .map(|b| b.count)
                .sum();

            for k in 0..n_cuts {
                let bucket = histogram[offset + k];
                gl += bucket.grad;
                hl += bucket.hess;
                nl += bucket.count;

                let (gr, hr) = (g - gl, h - hl);
                if nl == 0 || nl == total {
                    continue;
                }
                if hl < self.params.min_child_weight || hr < self.params.min_child_weight {
                    continue;
                }

                let gain = 0.5 * (gl * gl / (hl + lambda) + gr * gr / (hr + lambda) - parent_score)
                    - self.params.gamma;
                if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(SplitCandidate {
                        feature: f,
                        bin: k,
                        gain,
                    });
                }
            }
        }

        best
    }
}

fn subtract(parent: &[Bucket], child: &[Bucket]) -> Vec<Bucket> {
    parent
        .iter()
        .zip(child)
        .map(|(p, c)| Bucket {
            grad: p.grad - c.grad,
            hess: p.hess - c.hess,
            count: p.count - c.count,
        })
        .collect()
}
