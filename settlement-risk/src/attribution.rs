//! Per-feature attribution for tree ensembles
//!
//! Exact path-dependent TreeSHAP: contributions are Shapley values of the
//! ensemble margin, with absent features marginalised through the training
//! cover of each branch. For every input,
//! `base_value + sum(contributions) == margin(x)` up to float rounding.

use crate::classifier::{GradientBoostedTrees, Node, Tree};
use crate::error::AttributionError;
use serde::{Deserialize, Serialize};

/// Shape summary used to match an explainer with the classifier it was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnsembleFingerprint {
    pub trees: usize,
    pub nodes: usize,
}

impl EnsembleFingerprint {
    pub fn of(trees: &[Tree]) -> Self {
        Self {
            trees: trees.len(),
            nodes: trees.iter().map(|t| t.nodes.len()).sum(),
        }
    }
}

/// Contributions for one instance, in feature-vector order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribution {
    pub base_value: f64,
    pub contributions: Vec<f64>,
}

impl Attribution {
    /// Reconstructed margin
    pub fn total(&self) -> f64 {
        self.base_value + self.contributions.iter().sum::<f64>()
    }

    /// The `n` largest contributions by magnitude, paired with their names.
    pub fn top<'a>(&self, names: &'a [String], n: usize) -> Vec<(&'a str, f64)> {
        let mut ranked: Vec<(&str, f64)> = names
            .iter()
            .map(String::as_str)
            .zip(self.contributions.iter().copied())
            .collect();
        ranked.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
        ranked.truncate(n);
        ranked
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeExplainer {
    trees: Vec<Tree>,
    base_score: f64,
    base_value: f64,
    n_features: usize,
    fingerprint: EnsembleFingerprint,
}

#[derive(Debug, Clone, Copy)]
struct PathElement {
    feature: Option<usize>,
    zero_fraction: f64,
    one_fraction: f64,
    pweight: f64,
}

impl TreeExplainer {
    pub fn build(model: &GradientBoostedTrees) -> Result<Self, AttributionError> {
        let trees = model.trees();
        if trees.is_empty() {
            return Err(AttributionError::EmptyEnsemble);
        }
        for (t, tree) in trees.iter().enumerate() {
            validate_tree(t, tree, model.n_features())?;
        }

        let expected: f64 = trees.iter().map(|tree| expected_value(tree, 0)).sum();

        Ok(Self {
            trees: trees.to_vec(),
            base_score: model.base_score(),
            base_value: model.base_score() + expected,
            n_features: model.n_features(),
            fingerprint: EnsembleFingerprint::of(trees),
        })
    }

    /// Expected margin over the training distribution
    pub fn base_value(&self) -> f64 {
        self.base_value
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn fingerprint(&self) -> EnsembleFingerprint {
        self.fingerprint
    }

    /// Confirm this explainer describes `model` and not some other ensemble.
    pub fn check_compatible(&self, model: &GradientBoostedTrees) -> Result<(), AttributionError> {
        if self.n_features != model.n_features() {
            return Err(AttributionError::Incompatible(format!(
                "explainer has {} features, classifier has {}",
                self.n_features,
                model.n_features()
            )));
        }

        let fingerprint = EnsembleFingerprint::of(model.trees());
        if self.fingerprint != fingerprint {
            return Err(AttributionError::Incompatible(format!(
                "explainer covers {} trees / {} nodes, classifier has {} / {}",
                self.fingerprint.trees, self.fingerprint.nodes, fingerprint.trees, fingerprint.nodes
            )));
        }

        if self.base_score != model.base_score() {
            return Err(AttributionError::Incompatible(
                "intercepts differ".to_string(),
            ));
        }

        Ok(())
    }

    pub fn explain(&self, x: &[f64]) -> Result<Attribution, AttributionError> {
        if x.len() != self.n_features {
            return Err(AttributionError::WidthMismatch {
                expected: self.n_features,
                actual: x.len(),
            });
        }

        let mut phi = vec![0.0; self.n_features];
        for tree in &self.trees {
            let path = Vec::with_capacity(tree.depth() + 2);
            recurse(tree, 0, x, &mut phi, path, 1.0, 1.0, None);
        }

        Ok(Attribution {
            base_value: self.base_value,
            contributions: phi,
        })
    }
}

fn validate_tree(t: usize, tree: &Tree, n_features: usize) -> Result<(), AttributionError> {
    if tree.nodes.is_empty() {
        return Err(AttributionError::DanglingChild {
            tree: t,
            node: 0,
            child: 0,
        });
    }

    for (idx, node) in tree.nodes.iter().enumerate() {
        let cover = node.cover();
        if !(cover.is_finite() && cover > 0.0) {
            return Err(AttributionError::InvalidCover {
                tree: t,
                node: idx,
                cover,
            });
        }

        if let Node::Split {
            feature,
            left,
            right,
            ..
        } = node
        {
            if *feature >= n_features {
                return Err(AttributionError::InvalidFeature {
                    tree: t,
                    node: idx,
                    feature: *feature,
                    n_features,
                });
            }
            for child in [*left, *right] {
                // Children must come after the parent so recursion terminates
                if child <= idx || child >= tree.nodes.len() {
                    return Err(AttributionError::DanglingChild {
                        tree: t,
                        node: idx,
                        child,
                    });
                }
            }
        }
    }

    Ok(())
}

/// Cover-weighted mean leaf value below `node`.
fn expected_value(tree: &Tree, node: usize) -> f64 {
    match &tree.nodes[node] {
        Node::Leaf { value, .. } => *value,
        Node::Split {
            left, right, cover, ..
        } => {
            let left_cover = tree.nodes[*left].cover();
            let right_cover = tree.nodes[*right].cover();
            (left_cover * expected_value(tree, *left) + right_cover * expected_value(tree, *right))
                / cover
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn recurse(
    tree: &Tree,
    node: usize,
    x: &[f64],
    phi: &mut [f64],
    mut path: Vec<PathElement>,
    zero_fraction: f64,
    one_fraction: f64,
    feature: Option<usize>,
) {
    extend(&mut path, zero_fraction, one_fraction, feature);

    match &tree.nodes[node] {
        Node::Leaf { value, .. } => {
            for i in 1..path.len() {
                let weight = unwound_sum(&path, i);
                let element = path[i];
                if let Some(f) = element.feature {
                    phi[f] += weight * (element.one_fraction - element.zero_fraction) * value;
                }
            }
        }
        Node::Split {
            feature: split_feature,
            threshold,
            left,
            right,
            cover,
        } => {
            let (hot, cold) = if x[*split_feature] < *threshold {
                (*left, *right)
            } else {
                (*right, *left)
            };

            let mut incoming_zero = 1.0;
            let mut incoming_one = 1.0;
            // A feature seen higher up the path is merged, not counted twice
            if let Some(k) = (1..path.len()).find(|&k| path[k].feature == Some(*split_feature)) {
                incoming_zero = path[k].zero_fraction;
                incoming_one = path[k].one_fraction;
                unwind(&mut path, k);
            }

            let hot_ratio = tree.nodes[hot].cover() / cover;
            let cold_ratio = tree.nodes[cold].cover() / cover;

            recurse(
                tree,
                hot,
                x,
                phi,
                path.clone(),
                incoming_zero * hot_ratio,
                incoming_one,
                Some(*split_feature),
            );
            recurse(
                tree,
                cold,
                x,
                phi,
                path,
                incoming_zero * cold_ratio,
                0.0,
                Some(*split_feature),
            );
        }
    }
}

fn extend(path: &mut Vec<PathElement>, zero_fraction: f64, one_fraction: f64, feature: Option<usize>) {
    let depth = path.len();
    path.push(PathElement {
        feature,
        zero_fraction,
        one_fraction,
        pweight: if depth == 0 { 1.0 } else { 0.0 },
    });

    let denom = (depth + 1) as f64;
    for i in (0..depth).rev() {
        path[i + 1].pweight += one_fraction * path[i].pweight * (i + 1) as f64 / denom;
        path[i].pweight = zero_fraction * path[i].pweight * (depth - i) as f64 / denom;
    }
}

fn unwind(path: &mut Vec<PathElement>, index: usize) {
    let depth = path.len() - 1;
    let one = path[index].one_fraction;
    let zero = path[index].zero_fraction;
    let denom = (depth + 1) as f64;
    let mut next = path[depth].pweight;

    for i in (0..depth).rev() {
        if one != 0.0 {
            let tmp = path[i].pweight;
            path[i].pweight = next * denom / ((i + 1) as f64 * one);
            next = tmp - path[i].pweight * zero * (depth - i) as f64 / denom;
        } else {
            path[i].pweight = path[i].pweight * denom / (zero * (depth - i) as f64);
        }
    }

    for i in index..depth {
        path[i].feature = path[i + 1].feature;
        path[i].zero_fraction = path[i + 1].zero_fraction;
        path[i].one_fraction = path[i + 1].one_fraction;
    }
    path.pop();
}

/// Total permutation weight of the path with element `index` removed.
fn unwound_sum(path: &[PathElement], index: usize) -> f64 {
    let depth = path.len() - 1;
    let one = path[index].one_fraction;
    let zero = path[index].zero_fraction;
    let denom = (depth + 1) as f64;
    let mut next = path[depth].pweight;
    let mut total = 0.0;

    for i in (0..depth).rev() {
        if one != 0.0 {
            let tmp = next * denom / ((i + 1) as f64 * one);
            total += tmp;
            next = path[i].pweight - tmp * zero * (depth - i) as f64 / denom;
        } else if zero != 0.0 {
            total += (path[i].pweight / zero) / ((depth - i) as f64 / denom);
        }
    }

    total
}
