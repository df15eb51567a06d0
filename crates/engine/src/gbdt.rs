//! Gradient-boosted decision trees for binary classification
//!
//! Second-order boosting on the logistic loss: each round fits a depth-limited
//! regression tree to the gradient/hessian of the current margins, with L2
//! regularized leaf weights and exact greedy split search.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::dataset::Sample;
use crate::error::{EstimateError, EstimateResult};

pub const N_FEATURES: usize = 5;

// ============================================================================
// Core traits
// ============================================================================

/// A fitted binary classifier over the five engineered features
pub trait Classifier {
    /// Probability of the positive class
    fn predict_proba(&self, features: &[f64; N_FEATURES]) -> f64;

    fn predict(&self, features: &[f64; N_FEATURES]) -> bool {
        self.predict_proba(features) > 0.5
    }

    /// Non-negative per-feature importance, in column order
    fn feature_importances(&self) -> [f64; N_FEATURES];
}

/// Fits a `Classifier` on a training partition
pub trait Trainer {
    type Model: Classifier;

    fn fit(&self, train: &[Sample], seed: Option<u64>) -> EstimateResult<Self::Model>;
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoosterConfig {
    pub n_trees: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    /// L2 penalty on leaf weights
    pub lambda: f64,
    /// Minimum hessian sum in each child
    pub min_child_weight: f64,
    /// Minimum loss reduction to accept a split
    pub min_split_gain: f64,
    /// Fraction of rows drawn for each tree (1.0 = all rows)
    pub subsample: f64,
}

impl Default for BoosterConfig {
    fn default() -> Self {
        Self {
            n_trees: 200,
            learning_rate: 0.02,
            max_depth: 5,
            lambda: 1.0,
            min_child_weight: 1.0,
            min_split_gain: 0.0,
            subsample: 1.0,
        }
    }
}

// ============================================================================
// Trees
// ============================================================================

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        weight: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone)]
struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    fn predict(&self, x: &[f64; N_FEATURES]) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes[idx] {
                Node::Leaf { weight } => return weight,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if x[feature] < threshold { left } else { right };
                }
            }
        }
    }
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
    left: Vec<usize>,
    right: Vec<usize>,
}

/// Per-round state shared while growing one tree
struct TreeBuilder<'a> {
    config: &'a BoosterConfig,
    x: &'a [[f64; N_FEATURES]],
    grad: &'a [f64],
    hess: &'a [f64],
    nodes: Vec<Node>,
    gain_sum: [f64; N_FEATURES],
    split_count: [usize; N_FEATURES],
}

impl<'a> TreeBuilder<'a> {
    fn score(&self, g: f64, h: f64) -> f64 {
        g * g / (h + self.config.lambda)
    }

    fn build(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let g: f64 = rows.iter().map(|&i| self.grad[i]).sum();
        let h: f64 = rows.iter().map(|&i| self.hess[i]).sum();
        let idx = self.nodes.len();
        self.nodes.push(Node::Leaf {
            weight: -g / (h + self.config.lambda),
        });

        if depth >= self.config.max_depth || rows.len() < 2 {
            return idx;
        }

        let Some(best) = self.find_split(&rows, g, h) else {
            return idx;
        };

        self.gain_sum[best.feature] += best.gain;
        self.split_count[best.feature] += 1;

        let left = self.build(best.left, depth + 1);
        let right = self.build(best.right, depth + 1);
        self.nodes[idx] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        idx
    }

    fn find_split(&self, rows: &[usize], g: f64, h: f64) -> Option<BestSplit> {
        let parent = self.score(g, h);
        let mut best: Option<(usize, f64, f64)> = None; // (feature, threshold, gain)
        let mut sorted = rows.to_vec();

        for feature in 0..N_FEATURES {
            sorted.sort_by(|&a, &b| self.x[a][feature].total_cmp(&self.x[b][feature]));

            let mut gl = 0.0;
            let mut hl = 0.0;
            for w in 0..sorted.len() - 1 {
                let i = sorted[w];
                gl += self.grad[i];
                hl += self.hess[i];

                let here = self.x[i][feature];
                let next = self.x[sorted[w + 1]][feature];
                if next <= here {
                    continue;
                }
                let hr = h - hl;
                if hl < self.config.min_child_weight || hr < self.config.min_child_weight {
                    continue;
                }

                let gain = 0.5 * (self.score(gl, hl) + self.score(g - gl, hr) - parent);
                if gain > self.config.min_split_gain && best.map_or(true, |(_, _, b)| gain > b) {
                    let mid = here + (next - here) / 2.0;
                    let threshold = if mid > here { mid } else { next };
                    best = Some((feature, threshold, gain));
                }
            }
        }

        let (feature, threshold, gain) = best?;
        let (left, right): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .copied()
            .partition(|&i| self.x[i][feature] < threshold);
        Some(BestSplit {
            feature,
            threshold,
            gain,
            left,
            right,
        })
    }
}

// ============================================================================
// Model
// ============================================================================

/// Ensemble of boosted regression trees producing a logistic margin
#[derive(Debug, Clone)]
pub struct GradientBoostedClassifier {
    learning_rate: f64,
    trees: Vec<RegressionTree>,
    importances: [f64; N_FEATURES],
}

fn sigmoid(m: f64) -> f64 {
    1.0 / (1.0 + (-m).exp())
}

impl GradientBoostedClassifier {
    /// Fit on feature rows `x` against binary labels `y`.
    ///
    /// Rows are subsampled per tree when `config.subsample < 1.0`, drawing from
    /// a `StdRng` seeded with `seed` (entropy when `None`).
    pub fn fit(
        config: &BoosterConfig,
        x: &[[f64; N_FEATURES]],
        y: &[bool],
        seed: Option<u64>,
    ) -> EstimateResult<Self> {
        if x.is_empty() {
            return Err(EstimateError::Computation("empty training set".to_string()));
        }
        if x.len() != y.len() {
            return Err(EstimateError::Computation(format!(
                "{} feature rows but {} labels",
                x.len(),
                y.len()
            )));
        }
        if x.iter().flatten().any(|v| !v.is_finite()) {
            return Err(EstimateError::Computation(
                "training features contain non-finite values".to_string(),
            ));
        }
        if !(config.subsample > 0.0 && config.subsample <= 1.0) {
            return Err(EstimateError::Computation(format!(
                "subsample must be in (0, 1], got {}",
                config.subsample
            )));
        }

        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        let n = x.len();
        // Base score 0.5 is a zero margin
        let mut margins = vec![0.0; n];
        let mut grad = vec![0.0; n];
        let mut hess = vec![0.0; n];
        let mut trees = Vec::with_capacity(config.n_trees);
        let mut gain_sum = [0.0; N_FEATURES];
        let mut split_count = [0usize; N_FEATURES];

        for _ in 0..config.n_trees {
            for i in 0..n {
                let p = sigmoid(margins[i]);
                grad[i] = p - if y[i] { 1.0 } else { 0.0 };
                hess[i] = (p * (1.0 - p)).max(1e-16);
            }

            let rows: Vec<usize> = if config.subsample < 1.0 {
                let drawn: Vec<usize> = (0..n)
                    .filter(|_| rng.gen::<f64>() < config.subsample)
                    .collect();
                if drawn.is_empty() {
                    vec![rng.gen_range(0..n)]
                } else {
                    drawn
                }
            } else {
                (0..n).collect()
            };

            let mut builder = TreeBuilder {
                config,
                x,
                grad: &grad,
                hess: &hess,
                nodes: Vec::new(),
                gain_sum,
                split_count,
            };
            builder.build(rows, 0);
            gain_sum = builder.gain_sum;
            split_count = builder.split_count;

            let tree = RegressionTree {
                nodes: builder.nodes,
            };
            for (m, row) in margins.iter_mut().zip(x) {
                *m += config.learning_rate * tree.predict(row);
            }
            trees.push(tree);
        }

        // Average gain per split, normalized to sum to one
        let mut importances = [0.0; N_FEATURES];
        for f in 0..N_FEATURES {
            if split_count[f] > 0 {
                importances[f] = gain_sum[f] / split_count[f] as f64;
            }
        }
        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            for v in importances.iter_mut() {
                *v /= total;
            }
        }

        debug!(
            trees = trees.len(),
            rows = n,
            splits = split_count.iter().sum::<usize>(),
            "Fitted gradient-boosted classifier"
        );

        Ok(Self {
            learning_rate: config.learning_rate,
            trees,
            importances,
        })
    }

    pub fn predict_margin(&self, x: &[f64; N_FEATURES]) -> f64 {
        self.trees
            .iter()
            .map(|t| self.learning_rate * t.predict(x))
            .sum()
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl Classifier for GradientBoostedClassifier {
    fn predict_proba(&self, features: &[f64; N_FEATURES]) -> f64 {
        sigmoid(self.predict_margin(features))
    }

    fn feature_importances(&self) -> [f64; N_FEATURES] {
        self.importances
    }
}

/// Default trainer: fixed hyperparameters from `BoosterConfig::default()`
#[derive(Debug, Clone, Default)]
pub struct GradientBoostingTrainer {
    pub config: BoosterConfig,
}

impl Trainer for GradientBoostingTrainer {
    type Model = GradientBoostedClassifier;

    fn fit(&self, train: &[Sample], seed: Option<u64>) -> EstimateResult<Self::Model> {
        let x: Vec<[f64; N_FEATURES]> = train.iter().map(|s| s.features).collect();
        let y: Vec<bool> = train.iter().map(|s| s.label).collect();
        GradientBoostedClassifier::fit(&self.config, &x, &y, seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> BoosterConfig {
        BoosterConfig {
            n_trees: 50,
            learning_rate: 0.3,
            ..Default::default()
        }
    }

    /// Label is positive when column 2 exceeds 0.5; other columns are noise
    fn threshold_data(n: usize) -> (Vec<[f64; N_FEATURES]>, Vec<bool>) {
        let x: Vec<[f64; N_FEATURES]> = (0..n)
            .map(|i| {
                let t = i as f64 / n as f64;
                [
                    ((i * 7) % 13) as f64,
                    ((i * 5) % 11) as f64 / 11.0,
                    (t * 17.0).fract(),
                    -(((i * 3) % 7) as f64),
                    0.25,
                ]
            })
            .collect();
        let y = x.iter().map(|r| r[2] > 0.5).collect();
        (x, y)
    }

    #[test]
    fn test_default_hyperparameters() {
        let cfg = BoosterConfig::default();
        assert_eq!(cfg.n_trees, 200);
        assert_eq!(cfg.learning_rate, 0.02);
        assert_eq!(cfg.max_depth, 5);
    }

    #[test]
    fn test_learns_threshold_rule() {
        let (x, y) = threshold_data(300);
        let model = GradientBoostedClassifier::fit(&small_config(), &x, &y, Some(1)).unwrap();
        let correct = x
            .iter()
            .zip(&y)
            .filter(|(r, label)| model.predict(r) == **label)
            .count();
        assert!(correct as f64 / x.len() as f64 > 0.95, "accuracy too low: {}", correct);

        let imps = model.feature_importances();
        let top = (0..N_FEATURES)
            .max_by(|&a, &b| imps[a].total_cmp(&imps[b]))
            .unwrap();
        assert_eq!(top, 2, "informative column should dominate: {:?}", imps);
        assert!((imps.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        // Constant column can never be split on
        assert_eq!(imps[4], 0.0);
    }

    #[test]
    fn test_all_negative_labels_push_probability_down() {
        let (x, _) = threshold_data(300);
        let y = vec![false; x.len()];
        let model =
            GradientBoostedClassifier::fit(&BoosterConfig::default(), &x, &y, Some(3)).unwrap();
        let p = model.predict_proba(&x[0]);
        assert!(p < 0.05, "probability should be near zero, got {}", p);
        assert_eq!(model.feature_importances(), [0.0; N_FEATURES]);
        assert_eq!(model.n_trees(), 200);
    }

    #[test]
    fn test_probabilities_in_unit_interval() {
        let (x, y) = threshold_data(200);
        let model = GradientBoostedClassifier::fit(&small_config(), &x, &y, Some(9)).unwrap();
        for row in &x {
            let p = model.predict_proba(row);
            assert!((0.0..=1.0).contains(&p));
        }
    }

    #[test]
    fn test_same_seed_same_model_with_subsampling() {
        let (x, y) = threshold_data(200);
        let cfg = BoosterConfig {
            subsample: 0.7,
            ..small_config()
        };
        let a = GradientBoostedClassifier::fit(&cfg, &x, &y, Some(42)).unwrap();
        let b = GradientBoostedClassifier::fit(&cfg, &x, &y, Some(42)).unwrap();
        for row in &x {
            assert_eq!(a.predict_proba(row), b.predict_proba(row));
        }
    }

    #[test]
    fn test_rejects_bad_input() {
        let cfg = small_config();
        assert!(GradientBoostedClassifier::fit(&cfg, &[], &[], Some(0)).is_err());
        assert!(
            GradientBoostedClassifier::fit(&cfg, &[[0.0; N_FEATURES]], &[true, false], Some(0))
                .is_err()
        );
        let bad = [[f64::NAN, 0.0, 0.0, 0.0, 0.0]];
        assert!(GradientBoostedClassifier::fit(&cfg, &bad, &[true], Some(0)).is_err());
        let zero_sub = BoosterConfig {
            subsample: 0.0,
            ..cfg
        };
        assert!(
            GradientBoostedClassifier::fit(&zero_sub, &[[0.0; N_FEATURES]], &[true], Some(0))
                .is_err()
        );
    }

    #[test]
    fn test_trees_respect_max_depth() {
        let (x, y) = threshold_data(300);
        let cfg = BoosterConfig {
            n_trees: 5,
            max_depth: 2,
            learning_rate: 0.3,
            ..Default::default()
        };
        let model = GradientBoostedClassifier::fit(&cfg, &x, &y, Some(5)).unwrap();
        for tree in &model.trees {
            // A depth-2 binary tree has at most 7 nodes
            assert!(tree.nodes.len() <= 7);
        }
    }
}
