//! Random forest regression

use crate::TrainingError;
use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Tree node stored in a flat arena
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Regression tree grown with the variance-reduction (MSE) criterion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
    n_features: usize,
    /// Total impurity decrease per feature
    importances: Vec<f64>,
}

struct PendingNode {
    slot: usize,
    indices: Vec<usize>,
    depth: usize,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl RegressionTree {
    /// Grow a tree over the given (possibly repeated) sample indices
    pub fn fit(
        x: &Array2<f64>,
        y: &Array1<f64>,
        indices: Vec<usize>,
        max_depth: Option<usize>,
        min_samples_leaf: usize,
    ) -> Self {
        let n_features = x.ncols();
        let min_samples_leaf = min_samples_leaf.max(1);
        let mut nodes = vec![Node::Leaf { value: 0.0 }];
        let mut importances = vec![0.0; n_features];

        // Iterative growth keeps deep trees off the call stack
        let mut pending = vec![PendingNode {
            slot: 0,
            indices,
            depth: 0,
        }];

        while let Some(PendingNode { slot, indices, depth }) = pending.pop() {
            let n = indices.len();
            let sum: f64 = indices.iter().map(|&i| y[i]).sum();
            let mean = if n > 0 { sum / n as f64 } else { 0.0 };

            let depth_reached = max_depth.map_or(false, |d| depth >= d);
            let split = if depth_reached || n < 2 * min_samples_leaf {
                None
            } else {
                find_best_split(x, y, &indices, sum, min_samples_leaf)
            };

            let Some(split) = split else {
                nodes[slot] = Node::Leaf { value: mean };
                continue;
            };

            importances[split.feature] += split.gain;

            let (left, right): (Vec<usize>, Vec<usize>) = indices
                .into_iter()
                .partition(|&i| x[[i, split.feature]] <= split.threshold);

            let left_slot = nodes.len();
            nodes.push(Node::Leaf { value: 0.0 });
            let right_slot = nodes.len();
            nodes.push(Node::Leaf { value: 0.0 });

            nodes[slot] = Node::Split {
                feature: split.feature,
                threshold: split.threshold,
                left: left_slot,
                right: right_slot,
            };

            pending.push(PendingNode {
                slot: right_slot,
                indices: right,
                depth: depth + 1,
            });
            pending.push(PendingNode {
                slot: left_slot,
                indices: left,
                depth: depth + 1,
            });
        }

        Self {
            nodes,
            n_features,
            importances,
        }
    }

    /// Predict a single row
    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Check that every split reads a feature below `n_features` and
    /// points forward to nodes inside the arena.
    ///
    /// Children are always appended after their parent, so a forward-only
    /// arena cannot loop during prediction.
    pub fn check_structure(&self, n_features: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        if self.n_features != n_features || self.importances.len() != n_features {
            return Err(format!(
                "tree fitted on {} features ({} importances), expected {}",
                self.n_features,
                self.importances.len(),
                n_features
            ));
        }
        for (idx, node) in self.nodes.iter().enumerate() {
            if let Node::Split {
                feature,
                left,
                right,
                ..
            } = node
            {
                if *feature >= n_features {
                    return Err(format!(
                        "node {} splits on feature {} of {}",
                        idx, feature, n_features
                    ));
                }
                for child in [*left, *right] {
                    if child <= idx || child >= self.nodes.len() {
                        return Err(format!(
                            "node {} points to node {} of {}",
                            idx,
                            child,
                            self.nodes.len()
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Scan every feature in sorted order for the split with the largest
/// reduction in squared error. Ties keep the lowest feature index.
fn find_best_split(
    x: &Array2<f64>,
    y: &Array1<f64>,
    indices: &[usize],
    total_sum: f64,
    min_samples_leaf: usize,
) -> Option<BestSplit> {
    let n = indices.len();
    let parent_score = total_sum * total_sum / n as f64;
    let mut best: Option<BestSplit> = None;
    let mut sorted = indices.to_vec();

    for feature in 0..x.ncols() {
        sorted.sort_by(|&a, &b| x[[a, feature]].total_cmp(&x[[b, feature]]));

        let mut left_sum = 0.0;
        for k in 1..n {
            left_sum += y[sorted[k - 1]];

            let prev = x[[sorted[k - 1], feature]];
            let next = x[[sorted[k], feature]];
            if prev >= next || k < min_samples_leaf || n - k < min_samples_leaf {
                continue;
            }

            let right_sum = total_sum - left_sum;
            let score = left_sum * left_sum / k as f64 + right_sum * right_sum / (n - k) as f64;
            let gain = score - parent_score;

            if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                let mut threshold = prev + (next - prev) / 2.0;
                if threshold >= next {
                    threshold = prev;
                }
                best = Some(BestSplit {
                    feature,
                    threshold,
                    gain,
                });
            }
        }
    }

    best
}

/// Bagged ensemble of regression trees
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestRegressor {
    trees: Vec<RegressionTree>,
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_leaf: usize,
    pub seed: u64,
    n_features: usize,
}

impl RandomForestRegressor {
    /// Create an unfitted forest
    pub fn new(n_estimators: usize, seed: u64) -> Self {
        Self {
            trees: Vec::new(),
            n_estimators: n_estimators.max(1),
            max_depth: None,
            min_samples_leaf: 1,
            seed,
            n_features: 0,
        }
    }

    /// Set maximum depth
    pub fn with_max_depth(mut self, depth: Option<usize>) -> Self {
        self.max_depth = depth;
        self
    }

    /// Set minimum samples in leaf
    pub fn with_min_samples_leaf(mut self, min_samples: usize) -> Self {
        self.min_samples_leaf = min_samples.max(1);
        self
    }

    /// Fit the forest. Tree `i` uses a bootstrap sample drawn from
    /// `seed + i`, so the result does not depend on thread scheduling.
    pub fn fit(mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<Self, TrainingError> {
        let n_samples = x.nrows();
        if n_samples != y.len() {
            return Err(TrainingError::Shape {
                expected: n_samples,
                actual: y.len(),
            });
        }
        if n_samples == 0 {
            return Err(TrainingError::InsufficientSamples {
                required: 1,
                actual: 0,
            });
        }

        let max_depth = self.max_depth;
        let min_samples_leaf = self.min_samples_leaf;
        let base_seed = self.seed;

        self.trees = (0..self.n_estimators)
            .into_par_iter()
            .map(|tree_idx| {
                let mut rng = ChaCha8Rng::seed_from_u64(base_seed.wrapping_add(tree_idx as u64));
                let sample: Vec<usize> = (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect();
                RegressionTree::fit(x, y, sample, max_depth, min_samples_leaf)
            })
            .collect();
        self.n_features = x.ncols();

        debug!(
            "Fitted forest: {} trees, {} nodes total",
            self.trees.len(),
            self.trees.iter().map(RegressionTree::node_count).sum::<usize>()
        );
        Ok(self)
    }

    /// Mean of the per-tree predictions
    pub fn predict_row(&self, row: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>() / self.trees.len() as f64
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Validate every tree against the forest's feature width
    pub fn check_structure(&self) -> Result<(), String> {
        if self.trees.is_empty() {
            return Err("forest has no trees".to_string());
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.check_structure(self.n_features)
                .map_err(|reason| format!("tree {}: {}", i, reason))?;
        }
        Ok(())
    }

    /// Impurity-decrease importances, normalized per tree and averaged
    pub fn feature_importances(&self) -> Vec<f64> {
        let mut importances = vec![0.0; self.n_features];
        if self.trees.is_empty() {
            return importances;
        }
        for tree in &self.trees {
            let total: f64 = tree.importances.iter().sum();
            if total > 0.0 {
                for (acc, imp) in importances.iter_mut().zip(&tree.importances) {
                    *acc += imp / total;
                }
            }
        }
        let n_trees = self.trees.len() as f64;
        importances.iter_mut().for_each(|v| *v /= n_trees);
        importances
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_data() -> (Array2<f64>, Array1<f64>) {
        // y depends only on the first feature
        let x = Array2::from_shape_fn((60, 2), |(r, c)| if c == 0 { r as f64 } else { (r % 7) as f64 });
        let y = Array1::from_shape_fn(60, |r| if r < 30 { 1.0 } else { 5.0 });
        (x, y)
    }

    #[test]
    fn test_tree_learns_step() {
        let (x, y) = step_data();
        let tree = RegressionTree::fit(&x, &y, (0..60).collect(), None, 1);

        assert_eq!(tree.predict_row(&[5.0, 0.0]), 1.0);
        assert_eq!(tree.predict_row(&[50.0, 0.0]), 5.0);
        assert!(tree.importances[0] > 0.0);
        assert_eq!(tree.importances[1], 0.0);
    }

    #[test]
    fn test_max_depth_zero_is_mean() {
        let (x, y) = step_data();
        let tree = RegressionTree::fit(&x, &y, (0..60).collect(), Some(0), 1);
        assert_eq!(tree.node_count(), 1);
        assert!((tree.predict_row(&[0.0, 0.0]) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_forest_is_deterministic() {
        let (x, y) = step_data();
        let a = RandomForestRegressor::new(8, 42).fit(&x, &y).unwrap();
        let b = RandomForestRegressor::new(8, 42).fit(&x, &y).unwrap();

        assert_eq!(a, b);
        assert_eq!(a.predict_row(&[12.0, 3.0]), b.predict_row(&[12.0, 3.0]));
    }

    #[test]
    fn test_forest_importances() {
        let (x, y) = step_data();
        let forest = RandomForestRegressor::new(10, 7).fit(&x, &y).unwrap();
        let importances = forest.feature_importances();

        assert!((importances.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(importances[0] > importances[1]);
        assert!(forest.predict_row(&[55.0, 1.0]) > 4.0);
    }

    #[test]
    fn test_fitted_forest_is_well_formed() {
        let (x, y) = step_data();
        let forest = RandomForestRegressor::new(4, 1).fit(&x, &y).unwrap();
        assert!(forest.check_structure().is_ok());
        assert!(RandomForestRegressor::new(4, 1).check_structure().is_err());
    }

    #[test]
    fn test_damaged_tree_is_rejected() {
        let (x, y) = step_data();
        let tree = RegressionTree::fit(&x, &y, (0..60).collect(), Some(2), 1);
        assert!(tree.check_structure(2).is_ok());
        assert!(tree.check_structure(1).is_err());

        let mut bad_feature = tree.clone();
        bad_feature.nodes[0] = Node::Split {
            feature: 9,
            threshold: 0.0,
            left: 1,
            right: 2,
        };
        assert!(bad_feature.check_structure(2).unwrap_err().contains("feature 9"));

        let mut dangling = tree.clone();
        let len = dangling.nodes.len();
        dangling.nodes[0] = Node::Split {
            feature: 0,
            threshold: 0.0,
            left: 1,
            right: len,
        };
        assert!(dangling.check_structure(2).is_err());

        let mut cycle = tree;
        cycle.nodes[0] = Node::Split {
            feature: 0,
            threshold: 0.0,
            left: 0,
            right: 1,
        };
        assert!(cycle.check_structure(2).is_err());
    }
}
