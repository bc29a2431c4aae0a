//! Binarized training data with the derived structures the solver needs:
//! row and column bitmask views, per-target cost scalars, the majority mask
//! over feature-row equivalence classes, subset projection and the pairwise
//! similar-support distance.
//!
//! A `Dataset` is immutable after construction.

use std::fs;
use std::path::Path;

use log::debug;
use rustc_hash::FxHashMap;

use crate::bitset::Bitset;
use crate::config::Configuration;
use crate::error::{Result, TreeboundError};
use crate::matrix::Matrix;

/// Per-capture-set summary produced by [`Dataset::summary_statistics`].
#[derive(Debug, Clone, Copy)]
pub struct SummaryStatistics {
    /// Akaike-style information of the captured target distribution.
    pub information: f32,
    /// Maximum achievable per-row cost reduction if every captured row
    /// could be reclassified independently.
    pub potential: f32,
    /// Loss of the best single-leaf prediction on the captured rows.
    pub max_loss: f32,
    /// Lower bound on the achievable loss. Uses the reference model when
    /// one is present, otherwise equals `guaranteed_min_loss`.
    pub min_loss: f32,
    /// Equivalent-point lower bound. Never uses the reference model, so it
    /// remains provable when `min_loss` is a guess.
    pub guaranteed_min_loss: f32,
    /// The label realizing `max_loss`.
    pub optimal_target: usize,
}

pub struct Dataset {
    pub config: Configuration,
    n_rows: usize,
    n_features: usize,
    n_targets: usize,

    row_view_features: Vec<Bitset>,
    row_view_targets: Vec<Bitset>,
    col_view_features: Vec<Bitset>,
    col_view_targets: Vec<Bitset>,

    /// Row `i` is set iff its target equals the cost-minimizing label of
    /// its feature-row equivalence class.
    majority: Bitset,

    cost_matrix: Matrix<f32>,
    diff_costs: Vec<f32>,
    match_costs: Vec<f32>,
    mismatch_costs: Vec<f32>,

    reference_targets: Option<Vec<Bitset>>,

    /// Original feature index -> binarized feature indices derived from it.
    feature_map: Vec<Vec<usize>>,
}

impl Dataset {
    /// Builds a dataset from a boolean matrix laid out `[N x (F + T)]`
    /// (features first, then one-hot targets), a `T x T` cost matrix and
    /// the original-to-binarized feature map. An optional `[N x T]` matrix
    /// of reference-model predictions enables the reference lower bound.
    pub fn new(
        config: Configuration,
        input: &Matrix<bool>,
        costs: &Matrix<f32>,
        feature_map: Vec<Vec<usize>>,
        reference: Option<&Matrix<bool>>,
    ) -> Result<Self> {
        if costs.n_rows() != costs.n_columns() || costs.n_rows() == 0 {
            return Err(TreeboundError::invalid("the cost matrix must be square and non-empty"));
        }
        if input.n_columns() <= costs.n_rows() {
            return Err(TreeboundError::invalid("the dataset has no feature columns"));
        }
        if input.n_rows() == 0 {
            return Err(TreeboundError::invalid("the dataset has no rows"));
        }

        let n_rows = input.n_rows();
        let n_targets = costs.n_rows();
        let n_features = input.n_columns() - n_targets;

        if let Some(reference) = reference {
            if reference.n_rows() != n_rows || reference.n_columns() != n_targets {
                return Err(TreeboundError::invalid(
                    "the reference matrix must be [rows x targets] to match the dataset",
                ));
            }
        }

        let mut dataset = Dataset {
            config,
            n_rows,
            n_features,
            n_targets,
            row_view_features: Vec::new(),
            row_view_targets: Vec::new(),
            col_view_features: Vec::new(),
            col_view_targets: Vec::new(),
            majority: Bitset::new(n_rows, false),
            cost_matrix: costs.clone(),
            diff_costs: Vec::new(),
            match_costs: Vec::new(),
            mismatch_costs: Vec::new(),
            reference_targets: None,
            feature_map,
        };

        dataset.construct_bitmasks(input);
        dataset.construct_cost_scalars(costs);
        dataset.construct_majority()?;
        if let Some(reference) = reference {
            dataset.construct_reference_bitmasks(reference);
        }

        debug!(
            "dataset: {} rows, {} features, {} targets, reference={}",
            dataset.n_rows,
            dataset.n_features,
            dataset.n_targets,
            dataset.reference_targets.is_some()
        );
        Ok(dataset)
    }

    #[inline(always)]
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    #[inline(always)]
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    #[inline(always)]
    pub fn n_targets(&self) -> usize {
        self.n_targets
    }

    pub fn has_reference(&self) -> bool {
        self.reference_targets.is_some()
    }

    pub fn majority(&self) -> &Bitset {
        &self.majority
    }

    pub fn row_features(&self, row: usize) -> &Bitset {
        &self.row_view_features[row]
    }

    pub fn cost(&self, predicted: usize, truth: usize) -> f32 {
        self.cost_matrix.at(predicted, truth)
    }

    /// Summarizes the rows selected by `capture_set`. `work` must be an
    /// `n_rows`-sized scratch bitset.
    pub fn summary_statistics(&self, capture_set: &Bitset, work: &mut Bitset) -> SummaryStatistics {
        let support = capture_set.count() as f32 / self.n_rows as f32;

        // Captured distribution over targets.
        let mut distribution = vec![0usize; self.n_targets];
        for (target, column) in self.col_view_targets.iter().enumerate() {
            work.copy_from(capture_set);
            work.and(column);
            distribution[target] = work.count();
        }

        // Loss incurred if the capture set is left unsplit and classified
        // by its cost-minimizing label.
        let mut max_loss = f32::MAX;
        let mut optimal_target = 0usize;
        for predicted in 0..self.n_targets {
            let mut cost = 0.0f32;
            for (truth, &count) in distribution.iter().enumerate() {
                cost += self.cost_matrix.at(predicted, truth) * count as f32;
            }
            if cost < max_loss {
                max_loss = cost;
                optimal_target = predicted;
            }
        }

        let mut guaranteed_min_loss = 0.0f32;
        let mut potential = 0.0f32;
        let mut information = 0.0f32;
        for target in 0..self.n_targets {
            potential += self.diff_costs[target] * distribution[target] as f32;

            // Captured majority points with this label keep their match
            // cost even in the best split.
            work.copy_from(capture_set);
            work.and(&self.majority);
            work.and(&self.col_view_targets[target]);
            guaranteed_min_loss += self.match_costs[target] * work.count() as f32;

            // Captured minority points are misclassified by every
            // equivalence-respecting model.
            work.copy_from(capture_set);
            work.and_not(&self.majority);
            work.and(&self.col_view_targets[target]);
            guaranteed_min_loss += self.mismatch_costs[target] * work.count() as f32;

            if distribution[target] > 0 {
                let count = distribution[target] as f32;
                information += support * count * (count.ln() - support.ln());
            }
        }

        // Floating point rounding can push the equivalent-point loss just
        // past max_loss; restore the invariant.
        guaranteed_min_loss = guaranteed_min_loss.min(max_loss);

        let mut min_loss = guaranteed_min_loss;
        if let Some(reference_targets) = &self.reference_targets {
            min_loss = 0.0;
            for target in 0..self.n_targets {
                work.copy_from(capture_set);
                work.and(&self.col_view_targets[target]);
                work.and(&reference_targets[target]);
                min_loss += self.match_costs[target] * work.count() as f32;

                work.copy_from(capture_set);
                work.and(&self.col_view_targets[target]);
                work.and_not(&reference_targets[target]);
                min_loss += self.mismatch_costs[target] * work.count() as f32;
            }
        }

        SummaryStatistics {
            information,
            potential,
            max_loss,
            min_loss,
            guaranteed_min_loss,
            optimal_target,
        }
    }

    /// Restricts `capture_set` to the rows on one side of a feature split.
    #[inline]
    pub fn subset_inplace(&self, capture_set: &mut Bitset, feature_index: usize, positive: bool) {
        if positive {
            capture_set.and(&self.col_view_features[feature_index]);
        } else {
            capture_set.and_not(&self.col_view_features[feature_index]);
        }
    }

    /// Symmetric bound-transfer distance between features `i` and `j`
    /// restricted to `capture_set`.
    pub fn distance(&self, capture_set: &Bitset, i: usize, j: usize, work: &mut Bitset) -> f32 {
        let mut positive = 0.0f32;
        let mut negative = 0.0f32;
        for target in 0..self.n_targets {
            work.copy_from(&self.col_view_features[i]);
            work.xor(&self.col_view_features[j]);
            work.and(capture_set);
            work.and(&self.col_view_targets[target]);
            positive += self.diff_costs[target] * work.count() as f32;

            work.copy_from(&self.col_view_features[i]);
            work.xnor(&self.col_view_features[j]);
            work.and(capture_set);
            work.and(&self.col_view_targets[target]);
            negative += self.diff_costs[target] * work.count() as f32;
        }
        positive.min(negative)
    }

    /// Maps a binarized feature index back to the original feature it was
    /// derived from.
    pub fn original_feature(&self, binarized_feature: usize) -> Result<usize> {
        for (original, binarized_set) in self.feature_map.iter().enumerate() {
            if binarized_set.contains(&binarized_feature) {
                return Ok(original);
            }
        }
        Err(TreeboundError::integrity(
            "Dataset::original_feature",
            format!("binarized feature {} has no entry in the feature map", binarized_feature),
        ))
    }

    // --- Construction helpers ---

    fn construct_bitmasks(&mut self, input: &Matrix<bool>) {
        self.row_view_features = (0..self.n_rows).map(|_| Bitset::new(self.n_features, false)).collect();
        self.row_view_targets = (0..self.n_rows).map(|_| Bitset::new(self.n_targets, false)).collect();
        self.col_view_features = (0..self.n_features).map(|_| Bitset::new(self.n_rows, false)).collect();
        self.col_view_targets = (0..self.n_targets).map(|_| Bitset::new(self.n_rows, false)).collect();

        for row in 0..self.n_rows {
            for column in 0..self.n_features {
                if input.at(row, column) {
                    self.row_view_features[row].set(column, true);
                    self.col_view_features[column].set(row, true);
                }
            }
            for target in 0..self.n_targets {
                if input.at(row, self.n_features + target) {
                    self.row_view_targets[row].set(target, true);
                    self.col_view_targets[target].set(row, true);
                }
            }
        }
    }

    fn construct_cost_scalars(&mut self, costs: &Matrix<f32>) {
        self.diff_costs = vec![0.0; self.n_targets];
        self.match_costs = vec![0.0; self.n_targets];
        self.mismatch_costs = vec![f32::MAX; self.n_targets];

        for truth in 0..self.n_targets {
            let mut max_cost = f32::MIN;
            let mut min_cost = f32::MAX;
            for predicted in 0..self.n_targets {
                let cost = costs.at(predicted, truth);
                max_cost = max_cost.max(cost);
                min_cost = min_cost.min(cost);
                if predicted == truth {
                    self.match_costs[truth] = cost;
                } else {
                    self.mismatch_costs[truth] = self.mismatch_costs[truth].min(cost);
                }
            }
            self.diff_costs[truth] = max_cost - min_cost;
        }
    }

    /// Rows with identical feature vectors form an equivalence class; the
    /// class majority is the label minimizing total cost over the class's
    /// target distribution.
    fn construct_majority(&mut self) -> Result<()> {
        let mut class_distributions: FxHashMap<&Bitset, Vec<usize>> = FxHashMap::default();
        for row in 0..self.n_rows {
            let distribution = class_distributions
                .entry(&self.row_view_features[row])
                .or_insert_with(|| vec![0usize; self.n_targets]);
            for target in 0..self.n_targets {
                if self.row_view_targets[row].get(target) {
                    distribution[target] += 1;
                }
            }
        }

        let mut minimizers: FxHashMap<&Bitset, usize> = FxHashMap::default();
        for (&id, distribution) in &class_distributions {
            let mut min_cost = f32::MAX;
            let mut minimizer = 0usize;
            for predicted in 0..self.n_targets {
                let mut cost = 0.0f32;
                for (truth, &count) in distribution.iter().enumerate() {
                    cost += self.cost_matrix.at(predicted, truth) * count as f32;
                }
                if cost < min_cost {
                    min_cost = cost;
                    minimizer = predicted;
                }
            }
            minimizers.insert(id, minimizer);
        }

        debug!("majority: {} feature-row equivalence classes", minimizers.len());

        let mut majority = Bitset::new(self.n_rows, false);
        for row in 0..self.n_rows {
            let empirical = self.row_view_targets[row].scan(0, true);
            if empirical >= self.n_targets {
                return Err(TreeboundError::invalid(format!(
                    "dataset row {} contains no target value",
                    row
                )));
            }
            let minimizer = minimizers[&self.row_view_features[row]];
            majority.set(row, minimizer == empirical);
        }
        self.majority = majority;
        Ok(())
    }

    fn construct_reference_bitmasks(&mut self, reference: &Matrix<bool>) {
        let mut columns: Vec<Bitset> = (0..self.n_targets).map(|_| Bitset::new(self.n_rows, false)).collect();
        for target in 0..self.n_targets {
            for row in 0..self.n_rows {
                if reference.at(row, target) {
                    columns[target].set(row, true);
                }
            }
        }
        self.reference_targets = Some(columns);
    }

    // --- Serialization ---

    /// Writes the dataset in the `dataset.bin` text layout: input matrix,
    /// cost matrix, a reference flag, the optional reference matrix, then
    /// one line of binarized indices per original feature.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut input = Matrix::<bool>::new(self.n_rows, self.n_features + self.n_targets);
        for row in 0..self.n_rows {
            for column in 0..self.n_features {
                input.set(row, column, self.row_view_features[row].get(column));
            }
            for target in 0..self.n_targets {
                input.set(row, self.n_features + target, self.row_view_targets[row].get(target));
            }
        }

        let mut text = String::new();
        input.write_text(&mut text);
        self.cost_matrix.write_text(&mut text);
        match &self.reference_targets {
            Some(reference_targets) => {
                text.push_str("1\n");
                let mut reference = Matrix::<bool>::new(self.n_rows, self.n_targets);
                for (target, column) in reference_targets.iter().enumerate() {
                    for row in 0..self.n_rows {
                        reference.set(row, target, column.get(row));
                    }
                }
                reference.write_text(&mut text);
            }
            None => text.push_str("0\n"),
        }
        for binarized_set in &self.feature_map {
            for feature in binarized_set {
                text.push_str(&format!("{} ", feature));
            }
            text.push('\n');
        }

        fs::write(path, text)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(config: Configuration, path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let mut tokens = Tokenizer { rest: &text };

        let input = Matrix::<bool>::read_text(&mut tokens)?;
        let costs = Matrix::<f32>::read_text(&mut tokens)?;
        let has_reference = match tokens.next() {
            Some("1") => true,
            Some("0") => false,
            other => {
                return Err(TreeboundError::Parse(format!(
                    "expected reference flag 0 or 1, found {:?}",
                    other
                )))
            }
        };
        let reference = if has_reference { Some(Matrix::<bool>::read_text(&mut tokens)?) } else { None };

        let mut feature_map = Vec::new();
        for line in tokens.rest.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let mut binarized_set = Vec::new();
            for token in line.split_whitespace() {
                let feature: usize = token
                    .parse()
                    .map_err(|e| TreeboundError::Parse(format!("bad feature index {:?}: {}", token, e)))?;
                binarized_set.push(feature);
            }
            feature_map.push(binarized_set);
        }

        Dataset::new(config, &input, &costs, feature_map, reference.as_ref())
    }
}

/// Whitespace tokenizer that exposes the unconsumed remainder, so the
/// line-structured feature map can be parsed after the token-structured
/// matrices.
struct Tokenizer<'a> {
    rest: &'a str,
}

impl<'a> Iterator for Tokenizer<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let trimmed = self.rest.trim_start();
        if trimmed.is_empty() {
            self.rest = trimmed;
            return None;
        }
        let end = trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
        let (token, rest) = trimmed.split_at(end);
        self.rest = rest;
        Some(token)
    }
}
