//! Per-subproblem state for the dynamic program: the captured rows, the
//! still-active features, objective bounds and the scope bookkeeping used
//! by the look-ahead pruning.

use crate::bitset::Bitset;
use crate::config::Configuration;
use crate::dataset::Dataset;
use crate::error::{Result, TreeboundError};

/// Feature permutation recorded for equivalence discovery. Empty means the
/// identity ordering.
pub type Translation = Vec<i32>;

#[derive(Debug, Clone)]
pub struct Task {
    capture_set: Bitset,
    feature_set: Bitset,
    order: Translation,

    support: f32,
    base_objective: f32,
    information: f32,

    lowerbound: f32,
    upperbound: f32,

    /// Provable lower bound. Differs from `lowerbound` only while the
    /// reference-model bound is active, because reference-derived bounds
    /// can overestimate.
    guaranteed_lowerbound: f32,

    lowerscope: f32,
    upperscope: f32,
    coverage: f32,

    optimal_feature: i32,
}

impl Task {
    /// Builds the subproblem for `capture_set`, classifying it as
    /// certainly-leaf, must-be-leaf or open and seeding the bounds
    /// accordingly. `work` must be an `n_rows`-sized scratch bitset.
    pub fn new(
        capture_set: Bitset,
        feature_set: Bitset,
        dataset: &Dataset,
        work: &mut Bitset,
    ) -> Result<Self> {
        let regularization = dataset.config.regularization;
        let structurally_terminal = capture_set.count() <= 1 || feature_set.empty();
        let stats = dataset.summary_statistics(&capture_set, work);

        // The base objective is the cost of not splitting: the best
        // single-leaf loss plus one leaf of penalty.
        let base_objective = stats.max_loss + regularization;

        // Any tree beating the base objective needs at least two leaves,
        // hence the 2x penalty on the minimum loss.
        let lowerbound = base_objective.min(stats.min_loss + 2.0 * regularization);
        let guaranteed_lowerbound =
            base_objective.min(stats.guaranteed_min_loss + 2.0 * regularization);

        let mut task = Task {
            support: capture_set.count() as f32 / dataset.n_rows() as f32,
            capture_set,
            feature_set,
            order: Translation::new(),
            base_objective,
            information: stats.information,
            lowerbound,
            upperbound: base_objective,
            guaranteed_lowerbound,
            lowerscope: f32::MIN,
            upperscope: f32::MAX,
            coverage: f32::MIN,
            optimal_feature: -1,
        };

        let depth_exhausted =
            dataset.config.uses_depth_budget() && task.capture_set.depth_budget() == 1;

        if (1.0 - stats.min_loss < regularization)
            || (stats.potential < 2.0 * regularization && 1.0 - stats.max_loss < regularization)
        {
            // Provably not part of any optimal tree: insufficient headroom
            // to improve by splitting.
            task.lowerbound = task.base_objective;
            task.upperbound = task.base_objective;
            task.feature_set.clear();
        } else if stats.max_loss - stats.min_loss < regularization
            || stats.potential < 2.0 * regularization
            || structurally_terminal
            || depth_exhausted
        {
            // Provably not an internal node of any optimal tree.
            task.lowerbound = task.base_objective;
            task.upperbound = task.base_objective;
            task.feature_set.clear();
        }

        if task.lowerbound > task.upperbound {
            return Err(TreeboundError::integrity(
                "Task::new",
                format!("invalid bounds [{}, {}]", task.lowerbound, task.upperbound),
            ));
        }
        Ok(task)
    }

    #[inline(always)]
    pub fn support(&self) -> f32 {
        self.support
    }

    #[inline(always)]
    pub fn information(&self) -> f32 {
        self.information
    }

    #[inline(always)]
    pub fn base_objective(&self) -> f32 {
        self.base_objective
    }

    #[inline(always)]
    pub fn lowerbound(&self) -> f32 {
        self.lowerbound
    }

    #[inline(always)]
    pub fn upperbound(&self) -> f32 {
        self.upperbound
    }

    /// Remaining optimality gap of this subproblem.
    #[inline(always)]
    pub fn uncertainty(&self) -> f32 {
        (self.upperbound - self.lowerbound).max(0.0)
    }

    /// The lower bound stripped of reference-model guesses, safe to use
    /// where a provable bound is required.
    #[inline]
    pub fn guaranteed_lowerbound(&self, config: &Configuration) -> f32 {
        if config.reference_lb {
            self.guaranteed_lowerbound
        } else {
            self.lowerbound
        }
    }

    #[inline(always)]
    pub fn lowerscope(&self) -> f32 {
        self.lowerscope
    }

    #[inline(always)]
    pub fn upperscope(&self) -> f32 {
        self.upperscope
    }

    #[inline(always)]
    pub fn coverage(&self) -> f32 {
        self.coverage
    }

    #[inline(always)]
    pub fn set_coverage(&mut self, coverage: f32) {
        self.coverage = coverage;
    }

    pub fn capture_set(&self) -> &Bitset {
        &self.capture_set
    }

    pub fn feature_set(&self) -> &Bitset {
        &self.feature_set
    }

    pub fn order(&self) -> &Translation {
        &self.order
    }

    #[inline(always)]
    pub fn optimal_feature(&self) -> i32 {
        self.optimal_feature
    }

    /// Widens the scope interval with a new exploration scope. Zero is the
    /// unscoped sentinel and is ignored.
    pub fn scope(&mut self, new_scope: f32) {
        if new_scope == 0.0 {
            return;
        }
        let new_scope = new_scope.max(0.0);
        self.upperscope =
            if self.upperscope == f32::MAX { new_scope } else { self.upperscope.max(new_scope) };
        self.lowerscope =
            if self.lowerscope == f32::MIN { new_scope } else { self.lowerscope.min(new_scope) };
    }

    pub fn prune_feature(&mut self, feature: usize) {
        self.feature_set.set(feature, false);
    }

    /// Tightens the bounds with values derived from the split bounds.
    /// Returns whether the incoming values differ from the stored ones.
    pub fn update(
        &mut self,
        config: &Configuration,
        lower: f32,
        upper: f32,
        optimal_feature: i32,
    ) -> bool {
        let change = lower != self.lowerbound || upper != self.upperbound;
        self.lowerbound = self.lowerbound.max(lower);
        self.upperbound = self.upperbound.min(upper);
        self.lowerbound = self.lowerbound.min(self.upperbound);

        self.optimal_feature = optimal_feature;

        if (config.cancellation && 1.0 - self.lowerbound < 0.0)
            || self.upperbound - self.lowerbound <= f32::EPSILON
        {
            self.lowerbound = self.upperbound;
        }
        change
    }

    /// Generates the child task for every surviving split of every active
    /// feature into `neighbourhood` (slot `2j` holds the negative side,
    /// `2j + 1` the positive side). Features whose split leaves one side
    /// empty or unchanged are pruned instead.
    pub fn create_children(
        &mut self,
        dataset: &Dataset,
        neighbourhood: &mut [Option<Task>],
        buffer: &mut Bitset,
        work: &mut Bitset,
    ) -> Result<()> {
        let using_depth_budget = self.capture_set.depth_budget() != 0;
        let features: Vec<usize> = self.feature_set.iter_set().collect();
        for j in features {
            let mut skip = false;
            for side in 0..2 {
                buffer.copy_from(&self.capture_set);
                dataset.subset_inplace(buffer, j, side == 1);
                if using_depth_budget {
                    // Children live one level below their parent.
                    buffer.set_depth_budget(buffer.depth_budget() - 1);
                }
                if buffer.empty() || *buffer == self.capture_set {
                    skip = true;
                    continue;
                }
                let child = Task::new(buffer.clone(), self.feature_set.clone(), dataset, work)?;
                neighbourhood[2 * j + side] = Some(child);
            }
            if skip {
                self.prune_feature(j);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testdata;

    fn work(dataset: &Dataset) -> Bitset {
        Bitset::new(dataset.n_rows(), false)
    }

    #[test]
    fn open_task_bounds() {
        let dataset = testdata::xor_dataset(testdata::config(0.01));
        let mut work = work(&dataset);
        let task = Task::new(
            Bitset::new(4, true),
            Bitset::new(2, true),
            &dataset,
            &mut work,
        )
        .unwrap();

        // max_loss 0.5 plus one leaf of penalty.
        assert!((task.base_objective() - 0.51).abs() < 1e-6);
        assert!((task.upperbound() - 0.51).abs() < 1e-6);
        // min_loss 0 plus two leaves of penalty.
        assert!((task.lowerbound() - 0.02).abs() < 1e-6);
        assert!(task.lowerbound() <= task.upperbound());
        assert!(task.upperbound() <= task.base_objective() + f32::EPSILON);
        assert!(!task.feature_set().empty());
    }

    #[test]
    fn singleton_capture_is_terminal() {
        let dataset = testdata::xor_dataset(testdata::config(0.05));
        let mut work = work(&dataset);
        let mut capture = Bitset::new(4, false);
        capture.set(0, true);
        let task = Task::new(capture, Bitset::new(2, true), &dataset, &mut work).unwrap();

        assert!((task.lowerbound() - task.base_objective()).abs() < 1e-6);
        assert!((task.upperbound() - task.base_objective()).abs() < 1e-6);
        assert!(task.feature_set().empty());
        // The captured sample is classified perfectly.
        assert!((task.base_objective() - 0.05).abs() < 1e-6);
    }

    #[test]
    fn exhausted_depth_budget_is_terminal() {
        let mut config = testdata::config(0.01);
        config.depth_budget = 1;
        let dataset = testdata::xor_dataset(config);
        let mut work = work(&dataset);
        let capture = Bitset::with_depth_budget(4, true, 1);
        let task = Task::new(capture, Bitset::new(2, true), &dataset, &mut work).unwrap();

        assert!(task.feature_set().empty());
        assert!((task.upperbound() - task.base_objective()).abs() < 1e-6);
    }

    #[test]
    fn update_is_monotone_and_clamped() {
        let dataset = testdata::xor_dataset(testdata::config(0.01));
        let config = dataset.config.clone();
        let mut work = work(&dataset);
        let mut task = Task::new(
            Bitset::new(4, true),
            Bitset::new(2, true),
            &dataset,
            &mut work,
        )
        .unwrap();

        let lower = task.lowerbound();
        let upper = task.upperbound();

        // Loosening values do not move the bounds.
        task.update(&config, lower - 0.1, upper + 0.1, -1);
        assert!((task.lowerbound() - lower).abs() < 1e-6);
        assert!((task.upperbound() - upper).abs() < 1e-6);

        // Tightening values do, and collapse once the gap closes.
        assert!(task.update(&config, 0.04, 0.04, 0));
        assert!((task.lowerbound() - 0.04).abs() < 1e-6);
        assert!((task.upperbound() - 0.04).abs() < 1e-6);
        assert_eq!(task.uncertainty(), 0.0);
    }

    #[test]
    fn create_children_splits_both_sides() {
        let dataset = testdata::xor_dataset(testdata::config(0.01));
        let mut work = work(&dataset);
        let mut buffer = Bitset::new(4, false);
        let mut task = Task::new(
            Bitset::new(4, true),
            Bitset::new(2, true),
            &dataset,
            &mut work,
        )
        .unwrap();

        let mut neighbourhood: Vec<Option<Task>> = vec![None; 4];
        task.create_children(&dataset, &mut neighbourhood, &mut buffer, &mut work).unwrap();

        for j in 0..2 {
            let left = neighbourhood[2 * j].as_ref().unwrap();
            let right = neighbourhood[2 * j + 1].as_ref().unwrap();
            assert_eq!(left.capture_set().count(), 2);
            assert_eq!(right.capture_set().count(), 2);
        }
        // Neither feature was pruned: both splits are proper.
        assert_eq!(task.feature_set().count(), 2);
    }

    #[test]
    fn degenerate_split_prunes_the_feature() {
        // XOR on features 0 and 1 plus a constant feature 2; splitting on
        // the constant never partitions, so it must be pruned.
        let mut input = crate::matrix::Matrix::<bool>::new(4, 5);
        for row in 0..4 {
            let x1 = row >= 2;
            let x2 = row % 2 == 1;
            input.set(row, 0, x1);
            input.set(row, 1, x2);
            let label = usize::from(x1 != x2);
            input.set(row, 3 + label, true);
        }
        let costs = testdata::uniform_costs(2, 0.25);
        let dataset = Dataset::new(
            testdata::config(0.01),
            &input,
            &costs,
            vec![vec![0], vec![1], vec![2]],
            None,
        )
        .unwrap();

        let mut work = Bitset::new(4, false);
        let mut buffer = Bitset::new(4, false);
        let mut task = Task::new(
            Bitset::new(4, true),
            Bitset::new(3, true),
            &dataset,
            &mut work,
        )
        .unwrap();
        let mut neighbourhood: Vec<Option<Task>> = vec![None; 6];
        task.create_children(&dataset, &mut neighbourhood, &mut buffer, &mut work).unwrap();

        assert!(!task.feature_set().get(2));
        assert!(task.feature_set().get(0));
        assert!(task.feature_set().get(1));
    }
}
