//! Enumeration of optimal models from the converged graph. Starting at the
//! root vertex, every split whose recorded upper bound lies within the
//! certified gap is expanded recursively; child sets combine as a Cartesian
//! product in tree mode and as one-leaf crosses in rule-list mode.

use std::sync::Arc;

use crate::bitset::Bitset;
use crate::error::Result;
use crate::model::Model;
use crate::task::Translation;

use super::dispatch::signed_feature;
use super::Optimizer;

impl<'a> Optimizer<'a> {
    /// Collects all models whose objective lies within the optimality gap
    /// of the root, up to `model_limit`. Returns an empty set when no root
    /// was ever expanded.
    pub fn models(&self) -> Result<Vec<Arc<Model>>> {
        if self.config().model_limit == 0 {
            return Ok(Vec::new());
        }
        let Some(root) = self.root_key() else {
            return Ok(Vec::new());
        };
        let mut work = Bitset::new(self.dataset.n_rows(), false);
        let mut results = Vec::new();
        self.collect_models(&root, &mut results, &mut work)?;
        Ok(results)
    }

    fn collect_models(
        &self,
        identifier: &Bitset,
        results: &mut Vec<Arc<Model>>,
        work: &mut Bitset,
    ) -> Result<()> {
        let Some(handle) = self.graph.vertices.get_cloned(identifier) else {
            return Ok(());
        };
        // Copy what we need and release the vertex guard before recursing.
        let (base_objective, upperbound, order, capture) = {
            let task = handle.read();
            (
                task.base_objective(),
                task.upperbound(),
                task.order().clone(),
                task.capture_set().clone(),
            )
        };

        if base_objective <= upperbound + f32::EPSILON {
            let mut model = Model::leaf(capture.clone(), self.dataset, work);
            model.identify(identifier.clone());
            model.translate_self(order.clone());
            push_unique(results, Arc::new(model));
        }

        let Some(bounds_handle) = self.graph.bounds.get_cloned(identifier) else {
            return Ok(());
        };
        let entries = bounds_handle.lock().clone();

        for entry in entries {
            if entry.upper > upperbound + f32::EPSILON {
                continue;
            }
            let feature = entry.feature;

            let negatives =
                self.child_models(identifier, &capture, feature, false, work)?;
            let positives =
                self.child_models(identifier, &capture, feature, true, work)?;
            if negatives.is_empty() || positives.is_empty() {
                continue;
            }

            if self.config().rule_list {
                self.cross_rule_list(
                    identifier, &capture, &order, feature, upperbound, &negatives, &positives,
                    results, work,
                )?;
            } else {
                for negative in &negatives {
                    for positive in &positives {
                        if results.len() >= self.config().model_limit as usize {
                            continue;
                        }
                        let model = self.assemble_split(
                            identifier,
                            &order,
                            feature,
                            negative.clone(),
                            positive.clone(),
                        );
                        push_unique(results, Arc::new(model));
                    }
                }
            }
        }
        Ok(())
    }

    /// Models for one side of a split: the recorded child vertex when the
    /// graph has one, otherwise a synthesized leaf over the subset.
    fn child_models(
        &self,
        identifier: &Bitset,
        capture: &Bitset,
        feature: usize,
        positive: bool,
        work: &mut Bitset,
    ) -> Result<Vec<Arc<Model>>> {
        let mut models = Vec::new();
        let signed = signed_feature(feature, positive);
        match self.graph.children.get_cloned(&(identifier.clone(), signed)) {
            Some(child_key) => self.collect_models(&child_key, &mut models, work)?,
            None => {
                let subset = self.split_subset(capture, feature, positive);
                models.push(Arc::new(Model::leaf(subset, self.dataset, work)));
            }
        }
        Ok(models)
    }

    fn split_subset(&self, capture: &Bitset, feature: usize, positive: bool) -> Bitset {
        let mut subset = capture.clone();
        self.dataset.subset_inplace(&mut subset, feature, positive);
        if self.config().uses_depth_budget() {
            subset.set_depth_budget(subset.depth_budget() - 1);
        }
        subset
    }

    /// Rule-list combination: each recursive side crosses with the forced
    /// leaf on the other side, filtered by the vertex upper bound.
    #[allow(clippy::too_many_arguments)]
    fn cross_rule_list(
        &self,
        identifier: &Bitset,
        capture: &Bitset,
        order: &Translation,
        feature: usize,
        upperbound: f32,
        negatives: &[Arc<Model>],
        positives: &[Arc<Model>],
        results: &mut Vec<Arc<Model>>,
        work: &mut Bitset,
    ) -> Result<()> {
        let negative_subset = self.split_subset(capture, feature, false);
        let positive_subset = self.split_subset(capture, feature, true);

        let left_leaf = Model::leaf(negative_subset, self.dataset, work);
        let right_leaf = Model::leaf(positive_subset, self.dataset, work);
        let left_leaf_risk = left_leaf.loss() + left_leaf.complexity();
        let right_leaf_risk = right_leaf.loss() + right_leaf.complexity();

        for negative in negatives {
            let risk = right_leaf_risk + negative.loss() + negative.complexity();
            if risk <= upperbound + f32::EPSILON {
                if results.len() >= self.config().model_limit as usize {
                    continue;
                }
                let model = self.assemble_split(
                    identifier,
                    order,
                    feature,
                    negative.clone(),
                    Arc::new(right_leaf.clone()),
                );
                push_unique(results, Arc::new(model));
            }
        }
        for positive in positives {
            let risk = left_leaf_risk + positive.loss() + positive.complexity();
            if risk <= upperbound + f32::EPSILON {
                if results.len() >= self.config().model_limit as usize {
                    continue;
                }
                let model = self.assemble_split(
                    identifier,
                    order,
                    feature,
                    Arc::new(left_leaf.clone()),
                    positive.clone(),
                );
                push_unique(results, Arc::new(model));
            }
        }
        Ok(())
    }

    /// Builds the split model and attaches the identifier plus the order
    /// translations recorded on the traversed edges.
    fn assemble_split(
        &self,
        identifier: &Bitset,
        order: &Translation,
        feature: usize,
        negative: Arc<Model>,
        positive: Arc<Model>,
    ) -> Model {
        let negative_identified = negative.identified();
        let positive_identified = positive.identified();
        let mut model = Model::split(feature, negative, positive);
        model.identify(identifier.clone());
        model.translate_self(order.clone());

        if negative_identified {
            let key = (identifier.clone(), signed_feature(feature, false));
            if let Some(translation) = self.graph.translations.get_cloned(&key) {
                model.translate_negatives(translation);
            }
        }
        if positive_identified {
            let key = (identifier.clone(), signed_feature(feature, true));
            if let Some(translation) = self.graph.translations.get_cloned(&key) {
                model.translate_positives(translation);
            }
        }
        model
    }
}

/// Inserts `model` unless an equal model (by leaf partition) is present.
fn push_unique(results: &mut Vec<Arc<Model>>, model: Arc<Model>) {
    if !results.iter().any(|existing| **existing == *model) {
        results.push(model);
    }
}
