//! Classification models extracted from the dependency graph.
//!
//! A model is a binary tree whose leaves remember the rows they capture.
//! Two models are considered equal when their ordered leaf partitions
//! match, which is how the extraction deduplicates structurally different
//! trees that induce the same partition.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde_json::{json, Value};

use crate::bitset::Bitset;
use crate::dataset::Dataset;
use crate::error::Result;
use crate::task::Translation;

#[derive(Debug, Clone)]
enum ModelKind {
    Leaf {
        prediction: usize,
        loss: f32,
        complexity: f32,
        capture: Bitset,
    },
    Split {
        binary_feature: usize,
        negative: Arc<Model>,
        positive: Arc<Model>,
        negative_translation: Translation,
        positive_translation: Translation,
    },
}

#[derive(Debug, Clone)]
pub struct Model {
    kind: ModelKind,
    /// Capture set of the graph vertex this model was extracted from.
    /// Synthesized leaves have none.
    identifier: Option<Bitset>,
    self_translation: Translation,
}

impl Model {
    /// Terminal model: predict the cost-minimizing label of the captured
    /// rows. `work` must be an `n_rows`-sized scratch bitset.
    pub fn leaf(capture: Bitset, dataset: &Dataset, work: &mut Bitset) -> Model {
        let stats = dataset.summary_statistics(&capture, work);
        Model {
            kind: ModelKind::Leaf {
                prediction: stats.optimal_target,
                loss: stats.max_loss,
                complexity: dataset.config.regularization,
                capture,
            },
            identifier: None,
            self_translation: Translation::new(),
        }
    }

    /// Internal model splitting on a binarized feature.
    pub fn split(binary_feature: usize, negative: Arc<Model>, positive: Arc<Model>) -> Model {
        Model {
            kind: ModelKind::Split {
                binary_feature,
                negative,
                positive,
                negative_translation: Translation::new(),
                positive_translation: Translation::new(),
            },
            identifier: None,
            self_translation: Translation::new(),
        }
    }

    pub fn identify(&mut self, identifier: Bitset) {
        self.identifier = Some(identifier);
    }

    pub fn identified(&self) -> bool {
        self.identifier.is_some()
    }

    pub fn translate_self(&mut self, translation: Translation) {
        self.self_translation = translation;
    }

    pub fn translate_negatives(&mut self, translation: Translation) {
        if let ModelKind::Split { negative_translation, .. } = &mut self.kind {
            *negative_translation = translation;
        }
    }

    pub fn translate_positives(&mut self, translation: Translation) {
        if let ModelKind::Split { positive_translation, .. } = &mut self.kind {
            *positive_translation = translation;
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, ModelKind::Leaf { .. })
    }

    /// Training loss incurred by this model.
    pub fn loss(&self) -> f32 {
        match &self.kind {
            ModelKind::Leaf { loss, .. } => *loss,
            ModelKind::Split { negative, positive, .. } => negative.loss() + positive.loss(),
        }
    }

    /// Complexity penalty incurred by this model (λ per leaf).
    pub fn complexity(&self) -> f32 {
        match &self.kind {
            ModelKind::Leaf { complexity, .. } => *complexity,
            ModelKind::Split { negative, positive, .. } => {
                negative.complexity() + positive.complexity()
            }
        }
    }

    pub fn leaf_count(&self) -> usize {
        match &self.kind {
            ModelKind::Leaf { .. } => 1,
            ModelKind::Split { negative, positive, .. } => {
                negative.leaf_count() + positive.leaf_count()
            }
        }
    }

    /// Predicts the label for a binarized feature row.
    pub fn predict(&self, row_features: &Bitset) -> usize {
        match &self.kind {
            ModelKind::Leaf { prediction, .. } => *prediction,
            ModelKind::Split { binary_feature, negative, positive, .. } => {
                if row_features.get(*binary_feature) {
                    positive.predict(row_features)
                } else {
                    negative.predict(row_features)
                }
            }
        }
    }

    /// Renders the model in the external JSON schema. Split nodes report
    /// the original feature index recovered through the dataset's feature
    /// map; the `true` subtree is taken when the feature holds.
    pub fn to_json(&self, dataset: &Dataset) -> Result<Value> {
        self.to_json_translated(dataset, None)
    }

    /// JSON rendering under an order translation inherited from the edge
    /// this subtree was reached through. An inherited translation takes
    /// precedence over the model's own; empty translations are identity.
    fn to_json_translated(
        &self,
        dataset: &Dataset,
        inherited: Option<&Translation>,
    ) -> Result<Value> {
        match &self.kind {
            ModelKind::Leaf { prediction, loss, complexity, .. } => Ok(json!({
                "prediction": prediction,
                "name": prediction.to_string(),
                "loss": loss,
                "complexity": complexity,
            })),
            ModelKind::Split {
                binary_feature,
                negative,
                positive,
                negative_translation,
                positive_translation,
            } => {
                let translation = inherited
                    .filter(|translation| !translation.is_empty())
                    .or(Some(&self.self_translation))
                    .filter(|translation| !translation.is_empty());
                let binarized = match translation {
                    Some(translation) => translation[*binary_feature] as usize,
                    None => *binary_feature,
                };
                let original = dataset.original_feature(binarized)?;
                Ok(json!({
                    "feature": original,
                    "name": original.to_string(),
                    "relation": "==",
                    "reference": 1,
                    "true": positive.to_json_translated(dataset, Some(positive_translation))?,
                    "false": negative.to_json_translated(dataset, Some(negative_translation))?,
                }))
            }
        }
    }

    /// Appends the leaf capture sets in left-to-right order.
    fn partitions<'a>(&'a self, out: &mut Vec<&'a Bitset>) {
        match &self.kind {
            ModelKind::Leaf { capture, .. } => out.push(capture),
            ModelKind::Split { negative, positive, .. } => {
                negative.partitions(out);
                positive.partitions(out);
            }
        }
    }
}

impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        let mut left = Vec::new();
        let mut right = Vec::new();
        self.partitions(&mut left);
        other.partitions(&mut right);
        left == right
    }
}

impl Eq for Model {}

impl Hash for Model {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let mut leaves = Vec::new();
        self.partitions(&mut leaves);
        for capture in leaves {
            capture.hash(state);
        }
    }
}
