//! End-to-end solver scenarios: small datasets with known optimal trees.

mod common;

use common::{config, constant_label_dataset, single_sample_dataset, xor_dataset};
use serde_json::Value;
use treebound::{fit, Status};

const TOLERANCE: f64 = 1e-5;

fn parse_models(model: &str) -> Vec<Value> {
    let value: Value = serde_json::from_str(model).expect("result model must be valid JSON");
    value.as_array().expect("result model must be a JSON array").clone()
}

fn is_leaf(node: &Value) -> bool {
    node.get("prediction").is_some()
}

/// Number of leaves reachable from a model node.
fn count_leaves(node: &Value) -> usize {
    if is_leaf(node) {
        1
    } else {
        count_leaves(&node["true"]) + count_leaves(&node["false"])
    }
}

fn tree_depth(node: &Value) -> usize {
    if is_leaf(node) {
        1
    } else {
        1 + tree_depth(&node["true"]).max(tree_depth(&node["false"]))
    }
}

#[test]
fn single_sample_returns_one_exact_leaf() {
    let dataset = single_sample_dataset(config(0.05));
    let result = fit(&dataset).unwrap();

    assert_eq!(result.status, Status::Converged);
    assert!((result.model_loss - 0.0).abs() < TOLERANCE);
    assert!((result.lower_bound - 0.05).abs() < TOLERANCE);
    assert!((result.upper_bound - 0.05).abs() < TOLERANCE);

    let models = parse_models(&result.model);
    assert_eq!(models.len(), 1);
    assert!(is_leaf(&models[0]));
    assert_eq!(models[0]["prediction"], 0);
}

#[test]
fn constant_label_returns_a_single_leaf() {
    let dataset = constant_label_dataset(config(0.01));
    let result = fit(&dataset).unwrap();

    assert_eq!(result.status, Status::Converged);
    assert!((result.model_loss - 0.0).abs() < TOLERANCE);
    assert!((result.lower_bound - 0.01).abs() < TOLERANCE);
    assert!((result.upper_bound - 0.01).abs() < TOLERANCE);

    let models = parse_models(&result.model);
    assert_eq!(models.len(), 1);
    assert!(is_leaf(&models[0]));
    assert_eq!(models[0]["prediction"], 0);
}

#[test]
fn xor_needs_two_levels_of_splits() {
    let dataset = xor_dataset(config(0.01));
    let result = fit(&dataset).unwrap();

    assert_eq!(result.status, Status::Converged);
    assert!((result.model_loss - 0.0).abs() < TOLERANCE);
    // Zero loss plus four leaves of penalty.
    assert!((result.upper_bound - 0.04).abs() < TOLERANCE);
    assert!((result.lower_bound - result.upper_bound).abs() < TOLERANCE);

    let models = parse_models(&result.model);
    assert_eq!(models.len(), 1);
    let tree = &models[0];
    assert!(!is_leaf(tree));
    assert_eq!(count_leaves(tree), 4);
    assert_eq!(tree_depth(tree), 3);
}

#[test]
fn depth_budget_forbids_the_zero_loss_tree() {
    // Depth 2 means the root plus one level, and a single split cannot
    // separate XOR, so the optimum degenerates to one leaf.
    let mut configuration = config(0.01);
    configuration.depth_budget = 2;
    let dataset = xor_dataset(configuration);
    let result = fit(&dataset).unwrap();

    assert_eq!(result.status, Status::Converged);
    assert!(result.model_loss > 0.0);
    assert!((result.model_loss - 0.5).abs() < TOLERANCE);
    assert!((result.upper_bound - 0.51).abs() < TOLERANCE);
    assert!((result.lower_bound - result.upper_bound).abs() < TOLERANCE);

    let models = parse_models(&result.model);
    assert_eq!(models.len(), 1);
    assert!(tree_depth(&models[0]) <= 2);
}

#[test]
fn rule_list_mode_forces_one_leaf_per_split() {
    let mut configuration = config(0.01);
    configuration.rule_list = true;
    let dataset = xor_dataset(configuration);
    let result = fit(&dataset).unwrap();

    assert_eq!(result.status, Status::Converged);
    // One rule handles half the samples exactly; the terminal default
    // leaf absorbs one error: loss 1/4 plus three leaves of penalty.
    assert!((result.model_loss - 0.25).abs() < TOLERANCE);
    assert!((result.upper_bound - 0.28).abs() < TOLERANCE);
    assert!((result.lower_bound - result.upper_bound).abs() < TOLERANCE);

    let models = parse_models(&result.model);
    assert!(!models.is_empty());
    for tree in &models {
        // Every split of a rule list keeps at least one side terminal.
        let mut stack = vec![tree.clone()];
        while let Some(node) = stack.pop() {
            if is_leaf(&node) {
                continue;
            }
            assert!(
                is_leaf(&node["true"]) || is_leaf(&node["false"]),
                "rule list split must keep one side a leaf: {}",
                node
            );
            stack.push(node["true"].clone());
            stack.push(node["false"].clone());
        }
    }
}

#[test]
fn model_limit_caps_the_enumeration() {
    // With a coarse penalty many XOR trees tie; the limit must hold.
    let mut configuration = config(0.01);
    configuration.model_limit = 1;
    let dataset = xor_dataset(configuration);
    let result = fit(&dataset).unwrap();

    let models = parse_models(&result.model);
    assert_eq!(models.len(), 1);
}

#[test]
fn worker_counts_agree_on_the_objective() {
    let mut baseline = None;
    for worker_limit in [1u32, 2, 4] {
        let mut configuration = config(0.01);
        configuration.worker_limit = worker_limit;
        let dataset = xor_dataset(configuration);
        let result = fit(&dataset).unwrap();

        assert_eq!(result.status, Status::Converged, "workers={}", worker_limit);
        let summary = (result.lower_bound, result.upper_bound, result.model_loss);
        match &baseline {
            None => baseline = Some(summary),
            Some(expected) => {
                assert!((summary.0 - expected.0).abs() < TOLERANCE, "workers={}", worker_limit);
                assert!((summary.1 - expected.1).abs() < TOLERANCE, "workers={}", worker_limit);
                assert!((summary.2 - expected.2).abs() < TOLERANCE, "workers={}", worker_limit);
            }
        }
    }
}

#[test]
fn extracted_tree_classifies_the_training_data() {
    let dataset = xor_dataset(config(0.01));
    let result = fit(&dataset).unwrap();
    let models = parse_models(&result.model);
    let tree = &models[0];

    // Walk the JSON tree for each training row; original and binarized
    // feature indices coincide for this dataset.
    for row in 0..4 {
        let x1 = row >= 2;
        let x2 = row % 2 == 1;
        let expected = usize::from(x1 != x2);

        let mut node = tree;
        while !is_leaf(node) {
            let feature = node["feature"].as_u64().unwrap() as usize;
            let value = if feature == 0 { x1 } else { x2 };
            node = if value { &node["true"] } else { &node["false"] };
        }
        assert_eq!(node["prediction"].as_u64().unwrap() as usize, expected, "row {}", row);
    }
}
