//! Shared dataset constructors for the end-to-end tests.

use treebound::{Configuration, Dataset, Matrix};

pub fn config(regularization: f32) -> Configuration {
    Configuration { regularization, ..Configuration::default() }
}

/// Cost matrix with zero diagonal and a flat `mismatch` cost elsewhere.
pub fn uniform_costs(targets: usize, mismatch: f32) -> Matrix<f32> {
    let mut costs = Matrix::<f32>::new(targets, targets);
    for predicted in 0..targets {
        for truth in 0..targets {
            costs.set(predicted, truth, if predicted == truth { 0.0 } else { mismatch });
        }
    }
    costs
}

/// One sample, one feature, two classes.
pub fn single_sample_dataset(config: Configuration) -> Dataset {
    let mut input = Matrix::<bool>::new(1, 3);
    input.set(0, 0, true);
    input.set(0, 1, true); // label 0
    let costs = uniform_costs(2, 1.0);
    Dataset::new(config, &input, &costs, vec![vec![0]], None).unwrap()
}

/// Ten samples, two informative-looking features, every label 0.
pub fn constant_label_dataset(config: Configuration) -> Dataset {
    let mut input = Matrix::<bool>::new(10, 4);
    for row in 0..10 {
        input.set(row, 0, row < 5);
        input.set(row, 1, row % 2 == 0);
        input.set(row, 2, true); // label 0
    }
    let costs = uniform_costs(2, 0.1);
    Dataset::new(config, &input, &costs, vec![vec![0], vec![1]], None).unwrap()
}

/// The XOR truth table `y = x1 XOR x2` with per-sample cost 1/4.
pub fn xor_dataset(config: Configuration) -> Dataset {
    let mut input = Matrix::<bool>::new(4, 4);
    for row in 0..4 {
        let x1 = row >= 2;
        let x2 = row % 2 == 1;
        input.set(row, 0, x1);
        input.set(row, 1, x2);
        let label = usize::from(x1 != x2);
        input.set(row, 2 + label, true);
    }
    let costs = uniform_costs(2, 0.25);
    Dataset::new(config, &input, &costs, vec![vec![0], vec![1]], None).unwrap()
}
