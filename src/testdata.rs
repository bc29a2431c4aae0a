//! Shared fixtures for the unit tests.

use crate::config::Configuration;
use crate::dataset::Dataset;
use crate::matrix::Matrix;

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

/// The XOR truth table over two binary features, with per-sample
/// misclassification cost 1/4.
pub fn xor_matrices() -> (Matrix<bool>, Matrix<f32>) {
    let mut input = Matrix::<bool>::new(4, 4);
    for row in 0..4 {
        let x1 = row >= 2;
        let x2 = row % 2 == 1;
        input.set(row, 0, x1);
        input.set(row, 1, x2);
        let label = usize::from(x1 != x2);
        input.set(row, 2 + label, true);
    }
    (input, uniform_costs(2, 0.25))
}

pub fn xor_dataset(config: Configuration) -> Dataset {
    let (input, costs) = xor_matrices();
    Dataset::new(config, &input, &costs, vec![vec![0], vec![1]], None).unwrap()
}
