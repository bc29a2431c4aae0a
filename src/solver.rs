//! The fit driver: builds the optimizer, runs the worker pool under the
//! configured thread and time limits, and assembles the final result.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{error, info};
use parking_lot::Mutex;

use crate::dataset::Dataset;
use crate::error::{Result, TreeboundError};
use crate::optimizer::{LocalState, Optimizer};

/// Terminal state of a fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The objective interval closed and at least one model was extracted.
    Converged,
    /// The time limit elapsed or work was still queued at shutdown.
    Timeout,
    /// The solve stopped with a gap but neither timed out nor had queued
    /// work, or an internal integrity violation was detected.
    NonConvergence,
    /// The solve reported convergence but extraction produced no model.
    FalseConvergence,
    /// No fit has been run.
    Uninitialized,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Converged => "CONVERGED",
            Status::Timeout => "TIMEOUT",
            Status::NonConvergence => "NON_CONVERGENCE",
            Status::FalseConvergence => "FALSE_CONVERGENCE",
            Status::Uninitialized => "UNINITIALIZED",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of [`fit`].
#[derive(Debug, Clone)]
pub struct FitResult {
    /// JSON array of the extracted models.
    pub model: String,
    /// Number of distinct subproblems in the dependency graph.
    pub graph_size: usize,
    /// Total worker loop iterations across all threads.
    pub n_iterations: u64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    /// Training loss of the first extracted model.
    pub model_loss: f64,
    /// Wall time of the solve in seconds.
    pub time_elapsed: f64,
    pub status: Status,
}

impl Default for FitResult {
    fn default() -> Self {
        FitResult {
            model: String::new(),
            graph_size: 0,
            n_iterations: 0,
            lower_bound: 0.0,
            upper_bound: 1.0,
            model_loss: 0.0,
            time_elapsed: 0.0,
            status: Status::Uninitialized,
        }
    }
}

/// Runs the optimization over `dataset` with the configuration the dataset
/// was built with and returns the certified objective interval together
/// with the extracted models.
pub fn fit(dataset: &Dataset) -> Result<FitResult> {
    let config = &dataset.config;
    let optimizer = Optimizer::new(dataset)?;
    optimizer.initialize()?;

    let worker_limit = config.worker_limit.max(1) as usize;
    let total_iterations = AtomicU64::new(0);
    let first_violation: Mutex<Option<TreeboundError>> = Mutex::new(None);

    let run_worker = |worker_id: usize| {
        let mut local = LocalState::new(worker_id, dataset);
        let mut iterations = 0u64;
        loop {
            match optimizer.iterate(&mut local) {
                Ok(true) => iterations += 1,
                Ok(false) => break,
                Err(violation) => {
                    // A solver bug, not a user error: record it, let the
                    // other workers drain, report non-convergence.
                    error!("worker {}: {}", worker_id, violation);
                    optimizer.abort();
                    first_violation.lock().get_or_insert(violation);
                    break;
                }
            }
        }
        total_iterations.fetch_add(iterations, Ordering::Relaxed);
    };

    if worker_limit > 1 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_limit)
            .build()
            .map_err(|e| TreeboundError::InvalidInput(format!("worker pool: {}", e)))?;
        let worker = &run_worker;
        pool.scope(|scope| {
            for worker_id in 0..worker_limit {
                scope.spawn(move |_| worker(worker_id));
            }
        });
    } else {
        run_worker(0);
    }

    let (lower_bound, upper_bound) = optimizer.objective_boundary();
    let mut result = FitResult {
        time_elapsed: optimizer.time_elapsed(),
        graph_size: optimizer.size(),
        n_iterations: total_iterations.load(Ordering::Relaxed),
        lower_bound: lower_bound as f64,
        upper_bound: upper_bound as f64,
        status: Status::Converged,
        ..FitResult::default()
    };

    info!(
        "optimization finished: {:.3}s, {} iterations, graph {}, objective [{}, {}]",
        result.time_elapsed, result.n_iterations, result.graph_size, lower_bound, upper_bound
    );

    if lower_bound != upper_bound {
        let timed_out =
            config.time_limit > 0 && result.time_elapsed > config.time_limit as f64;
        if timed_out || !optimizer.queue.is_empty() {
            result.status = Status::Timeout;
        } else {
            result.status = Status::NonConvergence;
        }
    }
    if first_violation.lock().is_some() {
        result.status = Status::NonConvergence;
    }

    // Extraction is attempted even on timeout; a feasible tree found early
    // is still worth returning.
    let models = optimizer.models()?;
    if models.is_empty() {
        if result.status == Status::Converged || config.time_limit > 0 {
            result.status = Status::FalseConvergence;
        }
        return Ok(result);
    }

    result.model_loss = models[0].loss() as f64;
    let mut rendered = Vec::with_capacity(models.len());
    for model in &models {
        rendered.push(model.to_json(dataset)?);
    }
    result.model = serde_json::to_string_pretty(&serde_json::Value::Array(rendered))?;
    Ok(result)
}
