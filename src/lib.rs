//! Globally optimal sparse binary decision trees.
//!
//! Given a binarized training matrix, a per-class cost matrix and a leaf
//! penalty λ, the solver returns every tree minimizing
//! `loss + λ · #leaves` within the certified optimality gap, subject to an
//! optional depth budget and wall-clock limit.
//!
//! The search is a parallel branch-and-bound dynamic program over a shared
//! dependency graph of subproblems keyed by capture-set bitmasks:
//!
//! 1. Worker threads pop prioritized messages off one shared queue.
//! 2. *Exploration* messages expand a subproblem downward, inserting a
//!    vertex and seeding split bounds from its candidate children.
//! 3. *Exploitation* messages propagate tightened child bounds upward
//!    along the recorded back-edges.
//! 4. Once the root's interval closes (or a limit fires), the graph is
//!    walked from the root to enumerate all optimal models.
//!
//! Entry points: build a [`Dataset`] from matrices or from a saved
//! `dataset.bin`, then call [`fit`].

pub mod bitset;
pub mod config;
pub mod dataset;
pub mod error;
pub mod graph;
pub mod matrix;
pub mod model;
pub mod optimizer;
pub mod queue;
pub mod solver;
pub mod task;

#[cfg(test)]
pub(crate) mod testdata;

pub use bitset::Bitset;
pub use config::Configuration;
pub use dataset::Dataset;
pub use error::{Result, TreeboundError};
pub use matrix::Matrix;
pub use model::Model;
pub use solver::{fit, FitResult, Status};
