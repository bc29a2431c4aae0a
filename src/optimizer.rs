//! The solver core: shared optimization state, the per-worker iteration
//! loop, tick-based termination management and the runtime profile stream.
//!
//! Worker threads interact with the optimizer exclusively through
//! [`Optimizer::iterate`], which pops one message from the shared queue,
//! dispatches it (see the `dispatch` submodule) and lets worker 0 manage
//! the termination flag.

mod dispatch;
mod extraction;

use std::fs::File;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use log::{info, warn};
use parking_lot::Mutex;

use crate::bitset::Bitset;
use crate::config::Configuration;
use crate::dataset::Dataset;
use crate::error::Result;
use crate::graph::Graph;
use crate::queue::{Message, PriorityQueue};
use crate::task::Task;

/// Iterations between periodic completion and timeout checks on worker 0.
const TICK_DURATION: u64 = 10_000;

/// Preallocated per-worker scratch so the dispatch path does not allocate.
pub struct LocalState {
    pub worker_id: usize,
    pub ticks: u64,
    /// Child task slots, two per feature (negative side then positive).
    pub neighbourhood: Vec<Option<Task>>,
    /// Row-sized scratch for summary statistics and distances.
    pub column_buffer: Bitset,
    /// Row-sized scratch holding the child capture under construction.
    pub scratch: Bitset,
}

impl LocalState {
    pub fn new(worker_id: usize, dataset: &Dataset) -> Self {
        LocalState {
            worker_id,
            ticks: 0,
            neighbourhood: vec![None; 2 * dataset.n_features()],
            column_buffer: Bitset::new(dataset.n_rows(), false),
            scratch: Bitset::new(dataset.n_rows(), false),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct GlobalBounds {
    lowerbound: f32,
    upperbound: f32,
}

pub struct Optimizer<'a> {
    pub(crate) dataset: &'a Dataset,
    pub(crate) graph: Graph,
    pub(crate) queue: PriorityQueue,

    start_time: Mutex<Instant>,
    active: AtomicBool,

    /// Capture-set identifier of the root vertex, set on its exploration.
    root: Mutex<Option<Bitset>>,
    globals: Mutex<GlobalBounds>,

    explore: AtomicU64,
    exploit: AtomicU64,

    profile: Option<Mutex<csv::Writer<File>>>,
}

impl<'a> Optimizer<'a> {
    pub fn new(dataset: &'a Dataset) -> Result<Self> {
        let profile = if dataset.config.profile.is_empty() {
            None
        } else {
            let file = File::create(&dataset.config.profile)?;
            Some(Mutex::new(csv::Writer::from_writer(file)))
        };

        Ok(Optimizer {
            dataset,
            graph: Graph::new(),
            queue: PriorityQueue::new(),
            start_time: Mutex::new(Instant::now()),
            active: AtomicBool::new(true),
            root: Mutex::new(None),
            globals: Mutex::new(GlobalBounds { lowerbound: f32::MIN, upperbound: f32::MAX }),
            explore: AtomicU64::new(0),
            exploit: AtomicU64::new(0),
            profile,
        })
    }

    #[inline]
    pub(crate) fn config(&self) -> &Configuration {
        &self.dataset.config
    }

    /// Seeds the queue with the root exploration and starts the clock.
    pub fn initialize(&self) -> Result<()> {
        if let Some(profile) = &self.profile {
            let mut writer = profile.lock();
            writer.write_record([
                "iterations",
                "time",
                "lower_bound",
                "upper_bound",
                "graph_size",
                "queue_size",
                "explore",
                "exploit",
            ])?;
            writer.flush()?;
        }
        if !self.config().tree.is_empty() {
            warn!("tree traces are not supported; ignoring tree path {:?}", self.config().tree);
        }

        let capture = Bitset::with_depth_budget(
            self.dataset.n_rows(),
            true,
            self.config().depth_budget,
        );
        let features = Bitset::new(self.dataset.n_features(), true);
        self.queue.push(
            Message::Exploration {
                parent: None,
                capture,
                features,
                feature: 0,
                scope: f32::MAX,
            },
            f32::MAX,
        );

        *self.start_time.lock() = Instant::now();
        Ok(())
    }

    pub fn objective_boundary(&self) -> (f32, f32) {
        let globals = self.globals.lock();
        (globals.lowerbound, globals.upperbound)
    }

    /// Current gap between the global bounds, snapped to zero below the
    /// float tolerance.
    pub fn uncertainty(&self) -> f32 {
        let (lowerbound, upperbound) = self.objective_boundary();
        let value = upperbound - lowerbound;
        if value < f32::EPSILON {
            0.0
        } else {
            value
        }
    }

    pub fn complete(&self) -> bool {
        self.uncertainty() == 0.0
    }

    pub fn time_elapsed(&self) -> f64 {
        self.start_time.lock().elapsed().as_secs_f64()
    }

    pub fn timeout(&self) -> bool {
        self.config().time_limit > 0 && self.time_elapsed() > self.config().time_limit as f64
    }

    /// Size of the dependency graph.
    pub fn size(&self) -> usize {
        self.graph.size()
    }

    /// Stops the solve; in-flight messages finish, nothing is rolled back.
    pub fn abort(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    /// Overwrites the global objective interval. Returns whether the
    /// incoming values differ from the stored ones.
    pub(crate) fn update_root(&self, lowerbound: f32, upperbound: f32) -> bool {
        let mut globals = self.globals.lock();
        let change = lowerbound != globals.lowerbound || upperbound != globals.upperbound;
        globals.lowerbound = lowerbound;
        globals.upperbound = upperbound;
        globals.lowerbound = globals.lowerbound.min(globals.upperbound);
        change
    }

    pub(crate) fn set_root(&self, key: Bitset) {
        *self.root.lock() = Some(key);
    }

    pub(crate) fn root_key(&self) -> Option<Bitset> {
        self.root.lock().clone()
    }

    /// Processes at most one message. Worker 0 additionally re-evaluates
    /// the shared continuation flag on updates, on completion and every
    /// `TICK_DURATION` iterations. Returns whether the solve is still
    /// active.
    pub fn iterate(&self, local: &mut LocalState) -> Result<bool> {
        let mut update = false;
        if let Some(message) = self.queue.pop() {
            let exploration = message.is_exploration();
            update = self.dispatch(message, local)?;
            if exploration {
                self.explore.fetch_add(1, Ordering::Relaxed);
            } else {
                self.exploit.fetch_add(1, Ordering::Relaxed);
            }
        }

        if local.worker_id == 0 {
            local.ticks += 1;
            if update || self.complete() || local.ticks % TICK_DURATION == 0 {
                let active = !self.complete()
                    && !self.timeout()
                    && (self.config().worker_limit > 1 || !self.queue.is_empty());
                self.active.store(active, Ordering::SeqCst);
                self.report_progress();
                self.write_profile(local.ticks)?;
            }
        }
        Ok(self.active.load(Ordering::SeqCst))
    }

    fn report_progress(&self) {
        if self.config().verbose {
            let (lowerbound, upperbound) = self.objective_boundary();
            info!(
                "time: {:.3}s, objective: [{}, {}], graph: {}, queue: {}",
                self.time_elapsed(),
                lowerbound,
                upperbound,
                self.graph.size(),
                self.queue.len()
            );
        }
    }

    fn write_profile(&self, ticks: u64) -> Result<()> {
        if let Some(profile) = &self.profile {
            let (lowerbound, upperbound) = self.objective_boundary();
            let mut writer = profile.lock();
            writer.write_record([
                ticks.to_string(),
                format!("{:.3}", self.time_elapsed()),
                lowerbound.to_string(),
                upperbound.to_string(),
                self.graph.size().to_string(),
                self.queue.len().to_string(),
                self.explore.swap(0, Ordering::Relaxed).to_string(),
                self.exploit.swap(0, Ordering::Relaxed).to_string(),
            ])?;
            writer.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testdata;

    #[test]
    fn initialize_seeds_the_root_exploration() {
        let dataset = testdata::xor_dataset(testdata::config(0.01));
        let optimizer = Optimizer::new(&dataset).unwrap();
        optimizer.initialize().unwrap();

        assert_eq!(optimizer.queue.len(), 1);
        match optimizer.queue.pop().unwrap() {
            Message::Exploration { parent, capture, features, feature, scope } => {
                assert!(parent.is_none());
                assert!(capture.full());
                assert_eq!(capture.size(), 4);
                assert!(features.full());
                assert_eq!(features.size(), 2);
                assert_eq!(feature, 0);
                assert_eq!(scope, f32::MAX);
            }
            _ => panic!("expected an exploration message"),
        }
    }

    #[test]
    fn root_exploration_carries_the_depth_budget() {
        let mut config = testdata::config(0.01);
        config.depth_budget = 3;
        let dataset = testdata::xor_dataset(config);
        let optimizer = Optimizer::new(&dataset).unwrap();
        optimizer.initialize().unwrap();

        match optimizer.queue.pop().unwrap() {
            Message::Exploration { capture, .. } => assert_eq!(capture.depth_budget(), 3),
            _ => panic!("expected an exploration message"),
        }
    }

    #[test]
    fn profile_stream_gets_a_header() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("profile.csv");
        let mut config = testdata::config(0.01);
        config.profile = path.to_string_lossy().into_owned();
        let dataset = testdata::xor_dataset(config);

        let optimizer = Optimizer::new(&dataset).unwrap();
        optimizer.initialize().unwrap();
        drop(optimizer);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("iterations,time,lower_bound,upper_bound"));
    }

    #[test]
    fn update_root_overwrites_and_clamps() {
        let dataset = testdata::xor_dataset(testdata::config(0.01));
        let optimizer = Optimizer::new(&dataset).unwrap();

        assert!(optimizer.update_root(0.1, 0.5));
        assert_eq!(optimizer.objective_boundary(), (0.1, 0.5));
        assert!(!optimizer.complete());

        // A lower bound overshooting the upper bound is clamped down.
        assert!(optimizer.update_root(0.7, 0.5));
        assert_eq!(optimizer.objective_boundary(), (0.5, 0.5));
        assert!(optimizer.complete());
    }
}
