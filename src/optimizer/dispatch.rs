//! Message handlers: exploration spawns subproblems downward, exploitation
//! propagates tightened bounds upward. All graph mutation funnels through
//! here. Lock order is self task, then own bounds list, then child tasks;
//! capture sets shrink strictly along child edges, so the order is acyclic.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::bitset::Bitset;
use crate::error::{Result, TreeboundError};
use crate::graph::{ParentEdge, SplitBound};
use crate::queue::Message;
use crate::task::{Task, Translation};

use super::{LocalState, Optimizer};

/// Bound triple of one child: (lowerbound, upperbound, base_objective).
type ChildBounds = (f32, f32, f32);

#[inline]
fn child_bounds(task: &Task) -> ChildBounds {
    (task.lowerbound(), task.upperbound(), task.base_objective())
}

impl<'a> Optimizer<'a> {
    /// Handles one message. Returns whether the global objective interval
    /// changed.
    pub(crate) fn dispatch(&self, message: Message, local: &mut LocalState) -> Result<bool> {
        match message {
            Message::Exploration { parent, capture, features, feature, scope } => {
                self.explore_vertex(parent, capture, features, feature, scope, local)
            }
            Message::Exploitation { recipient, features, .. } => {
                self.exploit_vertex(recipient, features, local)
            }
        }
    }

    fn explore_vertex(
        &self,
        parent: Option<Bitset>,
        capture: Bitset,
        features: Bitset,
        feature: i32,
        scope: f32,
        local: &mut LocalState,
    ) -> Result<bool> {
        let is_root = capture.count() == capture.size();
        let mut task = Task::new(capture, features, self.dataset, &mut local.column_buffer)?;
        task.scope(scope);
        task.create_children(
            self.dataset,
            &mut local.neighbourhood,
            &mut local.scratch,
            &mut local.column_buffer,
        )?;

        let key = task.capture_set().clone();
        let (handle, _inserted) =
            self.graph.vertices.insert_or_get(key.clone(), Arc::new(RwLock::new(task)));
        let mut vertex = handle.write();

        self.store_children(&mut vertex, local)?;

        let mut global_update = false;
        if is_root {
            let mut root_upperbound = 1.0f32;
            if self.config().upperbound_guess > 0.0 {
                root_upperbound = root_upperbound.min(self.config().upperbound_guess);
            }
            let lowerbound = vertex.lowerbound();
            vertex.update(self.config(), lowerbound, root_upperbound, -1);
            self.set_root(key.clone());
            global_update = self.update_root(vertex.lowerbound(), vertex.upperbound());
        } else if let Some(parent_key) = parent {
            self.link_to_parent(&parent_key, feature, scope, &key, vertex.order());
            self.signal_exploiters(&vertex, &key);
        }

        if self.config().reference_lb || scope >= vertex.upperscope() {
            self.send_explorers(&mut vertex, scope, local);
        }

        Ok(global_update)
    }

    fn exploit_vertex(
        &self,
        recipient: Bitset,
        features: Bitset,
        local: &mut LocalState,
    ) -> Result<bool> {
        let Some(handle) = self.graph.vertices.get_cloned(&recipient) else {
            // The sender raced ahead of the recipient's insertion; the
            // pending update is re-delivered by a later signal.
            log::debug!("dropping exploitation for an unknown vertex");
            return Ok(false);
        };
        let mut vertex = handle.write();

        if vertex.uncertainty() == 0.0
            || (!self.config().reference_lb
                && vertex.lowerbound() >= vertex.upperscope() - f32::EPSILON)
        {
            return Ok(false);
        }

        self.load_children(&mut vertex, &features, local)?;

        let is_root = vertex.capture_set().count() == vertex.capture_set().size();
        if is_root {
            Ok(self.update_root(vertex.lowerbound(), vertex.upperbound()))
        } else {
            self.signal_exploiters(&vertex, &recipient);
            Ok(false)
        }
    }

    /// Combines the two sides of a split into one objective interval.
    fn split_bounds(&self, left: ChildBounds, right: ChildBounds) -> (f32, f32) {
        let (left_lower, left_upper, left_base) = left;
        let (right_lower, right_upper, right_base) = right;
        if self.config().rule_list {
            // One side of a rule-list split is forced to stay a leaf.
            let lower = (left_lower + right_base).min(left_base + right_lower);
            let upper = (left_upper + right_base).min(left_base + right_upper);
            (lower, upper)
        } else {
            (left_lower + right_lower, left_upper + right_upper)
        }
    }

    /// Records the initial split-bound list for a freshly inserted vertex
    /// and folds it into the task bounds. The first writer wins; later
    /// explorations of the same capture set reuse the existing list.
    fn store_children(&self, task: &mut Task, local: &mut LocalState) -> Result<()> {
        let (bounds_handle, inserted) = self
            .graph
            .bounds
            .insert_or_get(task.capture_set().clone(), Arc::new(Mutex::new(Vec::new())));
        if !inserted {
            return Ok(());
        }
        let mut bounds = bounds_handle.lock();

        let mut lower = task.base_objective();
        let mut upper = task.base_objective();
        let mut optimal_feature = -1i32;

        let features: Vec<usize> = task.feature_set().iter_set().collect();
        for j in features {
            if !self.config().feature_transform {
                // Equivalence discovery disabled: refresh the local child
                // copies from any already-known vertices.
                for side in 0..2 {
                    let refreshed = local.neighbourhood[2 * j + side]
                        .as_ref()
                        .and_then(|child| self.graph.vertices.get_cloned(child.capture_set()))
                        .map(|handle| handle.read().clone());
                    if let Some(known) = refreshed {
                        local.neighbourhood[2 * j + side] = Some(known);
                    }
                }
            }

            let (left, right) =
                match (&local.neighbourhood[2 * j], &local.neighbourhood[2 * j + 1]) {
                    (Some(left), Some(right)) => (child_bounds(left), child_bounds(right)),
                    _ => {
                        return Err(TreeboundError::integrity(
                            "Optimizer::store_children",
                            format!("missing neighbourhood slot for feature {}", j),
                        ))
                    }
                };

            let (split_lower, split_upper) = self.split_bounds(left, right);
            bounds.push(SplitBound { feature: j, lower: split_lower, upper: split_upper });

            if split_lower > task.upperscope() {
                continue;
            }
            if split_upper < upper {
                optimal_feature = j as i32;
            }
            lower = lower.min(split_lower);
            upper = upper.min(split_upper);
        }

        task.update(self.config(), lower, upper, optimal_feature);
        Ok(())
    }

    /// Recomputes the split bounds flagged in `signals` from the current
    /// child vertices, applies the similar-support transfer between
    /// adjacent entries and folds the list back into the task bounds.
    fn load_children(&self, task: &mut Task, signals: &Bitset, local: &mut LocalState) -> Result<bool> {
        let Some(bounds_handle) = self.graph.bounds.get_cloned(task.capture_set()) else {
            return Ok(false);
        };
        let mut bounds = bounds_handle.lock();

        let mut lower = task.base_objective();
        let mut upper = task.base_objective();
        let mut optimal_feature = -1i32;

        for position in 0..bounds.len() {
            let feature = bounds[position].feature;

            if signals.get(feature) {
                // An update is pending for this split.
                let mut ready = true;
                let mut sides = [(0.0f32, 0.0f32, 0.0f32); 2];
                for (side, slot) in sides.iter_mut().enumerate() {
                    let signed = signed_feature(feature, side == 1);
                    let child = self
                        .graph
                        .children
                        .get_cloned(&(task.capture_set().clone(), signed))
                        .and_then(|child_key| self.graph.vertices.get_cloned(&child_key));
                    match child {
                        Some(handle) => *slot = child_bounds(&handle.read()),
                        None => ready = false,
                    }
                }
                if ready {
                    let (split_lower, split_upper) = self.split_bounds(sides[0], sides[1]);
                    bounds[position].lower = split_lower;
                    bounds[position].upper = split_upper;
                }
            }

            if self.config().similar_support {
                // Transfer bounds from the ordered neighbours: features
                // with similar support inside the capture set cannot have
                // very different split objectives.
                if position > 0 {
                    let neighbour = bounds[position - 1];
                    let distance = self.dataset.distance(
                        task.capture_set(),
                        feature,
                        neighbour.feature,
                        &mut local.column_buffer,
                    );
                    bounds[position].lower = bounds[position].lower.max(neighbour.lower - distance);
                    bounds[position].upper = bounds[position].upper.min(neighbour.upper + distance);
                }
                if position + 1 < bounds.len() {
                    let neighbour = bounds[position + 1];
                    let distance = self.dataset.distance(
                        task.capture_set(),
                        feature,
                        neighbour.feature,
                        &mut local.column_buffer,
                    );
                    bounds[position].lower = bounds[position].lower.max(neighbour.lower - distance);
                    bounds[position].upper = bounds[position].upper.min(neighbour.upper + distance);
                }
            }

            if bounds[position].lower > task.upperscope() {
                continue;
            }
            if bounds[position].upper < upper {
                optimal_feature = bounds[position].feature as i32;
            }
            lower = lower.min(bounds[position].lower);
            upper = upper.min(bounds[position].upper);
        }

        Ok(task.update(self.config(), lower, upper, optimal_feature))
    }

    /// Appends the back-edge from `child` to `parent`, coalescing repeat
    /// features, and records the forward edge plus the order translation.
    fn link_to_parent(
        &self,
        parent: &Bitset,
        feature: i32,
        scope: f32,
        child: &Bitset,
        order: &Translation,
    ) {
        debug_assert!(feature != 0, "non-root exploration must carry a signed feature");
        let index = (feature.unsigned_abs() - 1) as usize;
        self.graph.translations.insert((parent.clone(), feature), order.clone());
        self.graph.children.insert((parent.clone(), feature), child.clone());

        let n_features = self.dataset.n_features();
        self.graph.edges.update_or_insert_with(child.clone(), FxHashMap::default, |parents| {
            let edge = parents.entry(parent.clone()).or_insert_with(|| ParentEdge {
                features: Bitset::new(n_features, false),
                scope,
            });
            edge.features.set(index, true);
            edge.scope = edge.scope.min(scope);
        });
    }

    /// Emits exploitation messages to every parent that can use this
    /// task's bounds. Uncertain tasks only signal once their lower bound
    /// clears the scope their parents asked for.
    pub(crate) fn signal_exploiters(&self, task: &Task, key: &Bitset) {
        if task.uncertainty() != 0.0 && task.lowerbound() < task.lowerscope() - f32::EPSILON {
            return;
        }
        self.graph.edges.with(key, |parents| {
            for (parent_key, edge) in parents {
                if edge.features.empty() {
                    continue;
                }
                if task.lowerbound() < edge.scope - f32::EPSILON && task.uncertainty() > 0.0 {
                    continue;
                }
                self.queue.push(
                    Message::Exploitation {
                        sender: key.clone(),
                        recipient: parent_key.clone(),
                        features: edge.features.clone(),
                    },
                    task.support() - task.lowerbound(),
                );
            }
        });
    }

    /// Enqueues exploration messages for every child split still worth
    /// expanding under the parent's new scope.
    fn send_explorers(&self, parent: &mut Task, new_scope: f32, local: &LocalState) {
        if parent.uncertainty() == 0.0 {
            return;
        }
        parent.scope(new_scope);

        let mut exploration_boundary = parent.upperbound();
        if self.config().look_ahead {
            exploration_boundary = exploration_boundary.min(parent.upperscope());
        }

        let features: Vec<usize> = parent.feature_set().iter_set().collect();
        for j in features {
            let (Some(left), Some(right)) =
                (&local.neighbourhood[2 * j], &local.neighbourhood[2 * j + 1])
            else {
                continue;
            };
            let (lower, upper) = self.split_bounds(child_bounds(left), child_bounds(right));

            if lower > exploration_boundary {
                continue; // Out of scope.
            }
            if upper <= parent.coverage() {
                continue; // Already covered by an earlier expansion.
            }

            if self.config().rule_list {
                self.send_explorer(
                    parent,
                    left,
                    exploration_boundary - right.base_objective(),
                    signed_feature(j, false),
                );
                self.send_explorer(
                    parent,
                    right,
                    exploration_boundary - left.base_objective(),
                    signed_feature(j, true),
                );
            } else {
                self.send_explorer(
                    parent,
                    left,
                    exploration_boundary - right.guaranteed_lowerbound(self.config()),
                    signed_feature(j, false),
                );
                self.send_explorer(
                    parent,
                    right,
                    exploration_boundary - left.guaranteed_lowerbound(self.config()),
                    signed_feature(j, true),
                );
            }
        }

        parent.set_coverage(parent.upperscope());
    }

    /// Sends one child exploration, unless the child vertex already exists
    /// with a wider scope; in that case only the back-edge scope and the
    /// child's own scope are refreshed.
    fn send_explorer(&self, parent: &Task, child: &Task, scope: f32, feature: i32) {
        let mut send = true;
        let forward_key = (parent.capture_set().clone(), feature);
        if let Some(child_key) = self.graph.children.get_cloned(&forward_key) {
            if let Some(handle) = self.graph.vertices.get_cloned(&child_key) {
                let mut child_vertex = handle.write();
                if scope < child_vertex.upperscope() {
                    let n_features = self.dataset.n_features();
                    let index = (feature.unsigned_abs() - 1) as usize;
                    self.graph.edges.update_or_insert_with(
                        child_key.clone(),
                        FxHashMap::default,
                        |parents| {
                            let edge =
                                parents.entry(parent.capture_set().clone()).or_insert_with(|| {
                                    ParentEdge {
                                        features: Bitset::new(n_features, false),
                                        scope,
                                    }
                                });
                            edge.features.set(index, true);
                            edge.scope = edge.scope.min(scope);
                        },
                    );
                    child_vertex.scope(scope);
                    send = false;
                }
            }
        }
        if send {
            self.queue.push(
                Message::Exploration {
                    parent: Some(parent.capture_set().clone()),
                    capture: child.capture_set().clone(),
                    features: parent.feature_set().clone(),
                    feature,
                    scope,
                },
                parent.support() - parent.lowerbound(),
            );
        }
    }
}

/// Encodes a split side into the signed feature convention: `-(j + 1)` for
/// the negative side, `j + 1` for the positive side.
#[inline]
pub(crate) fn signed_feature(feature: usize, positive: bool) -> i32 {
    let encoded = feature as i32 + 1;
    if positive {
        encoded
    } else {
        -encoded
    }
}
