//! The shared work queue: a thread-safe max-heap of solver messages.
//!
//! Messages carry capture-set identifiers by value, never references into
//! the graph; any worker may process any message.

use std::collections::BinaryHeap;
use std::cmp::Ordering;

use parking_lot::Mutex;

use crate::bitset::Bitset;

/// One unit of solver work.
#[derive(Debug, Clone)]
pub enum Message {
    /// Downward edge: spawn or revisit the child subproblem reached from
    /// `parent` by the signed `feature` split. `parent` is `None` only for
    /// the root seed.
    Exploration {
        parent: Option<Bitset>,
        capture: Bitset,
        features: Bitset,
        feature: i32,
        scope: f32,
    },

    /// Upward edge: the sender's bounds tightened, so the recipient should
    /// recompute the split bounds flagged in `features`.
    Exploitation {
        sender: Bitset,
        recipient: Bitset,
        features: Bitset,
    },
}

impl Message {
    pub fn is_exploration(&self) -> bool {
        matches!(self, Message::Exploration { .. })
    }
}

struct Envelope {
    priority: f32,
    message: Message,
}

impl PartialEq for Envelope {
    fn eq(&self, other: &Self) -> bool {
        self.priority.total_cmp(&other.priority) == Ordering::Equal
    }
}

impl Eq for Envelope {}

impl PartialOrd for Envelope {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Envelope {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority.total_cmp(&other.priority)
    }
}

/// Concurrent max-priority queue. `push` and `pop` are single lock
/// acquisitions; ordering across workers is best effort and convergence
/// never depends on it.
pub struct PriorityQueue {
    heap: Mutex<BinaryHeap<Envelope>>,
}

impl PriorityQueue {
    pub fn new() -> Self {
        PriorityQueue { heap: Mutex::new(BinaryHeap::new()) }
    }

    pub fn push(&self, message: Message, priority: f32) {
        self.heap.lock().push(Envelope { priority, message });
    }

    pub fn pop(&self) -> Option<Message> {
        self.heap.lock().pop().map(|envelope| envelope.message)
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }
}

impl Default for PriorityQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exploration(priority_tag: i32) -> Message {
        Message::Exploration {
            parent: None,
            capture: Bitset::new(4, true),
            features: Bitset::new(2, true),
            feature: priority_tag,
            scope: 0.0,
        }
    }

    #[test]
    fn pops_highest_priority_first() {
        let queue = PriorityQueue::new();
        queue.push(exploration(1), 0.1);
        queue.push(exploration(2), 0.9);
        queue.push(exploration(3), 0.5);

        let order: Vec<i32> = std::iter::from_fn(|| queue.pop())
            .map(|message| match message {
                Message::Exploration { feature, .. } => feature,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(order, vec![2, 3, 1]);
        assert!(queue.is_empty());
    }

    #[test]
    fn len_tracks_pushes_and_pops() {
        let queue = PriorityQueue::new();
        assert!(queue.pop().is_none());
        queue.push(exploration(0), f32::MAX);
        assert_eq!(queue.len(), 1);
        assert!(queue.pop().is_some());
        assert_eq!(queue.len(), 0);
    }
}
