//! The shared dependency graph of subproblems. The DAG is encoded as two
//! directed maps (forward `children`, backward `edges`) keyed by value-typed
//! capture-set bitmasks, never by pointers.
//!
//! Concurrency model: every map is sharded by key hash, and the shard lock
//! is only held long enough to find or insert an entry. Vertices and bounds
//! lists additionally live behind per-key locks (`Arc<RwLock<Task>>`,
//! `Arc<Mutex<Vec<SplitBound>>>`) so workers hold real per-vertex guards
//! without pinning a whole shard. Lock order is self task, then own bounds,
//! then child tasks; the capture-set strict-subset relation makes that
//! order acyclic.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHasher};

use crate::bitset::Bitset;
use crate::task::{Task, Translation};

const SHARD_COUNT: usize = 64;

/// A recorded split bound: the feature index and the objective interval of
/// the best tree rooted at this vertex that splits on the feature.
#[derive(Debug, Clone, Copy)]
pub struct SplitBound {
    pub feature: usize,
    pub lower: f32,
    pub upper: f32,
}

/// Back-edge payload: which split features connect the child to this
/// parent, and the tightest scope the parent asked for.
#[derive(Debug, Clone)]
pub struct ParentEdge {
    pub features: Bitset,
    pub scope: f32,
}

/// Hash-sharded concurrent map. Point operations only; no iteration during
/// the solve.
pub struct ShardedMap<K, V> {
    shards: Box<[RwLock<FxHashMap<K, V>>]>,
}

impl<K: Eq + Hash, V> ShardedMap<K, V> {
    pub fn new() -> Self {
        let shards = (0..SHARD_COUNT).map(|_| RwLock::new(FxHashMap::default())).collect();
        ShardedMap { shards }
    }

    #[inline]
    fn shard(&self, key: &K) -> &RwLock<FxHashMap<K, V>> {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % SHARD_COUNT]
    }

    /// Clones the value stored under `key`, if any.
    pub fn get_cloned(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.shard(key).read().get(key).cloned()
    }

    /// Inserts `value` unless `key` is already present. Returns the
    /// resident value and whether this call inserted it.
    pub fn insert_or_get(&self, key: K, value: V) -> (V, bool)
    where
        V: Clone,
    {
        let mut shard = self.shard(&key).write();
        match shard.entry(key) {
            std::collections::hash_map::Entry::Occupied(occupied) => (occupied.get().clone(), false),
            std::collections::hash_map::Entry::Vacant(vacant) => (vacant.insert(value).clone(), true),
        }
    }

    /// Idempotent insert; the first value stored under `key` wins.
    pub fn insert(&self, key: K, value: V) -> bool {
        let mut shard = self.shard(&key).write();
        match shard.entry(key) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(vacant) => {
                vacant.insert(value);
                true
            }
        }
    }

    /// Runs `mutate` on the entry under `key`, creating it with `default`
    /// first when absent. The shard lock is held for the duration of the
    /// closure, so the closure must not touch other graph state.
    pub fn update_or_insert_with<R>(
        &self,
        key: K,
        default: impl FnOnce() -> V,
        mutate: impl FnOnce(&mut V) -> R,
    ) -> R {
        let mut shard = self.shard(&key).write();
        let value = shard.entry(key).or_insert_with(default);
        mutate(value)
    }

    /// Runs `read` on the entry under `key`, if any. Same restriction as
    /// `update_or_insert_with`: the closure must stay within the entry.
    pub fn with<R>(&self, key: &K, read: impl FnOnce(&V) -> R) -> Option<R> {
        self.shard(key).read().get(key).map(read)
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.read().is_empty())
    }

    pub fn clear(&self) {
        for shard in self.shards.iter() {
            shard.write().clear();
        }
    }
}

impl<K: Eq + Hash, V> Default for ShardedMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared per-vertex handle.
pub type VertexHandle = Arc<RwLock<Task>>;

/// Shared per-vertex split-bound list, ordered by feature ascending.
pub type BoundsHandle = Arc<Mutex<Vec<SplitBound>>>;

/// The concurrent dependency graph. Vertices are keyed by capture set
/// (depth budget included); forward edges are keyed by the parent capture
/// set plus the signed split feature.
pub struct Graph {
    pub vertices: ShardedMap<Bitset, VertexHandle>,
    pub edges: ShardedMap<Bitset, FxHashMap<Bitset, ParentEdge>>,
    pub children: ShardedMap<(Bitset, i32), Bitset>,
    pub translations: ShardedMap<(Bitset, i32), Translation>,
    pub bounds: ShardedMap<Bitset, BoundsHandle>,
}

impl Graph {
    pub fn new() -> Self {
        Graph {
            vertices: ShardedMap::new(),
            edges: ShardedMap::new(),
            children: ShardedMap::new(),
            translations: ShardedMap::new(),
            bounds: ShardedMap::new(),
        }
    }

    /// Number of distinct subproblems reached.
    pub fn size(&self) -> usize {
        self.vertices.len()
    }

    pub fn clear(&self) {
        self.vertices.clear();
        self.edges.clear();
        self.children.clear();
        self.translations.clear();
        self.bounds.clear();
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}
