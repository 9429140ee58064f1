//! Keyed state store
//!
//! Agents keep their per-actor and per-user state behind [`Store`] so a
//! durable backend can replace the in-memory one without touching the
//! scoring and allocation code.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;

/// Minimal key-value contract used by the agents
pub trait Store<K, V>: Send + Sync {
    /// Clone of the value stored under `key`
    fn get(&self, key: &K) -> Option<V>;

    /// Insert or replace, returning the previous value
    fn put(&self, key: K, value: V) -> Option<V>;

    /// Snapshot of every entry. Order is unspecified.
    fn scan(&self) -> Vec<(K, V)>;

    fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    fn len(&self) -> usize {
        self.scan().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub type SharedStore<K, V> = Arc<dyn Store<K, V>>;

/// In-memory store backed by a sharded concurrent map
#[derive(Debug)]
pub struct MemoryStore<K: Eq + Hash, V> {
    entries: DashMap<K, V>,
}

impl<K: Eq + Hash, V> Default for MemoryStore<K, V> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<K, V> MemoryStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedStore<K, V> {
        Arc::new(Self::new())
    }
}

impl<K, V> Store<K, V> for MemoryStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    fn put(&self, key: K, value: V) -> Option<V> {
        self.entries.insert(key, value)
    }

    fn scan(&self) -> Vec<(K, V)> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
