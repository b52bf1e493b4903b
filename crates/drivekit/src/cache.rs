//! Short-TTL consistency cache for recent creates and deletes.
//!
//! The backend class this crate abstracts offers no guaranteed
//! read-after-write visibility and no native directories. This cache
//! masks both gaps for callers operating against the same running
//! instance: a key recorded as created answers "exists" immediately, a
//! key recorded as deleted answers "gone" immediately, and virtual
//! directories exist the moment `create` registers them.
//!
//! The TTL is a heuristic upper bound on backend propagation delay, not
//! a correctness guarantee: another process observing the same backend
//! is not covered and may see stale state within the window.
//!
//! Entries are purged lazily on the next access; there is no sweeper
//! task. Keys are stored normalized (no surrounding separators) — the
//! entity layer trims before recording or querying.

// Mutex::lock().unwrap() only panics on lock poisoning (prior panic while
// holding the lock). This is intentional - corrupted state should not propagate.
#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default entry lifetime: a generous upper bound on how long an
/// eventually consistent backend takes to converge.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// What the cache knows about a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheAnswer {
    /// A live "created" entry exists and no live "deleted" entry
    /// overrides it.
    Created,
    /// A live "deleted" entry exists.
    Deleted,
    /// The cache has no live opinion; ask the backend.
    Unknown,
}

#[derive(Default)]
struct State {
    /// key -> expiry instant
    created: HashMap<String, Instant>,
    deleted: HashMap<String, Instant>,
}

impl State {
    fn purge(&mut self, now: Instant) {
        self.created.retain(|_, expiry| *expiry > now);
        self.deleted.retain(|_, expiry| *expiry > now);
    }
}

/// Memory of recent creates and deletes, consulted before trusting a
/// backend query.
///
/// Owned per filesystem instance, never process-wide: two instances
/// against the same backend keep independent (and possibly divergent)
/// views, which is the documented limitation of this design.
pub struct ConsistencyCache {
    ttl: Duration,
    state: Mutex<State>,
}

impl ConsistencyCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: Mutex::new(State::default()),
        }
    }

    pub fn with_default_ttl() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }

    /// Record that `key` was just created. Removes any live "deleted"
    /// entry for the same key: the most recent mutation wins.
    pub fn record_created(&self, key: &str) {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();
        state.purge(now);
        state.deleted.remove(key);
        state.created.insert(key.to_string(), now + self.ttl);
        tracing::trace!(key, "cache: recorded create");
    }

    /// Record that `key` was just deleted, overriding any live
    /// "created" entry.
    pub fn record_deleted(&self, key: &str) {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();
        state.purge(now);
        state.created.remove(key);
        state.deleted.insert(key.to_string(), now + self.ttl);
        tracing::trace!(key, "cache: recorded delete");
    }

    /// Record that `key` and everything beneath it were just deleted.
    ///
    /// Besides the entry for `key` itself, every live "created" entry
    /// whose key lies under `key` flips to "deleted", so a cached
    /// subdirectory cannot outlive the removal of its parent tree. An
    /// empty `key` means the keyspace root: all cached entries flip.
    pub fn record_deleted_tree(&self, key: &str, sep: char) {
        let now = Instant::now();
        let expiry = now + self.ttl;
        let mut state = self.state.lock().unwrap();
        state.purge(now);

        let prefix = format!("{key}{sep}");
        let descendants: Vec<String> = state
            .created
            .keys()
            .filter(|k| key.is_empty() || k.starts_with(&prefix))
            .cloned()
            .collect();
        for descendant in descendants {
            state.created.remove(&descendant);
            state.deleted.insert(descendant, expiry);
        }
        if !key.is_empty() {
            state.created.remove(key);
            state.deleted.insert(key.to_string(), expiry);
        }
        tracing::trace!(key, "cache: recorded tree delete");
    }

    /// Consult the cache. Deleted wins over created; expired entries are
    /// purged before answering.
    pub fn answer(&self, key: &str) -> CacheAnswer {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();
        state.purge(now);
        if state.deleted.contains_key(key) {
            CacheAnswer::Deleted
        } else if state.created.contains_key(key) {
            CacheAnswer::Created
        } else {
            CacheAnswer::Unknown
        }
    }

    /// Live entry counts `(created, deleted)`, after a purge.
    pub fn len(&self) -> (usize, usize) {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();
        state.purge(now);
        (state.created.len(), state.deleted.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == (0, 0)
    }
}
