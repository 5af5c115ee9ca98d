//! Lock row storage.
//!
//! The store is deliberately dumb: rows in, rows out, plus the per-key fence
//! counters which survive row deletion (tokens are never reused). All policy
//! — expiry, holder checks, reentrancy — lives in the manager. A production
//! deployment backs this with a single-writer embedded database; the
//! in-memory implementation serves tests and single-process use.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies a logical resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockKey {
    pub scope: String,
    pub resource_type: String,
    pub resource_id: String,
}

impl LockKey {
    pub fn new(
        scope: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            scope: scope.into(),
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
        }
    }
}

/// One lock row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLock {
    pub key: LockKey,
    pub session_id: String,
    /// Monotonic per key; never reused, survives row deletion.
    pub fence_token: u64,
    pub acquired_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub ttl_ms: u64,
    pub reason: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl ResourceLock {
    /// Expired iff `now > last_heartbeat + ttl_ms`. Expiry is computed, not
    /// swept.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.last_heartbeat + chrono::Duration::milliseconds(self.ttl_ms as i64)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.last_heartbeat + chrono::Duration::milliseconds(self.ttl_ms as i64)
    }
}

/// A read-audit row; read access is never exclusive, only logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadRecord {
    pub key: LockKey,
    pub session_id: String,
    /// Caller-supplied version marker (document version, content hash, ...).
    pub version: String,
    pub read_at: DateTime<Utc>,
}

/// Row storage for locks, fence counters, and read records.
pub trait LockStore: Send + Sync {
    fn get(&self, key: &LockKey) -> Option<ResourceLock>;

    fn put(&self, lock: ResourceLock);

    fn remove(&self, key: &LockKey) -> Option<ResourceLock>;

    /// Remove every lock a session holds within a scope, returning the rows.
    fn remove_session(&self, scope: &str, session_id: &str) -> Vec<ResourceLock>;

    /// Issue the next fence token for a key. Strictly increasing per key.
    fn next_fence(&self, key: &LockKey) -> u64;

    /// All rows in a scope, including logically expired ones.
    fn list_scope(&self, scope: &str) -> Vec<ResourceLock>;

    /// All rows held by a session in a scope, including expired ones.
    fn list_session(&self, scope: &str, session_id: &str) -> Vec<ResourceLock>;

    fn record_read(&self, record: ReadRecord);

    /// Most recent read record for a key by a session.
    fn last_read(&self, key: &LockKey, session_id: &str) -> Option<ReadRecord>;
}

#[derive(Debug, Default)]
struct InMemoryState {
    locks: HashMap<LockKey, ResourceLock>,
    fences: HashMap<LockKey, u64>,
    reads: Vec<ReadRecord>,
}

/// In-memory [`LockStore`].
#[derive(Debug, Default)]
pub struct InMemoryLockStore {
    state: Mutex<InMemoryState>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockStore for InMemoryLockStore {
    fn get(&self, key: &LockKey) -> Option<ResourceLock> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).locks.get(key).cloned()
    }

    fn put(&self, lock: ResourceLock) {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .locks
            .insert(lock.key.clone(), lock);
    }

    fn remove(&self, key: &LockKey) -> Option<ResourceLock> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).locks.remove(key)
    }

    fn remove_session(&self, scope: &str, session_id: &str) -> Vec<ResourceLock> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let keys: Vec<LockKey> = state
            .locks
            .values()
            .filter(|l| l.key.scope == scope && l.session_id == session_id)
            .map(|l| l.key.clone())
            .collect();
        keys.iter().filter_map(|k| state.locks.remove(k)).collect()
    }

    fn next_fence(&self, key: &LockKey) -> u64 {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let counter = state.fences.entry(key.clone()).or_insert(0);
        *counter += 1;
        *counter
    }

    fn list_scope(&self, scope: &str) -> Vec<ResourceLock> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .locks
            .values()
            .filter(|l| l.key.scope == scope)
            .cloned()
            .collect()
    }

    fn list_session(&self, scope: &str, session_id: &str) -> Vec<ResourceLock> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .locks
            .values()
            .filter(|l| l.key.scope == scope && l.session_id == session_id)
            .cloned()
            .collect()
    }

    fn record_read(&self, record: ReadRecord) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).reads.push(record);
    }

    fn last_read(&self, key: &LockKey, session_id: &str) -> Option<ReadRecord> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .reads
            .iter()
            .rev()
            .find(|r| &r.key == key && r.session_id == session_id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fence_counter_survives_row_deletion() {
        let store = InMemoryLockStore::new();
        let key = LockKey::new("main", "document", "doc-1");
        assert_eq!(store.next_fence(&key), 1);
        store.put(ResourceLock {
            key: key.clone(),
            session_id: "A".to_string(),
            fence_token: 1,
            acquired_at: Utc::now(),
            last_heartbeat: Utc::now(),
            ttl_ms: 1000,
            reason: None,
            metadata: None,
        });
        store.remove(&key);
        assert_eq!(store.next_fence(&key), 2, "tokens are never reused");
    }

    #[test]
    fn fence_counters_are_per_key() {
        let store = InMemoryLockStore::new();
        let doc = LockKey::new("main", "document", "doc-1");
        let todo = LockKey::new("main", "todo", "list-1");
        assert_eq!(store.next_fence(&doc), 1);
        assert_eq!(store.next_fence(&doc), 2);
        assert_eq!(store.next_fence(&todo), 1);
    }

    #[test]
    fn operations_recover_from_poisoned_state() {
        let store = InMemoryLockStore::new();
        let key = LockKey::new("main", "document", "doc-1");
        assert_eq!(store.next_fence(&key), 1);

        // Panic while holding the state mutex, then keep using the store.
        std::thread::scope(|s| {
            let handle = s.spawn(|| {
                let _guard = store.state.lock().unwrap();
                panic!("poisoning panic");
            });
            assert!(handle.join().is_err());
        });

        store.put(ResourceLock {
            key: key.clone(),
            session_id: "A".to_string(),
            fence_token: 2,
            acquired_at: Utc::now(),
            last_heartbeat: Utc::now(),
            ttl_ms: 1000,
            reason: None,
            metadata: None,
        });
        assert_eq!(store.next_fence(&key), 2);
        assert!(store.get(&key).is_some());
        assert_eq!(store.list_scope("main").len(), 1);
    }

    #[test]
    fn last_read_returns_most_recent() {
        let store = InMemoryLockStore::new();
        let key = LockKey::new("main", "document", "doc-1");
        for version in ["v1", "v2"] {
            store.record_read(ReadRecord {
                key: key.clone(),
                session_id: "A".to_string(),
                version: version.to_string(),
                read_at: Utc::now(),
            });
        }
        let record = store.last_read(&key, "A").unwrap();
        assert_eq!(record.version, "v2");
        assert!(store.last_read(&key, "B").is_none());
    }
}
