//! Fencing-token resource lock manager.
//!
//! Guards exclusive access to logical resources (documents, todo lists)
//! across concurrent sessions. Independent of the hook pipeline: tool
//! executors and API routes call it directly. Every lifecycle change emits a
//! `resource:lock.changed` event.

pub mod store;

use std::sync::Arc;

use chrono::Utc;

pub use store::{InMemoryLockStore, LockKey, LockStore, ReadRecord, ResourceLock};

use crate::events::{DomainEvent, EventBus, LockChange};

/// Who holds a contested lock, for conflict messages.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LockHolder {
    pub session_id: String,
    pub acquired_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub reason: Option<String>,
}

/// Outcome of an acquisition attempt. A conflict is a value, not an error.
#[derive(Debug, Clone)]
pub enum LockAcquire {
    Acquired(ResourceLock),
    HeldBy(LockHolder),
}

impl LockAcquire {
    pub fn is_acquired(&self) -> bool {
        matches!(self, LockAcquire::Acquired(_))
    }

    pub fn lock(&self) -> Option<&ResourceLock> {
        match self {
            LockAcquire::Acquired(lock) => Some(lock),
            LockAcquire::HeldBy(_) => None,
        }
    }

    pub fn held_by(&self) -> Option<&LockHolder> {
        match self {
            LockAcquire::Acquired(_) => None,
            LockAcquire::HeldBy(holder) => Some(holder),
        }
    }
}

/// Policy layer over a [`LockStore`].
///
/// All operations are synchronous: they either succeed or return a
/// definitive failure value, never partial state.
pub struct LockManager {
    store: Arc<dyn LockStore>,
    events: EventBus,
    default_ttl_ms: u64,
}

impl LockManager {
    pub fn new(store: Arc<dyn LockStore>, events: EventBus, default_ttl_ms: u64) -> Self {
        Self {
            store,
            events,
            default_ttl_ms,
        }
    }

    /// Acquire (or reentrantly refresh) a lock.
    ///
    /// Free keys, expired holders, and the caller's own live lock all
    /// acquire: the fence counter bumps, the row is upserted with fresh
    /// timestamps. A live lock held by another session fails with the
    /// holder's description; a failed acquire never mutates the table.
    pub fn acquire_lock(
        &self,
        scope: &str,
        resource_type: &str,
        resource_id: &str,
        session_id: &str,
        reason: Option<String>,
        ttl_ms: Option<u64>,
    ) -> LockAcquire {
        let key = LockKey::new(scope, resource_type, resource_id);
        let now = Utc::now();

        if let Some(existing) = self.store.get(&key) {
            let expired = existing.is_expired(now);
            let reentrant = existing.session_id == session_id;
            if !expired && !reentrant {
                return LockAcquire::HeldBy(LockHolder {
                    session_id: existing.session_id.clone(),
                    acquired_at: existing.acquired_at,
                    expires_at: existing.expires_at(),
                    reason: existing.reason.clone(),
                });
            }
            if expired && !reentrant {
                tracing::debug!(
                    scope, resource_type, resource_id,
                    stale_holder = %existing.session_id,
                    "Superseding expired lock"
                );
            }
        }

        let fence_token = self.store.next_fence(&key);
        let lock = ResourceLock {
            key: key.clone(),
            session_id: session_id.to_string(),
            fence_token,
            acquired_at: now,
            last_heartbeat: now,
            ttl_ms: ttl_ms.unwrap_or(self.default_ttl_ms),
            reason,
            metadata: None,
        };
        self.store.put(lock.clone());
        self.emit_change(&key, session_id, LockChange::Acquired, fence_token);
        LockAcquire::Acquired(lock)
    }

    /// Refresh the heartbeat iff the caller is the live holder.
    pub fn heartbeat_lock(
        &self,
        scope: &str,
        resource_type: &str,
        resource_id: &str,
        session_id: &str,
    ) -> bool {
        let key = LockKey::new(scope, resource_type, resource_id);
        let now = Utc::now();
        match self.store.get(&key) {
            Some(mut lock) if lock.session_id == session_id && !lock.is_expired(now) => {
                lock.last_heartbeat = now;
                self.store.put(lock);
                true
            }
            _ => false,
        }
    }

    /// Release iff the caller holds the lock. A non-holder can never release
    /// another session's lock.
    pub fn release_lock(
        &self,
        scope: &str,
        resource_type: &str,
        resource_id: &str,
        session_id: &str,
    ) -> bool {
        let key = LockKey::new(scope, resource_type, resource_id);
        match self.store.get(&key) {
            Some(lock) if lock.session_id == session_id => {
                self.store.remove(&key);
                self.emit_change(&key, session_id, LockChange::Released, lock.fence_token);
                true
            }
            _ => false,
        }
    }

    /// Administrative override: delete regardless of holder, returning the
    /// removed row for audit logging.
    pub fn force_release_lock(
        &self,
        scope: &str,
        resource_type: &str,
        resource_id: &str,
    ) -> Option<ResourceLock> {
        let key = LockKey::new(scope, resource_type, resource_id);
        let removed = self.store.remove(&key)?;
        tracing::info!(
            scope, resource_type, resource_id,
            holder = %removed.session_id,
            "Force-released lock"
        );
        self.emit_change(
            &key,
            &removed.session_id,
            LockChange::ForceReleased,
            removed.fence_token,
        );
        Some(removed)
    }

    /// Bulk-delete every lock a session holds; one event per released lock
    /// so dependent subsystems observe each release individually.
    pub fn release_session_locks(&self, scope: &str, session_id: &str) -> usize {
        let removed = self.store.remove_session(scope, session_id);
        for lock in &removed {
            self.emit_change(&lock.key, session_id, LockChange::Released, lock.fence_token);
        }
        removed.len()
    }

    /// True only if the resource currently has a live lock whose fence token
    /// equals `token`. Writers call this to detect they were superseded
    /// mid-operation.
    pub fn validate_fence(
        &self,
        scope: &str,
        resource_type: &str,
        resource_id: &str,
        token: u64,
    ) -> bool {
        let key = LockKey::new(scope, resource_type, resource_id);
        match self.store.get(&key) {
            Some(lock) => !lock.is_expired(Utc::now()) && lock.fence_token == token,
            None => false,
        }
    }

    /// Live locks in a scope. Expired rows are filtered here; the raw store
    /// returns everything.
    pub fn list_scope_locks(&self, scope: &str) -> Vec<ResourceLock> {
        let now = Utc::now();
        self.store
            .list_scope(scope)
            .into_iter()
            .filter(|l| !l.is_expired(now))
            .collect()
    }

    /// Live locks a session holds in a scope.
    pub fn list_session_locks(&self, scope: &str, session_id: &str) -> Vec<ResourceLock> {
        let now = Utc::now();
        self.store
            .list_session(scope, session_id)
            .into_iter()
            .filter(|l| !l.is_expired(now))
            .collect()
    }

    /// Append a read-audit row, independent of locking.
    pub fn record_read(
        &self,
        scope: &str,
        resource_type: &str,
        resource_id: &str,
        session_id: &str,
        version: impl Into<String>,
    ) {
        self.store.record_read(ReadRecord {
            key: LockKey::new(scope, resource_type, resource_id),
            session_id: session_id.to_string(),
            version: version.into(),
            read_at: Utc::now(),
        });
    }

    /// Most recent read a session recorded for a resource.
    pub fn last_read(
        &self,
        scope: &str,
        resource_type: &str,
        resource_id: &str,
        session_id: &str,
    ) -> Option<ReadRecord> {
        self.store
            .last_read(&LockKey::new(scope, resource_type, resource_id), session_id)
    }

    fn emit_change(&self, key: &LockKey, session_id: &str, change: LockChange, fence_token: u64) {
        self.events.emit(DomainEvent::LockChanged {
            scope: key.scope.clone(),
            resource_type: key.resource_type.clone(),
            resource_id: key.resource_id.clone(),
            session_id: session_id.to_string(),
            change,
            fence_token,
            at: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> LockManager {
        LockManager::new(Arc::new(InMemoryLockStore::new()), EventBus::default(), 60_000)
    }

    #[test]
    fn mutual_exclusion_and_handoff() {
        let locks = manager();

        let a = locks.acquire_lock("main", "document", "doc-1", "A", None, None);
        assert!(a.is_acquired());
        assert_eq!(a.lock().unwrap().fence_token, 1);

        let b = locks.acquire_lock("main", "document", "doc-1", "B", None, None);
        assert_eq!(b.held_by().unwrap().session_id, "A");

        assert!(locks.release_lock("main", "document", "doc-1", "A"));

        let b = locks.acquire_lock("main", "document", "doc-1", "B", None, None);
        assert!(b.is_acquired());
        assert_eq!(b.lock().unwrap().fence_token, 2);
    }

    #[test]
    fn fence_tokens_strictly_increase() {
        let locks = manager();
        let mut previous = 0;
        for session in ["A", "B", "C"] {
            let acquired = locks.acquire_lock("main", "todo", "list-1", session, None, None);
            let token = acquired.lock().unwrap().fence_token;
            assert!(token > previous, "fence must strictly increase: {token}");
            previous = token;
            assert!(locks.release_lock("main", "todo", "list-1", session));
        }
    }

    #[test]
    fn reentrant_acquire_refreshes_without_conflict() {
        let locks = manager();
        let first = locks.acquire_lock("main", "document", "doc-1", "A", None, None);
        let again = locks.acquire_lock("main", "document", "doc-1", "A", None, None);
        assert!(again.is_acquired(), "self re-acquire always succeeds");
        // The refreshed token supersedes the old one; only one live token exists.
        assert!(
            again.lock().unwrap().fence_token > first.lock().unwrap().fence_token
        );
        assert!(!locks.validate_fence(
            "main",
            "document",
            "doc-1",
            first.lock().unwrap().fence_token
        ));
        assert!(locks.validate_fence(
            "main",
            "document",
            "doc-1",
            again.lock().unwrap().fence_token
        ));
    }

    #[test]
    fn expired_lock_is_silently_superseded() {
        let locks = manager();
        // TTL of zero: expired as soon as any time passes.
        let first = locks.acquire_lock("main", "document", "doc-1", "A", None, Some(0));
        assert!(first.is_acquired());
        std::thread::sleep(std::time::Duration::from_millis(5));

        let second = locks.acquire_lock("main", "document", "doc-1", "B", None, None);
        assert!(second.is_acquired(), "expired holder must not block");
        assert!(second.lock().unwrap().fence_token > first.lock().unwrap().fence_token);
    }

    #[test]
    fn non_holder_cannot_release() {
        let locks = manager();
        locks.acquire_lock("main", "document", "doc-1", "A", None, None);
        assert!(!locks.release_lock("main", "document", "doc-1", "B"));
        // A's lock is still live
        let b = locks.acquire_lock("main", "document", "doc-1", "B", None, None);
        assert!(!b.is_acquired());
    }

    #[test]
    fn force_release_returns_removed_row() {
        let locks = manager();
        locks.acquire_lock("main", "document", "doc-1", "A", Some("editing".to_string()), None);
        let removed = locks.force_release_lock("main", "document", "doc-1").unwrap();
        assert_eq!(removed.session_id, "A");
        assert_eq!(removed.reason.as_deref(), Some("editing"));
        assert!(locks.force_release_lock("main", "document", "doc-1").is_none());
    }

    #[test]
    fn release_session_locks_emits_one_event_each() {
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let locks = LockManager::new(Arc::new(InMemoryLockStore::new()), events, 60_000);

        locks.acquire_lock("main", "document", "doc-1", "A", None, None);
        locks.acquire_lock("main", "todo", "list-1", "A", None, None);
        locks.acquire_lock("main", "document", "doc-2", "B", None, None);

        let released = locks.release_session_locks("main", "A");
        assert_eq!(released, 2);

        let mut release_events = 0;
        while let Ok(event) = rx.try_recv() {
            if let DomainEvent::LockChanged {
                change: LockChange::Released,
                session_id,
                ..
            } = event
            {
                assert_eq!(session_id, "A");
                release_events += 1;
            }
        }
        assert_eq!(release_events, 2, "one event per released lock");
        assert_eq!(locks.list_session_locks("main", "B").len(), 1);
    }

    #[test]
    fn validate_fence_rejects_superseded_writer() {
        let locks = manager();
        let a = locks.acquire_lock("main", "document", "doc-1", "A", None, Some(0));
        let stale_token = a.lock().unwrap().fence_token;
        std::thread::sleep(std::time::Duration::from_millis(5));

        locks.acquire_lock("main", "document", "doc-1", "B", None, None);
        assert!(
            !locks.validate_fence("main", "document", "doc-1", stale_token),
            "superseded writer must be rejected"
        );
    }

    #[test]
    fn listings_filter_expired_rows() {
        let locks = manager();
        locks.acquire_lock("main", "document", "live", "A", None, None);
        locks.acquire_lock("main", "document", "stale", "A", None, Some(0));
        std::thread::sleep(std::time::Duration::from_millis(5));

        let listed = locks.list_scope_locks("main");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].key.resource_id, "live");
    }

    #[test]
    fn heartbeat_only_for_live_holder() {
        let locks = manager();
        locks.acquire_lock("main", "document", "doc-1", "A", None, None);
        assert!(locks.heartbeat_lock("main", "document", "doc-1", "A"));
        assert!(!locks.heartbeat_lock("main", "document", "doc-1", "B"));
        assert!(!locks.heartbeat_lock("main", "document", "missing", "A"));
    }

    #[test]
    fn read_tracking_is_independent_of_locks() {
        let locks = manager();
        locks.record_read("main", "document", "doc-1", "A", "v3");
        locks.record_read("main", "document", "doc-1", "A", "v4");
        let last = locks.last_read("main", "document", "doc-1", "A").unwrap();
        assert_eq!(last.version, "v4");
        // No lock was ever taken
        assert!(locks.list_scope_locks("main").is_empty());
    }
}
