//! Lock manager scenarios across sessions: handoff, fencing, stale-writer
//! rejection, and cleanup on session deletion.

use std::sync::Arc;
use std::time::Duration;

use quill::chat::{AgentOrchestrator, OrchestratorDeps};
use quill::config::OrchestratorConfig;
use quill::error::{LlmError, WorkspaceError};
use quill::events::EventBus;
use quill::hooks::{HookExecutor, HookRegistry};
use quill::interact::InteractionManager;
use quill::llm::{ChatProvider, ChatRequest, StreamChunk};
use quill::locks::{InMemoryLockStore, LockAcquire, LockManager};
use quill::mcp::NoopMcpClient;
use quill::memory::NoopMemoryProvider;
use quill::permissions::PermissionManager;
use quill::session::{AgentSession, InMemorySessionStore, SessionStore};
use quill::tools::ToolRegistry;
use quill::workspace::WorkspaceStore;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;

fn manager() -> (Arc<LockManager>, EventBus) {
    let events = EventBus::default();
    let locks = Arc::new(LockManager::new(
        Arc::new(InMemoryLockStore::new()),
        events.clone(),
        60_000,
    ));
    (locks, events)
}

#[test]
fn test_lock_handoff_assigns_increasing_fence() {
    let (locks, _events) = manager();

    let first = locks.acquire_lock("main", "document", "doc-1", "A", None, None);
    let lock = first.lock().expect("A acquires a free key");
    assert_eq!(lock.fence_token, 1);

    let contested = locks.acquire_lock("main", "document", "doc-1", "B", None, None);
    let holder = contested.held_by().expect("B is refused while A holds");
    assert_eq!(holder.session_id, "A");

    assert!(locks.release_lock("main", "document", "doc-1", "A"));

    let second = locks.acquire_lock("main", "document", "doc-1", "B", None, None);
    let lock = second.lock().expect("B acquires after the release");
    assert_eq!(lock.fence_token, 2, "fence advances across the handoff");
    assert_eq!(lock.session_id, "B");
}

#[test]
fn test_reentrant_acquire_supersedes_own_token() {
    let (locks, _events) = manager();

    let first_acquire = locks.acquire_lock("main", "todo", "list-1", "A", None, None);
    let first = first_acquire.lock().unwrap();
    let second_acquire = locks.acquire_lock("main", "todo", "list-1", "A", None, None);
    let second = second_acquire
        .lock()
        .expect("reentrant acquire always succeeds");

    assert!(second.fence_token > first.fence_token);
    // Only the newest token is live.
    assert!(!locks.validate_fence("main", "todo", "list-1", first.fence_token));
    assert!(locks.validate_fence("main", "todo", "list-1", second.fence_token));
}

#[test]
fn test_failed_acquire_leaves_holder_untouched() {
    let (locks, _events) = manager();
    let acquire = locks.acquire_lock("main", "document", "doc-1", "A", None, None);
    let lock = acquire.lock().unwrap();

    for _ in 0..3 {
        assert!(matches!(
            locks.acquire_lock("main", "document", "doc-1", "B", None, None),
            LockAcquire::HeldBy(_)
        ));
    }
    // A's token is still the live one; the failed attempts bumped nothing.
    assert!(locks.validate_fence("main", "document", "doc-1", lock.fence_token));
}

#[test]
fn test_stale_writer_rejected_after_force_release() {
    let (locks, events) = manager();
    let workspace = WorkspaceStore::new(locks.clone(), events);

    let stale_acquire = locks.acquire_lock("main", "document", "doc-1", "A", None, None);
    let stale = stale_acquire.lock().unwrap();

    // An operator force-releases A, and B takes over.
    assert!(
        locks
            .force_release_lock("main", "document", "doc-1")
            .is_some()
    );
    let fresh_acquire = locks.acquire_lock("main", "document", "doc-1", "B", None, None);
    let fresh = fresh_acquire.lock().unwrap();

    let err = workspace
        .save_document(
            "main",
            "doc-1",
            Some("Doc".to_string()),
            "from the superseded writer".to_string(),
            "A",
            stale.fence_token,
        )
        .unwrap_err();
    assert!(matches!(err, WorkspaceError::StaleWrite { .. }));

    let saved = workspace
        .save_document(
            "main",
            "doc-1",
            Some("Doc".to_string()),
            "from the live writer".to_string(),
            "B",
            fresh.fence_token,
        )
        .unwrap();
    assert_eq!(saved.version, 1);
    assert_eq!(saved.content, "from the live writer");
}

#[test]
fn test_expired_lock_is_acquirable_and_filtered() {
    let events = EventBus::default();
    // 0ms TTL: every lock is immediately expired.
    let locks = LockManager::new(Arc::new(InMemoryLockStore::new()), events, 0);

    locks
        .acquire_lock("main", "document", "doc-1", "A", None, None)
        .lock()
        .unwrap();
    assert!(
        locks.list_scope_locks("main").is_empty(),
        "expired rows are filtered from listings"
    );

    let taken = locks.acquire_lock("main", "document", "doc-1", "B", None, None);
    assert!(taken.is_acquired(), "an expired hold does not block acquire");
}

/// Provider stub for the orchestrator-level cleanup test; never called.
struct IdleProvider;

#[async_trait]
impl ChatProvider for IdleProvider {
    async fn chat_stream(
        &self,
        _request: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamChunk, LlmError>>, LlmError> {
        Ok(futures::stream::empty().boxed())
    }
}

#[tokio::test]
async fn test_session_deletion_releases_its_locks() {
    let events = EventBus::default();
    let locks = Arc::new(LockManager::new(
        Arc::new(InMemoryLockStore::new()),
        events.clone(),
        60_000,
    ));
    let workspace = Arc::new(WorkspaceStore::new(locks.clone(), events.clone()));
    let sessions = Arc::new(InMemorySessionStore::new());
    let orchestrator = Arc::new(AgentOrchestrator::new(OrchestratorDeps {
        sessions: sessions.clone(),
        provider: Arc::new(IdleProvider),
        registry: Arc::new(ToolRegistry::new()),
        hooks: HookExecutor::new(Arc::new(HookRegistry::new())),
        permissions: Arc::new(PermissionManager::new()),
        locks: locks.clone(),
        interactions: Arc::new(InteractionManager::new()),
        memory: Arc::new(NoopMemoryProvider),
        mcp: Arc::new(NoopMcpClient),
        search: None,
        workspace,
        events,
        config: Arc::new(OrchestratorConfig::default()),
    }));
    let cleanup = orchestrator.spawn_cleanup_subscribers();

    let session = AgentSession::new("main");
    let id = session.id.clone();
    sessions.create_session(session).await.unwrap();
    locks
        .acquire_lock("main", "document", "doc-1", &id, None, None)
        .lock()
        .unwrap();
    locks
        .acquire_lock("main", "todo", "list-1", &id, None, None)
        .lock()
        .unwrap();
    assert_eq!(locks.list_session_locks("main", &id).len(), 2);

    orchestrator.delete_session(&id).await.unwrap();

    // Lock release happens on the subscriber task; poll briefly.
    let mut released = false;
    for _ in 0..100 {
        if locks.list_session_locks("main", &id).is_empty() {
            released = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(released, "deletion must cascade to lock release");
    cleanup.abort();
}
