//! Human-in-the-loop interaction manager.
//!
//! Correlates a tool call requiring approval with an eventual human response.
//! The chat loop and permission engine both produce requests; an external
//! approval channel resolves them by request id.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, oneshot};
use uuid::Uuid;

/// What the human is being asked to approve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InteractDetails {
    FileAccess { paths: Vec<String> },
    TerminalCommand { command: String },
    DestructiveOperation { description: String },
    Custom { description: String },
}

impl InteractDetails {
    /// Paths this interaction covers, empty for non-path details.
    pub fn paths(&self) -> &[String] {
        match self {
            InteractDetails::FileAccess { paths } => paths,
            _ => &[],
        }
    }
}

/// A pending approval request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionRequest {
    pub id: Uuid,
    pub session_id: String,
    pub scope: String,
    pub tool_call_id: String,
    pub tool_name: String,
    pub details: InteractDetails,
    pub created_at: DateTime<Utc>,
}

/// The human's answer to an [`InteractionRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionResponse {
    pub approved: bool,
    /// Paths the approval additionally authorizes for the session.
    #[serde(default)]
    pub granted_paths: Vec<String>,
}

struct PendingInteraction {
    session_id: String,
    sender: oneshot::Sender<InteractionResponse>,
}

/// Pending-promise map keyed by request id, resolved exactly once.
#[derive(Default)]
pub struct InteractionManager {
    pending: Mutex<HashMap<Uuid, PendingInteraction>>,
}

impl InteractionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a request and the receiver its resolution arrives on.
    ///
    /// The receiver observes sender drop (session cancelled) as a rejection.
    pub async fn create_request(
        &self,
        session_id: &str,
        scope: &str,
        tool_call_id: &str,
        tool_name: &str,
        details: InteractDetails,
    ) -> (InteractionRequest, oneshot::Receiver<InteractionResponse>) {
        let request = InteractionRequest {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            scope: scope.to_string(),
            tool_call_id: tool_call_id.to_string(),
            tool_name: tool_name.to_string(),
            details,
            created_at: Utc::now(),
        };
        let (sender, receiver) = oneshot::channel();
        self.pending.lock().await.insert(
            request.id,
            PendingInteraction {
                session_id: session_id.to_string(),
                sender,
            },
        );
        (request, receiver)
    }

    /// Resolve a request. Returns false when the id is unknown or was
    /// already resolved.
    pub async fn resolve(&self, request_id: Uuid, response: InteractionResponse) -> bool {
        let Some(pending) = self.pending.lock().await.remove(&request_id) else {
            return false;
        };
        if pending.sender.send(response).is_err() {
            tracing::debug!(%request_id, "Interaction receiver dropped before resolution");
        }
        true
    }

    /// Drop every pending request for a session. Receivers observe closure.
    pub async fn cancel_session(&self, session_id: &str) -> usize {
        let mut pending = self.pending.lock().await;
        let before = pending.len();
        pending.retain(|_, p| p.session_id != session_id);
        before - pending.len()
    }

    /// Number of unresolved requests.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_delivers_response_once() {
        let manager = InteractionManager::new();
        let (request, receiver) = manager
            .create_request(
                "s1",
                "main",
                "call-1",
                "quill_file",
                InteractDetails::FileAccess {
                    paths: vec!["/x".to_string()],
                },
            )
            .await;

        assert!(
            manager
                .resolve(
                    request.id,
                    InteractionResponse {
                        approved: true,
                        granted_paths: vec!["/x".to_string()],
                    },
                )
                .await
        );
        // Second resolve of the same id fails
        assert!(
            !manager
                .resolve(
                    request.id,
                    InteractionResponse {
                        approved: false,
                        granted_paths: vec![],
                    },
                )
                .await
        );

        let response = receiver.await.unwrap();
        assert!(response.approved);
        assert_eq!(response.granted_paths, vec!["/x"]);
        assert_eq!(manager.pending_count().await, 0);
    }

    #[tokio::test]
    async fn cancel_session_closes_receivers() {
        let manager = InteractionManager::new();
        let (_request, receiver) = manager
            .create_request(
                "s1",
                "main",
                "call-1",
                "quill_terminal",
                InteractDetails::TerminalCommand {
                    command: "ls".to_string(),
                },
            )
            .await;
        let (_other, _other_rx) = manager
            .create_request(
                "s2",
                "main",
                "call-2",
                "quill_terminal",
                InteractDetails::TerminalCommand {
                    command: "ls".to_string(),
                },
            )
            .await;

        let dropped = manager.cancel_session("s1").await;
        assert_eq!(dropped, 1);
        assert!(receiver.await.is_err(), "cancelled request should close");
        assert_eq!(manager.pending_count().await, 1);
    }

    #[test]
    fn details_serialize_with_kind_tag() {
        let details = InteractDetails::FileAccess {
            paths: vec!["/new.txt".to_string()],
        };
        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["kind"], "file_access");
        assert_eq!(json["paths"][0], "/new.txt");
    }
}
