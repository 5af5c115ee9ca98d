//! Session and message model, plus the session store collaborator trait.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::SessionError;

/// Lifecycle status of a tool call within a message.
///
/// The string values are a wire contract with clients; changing them breaks
/// the streaming protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Preparing,
    Running,
    AwaitingInteract,
    Done,
}

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// One element of a message: a text segment or a tool-call segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        /// Raw argument string as emitted by the model (opaque JSON).
        arguments: String,
        result: Option<String>,
        error: bool,
        status: ToolCallStatus,
        elapsed_ms: Option<u64>,
    },
}

/// Token usage snapshot for one model call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    /// Sum another usage snapshot into this one.
    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// One turn element in a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: String,
    pub role: Role,
    pub parts: Vec<MessagePart>,
    pub created_at: DateTime<Utc>,
    pub model: Option<String>,
    pub usage: Option<TokenUsage>,
}

impl AgentMessage {
    /// Create a message with a single text part.
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            parts: vec![MessagePart::Text { text: text.into() }],
            created_at: Utc::now(),
            model: None,
            usage: None,
        }
    }

    /// Concatenated text of all text parts.
    pub fn text_content(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::Text { text } => Some(text.as_str()),
                MessagePart::ToolCall { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// A recorded point in a session's history enabling rollback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub label: String,
    /// Messages up to and including this index survive a rollback.
    pub message_index: usize,
    pub created_at: DateTime<Utc>,
}

/// Output field kind for a background task's declared result schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Text,
    Number,
    Boolean,
    Json,
}

/// One field of a background task's output schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputField {
    pub name: String,
    pub kind: OutputKind,
    pub description: String,
    pub required: bool,
}

/// Declared output schema for a background task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSpec {
    pub fields: Vec<OutputField>,
}

/// Metadata for a background session's task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundTask {
    pub description: String,
    pub output_spec: Option<OutputSpec>,
}

/// What kind of session this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Interactive,
    Background,
    Tool,
}

/// Transient chat status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Chatting,
}

/// One conversation thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSession {
    pub id: String,
    pub scope: String,
    pub messages: Vec<AgentMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub summary: Option<String>,
    pub compressed_through_round: Option<u32>,
    pub checkpoints: Vec<Checkpoint>,
    /// Filesystem paths this session has been authorized to touch.
    /// Set semantics: deduped on insert.
    pub granted_paths: Vec<String>,
    pub kind: SessionKind,
    pub background_task: Option<BackgroundTask>,
    pub workflow_session: bool,
    pub status: SessionStatus,
}

impl AgentSession {
    /// Create a fresh interactive session.
    pub fn new(scope: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            scope: scope.into(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            summary: None,
            compressed_through_round: None,
            checkpoints: Vec::new(),
            granted_paths: Vec::new(),
            kind: SessionKind::Interactive,
            background_task: None,
            workflow_session: false,
            status: SessionStatus::Idle,
        }
    }

    /// Switch the session kind (builder style).
    pub fn with_kind(mut self, kind: SessionKind) -> Self {
        self.kind = kind;
        self
    }

    /// Attach a background task (builder style).
    pub fn with_background_task(mut self, task: BackgroundTask) -> Self {
        self.kind = SessionKind::Background;
        self.background_task = Some(task);
        self
    }

    /// Add paths to the granted set, skipping duplicates.
    pub fn grant_paths(&mut self, paths: &[String]) {
        for path in paths {
            if !self.granted_paths.contains(path) {
                self.granted_paths.push(path.clone());
            }
        }
    }
}

/// Partial update applied by [`SessionStore::update_session`].
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub summary: Option<String>,
    pub compressed_through_round: Option<u32>,
    pub status: Option<SessionStatus>,
    /// Paths to merge into the granted set.
    pub add_granted_paths: Vec<String>,
    pub push_checkpoint: Option<Checkpoint>,
}

/// CRUD over sessions. The core never persists directly; this trait is the
/// boundary to whatever storage owns session data.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, session: AgentSession) -> Result<(), SessionError>;

    async fn get_session(&self, id: &str) -> Result<AgentSession, SessionError>;

    async fn append_message(&self, id: &str, message: AgentMessage) -> Result<(), SessionError>;

    async fn update_session(&self, id: &str, update: SessionUpdate) -> Result<(), SessionError>;

    /// Remove a contiguous suffix, keeping `keep` messages.
    async fn truncate_messages(&self, id: &str, keep: usize) -> Result<usize, SessionError>;

    /// Copy a session under a fresh id, returning the new session.
    async fn fork_session(&self, id: &str) -> Result<AgentSession, SessionError>;

    async fn delete_session(&self, id: &str) -> Result<AgentSession, SessionError>;
}

/// In-memory session store used by tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, AgentSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create_session(&self, session: AgentSession) -> Result<(), SessionError> {
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session);
        Ok(())
    }

    async fn get_session(&self, id: &str) -> Result<AgentSession, SessionError> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })
    }

    async fn append_message(&self, id: &str, message: AgentMessage) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })?;
        session.messages.push(message);
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn update_session(&self, id: &str, update: SessionUpdate) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })?;
        if let Some(summary) = update.summary {
            session.summary = Some(summary);
        }
        if let Some(round) = update.compressed_through_round {
            session.compressed_through_round = Some(round);
        }
        if let Some(status) = update.status {
            session.status = status;
        }
        session.grant_paths(&update.add_granted_paths);
        if let Some(checkpoint) = update.push_checkpoint {
            session.checkpoints.push(checkpoint);
        }
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn truncate_messages(&self, id: &str, keep: usize) -> Result<usize, SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })?;
        let removed = session.messages.len().saturating_sub(keep);
        session.messages.truncate(keep);
        session.updated_at = Utc::now();
        Ok(removed)
    }

    async fn fork_session(&self, id: &str) -> Result<AgentSession, SessionError> {
        let mut sessions = self.sessions.write().await;
        let original = sessions
            .get(id)
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })?;
        let mut forked = original.clone();
        forked.id = Uuid::new_v4().to_string();
        forked.created_at = Utc::now();
        forked.updated_at = forked.created_at;
        forked.status = SessionStatus::Idle;
        sessions.insert(forked.id.clone(), forked.clone());
        Ok(forked)
    }

    async fn delete_session(&self, id: &str) -> Result<AgentSession, SessionError> {
        self.sessions
            .write()
            .await
            .remove(id)
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })
    }
}
