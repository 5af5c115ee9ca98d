//! In-memory workspace store: documents and todo lists.
//!
//! Stands in for the on-disk persistence collaborator. Documents carry a
//! version counter; saves are fence-checked against the lock manager so a
//! superseded writer can never clobber a newer holder's work.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::WorkspaceError;
use crate::events::{DomainEvent, EventBus};
use crate::locks::LockManager;

/// A workspace document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub content: String,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

/// One entry in a todo list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub text: String,
    pub done: bool,
}

/// A named todo list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoList {
    pub id: String,
    pub title: String,
    pub items: Vec<TodoItem>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct WorkspaceState {
    /// Keyed by (scope, document id).
    documents: HashMap<(String, String), Document>,
    /// Keyed by (scope, list id).
    todos: HashMap<(String, String), TodoList>,
}

/// Shared workspace storage with fence-checked document saves.
pub struct WorkspaceStore {
    state: RwLock<WorkspaceState>,
    locks: Arc<LockManager>,
    events: EventBus,
}

impl WorkspaceStore {
    pub fn new(locks: Arc<LockManager>, events: EventBus) -> Self {
        Self {
            state: RwLock::new(WorkspaceState::default()),
            locks,
            events,
        }
    }

    pub fn get_document(&self, scope: &str, doc_id: &str) -> Option<Document> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state
            .documents
            .get(&(scope.to_string(), doc_id.to_string()))
            .cloned()
    }

    pub fn list_documents(&self, scope: &str) -> Vec<Document> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let mut docs: Vec<Document> = state
            .documents
            .iter()
            .filter(|((s, _), _)| s == scope)
            .map(|(_, d)| d.clone())
            .collect();
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        docs
    }

    /// Save a document under a held lock. The caller passes the fence token
    /// from its lock acquisition; a token that no longer matches the live
    /// lock means the writer was superseded and the save is rejected.
    pub fn save_document(
        &self,
        scope: &str,
        doc_id: &str,
        title: Option<String>,
        content: String,
        session_id: &str,
        fence_token: u64,
    ) -> Result<Document, WorkspaceError> {
        if !self
            .locks
            .validate_fence(scope, "document", doc_id, fence_token)
        {
            return Err(WorkspaceError::StaleWrite {
                doc_id: doc_id.to_string(),
                token: fence_token,
            });
        }

        let doc = {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            let key = (scope.to_string(), doc_id.to_string());
            let entry = state.documents.entry(key).or_insert_with(|| Document {
                id: doc_id.to_string(),
                title: doc_id.to_string(),
                content: String::new(),
                version: 0,
                updated_at: Utc::now(),
            });
            if let Some(title) = title {
                entry.title = title;
            }
            entry.content = content;
            entry.version += 1;
            entry.updated_at = Utc::now();
            entry.clone()
        };

        self.events.emit(DomainEvent::DocumentSaved {
            scope: scope.to_string(),
            doc_id: doc_id.to_string(),
            version: doc.version,
            session_id: Some(session_id.to_string()),
        });
        Ok(doc)
    }

    pub fn delete_document(&self, scope: &str, doc_id: &str) -> bool {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state
            .documents
            .remove(&(scope.to_string(), doc_id.to_string()))
            .is_some()
    }

    pub fn get_todo_list(&self, scope: &str, list_id: &str) -> Option<TodoList> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state
            .todos
            .get(&(scope.to_string(), list_id.to_string()))
            .cloned()
    }

    pub fn list_todo_lists(&self, scope: &str) -> Vec<TodoList> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let mut lists: Vec<TodoList> = state
            .todos
            .iter()
            .filter(|((s, _), _)| s == scope)
            .map(|(_, l)| l.clone())
            .collect();
        lists.sort_by(|a, b| a.id.cmp(&b.id));
        lists
    }

    pub fn create_todo_list(&self, scope: &str, title: impl Into<String>) -> TodoList {
        let list = TodoList {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            items: Vec::new(),
            updated_at: Utc::now(),
        };
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state
            .todos
            .insert((scope.to_string(), list.id.clone()), list.clone());
        list
    }

    pub fn add_todo_item(
        &self,
        scope: &str,
        list_id: &str,
        text: impl Into<String>,
    ) -> Result<TodoItem, WorkspaceError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let list = state
            .todos
            .get_mut(&(scope.to_string(), list_id.to_string()))
            .ok_or_else(|| WorkspaceError::TodoListNotFound {
                scope: scope.to_string(),
                list_id: list_id.to_string(),
            })?;
        let item = TodoItem {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            done: false,
        };
        list.items.push(item.clone());
        list.updated_at = Utc::now();
        Ok(item)
    }

    pub fn set_todo_done(
        &self,
        scope: &str,
        list_id: &str,
        item_id: &str,
        done: bool,
    ) -> Result<(), WorkspaceError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let list = state
            .todos
            .get_mut(&(scope.to_string(), list_id.to_string()))
            .ok_or_else(|| WorkspaceError::TodoListNotFound {
                scope: scope.to_string(),
                list_id: list_id.to_string(),
            })?;
        match list.items.iter_mut().find(|i| i.id == item_id) {
            Some(item) => {
                item.done = done;
                list.updated_at = Utc::now();
                Ok(())
            }
            None => Err(WorkspaceError::TodoListNotFound {
                scope: scope.to_string(),
                list_id: format!("{list_id}/{item_id}"),
            }),
        }
    }

    pub fn delete_todo_list(&self, scope: &str, list_id: &str) -> bool {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state
            .todos
            .remove(&(scope.to_string(), list_id.to_string()))
            .is_some()
    }
}
