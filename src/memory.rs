//! Memory bundle types and the retrieval collaborator trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One retrievable memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: String,
    pub content: String,
}

/// Memories assembled for injection, split by tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryBundle {
    /// Memories attached to the user across all scopes.
    pub user: Vec<MemoryItem>,
    /// Memories belonging to the workspace scope.
    pub scope: Vec<MemoryItem>,
    /// Memories created during this session.
    pub session: Vec<MemoryItem>,
}

impl MemoryBundle {
    pub fn is_empty(&self) -> bool {
        self.user.is_empty() && self.scope.is_empty() && self.session.is_empty()
    }

    /// Flatten all tiers into one list, user tier first.
    pub fn all(&self) -> Vec<&MemoryItem> {
        self.user
            .iter()
            .chain(self.scope.iter())
            .chain(self.session.iter())
            .collect()
    }
}

/// Retrieval collaborator. The actual store (vector index, SQLite, files)
/// lives outside the core.
#[async_trait]
pub trait MemoryProvider: Send + Sync {
    /// Retrieve memories relevant to a session and optional query.
    async fn retrieve(&self, scope: &str, session_id: &str, query: Option<&str>) -> MemoryBundle;
}

/// Provider that returns nothing; used when memory is not configured.
#[derive(Debug, Default)]
pub struct NoopMemoryProvider;

#[async_trait]
impl MemoryProvider for NoopMemoryProvider {
    async fn retrieve(&self, _scope: &str, _session_id: &str, _query: Option<&str>) -> MemoryBundle {
        MemoryBundle::default()
    }
}
