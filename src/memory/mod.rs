//! Conversation persistence
//!
//! Conversations are owned by a user; every operation takes the owner id
//! and treats a conversation belonging to someone else exactly like a
//! missing one.

pub mod postgres;
pub mod store;

pub use postgres::PgConversationStore;
pub use store::InMemoryConversationStore;

use crate::models::{ConversationTurn, Role};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub const DEFAULT_TITLE: &str = "New Conversation";

/// Most conversations returned by a listing.
pub const LIST_LIMIT: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn as_turn(&self) -> ConversationTurn {
        ConversationTurn {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub role: Role,
    pub content: String,
    #[serde(default = "empty_metadata")]
    pub metadata: serde_json::Value,
}

fn empty_metadata() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

impl NewMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            metadata: empty_metadata(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

pub(crate) fn title_or_default(title: Option<&str>) -> String {
    match title.map(str::trim) {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => DEFAULT_TITLE.to_string(),
    }
}

pub(crate) fn not_found(conversation_id: Uuid) -> crate::error::OrchestrationError {
    crate::error::OrchestrationError::NotFound(format!("conversation {}", conversation_id))
}

/// Storage for conversations and their messages
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_conversation(&self, owner: Uuid, title: Option<&str>) -> Result<Conversation>;

    /// Most recently updated first, at most `LIST_LIMIT`.
    async fn list_conversations(&self, owner: Uuid) -> Result<Vec<Conversation>>;

    /// Append a message and bump the conversation's `updated_at`.
    async fn append_message(&self, owner: Uuid, conversation_id: Uuid, message: NewMessage) -> Result<Message>;

    /// Oldest first.
    async fn list_messages(&self, owner: Uuid, conversation_id: Uuid) -> Result<Vec<Message>>;

    /// Delete a conversation together with its messages.
    async fn delete_conversation(&self, owner: Uuid, conversation_id: Uuid) -> Result<()>;
}

/// Postgres when `database_url` is set and a lazy pool can be built,
/// in-memory otherwise.
pub fn build_store(database_url: Option<&str>) -> Arc<dyn ConversationStore> {
    if let Some(url) = database_url {
        match PgConversationStore::connect_lazy(url) {
            Ok(store) => {
                info!("Conversation store backend: postgres");
                return Arc::new(store);
            }
            Err(error) => {
                warn!(
                    "Failed to initialize postgres conversation store, falling back to in-memory: {}",
                    error
                );
            }
        }
    }

    info!("Conversation store backend: in-memory");
    Arc::new(InMemoryConversationStore::new())
}
