//! In-memory conversation store

use super::{not_found, title_or_default, Conversation, ConversationStore, Message, NewMessage, LIST_LIMIT};
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    conversations: HashMap<Uuid, Conversation>,
    messages: HashMap<Uuid, Vec<Message>>,
}

impl Inner {
    fn owned(&self, owner: Uuid, conversation_id: Uuid) -> Result<&Conversation> {
        self.conversations
            .get(&conversation_id)
            .filter(|c| c.user_id == owner)
            .ok_or_else(|| not_found(conversation_id))
    }

    fn owned_mut(&mut self, owner: Uuid, conversation_id: Uuid) -> Result<&mut Conversation> {
        self.conversations
            .get_mut(&conversation_id)
            .filter(|c| c.user_id == owner)
            .ok_or_else(|| not_found(conversation_id))
    }
}

/// Process-local store, lost on restart
#[derive(Clone, Default)]
pub struct InMemoryConversationStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn create_conversation(&self, owner: Uuid, title: Option<&str>) -> Result<Conversation> {
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            user_id: owner,
            title: title_or_default(title),
            created_at: now,
            updated_at: now,
        };

        let mut inner = self.inner.write().await;
        inner.messages.insert(conversation.id, Vec::new());
        inner.conversations.insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn list_conversations(&self, owner: Uuid) -> Result<Vec<Conversation>> {
        let inner = self.inner.read().await;
        let mut items: Vec<Conversation> = inner
            .conversations
            .values()
            .filter(|c| c.user_id == owner)
            .cloned()
            .collect();

        items.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        items.truncate(LIST_LIMIT);
        Ok(items)
    }

    async fn append_message(&self, owner: Uuid, conversation_id: Uuid, message: NewMessage) -> Result<Message> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        inner.owned_mut(owner, conversation_id)?.updated_at = now;

        let stored = Message {
            id: Uuid::new_v4(),
            conversation_id,
            role: message.role,
            content: message.content,
            metadata: message.metadata,
            created_at: now,
        };
        inner
            .messages
            .entry(conversation_id)
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    async fn list_messages(&self, owner: Uuid, conversation_id: Uuid) -> Result<Vec<Message>> {
        let inner = self.inner.read().await;
        inner.owned(owner, conversation_id)?;
        Ok(inner.messages.get(&conversation_id).cloned().unwrap_or_default())
    }

    async fn delete_conversation(&self, owner: Uuid, conversation_id: Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.owned(owner, conversation_id)?;
        inner.conversations.remove(&conversation_id);
        inner.messages.remove(&conversation_id);
        Ok(())
    }
}
