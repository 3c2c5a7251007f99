//! Postgres conversation store (sqlx)
//!
//! Tables are created on first use. Messages reference their conversation
//! with `ON DELETE CASCADE`, so deleting a conversation removes its history.

use super::{not_found, title_or_default, Conversation, ConversationStore, Message, NewMessage, LIST_LIMIT};
use crate::error::OrchestrationError;
use crate::models::Role;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::sync::Arc;
use tokio::sync::OnceCell;
use uuid::Uuid;

pub struct PgConversationStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PgConversationStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        }
    }

    /// Builds the pool without connecting; the first query opens it.
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)?;
        Ok(Self::new(pool))
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS conversations (
                      id UUID PRIMARY KEY,
                      user_id UUID NOT NULL,
                      title TEXT NOT NULL,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                      updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS messages (
                      id UUID PRIMARY KEY,
                      conversation_id UUID NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                      role TEXT NOT NULL,
                      content TEXT NOT NULL,
                      metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_conversations_user_updated
                    ON conversations (user_id, updated_at DESC);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_messages_conversation_time
                    ON messages (conversation_id, created_at);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                OrchestrationError::DatabaseError(format!(
                    "Failed to initialize conversation schema: {}",
                    e
                ))
            })?;

        Ok(())
    }

    async fn ensure_owned(&self, owner: Uuid, conversation_id: Uuid) -> Result<()> {
        let row = sqlx::query("SELECT id FROM conversations WHERE id = $1 AND user_id = $2")
            .bind(conversation_id)
            .bind(owner)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(_) => Ok(()),
            None => Err(not_found(conversation_id)),
        }
    }
}

fn role_to_db(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
    }
}

fn role_from_db(role: &str) -> Role {
    match role.to_lowercase().as_str() {
        "assistant" => Role::Assistant,
        "system" => Role::System,
        _ => Role::User,
    }
}

fn conversation_from_row(row: &PgRow) -> Result<Conversation> {
    Ok(Conversation {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        title: row.try_get("title")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

fn message_from_row(row: &PgRow) -> Result<Message> {
    let role: String = row.try_get("role")?;
    Ok(Message {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        role: role_from_db(&role),
        content: row.try_get("content")?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

#[async_trait]
impl ConversationStore for PgConversationStore {
    async fn create_conversation(&self, owner: Uuid, title: Option<&str>) -> Result<Conversation> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO conversations (id, user_id, title)
            VALUES ($1, $2, $3)
            RETURNING id, user_id, title, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(owner)
        .bind(title_or_default(title))
        .fetch_one(&self.pool)
        .await?;

        conversation_from_row(&row)
    }

    async fn list_conversations(&self, owner: Uuid) -> Result<Vec<Conversation>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            r#"
            SELECT id, user_id, title, created_at, updated_at
            FROM conversations
            WHERE user_id = $1
            ORDER BY updated_at DESC
            LIMIT $2
            "#,
        )
        .bind(owner)
        .bind(LIST_LIMIT as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(conversation_from_row).collect()
    }

    async fn append_message(&self, owner: Uuid, conversation_id: Uuid, message: NewMessage) -> Result<Message> {
        self.ensure_schema().await?;
        self.ensure_owned(owner, conversation_id).await?;

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO messages (id, conversation_id, role, content, metadata)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, conversation_id, role, content, metadata, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(conversation_id)
        .bind(role_to_db(message.role))
        .bind(&message.content)
        .bind(&message.metadata)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE conversations SET updated_at = NOW() WHERE id = $1")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        message_from_row(&row)
    }

    async fn list_messages(&self, owner: Uuid, conversation_id: Uuid) -> Result<Vec<Message>> {
        self.ensure_schema().await?;
        self.ensure_owned(owner, conversation_id).await?;

        let rows = sqlx::query(
            r#"
            SELECT id, conversation_id, role, content, metadata, created_at
            FROM messages
            WHERE conversation_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }

    async fn delete_conversation(&self, owner: Uuid, conversation_id: Uuid) -> Result<()> {
        self.ensure_schema().await?;

        let result = sqlx::query("DELETE FROM conversations WHERE id = $1 AND user_id = $2")
            .bind(conversation_id)
            .bind(owner)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(not_found(conversation_id));
        }
        Ok(())
    }
}
