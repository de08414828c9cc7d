use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::kb;
use crate::types::{
    now_iso, Conversation, ConversationStatus, KbEntry, KbMatch, MessageRole, SessionRecord,
    StoredMessage,
};

/// Persistence seam for conversations, messages, sessions, and the FAQ bank.
/// Write failures are returned to the caller; the orchestrator treats them as
/// fatal for the request while context fetches degrade.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_conversation(&self, client_email: &str) -> Result<Conversation, String>;

    async fn get_conversation(&self, conversation_id: &str)
        -> Result<Option<Conversation>, String>;

    /// Most recently created conversation still in `active` status, if any.
    async fn active_conversation(&self, client_email: &str)
        -> Result<Option<Conversation>, String>;

    async fn update_conversation_status(
        &self,
        conversation_id: &str,
        status: ConversationStatus,
        escalation_reason: Option<&str>,
    ) -> Result<(), String>;

    async fn add_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
        context_used: Option<Value>,
    ) -> Result<StoredMessage, String>;

    /// Full message log in creation order.
    async fn conversation_messages(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<StoredMessage>, String>;

    /// Reuses an unexpired session for the same email and verified flag
    /// before creating a fresh one; new sessions live for 24 hours.
    async fn create_session(
        &self,
        client_email: &str,
        verified: bool,
    ) -> Result<SessionRecord, String>;

    async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>, String>;

    async fn knowledge_base_entries(&self) -> Result<Vec<KbEntry>, String>;

    async fn search_knowledge_base(&self, message: &str) -> Result<Vec<KbMatch>, String> {
        let entries = self.knowledge_base_entries().await?;
        Ok(kb::rank_matches(message, &entries))
    }
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> PgStore {
        PgStore { pool }
    }
}

fn conversation_from_row(row: &PgRow) -> Conversation {
    Conversation {
        id: row.get("id"),
        client_email: row.get("client_email"),
        status: ConversationStatus::from_str(&row.get::<String, _>("status")),
        escalation_reason: row.get("escalation_reason"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn message_from_row(row: &PgRow) -> StoredMessage {
    StoredMessage {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        role: MessageRole::from_str(&row.get::<String, _>("role")),
        content: row.get("content"),
        context_used: row
            .get::<Option<String>, _>("context_used")
            .and_then(|raw| serde_json::from_str::<Value>(&raw).ok()),
        created_at: row.get("created_at"),
    }
}

fn session_from_row(row: &PgRow) -> SessionRecord {
    SessionRecord {
        id: row.get("id"),
        client_email: row.get("client_email"),
        verified: row.get("verified"),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
    }
}

fn kb_entry_from_row(row: &PgRow) -> KbEntry {
    KbEntry {
        id: row.get("id"),
        question: row.get("question"),
        answer: row.get("answer"),
        keywords: row.get::<Vec<String>, _>("keywords"),
        category: row
            .get::<Option<String>, _>("category")
            .unwrap_or_default(),
    }
}

#[async_trait]
impl ConversationStore for PgStore {
    async fn create_conversation(&self, client_email: &str) -> Result<Conversation, String> {
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            client_email: client_email.to_string(),
            status: ConversationStatus::Active,
            escalation_reason: None,
            created_at: now_iso(),
            updated_at: now_iso(),
        };
        sqlx::query(
            "INSERT INTO conversations (id, client_email, status, escalation_reason, created_at, updated_at) VALUES ($1,$2,$3,$4,$5,$6)",
        )
        .bind(&conversation.id)
        .bind(&conversation.client_email)
        .bind(conversation.status.as_str())
        .bind(&conversation.escalation_reason)
        .bind(&conversation.created_at)
        .bind(&conversation.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|err| format!("failed to create conversation: {err}"))?;
        Ok(conversation)
    }

    async fn get_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<Conversation>, String> {
        let row = sqlx::query(
            "SELECT id, client_email, status, escalation_reason, created_at, updated_at FROM conversations WHERE id = $1",
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| format!("failed to load conversation: {err}"))?;
        Ok(row.map(|row| conversation_from_row(&row)))
    }

    async fn active_conversation(
        &self,
        client_email: &str,
    ) -> Result<Option<Conversation>, String> {
        let row = sqlx::query(
            "SELECT id, client_email, status, escalation_reason, created_at, updated_at FROM conversations WHERE client_email = $1 AND status = 'active' ORDER BY created_at DESC LIMIT 1",
        )
        .bind(client_email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| format!("failed to look up active conversation: {err}"))?;
        Ok(row.map(|row| conversation_from_row(&row)))
    }

    async fn update_conversation_status(
        &self,
        conversation_id: &str,
        status: ConversationStatus,
        escalation_reason: Option<&str>,
    ) -> Result<(), String> {
        let result = if let Some(reason) = escalation_reason {
            sqlx::query(
                "UPDATE conversations SET status = $1, escalation_reason = $2, updated_at = $3 WHERE id = $4",
            )
            .bind(status.as_str())
            .bind(reason)
            .bind(now_iso())
            .bind(conversation_id)
            .execute(&self.pool)
            .await
        } else {
            sqlx::query("UPDATE conversations SET status = $1, updated_at = $2 WHERE id = $3")
                .bind(status.as_str())
                .bind(now_iso())
                .bind(conversation_id)
                .execute(&self.pool)
                .await
        };
        let result = result.map_err(|err| format!("failed to update conversation: {err}"))?;
        if result.rows_affected() == 0 {
            return Err(format!("conversation {conversation_id} not found"));
        }
        Ok(())
    }

    async fn add_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
        context_used: Option<Value>,
    ) -> Result<StoredMessage, String> {
        let message = StoredMessage {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            context_used,
            created_at: now_iso(),
        };
        sqlx::query(
            "INSERT INTO messages (id, conversation_id, role, content, context_used, created_at) VALUES ($1,$2,$3,$4,$5,$6)",
        )
        .bind(&message.id)
        .bind(&message.conversation_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.context_used.as_ref().map(|value| value.to_string()))
        .bind(&message.created_at)
        .execute(&self.pool)
        .await
        .map_err(|err| format!("failed to add message: {err}"))?;
        Ok(message)
    }

    async fn conversation_messages(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<StoredMessage>, String> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, role, content, context_used, created_at FROM messages WHERE conversation_id = $1 ORDER BY created_at ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|err| format!("failed to load messages: {err}"))?;
        Ok(rows.iter().map(message_from_row).collect())
    }

    async fn create_session(
        &self,
        client_email: &str,
        verified: bool,
    ) -> Result<SessionRecord, String> {
        let existing = sqlx::query(
            "SELECT id, client_email, verified, expires_at, created_at FROM sessions WHERE client_email = $1 AND verified = $2 AND expires_at > $3 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(client_email)
        .bind(verified)
        .bind(now_iso())
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| format!("failed to look up session: {err}"))?;
        if let Some(row) = existing {
            return Ok(session_from_row(&row));
        }

        let session = SessionRecord {
            id: Uuid::new_v4().to_string(),
            client_email: client_email.to_string(),
            verified,
            expires_at: (Utc::now() + ChronoDuration::hours(24)).to_rfc3339(),
            created_at: now_iso(),
        };
        sqlx::query(
            "INSERT INTO sessions (id, client_email, verified, expires_at, created_at) VALUES ($1,$2,$3,$4,$5)",
        )
        .bind(&session.id)
        .bind(&session.client_email)
        .bind(session.verified)
        .bind(&session.expires_at)
        .bind(&session.created_at)
        .execute(&self.pool)
        .await
        .map_err(|err| format!("failed to create session: {err}"))?;
        Ok(session)
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>, String> {
        let row = sqlx::query(
            "SELECT id, client_email, verified, expires_at, created_at FROM sessions WHERE id = $1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| format!("failed to load session: {err}"))?;
        Ok(row.map(|row| session_from_row(&row)))
    }

    async fn knowledge_base_entries(&self) -> Result<Vec<KbEntry>, String> {
        let rows = sqlx::query("SELECT id, question, answer, keywords, category FROM knowledge_base")
            .fetch_all(&self.pool)
            .await
            .map_err(|err| format!("failed to load knowledge base: {err}"))?;
        Ok(rows.iter().map(kb_entry_from_row).collect())
    }
}
