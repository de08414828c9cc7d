use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::ai::ResponseGenerator;
use crate::crm::Crm;
use crate::notifier::EscalationNotifier;
use crate::store::ConversationStore;
use crate::tracker::ProjectTracker;

pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }

    pub fn from_str(value: &str) -> MessageRole {
        match value {
            "assistant" => MessageRole::Assistant,
            _ => MessageRole::User,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Escalated,
    Closed,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Active => "active",
            ConversationStatus::Escalated => "escalated",
            ConversationStatus::Closed => "closed",
        }
    }

    pub fn from_str(value: &str) -> ConversationStatus {
        match value {
            "escalated" => ConversationStatus::Escalated,
            "closed" => ConversationStatus::Closed,
            _ => ConversationStatus::Active,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub client_email: String,
    pub status: ConversationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_reason: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_used: Option<Value>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub client_email: String,
    pub verified: bool,
    pub expires_at: String,
    pub created_at: String,
}

impl SessionRecord {
    /// Unparseable expiry counts as expired.
    pub fn is_expired(&self) -> bool {
        DateTime::parse_from_rfc3339(&self.expires_at)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
            .map(|expires| expires <= Utc::now())
            .unwrap_or(true)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KbEntry {
    pub id: String,
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub category: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KbMatch {
    pub question: String,
    pub answer: String,
    pub category: String,
    pub score: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentEmail {
    pub subject: String,
    pub date: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountContext {
    pub account: AccountRecord,
    #[serde(default)]
    pub recent_emails: Vec<RecentEmail>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectCard {
    pub name: String,
    pub stage: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(default)]
    pub blocking: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStatus {
    #[serde(default)]
    pub active: Vec<ProjectCard>,
    #[serde(default)]
    pub completed: Vec<ProjectCard>,
}

/// Everything the aggregator could collect for one turn. Any part may be
/// missing when its source failed or was skipped.
#[derive(Debug, Clone, Default)]
pub struct ContextBundle {
    pub account: Option<AccountContext>,
    pub project: Option<ProjectStatus>,
    pub kb_matches: Vec<KbMatch>,
}

impl ContextBundle {
    pub fn is_empty(&self) -> bool {
        self.account.is_none() && self.project.is_none() && self.kb_matches.is_empty()
    }

    /// Audit snapshot persisted alongside assistant messages; records which
    /// categories were populated, never the payloads themselves.
    pub fn snapshot(&self) -> Value {
        json!({
            "account": self.account.is_some(),
            "activeProjects": self
                .project
                .as_ref()
                .map(|p| p.active.len())
                .unwrap_or(0),
            "kbMatches": self.kb_matches.len(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: MessageRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketCategory {
    Billing,
    WebsiteEdits,
    TechnicalIssue,
    Onboarding,
    AccountAccess,
    GeneralQuestion,
}

impl TicketCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketCategory::Billing => "billing",
            TicketCategory::WebsiteEdits => "websiteEdits",
            TicketCategory::TechnicalIssue => "technicalIssue",
            TicketCategory::Onboarding => "onboarding",
            TicketCategory::AccountAccess => "accountAccess",
            TicketCategory::GeneralQuestion => "generalQuestion",
        }
    }

    pub fn from_str(value: &str) -> Option<TicketCategory> {
        match value {
            "billing" => Some(TicketCategory::Billing),
            "websiteEdits" => Some(TicketCategory::WebsiteEdits),
            "technicalIssue" => Some(TicketCategory::TechnicalIssue),
            "onboarding" => Some(TicketCategory::Onboarding),
            "accountAccess" => Some(TicketCategory::AccountAccess),
            "generalQuestion" => Some(TicketCategory::GeneralQuestion),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SupportTicket {
    pub title: String,
    pub description: String,
    pub category: TicketCategory,
    pub urgent: bool,
    pub client_email: String,
}

pub struct AppState {
    pub store: Arc<dyn ConversationStore>,
    pub crm: Arc<dyn Crm>,
    pub tracker: Arc<dyn ProjectTracker>,
    pub generator: Arc<dyn ResponseGenerator>,
    pub notifier: Arc<dyn EscalationNotifier>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyBody {
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageBody {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalateBody {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}
