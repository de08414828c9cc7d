use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::types::{ProjectCard, ProjectStatus, SupportTicket, TicketCategory};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const SEARCH_CARD_LIMIT: usize = 5;
const TICKET_CHECKLIST: [&str; 3] = [
    "Review conversation",
    "Respond to client",
    "Verify issue resolved",
];

/// Project board access. Lookups feed the chat context; ticket creation is
/// part of the escalation handoff.
#[async_trait]
pub trait ProjectTracker: Send + Sync {
    /// Cards matching the client name, split into active and completed work.
    /// None when the board has nothing for this client.
    async fn project_status(&self, client_name: &str) -> Result<Option<ProjectStatus>, String>;

    /// Creates a ticket for a human to pick up and returns its URL.
    async fn create_ticket(&self, ticket: &SupportTicket) -> Result<String, String>;

    fn is_configured(&self) -> bool;
}

pub struct TrelloTracker {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    token: String,
    escalation_list_id: String,
}

impl TrelloTracker {
    pub fn from_env() -> TrelloTracker {
        TrelloTracker {
            client: reqwest::Client::new(),
            base_url: "https://api.trello.com/1".to_string(),
            api_key: std::env::var("TRELLO_API_KEY").unwrap_or_default(),
            token: std::env::var("TRELLO_TOKEN").unwrap_or_default(),
            escalation_list_id: std::env::var("TRELLO_NEW_LIST_ID").unwrap_or_default(),
        }
    }

    fn label_id(category: TicketCategory) -> Option<String> {
        let var = match category {
            TicketCategory::Billing => "TRELLO_LABEL_BILLING",
            TicketCategory::WebsiteEdits => "TRELLO_LABEL_WEBSITE_EDITS",
            TicketCategory::TechnicalIssue => "TRELLO_LABEL_TECHNICAL_ISSUE",
            TicketCategory::Onboarding => "TRELLO_LABEL_ONBOARDING",
            TicketCategory::AccountAccess => "TRELLO_LABEL_ACCOUNT_ACCESS",
            TicketCategory::GeneralQuestion => "TRELLO_LABEL_GENERAL_QUESTION",
        };
        std::env::var(var).ok().filter(|id| !id.trim().is_empty())
    }

    async fn get_json(&self, path: &str, params: &[(&str, &str)]) -> Result<Value, String> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(params)
            .query(&[("key", self.api_key.as_str()), ("token", self.token.as_str())])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|err| format!("trello request failed: {err}"))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("trello returned {status}: {body}"));
        }
        response
            .json::<Value>()
            .await
            .map_err(|err| format!("trello parse failed: {err}"))
    }

    async fn post_json(&self, path: &str, body: Value) -> Result<Value, String> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .query(&[("key", self.api_key.as_str()), ("token", self.token.as_str())])
            .json(&body)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|err| format!("trello request failed: {err}"))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("trello returned {status}: {body}"));
        }
        response
            .json::<Value>()
            .await
            .map_err(|err| format!("trello parse failed: {err}"))
    }

    async fn card_details(&self, card_id: &str) -> Result<Value, String> {
        self.get_json(
            &format!("/cards/{card_id}"),
            &[("fields", "name,idList,due,url"), ("checklists", "all")],
        )
        .await
    }

    async fn list_name(&self, list_id: &str) -> String {
        match self.get_json(&format!("/lists/{list_id}"), &[("fields", "name")]).await {
            Ok(payload) => payload
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("Unknown")
                .to_string(),
            Err(err) => {
                debug!(error = %err, "list lookup failed");
                "Unknown".to_string()
            }
        }
    }

    async fn add_checklist(&self, card_id: &str) -> Result<(), String> {
        let checklist = self
            .post_json(
                "/checklists",
                json!({ "idCard": card_id, "name": "Action Items" }),
            )
            .await?;
        let checklist_id = checklist
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| "trello checklist response missing id".to_string())?;
        for item in TICKET_CHECKLIST {
            self.post_json(
                &format!("/checklists/{checklist_id}/checkItems"),
                json!({ "name": item }),
            )
            .await?;
        }
        Ok(())
    }
}

fn incomplete_items(card: &Value) -> Vec<String> {
    card.get("checklists")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|checklist| checklist.get("checkItems").and_then(Value::as_array))
        .flatten()
        .filter(|item| item.get("state").and_then(Value::as_str) != Some("complete"))
        .filter_map(|item| item.get("name").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl ProjectTracker for TrelloTracker {
    async fn project_status(&self, client_name: &str) -> Result<Option<ProjectStatus>, String> {
        if !self.is_configured() {
            return Ok(None);
        }

        let search = self
            .get_json(
                "/search",
                &[
                    ("query", client_name),
                    ("modelTypes", "cards"),
                    ("cards_limit", "10"),
                ],
            )
            .await?;
        let card_ids: Vec<String> = search
            .get("cards")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|card| card.get("id").and_then(Value::as_str))
            .map(str::to_string)
            .take(SEARCH_CARD_LIMIT)
            .collect();
        if card_ids.is_empty() {
            return Ok(None);
        }

        let mut status = ProjectStatus::default();
        for card_id in card_ids {
            // One unreadable card should not cost us the rest.
            let card = match self.card_details(&card_id).await {
                Ok(card) => card,
                Err(err) => {
                    debug!(card_id = %card_id, error = %err, "card lookup failed");
                    continue;
                }
            };
            let stage = match card.get("idList").and_then(Value::as_str) {
                Some(list_id) => self.list_name(list_id).await,
                None => "Unknown".to_string(),
            };
            let done = stage == "Done" || stage == "Archived";
            let project = ProjectCard {
                name: card
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                stage,
                url: card
                    .get("url")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                due_date: card.get("due").and_then(Value::as_str).map(str::to_string),
                blocking: incomplete_items(&card),
            };
            if done {
                status.completed.push(project);
            } else {
                status.active.push(project);
            }
        }
        Ok(Some(status))
    }

    async fn create_ticket(&self, ticket: &SupportTicket) -> Result<String, String> {
        if !self.is_configured() {
            return Err("trello credentials are not configured".to_string());
        }
        if self.escalation_list_id.trim().is_empty() {
            return Err("TRELLO_NEW_LIST_ID is not configured".to_string());
        }

        let mut label_ids = Vec::new();
        if let Some(id) = Self::label_id(ticket.category) {
            label_ids.push(id);
        }
        if ticket.urgent {
            if let Ok(id) = std::env::var("TRELLO_LABEL_URGENT") {
                if !id.trim().is_empty() {
                    label_ids.push(id);
                }
            }
        }

        let card = self
            .post_json(
                "/cards",
                json!({
                    "name": ticket.title,
                    "desc": ticket.description,
                    "idList": self.escalation_list_id,
                    "idLabels": label_ids,
                }),
            )
            .await?;
        let card_id = card
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| "trello card response missing id".to_string())?;

        // The card is already on the board; a missing checklist is not worth
        // failing the whole handoff over.
        if let Err(err) = self.add_checklist(card_id).await {
            warn!(error = %err, "failed to attach checklist to ticket");
        }

        Ok(card
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or(card_id)
            .to_string())
    }

    fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty() && !self.token.trim().is_empty()
    }
}
