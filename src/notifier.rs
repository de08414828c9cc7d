use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const FROM_EMAIL: &str = "support@sitewise.app";
const FROM_NAME: &str = "Sitewise Support Bot";

#[derive(Debug, Clone)]
pub struct EscalationEmail {
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

/// Delivers escalation notices to the on-call inbox. Failures are logged by
/// the caller and never block the client-facing reply.
#[async_trait]
pub trait EscalationNotifier: Send + Sync {
    async fn notify(&self, email: &EscalationEmail) -> Result<(), String>;

    fn is_configured(&self) -> bool;
}

pub struct SendGridNotifier {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    to_address: String,
}

impl SendGridNotifier {
    pub fn from_env() -> SendGridNotifier {
        SendGridNotifier {
            client: reqwest::Client::new(),
            base_url: "https://api.sendgrid.com/v3".to_string(),
            api_key: std::env::var("SENDGRID_API_KEY").unwrap_or_default(),
            to_address: std::env::var("ESCALATION_EMAIL")
                .unwrap_or_else(|_| "support@sitewise.app".to_string()),
        }
    }
}

#[async_trait]
impl EscalationNotifier for SendGridNotifier {
    async fn notify(&self, email: &EscalationEmail) -> Result<(), String> {
        if self.api_key.trim().is_empty() {
            return Err("SENDGRID_API_KEY is not configured".to_string());
        }
        if self.to_address.trim().is_empty() {
            return Err("ESCALATION_EMAIL is not configured".to_string());
        }

        let response = self
            .client
            .post(format!("{}/mail/send", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({
                "personalizations": [{ "to": [{ "email": self.to_address }] }],
                "from": { "email": FROM_EMAIL, "name": FROM_NAME },
                "subject": email.subject,
                "content": [
                    { "type": "text/plain", "value": email.text_body },
                    { "type": "text/html", "value": email.html_body },
                ],
            }))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|err| format!("sendgrid request failed: {err}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("sendgrid returned {status}: {body}"));
        }
        Ok(())
    }

    fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty() && !self.to_address.trim().is_empty()
    }
}
