use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::types::{AccountContext, AccountRecord, RecentEmail};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ContactVerification {
    pub verified: bool,
    pub account: Option<AccountRecord>,
}

/// Account lookups against the CRM. Every method is expected to fail soft:
/// callers degrade a `Err` to "no account data" instead of surfacing it.
#[async_trait]
pub trait Crm: Send + Sync {
    /// Whether the email belongs to a primary contact on some account.
    async fn verify_primary_contact(&self, email: &str) -> Result<ContactVerification, String>;

    /// Account record plus recent outbound emails for the client, or None
    /// when the CRM has nothing for this email.
    async fn account_context(&self, email: &str) -> Result<Option<AccountContext>, String>;

    fn is_configured(&self) -> bool;
}

pub struct ChurnZeroCrm {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    app_key: String,
}

impl ChurnZeroCrm {
    pub fn from_env() -> ChurnZeroCrm {
        ChurnZeroCrm {
            client: reqwest::Client::new(),
            base_url: "https://api.churnzero.net/v2".to_string(),
            api_key: std::env::var("CHURNZERO_API_KEY").unwrap_or_default(),
            app_key: std::env::var("CHURNZERO_APP_KEY").unwrap_or_default(),
        }
    }

    async fn get_json(&self, path: &str) -> Result<Value, String> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .header("X-API-Key", &self.api_key)
            .query(&[("appKey", self.app_key.as_str())])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|err| format!("churnzero request failed: {err}"))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("churnzero returned {status}: {body}"));
        }
        response
            .json::<Value>()
            .await
            .map_err(|err| format!("churnzero parse failed: {err}"))
    }

    async fn primary_contact(&self, email: &str) -> Result<Option<Value>, String> {
        let payload = self
            .get_json(&format!("/contacts?email={}", urlencode(email)))
            .await?;
        let contact = payload
            .as_array()
            .into_iter()
            .flatten()
            .find(|contact| {
                contact
                    .get("isPrimary")
                    .and_then(Value::as_bool)
                    .unwrap_or(false)
                    && contact
                        .get("email")
                        .and_then(Value::as_str)
                        .map(|candidate| candidate.eq_ignore_ascii_case(email))
                        .unwrap_or(false)
            })
            .cloned();
        Ok(contact)
    }

    async fn account_record(&self, account_id: &str) -> Result<Option<AccountRecord>, String> {
        let payload = self.get_json(&format!("/accounts/{account_id}")).await?;
        let name = payload
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if name.is_empty() {
            return Ok(None);
        }
        Ok(Some(AccountRecord {
            id: payload
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or(account_id)
                .to_string(),
            name,
            status: payload
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }))
    }

    async fn recent_outbound_emails(&self, account_id: &str) -> Result<Vec<RecentEmail>, String> {
        let payload = self
            .get_json(&format!("/accounts/{account_id}/events?type=email&limit=10"))
            .await?;
        let emails = payload
            .as_array()
            .into_iter()
            .flatten()
            .filter(|event| {
                matches!(
                    event.get("direction").and_then(Value::as_str),
                    Some("outbound") | Some("sent")
                )
            })
            .filter_map(|event| {
                let subject = event.get("subject").and_then(Value::as_str)?;
                Some(RecentEmail {
                    subject: subject.to_string(),
                    date: event
                        .get("date")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                })
            })
            .collect();
        Ok(emails)
    }
}

#[async_trait]
impl Crm for ChurnZeroCrm {
    async fn verify_primary_contact(&self, email: &str) -> Result<ContactVerification, String> {
        if !self.is_configured() {
            debug!("CRM credentials absent, allowing {email} without verification");
            return Ok(ContactVerification {
                verified: true,
                account: None,
            });
        }

        let Some(contact) = self.primary_contact(email).await? else {
            return Ok(ContactVerification {
                verified: false,
                account: None,
            });
        };

        let account = match contact.get("accountId").and_then(Value::as_str) {
            Some(account_id) => self.account_record(account_id).await?,
            None => None,
        };
        Ok(ContactVerification {
            verified: true,
            account,
        })
    }

    async fn account_context(&self, email: &str) -> Result<Option<AccountContext>, String> {
        if !self.is_configured() {
            return Ok(None);
        }

        let Some(contact) = self.primary_contact(email).await? else {
            return Ok(None);
        };
        let Some(account_id) = contact.get("accountId").and_then(Value::as_str) else {
            return Ok(None);
        };
        let Some(account) = self.account_record(account_id).await? else {
            return Ok(None);
        };

        // Emails are garnish; a failed event lookup should not cost us the
        // account record.
        let recent_emails = match self.recent_outbound_emails(&account.id).await {
            Ok(emails) => emails,
            Err(err) => {
                debug!(error = %err, "recent email lookup failed");
                Vec::new()
            }
        };

        Ok(Some(AccountContext {
            account,
            recent_emails,
        }))
    }

    fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty() && !self.app_key.trim().is_empty()
    }
}

fn urlencode(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    pub struct MockCrm {
        pub context: Mutex<Option<AccountContext>>,
        pub verified: AtomicBool,
        pub fail_lookups: AtomicBool,
        pub captured_lookups: Mutex<Vec<String>>,
    }

    impl MockCrm {
        pub fn new() -> MockCrm {
            MockCrm {
                context: Mutex::new(None),
                verified: AtomicBool::new(true),
                fail_lookups: AtomicBool::new(false),
                captured_lookups: Mutex::new(Vec::new()),
            }
        }

        pub fn with_account(self, context: AccountContext) -> MockCrm {
            *self.context.lock().unwrap() = Some(context);
            self
        }

        pub fn rejecting(self) -> MockCrm {
            self.verified.store(false, Ordering::Relaxed);
            self
        }

        pub fn failing(self) -> MockCrm {
            self.fail_lookups.store(true, Ordering::Relaxed);
            self
        }
    }

    #[async_trait]
    impl Crm for MockCrm {
        async fn verify_primary_contact(
            &self,
            email: &str,
        ) -> Result<ContactVerification, String> {
            self.captured_lookups.lock().unwrap().push(email.to_string());
            if self.fail_lookups.load(Ordering::Relaxed) {
                return Err("crm unavailable".to_string());
            }
            let verified = self.verified.load(Ordering::Relaxed);
            Ok(ContactVerification {
                verified,
                account: if verified {
                    self.context.lock().unwrap().as_ref().map(|c| c.account.clone())
                } else {
                    None
                },
            })
        }

        async fn account_context(&self, email: &str) -> Result<Option<AccountContext>, String> {
            self.captured_lookups.lock().unwrap().push(email.to_string());
            if self.fail_lookups.load(Ordering::Relaxed) {
                return Err("crm unavailable".to_string());
            }
            Ok(self.context.lock().unwrap().clone())
        }

        fn is_configured(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn unconfigured_crm_allows_everyone() {
        let crm = ChurnZeroCrm {
            client: reqwest::Client::new(),
            base_url: "http://localhost:1".to_string(),
            api_key: String::new(),
            app_key: String::new(),
        };
        assert!(!crm.is_configured());

        let verification = crm
            .verify_primary_contact("anyone@example.com")
            .await
            .unwrap();
        assert!(verification.verified);
        assert!(verification.account.is_none());
    }

    #[tokio::test]
    async fn unconfigured_crm_has_no_context() {
        let crm = ChurnZeroCrm {
            client: reqwest::Client::new(),
            base_url: "http://localhost:1".to_string(),
            api_key: String::new(),
            app_key: String::new(),
        };
        assert!(crm.account_context("anyone@example.com").await.unwrap().is_none());
    }

    #[test]
    fn urlencode_escapes_reserved_characters() {
        assert_eq!(urlencode("a+b@c.com"), "a%2Bb%40c.com");
        assert_eq!(urlencode("plain.email@example.com"), "plain.email%40example.com");
    }
}
