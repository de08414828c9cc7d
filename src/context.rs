//! Context assembly for one chat turn. Account, project, and FAQ lookups are
//! attempted independently; a failed source degrades to "no data" and never
//! takes a sibling down with it.

use std::future::Future;

use tracing::warn;

use crate::crm::Crm;
use crate::store::ConversationStore;
use crate::tracker::ProjectTracker;
use crate::types::{AccountContext, AppState, ChatTurn, ContextBundle};

const STATUS_PHRASES: [&str; 9] = [
    "status",
    "progress",
    "update on",
    "where is my",
    "how is my",
    "when will my",
    "website ready",
    "eta",
    "timeline",
];

const QUESTION_WORDS: [&str; 17] = [
    "what", "when", "where", "why", "how", "who", "which", "is", "are", "can", "could", "do",
    "does", "did", "will", "would", "should",
];

const MAX_COMPANY_NAME_TOKENS: usize = 5;
const STATUS_LOOKBACK_TURNS: usize = 4;

/// Runs one fetch and swallows its failure into the source's empty value.
pub(crate) async fn attempt<T, F>(source: &str, fetch: F) -> T
where
    T: Default,
    F: Future<Output = Result<T, String>>,
{
    match fetch.await {
        Ok(value) => value,
        Err(err) => {
            warn!(source, error = %err, "context fetch failed, continuing without it");
            T::default()
        }
    }
}

/// Short messages that do not open with a question word are treated as a
/// candidate company name. Tunable guess, not a contract.
pub fn looks_like_company_name(message: &str) -> bool {
    let tokens: Vec<&str> = message.split_whitespace().collect();
    if tokens.is_empty() || tokens.len() > MAX_COMPANY_NAME_TOKENS {
        return false;
    }
    let first = tokens[0].to_ascii_lowercase();
    !QUESTION_WORDS.contains(&first.as_str())
}

fn contains_status_phrase(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    STATUS_PHRASES.iter().any(|phrase| lower.contains(phrase))
}

/// Whether the client is asking where their project stands. A bare company
/// name right after a status exchange counts too, since clients asked
/// "which company?" usually answer with just the name.
pub fn status_intent(message: &str, history: &[ChatTurn]) -> bool {
    if contains_status_phrase(message) {
        return true;
    }
    looks_like_company_name(message)
        && history
            .iter()
            .rev()
            .take(STATUS_LOOKBACK_TURNS)
            .any(|turn| contains_status_phrase(&turn.content))
}

fn tracker_lookup_name(
    account: &Option<AccountContext>,
    message: &str,
    client_email: &str,
) -> String {
    if let Some(context) = account {
        if !context.account.name.trim().is_empty() {
            return context.account.name.clone();
        }
    }
    if looks_like_company_name(message) {
        return message.trim().to_string();
    }
    client_email.to_string()
}

pub async fn assemble(
    state: &AppState,
    client_email: &str,
    message: &str,
    history: &[ChatTurn],
) -> ContextBundle {
    let (account, kb_matches) = tokio::join!(
        attempt("crm", state.crm.account_context(client_email)),
        attempt("knowledge_base", state.store.search_knowledge_base(message)),
    );

    // The tracker is only worth querying when the client is asking about
    // progress or we at least know which account they are.
    let project = if status_intent(message, history) || account.is_some() {
        let name = tracker_lookup_name(&account, message, client_email);
        attempt("tracker", state.tracker.project_status(&name)).await
    } else {
        None
    };

    ContextBundle {
        account,
        project,
        kb_matches,
    }
}
