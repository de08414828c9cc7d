//! Turn orchestration: gate, gather, generate, persist, hand off. Every
//! inbound message runs through the same explicit state machine so the
//! pipeline order is auditable in logs.

use std::fmt;
use std::time::Instant;

use tracing::{debug, error, warn};

use crate::ai::ResponseGenerator;
use crate::context;
use crate::crm::Crm;
use crate::escalation::{self, FALLBACK_MESSAGE, HANDOFF_MESSAGE};
use crate::handoff;
use crate::prompting::{self, SystemPromptContext};
use crate::store::ConversationStore;
use crate::tracker::ProjectTracker;
use crate::types::{
    AppState, ChatTurn, ContextBundle, Conversation, ConversationStatus, MessageRole,
    TicketCategory,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Received,
    Gated,
    Escalated,
    ContextGathered,
    Responded,
    Persisted,
    HandoffTriggered,
    Done,
}

impl TurnState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TurnState::Done)
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnState::Received => write!(f, "Received"),
            TurnState::Gated => write!(f, "Gated"),
            TurnState::Escalated => write!(f, "Escalated"),
            TurnState::ContextGathered => write!(f, "ContextGathered"),
            TurnState::Responded => write!(f, "Responded"),
            TurnState::Persisted => write!(f, "Persisted"),
            TurnState::HandoffTriggered => write!(f, "HandoffTriggered"),
            TurnState::Done => write!(f, "Done"),
        }
    }
}

/// Valid edges:
/// ```text
/// Received -> Gated -> (Escalated | ContextGathered) -> Responded
///   -> Persisted -> (HandoffTriggered | Done)
/// HandoffTriggered -> Done
/// ```
fn is_legal_transition(from: TurnState, to: TurnState) -> bool {
    use TurnState::*;

    matches!(
        (from, to),
        (Received, Gated)
            | (Gated, Escalated)
            | (Gated, ContextGathered)
            | (Escalated, Responded)
            | (ContextGathered, Responded)
            | (Responded, Persisted)
            | (Persisted, HandoffTriggered)
            | (Persisted, Done)
            | (HandoffTriggered, Done)
    )
}

#[derive(Debug, Clone)]
pub struct TransitionRecord {
    pub from: TurnState,
    pub to: TurnState,
    pub elapsed_ms: u64,
    pub reason: Option<String>,
}

/// Per-turn state machine. Illegal edges are a programming error: they are
/// logged, debug_assert-ed, and refused, never panicking a release build.
pub struct TurnMachine {
    current: TurnState,
    started_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl TurnMachine {
    pub fn new() -> TurnMachine {
        TurnMachine {
            current: TurnState::Received,
            started_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> TurnState {
        self.current
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    pub fn advance(&mut self, to: TurnState, reason: Option<&str>) {
        if !is_legal_transition(self.current, to) {
            error!(from = %self.current, to = %to, "illegal turn state transition");
            debug_assert!(
                false,
                "illegal turn state transition: {} -> {}",
                self.current, to
            );
            return;
        }

        let record = TransitionRecord {
            from: self.current,
            to,
            elapsed_ms: self.started_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        };
        debug!(
            from = %record.from,
            to = %record.to,
            elapsed_ms = record.elapsed_ms,
            reason = record.reason.as_deref().unwrap_or(""),
            "turn state transition"
        );
        self.transitions.push(record);
        self.current = to;
    }

    pub fn summary(&self) -> String {
        let mut path = vec![TurnState::Received.to_string()];
        path.extend(self.transitions().iter().map(|t| t.to.to_string()));
        path.join(" -> ")
    }
}

impl Default for TurnMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub response: String,
    pub conversation_id: String,
    pub escalated: bool,
    pub escalation_reason: Option<String>,
}

async fn resolve_conversation(
    state: &AppState,
    client_email: &str,
    hint: Option<&str>,
) -> Result<Conversation, String> {
    if let Some(id) = hint {
        if let Some(conversation) = state.store.get_conversation(id).await? {
            if conversation.client_email == client_email {
                return Ok(conversation);
            }
            warn!(
                conversation_id = id,
                "conversation hint belongs to another client, ignoring"
            );
        }
    }
    if let Some(conversation) = state.store.active_conversation(client_email).await? {
        return Ok(conversation);
    }
    state.store.create_conversation(client_email).await
}

/// Runs one full chat turn. `Err` means persistence failed and the caller
/// should surface a 500; every other failure mode degrades inside and still
/// produces an outcome.
pub async fn respond_to_message(
    state: &AppState,
    client_email: &str,
    message: &str,
    conversation_hint: Option<&str>,
    category_hint: Option<TicketCategory>,
) -> Result<TurnOutcome, String> {
    let mut machine = TurnMachine::new();

    let conversation = resolve_conversation(state, client_email, conversation_hint).await?;
    let prior = state.store.conversation_messages(&conversation.id).await?;
    let history: Vec<ChatTurn> = prior
        .iter()
        .map(|stored| ChatTurn {
            role: stored.role,
            content: stored.content.clone(),
        })
        .collect();

    let decision = escalation::evaluate(message);
    machine.advance(TurnState::Gated, decision.reason.as_deref());

    state
        .store
        .add_message(&conversation.id, MessageRole::User, message, None)
        .await?;

    let mut escalated = decision.should_escalate;
    let mut reason = decision.reason;

    let (response, bundle) = if escalated {
        machine.advance(TurnState::Escalated, reason.as_deref());
        (HANDOFF_MESSAGE.to_string(), ContextBundle::default())
    } else {
        let bundle = context::assemble(state, client_email, message, &history).await;
        machine.advance(TurnState::ContextGathered, None);

        let account_name = bundle
            .account
            .as_ref()
            .map(|context| context.account.name.as_str())
            .unwrap_or("");
        let system_prompt = prompting::render_system_prompt(&SystemPromptContext {
            client_email,
            account_name,
        });
        let block = prompting::render_context_block(&bundle);
        let user_content = if block.is_empty() {
            message.to_string()
        } else {
            format!("{message}\n\n{block}")
        };
        let mut turns = history.clone();
        turns.push(ChatTurn {
            role: MessageRole::User,
            content: user_content,
        });

        match state.generator.complete(&system_prompt, &turns).await {
            Ok(text) => {
                if escalation::response_requests_handoff(&text) {
                    escalated = true;
                    reason = Some("Assistant response signaled handoff".to_string());
                }
                (text, bundle)
            }
            Err(err) => {
                warn!(conversation_id = %conversation.id, error = %err, "response generation failed");
                escalated = true;
                reason = Some("Response generation failed".to_string());
                (FALLBACK_MESSAGE.to_string(), bundle)
            }
        }
    };
    machine.advance(TurnState::Responded, None);

    state
        .store
        .add_message(
            &conversation.id,
            MessageRole::Assistant,
            &response,
            Some(bundle.snapshot()),
        )
        .await?;
    machine.advance(TurnState::Persisted, None);

    if escalated {
        state
            .store
            .update_conversation_status(
                &conversation.id,
                ConversationStatus::Escalated,
                reason.as_deref(),
            )
            .await?;

        // Transcript assembled in memory; the two new turns were just
        // persisted and are not refetched.
        let mut transcript = history;
        transcript.push(ChatTurn {
            role: MessageRole::User,
            content: message.to_string(),
        });
        transcript.push(ChatTurn {
            role: MessageRole::Assistant,
            content: response.clone(),
        });
        let reason_text = reason.clone().unwrap_or_default();
        handoff::trigger(
            state,
            &conversation.id,
            client_email,
            &transcript,
            &bundle,
            &reason_text,
            category_hint,
        )
        .await;
        machine.advance(TurnState::HandoffTriggered, reason.as_deref());
    }

    machine.advance(TurnState::Done, None);
    if machine.current().is_terminal() {
        debug!(conversation_id = %conversation.id, path = %machine.summary(), "turn complete");
    } else {
        warn!(conversation_id = %conversation.id, path = %machine.summary(), "turn ended off the expected path");
    }

    Ok(TurnOutcome {
        response,
        conversation_id: conversation.id,
        escalated,
        escalation_reason: reason,
    })
}

/// Client-initiated escalation of the active conversation. Returns Ok(None)
/// when the client has no active conversation.
pub async fn manual_escalate(
    state: &AppState,
    client_email: &str,
    reason: Option<&str>,
) -> Result<Option<String>, String> {
    let Some(conversation) = state.store.active_conversation(client_email).await? else {
        return Ok(None);
    };

    let stored = state.store.conversation_messages(&conversation.id).await?;
    let turns: Vec<ChatTurn> = stored
        .iter()
        .map(|message| ChatTurn {
            role: message.role,
            content: message.content.clone(),
        })
        .collect();

    // Same degraded context gathering as the chat path, minus the FAQ search
    // (there is no current message to match against).
    let account = context::attempt("crm", state.crm.account_context(client_email)).await;
    let lookup_name = account
        .as_ref()
        .map(|context| context.account.name.clone())
        .unwrap_or_else(|| client_email.to_string());
    let project = context::attempt("tracker", state.tracker.project_status(&lookup_name)).await;
    let bundle = ContextBundle {
        account,
        project,
        kb_matches: Vec::new(),
    };

    let reason_text = reason
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .unwrap_or("Manual escalation requested");
    state
        .store
        .update_conversation_status(
            &conversation.id,
            ConversationStatus::Escalated,
            Some(reason_text),
        )
        .await?;

    handoff::trigger(
        state,
        &conversation.id,
        client_email,
        &turns,
        &bundle,
        reason_text,
        None,
    )
    .await;

    Ok(Some(conversation.id))
}
