//! Escalation handoff: categorize the conversation, build the ticket and the
//! on-call email, and deliver both. Delivery is best-effort; the client reply
//! has already been persisted by the time this runs.

use tracing::{info, warn};

use crate::notifier::{EscalationEmail, EscalationNotifier};
use crate::tracker::ProjectTracker;
use crate::types::{
    now_iso, AppState, ChatTurn, ContextBundle, MessageRole, SupportTicket, TicketCategory,
};

const TICKET_TITLE_LIMIT: usize = 60;

const BILLING_TERMS: [&str; 6] = ["invoice", "payment", "bill", "charge", "refund", "money"];
const WEBSITE_EDIT_TERMS: [&str; 7] = [
    "photo", "image", "picture", "hours", "update", "change", "edit",
];
const TECHNICAL_TERMS: [&str; 6] = ["broken", "not working", "error", "down", "issue", "bug"];
const ONBOARDING_TERMS: [&str; 5] = [
    "new",
    "setup",
    "getting started",
    "onboarding",
    "just launched",
];
const ACCESS_TERMS: [&str; 5] = ["login", "password", "access", "can't get in", "locked out"];
const URGENT_TERMS: [&str; 11] = [
    "cancel",
    "refund",
    "angry",
    "frustrated",
    "terrible",
    "awful",
    "furious",
    "lawyer",
    "legal",
    "sue",
    "unacceptable",
];

/// First matching category wins; billing outranks edit requests so "refund my
/// last invoice" files under billing even though it mentions a change.
pub fn detect_category(message: &str) -> TicketCategory {
    let lower = message.to_ascii_lowercase();
    let hit = |terms: &[&str]| terms.iter().any(|needle| lower.contains(needle));
    if hit(&BILLING_TERMS) {
        return TicketCategory::Billing;
    }
    if hit(&WEBSITE_EDIT_TERMS) {
        return TicketCategory::WebsiteEdits;
    }
    if hit(&TECHNICAL_TERMS) {
        return TicketCategory::TechnicalIssue;
    }
    if hit(&ONBOARDING_TERMS) {
        return TicketCategory::Onboarding;
    }
    if hit(&ACCESS_TERMS) {
        return TicketCategory::AccountAccess;
    }
    TicketCategory::GeneralQuestion
}

pub fn is_urgent(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    URGENT_TERMS.iter().any(|needle| lower.contains(needle))
}

fn last_user_message(turns: &[ChatTurn]) -> &str {
    turns
        .iter()
        .rev()
        .find(|turn| turn.role == MessageRole::User)
        .map(|turn| turn.content.as_str())
        .unwrap_or("Support Request")
}

/// Ticket title is the last client message, cut at 60 characters.
pub fn ticket_title(turns: &[ChatTurn]) -> String {
    let source = last_user_message(turns);
    let mut title: String = source.chars().take(TICKET_TITLE_LIMIT).collect();
    if source.chars().count() > TICKET_TITLE_LIMIT {
        title.push_str("...");
    }
    title
}

fn role_label(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "Client",
        MessageRole::Assistant => "Support Bot",
    }
}

pub fn format_transcript(turns: &[ChatTurn]) -> String {
    turns
        .iter()
        .map(|turn| format!("{}: {}", role_label(turn.role), turn.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn account_summary(bundle: &ContextBundle) -> String {
    let Some(context) = &bundle.account else {
        return "No account data available.".to_string();
    };
    let mut text = format!("Account: {}\n", context.account.name);
    if !context.recent_emails.is_empty() {
        text.push_str("Recent emails:\n");
        for email in &context.recent_emails {
            text.push_str(&format!("- {} ({})\n", email.subject, email.date));
        }
    }
    text
}

fn project_summary(bundle: &ContextBundle) -> String {
    match &bundle.project {
        Some(project) if !project.active.is_empty() => {
            let mut text = String::from("Active projects:\n");
            for card in &project.active {
                text.push_str(&format!("- {}: {}\n", card.name, card.stage));
            }
            text
        }
        _ => "No project data available.".to_string(),
    }
}

/// Markdown body for the support ticket.
pub fn ticket_description(
    client_email: &str,
    turns: &[ChatTurn],
    bundle: &ContextBundle,
    reason: &str,
) -> String {
    let mut desc = String::from("## Client Information\n");
    desc.push_str(&format!(
        "- **Email:** {}\n",
        if client_email.is_empty() {
            "Not provided"
        } else {
            client_email
        }
    ));
    desc.push_str(&format!("- **Date:** {}\n\n", now_iso()));
    desc.push_str("---\n\n## Conversation Transcript\n");
    for turn in turns {
        desc.push_str(&format!("**{}:** {}\n\n", role_label(turn.role), turn.content));
    }
    desc.push_str("---\n\n## Context\n\n### Account Data\n");
    match &bundle.account {
        Some(context) => {
            desc.push_str(&format!("- Account: {}\n", context.account.name));
            desc.push_str(&format!(
                "- Status: {}\n",
                if context.account.status.is_empty() {
                    "Unknown"
                } else {
                    &context.account.status
                }
            ));
            if !context.recent_emails.is_empty() {
                desc.push_str("- Recent emails:\n");
                for email in context.recent_emails.iter().take(3) {
                    desc.push_str(&format!("  - {} ({})\n", email.subject, email.date));
                }
            }
        }
        None => desc.push_str("Account data not available\n"),
    }
    desc.push_str("\n### Project Data\n");
    match &bundle.project {
        Some(project) if !project.active.is_empty() => {
            for card in &project.active {
                desc.push_str(&format!("- {}: {}\n", card.name, card.stage));
            }
        }
        _ => desc.push_str("No active projects found\n"),
    }
    desc.push_str("\n---\n\n## Auto-Generated Notes\n");
    desc.push_str(&format!(
        "- **Escalation reason:** {}\n",
        if reason.is_empty() { "Unknown" } else { reason }
    ));
    desc
}

pub fn build_ticket(
    client_email: &str,
    turns: &[ChatTurn],
    bundle: &ContextBundle,
    reason: &str,
    category_hint: Option<TicketCategory>,
) -> SupportTicket {
    let last_message = last_user_message(turns);
    SupportTicket {
        title: ticket_title(turns),
        description: ticket_description(client_email, turns, bundle, reason),
        category: category_hint.unwrap_or_else(|| detect_category(last_message)),
        urgent: is_urgent(last_message),
        client_email: client_email.to_string(),
    }
}

pub fn escalation_email(
    client_email: &str,
    conversation_id: &str,
    reason: &str,
    turns: &[ChatTurn],
    bundle: &ContextBundle,
) -> EscalationEmail {
    let transcript = format_transcript(turns);
    let account_text = account_summary(bundle);
    let project_text = project_summary(bundle);
    let reason_text = if reason.is_empty() { "Not specified" } else { reason };

    let text_body = format!(
        "Support Escalation Request\n\n\
         Client Email: {client_email}\n\
         Conversation ID: {conversation_id}\n\
         Escalation Reason: {reason_text}\n\n\
         CONVERSATION HISTORY:\n{transcript}\n\n\
         ACCOUNT CONTEXT:\n{account_text}\n\n\
         PROJECT CONTEXT:\n{project_text}\n\n\
         Please follow up with the client directly."
    );
    let html_body = format!(
        "<h2>Support Escalation Request</h2>\n\
         <p><strong>Client Email:</strong> {client_email}</p>\n\
         <p><strong>Conversation ID:</strong> {conversation_id}</p>\n\
         <p><strong>Escalation Reason:</strong> {reason_text}</p>\n\
         <h3>Conversation History</h3>\n<pre>{transcript}</pre>\n\
         <h3>Account Context</h3>\n<pre>{account_text}</pre>\n\
         <h3>Project Context</h3>\n<pre>{project_text}</pre>\n\
         <p>Please follow up with the client directly.</p>"
    );

    EscalationEmail {
        subject: format!("Support Escalation: {client_email}"),
        text_body,
        html_body,
    }
}

/// Fires the ticket and the email. Neither failure propagates; the message
/// history is already safe in the store.
pub async fn trigger(
    state: &AppState,
    conversation_id: &str,
    client_email: &str,
    turns: &[ChatTurn],
    bundle: &ContextBundle,
    reason: &str,
    category_hint: Option<TicketCategory>,
) {
    let ticket = build_ticket(client_email, turns, bundle, reason, category_hint);
    match state.tracker.create_ticket(&ticket).await {
        Ok(url) => info!(
            conversation_id,
            category = ticket.category.as_str(),
            urgent = ticket.urgent,
            url = %url,
            "support ticket created"
        ),
        Err(err) => warn!(conversation_id, error = %err, "support ticket creation failed"),
    }

    let email = escalation_email(client_email, conversation_id, reason, turns, bundle);
    match state.notifier.notify(&email).await {
        Ok(()) => info!(conversation_id, "escalation email sent"),
        Err(err) => warn!(conversation_id, error = %err, "escalation email delivery failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccountContext, AccountRecord, ProjectCard, ProjectStatus, RecentEmail};

    fn turn(role: MessageRole, content: &str) -> ChatTurn {
        ChatTurn {
            role,
            content: content.to_string(),
        }
    }

    #[test]
    fn category_detection_matches_keywords() {
        assert_eq!(
            detect_category("my invoice looks wrong"),
            TicketCategory::Billing
        );
        assert_eq!(
            detect_category("please swap the photo on the homepage"),
            TicketCategory::WebsiteEdits
        );
        assert_eq!(
            detect_category("the contact form is broken"),
            TicketCategory::TechnicalIssue
        );
        assert_eq!(
            detect_category("we just launched and need help getting started"),
            TicketCategory::Onboarding
        );
        assert_eq!(
            detect_category("I'm locked out of my dashboard"),
            TicketCategory::AccountAccess
        );
        assert_eq!(
            detect_category("quick question about your service"),
            TicketCategory::GeneralQuestion
        );
    }

    #[test]
    fn billing_outranks_website_edits() {
        assert_eq!(
            detect_category("change the payment card on file"),
            TicketCategory::Billing
        );
    }

    #[test]
    fn urgency_detection() {
        assert!(is_urgent("I want to cancel right now"));
        assert!(is_urgent("this is UNACCEPTABLE"));
        assert!(!is_urgent("can you update my hours"));
    }

    #[test]
    fn ticket_title_truncates_long_messages() {
        let long = "a".repeat(80);
        let turns = vec![turn(MessageRole::User, &long)];
        let title = ticket_title(&turns);
        assert_eq!(title.chars().count(), 63);
        assert!(title.ends_with("..."));

        let short = vec![turn(MessageRole::User, "short one")];
        assert_eq!(ticket_title(&short), "short one");
    }

    #[test]
    fn ticket_title_uses_last_client_message() {
        let turns = vec![
            turn(MessageRole::User, "first message"),
            turn(MessageRole::Assistant, "a reply"),
            turn(MessageRole::User, "second message"),
        ];
        assert_eq!(ticket_title(&turns), "second message");
        assert_eq!(ticket_title(&[]), "Support Request");
    }

    #[test]
    fn transcript_labels_both_sides() {
        let turns = vec![
            turn(MessageRole::User, "where is my site"),
            turn(MessageRole::Assistant, "let me check"),
        ];
        let transcript = format_transcript(&turns);
        assert_eq!(
            transcript,
            "Client: where is my site\n\nSupport Bot: let me check"
        );
    }

    fn full_bundle() -> ContextBundle {
        ContextBundle {
            account: Some(AccountContext {
                account: AccountRecord {
                    id: "acct-1".to_string(),
                    name: "Riverside Roll-Off Dumpsters LLC".to_string(),
                    status: "Active".to_string(),
                },
                recent_emails: vec![
                    RecentEmail {
                        subject: "Kickoff".to_string(),
                        date: "2026-07-01".to_string(),
                    },
                    RecentEmail {
                        subject: "Design draft".to_string(),
                        date: "2026-07-10".to_string(),
                    },
                    RecentEmail {
                        subject: "Reminder".to_string(),
                        date: "2026-07-20".to_string(),
                    },
                    RecentEmail {
                        subject: "Overflow".to_string(),
                        date: "2026-07-25".to_string(),
                    },
                ],
            }),
            project: Some(ProjectStatus {
                active: vec![ProjectCard {
                    name: "Riverside site rebuild".to_string(),
                    stage: "Client Reviewing".to_string(),
                    url: String::new(),
                    due_date: None,
                    blocking: Vec::new(),
                }],
                completed: Vec::new(),
            }),
            kb_matches: Vec::new(),
        }
    }

    #[test]
    fn description_carries_transcript_context_and_reason() {
        let turns = vec![turn(MessageRole::User, "I want a refund")];
        let desc = ticket_description("client@example.com", &turns, &full_bundle(), "Keyword detected: \"refund\"");
        assert!(desc.contains("- **Email:** client@example.com"));
        assert!(desc.contains("**Client:** I want a refund"));
        assert!(desc.contains("- Account: Riverside Roll-Off Dumpsters LLC"));
        assert!(desc.contains("- Riverside site rebuild: Client Reviewing"));
        assert!(desc.contains("- **Escalation reason:** Keyword detected: \"refund\""));
        // Recent emails are capped at three in the ticket body.
        assert!(desc.contains("Reminder"));
        assert!(!desc.contains("Overflow"));
    }

    #[test]
    fn description_notes_missing_context() {
        let turns = vec![turn(MessageRole::User, "hello")];
        let desc = ticket_description("", &turns, &ContextBundle::default(), "");
        assert!(desc.contains("- **Email:** Not provided"));
        assert!(desc.contains("Account data not available"));
        assert!(desc.contains("No active projects found"));
        assert!(desc.contains("- **Escalation reason:** Unknown"));
    }

    #[test]
    fn escalation_email_has_subject_and_sections() {
        let turns = vec![
            turn(MessageRole::User, "I want a refund"),
            turn(MessageRole::Assistant, "Let me get a team member to help with this - they'll follow up with you shortly."),
        ];
        let email = escalation_email(
            "client@example.com",
            "conv-1",
            "Keyword detected: \"refund\"",
            &turns,
            &full_bundle(),
        );
        assert_eq!(email.subject, "Support Escalation: client@example.com");
        assert!(email.text_body.contains("Client Email: client@example.com"));
        assert!(email.text_body.contains("Conversation ID: conv-1"));
        assert!(email.text_body.contains("CONVERSATION HISTORY:\nClient: I want a refund"));
        assert!(email.text_body.contains("ACCOUNT CONTEXT:\nAccount: Riverside Roll-Off Dumpsters LLC"));
        assert!(email.text_body.contains("- Riverside site rebuild: Client Reviewing"));
        assert!(email.text_body.ends_with("Please follow up with the client directly."));
        assert!(email.html_body.contains("<h2>Support Escalation Request</h2>"));
    }

    #[test]
    fn empty_reason_reads_not_specified() {
        let email = escalation_email("c@example.com", "conv-2", "", &[], &ContextBundle::default());
        assert!(email.text_body.contains("Escalation Reason: Not specified"));
        assert!(email.text_body.contains("ACCOUNT CONTEXT:\nNo account data available."));
        assert!(email.text_body.contains("PROJECT CONTEXT:\nNo project data available."));
    }

    #[test]
    fn category_hint_wins_over_detection() {
        let turns = vec![turn(MessageRole::User, "my invoice is wrong")];
        let ticket = build_ticket(
            "client@example.com",
            &turns,
            &ContextBundle::default(),
            "Manual escalation requested",
            Some(TicketCategory::Onboarding),
        );
        assert_eq!(ticket.category, TicketCategory::Onboarding);

        let detected = build_ticket(
            "client@example.com",
            &turns,
            &ContextBundle::default(),
            "Manual escalation requested",
            None,
        );
        assert_eq!(detected.category, TicketCategory::Billing);
    }
}
