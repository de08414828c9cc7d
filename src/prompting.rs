use minijinja::{context, Environment};

use crate::escalation::HANDOFF_MESSAGE;
use crate::types::ContextBundle;

const SYSTEM_PROMPT_TEMPLATE: &str = include_str!("prompts/system_prompt.j2");

pub struct SystemPromptContext<'a> {
    pub client_email: &'a str,
    pub account_name: &'a str,
}

pub fn render_system_prompt(ctx: &SystemPromptContext<'_>) -> String {
    let mut env = Environment::new();
    if env
        .add_template("system_prompt", SYSTEM_PROMPT_TEMPLATE)
        .is_err()
    {
        return fallback_system_prompt(ctx);
    }

    let Ok(template) = env.get_template("system_prompt") else {
        return fallback_system_prompt(ctx);
    };

    template
        .render(context! {
            client_email => ctx.client_email,
            account_name => ctx.account_name,
            has_account => !ctx.account_name.trim().is_empty(),
            handoff_message => HANDOFF_MESSAGE,
        })
        .unwrap_or_else(|_| fallback_system_prompt(ctx))
}

fn fallback_system_prompt(ctx: &SystemPromptContext<'_>) -> String {
    let mut prompt = String::from(
        "You are a support agent for Sitewise, helping clients whose websites we build and manage.\n\
         Be friendly but firm, never overly apologetic, and keep replies to a few sentences.\n\
         Never mention being a bot.\n",
    );

    if !ctx.client_email.trim().is_empty() {
        prompt.push_str(&format!(
            "\nYou are talking to {}",
            ctx.client_email.trim()
        ));
        if !ctx.account_name.trim().is_empty() {
            prompt.push_str(&format!(" from {}", ctx.account_name.trim()));
        }
        prompt.push_str(".\n");
    }

    prompt.push_str(&format!(
        "\nIf the client mentions canceling, refunds, wants a person, uses profanity, or seems very frustrated, respond with: \"{HANDOFF_MESSAGE}\"\n"
    ));

    prompt
}

/// Renders the context bundle into the text block appended to the user's
/// message. This is the only place that formatting lives; the generator,
/// tickets, and email all receive context shaped here or in handoff.
pub fn render_context_block(bundle: &ContextBundle) -> String {
    if bundle.is_empty() {
        return String::new();
    }
    let mut block = String::new();

    if let Some(context) = &bundle.account {
        block.push_str("CLIENT ACCOUNT CONTEXT:\n");
        block.push_str(&format!("Account: {}\n", context.account.name));
        if !context.recent_emails.is_empty() {
            block.push_str("Recent emails sent:\n");
            for email in &context.recent_emails {
                block.push_str(&format!("- {} sent on {}\n", email.subject, email.date));
            }
        }
    }

    if let Some(project) = &bundle.project {
        if !project.active.is_empty() {
            if !block.is_empty() {
                block.push('\n');
            }
            block.push_str("PROJECT STATUS:\nActive projects:\n");
            for card in &project.active {
                block.push_str(&format!("- {}: {}\n", card.name, card.stage));
                if !card.blocking.is_empty() {
                    block.push_str(&format!("  Waiting on: {}\n", card.blocking.join(", ")));
                }
            }
        }
    }

    if !bundle.kb_matches.is_empty() {
        if !block.is_empty() {
            block.push('\n');
        }
        block.push_str("RELEVANT FAQ:\n");
        for entry in &bundle.kb_matches {
            block.push_str(&format!("Q: {}\nA: {}\n\n", entry.question, entry.answer));
        }
    }

    block.trim_end().to_string()
}
