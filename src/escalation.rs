//! Deterministic escalation rules. Evaluated before any generation happens,
//! plus a post-hoc check on generated replies that asked for handoff
//! themselves.

use once_cell::sync::Lazy;
use regex::Regex;

/// Canned reply when a conversation is handed to a human. The leading phrase
/// doubles as the marker the post-response check scans for.
pub const HANDOFF_MESSAGE: &str =
    "Let me get a team member to help with this - they'll follow up with you shortly.";

/// Canned reply when response generation fails. Always paired with a forced
/// escalation so nobody is left talking to a dead bot.
pub const FALLBACK_MESSAGE: &str = "I'm having trouble pulling up an answer right now - let me \
     get a team member to help with this. They'll follow up with you shortly.";

const HANDOFF_MARKER: &str = "let me get a team member to help";

const ESCALATION_KEYWORDS: [&str; 16] = [
    "cancel",
    "cancellation",
    "cancel my",
    "refund",
    "money back",
    "speak to someone",
    "talk to someone",
    "human",
    "manager",
    "supervisor",
    "complaint",
    "sue",
    "lawsuit",
    "legal",
    "attorney",
    "lawyer",
];

const PROFANITY_WORDS: [&str; 8] = [
    "damn", "hell", "crap", "screw", "piss", "ass", "bitch", "bastard",
];

const NEGATIVE_INDICATORS: [&str; 14] = [
    "terrible",
    "awful",
    "horrible",
    "worst",
    "hate",
    "disgusted",
    "furious",
    "angry",
    "frustrated",
    "disappointed",
    "unacceptable",
    "ridiculous",
    "absurd",
    "pathetic",
];

static HUMAN_REQUEST_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(?:i\s+)?(?:want|need|would like|would love)\s+(?:to\s+)?(?:speak|talk)\s+(?:to|with)\s+(?:a\s+)?(?:human|person|someone|agent|representative)",
        r"(?i)(?:can|could|may)\s+(?:i\s+)?(?:speak|talk)\s+(?:to|with)\s+(?:a\s+)?(?:human|person|someone|agent|representative)",
        r"(?i)(?:let|get)\s+(?:me\s+)?(?:speak|talk)\s+(?:to|with)\s+(?:a\s+)?(?:human|person|someone|agent|representative)",
        r"(?i)(?:connect|transfer)\s+(?:me\s+)?(?:to|with)\s+(?:a\s+)?(?:human|person|someone|agent|representative)",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("human request pattern should compile"))
    .collect()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationDecision {
    pub should_escalate: bool,
    pub reason: Option<String>,
}

impl EscalationDecision {
    pub fn escalate(reason: String) -> EscalationDecision {
        EscalationDecision {
            should_escalate: true,
            reason: Some(reason),
        }
    }

    pub fn pass() -> EscalationDecision {
        EscalationDecision {
            should_escalate: false,
            reason: None,
        }
    }
}

/// Pure rule gate over a single inbound message. Rules run in a fixed order
/// and the first hit wins: keywords, profanity, explicit human requests,
/// accumulated negative sentiment. Matching is case-insensitive and uses
/// plain substring containment, so short keywords fire inside longer words
/// ("sue" inside "issue"); that is the documented contract, not an accident.
pub fn evaluate(message: &str) -> EscalationDecision {
    let lower = message.to_lowercase();

    for keyword in ESCALATION_KEYWORDS {
        if lower.contains(keyword) {
            return EscalationDecision::escalate(format!("Keyword detected: \"{keyword}\""));
        }
    }

    for token in lower.split_whitespace() {
        if PROFANITY_WORDS.iter().any(|word| token.contains(word)) {
            return EscalationDecision::escalate("Profanity detected".to_string());
        }
    }

    if HUMAN_REQUEST_PATTERNS
        .iter()
        .any(|pattern| pattern.is_match(message))
    {
        return EscalationDecision::escalate("Explicit request for human agent".to_string());
    }

    // A single mildly negative word is normal feedback; two or more distinct
    // ones reads as genuine frustration.
    let negative_hits = NEGATIVE_INDICATORS
        .iter()
        .filter(|word| lower.contains(**word))
        .count();
    if negative_hits >= 2 {
        return EscalationDecision::escalate(format!(
            "Multiple negative sentiment indicators detected ({negative_hits})"
        ));
    }

    EscalationDecision::pass()
}

/// Post-response check: the generator was instructed to open with the handoff
/// phrase whenever it decides a human should take over.
pub fn response_requests_handoff(response: &str) -> bool {
    response.to_lowercase().contains(HANDOFF_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refund_keyword_escalates_regardless_of_case() {
        for message in [
            "I want a refund",
            "I WANT A REFUND NOW",
            "would you consider a Refund for last month?",
        ] {
            let decision = evaluate(message);
            assert!(decision.should_escalate, "expected escalation for {message:?}");
            assert!(decision.reason.as_deref().unwrap_or_default().contains("refund"));
        }
    }

    #[test]
    fn cancellation_and_legal_keywords_escalate() {
        assert!(evaluate("Please CANCEL my subscription").should_escalate);
        assert!(evaluate("you will hear from my lawyer").should_escalate);
        assert!(evaluate("this is a formal complaint").should_escalate);
    }

    #[test]
    fn keyword_containment_is_literal() {
        // "issue" contains "sue"; substring semantics are part of the contract.
        let decision = evaluate("I have an issue with my site");
        assert!(decision.should_escalate);
        assert_eq!(
            decision.reason.as_deref(),
            Some("Keyword detected: \"sue\"")
        );
    }

    #[test]
    fn profanity_matches_inside_tokens() {
        let decision = evaluate("this damn form never loads");
        assert!(decision.should_escalate);
        assert_eq!(decision.reason.as_deref(), Some("Profanity detected"));

        // Token containment, same as the keyword rule.
        assert!(evaluate("hello there").should_escalate);
    }

    #[test]
    fn explicit_human_request_detected() {
        let decision = evaluate("can I talk to a person please");
        assert!(decision.should_escalate);
        assert_eq!(
            decision.reason.as_deref(),
            Some("Explicit request for human agent")
        );

        assert!(evaluate("transfer me to a representative").should_escalate);
    }

    #[test]
    fn single_negative_word_does_not_escalate() {
        let decision = evaluate("honestly I hate the new layout");
        assert!(!decision.should_escalate);
        assert_eq!(decision.reason, None);
    }

    #[test]
    fn two_distinct_negative_words_escalate_with_count() {
        let decision = evaluate("this is terrible and I am so frustrated");
        assert!(decision.should_escalate);
        assert_eq!(
            decision.reason.as_deref(),
            Some("Multiple negative sentiment indicators detected (2)")
        );
    }

    #[test]
    fn repeated_negative_word_counts_once() {
        assert!(!evaluate("terrible terrible terrible").should_escalate);
    }

    #[test]
    fn keyword_rule_wins_over_sentiment() {
        let decision = evaluate("this is terrible and awful, I want a refund");
        assert_eq!(
            decision.reason.as_deref(),
            Some("Keyword detected: \"refund\"")
        );
    }

    #[test]
    fn evaluate_is_idempotent() {
        let message = "I am furious, this is unacceptable";
        assert_eq!(evaluate(message), evaluate(message));
    }

    #[test]
    fn neutral_message_passes() {
        let decision = evaluate("What are your business hours?");
        assert!(!decision.should_escalate);
        assert_eq!(decision.reason, None);
    }

    #[test]
    fn handoff_marker_detected_in_generated_reply() {
        assert!(response_requests_handoff(HANDOFF_MESSAGE));
        assert!(response_requests_handoff(
            "Let me get a team member to help with this one."
        ));
        assert!(!response_requests_handoff(
            "Your site update is live, anything else?"
        ));
    }
}
