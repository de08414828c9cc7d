use crate::types::{KbEntry, KbMatch};

const MIN_SCORE: i64 = 2;
const MAX_MATCHES: usize = 3;

/// Score every FAQ entry against the message and keep the best few.
///
/// Curated keywords are the strong signal (+3 each when contained in the
/// message). Overlap with the entry's own question text is the weak signal:
/// when two or more distinct question words longer than three characters
/// appear in the message, the overlap count is added. Entries below the
/// minimum score are dropped; ties keep the entry order of the bank.
pub fn rank_matches(message: &str, entries: &[KbEntry]) -> Vec<KbMatch> {
    let message_lower = message.to_lowercase();

    let mut matches: Vec<KbMatch> = entries
        .iter()
        .filter_map(|entry| {
            let score = score_entry(&message_lower, entry);
            if score < MIN_SCORE {
                return None;
            }
            Some(KbMatch {
                question: entry.question.clone(),
                answer: entry.answer.clone(),
                category: entry.category.clone(),
                score,
            })
        })
        .collect();

    matches.sort_by(|a, b| b.score.cmp(&a.score));
    matches.truncate(MAX_MATCHES);
    matches
}

fn score_entry(message_lower: &str, entry: &KbEntry) -> i64 {
    let mut score = 0i64;

    for keyword in &entry.keywords {
        if message_lower.contains(&keyword.to_lowercase()) {
            score += 3;
        }
    }

    let question_lower = entry.question.to_lowercase();
    let mut matched_words: Vec<&str> = Vec::new();
    for word in question_lower.split_whitespace() {
        if word.len() > 3 && message_lower.contains(word) && !matched_words.contains(&word) {
            matched_words.push(word);
        }
    }
    if matched_words.len() >= 2 {
        score += matched_words.len() as i64;
    }

    score
}
