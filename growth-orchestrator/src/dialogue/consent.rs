//! Classify the user's answer to a research proposal

use regex::{Regex, RegexSet};
use std::sync::OnceLock;

use crate::text::{fold, pattern_set};

/// Answer to "may I look this up for you?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentSignal {
    Confirm,
    Reject,
    /// Neither; the message is the user's own answer for the field
    Other,
}

// Patterns run on accent-folded lowercase text. Reject is checked first so
// "não concordo" never reads as a confirmation.
const REJECT_PATTERNS: &[&str] = &[
    r"\bnao\b.*\bconcordo\b",
    r"\bdiscordo\b",
    r"\bdefinir eu mesm[oa]\b",
    r"\beu mesm[oa]\b",
    r"\bprefiro (definir|responder|dizer|falar|informar)\b",
    r"\bna verdade\b",
    r"\bnao precisa\b",
    r"\bnao pesquis",
    r"^\s*nao\s*[.!]*\s*$",
];

const CONFIRM_PATTERNS: &[&str] = &[
    r"\beu concordo\b",
    r"\bconcordo\b",
    r"\bsim\b",
    r"\bpode pesquisar\b",
    r"^\s*pode\b",
    r"^\s*ok\b",
    r"\bclaro\b",
    r"\bisso mesmo\b",
    r"\bpode ser\b",
    r"\bmanda ver\b",
    r"\bbeleza\b",
    r"\bfechado\b",
    r"\bpesquisa\b",
];

fn reject_set() -> Option<&'static RegexSet> {
    static SET: OnceLock<Option<RegexSet>> = OnceLock::new();
    SET.get_or_init(|| pattern_set(REJECT_PATTERNS)).as_ref()
}

fn confirm_set() -> Option<&'static RegexSet> {
    static SET: OnceLock<Option<RegexSet>> = OnceLock::new();
    SET.get_or_init(|| pattern_set(CONFIRM_PATTERNS)).as_ref()
}

// Words that say nothing about the field once the rejection phrase is gone
const FILLER_WORDS: &[&str] = &["sim", "nao", "mas", "isso", "pesquisa", "pesquisar", "obrigado", "obrigada"];

fn reject_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        REJECT_PATTERNS
            .iter()
            .filter_map(|p| {
                Regex::new(p)
                    .map_err(|e| tracing::error!("invalid reject pattern {}: {}", p, e))
                    .ok()
            })
            .collect()
    })
}

/// Whether a rejection also states the user's own value for the field
///
/// "na verdade meus concorrentes são X" declines the lookup and answers it
/// in one message; "não, prefiro responder eu mesmo" only declines.
pub fn carries_answer(message: &str) -> bool {
    let mut rest = fold(message.trim());
    for pattern in reject_patterns() {
        rest = pattern.replace_all(&rest, " ").into_owned();
    }
    rest.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3 && !FILLER_WORDS.contains(w))
        .count()
        >= 2
}

pub fn classify(message: &str) -> ConsentSignal {
    let folded = fold(message.trim());
    if folded.is_empty() {
        return ConsentSignal::Other;
    }
    if reject_set().is_some_and(|set| set.is_match(&folded)) {
        ConsentSignal::Reject
    } else if confirm_set().is_some_and(|set| set.is_match(&folded)) {
        ConsentSignal::Confirm
    } else {
        ConsentSignal::Other
    }
}
