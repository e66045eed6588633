//! Small text helpers shared by the dialogue and pipeline modules

use regex::RegexSet;
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

/// Lowercase and strip accents so "Não" and "nao" compare equal
pub fn fold(text: &str) -> String {
    text.nfkd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

/// Compile a set of static patterns, logging instead of panicking on a bad one
pub fn pattern_set(patterns: &[&str]) -> Option<RegexSet> {
    match RegexSet::new(patterns) {
        Ok(set) => Some(set),
        Err(e) => {
            tracing::error!("invalid pattern set: {}", e);
            None
        }
    }
}

/// First `max_chars` characters of `text`, marked when cut
pub fn preview(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}…", head)
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold() {
        assert_eq!(fold("Não CONCORDO"), "nao concordo");
        assert_eq!(fold("Precificação"), "precificacao");
        assert_eq!(fold("loja física"), "loja fisica");
    }

    #[test]
    fn test_preview() {
        assert_eq!(preview("abc", 5), "abc");
        assert_eq!(preview("abcdef", 3), "abc…");
        assert_eq!(preview("ãéíõú", 2), "ãé…");
    }

    #[test]
    fn test_pattern_set() {
        let set = pattern_set(&[r"^sim\b", r"\bok\b"]).unwrap();
        assert!(set.is_match("sim, pode"));
        assert!(!set.is_match("simples"));
        assert!(pattern_set(&[r"(unclosed"]).is_none());
    }
}
