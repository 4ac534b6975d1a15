//! Case-insensitive phrase matching shared by routing, consent and the
//! rule-based policy.

/// True when `phrase` occurs in `text` on word boundaries, ignoring case.
/// `"ok"` matches "ok, go" but not "token" or "okay".
pub fn contains_phrase(text: &str, phrase: &str) -> bool {
    let phrase = phrase.trim().to_lowercase();
    if phrase.is_empty() {
        return false;
    }
    let text = text.to_lowercase();

    let mut search_from = 0;
    while let Some(offset) = text[search_from..].find(&phrase) {
        let start = search_from + offset;
        let end = start + phrase.len();
        let before_ok = text[..start].chars().next_back().map_or(true, |ch| !ch.is_alphanumeric());
        let after_ok = text[end..].chars().next().map_or(true, |ch| !ch.is_alphanumeric());
        if before_ok && after_ok {
            return true;
        }
        search_from = start + text[start..].chars().next().map_or(1, char::len_utf8);
    }
    false
}

pub fn matching_phrases<'a>(text: &str, phrases: &[&'a str]) -> Vec<&'a str> {
    phrases.iter().copied().filter(|phrase| contains_phrase(text, phrase)).collect()
}

#[cfg(test)]
mod tests {
    use super::{contains_phrase, matching_phrases};

    #[test]
    fn respects_word_boundaries() {
        assert!(contains_phrase("OK, go ahead", "ok"));
        assert!(contains_phrase("yes.", "yes"));
        assert!(!contains_phrase("rotate the token", "ok"));
        assert!(!contains_phrase("okay then", "ok"));
        assert!(!contains_phrase("the catalogs are stale", "logs"));
    }

    #[test]
    fn multi_word_phrases_match_anywhere_on_boundaries() {
        assert!(contains_phrase("Sure, please check the instance now", "please check"));
        assert!(contains_phrase("we need custom code here", "custom code"));
        assert!(!contains_phrase("", "yes"));
        assert!(!contains_phrase("anything", "  "));
    }

    #[test]
    fn matching_phrases_keeps_order() {
        let hits = matching_phrases("error logs after recent changes", &["recent changes", "error logs", "script"]);
        assert_eq!(hits, vec!["recent changes", "error logs"]);
    }
}
