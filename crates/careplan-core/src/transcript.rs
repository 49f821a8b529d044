//! Transcript helpers: audit digest and bounded excerpts.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of the transcript text.
///
/// Logged and stored in place of the transcript itself.
pub fn digest(transcript: &str) -> String {
    hex::encode(Sha256::digest(transcript.as_bytes()))
}

/// The last `max_chars` characters of `text`, prefixed with an ellipsis
/// when truncated. Never splits a UTF-8 code point.
pub fn tail_excerpt(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_owned();
    }
    let skip = total - max_chars;
    let start = text
        .char_indices()
        .nth(skip)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    format!("…{}", &text[start..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable_hex() {
        let d = digest("hello");
        assert_eq!(d.len(), 64);
        assert_eq!(
            d,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn short_text_is_unchanged() {
        assert_eq!(tail_excerpt("brief", 10), "brief");
    }

    #[test]
    fn long_text_keeps_the_end() {
        assert_eq!(tail_excerpt("abcdefghij", 4), "…ghij");
    }

    #[test]
    fn multibyte_boundaries_are_respected() {
        let text = "ééééé";
        let excerpt = tail_excerpt(text, 2);
        assert_eq!(excerpt, "…éé");
    }

    #[test]
    fn zero_budget_yields_marker_only() {
        assert_eq!(tail_excerpt("abc", 0), "…");
    }
}
