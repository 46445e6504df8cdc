use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedText {
    pub text: String,
    pub fingerprint: String,
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("whitespace pattern is valid"))
}

fn unsafe_chars_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w\s.,!?;:()\-']").expect("safe-set pattern is valid"))
}

fn non_word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w\s]").expect("non-word pattern is valid"))
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cleans extracted text and fingerprints the result.
///
/// Whitespace runs collapse to one space, characters outside word characters, whitespace
/// and `. , ! ? ; : ( ) - '` become spaces, whitespace collapses again, then the text is
/// lowercased and trimmed.
pub fn normalize_text(raw: &str) -> NormalizedText {
    let collapsed = whitespace_re().replace_all(raw, " ");
    let filtered = unsafe_chars_re().replace_all(&collapsed, " ");
    let text = normalize_whitespace(&filtered).to_lowercase().trim().to_string();
    let fingerprint = fingerprint(&text);
    NormalizedText { text, fingerprint }
}

/// Hex SHA-256 digest of `text`.
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Prepares a user question for matching against normalized chunk text.
pub fn preprocess_query(query: &str) -> String {
    let lowered = normalize_whitespace(&query.to_lowercase());
    normalize_whitespace(&non_word_re().replace_all(&lowered, " "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_is_normalized() {
        let input = "A  \t  lot\nof   spacing";
        let normalized = normalize_whitespace(input);
        assert_eq!(normalized, "A lot of spacing");
    }

    #[test]
    fn normalization_filters_and_lowercases() {
        let normalized = normalize_text("  Claims   @Policy #42:\n\nSee (Section 3.1) § it's VALID!  ");
        assert_eq!(
            normalized.text,
            "claims policy 42: see (section 3.1) it's valid!"
        );
    }

    #[test]
    fn fingerprint_is_deterministic_hex() {
        let first = normalize_text("Hydraulic pressure and flow");
        let second = normalize_text("hydraulic   PRESSURE and flow");
        assert_eq!(first.fingerprint, second.fingerprint);
        assert_eq!(first.fingerprint.len(), 64);
        assert!(first.fingerprint.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn different_text_has_different_fingerprint() {
        assert_ne!(fingerprint("alpha"), fingerprint("beta"));
    }

    #[test]
    fn query_punctuation_becomes_spaces() {
        assert_eq!(
            preprocess_query("  What is the CLAIM-limit?? "),
            "what is the claim limit"
        );
    }
}
