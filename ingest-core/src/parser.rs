//! Pure filename parsing: movie code extraction and subtitle-tag detection.
//!
//! Both functions are pure — no I/O, no panics on malformed input — and
//! operate on the basename of a path.

use regex::Regex;
use std::sync::OnceLock;

fn code_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)[A-Za-z]{2,6}-\d{1,5}").expect("valid regex"))
}

/// Extract the first movie code (`AAA-123` form) from a filename, normalized
/// to upper-case. Returns `None` if no code is present.
pub fn extract_code(filename: &str) -> Option<String> {
    code_regex()
        .find(filename)
        .map(|m| m.as_str().to_uppercase())
}

/// Priority-ordered subtitle keyword -> tag mapping. List order is the match
/// priority.
const SUBTITLE_KEYWORDS: &[(&str, &str)] = &[
    ("english", "English Sub"),
    ("chinese", "Chinese Sub"),
    ("korean", "Korean Sub"),
    ("japanese", "Japanese Sub"),
];

/// Detect the subtitle tag implied by a filename. Falls back to "No Sub"
/// when none of the priority keywords match.
pub fn detect_subtitle(filename: &str) -> String {
    let lower = filename.to_lowercase();
    for (keyword, tag) in SUBTITLE_KEYWORDS {
        if lower.contains(keyword) {
            return tag.to_string();
        }
    }
    "No Sub".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_basic_code() {
        assert_eq!(
            extract_code("SONE-760 English subbed The same commute.mp4"),
            Some("SONE-760".to_string())
        );
    }

    #[test]
    fn normalizes_case() {
        assert_eq!(extract_code("sone-760 sample.mp4"), Some("SONE-760".to_string()));
    }

    #[test]
    fn tolerates_brackets_and_whitespace() {
        assert_eq!(extract_code("[SONE-760]  Title.mp4"), Some("SONE-760".to_string()));
    }

    #[test]
    fn first_match_wins_on_duplicate_code() {
        assert_eq!(
            extract_code("SONE-760 SONE-760 sample.mp4"),
            Some("SONE-760".to_string())
        );
    }

    #[test]
    fn returns_none_without_code() {
        assert_eq!(extract_code("random clip.mp4"), None);
    }

    #[test]
    fn detects_subtitle_priority_order() {
        assert_eq!(detect_subtitle("Movie English Chinese Sub.mp4"), "English Sub");
        assert_eq!(detect_subtitle("Movie Chinese Sub.mp4"), "Chinese Sub");
        assert_eq!(detect_subtitle("Movie Korean.mp4"), "Korean Sub");
        assert_eq!(detect_subtitle("Movie Japanese.mp4"), "Japanese Sub");
        assert_eq!(detect_subtitle("Movie raw.mp4"), "No Sub");
    }

    #[test]
    fn detect_subtitle_is_case_insensitive() {
        assert_eq!(detect_subtitle("Movie ENGLISH.mp4"), "English Sub");
    }
}
