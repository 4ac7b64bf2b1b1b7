//! Text normalization helpers.

use unicode_normalization::UnicodeNormalization;

/// Normalize note content for hashing: Unicode NFC, leading/trailing
/// whitespace stripped.
pub fn normalize_content(text: &str) -> String {
    text.trim().nfc().collect()
}

/// Normalize a title for hashing: NFC, trimmed, lowercased.
pub fn normalize_title(title: &str) -> String {
    title.trim().nfc().collect::<String>().to_lowercase()
}

/// Truncate text to at most `max_chars` characters without splitting a
/// grapheme-carrying code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_content_trims() {
        assert_eq!(normalize_content("  hello \n"), "hello");
    }

    #[test]
    fn test_normalize_content_nfc() {
        // U+0065 U+0301 (e + combining acute) composes to U+00E9
        assert_eq!(normalize_content("e\u{301}"), "\u{e9}");
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(normalize_title("  Physics Notes "), "physics notes");
    }

    #[test]
    fn test_truncate_chars_ascii() {
        assert_eq!(truncate_chars("hello world", 5), "hello");
        assert_eq!(truncate_chars("hi", 5), "hi");
    }

    #[test]
    fn test_truncate_chars_multibyte() {
        let text = "光速很快";
        assert_eq!(truncate_chars(text, 2), "光速");
    }
}
