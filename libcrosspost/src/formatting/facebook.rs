//! Facebook page posts

use super::{char_len, extract_hashtags, ContentFormatter, FormattedContent, ValidationReport};

pub const CHARACTER_LIMIT: usize = 63206;

/// Above this many hashtags reach drops; Facebook still accepts the post
pub const HASHTAG_WARNING_THRESHOLD: usize = 30;

#[derive(Debug, Clone, Default)]
pub struct FacebookFormatter;

impl FacebookFormatter {
    pub fn new() -> Self {
        Self
    }
}

impl ContentFormatter for FacebookFormatter {
    fn character_limit(&self) -> usize {
        CHARACTER_LIMIT
    }

    fn format(&self, text: &str) -> FormattedContent {
        FormattedContent::from_text(text.trim().to_string())
    }

    fn validate(&self, text: &str) -> ValidationReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let length = char_len(text);
        if length > CHARACTER_LIMIT {
            errors.push(format!(
                "Post is {} characters; Facebook allows {}",
                length, CHARACTER_LIMIT
            ));
        }
        let hashtags = extract_hashtags(text).len();
        if hashtags > HASHTAG_WARNING_THRESHOLD {
            warnings.push(format!(
                "Post has {} hashtags; more than {} tends to reduce reach",
                hashtags, HASHTAG_WARNING_THRESHOLD
            ));
        }
        ValidationReport::new(errors, warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hashtag_overuse_is_only_a_warning() {
        let tags: Vec<String> = (0..35).map(|i| format!("#t{}", i)).collect();
        let report = FacebookFormatter::new().validate(&tags.join(" "));
        assert!(report.valid);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_over_limit_is_error() {
        let report = FacebookFormatter::new().validate(&"a".repeat(CHARACTER_LIMIT + 1));
        assert!(!report.valid);
        assert!(FacebookFormatter::new().validate(&"a".repeat(CHARACTER_LIMIT)).valid);
    }
}
