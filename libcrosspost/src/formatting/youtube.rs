//! YouTube video title, description and tags

use super::{char_len, take_chars, truncate_at_boundary, ContentFormatter, FormattedContent, ValidationReport};

pub const DESCRIPTION_LIMIT: usize = 5000;
pub const TITLE_LIMIT: usize = 100;

#[derive(Debug, Clone, Default)]
pub struct YoutubeFormatter;

impl YoutubeFormatter {
    pub fn new() -> Self {
        Self
    }

    /// Explicit title, else the first non-empty line of the content, capped at 100 chars
    pub fn title(&self, explicit: Option<&str>, content: &str) -> String {
        let source = explicit
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .or_else(|| content.lines().map(str::trim).find(|l| !l.is_empty()))
            .unwrap_or_default();
        take_chars(strip_angle_brackets(source).trim(), TITLE_LIMIT)
            .trim_end()
            .to_string()
    }

    /// Hashtags plus explicit tags, deduplicated case-insensitively
    pub fn tags(&self, formatted: &FormattedContent, explicit: &[String]) -> Vec<String> {
        let mut tags: Vec<String> = Vec::new();
        for tag in explicit.iter().chain(formatted.hashtags.iter()) {
            let tag = tag.trim().trim_start_matches('#');
            if !tag.is_empty() && !tags.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
                tags.push(tag.to_string());
            }
        }
        tags
    }
}

fn strip_angle_brackets(text: &str) -> String {
    text.chars().filter(|c| !matches!(c, '<' | '>')).collect()
}

impl ContentFormatter for YoutubeFormatter {
    fn character_limit(&self) -> usize {
        DESCRIPTION_LIMIT
    }

    fn format(&self, text: &str) -> FormattedContent {
        let cleaned = strip_angle_brackets(text.trim());
        FormattedContent::from_text(truncate_at_boundary(&cleaned, DESCRIPTION_LIMIT, 100, "…"))
    }

    fn validate(&self, text: &str) -> ValidationReport {
        let mut errors = Vec::new();
        let length = char_len(text);
        if length > DESCRIPTION_LIMIT {
            errors.push(format!(
                "Description is {} characters; YouTube allows {}",
                length, DESCRIPTION_LIMIT
            ));
        }
        if text.contains(['<', '>']) {
            errors.push("YouTube descriptions cannot contain '<' or '>'".to_string());
        }
        ValidationReport::new(errors, Vec::new())
    }
}
