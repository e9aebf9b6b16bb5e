//! Instagram caption shaping

use once_cell::sync::Lazy;
use regex::Regex;

use super::{char_len, extract_hashtags, take_chars, truncate_at_boundary, url_spans, ContentFormatter, FormattedContent, ValidationReport};

pub const CHARACTER_LIMIT: usize = 2200;
pub const MAX_HASHTAGS: usize = 30;

const ELLIPSIS: &str = "…";
const BLOCK_SEPARATOR: &str = "\n\n";

static BLANK_LINES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n[ \t]*(?:\n[ \t]*){2,}").expect("blank line pattern is valid"));

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\w.+-]+@[\w-]+(?:\.[\w-]+)+").expect("email pattern is valid"));

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\S+").expect("token pattern is valid"));

#[derive(Debug, Clone, Default)]
pub struct InstagramFormatter;

impl InstagramFormatter {
    pub fn new() -> Self {
        Self
    }
}

impl ContentFormatter for InstagramFormatter {
    fn character_limit(&self) -> usize {
        CHARACTER_LIMIT
    }

    fn format(&self, text: &str) -> FormattedContent {
        let normalized = BLANK_LINES_RE.replace_all(text.trim(), "\n\n");
        let spaced = space_tokens(&normalized);
        FormattedContent::from_text(truncate_caption(&spaced, CHARACTER_LIMIT))
    }

    fn validate(&self, text: &str) -> ValidationReport {
        let mut errors = Vec::new();
        let length = char_len(text);
        if length > CHARACTER_LIMIT {
            errors.push(format!(
                "Caption is {} characters; Instagram allows {}",
                length, CHARACTER_LIMIT
            ));
        }
        let hashtags = extract_hashtags(text).len();
        if hashtags > MAX_HASHTAGS {
            errors.push(format!(
                "Caption has {} hashtags; Instagram allows {}",
                hashtags, MAX_HASHTAGS
            ));
        }
        ValidationReport::new(errors, Vec::new())
    }
}

/// Insert a space before `#`/`@` tokens glued to the previous word,
/// leaving URLs and e-mail addresses untouched
fn space_tokens(text: &str) -> String {
    let mut protected = url_spans(text);
    protected.extend(EMAIL_RE.find_iter(text).map(|m| (m.start(), m.end())));
    let is_protected = |idx: usize| protected.iter().any(|(s, e)| idx >= *s && idx < *e);

    let mut out = String::with_capacity(text.len() + 8);
    let mut prev: Option<char> = None;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        let starts_token = matches!(c, '#' | '@')
            && chars.peek().is_some_and(|(_, next)| next.is_alphanumeric() || *next == '_');
        if starts_token && prev.is_some_and(|p| !p.is_whitespace()) && !is_protected(idx) {
            out.push(' ');
        }
        out.push(c);
        prev = Some(c);
    }
    out
}

/// Byte index where a trailing run of hashtag-only tokens begins
fn trailing_hashtag_block(text: &str) -> Option<usize> {
    let tokens: Vec<_> = TOKEN_RE.find_iter(text).collect();
    let start = tokens
        .iter()
        .rev()
        .take_while(|t| t.as_str().starts_with('#') && t.as_str().len() > 1)
        .last()
        .map(|t| t.start())?;
    // A caption made only of hashtags has no prose to give up
    if start == 0 {
        None
    } else {
        Some(start)
    }
}

/// Truncate prose first so a trailing hashtag block survives intact
pub fn truncate_caption(text: &str, limit: usize) -> String {
    if char_len(text) <= limit {
        return text.to_string();
    }

    if let Some(block_start) = trailing_hashtag_block(text) {
        let block = text[block_start..].trim();
        let prose = text[..block_start].trim_end();
        let reserved = char_len(block) + char_len(BLOCK_SEPARATOR);
        if reserved + char_len(ELLIPSIS) < limit {
            let prose = truncate_at_boundary(prose, limit - reserved, 100, ELLIPSIS);
            return format!("{}{}{}", prose, BLOCK_SEPARATOR, block);
        }
    }

    let cut = truncate_at_boundary(text, limit, 100, ELLIPSIS);
    if char_len(&cut) <= limit {
        cut
    } else {
        take_chars(&cut, limit).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_caption_keeps_hashtag_block() {
        let prose = "Sunset over the bay with friends. ".repeat(68);
        let prose = take_chars(&prose, 2300).to_string();
        let text = format!("{}\n\n#sunset #bay #friends #summer #photo", prose);

        let content = InstagramFormatter::new().format(&text);
        assert!(char_len(&content.text) <= CHARACTER_LIMIT);
        for tag in ["#sunset", "#bay", "#friends", "#summer", "#photo"] {
            assert!(content.text.contains(tag), "missing {}", tag);
        }
        assert!(content.text.ends_with("#sunset #bay #friends #summer #photo"));
        assert_eq!(content.hashtags.len(), 5);
    }

    #[test]
    fn test_block_too_large_falls_back_to_plain_truncation() {
        let tags: Vec<String> = (0..400).map(|i| format!("#tag{}", i)).collect();
        let text = format!("Intro text {}", tags.join(" "));
        let cut = truncate_caption(&text, CHARACTER_LIMIT);
        assert!(char_len(&cut) <= CHARACTER_LIMIT);
        assert!(cut.starts_with("Intro text"));
    }

    #[test]
    fn test_blank_lines_collapsed() {
        let content = InstagramFormatter::new().format("One\n\n\n\n\nTwo\n \n \nThree");
        assert_eq!(content.text, "One\n\nTwo\n\nThree");
    }

    #[test]
    fn test_spacing_before_tokens() {
        let content = InstagramFormatter::new().format("Great day!#sunny with@maria");
        assert_eq!(content.text, "Great day! #sunny with @maria");
    }

    #[test]
    fn test_urls_and_emails_untouched() {
        let text = "Docs at https://example.com/page#section or mail hello@example.com";
        let content = InstagramFormatter::new().format(text);
        assert_eq!(content.text, text);
    }

    #[test]
    fn test_too_many_hashtags_is_error() {
        let tags: Vec<String> = (0..31).map(|i| format!("#t{}", i)).collect();
        let report = InstagramFormatter::new().validate(&tags.join(" "));
        assert!(!report.valid);
        assert!(report.errors[0].contains("31 hashtags"));
    }
}
