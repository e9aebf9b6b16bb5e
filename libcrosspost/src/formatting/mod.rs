//! Per-platform content shaping and validation
//!
//! Formatters are pure: they take text and return text plus what they found
//! in it, never touching the network. Each publisher validates before doing
//! any I/O, so a rejected post costs no requests.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{PlatformError, Result};

pub mod facebook;
pub mod instagram;
pub mod linkedin;
pub mod twitter;
pub mod youtube;

pub use facebook::FacebookFormatter;
pub use instagram::InstagramFormatter;
pub use linkedin::LinkedinFormatter;
pub use twitter::TwitterFormatter;
pub use youtube::YoutubeFormatter;

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s<>"]+"#).expect("URL pattern is valid"));

static HASHTAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[^\w#&/])#([\p{L}\p{N}_]+)").expect("hashtag pattern is valid"));

static MENTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[^\w@.])@([A-Za-z0-9_](?:[A-Za-z0-9_.]*[A-Za-z0-9_])?)").expect("mention pattern is valid"));

/// Text shaped for one platform, with the entities found in it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormattedContent {
    pub text: String,
    /// Hashtags without the leading `#`, in order of appearance
    pub hashtags: Vec<String>,
    /// Mentions without the leading `@`
    pub mentions: Vec<String>,
    pub urls: Vec<String>,
    /// Thread pieces when the text had to be split; empty otherwise
    pub thread: Vec<String>,
}

impl FormattedContent {
    pub fn from_text(text: String) -> Self {
        Self {
            hashtags: extract_hashtags(&text),
            mentions: extract_mentions(&text),
            urls: extract_urls(&text),
            text,
            thread: Vec::new(),
        }
    }

    /// Pieces to publish in order: the thread if split, else the text itself
    pub fn pieces(&self) -> Vec<String> {
        if self.thread.is_empty() {
            vec![self.text.clone()]
        } else {
            self.thread.clone()
        }
    }
}

/// Outcome of validating content against a platform's rules
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn new(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    pub fn ok() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    pub fn merge(mut self, other: ValidationReport) -> Self {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self.valid = self.errors.is_empty();
        self
    }

    /// `Err(Validation)` carrying every error when invalid
    pub fn into_result(self) -> Result<()> {
        if self.valid {
            Ok(())
        } else {
            Err(PlatformError::Validation(self.errors).into())
        }
    }
}

/// Platform text rules
pub trait ContentFormatter: Send + Sync {
    /// Maximum length in the platform's own units
    fn character_limit(&self) -> usize;

    fn format(&self, text: &str) -> FormattedContent;

    fn validate(&self, text: &str) -> ValidationReport;
}

pub fn extract_urls(text: &str) -> Vec<String> {
    URL_RE
        .find_iter(text)
        .map(|m| trim_url(m.as_str()).to_string())
        .collect()
}

pub fn extract_hashtags(text: &str) -> Vec<String> {
    let without_urls = URL_RE.replace_all(text, " ");
    HASHTAG_RE
        .captures_iter(&without_urls)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

pub fn extract_mentions(text: &str) -> Vec<String> {
    let without_urls = URL_RE.replace_all(text, " ");
    MENTION_RE
        .captures_iter(&without_urls)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Byte ranges of URLs in `text`
pub(crate) fn url_spans(text: &str) -> Vec<(usize, usize)> {
    URL_RE
        .find_iter(text)
        .map(|m| (m.start(), m.start() + trim_url(m.as_str()).len()))
        .collect()
}

// Sentence punctuation directly after a URL is not part of it
fn trim_url(url: &str) -> &str {
    url.trim_end_matches(['.', ',', ';', ':', '!', '?', ')', '\''])
}

pub(crate) fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// First `max` characters of `text`
pub(crate) fn take_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Cut `text` to at most `limit` characters (ellipsis included), preferring the
/// last whitespace within `lookback` characters of the cut
pub(crate) fn truncate_at_boundary(text: &str, limit: usize, lookback: usize, ellipsis: &str) -> String {
    if char_len(text) <= limit {
        return text.to_string();
    }
    let budget = limit.saturating_sub(char_len(ellipsis));
    let head = take_chars(text, budget);

    let boundary = head
        .char_indices()
        .rev()
        .take(lookback)
        .find(|(_, c)| c.is_whitespace())
        .map(|(idx, _)| idx);

    let cut = match boundary {
        Some(idx) => head[..idx].trim_end(),
        None => head,
    };
    format!("{}{}", cut, ellipsis)
}
