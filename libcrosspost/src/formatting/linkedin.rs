//! LinkedIn: plain professional text

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use super::{
    char_len, truncate_at_boundary, url_spans, ContentFormatter, FormattedContent, ValidationReport,
};

pub const CHARACTER_LIMIT: usize = 3000;

/// How far back from the limit truncation looks for whitespace
const BOUNDARY_WINDOW: usize = 100;

const FORMAL_PHRASES: &[(&str, &str)] = &[
    ("gonna", "going to"),
    ("wanna", "want to"),
    ("gotta", "have to"),
    ("kinda", "kind of"),
    ("sorta", "sort of"),
    ("btw", "by the way"),
    ("imo", "in my opinion"),
    ("imho", "in my humble opinion"),
    ("fyi", "for your information"),
    ("asap", "as soon as possible"),
    ("thx", "thanks"),
    ("pls", "please"),
    ("plz", "please"),
    ("tbh", "to be honest"),
];

static EMPHASIS_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\*\*([^*\n]+?)\*\*",
        r"__([^_\n]+?)__",
        r"~~([^~\n]+?)~~",
        r"\*([^*\s][^*\n]*?)\*",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("emphasis pattern is valid"))
    .collect()
});

static INFORMAL_RE: Lazy<Regex> = Lazy::new(|| {
    let words: Vec<&str> = FORMAL_PHRASES.iter().map(|(w, _)| *w).collect();
    Regex::new(&format!(r"(?i)\b({})\b", words.join("|"))).expect("phrase pattern is valid")
});

static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[#@][\p{L}\p{N}_]+").expect("tag pattern is valid"));

#[derive(Debug, Clone, Default)]
pub struct LinkedinFormatter;

impl LinkedinFormatter {
    pub fn new() -> Self {
        Self
    }
}

/// Apply `rewrite` to the prose between URLs, hashtags and mentions
fn rewrite_prose(text: &str, rewrite: impl Fn(&str) -> String) -> String {
    let mut spans = url_spans(text);
    spans.extend(TAG_RE.find_iter(text).map(|m| (m.start(), m.end())));
    spans.sort_unstable();

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for (start, end) in spans {
        if end <= cursor {
            continue;
        }
        // A tag inside a URL extends the protected run
        if start > cursor {
            out.push_str(&rewrite(&text[cursor..start]));
            out.push_str(&text[start..end]);
        } else {
            out.push_str(&text[cursor..end]);
        }
        cursor = end;
    }
    out.push_str(&rewrite(&text[cursor..]));
    out
}

fn strip_emphasis(text: &str) -> String {
    EMPHASIS_RES
        .iter()
        .fold(text.to_string(), |acc, re| re.replace_all(&acc, "$1").into_owned())
}

fn formalize(text: &str) -> String {
    INFORMAL_RE
        .replace_all(text, |caps: &Captures| {
            let found = &caps[1];
            let lower = found.to_lowercase();
            let formal = FORMAL_PHRASES
                .iter()
                .find(|(w, _)| *w == lower)
                .map(|(_, f)| *f)
                .unwrap_or(found);
            if found.chars().next().is_some_and(char::is_uppercase) {
                capitalize(formal)
            } else {
                formal.to_string()
            }
        })
        .into_owned()
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl ContentFormatter for LinkedinFormatter {
    fn character_limit(&self) -> usize {
        CHARACTER_LIMIT
    }

    fn format(&self, text: &str) -> FormattedContent {
        let shaped = rewrite_prose(text.trim(), |prose| formalize(&strip_emphasis(prose)));
        FormattedContent::from_text(truncate_at_boundary(&shaped, CHARACTER_LIMIT, BOUNDARY_WINDOW, "…"))
    }

    fn validate(&self, text: &str) -> ValidationReport {
        let mut errors = Vec::new();
        if text.trim().is_empty() {
            errors.push("LinkedIn posts cannot be empty".to_string());
        }
        let length = char_len(text);
        if length > CHARACTER_LIMIT {
            errors.push(format!(
                "Post is {} characters; LinkedIn allows {}",
                length, CHARACTER_LIMIT
            ));
        }
        ValidationReport::new(errors, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_markdown_emphasis() {
        let content = LinkedinFormatter::new().format("This is **important** and *new* and ~~old~~ __really__");
        assert_eq!(content.text, "This is important and new and old really");
    }

    #[test]
    fn test_formalizes_informal_phrases() {
        let content = LinkedinFormatter::new().format("Gonna ship it asap, btw thx team");
        assert_eq!(
            content.text,
            "Going to ship it as soon as possible, by the way thanks team"
        );
    }

    #[test]
    fn test_does_not_touch_words_containing_phrases() {
        let content = LinkedinFormatter::new().format("Btwn us, the thxwork was fine");
        assert_eq!(content.text, "Btwn us, the thxwork was fine");
    }

    #[test]
    fn test_links_and_tags_are_left_intact() {
        let text = "Btw see https://example.com/docs/btw/__init__ and #asap with @fyi **today**";
        let content = LinkedinFormatter::new().format(text);

        assert_eq!(
            content.text,
            "By the way see https://example.com/docs/btw/__init__ and #asap with @fyi today"
        );
        assert_eq!(content.urls, vec!["https://example.com/docs/btw/__init__".to_string()]);
        assert_eq!(content.hashtags, vec!["asap".to_string()]);
        assert_eq!(content.mentions, vec!["fyi".to_string()]);
    }

    #[test]
    fn test_truncates_at_whitespace_near_limit() {
        let text = "professional ".repeat(300);
        let content = LinkedinFormatter::new().format(&text);
        assert!(char_len(&content.text) <= CHARACTER_LIMIT);
        assert!(content.text.ends_with("professional…"));
        assert!(LinkedinFormatter::new().validate(&content.text).valid);
    }

    #[test]
    fn test_unbroken_text_hard_cut() {
        let text = "x".repeat(3500);
        let content = LinkedinFormatter::new().format(&text);
        assert_eq!(char_len(&content.text), CHARACTER_LIMIT);
    }
}
