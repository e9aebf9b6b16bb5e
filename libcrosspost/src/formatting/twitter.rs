//! X/Twitter weighted length and thread splitting

use super::{char_len, url_spans, ContentFormatter, FormattedContent, ValidationReport};

pub const CHARACTER_LIMIT: usize = 280;

/// Weight of any URL, whatever its real length
pub const URL_WEIGHT: usize = 23;

/// Reservation for attached media
pub const MEDIA_WEIGHT: usize = 24;

pub const MAX_THREAD_LENGTH: usize = 25;

/// Appended to every tweet of a thread except the last
pub const THREAD_INDICATOR: &str = " 🧵";

/// Room kept for a `"25/25 "` numbering prefix
pub const NUMBERING_OVERHEAD: usize = 6;

/// Length of `text` as X counts it
pub fn weighted_length(text: &str) -> usize {
    let mut total = 0;
    let mut cursor = 0;
    for (start, end) in url_spans(text) {
        total += char_len(&text[cursor..start]) + URL_WEIGHT;
        cursor = end;
    }
    total + char_len(&text[cursor..])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwitterFormatter {
    numbering: bool,
    has_media: bool,
}

impl Default for TwitterFormatter {
    fn default() -> Self {
        Self::new(true)
    }
}

impl TwitterFormatter {
    pub fn new(numbering: bool) -> Self {
        Self {
            numbering,
            has_media: false,
        }
    }

    /// Reserve room for media in every tweet's budget
    pub fn with_media(mut self, has_media: bool) -> Self {
        self.has_media = has_media;
        self
    }

    fn media_weight(&self) -> usize {
        if self.has_media {
            MEDIA_WEIGHT
        } else {
            0
        }
    }

    fn fits_single(&self, text: &str) -> bool {
        weighted_length(text) + self.media_weight() <= CHARACTER_LIMIT
    }

    /// Weighted budget for the body of one thread piece
    fn piece_budget(&self) -> usize {
        let numbering = if self.numbering { NUMBERING_OVERHEAD } else { 0 };
        CHARACTER_LIMIT - self.media_weight() - char_len(THREAD_INDICATOR) - numbering
    }

    /// Split `text` into undecorated thread bodies
    pub fn split(&self, text: &str) -> Vec<String> {
        let budget = self.piece_budget();
        let mut pieces = Vec::new();
        let mut current = String::new();

        for sentence in sentences(text) {
            if weighted_length(&sentence) > budget {
                flush(&mut pieces, &mut current);
                pack_words(&sentence, budget, &mut pieces, &mut current);
                continue;
            }
            let candidate = join(&current, &sentence);
            if weighted_length(&candidate) <= budget {
                current = candidate;
            } else {
                flush(&mut pieces, &mut current);
                current = sentence;
            }
        }
        flush(&mut pieces, &mut current);
        pieces
    }

    /// Add numbering and the thread indicator to split bodies
    fn decorate(&self, bodies: Vec<String>) -> Vec<String> {
        let total = bodies.len();
        bodies
            .into_iter()
            .enumerate()
            .map(|(i, body)| {
                let mut tweet = if self.numbering {
                    format!("{}/{} {}", i + 1, total, body)
                } else {
                    body
                };
                if i + 1 < total {
                    tweet.push_str(THREAD_INDICATOR);
                }
                tweet
            })
            .collect()
    }
}

impl ContentFormatter for TwitterFormatter {
    fn character_limit(&self) -> usize {
        CHARACTER_LIMIT
    }

    fn format(&self, text: &str) -> FormattedContent {
        let mut content = FormattedContent::from_text(text.trim().to_string());
        if !self.fits_single(&content.text) {
            content.thread = self.decorate(self.split(&content.text));
        }
        content
    }

    fn validate(&self, text: &str) -> ValidationReport {
        let text = text.trim();
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if text.is_empty() && !self.has_media {
            errors.push("Tweet text cannot be empty".to_string());
        }
        if !self.fits_single(text) {
            let pieces = self.split(text).len();
            if pieces > MAX_THREAD_LENGTH {
                errors.push(format!(
                    "Content needs {} tweets; threads are limited to {}",
                    pieces, MAX_THREAD_LENGTH
                ));
            } else {
                warnings.push(format!(
                    "Content exceeds {} characters and will be posted as a thread of {} tweets",
                    CHARACTER_LIMIT, pieces
                ));
            }
        }
        ValidationReport::new(errors, warnings)
    }
}

fn join(current: &str, next: &str) -> String {
    if current.is_empty() {
        next.to_string()
    } else {
        format!("{} {}", current, next)
    }
}

fn flush(pieces: &mut Vec<String>, current: &mut String) {
    if !current.is_empty() {
        pieces.push(std::mem::take(current));
    }
}

/// Pack the words of an over-long sentence; only a single word longer than
/// the whole budget is cut mid-word
fn pack_words(sentence: &str, budget: usize, pieces: &mut Vec<String>, current: &mut String) {
    for word in sentence.split_whitespace() {
        if weighted_length(word) > budget {
            flush(pieces, current);
            let chars: Vec<char> = word.chars().collect();
            for chunk in chars.chunks(budget) {
                pieces.push(chunk.iter().collect());
            }
            continue;
        }
        let candidate = join(current, word);
        if weighted_length(&candidate) <= budget {
            *current = candidate;
        } else {
            flush(pieces, current);
            *current = word.to_string();
        }
    }
    flush(pieces, current);
}

/// Sentences end at `.`, `!` or `?` followed by whitespace or the end of text
fn sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            let at_boundary = match chars.peek() {
                None => true,
                Some((_, next)) => next.is_whitespace(),
            };
            if at_boundary {
                let end = idx + c.len_utf8();
                let sentence = text[start..end].trim();
                if !sentence.is_empty() {
                    out.push(sentence.to_string());
                }
                start = end;
            }
        }
    }
    let rest = text[start..].trim();
    if !rest.is_empty() {
        out.push(rest.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip_decorations(tweet: &str) -> String {
        let body = tweet.strip_suffix(THREAD_INDICATOR).unwrap_or(tweet);
        match body.split_once(' ') {
            Some((prefix, rest)) if prefix.contains('/') && prefix.chars().all(|c| c.is_ascii_digit() || c == '/') => {
                rest.to_string()
            }
            _ => body.to_string(),
        }
    }

    fn normalize(text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_url_weighs_23() {
        let text = "check https://example.com/very/long/path";
        let url_len = "https://example.com/very/long/path".len();
        assert_eq!(weighted_length(text), text.chars().count() - url_len + 23);
    }

    #[test]
    fn test_emoji_counts_as_one() {
        assert_eq!(weighted_length("hi 🎉"), 4);
    }

    #[test]
    fn test_short_text_is_not_threaded() {
        let content = TwitterFormatter::new(true).format("Hello #rust");
        assert!(content.thread.is_empty());
        assert_eq!(content.pieces(), vec!["Hello #rust".to_string()]);
        assert_eq!(content.hashtags, vec!["rust"]);
    }

    #[test]
    fn test_281_units_split_into_pieces_within_limit() {
        let text = "a".repeat(140) + " " + &"b".repeat(140);
        assert_eq!(weighted_length(&text), 281);

        let content = TwitterFormatter::new(true).format(&text);
        assert!(content.thread.len() >= 2);
        for tweet in &content.thread {
            assert!(weighted_length(tweet) <= CHARACTER_LIMIT, "{} too long", tweet);
        }
    }

    #[test]
    fn test_thread_reassembles_to_original() {
        let text = "First sentence is here. ".repeat(30);
        for numbering in [true, false] {
            let content = TwitterFormatter::new(numbering).format(&text);
            assert!(content.thread.len() > 1);
            let rebuilt: Vec<String> = content.thread.iter().map(|t| strip_decorations(t)).collect();
            assert_eq!(normalize(&rebuilt.join(" ")), normalize(&text));
        }
    }

    #[test]
    fn test_numbering_and_indicator() {
        let text = "word ".repeat(120);
        let content = TwitterFormatter::new(true).format(&text);
        let total = content.thread.len();
        assert!(content.thread[0].starts_with(&format!("1/{} ", total)));
        assert!(content.thread[0].ends_with(THREAD_INDICATOR));
        assert!(!content.thread[total - 1].ends_with(THREAD_INDICATOR));
    }

    #[test]
    fn test_long_sentence_splits_on_words() {
        let text = "lorem ".repeat(100);
        let bodies = TwitterFormatter::new(false).split(&text);
        for body in &bodies {
            assert!(body.split(' ').all(|w| w == "lorem"), "mid-word split in {:?}", body);
        }
    }

    #[test]
    fn test_giant_word_is_hard_split() {
        let text = "x".repeat(600);
        let formatter = TwitterFormatter::new(false);
        let bodies = formatter.split(&text);
        assert!(bodies.len() >= 3);
        assert!(bodies.iter().all(|b| weighted_length(b) <= formatter.piece_budget()));
    }

    #[test]
    fn test_media_reservation() {
        let text = "a".repeat(270);
        assert!(TwitterFormatter::new(true).format(&text).thread.is_empty());
        assert!(!TwitterFormatter::new(true).with_media(true).format(&text).thread.is_empty());
    }

    #[test]
    fn test_validation_rules() {
        let formatter = TwitterFormatter::new(true);
        assert!(!formatter.validate("   ").valid);
        assert!(formatter.clone().with_media(true).validate("").valid);

        let long = formatter.validate(&"Sentence here. ".repeat(40));
        assert!(long.valid);
        assert_eq!(long.warnings.len(), 1);

        let huge = formatter.validate(&"word ".repeat(2000));
        assert!(!huge.valid);
        assert!(huge.errors[0].contains("limited to 25"));
    }
}
