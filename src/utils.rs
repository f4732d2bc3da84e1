use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

static SENTENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)([^.!?]+[.!?]+)|([^.!?]+$)").unwrap());

/// Groups whole sentences into pieces of at most `max_chars` characters.
/// A single sentence longer than the limit becomes its own piece.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let sentences: Vec<&str> = SENTENCE
        .find_iter(text)
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .collect();
    if sentences.is_empty() {
        warn!("No sentence breaks found; returning whole text as one chunk");
        return vec![text.to_string()];
    }
    let mut chunks = Vec::new();
    let mut current = String::new();
    for s in sentences {
        if current.is_empty() {
            current.push_str(s);
        } else if current.len() + 1 + s.len() <= max_chars {
            current.push(' ');
            current.push_str(s);
        } else {
            chunks.push(current);
            current = s.to_string();
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Greedy word wrap to `width` characters per line. Words longer than the
/// width are kept whole on their own line.
pub fn wrap_text(s: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in s.split_whitespace() {
        let needed = current.chars().count() + word.chars().count() + 1;
        if needed > width && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
        } else {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}
