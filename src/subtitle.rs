use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::align::WordTimestamp;
use crate::config::ChunkPolicy;

/// Chunks whose raw duration is at or below this are considered degenerate.
const DEGENERATE_DURATION: f64 = 0.05;
/// Duration given to degenerate chunks.
const MIN_CHUNK_DURATION: f64 = 0.1;

/// Title duration used when nothing better can be derived.
const DEFAULT_TITLE_SECONDS: f64 = 3.0;
const MIN_TITLE_SECONDS: f64 = 0.5;

/// One on-screen caption: a few consecutive spoken words.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptionChunk {
    pub text: String,
    pub start: f64,
    pub duration: f64,
}

impl CaptionChunk {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

struct OpenChunk<'a> {
    words: Vec<&'a str>,
    start: f64,
}

impl OpenChunk<'_> {
    fn close(self, last_end: f64) -> CaptionChunk {
        let mut duration = last_end - self.start;
        if duration <= DEGENERATE_DURATION {
            duration = MIN_CHUNK_DURATION;
        }
        CaptionChunk {
            text: self.words.join(" "),
            start: self.start,
            duration,
        }
    }
}

/// Groups aligned words into captions in a single left-to-right pass.
///
/// The first `skip_count` words belong to the title card and are dropped. A
/// new caption starts when the current one already holds
/// `max_words_per_chunk` words, or when the silence before the next word is
/// at least `min_gap_seconds`. The word cap is checked first.
pub fn chunk_words(words: &[WordTimestamp], policy: ChunkPolicy, skip_count: usize) -> Vec<CaptionChunk> {
    let max_words = policy.max_words_per_chunk.max(1);
    let mut chunks = Vec::new();
    let mut open: Option<OpenChunk> = None;
    let mut last_end = 0.0;

    for word in words.iter().skip(skip_count) {
        let starts_new = match &open {
            None => true,
            Some(chunk) if chunk.words.len() >= max_words => true,
            Some(_) => word.start - last_end >= policy.min_gap_seconds,
        };
        if starts_new {
            if let Some(chunk) = open.take() {
                chunks.push(chunk.close(last_end));
            }
            open = Some(OpenChunk {
                words: Vec::with_capacity(max_words),
                start: word.start,
            });
        }
        if let Some(chunk) = open.as_mut() {
            chunk.words.push(&word.word);
        }
        last_end = word.end;
    }
    if let Some(chunk) = open.take() {
        chunks.push(chunk.close(last_end));
    }

    trim_overlaps(&mut chunks);
    debug!("Built {} caption chunks", chunks.len());
    chunks
}

/// A floored duration may reach past the next caption's start; cut it back
/// so captions never overlap.
fn trim_overlaps(chunks: &mut [CaptionChunk]) {
    for i in 1..chunks.len() {
        let next_start = chunks[i].start;
        let prev = &mut chunks[i - 1];
        let room = next_start - prev.start;
        if prev.end() > next_start && room > 0.0 {
            prev.duration = room;
        }
    }
}

/// When the spoken title ends, in seconds from the start of the narration.
///
/// Uses the end of the `title_word_count`-th aligned word when alignment
/// produced enough words, otherwise scales the narration duration by the
/// title's share of words.
pub fn estimate_title_duration(
    title_word_count: usize,
    words: &[WordTimestamp],
    narration_duration: f64,
) -> f64 {
    let estimate = if title_word_count == 0 || words.is_empty() {
        DEFAULT_TITLE_SECONDS
    } else if words.len() >= title_word_count {
        words[title_word_count - 1].end
    } else {
        (title_word_count as f64 / words.len() as f64) * narration_duration
    };
    estimate.max(MIN_TITLE_SECONDS)
}

pub fn write_srt(path: &Path, chunks: &[CaptionChunk]) -> anyhow::Result<()> {
    let mut f = BufWriter::new(File::create(path)?);
    for (i, chunk) in chunks.iter().enumerate() {
        writeln!(f, "{}", i + 1)?;
        writeln!(
            f,
            "{} --> {}",
            format_srt_time(chunk.start),
            format_srt_time(chunk.end())
        )?;
        writeln!(f, "{}", chunk.text)?;
        writeln!(f)?;
    }
    f.flush()?;
    Ok(())
}

fn format_srt_time(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_sec = total_ms / 1000;
    let s = total_sec % 60;
    let total_min = total_sec / 60;
    let m = total_min % 60;
    let h = total_min / 60;
    format!("{:02}:{:02}:{:02},{:03}", h, m, s, ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn w(word: &str, start: f64, end: f64) -> WordTimestamp {
        WordTimestamp {
            word: word.to_string(),
            start,
            end,
        }
    }

    fn policy(max_words: usize, gap: f64) -> ChunkPolicy {
        ChunkPolicy {
            max_words_per_chunk: max_words,
            min_gap_seconds: gap,
        }
    }

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }

    #[test]
    fn cap_and_gap_on_same_word_split_once() {
        let words = [
            w("the", 0.0, 0.2),
            w("quick", 0.2, 0.4),
            w("brown", 0.6, 0.8),
            w("fox", 0.8, 1.0),
        ];
        let chunks = chunk_words(&words, policy(2, 0.1), 0);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "the quick");
        assert_close(chunks[0].start, 0.0);
        assert_close(chunks[0].duration, 0.4);
        assert_eq!(chunks[1].text, "brown fox");
        assert_close(chunks[1].start, 0.6);
        assert_close(chunks[1].duration, 0.4);
    }

    #[test]
    fn pause_splits_before_cap() {
        let words = [
            w("wait", 0.0, 0.3),
            w("what", 1.0, 1.3),
            w("now", 1.3, 1.6),
        ];
        let chunks = chunk_words(&words, policy(5, 0.5), 0);
        let texts: Vec<_> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, ["wait", "what now"]);
    }

    #[test]
    fn title_words_are_skipped() {
        let words = [
            w("my", 0.0, 0.1),
            w("title", 0.1, 0.5),
            w("story", 0.6, 0.9),
            w("starts", 0.9, 1.2),
        ];
        let chunks = chunk_words(&words, policy(2, 0.1), 2);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "story starts");
        assert_close(chunks[0].start, 0.6);
    }

    #[test]
    fn skipping_everything_yields_no_chunks() {
        let words = [w("only", 0.0, 0.4)];
        assert!(chunk_words(&words, policy(2, 0.1), 3).is_empty());
        assert!(chunk_words(&[], policy(2, 0.1), 0).is_empty());
    }

    #[test]
    fn degenerate_durations_are_floored_without_overlap() {
        let words = [
            w("a", 1.0, 1.0),
            w("b", 1.04, 1.05),
            w("c", 2.0, 2.02),
        ];
        let chunks = chunk_words(&words, policy(1, 0.1), 0);
        assert_eq!(chunks.len(), 3);
        // floored to 0.1, then cut back to the next start
        assert_close(chunks[0].duration, 0.04);
        assert_close(chunks[1].duration, 0.1);
        assert_close(chunks[2].duration, 0.1);
        assert!(chunks.iter().all(|c| c.duration > 0.0));
    }

    #[test]
    fn chunks_are_ordered_and_disjoint() {
        let mut words = Vec::new();
        let mut t = 0.0;
        for i in 0..200 {
            let len = 0.01 + (i % 7) as f64 * 0.05;
            let gap = if i % 11 == 0 { 0.3 } else { (i % 3) as f64 * 0.02 };
            words.push(w(&format!("w{i}"), t + gap, t + gap + len));
            t += gap + len;
        }
        for max_words in 1..5 {
            let chunks = chunk_words(&words, policy(max_words, 0.1), 0);
            for pair in chunks.windows(2) {
                assert!(pair[0].start < pair[1].start);
                assert!(pair[0].end() <= pair[1].start + 1e-9);
            }
            assert!(chunks.iter().all(|c| c.duration > 0.0));
            let total: usize = chunks.iter().map(|c| c.text.split(' ').count()).sum();
            assert_eq!(total, words.len());
        }
    }

    #[test]
    fn chunking_is_deterministic() {
        let words = [
            w("one", 0.0, 0.3),
            w("two", 0.3, 0.5),
            w("three", 0.9, 1.4),
        ];
        let a = serde_json::to_string(&chunk_words(&words, policy(2, 0.1), 0)).unwrap();
        let b = serde_json::to_string(&chunk_words(&words, policy(2, 0.1), 0)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn title_duration_uses_nth_word_end() {
        let words = [
            w("am", 0.0, 0.2),
            w("i", 0.2, 0.3),
            w("wrong", 0.3, 0.8),
            w("so", 1.0, 1.2),
        ];
        assert_close(estimate_title_duration(3, &words, 10.0), 0.8);
    }

    #[test]
    fn title_duration_falls_back_to_proportion() {
        let words = [w("a", 0.0, 0.2), w("b", 0.2, 0.4)];
        assert_close(estimate_title_duration(5, &words, 4.0), 10.0);
        // proportional estimate is still floored
        assert_close(estimate_title_duration(5, &words, 0.1), 0.5);
    }

    #[test]
    fn title_duration_defaults_and_floor() {
        assert_close(estimate_title_duration(0, &[w("a", 0.0, 0.2)], 9.0), 3.0);
        assert_close(estimate_title_duration(4, &[], 9.0), 3.0);
        assert_close(estimate_title_duration(1, &[w("a", 0.0, 0.05)], 9.0), 0.5);
    }

    #[test]
    fn srt_times_are_formatted() {
        assert_eq!(format_srt_time(0.0), "00:00:00,000");
        assert_eq!(format_srt_time(3723.4567), "01:02:03,457");
    }

    #[test]
    fn srt_sidecar_lists_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("captions.srt");
        let chunks = [
            CaptionChunk {
                text: "hello there".into(),
                start: 1.0,
                duration: 0.5,
            },
            CaptionChunk {
                text: "friend".into(),
                start: 1.6,
                duration: 0.4,
            },
        ];
        write_srt(&path, &chunks).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "1\n00:00:01,000 --> 00:00:01,500\nhello there\n\n2\n00:00:01,600 --> 00:00:02,000\nfriend\n\n"
        );
    }
}
