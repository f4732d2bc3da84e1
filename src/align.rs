use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Smallest span a word may occupy after repair.
const MIN_WORD_SPAN: f64 = 0.01;

/// A spoken word and where it sits in the narration, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTimestamp {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

/// Maps narration audio to per-word timestamps.
pub trait Aligner {
    fn align(&self, audio: &Path) -> anyhow::Result<Vec<WordTimestamp>>;
}

/// Runs the `whisper` CLI with word timestamps enabled and reads its JSON.
pub struct WhisperAligner {
    pub model: String,
    pub work_dir: PathBuf,
}

impl WhisperAligner {
    pub fn new(model: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            model: model.into(),
            work_dir: work_dir.into(),
        }
    }
}

impl Aligner for WhisperAligner {
    fn align(&self, audio: &Path) -> anyhow::Result<Vec<WordTimestamp>> {
        info!("Running whisper ({}) on {}", self.model, audio.display());
        fs::create_dir_all(&self.work_dir)?;
        let output = Command::new("whisper")
            .arg(audio)
            .args([
                "--model",
                self.model.as_str(),
                "--word_timestamps",
                "True",
                "--output_format",
                "json",
                "--output_dir",
            ])
            .arg(&self.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .context("failed to spawn whisper")?;
        if !output.status.success() {
            bail!(
                "whisper exited with {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let stem = audio
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid audio filename"))?;
        let json_path = self.work_dir.join(format!("{stem}.json"));
        let raw = fs::read_to_string(&json_path)
            .with_context(|| format!("whisper wrote no output at {}", json_path.display()))?;
        let words = parse_whisper_json(&raw);
        if let Err(e) = fs::remove_file(&json_path) {
            warn!("Could not remove whisper output {}: {}", json_path.display(), e);
        }
        words
    }
}

#[derive(Debug, Deserialize)]
struct WhisperOutput {
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    #[serde(default)]
    words: Vec<WordTimestamp>,
}

pub fn parse_whisper_json(raw: &str) -> anyhow::Result<Vec<WordTimestamp>> {
    let parsed: WhisperOutput =
        serde_json::from_str(raw).context("whisper output is not valid JSON")?;
    let words = parsed.segments.into_iter().flat_map(|s| s.words).collect();
    Ok(normalize_timestamps(words))
}

/// Trims words, drops empty ones, orders by start and makes every word span
/// forward in time without overlapping the previous one.
pub fn normalize_timestamps(words: Vec<WordTimestamp>) -> Vec<WordTimestamp> {
    let mut words: Vec<WordTimestamp> = words
        .into_iter()
        .filter_map(|w| {
            let word = w.word.trim();
            if word.is_empty() || !w.start.is_finite() || !w.end.is_finite() {
                return None;
            }
            Some(WordTimestamp {
                word: word.to_string(),
                start: w.start.max(0.0),
                end: w.end,
            })
        })
        .collect();
    words.sort_by(|a, b| a.start.total_cmp(&b.start));

    let mut prev_end = 0.0_f64;
    for w in &mut words {
        if w.start < prev_end {
            w.start = prev_end;
        }
        if w.end <= w.start {
            debug!("Repairing zero-length word '{}' at {:.2}s", w.word, w.start);
            w.end = w.start + MIN_WORD_SPAN;
        }
        prev_end = w.end;
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_words_across_segments() {
        let raw = r#"{
            "text": " Hello there. General.",
            "segments": [
                {"id": 0, "words": [
                    {"word": " Hello", "start": 0.0, "end": 0.4, "probability": 0.9},
                    {"word": " there.", "start": 0.4, "end": 0.8, "probability": 0.9}
                ]},
                {"id": 1, "words": [
                    {"word": " General.", "start": 1.2, "end": 1.9, "probability": 0.8}
                ]}
            ]
        }"#;
        let words = parse_whisper_json(raw).unwrap();
        let texts: Vec<_> = words.iter().map(|w| w.word.as_str()).collect();
        assert_eq!(texts, ["Hello", "there.", "General."]);
        assert_eq!(words[2].start, 1.2);
    }

    #[test]
    fn segments_without_words_are_tolerated() {
        let words = parse_whisper_json(r#"{"segments": [{"id": 0}]}"#).unwrap();
        assert!(words.is_empty());
        assert!(parse_whisper_json("not json").is_err());
    }

    #[test]
    fn normalization_repairs_spans() {
        let words = normalize_timestamps(vec![
            WordTimestamp { word: "b".into(), start: 1.0, end: 1.0 },
            WordTimestamp { word: "a".into(), start: 0.0, end: 1.2 },
            WordTimestamp { word: "  ".into(), start: 2.0, end: 2.5 },
        ]);
        assert_eq!(words.len(), 2);
        assert_eq!(words[0].word, "a");
        assert_eq!(words[1].start, 1.2);
        assert!(words[1].end > words[1].start);
    }
}
