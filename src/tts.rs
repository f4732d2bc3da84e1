use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::Context;
use tracing::{debug, error, info, warn};

use crate::audio::concat_wavs;
use crate::utils::chunk_text;

/// Speaks prepared narration text into a WAV file.
pub trait Narrator {
    fn narrate(&self, text: &str, out_wav: &Path) -> anyhow::Result<()>;
}

pub struct PiperNarrator {
    pub model: PathBuf,
    pub chunk_chars: usize,
}

impl Narrator for PiperNarrator {
    fn narrate(&self, text: &str, out_wav: &Path) -> anyhow::Result<()> {
        let chunks = chunk_text(text, self.chunk_chars);
        info!("Split narration into {} TTS chunks", chunks.len());

        let parts = PartFiles::for_output(out_wav, chunks.len());
        for (i, (chunk, part)) in chunks.iter().zip(&parts.paths).enumerate() {
            info!(
                "Generating TTS chunk {}/{} ({} chars)",
                i + 1,
                chunks.len(),
                chunk.len()
            );
            debug!("Chunk text: {}", chunk);
            tts_generate_chunk(&self.model, chunk, part)?;
        }
        concat_wavs(&parts.paths, out_wav).context("failed to join narration parts")?;
        Ok(())
    }
}

/// Per-chunk WAVs next to the final narration file, removed on drop.
struct PartFiles {
    paths: Vec<PathBuf>,
}

impl PartFiles {
    fn for_output(out_wav: &Path, count: usize) -> Self {
        let stem = out_wav
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "narration".to_string());
        let dir = out_wav.parent().unwrap_or(Path::new("."));
        let paths = (0..count)
            .map(|i| dir.join(format!("{stem}_part_{i:03}.wav")))
            .collect();
        Self { paths }
    }
}

impl Drop for PartFiles {
    fn drop(&mut self) {
        for p in &self.paths {
            if p.exists() {
                if let Err(e) = std::fs::remove_file(p) {
                    warn!("Failed to remove TTS part {}: {}", p.display(), e);
                }
            }
        }
    }
}

pub fn tts_generate_chunk(model: &Path, text: &str, out_path: &Path) -> anyhow::Result<()> {
    let mut child = Command::new("piper")
        .arg("--model")
        .arg(model)
        .arg("--output_file")
        .arg(out_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .spawn()
        .context("Failed to spawn piper process")?;

    {
        let stdin = child
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Failed to open piper stdin"))?;
        stdin.write_all(text.as_bytes())?;
    }

    let status = child.wait()?;
    if !status.success() {
        error!("Piper TTS command failed for chunk: {}", out_path.display());
        anyhow::bail!("TTS engine failed for chunk, command returned non-zero");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_files_sit_next_to_output_and_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("run_narration.wav");
        let paths = {
            let parts = PartFiles::for_output(&out, 2);
            for p in &parts.paths {
                std::fs::write(p, b"x").unwrap();
            }
            parts.paths.clone()
        };
        assert_eq!(paths[1], dir.path().join("run_narration_part_001.wav"));
        assert!(paths.iter().all(|p| !p.exists()));
    }
}
