use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{Context, bail};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use tracing::{info, warn};

/// Decoded PCM, interleaved, normalized to [-1.0, 1.0].
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrack {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl AudioTrack {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration_seconds(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Repeats whole copies of the track until it covers `frames`, then cuts
    /// it to exactly that length. Longer tracks are only cut.
    pub fn looped_to(&self, frames: usize) -> AudioTrack {
        let own = self.frames();
        let channels = self.channels as usize;
        let mut samples = Vec::with_capacity(frames * channels);
        if own > 0 {
            if own < frames {
                let loops = frames / own + 1;
                info!("Looping music {} times", loops);
                for _ in 0..loops {
                    samples.extend_from_slice(&self.samples);
                }
            } else {
                samples.extend_from_slice(&self.samples);
            }
        }
        samples.resize(frames * channels, 0.0);
        AudioTrack {
            sample_rate: self.sample_rate,
            channels: self.channels,
            samples,
        }
    }
}

pub fn wav_duration_seconds(path: &Path) -> anyhow::Result<f64> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    let samples = reader.len();
    let frames = samples as f64 / spec.channels as f64;
    let duration = frames / spec.sample_rate as f64;
    Ok(duration)
}

pub fn load_wav(path: &Path) -> anyhow::Result<AudioTrack> {
    let mut reader = WavReader::open(path)
        .with_context(|| format!("failed to open wav '{}'", path.display()))?;
    let spec = reader.spec();
    let samples = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<Vec<_>, _>>()?,
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<Vec<_>, _>>()?
        }
    };
    Ok(AudioTrack {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        samples,
    })
}

/// Writes 16-bit PCM. Samples outside [-1.0, 1.0] saturate.
pub fn write_wav(path: &Path, track: &AudioTrack) -> anyhow::Result<()> {
    let spec = WavSpec {
        channels: track.channels,
        sample_rate: track.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)
        .with_context(|| format!("failed to create wav '{}'", path.display()))?;
    for s in &track.samples {
        let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
        writer.write_sample(v)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Joins WAV parts that share one format into a single file.
pub fn concat_wavs(parts: &[impl AsRef<Path>], out: &Path) -> anyhow::Result<()> {
    let Some(first) = parts.first() else {
        bail!("no wav parts to concatenate");
    };
    let spec = WavReader::open(first.as_ref())?.spec();
    let mut writer = WavWriter::create(out, spec)?;
    for part in parts {
        let mut reader = WavReader::open(part.as_ref())?;
        if reader.spec() != spec {
            bail!(
                "wav part '{}' has format {:?}, expected {:?}",
                part.as_ref().display(),
                reader.spec(),
                spec
            );
        }
        match spec.sample_format {
            SampleFormat::Float => {
                for s in reader.samples::<f32>() {
                    writer.write_sample(s?)?;
                }
            }
            SampleFormat::Int => {
                for s in reader.samples::<i32>() {
                    writer.write_sample(s?)?;
                }
            }
        }
    }
    writer.finalize()?;
    Ok(())
}

/// Decodes any ffmpeg-readable audio into a WAV with the given rate and
/// channel count.
pub fn decode_to_wav(input: &Path, out: &Path, sample_rate: u32, channels: u16) -> anyhow::Result<()> {
    let output = Command::new("ffmpeg")
        .args(["-y", "-loglevel", "error", "-i"])
        .arg(input)
        .args([
            "-vn",
            "-ar",
            sample_rate.to_string().as_str(),
            "-ac",
            channels.to_string().as_str(),
            "-c:a",
            "pcm_s16le",
        ])
        .arg(out)
        .stdin(Stdio::null())
        .output()
        .context("failed to spawn ffmpeg for audio decode")?;
    if !output.status.success() {
        bail!(
            "ffmpeg could not decode '{}': {}",
            input.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

/// Loads music in the narration's format. WAV files already matching it are
/// read directly; anything else goes through ffmpeg.
fn load_music_like(music: &Path, narration: &AudioTrack, scratch: &Path) -> anyhow::Result<AudioTrack> {
    if let Ok(reader) = WavReader::open(music) {
        let spec = reader.spec();
        if spec.sample_rate == narration.sample_rate && spec.channels == narration.channels {
            drop(reader);
            return load_wav(music);
        }
    }
    decode_to_wav(music, scratch, narration.sample_rate, narration.channels)?;
    let track = load_wav(scratch);
    if let Err(e) = std::fs::remove_file(scratch) {
        warn!("Could not remove decoded music '{}': {}", scratch.display(), e);
    }
    track
}

/// Narration plus optional background music. The result is always exactly
/// as long as the narration.
///
/// A missing or unreadable music file is not an error: the narration is
/// returned untouched.
pub fn mix(
    narration: AudioTrack,
    music: Option<&Path>,
    music_volume: f32,
    scratch: &Path,
) -> AudioTrack {
    let Some(music_path) = music else {
        info!("No background music path provided. Skipping music.");
        return narration;
    };
    if !music_path.exists() {
        warn!(
            "Background music file not found at '{}'. Skipping music.",
            music_path.display()
        );
        return narration;
    }
    let music = match load_music_like(music_path, &narration, scratch) {
        Ok(track) => track,
        Err(e) => {
            warn!("Could not load background music, skipping it: {:#}", e);
            return narration;
        }
    };
    info!(
        "Music loaded: {:.2}s, volume {:.0}%",
        music.duration_seconds(),
        music_volume * 100.0
    );
    mix_tracks(narration, &music, music_volume)
}

/// Sums `music * volume` onto the narration after looping/trimming the music
/// to the narration length. Both tracks must share rate and channel count.
pub fn mix_tracks(narration: AudioTrack, music: &AudioTrack, music_volume: f32) -> AudioTrack {
    let bed = music.looped_to(narration.frames());
    let samples = narration
        .samples
        .iter()
        .zip(bed.samples.iter())
        .map(|(n, m)| n + m * music_volume)
        .collect();
    AudioTrack {
        sample_rate: narration.sample_rate,
        channels: narration.channels,
        samples,
    }
}
