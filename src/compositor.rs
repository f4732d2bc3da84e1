use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, bail};
use tracing::{debug, info, warn};

use crate::align::WordTimestamp;
use crate::artifacts::{TempArtifacts, run_file};
use crate::audio::{self, load_wav, write_wav};
use crate::caption::{render_blank, render_caption};
use crate::config::{CaptionStyle, PipelineConfig, TitleCardStyle};
use crate::error::{PipelineError, PipelineResult};
use crate::subtitle::{CaptionChunk, chunk_words, estimate_title_duration};
use crate::text::FontFace;
use crate::titlecard::render_title_card;

const VIDEO_CODEC: &str = "libx264";
const PRESET: &str = "medium";
const CRF: &str = "23";
const AUDIO_CODEC: &str = "aac";
const AUDIO_BITRATE: &str = "192k";

/// Share of the render phase spent drawing overlays; the rest is encoding.
const OVERLAY_SHARE: f64 = 20.0;

/// Everything one render needs, fixed before rendering starts.
#[derive(Debug, Clone)]
pub struct RenderSpec {
    pub narration: PathBuf,
    pub narration_duration: f64,
    pub background: PathBuf,
    pub music: Option<PathBuf>,
    pub music_volume: f32,
    pub title: String,
    pub title_duration: f64,
    pub captions: Vec<CaptionChunk>,
    pub width: u32,
    pub height: u32,
    pub aspect_ratio: f64,
    pub output: PathBuf,
    pub run_prefix: String,
}

impl RenderSpec {
    /// Derives the caption timeline and the title overlay length from the
    /// aligned words.
    #[allow(clippy::too_many_arguments)]
    pub fn assemble(
        config: &PipelineConfig,
        narration: PathBuf,
        narration_duration: f64,
        title: &str,
        title_word_count: usize,
        words: &[WordTimestamp],
        output: PathBuf,
        run_prefix: &str,
    ) -> Self {
        let title_duration = estimate_title_duration(title_word_count, words, narration_duration);
        let captions = chunk_words(words, config.chunking, title_word_count);
        if captions.is_empty() {
            warn!("No word timestamps remain after skipping the title words");
        }
        Self {
            narration,
            narration_duration,
            background: config.background.clone(),
            music: config.music.clone(),
            music_volume: config.music_volume,
            title: title.to_string(),
            title_duration,
            captions,
            width: config.width,
            height: config.height,
            aspect_ratio: config.aspect_ratio,
            output,
            run_prefix: run_prefix.to_string(),
        }
    }
}

/// Turns a [`RenderSpec`] into a finished video file.
pub trait Renderer {
    fn render(&self, spec: &RenderSpec, progress: &mut dyn FnMut(f64)) -> PipelineResult<PathBuf>;
}

pub struct VideoCompositor {
    title_style: TitleCardStyle,
    caption_style: CaptionStyle,
    title_face: FontFace,
    caption_face: FontFace,
}

impl VideoCompositor {
    /// Resolves both fonts up front. A font that cannot be found degrades to
    /// a fallback and never stops the run.
    pub fn new(config: &PipelineConfig) -> Self {
        let title_face = FontFace::resolve(&config.title.font, &config.fallback_fonts);
        let caption_face = FontFace::resolve(&config.captions.font, &config.fallback_fonts);
        info!(
            "Fonts: title {}, captions {}",
            title_face.source.display(),
            caption_face.source.display()
        );
        Self {
            title_style: config.title.clone(),
            caption_style: config.captions.clone(),
            title_face,
            caption_face,
        }
    }
}

impl Renderer for VideoCompositor {
    fn render(&self, spec: &RenderSpec, progress: &mut dyn FnMut(f64)) -> PipelineResult<PathBuf> {
        if !spec.background.exists() {
            return Err(PipelineError::asset_missing(&spec.background));
        }
        let work_dir = spec
            .output
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&work_dir)
            .map_err(|e| PipelineError::render(format!("cannot create {}: {e}", work_dir.display())))?;
        info!(
            "Rendering {}x{} (aspect {:.4}) for {:.2}s of narration",
            spec.width, spec.height, spec.aspect_ratio, spec.narration_duration
        );
        let mut temps = TempArtifacts::new();
        let file = |name: &str| run_file(&work_dir, &spec.run_prefix, name);
        // a half-written video is removed unless the encode succeeds
        let output = temps.register(spec.output.clone());

        let narration = load_wav(&spec.narration)
            .map_err(|e| PipelineError::render(format!("cannot load narration: {e:#}")))?;
        info!(
            "Narration audio loaded. Duration: {:.2} seconds",
            narration.duration_seconds()
        );
        let music_scratch = temps.register(file("music.wav"));
        let mixed = audio::mix(narration, spec.music.as_deref(), spec.music_volume, &music_scratch);
        let mix_path = temps.register(file("mix.wav"));
        write_wav(&mix_path, &mixed)
            .map_err(|e| PipelineError::render(format!("cannot write mixed audio: {e:#}")))?;
        let duration = mixed.duration_seconds();

        let title_png = temps.register(file("title.png"));
        render_title_card(&self.title_style, &self.title_face, &spec.title, &title_png)?;
        info!("Title card shown for {:.2}s", spec.title_duration);

        let frame = (spec.width, spec.height);
        let blank = render_blank(spec.width, spec.height, &temps.register(file("cap_blank.png")))?;
        let mut cues = Vec::with_capacity(spec.captions.len());
        let total = spec.captions.len().max(1);
        for (i, chunk) in spec.captions.iter().enumerate() {
            let png = temps.register(file(&format!("cap_{i:04}.png")));
            match render_caption(&chunk.text, &self.caption_face, &self.caption_style, frame, &png) {
                Ok(path) => {
                    debug!(
                        "Created caption: '{}' @ {:.2}s (Duration: {:.2}s)",
                        chunk.text, chunk.start, chunk.duration
                    );
                    cues.push(Overlay {
                        image: path,
                        start: chunk.start,
                        end: chunk.end(),
                    });
                }
                Err(e) => warn!("Skipping caption '{}': {}", chunk.text, e),
            }
            progress(OVERLAY_SHARE * (i + 1) as f64 / total as f64);
        }
        let track = CaptionTrack {
            list: temps.register(file("captions.ffconcat")),
            blank,
            cues,
            duration,
        };
        std::fs::write(&track.list, track.concat_script())
            .map_err(|e| PipelineError::render(format!("cannot write caption list: {e}")))?;

        match probe_duration(&spec.background) {
            Ok(bg) if bg > 0.0 && bg < duration => info!(
                "Background is {:.2}s; looping it {} times",
                bg,
                (duration / bg).floor() as u64 + 1
            ),
            Ok(bg) => debug!("Background is {:.2}s", bg),
            Err(e) => warn!("Could not probe background duration: {:#}", e),
        }

        let plan = EncodePlan {
            background: spec.background.clone(),
            title: Overlay {
                image: title_png,
                start: 0.0,
                end: spec.title_duration,
            },
            captions: track.list.clone(),
            audio: mix_path,
            duration,
            width: spec.width,
            height: spec.height,
            output: output.clone(),
        };

        info!("Compositing and writing final video to {}", output.display());
        run_ffmpeg(&plan.ffmpeg_args(), duration, &mut |p| {
            progress(OVERLAY_SHARE + (100.0 - OVERLAY_SHARE) * p / 100.0)
        })
        .map_err(|e| PipelineError::render(format!("{e:#}")))?;

        temps.keep(&output);
        info!("Video created successfully: {}", output.display());
        Ok(output)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Overlay {
    image: PathBuf,
    start: f64,
    end: f64,
}

/// Segments shorter than this are dropped from the caption track.
const MIN_SEGMENT: f64 = 0.001;

/// All captions as one image stream: full-frame PNGs played back to back by
/// the concat demuxer, with a transparent frame filling the gaps. One input
/// regardless of how many captions the story has.
#[derive(Debug, Clone)]
struct CaptionTrack {
    list: PathBuf,
    blank: PathBuf,
    cues: Vec<Overlay>,
    duration: f64,
}

impl CaptionTrack {
    /// Back-to-back (image, seconds) pairs covering `[0, duration]`.
    fn segments(&self) -> Vec<(&Path, f64)> {
        let mut segments = Vec::with_capacity(2 * self.cues.len() + 1);
        let mut cursor = 0.0_f64;
        for cue in &self.cues {
            let start = cue.start.max(cursor);
            if start - cursor > MIN_SEGMENT {
                segments.push((self.blank.as_path(), start - cursor));
                cursor = start;
            }
            if cue.end - cursor > MIN_SEGMENT {
                segments.push((cue.image.as_path(), cue.end - cursor));
                cursor = cue.end;
            }
        }
        segments.push((self.blank.as_path(), (self.duration - cursor).max(MIN_SEGMENT)));
        segments
    }

    /// ffconcat list. Entries are file names relative to the list, which
    /// sits next to the images. The last entry is repeated so the demuxer
    /// honours its duration.
    fn concat_script(&self) -> String {
        let segments = self.segments();
        let mut script = String::from("ffconcat version 1.0\n");
        for (image, seconds) in &segments {
            script.push_str(&format!("file {}\nduration {:.6}\n", concat_quote(image), seconds));
        }
        if let Some((last, _)) = segments.last() {
            script.push_str(&format!("file {}\n", concat_quote(last)));
        }
        script
    }
}

fn concat_quote(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    format!("'{}'", name.replace('\'', "'\\''"))
}

/// Inputs and layer order of the final ffmpeg invocation: background,
/// title card, caption track, mixed audio.
#[derive(Debug, Clone)]
struct EncodePlan {
    background: PathBuf,
    title: Overlay,
    captions: PathBuf,
    audio: PathBuf,
    duration: f64,
    width: u32,
    height: u32,
    output: PathBuf,
}

impl EncodePlan {
    /// Background scaled to the target height, center-cropped to at most the
    /// target width and padded back out to it, so a narrow clip still yields
    /// a `width` x `height` frame. Title then captions go on top.
    fn filter_graph(&self) -> String {
        let (w, h) = (self.width, self.height);
        format!(
            "[0:v]scale=-2:{h},crop=w='min(iw,{w})':h={h},pad={w}:{h}:(ow-iw)/2:0:color=black,setsar=1[bg];\
             [bg][1:v]overlay=x=(W-w)/2:y=(H-h)/2:enable='gte(t,{start:.3})*lt(t,{end:.3})'[titled];\
             [titled][2:v]overlay=x=0:y=0:eof_action=repeat[vout]",
            start = self.title.start,
            end = self.title.end,
        )
    }

    fn ffmpeg_args(&self) -> Vec<String> {
        let mut args: Vec<String> = ["-y", "-loglevel", "error", "-nostats", "-progress", "pipe:1"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        for s in ["-stream_loop", "-1", "-i"] {
            args.push(s.to_string());
        }
        args.push(self.background.display().to_string());
        args.push("-i".into());
        args.push(self.title.image.display().to_string());
        for s in ["-f", "concat", "-safe", "0", "-i"] {
            args.push(s.to_string());
        }
        args.push(self.captions.display().to_string());
        args.push("-i".into());
        args.push(self.audio.display().to_string());

        args.push("-filter_complex".into());
        args.push(self.filter_graph());
        args.push("-map".into());
        args.push("[vout]".into());
        args.push("-map".into());
        args.push("3:a".into());
        args.push("-t".into());
        args.push(format!("{:.3}", self.duration));
        for s in [
            "-c:v", VIDEO_CODEC, "-preset", PRESET, "-crf", CRF, "-pix_fmt", "yuv420p", "-c:a",
            AUDIO_CODEC, "-b:a", AUDIO_BITRATE, "-movflags", "+faststart",
        ] {
            args.push(s.to_string());
        }
        args.push(self.output.display().to_string());
        args
    }
}

/// Runs ffmpeg and reports encode progress in percent of `duration`.
fn run_ffmpeg(args: &[String], duration: f64, progress: &mut dyn FnMut(f64)) -> anyhow::Result<()> {
    debug!("ffmpeg {}", args.join(" "));
    let mut child = Command::new("ffmpeg")
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .context("failed to spawn ffmpeg (is it installed and on PATH?)")?;

    let mut stderr = child.stderr.take().context("ffmpeg stderr unavailable")?;
    let stderr_reader = std::thread::spawn(move || {
        let mut buf = String::new();
        let _ = stderr.read_to_string(&mut buf);
        buf
    });

    if let Some(stdout) = child.stdout.take() {
        for line in BufReader::new(stdout).lines() {
            if let Some(p) = parse_progress_line(&line?, duration) {
                progress(p);
            }
        }
    }

    let status = child.wait()?;
    let stderr = stderr_reader.join().unwrap_or_default();
    if !status.success() {
        bail!(
            "ffmpeg failed to produce final video ({:?}): {}",
            status.code(),
            stderr.trim()
        );
    }
    Ok(())
}

/// Reads one `-progress` key=value line. `out_time_ms` is microseconds
/// despite its name.
fn parse_progress_line(line: &str, duration: f64) -> Option<f64> {
    let (key, value) = line.trim().split_once('=')?;
    match key {
        "out_time_us" | "out_time_ms" if duration > 0.0 => {
            let us: f64 = value.parse().ok()?;
            Some((us / 1_000_000.0 / duration * 100.0).clamp(0.0, 100.0))
        }
        "progress" if value == "end" => Some(100.0),
        _ => None,
    }
}

pub fn probe_duration(path: &Path) -> anyhow::Result<f64> {
    let output = Command::new("ffprobe")
        .args(["-v", "error", "-show_entries", "format=duration", "-of", "json"])
        .arg(path)
        .output()
        .context("failed to run ffprobe")?;
    if !output.status.success() {
        bail!(
            "ffprobe exited with status {:?} while probing {}",
            output.status.code(),
            path.display()
        );
    }
    let value: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    value["format"]["duration"]
        .as_str()
        .and_then(|d| d.parse().ok())
        .with_context(|| format!("ffprobe reported no duration for {}", path.display()))
}
