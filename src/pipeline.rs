use std::fmt;
use std::fs;
use std::path::PathBuf;

use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::align::Aligner;
use crate::artifacts::{TempArtifacts, run_file, run_prefix};
use crate::audio::wav_duration_seconds;
use crate::compositor::{RenderSpec, Renderer};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::narration::{prepare_narration, spoken_word_count};
use crate::reddit::StorySource;
use crate::subtitle::write_srt;
use crate::tts::Narrator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Fetch,
    Narrate,
    Align,
    Render,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Fetch => "fetch",
            Phase::Narrate => "narrate",
            Phase::Align => "align",
            Phase::Render => "render",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    PhaseStarted(Phase),
    PhaseProgress { phase: Phase, percent: f64 },
    PhaseCompleted(Phase),
}

/// Lifecycle of the pipeline as seen by observers. Only the pipeline writes it.
#[derive(Debug, Clone, PartialEq)]
pub enum RunState {
    Idle,
    Running(Phase),
    Succeeded(PathBuf),
    Failed(String),
}

/// Fetch → narrate → align → render, each attempted once.
pub struct Pipeline<S, N, A, R> {
    config: PipelineConfig,
    source: S,
    narrator: N,
    aligner: A,
    renderer: R,
    events: Option<mpsc::UnboundedSender<ProgressEvent>>,
    state: watch::Sender<RunState>,
}

impl<S, N, A, R> Pipeline<S, N, A, R>
where
    S: StorySource,
    N: Narrator,
    A: Aligner,
    R: Renderer,
{
    pub fn new(config: PipelineConfig, source: S, narrator: N, aligner: A, renderer: R) -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        Self {
            config,
            source,
            narrator,
            aligner,
            renderer,
            events: None,
            state,
        }
    }

    pub fn with_progress(mut self, events: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    /// Runs the whole pipeline once. Rejected with `AlreadyRunning` if a run
    /// on this pipeline is still in flight.
    pub async fn run(&self) -> PipelineResult<PathBuf> {
        let started = self.state.send_if_modified(|state| {
            if matches!(state, RunState::Running(_)) {
                return false;
            }
            *state = RunState::Running(Phase::Fetch);
            true
        });
        if !started {
            warn!("Video generation is already in progress; rejecting new run");
            return Err(PipelineError::AlreadyRunning);
        }

        info!("--- Starting video generation pipeline ---");
        let result = self.execute().await;
        match &result {
            Ok(path) => {
                info!("--- Pipeline finished: {} ---", path.display());
                self.state.send_replace(RunState::Succeeded(path.clone()));
            }
            Err(e) => {
                error!("Pipeline failed: {}", e);
                self.state.send_replace(RunState::Failed(e.to_string()));
            }
        }
        result
    }

    async fn execute(&self) -> PipelineResult<PathBuf> {
        let config = &self.config;
        let prefix = run_prefix(&config.subreddit);
        // narration audio lives only as long as this run
        let mut temps = TempArtifacts::new();

        self.begin(Phase::Fetch);
        info!("Fetching story from r/{}", config.subreddit);
        let story = self
            .source
            .fetch_story()
            .await
            .map_err(|e| PipelineError::source_unavailable(format!("{e:#}")))?;
        info!("Successfully fetched story: '{}' ({})", story.title, story.url);
        self.complete(Phase::Fetch);

        self.begin(Phase::Narrate);
        let text = prepare_narration(&story.title, &story.body);
        info!("Text prepared for narration. Length: {}", text.len());
        fs::create_dir_all(&config.output_dir).map_err(|e| {
            PipelineError::narration(format!(
                "cannot create output dir {}: {e}",
                config.output_dir.display()
            ))
        })?;
        let audio = temps.register(run_file(&config.output_dir, &prefix, "narration.wav"));
        self.narrator
            .narrate(&text, &audio)
            .map_err(|e| PipelineError::narration(format!("{e:#}")))?;
        if !audio.exists() {
            return Err(PipelineError::narration("TTS produced no audio file"));
        }
        info!("Narration saved to: {}", audio.display());
        self.complete(Phase::Narrate);

        self.begin(Phase::Align);
        let words = self
            .aligner
            .align(&audio)
            .map_err(|e| PipelineError::alignment(format!("{e:#}")))?;
        if words.is_empty() {
            return Err(PipelineError::alignment("no word timestamps for narration"));
        }
        info!("Successfully obtained {} word timestamps", words.len());
        self.complete(Phase::Align);

        self.begin(Phase::Render);
        let narration_duration = wav_duration_seconds(&audio)
            .map_err(|e| PipelineError::render(format!("cannot read narration: {e:#}")))?;
        let output = run_file(&config.output_dir, &prefix, "final.mp4");
        let spec = RenderSpec::assemble(
            config,
            audio.clone(),
            narration_duration,
            &story.title,
            spoken_word_count(&story.title),
            &words,
            output,
            &prefix,
        );
        info!(
            "Timeline: title {:.2}s, {} captions",
            spec.title_duration,
            spec.captions.len()
        );
        if config.write_srt {
            let srt = spec.output.with_extension("srt");
            match write_srt(&srt, &spec.captions) {
                Ok(()) => info!("Captions written to {}", srt.display()),
                Err(e) => warn!("Could not write caption sidecar {}: {:#}", srt.display(), e),
            }
        }
        let path = self.renderer.render(&spec, &mut |percent| {
            self.emit(ProgressEvent::PhaseProgress {
                phase: Phase::Render,
                percent,
            })
        })?;
        self.complete(Phase::Render);
        Ok(path)
    }

    fn begin(&self, phase: Phase) {
        info!("Step {}: starting", phase);
        self.state.send_replace(RunState::Running(phase));
        self.emit(ProgressEvent::PhaseStarted(phase));
    }

    fn complete(&self, phase: Phase) {
        self.emit(ProgressEvent::PhaseCompleted(phase));
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.events {
            // observers may have gone away; the run carries on regardless
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::WordTimestamp;
    use crate::args::Args;
    use crate::audio::{AudioTrack, write_wav};
    use crate::reddit::StoryPost;
    use clap::Parser;
    use std::path::Path;
    use std::sync::Mutex;

    struct FakeSource(Option<StoryPost>);

    impl StorySource for FakeSource {
        async fn fetch_story(&self) -> anyhow::Result<StoryPost> {
            tokio::task::yield_now().await;
            self.0.clone().ok_or_else(|| anyhow::anyhow!("no posts"))
        }
    }

    enum FakeNarrator {
        Speaks,
        CrashesMidway,
    }

    impl Narrator for FakeNarrator {
        fn narrate(&self, _text: &str, out_wav: &Path) -> anyhow::Result<()> {
            match self {
                FakeNarrator::Speaks => write_wav(
                    out_wav,
                    &AudioTrack {
                        sample_rate: 8000,
                        channels: 1,
                        samples: vec![0.1; 16000],
                    },
                ),
                FakeNarrator::CrashesMidway => {
                    std::fs::write(out_wav, b"RIFF")?;
                    anyhow::bail!("voice crashed")
                }
            }
        }
    }

    struct FakeAligner(Vec<WordTimestamp>);

    impl Aligner for FakeAligner {
        fn align(&self, audio: &Path) -> anyhow::Result<Vec<WordTimestamp>> {
            assert!(audio.exists());
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct FakeRenderer {
        seen: Mutex<Option<RenderSpec>>,
    }

    impl Renderer for FakeRenderer {
        fn render(&self, spec: &RenderSpec, progress: &mut dyn FnMut(f64)) -> PipelineResult<PathBuf> {
            progress(50.0);
            std::fs::write(&spec.output, b"mp4").map_err(|e| PipelineError::render(e.to_string()))?;
            *self.seen.lock().unwrap() = Some(spec.clone());
            Ok(spec.output.clone())
        }
    }

    fn story() -> StoryPost {
        StoryPost {
            id: "abc".into(),
            title: "AITA?".into(),
            body: "I said no.".into(),
            url: "https://www.reddit.com/r/x/abc".into(),
        }
    }

    fn words() -> Vec<WordTimestamp> {
        ["Am", "I", "the", "asshole?", "I", "said", "no."]
            .iter()
            .enumerate()
            .map(|(i, w)| WordTimestamp {
                word: w.to_string(),
                start: i as f64 * 0.25,
                end: i as f64 * 0.25 + 0.2,
            })
            .collect()
    }

    fn config(dir: &Path, srt: bool) -> PipelineConfig {
        let out = dir.to_string_lossy().into_owned();
        let mut argv = vec!["storyreel", "--output-dir", out.as_str()];
        if srt {
            argv.push("--srt");
        }
        PipelineConfig::from_args(Args::parse_from(argv))
    }

    fn files_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .map(|rd| {
                rd.filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    #[tokio::test]
    async fn successful_run_reports_phases_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let pipeline = Pipeline::new(
            config(dir.path(), true),
            FakeSource(Some(story())),
            FakeNarrator::Speaks,
            FakeAligner(words()),
            FakeRenderer::default(),
        )
        .with_progress(tx);
        let state = pipeline.subscribe();

        let path = pipeline.run().await.unwrap();
        assert!(path.exists());
        assert_eq!(*state.borrow(), RunState::Succeeded(path.clone()));

        let files = files_in(dir.path());
        assert_eq!(files.len(), 2, "{files:?}");
        assert!(files.iter().any(|f| f.ends_with("_final.mp4")));
        assert!(files.iter().any(|f| f.ends_with("_final.srt")));

        let spec = pipeline.renderer.seen.lock().unwrap().clone().unwrap();
        assert!((spec.title_duration - 0.95).abs() < 1e-9);
        let texts: Vec<_> = spec.captions.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, ["I said", "no."]);
        assert!((spec.narration_duration - 2.0).abs() < 1e-9);

        drop(pipeline);
        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        assert_eq!(events.first(), Some(&ProgressEvent::PhaseStarted(Phase::Fetch)));
        assert_eq!(events.last(), Some(&ProgressEvent::PhaseCompleted(Phase::Render)));
        assert!(events.contains(&ProgressEvent::PhaseProgress {
            phase: Phase::Render,
            percent: 50.0
        }));
        let started: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::PhaseStarted(p) => Some(*p),
                _ => None,
            })
            .collect();
        assert_eq!(started, [Phase::Fetch, Phase::Narrate, Phase::Align, Phase::Render]);
    }

    #[tokio::test]
    async fn missing_story_fails_without_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let pipeline = Pipeline::new(
            config(&out, false),
            FakeSource(None),
            FakeNarrator::Speaks,
            FakeAligner(words()),
            FakeRenderer::default(),
        );
        let state = pipeline.subscribe();
        let err = pipeline.run().await.unwrap_err();
        assert!(matches!(err, PipelineError::SourceUnavailable(_)));
        assert!(matches!(&*state.borrow(), RunState::Failed(_)));
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn narration_failure_removes_partial_audio() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(
            config(dir.path(), false),
            FakeSource(Some(story())),
            FakeNarrator::CrashesMidway,
            FakeAligner(words()),
            FakeRenderer::default(),
        );
        let err = pipeline.run().await.unwrap_err();
        assert!(matches!(err, PipelineError::NarrationFailed(_)));
        assert!(files_in(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn empty_alignment_fails_and_removes_audio() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(
            config(dir.path(), false),
            FakeSource(Some(story())),
            FakeNarrator::Speaks,
            FakeAligner(vec![]),
            FakeRenderer::default(),
        );
        let err = pipeline.run().await.unwrap_err();
        assert!(matches!(err, PipelineError::AlignmentFailed(_)));
        assert!(files_in(dir.path()).is_empty());
        assert!(pipeline.renderer.seen.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn second_run_is_rejected_while_busy() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(
            config(dir.path(), false),
            FakeSource(Some(story())),
            FakeNarrator::Speaks,
            FakeAligner(words()),
            FakeRenderer::default(),
        );
        let (first, second) = tokio::join!(pipeline.run(), pipeline.run());
        assert!(first.is_ok());
        assert!(matches!(second, Err(PipelineError::AlreadyRunning)));

        // once finished, the pipeline accepts new runs
        assert!(pipeline.run().await.is_ok());
    }

    #[test]
    fn phases_display_lowercase() {
        assert_eq!(Phase::Render.to_string(), "render");
    }
}
