mod align;
mod args;
mod artifacts;
mod audio;
mod caption;
mod compositor;
mod config;
mod error;
mod narration;
mod pipeline;
mod reddit;
mod subtitle;
mod text;
mod titlecard;
mod tts;
mod utils;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use crate::align::WhisperAligner;
use crate::args::Args;
use crate::compositor::VideoCompositor;
use crate::config::PipelineConfig;
use crate::pipeline::{Pipeline, ProgressEvent, RunState};
use crate::reddit::RedditSource;
use crate::tts::PiperNarrator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            // RUST_LOG=debug for more logs
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting reddit story video generation pipeline");

    let args = Args::parse();
    let config = PipelineConfig::from_args(args);

    if !config.background.exists() {
        error!("Background video not found: {}", config.background.display());
        std::process::exit(1);
    }
    info!("Background video found: {}", config.background.display());
    info!(
        "Output {}x{} into {}",
        config.width,
        config.height,
        config.output_dir.display()
    );

    let compositor = VideoCompositor::new(&config);
    let source = RedditSource {
        subreddit: config.subreddit.clone(),
        limit: config.try_posts,
        used_posts: config.used_posts.clone(),
        random: config.random_pick,
    };
    let narrator = PiperNarrator {
        model: config.piper_model.clone(),
        chunk_chars: config.chunk_chars,
    };
    let aligner = WhisperAligner::new(config.whisper_model.clone(), config.output_dir.clone());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let reporter = tokio::spawn(async move {
        let mut last_logged = -1i64;
        while let Some(event) = rx.recv().await {
            match event {
                ProgressEvent::PhaseStarted(phase) => debug!("Phase {} started", phase),
                ProgressEvent::PhaseProgress { phase, percent } => {
                    let decile = (percent / 10.0).floor() as i64;
                    if decile > last_logged {
                        last_logged = decile;
                        info!("{}: {:.0}%", phase, percent);
                    }
                }
                ProgressEvent::PhaseCompleted(phase) => info!("Phase {} completed", phase),
            }
        }
    });

    let pipeline = Pipeline::new(config, source, narrator, aligner, compositor).with_progress(tx);
    let state = pipeline.subscribe();
    let _ = pipeline.run().await;
    // dropping the pipeline closes the progress channel
    drop(pipeline);
    reporter.await?;

    let final_state = state.borrow().clone();
    match final_state {
        RunState::Succeeded(path) => {
            info!("Video saved to {}", path.display());
            Ok(())
        }
        RunState::Failed(reason) => {
            error!("Video generation failed: {}", reason);
            std::process::exit(1);
        }
        other => {
            error!("Pipeline stopped in unexpected state {:?}", other);
            std::process::exit(1);
        }
    }
}
