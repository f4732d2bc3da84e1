use std::path::PathBuf;

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Terminal failures of a pipeline run. Anything that degrades gracefully
/// (missing music, fallback font, title overflow) never becomes one of these.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("no usable story content: {0}")]
    SourceUnavailable(String),

    #[error("narration failed: {0}")]
    NarrationFailed(String),

    #[error("alignment failed: {0}")]
    AlignmentFailed(String),

    #[error("required asset missing: {}", .0.display())]
    AssetMissing(PathBuf),

    #[error("render error: {0}")]
    RenderError(String),

    #[error("a render is already in progress")]
    AlreadyRunning,
}

impl PipelineError {
    pub fn source_unavailable(msg: impl Into<String>) -> Self {
        Self::SourceUnavailable(msg.into())
    }

    pub fn narration(msg: impl Into<String>) -> Self {
        Self::NarrationFailed(msg.into())
    }

    pub fn alignment(msg: impl Into<String>) -> Self {
        Self::AlignmentFailed(msg.into())
    }

    pub fn asset_missing(path: impl Into<PathBuf>) -> Self {
        Self::AssetMissing(path.into())
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::RenderError(msg.into())
    }
}
