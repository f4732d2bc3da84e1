use std::path::PathBuf;

use image::Rgba;

use crate::args::Args;

/// Rectangle on the title template the title text must fit into.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Boundary {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub max_height: u32,
}

#[derive(Debug, Clone)]
pub struct TitleCardStyle {
    pub template: PathBuf,
    pub font: PathBuf,
    pub boundary: Boundary,
    pub max_font_size: u32,
    pub min_font_size: u32,
    pub text_color: Rgba<u8>,
}

#[derive(Debug, Clone)]
pub struct CaptionStyle {
    pub font: PathBuf,
    pub font_size: f32,
    pub text_color: Rgba<u8>,
    pub outline_color: Rgba<u8>,
    pub outline_width: u32,
    pub padding: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkPolicy {
    pub max_words_per_chunk: usize,
    pub min_gap_seconds: f64,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            max_words_per_chunk: 2,
            min_gap_seconds: 0.1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub subreddit: String,
    pub try_posts: usize,
    pub random_pick: bool,
    pub used_posts: PathBuf,
    pub background: PathBuf,
    pub music: Option<PathBuf>,
    pub music_volume: f32,
    pub title: TitleCardStyle,
    pub captions: CaptionStyle,
    pub chunking: ChunkPolicy,
    pub fallback_fonts: Vec<PathBuf>,
    pub output_dir: PathBuf,
    pub piper_model: PathBuf,
    pub chunk_chars: usize,
    pub whisper_model: String,
    pub width: u32,
    pub height: u32,
    pub aspect_ratio: f64,
    pub write_srt: bool,
}

impl PipelineConfig {
    pub fn from_args(args: Args) -> Self {
        let (width, height) = target_dimensions(args.height, args.aspect_ratio);
        let music = Some(args.music)
            .filter(|m| !m.trim().is_empty())
            .map(PathBuf::from);

        Self {
            subreddit: args.subreddit,
            try_posts: args.try_posts,
            random_pick: args.random,
            used_posts: args.used_posts.into(),
            background: args.background.into(),
            music,
            music_volume: args.music_volume,
            title: TitleCardStyle {
                template: args.title_template.into(),
                font: args.title_font.into(),
                boundary: Boundary {
                    x: 150,
                    y: 910,
                    width: 780,
                    max_height: 160,
                },
                max_font_size: 48,
                min_font_size: 36,
                text_color: Rgba([0, 0, 0, 255]),
            },
            captions: CaptionStyle {
                font: args.caption_font.into(),
                font_size: 90.0,
                text_color: Rgba([255, 255, 255, 255]),
                outline_color: Rgba([0, 0, 0, 255]),
                outline_width: 2,
                padding: 20,
            },
            chunking: ChunkPolicy::default(),
            fallback_fonts: args.fallback_fonts.into_iter().map(PathBuf::from).collect(),
            output_dir: args.output_dir.into(),
            piper_model: args.piper_model.into(),
            chunk_chars: args.chunk_chars,
            whisper_model: args.whisper_model,
            width,
            height,
            aspect_ratio: args.aspect_ratio,
            write_srt: args.srt,
        }
    }
}

/// Output frame size for a target height and width:height ratio. Width is
/// kept even so yuv420p encoding accepts it.
pub fn target_dimensions(height: u32, aspect_ratio: f64) -> (u32, u32) {
    let height = height.max(2) & !1;
    let width = ((height as f64 * aspect_ratio).round() as u32).max(2) & !1;
    (width, height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn portrait_dimensions() {
        assert_eq!(target_dimensions(1920, 9.0 / 16.0), (1080, 1920));
        assert_eq!(target_dimensions(1080, 16.0 / 9.0), (1920, 1080));
    }

    #[test]
    fn odd_sizes_are_made_even() {
        let (w, h) = target_dimensions(1001, 1.0);
        assert_eq!(h % 2, 0);
        assert_eq!(w % 2, 0);
    }

    #[test]
    fn empty_music_path_disables_music() {
        let args = Args::parse_from(["storyreel", "--music", ""]);
        let config = PipelineConfig::from_args(args);
        assert!(config.music.is_none());
        assert_eq!((config.width, config.height), (1080, 1920));
        assert_eq!(config.chunking, ChunkPolicy::default());
    }
}
