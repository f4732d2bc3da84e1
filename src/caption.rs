use std::path::{Path, PathBuf};

use image::{RgbaImage, imageops};

use crate::config::CaptionStyle;
use crate::error::{PipelineError, PipelineResult};
use crate::text::{FontFace, stamp};

/// Single-line outlined caption on a transparent canvas that hugs the text:
/// ink bounds plus `padding + outline_width` on every side.
pub fn draw_caption(text: &str, face: &FontFace, style: &CaptionStyle) -> RgbaImage {
    let run = face.shape(text, style.font_size);
    let margin = (style.padding + style.outline_width) as i32;
    let Some(ink) = run.bounds() else {
        let side = (2 * margin).max(1) as u32;
        return RgbaImage::new(side, side);
    };

    let width = ink.width() + 2 * margin as u32;
    let height = ink.height() + 2 * margin as u32;
    let mut canvas = RgbaImage::new(width, height);

    let dx = margin - ink.min_x;
    let dy = margin - ink.min_y;
    let ow = style.outline_width as i32;
    for ox in -ow..=ow {
        for oy in -ow..=ow {
            if ox == 0 && oy == 0 {
                continue;
            }
            stamp(&mut canvas, &run, dx + ox, dy + oy, style.outline_color);
        }
    }
    stamp(&mut canvas, &run, dx, dy, style.text_color);
    canvas
}

/// The caption centered on a transparent `width` x `height` frame, so every
/// caption of a run shares one size and can play as a single image stream.
pub fn caption_frame(text: &str, face: &FontFace, style: &CaptionStyle, width: u32, height: u32) -> RgbaImage {
    let caption = draw_caption(text, face, style);
    let mut frame = RgbaImage::new(width, height);
    let x = (width as i64 - caption.width() as i64) / 2;
    let y = (height as i64 - caption.height() as i64) / 2;
    imageops::replace(&mut frame, &caption, x, y);
    frame
}

pub fn render_caption(
    text: &str,
    face: &FontFace,
    style: &CaptionStyle,
    (width, height): (u32, u32),
    out: &Path,
) -> PipelineResult<PathBuf> {
    save_frame(&caption_frame(text, face, style, width, height), out)
}

/// Fully transparent frame shown between captions.
pub fn render_blank(width: u32, height: u32, out: &Path) -> PipelineResult<PathBuf> {
    save_frame(&RgbaImage::new(width, height), out)
}

fn save_frame(frame: &RgbaImage, out: &Path) -> PipelineResult<PathBuf> {
    frame
        .save(out)
        .map_err(|e| PipelineError::render(format!("cannot write caption {}: {e}", out.display())))?;
    Ok(out.to_path_buf())
}
