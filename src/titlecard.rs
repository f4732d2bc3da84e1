use std::path::{Path, PathBuf};

use image::RgbaImage;
use tracing::{debug, info, warn};

use crate::config::{Boundary, TitleCardStyle};
use crate::error::{PipelineError, PipelineResult};
use crate::text::{FontFace, TextMeasure, stamp};
use crate::utils::wrap_text;

const FONT_SIZE_STEP: usize = 2;
/// Empirical average glyph width is `font_size / AVG_CHAR_DIVISOR`.
const AVG_CHAR_DIVISOR: f32 = 1.7;
const FALLBACK_WRAP_CHARS: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct TitleLayout {
    pub font_size: u32,
    pub lines: Vec<String>,
    pub width: f32,
    pub height: f32,
    /// False when even the minimum size overflows the boundary height.
    pub fits: bool,
}

/// Candidate sizes from largest to smallest; the minimum is always last.
fn candidate_sizes(max_font_size: u32, min_font_size: u32) -> Vec<u32> {
    let max = max_font_size.max(min_font_size);
    let mut sizes: Vec<u32> = (min_font_size..=max).rev().step_by(FONT_SIZE_STEP).collect();
    if sizes.last() != Some(&min_font_size) {
        sizes.push(min_font_size);
    }
    sizes
}

fn wrap_chars(boundary_width: u32, font_size: u32) -> usize {
    let avg = font_size as f32 / AVG_CHAR_DIVISOR;
    if avg <= 0.0 {
        return FALLBACK_WRAP_CHARS;
    }
    match (boundary_width as f32 / avg).floor() as usize {
        0 => FALLBACK_WRAP_CHARS,
        n => n,
    }
}

fn layout_at(title: &str, boundary: Boundary, size: u32, measure: &impl TextMeasure) -> TitleLayout {
    let lines = wrap_text(title, wrap_chars(boundary.width, size));
    let width = lines
        .iter()
        .map(|l| measure.line_width(l, size as f32))
        .fold(0.0, f32::max);
    let height = lines.len() as f32 * measure.line_height(size as f32);
    TitleLayout {
        font_size: size,
        lines,
        width,
        height,
        fits: height <= boundary.max_height as f32,
    }
}

/// Picks the largest font size whose wrapped title fits the boundary height.
/// Falls back to the minimum size when nothing fits.
pub fn fit_title(
    title: &str,
    boundary: Boundary,
    max_font_size: u32,
    min_font_size: u32,
    measure: &impl TextMeasure,
) -> TitleLayout {
    let mut last = None;
    for size in candidate_sizes(max_font_size, min_font_size) {
        let layout = layout_at(title, boundary, size, measure);
        if layout.fits {
            debug!("Title fits at font size {} ({} lines)", size, layout.lines.len());
            return layout;
        }
        last = Some(layout);
    }
    let layout = last.unwrap_or_else(|| layout_at(title, boundary, min_font_size, measure));
    warn!(
        "Title overflows its boundary even at min font size {}; using it anyway",
        min_font_size
    );
    layout
}

/// Draws the title onto a copy of the template, centered in the boundary,
/// and writes it as PNG to `out`.
pub fn render_title_card(
    style: &TitleCardStyle,
    face: &FontFace,
    title: &str,
    out: &Path,
) -> PipelineResult<PathBuf> {
    if !style.template.exists() {
        return Err(PipelineError::asset_missing(&style.template));
    }
    let mut canvas = image::open(&style.template)
        .map_err(|e| {
            PipelineError::render(format!(
                "cannot read title template {}: {e}",
                style.template.display()
            ))
        })?
        .to_rgba8();

    let layout = fit_title(
        title,
        style.boundary,
        style.max_font_size,
        style.min_font_size,
        face,
    );
    draw_layout(&mut canvas, face, &layout, style);

    canvas
        .save(out)
        .map_err(|e| PipelineError::render(format!("cannot write title card {}: {e}", out.display())))?;
    info!(
        "Title card saved to {} (font size {})",
        out.display(),
        layout.font_size
    );
    Ok(out.to_path_buf())
}

fn draw_layout(canvas: &mut RgbaImage, face: &FontFace, layout: &TitleLayout, style: &TitleCardStyle) {
    let b = style.boundary;
    let size = layout.font_size as f32;
    let line_height = face.line_height(size);
    let top = b.y as f32 + (b.max_height as f32 - layout.height) / 2.0;

    for (i, line) in layout.lines.iter().enumerate() {
        let run = face.shape(line, size);
        let Some(ink) = run.bounds() else {
            continue;
        };
        let x = b.x as f32 + (b.width as f32 - ink.width() as f32) / 2.0 - ink.min_x as f32;
        let y = top + i as f32 * line_height;
        stamp(canvas, &run, x.round() as i32, y.round() as i32, style.text_color);
    }
}
