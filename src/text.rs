use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use fontdue::layout::{CoordinateSystem, Layout, LayoutSettings, TextStyle};
use fontdue::{Font, FontSettings};
use image::{Rgba, RgbaImage};
use tracing::{info, warn};

/// Measures text for layout decisions without drawing it.
pub trait TextMeasure {
    /// Ink width of a single line.
    fn line_width(&self, text: &str, size: f32) -> f32;
    /// Distance between consecutive baselines.
    fn line_height(&self, size: f32) -> f32;
}

pub struct FontFace {
    font: Font,
    pub source: PathBuf,
}

/// Font compiled into the binary, used when no configured font loads.
const BUNDLED_FONT: &[u8] = include_bytes!("../assets/fonts/DejaVuSans-Bold.ttf");
const BUNDLED_FONT_NAME: &str = "bundled:DejaVuSans-Bold.ttf";

impl FontFace {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("failed to read font '{}'", path.display()))?;
        Self::from_bytes(&bytes, path.to_path_buf())
    }

    pub fn from_bytes(bytes: &[u8], source: PathBuf) -> anyhow::Result<Self> {
        let font = Font::from_bytes(bytes, FontSettings::default())
            .map_err(|e| anyhow!("failed to parse font {}: {e}", source.display()))?;
        Ok(Self { font, source })
    }

    pub fn bundled() -> Self {
        Self::from_bytes(BUNDLED_FONT, PathBuf::from(BUNDLED_FONT_NAME))
            .expect("bundled font is a valid TTF")
    }

    /// Loads `primary`, else the first loadable entry of `fallbacks`, else
    /// the bundled font. A missing font never stops a render.
    pub fn resolve(primary: &Path, fallbacks: &[PathBuf]) -> Self {
        match Self::load(primary) {
            Ok(face) => return face,
            Err(e) => warn!("Font '{}' unavailable ({:#}); trying fallbacks", primary.display(), e),
        }
        for candidate in fallbacks {
            match Self::load(candidate) {
                Ok(face) => {
                    info!("Using fallback font {}", candidate.display());
                    return face;
                }
                Err(e) => warn!("Fallback font unavailable: {:#}", e),
            }
        }
        warn!(
            "No configured font for '{}' could be loaded; using the bundled font",
            primary.display()
        );
        Self::bundled()
    }

    /// Lays out one line with its top-left at the origin and rasterizes
    /// every visible glyph.
    pub fn shape(&self, text: &str, size: f32) -> GlyphRun {
        let mut layout = Layout::new(CoordinateSystem::PositiveYDown);
        layout.reset(&LayoutSettings {
            x: 0.0,
            y: 0.0,
            ..LayoutSettings::default()
        });
        layout.append(&[&self.font], &TextStyle::new(text, size, 0));

        let glyphs = layout
            .glyphs()
            .iter()
            .filter(|g| g.width > 0 && g.height > 0)
            .map(|g| {
                let (_, coverage) = self.font.rasterize_config(g.key);
                PlacedGlyph {
                    x: g.x.round() as i32,
                    y: g.y.round() as i32,
                    width: g.width,
                    height: g.height,
                    coverage,
                }
            })
            .collect();
        GlyphRun { glyphs }
    }
}

impl TextMeasure for FontFace {
    fn line_width(&self, text: &str, size: f32) -> f32 {
        self.shape(text, size)
            .bounds()
            .map(|b| b.width() as f32)
            .unwrap_or(0.0)
    }

    fn line_height(&self, size: f32) -> f32 {
        self.font
            .horizontal_line_metrics(size)
            .map(|m| m.new_line_size)
            .unwrap_or(size * 1.2)
    }
}

#[derive(Debug, Clone)]
pub struct PlacedGlyph {
    pub x: i32,
    pub y: i32,
    pub width: usize,
    pub height: usize,
    pub coverage: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InkBounds {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

impl InkBounds {
    pub fn width(&self) -> u32 {
        (self.max_x - self.min_x).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.max_y - self.min_y).max(0) as u32
    }
}

/// A rasterized line of text in its own coordinate space.
#[derive(Debug, Clone, Default)]
pub struct GlyphRun {
    pub glyphs: Vec<PlacedGlyph>,
}

impl GlyphRun {
    /// Tight box around the inked pixels, `None` for blank text.
    pub fn bounds(&self) -> Option<InkBounds> {
        self.glyphs.iter().fold(None, |acc, g| {
            let b = InkBounds {
                min_x: g.x,
                min_y: g.y,
                max_x: g.x + g.width as i32,
                max_y: g.y + g.height as i32,
            };
            Some(match acc {
                None => b,
                Some(a) => InkBounds {
                    min_x: a.min_x.min(b.min_x),
                    min_y: a.min_y.min(b.min_y),
                    max_x: a.max_x.max(b.max_x),
                    max_y: a.max_y.max(b.max_y),
                },
            })
        })
    }
}

/// Alpha-blends `run` onto the canvas, shifted by (`dx`, `dy`). Pixels
/// outside the canvas are clipped.
pub fn stamp(canvas: &mut RgbaImage, run: &GlyphRun, dx: i32, dy: i32, color: Rgba<u8>) {
    let (cw, ch) = (canvas.width() as i32, canvas.height() as i32);
    for g in &run.glyphs {
        for row in 0..g.height {
            let y = g.y + dy + row as i32;
            if y < 0 || y >= ch {
                continue;
            }
            for col in 0..g.width {
                let x = g.x + dx + col as i32;
                if x < 0 || x >= cw {
                    continue;
                }
                let cov = g.coverage[row * g.width + col];
                if cov == 0 {
                    continue;
                }
                blend(canvas.get_pixel_mut(x as u32, y as u32), color, cov);
            }
        }
    }
}

/// Source-over compositing with non-premultiplied alpha.
fn blend(dst: &mut Rgba<u8>, src: Rgba<u8>, coverage: u8) {
    let sa = (src[3] as f32 / 255.0) * (coverage as f32 / 255.0);
    if sa <= 0.0 {
        return;
    }
    let da = dst[3] as f32 / 255.0;
    let oa = sa + da * (1.0 - sa);
    for c in 0..3 {
        let v = (src[c] as f32 * sa + dst[c] as f32 * da * (1.0 - sa)) / oa;
        dst[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    dst[3] = (oa * 255.0).round().clamp(0.0, 255.0) as u8;
}
