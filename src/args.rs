use clap::Parser;

#[derive(Parser, Debug)]
#[clap(about = "Turn a reddit story into a narrated, captioned short video")]
pub struct Args {
    #[clap(long, default_value = "AmItheAsshole")]
    pub subreddit: String,

    #[clap(long, default_value = "./assets/background.mp4")]
    pub background: String,

    /// Optional background music; a missing file only disables music.
    #[clap(long, default_value = "./assets/background_music.mp3")]
    pub music: String,

    #[clap(long, default_value_t = 0.15)]
    pub music_volume: f32,

    #[clap(long, default_value = "./assets/title_template.png")]
    pub title_template: String,

    #[clap(long, default_value = "./assets/Inter-Bold.ttf")]
    pub title_font: String,

    #[clap(long, default_value = "./assets/Montserrat-Black.ttf")]
    pub caption_font: String,

    /// Tried in order when a requested font cannot be loaded. The font built
    /// into the binary is the last resort.
    #[clap(long = "fallback-font", default_values = ["./assets/fonts/DejaVuSans-Bold.ttf"])]
    pub fallback_fonts: Vec<String>,

    #[clap(long, default_value = "./output")]
    pub output_dir: String,

    #[clap(long, default_value = "./used_posts.json")]
    pub used_posts: String,

    #[clap(long, default_value = "./tts/en_US-hfc_male-medium.onnx")]
    pub piper_model: String,

    #[clap(long, default_value = "tiny.en")]
    pub whisper_model: String,

    #[clap(long, default_value_t = 25)]
    pub try_posts: usize,

    /// Pick a random eligible post instead of the first one in the listing.
    #[clap(long)]
    pub random: bool,

    #[clap(long, default_value_t = 250)]
    pub chunk_chars: usize,

    #[clap(long, default_value_t = 1920)]
    pub height: u32,

    /// Width:height of the output, e.g. 9:16.
    #[clap(long, default_value = "9:16", value_parser = parse_aspect_ratio)]
    pub aspect_ratio: f64,

    /// Also write the caption timeline as an .srt next to the video.
    #[clap(long)]
    pub srt: bool,
}

fn parse_aspect_ratio(raw: &str) -> Result<f64, String> {
    let parsed = match raw.split_once(':') {
        Some((w, h)) => {
            let w: f64 = w.trim().parse().map_err(|_| format!("bad width in '{raw}'"))?;
            let h: f64 = h.trim().parse().map_err(|_| format!("bad height in '{raw}'"))?;
            if h == 0.0 {
                return Err(format!("zero height in '{raw}'"));
            }
            w / h
        }
        None => raw
            .trim()
            .parse()
            .map_err(|_| format!("expected W:H or a number, got '{raw}'"))?,
    };
    if !(parsed.is_finite() && parsed > 0.0) {
        return Err(format!("aspect ratio must be positive, got '{raw}'"));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aspect_ratio_accepts_pairs_and_decimals() {
        assert!((parse_aspect_ratio("9:16").unwrap() - 0.5625).abs() < 1e-9);
        assert!((parse_aspect_ratio("0.5").unwrap() - 0.5).abs() < 1e-9);
        assert!(parse_aspect_ratio("9:0").is_err());
        assert!(parse_aspect_ratio("wide").is_err());
        assert!(parse_aspect_ratio("-1").is_err());
    }

    #[test]
    fn defaults_parse() {
        let args = Args::parse_from(["storyreel"]);
        assert_eq!(args.subreddit, "AmItheAsshole");
        assert_eq!(args.height, 1920);
        assert_eq!(args.fallback_fonts.len(), 1);
        assert!(!args.srt);
        assert!(!args.random);
    }

    #[test]
    fn fallback_fonts_repeat() {
        let args = Args::parse_from([
            "storyreel",
            "--fallback-font",
            "a.ttf",
            "--fallback-font",
            "b.ttf",
        ]);
        assert_eq!(args.fallback_fonts, vec!["a.ttf", "b.ttf"]);
    }
}
