use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum EnhanceModeArg {
    /// No enhancement; captures pass straight to grading/crop/watermark
    #[value(name = "disabled")]
    Disabled,
    /// Local enhancement chain only (unsharp, CLAHE, bilateral, saturation)
    #[value(name = "traditional")]
    Traditional,
    /// Remote AI enhancement only
    #[value(name = "ai")]
    Ai,
    /// Remote AI first, traditional fallback on failure
    #[value(name = "auto")]
    Auto,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum WatermarkPositionArg {
    #[value(name = "left")]
    Left,
    #[value(name = "center")]
    Center,
    #[value(name = "right")]
    Right,
}

#[derive(Parser, Debug)]
#[command(
    name = "eventshot-processor",
    about = "Automated enhancement, grading and upload pipeline for tethered event photography",
    long_about = "
EventShot Processor

Watches a tethered-capture directory (or processes folders in batch) and runs
every photo through the event delivery pipeline: face-protected enhancement
(AI with traditional fallback), 3D LUT color grading, orientation-based
cropping, watermarking, and best-effort gallery upload.

Example Usage:
  # Live event: watch the camera download folder, 2 workers
  eventshot-processor --watch ~/Captures -o ~/Delivered \\
    --enhance-mode auto --ai-endpoint https://enhance.example.com/v1 \\
    --lut ./luts/wedding_warm.cube --watermark ./brand/logo.png

  # Reprocess an event folder offline, no AI
  eventshot-processor -i ~/Events/2026-08-29 -o ~/Delivered \\
    --enhance-mode traditional --jobs 8

  # Grading and watermark only
  eventshot-processor -i ~/Photos -o ~/out --enhance-mode disabled \\
    --lut ./luts/bw_film.cube --lut-intensity 0.8 --watermark ./logo.png

  # Upload to the gallery as photos are processed
  eventshot-processor --watch ~/Captures -o ~/Delivered \\
    --upload-url https://gallery.example.com/api/photos --event-id wedding-2026"
)]
pub struct Args {
    /// Directory to watch for incoming captures (live mode)
    #[arg(short = 'w', long = "watch", value_name = "DIR")]
    pub watch_dir: Option<PathBuf>,

    /// Input directories or single image files for one-shot batch processing
    /// (can be specified multiple times)
    #[arg(short = 'i', long = "input", value_name = "DIR|FILE")]
    pub input_paths: Vec<PathBuf>,

    /// Output directory for processed images
    #[arg(short = 'o', long = "output", default_value = ".", value_name = "DIR")]
    pub output_dir: PathBuf,

    /// Comma-separated list of image extensions to process
    #[arg(long = "extensions", default_value = "jpg,jpeg,png,tiff,webp")]
    pub extensions_str: String,

    /// Enhancement mode
    #[arg(long = "enhance-mode", default_value = "auto", value_name = "MODE")]
    pub enhance_mode: EnhanceModeArg,

    /// Disable the traditional fallback when AI enhancement fails
    #[arg(long = "no-ai-fallback")]
    pub no_ai_fallback: bool,

    /// Deliver the unenhanced capture instead of failing the task when every
    /// enhancement method fails
    #[arg(long = "skip-on-failure")]
    pub skip_on_failure: bool,

    /// Enhancement service endpoint URL
    #[arg(long = "ai-endpoint", value_name = "URL")]
    pub ai_endpoint: Option<String>,

    /// Maximum resolution sent to the enhancement service (WIDTHxHEIGHT)
    #[arg(
        long = "ai-max-resolution",
        default_value = "2048x2048",
        value_name = "WIDTHxHEIGHT"
    )]
    pub ai_max_resolution: String,

    /// Retry attempts per enhancement request
    #[arg(long = "ai-retries", default_value = "3", value_name = "N")]
    pub ai_retries: u32,

    /// Per-request enhancement timeout in seconds
    #[arg(long = "ai-timeout", default_value = "60", value_name = "SECONDS")]
    pub ai_timeout: u64,

    /// SeetaFace model file for face detection (face protection is disabled
    /// without it)
    #[arg(long = "face-model", value_name = "FILE")]
    pub face_model: Option<PathBuf>,

    /// Padding in pixels added around detected face regions
    #[arg(long = "face-padding", default_value = "20", value_name = "PIXELS")]
    pub face_padding: u32,

    /// Minimum face size in pixels for the detector
    #[arg(long = "min-face-size", default_value = "30", value_name = "PIXELS")]
    pub min_face_size: u32,

    /// 3D LUT file (.cube) for color grading
    #[arg(long = "lut", value_name = "FILE")]
    pub lut_path: Option<PathBuf>,

    /// LUT blend intensity, 0.0 (off) to 1.0 (full)
    #[arg(long = "lut-intensity", default_value = "1.0", value_name = "FRACTION")]
    pub lut_intensity: f32,

    /// Portrait crop aspect ratio (W:H)
    #[arg(long = "portrait-ratio", default_value = "5:7", value_name = "W:H")]
    pub portrait_ratio: String,

    /// Landscape crop aspect ratio (W:H)
    #[arg(long = "landscape-ratio", default_value = "7:5", value_name = "W:H")]
    pub landscape_ratio: String,

    /// Minimum acceptable crop result (WIDTHxHEIGHT); smaller results keep the
    /// original dimensions
    #[arg(
        long = "min-resolution",
        default_value = "1500x2100",
        value_name = "WIDTHxHEIGHT"
    )]
    pub min_resolution: String,

    /// Watermark image (PNG with alpha)
    #[arg(long = "watermark", value_name = "FILE")]
    pub watermark_path: Option<PathBuf>,

    /// Watermark width as a fraction of image width
    #[arg(
        long = "watermark-size-ratio",
        default_value = "0.15",
        value_name = "FRACTION"
    )]
    pub watermark_size_ratio: f32,

    /// Horizontal watermark position
    #[arg(long = "watermark-position", default_value = "center")]
    pub watermark_position: WatermarkPositionArg,

    /// Vertical watermark center as a fraction of image height
    #[arg(
        long = "watermark-vertical",
        default_value = "0.85",
        value_name = "FRACTION"
    )]
    pub watermark_vertical: f32,

    /// Watermark opacity, 0.0 to 1.0
    #[arg(
        long = "watermark-opacity",
        default_value = "0.8",
        value_name = "FRACTION"
    )]
    pub watermark_opacity: f32,

    /// Gallery upload endpoint URL
    #[arg(long = "upload-url", value_name = "URL")]
    pub upload_url: Option<String>,

    /// Event identifier for gallery uploads
    #[arg(long = "event-id", value_name = "ID")]
    pub event_id: Option<String>,

    /// Uploader label attached to gallery uploads
    #[arg(long = "uploader", default_value = "Official Photographer")]
    pub uploader_name: String,

    /// Album/category label attached to gallery uploads
    #[arg(long = "album", default_value = "Official")]
    pub album_name: String,

    /// Number of parallel worker threads (0 = one per CPU core)
    #[arg(short = 'j', long = "jobs", default_value = "2", value_name = "N")]
    pub jobs: usize,

    /// Polling interval for watch mode in seconds
    #[arg(long = "poll-interval", default_value = "2", value_name = "SECONDS")]
    pub poll_interval: u64,

    /// Grace period for in-flight tasks on shutdown, in seconds
    #[arg(long = "shutdown-grace", default_value = "30", value_name = "SECONDS")]
    pub shutdown_grace: u64,

    /// JPEG quality for processed output
    #[arg(long = "jpeg-quality", default_value = "95", value_name = "1-100")]
    pub jpeg_quality: u8,

    /// Optional JSON configuration file (CLI flags take precedence)
    #[arg(long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Args {
    /// Parse the comma-separated extensions string into a normalized list
    pub fn parse_extensions(&self) -> Vec<String> {
        self.extensions_str
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Parse the AI max resolution string
    pub fn parse_ai_max_resolution(&self) -> Result<(u32, u32), String> {
        parse_size(&self.ai_max_resolution)
    }

    /// Parse the minimum crop resolution string
    pub fn parse_min_resolution(&self) -> Result<(u32, u32), String> {
        parse_size(&self.min_resolution)
    }

    /// Parse both crop ratio strings
    pub fn parse_crop_ratios(&self) -> Result<((u32, u32), (u32, u32)), String> {
        Ok((
            parse_ratio(&self.portrait_ratio)?,
            parse_ratio(&self.landscape_ratio)?,
        ))
    }
}

/// Parse a size string like "2048x2048" into (width, height)
pub fn parse_size(size_str: &str) -> Result<(u32, u32), String> {
    let parts: Vec<&str> = size_str.split('x').collect();
    if parts.len() != 2 {
        return Err(format!(
            "Invalid size format: '{}'. Expected WIDTHxHEIGHT (e.g., 2048x2048)",
            size_str
        ));
    }

    let width = parts[0]
        .parse::<u32>()
        .map_err(|_| format!("Invalid width: '{}'", parts[0]))?;
    let height = parts[1]
        .parse::<u32>()
        .map_err(|_| format!("Invalid height: '{}'", parts[1]))?;

    if width == 0 || height == 0 {
        return Err("Size dimensions must be greater than 0".to_string());
    }

    Ok((width, height))
}

/// Parse an aspect ratio string like "5:7" into (width, height)
pub fn parse_ratio(ratio_str: &str) -> Result<(u32, u32), String> {
    let parts: Vec<&str> = ratio_str.split(':').collect();
    if parts.len() != 2 {
        return Err(format!(
            "Invalid ratio format: '{}'. Expected W:H (e.g., 5:7)",
            ratio_str
        ));
    }

    let w = parts[0]
        .parse::<u32>()
        .map_err(|_| format!("Invalid ratio width: '{}'", parts[0]))?;
    let h = parts[1]
        .parse::<u32>()
        .map_err(|_| format!("Invalid ratio height: '{}'", parts[1]))?;

    if w == 0 || h == 0 {
        return Err("Ratio terms must be greater than 0".to_string());
    }

    Ok((w, h))
}

#[cfg(test)]
impl Default for Args {
    fn default() -> Self {
        Self {
            watch_dir: None,
            input_paths: vec![],
            output_dir: PathBuf::from("."),
            extensions_str: "jpg,jpeg,png,tiff,webp".to_string(),
            enhance_mode: EnhanceModeArg::Auto,
            no_ai_fallback: false,
            skip_on_failure: false,
            ai_endpoint: None,
            ai_max_resolution: "2048x2048".to_string(),
            ai_retries: 3,
            ai_timeout: 60,
            face_model: None,
            face_padding: 20,
            min_face_size: 30,
            lut_path: None,
            lut_intensity: 1.0,
            portrait_ratio: "5:7".to_string(),
            landscape_ratio: "7:5".to_string(),
            min_resolution: "1500x2100".to_string(),
            watermark_path: None,
            watermark_size_ratio: 0.15,
            watermark_position: WatermarkPositionArg::Center,
            watermark_vertical: 0.85,
            watermark_opacity: 0.8,
            upload_url: None,
            event_id: None,
            uploader_name: "Official Photographer".to_string(),
            album_name: "Official".to_string(),
            jobs: 2,
            poll_interval: 2,
            shutdown_grace: 30,
            jpeg_quality: 95,
            config: None,
            verbose: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("2048x2048"), Ok((2048, 2048)));
        assert_eq!(parse_size("1500x2100"), Ok((1500, 2100)));

        assert!(parse_size("2048").is_err());
        assert!(parse_size("2048x").is_err());
        assert!(parse_size("x2048").is_err());
        assert!(parse_size("0x100").is_err());
        assert!(parse_size("axb").is_err());
    }

    #[test]
    fn test_parse_ratio() {
        assert_eq!(parse_ratio("5:7"), Ok((5, 7)));
        assert_eq!(parse_ratio("7:5"), Ok((7, 5)));
        assert_eq!(parse_ratio("16:9"), Ok((16, 9)));

        assert!(parse_ratio("5").is_err());
        assert!(parse_ratio("5:0").is_err());
        assert!(parse_ratio("5:7:9").is_err());
        assert!(parse_ratio("a:b").is_err());
    }

    #[test]
    fn test_parse_extensions() {
        let args = Args {
            extensions_str: "JPG, png ,,tiff".to_string(),
            ..Default::default()
        };
        assert_eq!(args.parse_extensions(), vec!["jpg", "png", "tiff"]);
    }
}
