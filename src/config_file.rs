use crate::cli::{Args, EnhanceModeArg, WatermarkPositionArg};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Optional JSON configuration file. Every field is optional; CLI flags take
/// precedence over file values.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", default)]
pub struct ConfigFile {
    pub watch_dir: Option<String>,
    pub output_dir: Option<String>,
    pub extensions: Option<String>,
    pub enhance_mode: Option<String>,
    pub ai_endpoint: Option<String>,
    pub ai_retries: Option<u32>,
    pub ai_timeout: Option<u64>,
    pub face_model: Option<String>,
    pub face_padding: Option<u32>,
    pub min_face_size: Option<u32>,
    pub lut_path: Option<String>,
    pub lut_intensity: Option<f32>,
    pub watermark_path: Option<String>,
    pub watermark_size_ratio: Option<f32>,
    pub watermark_position: Option<String>,
    pub watermark_vertical: Option<f32>,
    pub watermark_opacity: Option<f32>,
    pub upload_url: Option<String>,
    pub event_id: Option<String>,
    pub uploader_name: Option<String>,
    pub album_name: Option<String>,
    pub jobs: Option<usize>,
    pub poll_interval: Option<u64>,
    pub shutdown_grace: Option<u64>,
    pub jpeg_quality: Option<u8>,
}

impl Args {
    /// Load configuration from a JSON file and merge with command-line
    /// arguments. Command-line arguments take precedence.
    pub fn load_and_merge_config(&mut self) -> Result<()> {
        if let Some(config_path) = self.config.clone() {
            let contents = fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

            let config: ConfigFile = serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;

            self.merge_from_config(config);

            if self.verbose {
                eprintln!("Loaded configuration from: {:?}", config_path);
            }
        }
        Ok(())
    }

    fn merge_from_config(&mut self, config: ConfigFile) {
        // Check whether arguments were explicitly provided on the command line
        let args_from_cli = std::env::args().collect::<Vec<_>>();
        let given = |long: &str, short: &str| {
            args_from_cli
                .iter()
                .any(|a| a == long || (!short.is_empty() && a == short))
        };

        if !given("--watch", "-w") {
            if let Some(dir) = config.watch_dir {
                self.watch_dir = Some(PathBuf::from(dir));
            }
        }

        if !given("--output", "-o") {
            if let Some(dir) = config.output_dir {
                self.output_dir = PathBuf::from(dir);
            }
        }

        if !given("--extensions", "") {
            if let Some(ext) = config.extensions {
                self.extensions_str = ext;
            }
        }

        if !given("--enhance-mode", "") {
            if let Some(mode) = config.enhance_mode {
                self.enhance_mode = match mode.as_str() {
                    "disabled" => EnhanceModeArg::Disabled,
                    "traditional" => EnhanceModeArg::Traditional,
                    "ai" => EnhanceModeArg::Ai,
                    "auto" => EnhanceModeArg::Auto,
                    _ => self.enhance_mode,
                };
            }
        }

        if self.ai_endpoint.is_none() {
            self.ai_endpoint = config.ai_endpoint;
        }
        if !given("--ai-retries", "") {
            if let Some(retries) = config.ai_retries {
                self.ai_retries = retries;
            }
        }
        if !given("--ai-timeout", "") {
            if let Some(timeout) = config.ai_timeout {
                self.ai_timeout = timeout;
            }
        }

        if self.face_model.is_none() {
            self.face_model = config.face_model.map(PathBuf::from);
        }
        if !given("--face-padding", "") {
            if let Some(padding) = config.face_padding {
                self.face_padding = padding;
            }
        }
        if !given("--min-face-size", "") {
            if let Some(size) = config.min_face_size {
                self.min_face_size = size;
            }
        }

        if self.lut_path.is_none() {
            self.lut_path = config.lut_path.map(PathBuf::from);
        }
        if !given("--lut-intensity", "") {
            if let Some(intensity) = config.lut_intensity {
                self.lut_intensity = intensity;
            }
        }

        if self.watermark_path.is_none() {
            self.watermark_path = config.watermark_path.map(PathBuf::from);
        }
        if !given("--watermark-size-ratio", "") {
            if let Some(ratio) = config.watermark_size_ratio {
                self.watermark_size_ratio = ratio;
            }
        }
        if !given("--watermark-position", "") {
            if let Some(position) = config.watermark_position {
                self.watermark_position = match position.as_str() {
                    "left" => WatermarkPositionArg::Left,
                    "center" => WatermarkPositionArg::Center,
                    "right" => WatermarkPositionArg::Right,
                    _ => self.watermark_position,
                };
            }
        }
        if !given("--watermark-vertical", "") {
            if let Some(vertical) = config.watermark_vertical {
                self.watermark_vertical = vertical;
            }
        }
        if !given("--watermark-opacity", "") {
            if let Some(opacity) = config.watermark_opacity {
                self.watermark_opacity = opacity;
            }
        }

        if self.upload_url.is_none() {
            self.upload_url = config.upload_url;
        }
        if self.event_id.is_none() {
            self.event_id = config.event_id;
        }
        if !given("--uploader", "") {
            if let Some(name) = config.uploader_name {
                self.uploader_name = name;
            }
        }
        if !given("--album", "") {
            if let Some(name) = config.album_name {
                self.album_name = name;
            }
        }

        if !given("--jobs", "-j") {
            if let Some(jobs) = config.jobs {
                self.jobs = jobs;
            }
        }
        if !given("--poll-interval", "") {
            if let Some(interval) = config.poll_interval {
                self.poll_interval = interval;
            }
        }
        if !given("--shutdown-grace", "") {
            if let Some(grace) = config.shutdown_grace {
                self.shutdown_grace = grace;
            }
        }
        if !given("--jpeg-quality", "") {
            if let Some(quality) = config.jpeg_quality {
                self.jpeg_quality = quality;
            }
        }
    }
}
