use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, RgbImage};
use rayon::prelude::*;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub mod crop;
pub mod enhance;
pub mod face_detect;
pub mod face_mask;
pub mod lut;
pub mod orientation;
pub mod watermark;

use crate::dispatch::CaptureProcessor;
use crate::error::PipelineError;
use crate::remote::{RemoteEnhancer, UploadSink};
use crate::utils;
use crop::CropSettings;
use enhance::{EnhanceMode, EnhancementOutcome, EnhancementPolicy};
use face_detect::FaceLocator;
use lut::LutCache;
use watermark::{WatermarkCache, WatermarkSettings};

/// Immutable pipeline configuration, built once at startup and shared by all
/// workers.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub output_dir: PathBuf,
    pub extensions: Vec<String>,
    pub enhance: EnhancementPolicy,
    pub face_padding: u32,
    pub lut_path: Option<PathBuf>,
    pub lut_intensity: f32,
    pub crop: CropSettings,
    pub watermark_path: Option<PathBuf>,
    pub watermark: WatermarkSettings,
    pub jpeg_quality: u8,
    pub parallel_jobs: usize,
    pub verbose: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            extensions: vec![
                "jpg".to_string(),
                "jpeg".to_string(),
                "png".to_string(),
                "tiff".to_string(),
                "webp".to_string(),
            ],
            enhance: EnhancementPolicy {
                mode: EnhanceMode::AutoWithFallback,
                fallback_allowed: true,
                skip_on_failure: false,
            },
            face_padding: 20,
            lut_path: None,
            lut_intensity: 1.0,
            crop: CropSettings::default(),
            watermark_path: None,
            watermark: WatermarkSettings::default(),
            jpeg_quality: 95,
            parallel_jobs: 2,
            verbose: false,
        }
    }
}

/// Per-photo result handed back to the dispatcher and the batch runner
#[derive(Debug)]
pub struct ProcessingResult {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    /// Which enhancement path ran ("ai", "traditional", ...)
    pub outcome_label: &'static str,
    pub has_faces: bool,
    pub uploaded: bool,
    pub upload_attempted: bool,
    pub processing_time: Duration,
}

/// The per-photo pipeline: orientation, face protection, enhancement,
/// grading, crop, watermark, save, upload.
pub struct ProcessingEngine {
    config: PipelineConfig,
    locator: Box<dyn FaceLocator>,
    remote: Arc<dyn RemoteEnhancer>,
    uploader: Option<Arc<dyn UploadSink>>,
    luts: LutCache,
    watermarks: WatermarkCache,
}

impl ProcessingEngine {
    pub fn new(
        config: PipelineConfig,
        locator: Box<dyn FaceLocator>,
        remote: Arc<dyn RemoteEnhancer>,
        uploader: Option<Arc<dyn UploadSink>>,
    ) -> Self {
        Self {
            config,
            locator,
            remote,
            uploader,
            luts: LutCache::new(),
            watermarks: WatermarkCache::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one capture through the full pipeline.
    pub fn process_capture(&self, input_path: &Path) -> Result<ProcessingResult, PipelineError> {
        let started = Instant::now();

        let loaded = image::open(input_path)
            .map_err(|e| PipelineError::InvalidImageData {
                path: input_path.to_path_buf(),
                reason: e.to_string(),
            })?
            .to_rgb8();
        let original = orientation::normalize(input_path, loaded);
        let (width, height) = original.dimensions();

        // Detector failure degrades to "no faces", never fails the task
        let regions = match self.locator.locate(&original) {
            Ok(regions) => regions,
            Err(e) => {
                warn!("{}; continuing without face protection", e);
                Vec::new()
            }
        };
        let has_faces = !regions.is_empty();
        debug!(
            "{}: {}x{}, {} face(s)",
            input_path.display(),
            width,
            height,
            regions.len()
        );

        let enhancement_on = self.config.enhance.mode != EnhanceMode::Disabled;
        let protect = has_faces && enhancement_on;
        let mask = face_mask::build_mask(width, height, &regions, self.config.face_padding);

        let enhancer_input = if protect {
            face_mask::soften_faces(&original, &mask)
        } else {
            original.clone()
        };

        let outcome = enhance::select_enhancement(
            &enhancer_input,
            has_faces,
            &self.config.enhance,
            self.remote.as_ref(),
        );
        let outcome_label = outcome.label();

        let enhanced = match outcome {
            EnhancementOutcome::Disabled => original.clone(),
            EnhancementOutcome::AllMethodsFailed => {
                return Err(PipelineError::EnhancementFailure)
            }
            other => match other.into_image() {
                Some(img) => img,
                None => original.clone(),
            },
        };

        // External capabilities may return different dimensions; realign
        // before restoration so the mask stays valid
        let aligned = if enhanced.dimensions() != (width, height) {
            imageops::resize(&enhanced, width, height, imageops::FilterType::Lanczos3)
        } else {
            enhanced
        };

        let restored = if protect {
            face_mask::restore_faces(&aligned, &original, &mask)
        } else {
            aligned
        };

        let delivered = self.post_process(restored);

        std::fs::create_dir_all(&self.config.output_dir).map_err(|e| {
            PipelineError::OutputWriteFailure {
                path: self.config.output_dir.clone(),
                reason: e.to_string(),
            }
        })?;
        let filename = utils::create_output_filename(input_path, "final", "jpg").map_err(|e| {
            PipelineError::OutputWriteFailure {
                path: input_path.to_path_buf(),
                reason: e.to_string(),
            }
        })?;
        let output_path = self.config.output_dir.join(filename);
        self.save_jpeg(&delivered, &output_path)?;

        let (uploaded, upload_attempted) = self.deliver(&output_path);

        Ok(ProcessingResult {
            input_path: input_path.to_path_buf(),
            output_path,
            outcome_label,
            has_faces,
            uploaded,
            upload_attempted,
            processing_time: started.elapsed(),
        })
    }

    /// Grading, crop and watermark. Each step degrades to a pass-through on
    /// its own failure.
    fn post_process(&self, image: RgbImage) -> RgbImage {
        let graded = match &self.config.lut_path {
            Some(path) => match self.luts.get(path) {
                Some(table) => table.apply(&image, self.config.lut_intensity),
                None => image,
            },
            None => image,
        };

        let cropped = match crop::auto_crop(&graded, &self.config.crop) {
            Ok(cropped) => cropped,
            Err(e) => {
                debug!("{}", e);
                graded
            }
        };

        match &self.config.watermark_path {
            Some(path) => match self.watermarks.get(path) {
                Some(asset) => {
                    watermark::apply_watermark(&cropped, &asset, &self.config.watermark)
                }
                None => cropped,
            },
            None => cropped,
        }
    }

    fn save_jpeg(&self, image: &RgbImage, path: &Path) -> Result<(), PipelineError> {
        let file = File::create(path).map_err(|e| PipelineError::OutputWriteFailure {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let writer = BufWriter::new(file);
        let encoder = JpegEncoder::new_with_quality(writer, self.config.jpeg_quality);
        image
            .write_with_encoder(encoder)
            .map_err(|e| PipelineError::OutputWriteFailure {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
    }

    /// Best-effort gallery delivery. Returns (uploaded, attempted).
    fn deliver(&self, output_path: &Path) -> (bool, bool) {
        let Some(uploader) = &self.uploader else {
            return (false, false);
        };

        match uploader.upload(output_path) {
            Ok(receipt) => {
                info!("delivered {} as {}", output_path.display(), receipt.id);
                (true, true)
            }
            Err(e) => {
                warn!("{}", e);
                let journal = self.config.output_dir.join("failed_uploads.json");
                if let Err(journal_err) =
                    crate::remote::record_failed_upload(&journal, output_path, &e.to_string())
                {
                    warn!("cannot record failed upload: {}", journal_err);
                }
                (false, true)
            }
        }
    }

    /// Collect all processable images beneath the given paths.
    pub fn discover_images(&self, input_paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let mut images = Vec::new();

        for input_path in input_paths {
            if input_path.is_file() {
                if utils::has_valid_extension(input_path, &self.config.extensions) {
                    images.push(input_path.clone());
                }
                continue;
            }

            for entry in WalkDir::new(input_path)
                .follow_links(true)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let path = entry.path();
                if entry.file_type().is_file()
                    && utils::has_valid_extension(path, &self.config.extensions)
                {
                    images.push(path.to_path_buf());
                }
            }
        }

        images.sort();
        images.dedup();
        Ok(images)
    }

    /// One-shot batch run over already-present files, with a progress
    /// callback per completed photo.
    pub fn process_batch<F>(
        &self,
        files: &[PathBuf],
        progress_callback: F,
    ) -> Result<Vec<Result<ProcessingResult, PipelineError>>>
    where
        F: Fn(usize, usize) + Sync,
    {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.parallel_jobs)
            .build()
            .context("Failed to build worker thread pool")?;

        let completed = AtomicUsize::new(0);
        let total = files.len();

        let results = pool.install(|| {
            files
                .par_iter()
                .map(|path| {
                    let result = self.process_capture(path);
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    progress_callback(done, total);
                    result
                })
                .collect()
        });

        Ok(results)
    }
}

impl CaptureProcessor for ProcessingEngine {
    fn process(&self, path: &Path) -> Result<ProcessingResult, PipelineError> {
        self.process_capture(path)
    }
}
