use std::path::PathBuf;
use thiserror::Error;

/// Error taxonomy for the capture pipeline.
///
/// Only `InvalidImageData` and an exhausted enhancement with
/// `skip_on_failure` disabled mark a task as failed; everything else
/// degrades to a reduced-quality but still-delivered result.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Unreadable or corrupt source file. Fails the task immediately.
    #[error("invalid image data in {path}: {reason}")]
    InvalidImageData { path: PathBuf, reason: String },

    /// Detector error. Callers degrade to `has_faces = false` and continue.
    #[error("face detection failed: {0}")]
    FaceLocateFailure(String),

    /// Every configured enhancement method failed for this capture.
    #[error("enhancement failed: all configured methods exhausted")]
    EnhancementFailure,

    /// Color grading table missing or malformed. Step is skipped.
    #[error("color lookup table unavailable: {0}")]
    ColorTableUnavailable(String),

    /// Watermark asset missing or unreadable. Step is skipped.
    #[error("watermark asset unavailable: {0}")]
    WatermarkAssetUnavailable(String),

    /// Crop result would fall below the configured minimum resolution.
    /// Original dimensions are retained.
    #[error("crop result too small ({width}x{height}), keeping original dimensions")]
    CropTooSmall { width: u32, height: u32 },

    /// Upload failed. Non-fatal to the task; the local file stays.
    #[error("upload failed: {0}")]
    UploadFailure(String),

    /// Saving the processed result failed.
    #[error("failed to write output {path}: {reason}")]
    OutputWriteFailure { path: PathBuf, reason: String },

    /// Tasks were still running when the shutdown grace period elapsed.
    #[error("shutdown grace period elapsed with {abandoned} task(s) still in flight")]
    PoolShutdownTimeout { abandoned: usize },
}

impl PipelineError {
    /// Whether this error terminates its task (as opposed to degrading a step).
    pub fn is_fatal_to_task(&self) -> bool {
        matches!(
            self,
            PipelineError::InvalidImageData { .. }
                | PipelineError::EnhancementFailure
                | PipelineError::OutputWriteFailure { .. }
        )
    }
}
