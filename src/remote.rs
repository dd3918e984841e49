use chrono::Utc;
use image::{imageops, ImageFormat, RgbImage};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::error::PipelineError;

/// Opaque failure of the external enhancement capability. The pipeline only
/// branches on success vs failure, never on the cause.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct EnhanceError(pub String);

/// External enhancement capability seam
pub trait RemoteEnhancer: Send + Sync {
    fn enhance(&self, image: &RgbImage, prompt: &str) -> Result<RgbImage, EnhanceError>;
}

/// Stand-in when no endpoint is configured: always fails, which lets the
/// selector's fallback/skip policy take over.
pub struct UnavailableEnhancer;

impl RemoteEnhancer for UnavailableEnhancer {
    fn enhance(&self, _image: &RgbImage, _prompt: &str) -> Result<RgbImage, EnhanceError> {
        Err(EnhanceError(
            "no enhancement endpoint configured".to_string(),
        ))
    }
}

#[derive(Debug, Clone)]
pub struct EnhancerSettings {
    pub endpoint: String,
    pub retry_attempts: u32,
    pub timeout: Duration,
    /// Maximum (width, height) sent over the wire; larger captures are
    /// downscaled first, aspect preserved
    pub max_resolution: (u32, u32),
}

impl Default for EnhancerSettings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            retry_attempts: 3,
            timeout: Duration::from_secs(60),
            max_resolution: (2048, 2048),
        }
    }
}

/// Enhancement over HTTP: PNG-encoded capture plus instruction text as a
/// multipart POST, expecting the enhanced image back as the response body.
pub struct HttpEnhancer {
    client: Client,
    settings: EnhancerSettings,
}

impl HttpEnhancer {
    pub fn new(settings: EnhancerSettings) -> Result<Self, EnhanceError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| EnhanceError(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self { client, settings })
    }

    /// Downscale the capture to fit the configured bounding box. Captures
    /// already inside the box pass through untouched.
    fn prepare(&self, image: &RgbImage) -> RgbImage {
        let (width, height) = image.dimensions();
        let (max_w, max_h) = self.settings.max_resolution;
        if width <= max_w && height <= max_h {
            return image.clone();
        }

        let scale = (max_w as f64 / width as f64).min(max_h as f64 / height as f64);
        let new_w = ((width as f64 * scale) as u32).max(1);
        let new_h = ((height as f64 * scale) as u32).max(1);
        imageops::resize(image, new_w, new_h, imageops::FilterType::Lanczos3)
    }

    fn try_request(&self, png: &[u8], prompt: &str) -> Result<Vec<u8>, EnhanceError> {
        let part = Part::bytes(png.to_vec())
            .file_name("capture.png")
            .mime_str("image/png")
            .map_err(|e| EnhanceError(e.to_string()))?;
        let form = Form::new()
            .part("image", part)
            .text("prompt", prompt.to_string());

        let response = self
            .client
            .post(&self.settings.endpoint)
            .multipart(form)
            .send()
            .map_err(|e| EnhanceError(e.to_string()))?;

        let response = response
            .error_for_status()
            .map_err(|e| EnhanceError(e.to_string()))?;
        let bytes = response.bytes().map_err(|e| EnhanceError(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

impl RemoteEnhancer for HttpEnhancer {
    fn enhance(&self, image: &RgbImage, prompt: &str) -> Result<RgbImage, EnhanceError> {
        let prepared = self.prepare(image);
        let mut png = Vec::new();
        prepared
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| EnhanceError(format!("cannot encode capture: {}", e)))?;

        let attempts = self.settings.retry_attempts.max(1);
        let mut delay = Duration::from_secs(1);

        for attempt in 1..=attempts {
            match self.try_request(&png, prompt) {
                Ok(bytes) => {
                    return image::load_from_memory(&bytes)
                        .map(|decoded| decoded.to_rgb8())
                        .map_err(|e| {
                            EnhanceError(format!("unreadable enhancement response: {}", e))
                        });
                }
                Err(e) => {
                    warn!(
                        "enhancement attempt {}/{} failed: {}",
                        attempt, attempts, e
                    );
                    if attempt < attempts {
                        std::thread::sleep(delay);
                        delay = (delay * 2).min(Duration::from_secs(30));
                    }
                }
            }
        }

        Err(EnhanceError(format!(
            "all {} enhancement attempts failed",
            attempts
        )))
    }
}

/// Metadata attached to every gallery upload
#[derive(Debug, Clone, Serialize)]
pub struct UploadMetadata {
    pub event_id: String,
    pub uploader_name: String,
    pub album_name: String,
    pub source: String,
}

/// Successful upload response from the gallery
#[derive(Debug, Clone, Deserialize)]
pub struct UploadReceipt {
    pub id: String,
    #[serde(default)]
    pub url: String,
}

/// Gallery delivery seam
pub trait UploadSink: Send + Sync {
    fn upload(&self, photo_path: &Path) -> Result<UploadReceipt, PipelineError>;
}

/// Gallery client: multipart POST of the processed JPEG plus metadata,
/// with retry and exponential backoff.
pub struct GalleryClient {
    client: Client,
    endpoint: String,
    metadata: UploadMetadata,
    retry_attempts: u32,
}

impl GalleryClient {
    pub fn new(
        endpoint: String,
        metadata: UploadMetadata,
        timeout: Duration,
        retry_attempts: u32,
    ) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::UploadFailure(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint,
            metadata,
            retry_attempts: retry_attempts.max(1),
        })
    }

    fn try_upload(&self, bytes: &[u8], filename: &str) -> Result<UploadReceipt, PipelineError> {
        let part = Part::bytes(bytes.to_vec())
            .file_name(filename.to_string())
            .mime_str("image/jpeg")
            .map_err(|e| PipelineError::UploadFailure(e.to_string()))?;

        let form = Form::new()
            .part("photo", part)
            .text("event_id", self.metadata.event_id.clone())
            .text("uploader_name", self.metadata.uploader_name.clone())
            .text("album_name", self.metadata.album_name.clone())
            .text("source", self.metadata.source.clone())
            .text("captured_at", Utc::now().to_rfc3339());

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .map_err(|e| PipelineError::UploadFailure(e.to_string()))?
            .error_for_status()
            .map_err(|e| PipelineError::UploadFailure(e.to_string()))?;

        response
            .json::<UploadReceipt>()
            .map_err(|e| PipelineError::UploadFailure(format!("bad gallery response: {}", e)))
    }
}

impl UploadSink for GalleryClient {
    fn upload(&self, photo_path: &Path) -> Result<UploadReceipt, PipelineError> {
        let bytes = std::fs::read(photo_path).map_err(|e| {
            PipelineError::UploadFailure(format!("{}: {}", photo_path.display(), e))
        })?;
        let filename = photo_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("photo.jpg")
            .to_string();

        let mut delay = Duration::from_secs(1);
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            match self.try_upload(&bytes, &filename) {
                Ok(receipt) => {
                    info!(id = %receipt.id, "uploaded {}", filename);
                    return Ok(receipt);
                }
                Err(e) => {
                    warn!(
                        "upload attempt {}/{} failed for {}: {}",
                        attempt, self.retry_attempts, filename, e
                    );
                    last_error = Some(e);
                    if attempt < self.retry_attempts {
                        std::thread::sleep(delay);
                        delay = (delay * 2).min(Duration::from_secs(30));
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| PipelineError::UploadFailure("no attempts made".to_string())))
    }
}

/// One entry in the failed-uploads journal
#[derive(Debug, Serialize, Deserialize)]
pub struct FailedUpload {
    pub timestamp: String,
    pub file: String,
    pub error: String,
}

/// Append a failed upload to the journal file so it can be retried
/// out-of-band after the event.
pub fn record_failed_upload(
    journal_path: &Path,
    photo_path: &Path,
    error: &str,
) -> anyhow::Result<()> {
    let mut entries: Vec<FailedUpload> = match std::fs::read_to_string(journal_path) {
        Ok(text) => serde_json::from_str(&text).unwrap_or_default(),
        Err(_) => Vec::new(),
    };

    entries.push(FailedUpload {
        timestamp: Utc::now().to_rfc3339(),
        file: photo_path.display().to_string(),
        error: error.to_string(),
    });

    let text = serde_json::to_string_pretty(&entries)?;
    std::fs::write(journal_path, text)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_unavailable_enhancer_always_fails() {
        let image = RgbImage::new(8, 8);
        assert!(UnavailableEnhancer.enhance(&image, "prompt").is_err());
    }

    #[test]
    fn test_prepare_downscales_oversized_capture() {
        let enhancer = HttpEnhancer::new(EnhancerSettings {
            endpoint: "http://localhost/enhance".to_string(),
            max_resolution: (100, 100),
            ..Default::default()
        })
        .unwrap();

        let big = RgbImage::from_pixel(400, 200, Rgb([9, 9, 9]));
        let prepared = enhancer.prepare(&big);
        assert_eq!(prepared.dimensions(), (100, 50));

        let small = RgbImage::from_pixel(80, 60, Rgb([9, 9, 9]));
        assert_eq!(enhancer.prepare(&small).dimensions(), (80, 60));
    }

    #[test]
    fn test_prepare_preserves_aspect_for_tall_captures() {
        let enhancer = HttpEnhancer::new(EnhancerSettings {
            endpoint: "http://localhost/enhance".to_string(),
            max_resolution: (2048, 2048),
            ..Default::default()
        })
        .unwrap();

        let tall = RgbImage::new(1000, 4000);
        let prepared = enhancer.prepare(&tall);
        assert_eq!(prepared.dimensions(), (512, 2048));
    }

    #[test]
    fn test_failed_upload_journal_accumulates() {
        let dir = std::env::temp_dir().join(format!(
            "eventshot_journal_test_{}_{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let journal = dir.join("failed_uploads.json");

        record_failed_upload(&journal, Path::new("/out/a.jpg"), "timeout").unwrap();
        record_failed_upload(&journal, Path::new("/out/b.jpg"), "500").unwrap();

        let entries: Vec<FailedUpload> =
            serde_json::from_str(&std::fs::read_to_string(&journal).unwrap()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].file, "/out/a.jpg");
        assert_eq!(entries[1].error, "500");

        std::fs::remove_dir_all(&dir).ok();
    }
}
