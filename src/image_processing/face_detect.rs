use image::RgbImage;
use imageproc::contrast::equalize_histogram;
use std::path::Path;
use tracing::debug;

use crate::error::PipelineError;
use crate::image_processing::face_mask::FaceRegion;

/// Seam between the pipeline and whatever finds faces.
///
/// Zero detections is an empty vec, never an error; errors mean the detector
/// itself failed and callers should continue unprotected.
pub trait FaceLocator: Send + Sync {
    fn locate(&self, image: &RgbImage) -> Result<Vec<FaceRegion>, PipelineError>;
}

/// No-op locator used when face protection is disabled or no model file is
/// configured.
pub struct NullLocator;

impl FaceLocator for NullLocator {
    fn locate(&self, _image: &RgbImage) -> Result<Vec<FaceRegion>, PipelineError> {
        Ok(Vec::new())
    }
}

/// Face locator backed by the `rustface` crate (SeetaFace engine).
///
/// The model is loaded once; detectors are not `Sync`, so one is built per
/// call from a cloned model.
pub struct SeetaFaceLocator {
    model: rustface::Model,
    min_face_size: u32,
}

impl SeetaFaceLocator {
    pub fn from_model_file(path: &Path, min_face_size: u32) -> Result<Self, PipelineError> {
        let data = std::fs::read(path).map_err(|e| {
            PipelineError::FaceLocateFailure(format!(
                "cannot read model {}: {}",
                path.display(),
                e
            ))
        })?;
        let model = rustface::read_model(std::io::Cursor::new(data)).map_err(|e| {
            PipelineError::FaceLocateFailure(format!(
                "cannot parse model {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(Self {
            model,
            min_face_size,
        })
    }
}

impl FaceLocator for SeetaFaceLocator {
    fn locate(&self, image: &RgbImage) -> Result<Vec<FaceRegion>, PipelineError> {
        let (width, height) = image.dimensions();
        if width < self.min_face_size || height < self.min_face_size {
            return Ok(Vec::new());
        }

        // Equalized grayscale input improves detection under stage lighting
        let gray = image::imageops::grayscale(image);
        let gray = equalize_histogram(&gray);

        let mut detector = rustface::create_detector_with_model(self.model.clone());
        detector.set_min_face_size(self.min_face_size);
        detector.set_score_thresh(2.0);
        detector.set_pyramid_scale_factor(0.8);
        detector.set_slide_window_step(4, 4);

        let faces = detector.detect(&rustface::ImageData::new(gray.as_raw(), width, height));

        let regions: Vec<FaceRegion> = faces
            .iter()
            .filter_map(|face| {
                let bbox = face.bbox();
                clamp_detection(
                    bbox.x(),
                    bbox.y(),
                    bbox.width(),
                    bbox.height(),
                    width,
                    height,
                )
            })
            .collect();

        debug!(count = regions.len(), "face detection finished");
        Ok(regions)
    }
}

/// Clamp a raw detection (which may extend past the frame or start at
/// negative coordinates) into image bounds. Returns `None` when nothing of
/// the detection remains inside the frame.
fn clamp_detection(
    x: i32,
    y: i32,
    w: u32,
    h: u32,
    image_width: u32,
    image_height: u32,
) -> Option<FaceRegion> {
    let x0 = x.max(0) as u32;
    let y0 = y.max(0) as u32;
    if x0 >= image_width || y0 >= image_height {
        return None;
    }

    // Portion cut off on the left/top shrinks the box
    let cut_x = (x0 as i64 - x as i64) as u32;
    let cut_y = (y0 as i64 - y as i64) as u32;
    let w = w.saturating_sub(cut_x).min(image_width - x0);
    let h = h.saturating_sub(cut_y).min(image_height - y0);
    if w == 0 || h == 0 {
        return None;
    }

    Some(FaceRegion {
        x: x0,
        y: y0,
        width: w,
        height: h,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn test_null_locator_finds_nothing() {
        let image = RgbImage::new(100, 100);
        let regions = NullLocator.locate(&image).unwrap();
        assert!(regions.is_empty());
    }

    #[test]
    fn test_clamp_detection_inside_frame() {
        let r = clamp_detection(10, 20, 30, 40, 200, 200).unwrap();
        assert_eq!(
            r,
            FaceRegion {
                x: 10,
                y: 20,
                width: 30,
                height: 40
            }
        );
    }

    #[test]
    fn test_clamp_detection_negative_origin() {
        let r = clamp_detection(-10, -5, 30, 40, 200, 200).unwrap();
        assert_eq!(
            r,
            FaceRegion {
                x: 0,
                y: 0,
                width: 20,
                height: 35
            }
        );
    }

    #[test]
    fn test_clamp_detection_overhanging_edge() {
        let r = clamp_detection(190, 180, 30, 40, 200, 200).unwrap();
        assert_eq!(
            r,
            FaceRegion {
                x: 190,
                y: 180,
                width: 10,
                height: 20
            }
        );
    }

    #[test]
    fn test_clamp_detection_fully_outside() {
        assert!(clamp_detection(250, 10, 30, 40, 200, 200).is_none());
        assert!(clamp_detection(-50, 10, 30, 40, 200, 200).is_none());
    }
}
