use image::{imageops, RgbImage};

use crate::error::PipelineError;

/// Frame orientation; square frames count as landscape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Portrait,
    Landscape,
}

pub fn detect_orientation(width: u32, height: u32) -> Orientation {
    if height > width {
        Orientation::Portrait
    } else {
        Orientation::Landscape
    }
}

/// Crop configuration fixed at startup
#[derive(Debug, Clone, Copy)]
pub struct CropSettings {
    /// Target ratio (W:H) for portrait frames
    pub portrait_ratio: (u32, u32),
    /// Target ratio (W:H) for landscape frames
    pub landscape_ratio: (u32, u32),
    /// Minimum acceptable crop result as (width, height)
    pub min_resolution: (u32, u32),
}

impl Default for CropSettings {
    fn default() -> Self {
        Self {
            portrait_ratio: (5, 7),
            landscape_ratio: (7, 5),
            min_resolution: (1500, 2100),
        }
    }
}

/// Compute the centered crop rectangle bringing (width, height) to the target
/// ratio. Exactly one axis shrinks; the image is never upscaled.
pub fn crop_rect(width: u32, height: u32, ratio: (u32, u32)) -> (u32, u32, u32, u32) {
    let current = width as f64 / height as f64;
    let target = ratio.0 as f64 / ratio.1 as f64;

    if current > target {
        // Too wide: trim the sides
        let new_width = ((height as f64 * target).round() as u32).min(width).max(1);
        let x = (width - new_width) / 2;
        (x, 0, new_width, height)
    } else {
        // Too tall (or exact): trim top and bottom
        let new_height = ((width as f64 / target).round() as u32).min(height).max(1);
        let y = (height - new_height) / 2;
        (0, y, width, new_height)
    }
}

/// Crop the image to its orientation's target ratio.
///
/// Returns `CropTooSmall` when the result would fall under the configured
/// minimum resolution; callers keep the original dimensions in that case.
pub fn auto_crop(image: &RgbImage, settings: &CropSettings) -> Result<RgbImage, PipelineError> {
    let (width, height) = image.dimensions();
    let ratio = match detect_orientation(width, height) {
        Orientation::Portrait => settings.portrait_ratio,
        Orientation::Landscape => settings.landscape_ratio,
    };

    let (x, y, new_width, new_height) = crop_rect(width, height, ratio);

    if new_width < settings.min_resolution.0 || new_height < settings.min_resolution.1 {
        return Err(PipelineError::CropTooSmall {
            width: new_width,
            height: new_height,
        });
    }

    Ok(imageops::crop_imm(image, x, y, new_width, new_height).to_image())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn settings(min_w: u32, min_h: u32) -> CropSettings {
        CropSettings {
            portrait_ratio: (5, 7),
            landscape_ratio: (7, 5),
            min_resolution: (min_w, min_h),
        }
    }

    #[test]
    fn test_detect_orientation() {
        assert_eq!(detect_orientation(100, 200), Orientation::Portrait);
        assert_eq!(detect_orientation(200, 100), Orientation::Landscape);
        assert_eq!(detect_orientation(100, 100), Orientation::Landscape);
    }

    #[test]
    fn test_crop_rect_trims_wide_image() {
        // 1920x1080 to 7:5 keeps the height, trims the sides
        let (x, y, w, h) = crop_rect(1920, 1080, (7, 5));
        assert_eq!((w, h), (1512, 1080));
        assert_eq!(x, (1920 - 1512) / 2);
        assert_eq!(y, 0);
    }

    #[test]
    fn test_crop_rect_trims_tall_image() {
        // 1000x2000 to 5:7 keeps the width, trims top and bottom
        let (x, y, w, h) = crop_rect(1000, 2000, (5, 7));
        assert_eq!((w, h), (1000, 1400));
        assert_eq!(x, 0);
        assert_eq!(y, 300);
    }

    #[test]
    fn test_auto_crop_is_idempotent() {
        let image = RgbImage::from_pixel(1400, 1000, Rgb([50, 50, 50]));
        let s = settings(100, 100);

        let once = auto_crop(&image, &s).unwrap();
        assert_eq!(once.dimensions(), (1400, 1000));
        let twice = auto_crop(&once, &s).unwrap();
        assert_eq!(twice.dimensions(), once.dimensions());
    }

    #[test]
    fn test_auto_crop_rejects_below_minimum() {
        let image = RgbImage::from_pixel(1920, 1080, Rgb([0, 0, 0]));
        // Landscape result 1512x1080 is under a 1600-wide minimum
        let err = auto_crop(&image, &settings(1600, 1000)).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::CropTooSmall {
                width: 1512,
                height: 1080
            }
        ));
    }

    #[test]
    fn test_auto_crop_centers_content() {
        // Vertical stripe in the middle survives a side trim
        let image = RgbImage::from_fn(700, 500, |x, _| {
            if x == 350 {
                Rgb([255, 0, 0])
            } else {
                Rgb([0, 0, 0])
            }
        });
        let cropped = auto_crop(&image, &settings(10, 10)).unwrap();
        let (w, h) = cropped.dimensions();
        assert_eq!((w, h), (700, 500));

        let portrait = RgbImage::from_fn(500, 800, |x, y| {
            if x == 250 && y == 400 {
                Rgb([255, 0, 0])
            } else {
                Rgb([0, 0, 0])
            }
        });
        let cropped = auto_crop(&portrait, &settings(10, 10)).unwrap();
        assert_eq!(cropped.dimensions(), (500, 700));
        // Original center (250, 400) maps to (250, 400 - 50)
        assert_eq!(*cropped.get_pixel(250, 350), Rgb([255, 0, 0]));
    }
}
