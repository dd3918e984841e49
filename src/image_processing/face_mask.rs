use image::{GrayImage, Luma, RgbImage};
use imageproc::drawing::draw_filled_ellipse_mut;
use imageproc::filter::gaussian_blur_f32;

/// Mask value marking a protected (face) pixel
pub const PROTECTED: u8 = 255;

/// Blur strength used to hide faces from the enhancement step
const SOFTEN_SIGMA: f32 = 2.9;

/// Blur strength applied to the mask before restoration, producing a feathered
/// transition between enhanced background and restored face pixels
const FEATHER_SIGMA: f32 = 3.5;

/// A detected face in pixel coordinates, prior to padding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Build a protection mask for the given face regions.
///
/// Each region is expanded by `padding` pixels, clamped to the image bounds,
/// and rendered as the filled ellipse inscribed in the expanded rectangle.
/// Overlapping regions union. No regions yields an all-zero mask.
pub fn build_mask(width: u32, height: u32, regions: &[FaceRegion], padding: u32) -> GrayImage {
    let mut mask = GrayImage::new(width, height);

    for region in regions {
        let x1 = region.x.saturating_sub(padding);
        let y1 = region.y.saturating_sub(padding);
        let x2 = region.x.saturating_add(region.width).saturating_add(padding).min(width);
        let y2 = region.y.saturating_add(region.height).saturating_add(padding).min(height);

        if x2 <= x1 || y2 <= y1 {
            continue;
        }

        let center = (((x1 + x2) / 2) as i32, ((y1 + y2) / 2) as i32);
        let radius_x = ((x2 - x1) / 2) as i32;
        let radius_y = ((y2 - y1) / 2) as i32;

        if radius_x == 0 || radius_y == 0 {
            continue;
        }

        draw_filled_ellipse_mut(&mut mask, center, radius_x, radius_y, Luma([PROTECTED]));
    }

    mask
}

/// Whether the mask protects no pixels at all
pub fn mask_is_empty(mask: &GrayImage) -> bool {
    mask.pixels().all(|p| p[0] == 0)
}

/// Replace protected pixels with a heavily blurred copy so the enhancement
/// step cannot sharpen or restyle faces. The background is left untouched.
pub fn soften_faces(original: &RgbImage, mask: &GrayImage) -> RgbImage {
    debug_assert_eq!(original.dimensions(), mask.dimensions());

    if mask_is_empty(mask) {
        return original.clone();
    }

    let blurred = gaussian_blur_f32(original, SOFTEN_SIGMA);
    let mut softened = original.clone();

    for (x, y, pixel) in softened.enumerate_pixels_mut() {
        if mask.get_pixel(x, y)[0] > 0 {
            *pixel = *blurred.get_pixel(x, y);
        }
    }

    softened
}

/// Copy original face pixels back over the enhanced image.
///
/// The mask is blurred first so the restored area feathers into the enhanced
/// background instead of leaving a hard ellipse edge. Per pixel:
/// `out = enhanced * (1 - a) + original * a` with `a` the normalized blurred
/// mask value. All-zero masks return the enhanced image unchanged.
pub fn restore_faces(enhanced: &RgbImage, original: &RgbImage, mask: &GrayImage) -> RgbImage {
    debug_assert_eq!(enhanced.dimensions(), original.dimensions());
    debug_assert_eq!(enhanced.dimensions(), mask.dimensions());

    if mask_is_empty(mask) {
        return enhanced.clone();
    }

    let feathered = gaussian_blur_f32(mask, FEATHER_SIGMA);
    let mut restored = RgbImage::new(enhanced.width(), enhanced.height());

    for (x, y, out) in restored.enumerate_pixels_mut() {
        let alpha = feathered.get_pixel(x, y)[0] as f32 / 255.0;
        let enh = enhanced.get_pixel(x, y);
        let orig = original.get_pixel(x, y);

        for c in 0..3 {
            let blended = enh[c] as f32 * (1.0 - alpha) + orig[c] as f32 * alpha;
            out[c] = blended.round().clamp(0.0, 255.0) as u8;
        }
    }

    restored
}
