use image::RgbImage;
use imageproc::filter::gaussian_blur_f32;
use tracing::warn;

use crate::error::PipelineError;
use crate::remote::RemoteEnhancer;

/// Which enhancement paths a run is allowed to take
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnhanceMode {
    Disabled,
    TraditionalOnly,
    AiOnly,
    AutoWithFallback,
}

/// Enhancement policy fixed at startup
#[derive(Debug, Clone, Copy)]
pub struct EnhancementPolicy {
    pub mode: EnhanceMode,
    /// Whether AI failure may fall back to the traditional chain (auto mode)
    pub fallback_allowed: bool,
    /// Whether exhausting every method delivers the unenhanced capture
    /// instead of failing the task
    pub skip_on_failure: bool,
}

/// Result of running the enhancement selector on one capture
#[derive(Debug)]
pub enum EnhancementOutcome {
    /// Enhancement turned off; caller keeps the original untouched
    Disabled,
    TraditionalSuccess(RgbImage),
    AiSuccess(RgbImage),
    AiFailureFallbackSuccess(RgbImage),
    /// Every method failed but policy says deliver the input anyway
    Skipped(RgbImage),
    AllMethodsFailed,
}

impl EnhancementOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            EnhancementOutcome::Disabled => "disabled",
            EnhancementOutcome::TraditionalSuccess(_) => "traditional",
            EnhancementOutcome::AiSuccess(_) => "ai",
            EnhancementOutcome::AiFailureFallbackSuccess(_) => "ai_fallback_traditional",
            EnhancementOutcome::Skipped(_) => "skipped",
            EnhancementOutcome::AllMethodsFailed => "failed",
        }
    }

    pub fn into_image(self) -> Option<RgbImage> {
        match self {
            EnhancementOutcome::TraditionalSuccess(img)
            | EnhancementOutcome::AiSuccess(img)
            | EnhancementOutcome::AiFailureFallbackSuccess(img)
            | EnhancementOutcome::Skipped(img) => Some(img),
            EnhancementOutcome::Disabled | EnhancementOutcome::AllMethodsFailed => None,
        }
    }
}

/// Run the configured enhancement paths against one capture.
///
/// The input is expected to already have protected faces softened; `has_faces`
/// only steers the instruction text sent to the remote capability.
pub fn select_enhancement(
    image: &RgbImage,
    has_faces: bool,
    policy: &EnhancementPolicy,
    remote: &dyn RemoteEnhancer,
) -> EnhancementOutcome {
    match policy.mode {
        EnhanceMode::Disabled => EnhancementOutcome::Disabled,

        EnhanceMode::TraditionalOnly => match traditional_enhance(image) {
            Ok(enhanced) => EnhancementOutcome::TraditionalSuccess(enhanced),
            Err(e) => {
                warn!("traditional enhancement failed: {}", e);
                exhausted(image, policy)
            }
        },

        EnhanceMode::AiOnly => {
            let prompt = enhancement_prompt(has_faces);
            match remote.enhance(image, &prompt) {
                Ok(enhanced) => EnhancementOutcome::AiSuccess(enhanced),
                Err(e) => {
                    warn!("remote enhancement failed: {}", e);
                    exhausted(image, policy)
                }
            }
        }

        EnhanceMode::AutoWithFallback => {
            let prompt = enhancement_prompt(has_faces);
            match remote.enhance(image, &prompt) {
                Ok(enhanced) => EnhancementOutcome::AiSuccess(enhanced),
                Err(e) => {
                    warn!("remote enhancement failed: {}", e);
                    if policy.fallback_allowed {
                        match traditional_enhance(image) {
                            Ok(enhanced) => {
                                EnhancementOutcome::AiFailureFallbackSuccess(enhanced)
                            }
                            Err(e) => {
                                warn!("fallback enhancement failed: {}", e);
                                exhausted(image, policy)
                            }
                        }
                    } else {
                        exhausted(image, policy)
                    }
                }
            }
        }
    }
}

fn exhausted(image: &RgbImage, policy: &EnhancementPolicy) -> EnhancementOutcome {
    if policy.skip_on_failure {
        EnhancementOutcome::Skipped(image.clone())
    } else {
        EnhancementOutcome::AllMethodsFailed
    }
}

/// Instruction text sent alongside the image to the remote capability
pub fn enhancement_prompt(has_faces: bool) -> String {
    let base = "Enhance this event photograph professionally: balanced exposure, \
                natural color, clean contrast and gentle noise reduction suitable \
                for print delivery.";
    if has_faces {
        format!(
            "{} Keep all facial features, skin texture and identity exactly as \
             captured; do not retouch, reshape or restyle any face.",
            base
        )
    } else {
        format!(
            "{} No people are present; maximize detail and vibrance across the \
             whole scene.",
            base
        )
    }
}

/// Local enhancement chain. Order is significant:
/// unsharp mask, CLAHE on luma, bilateral smoothing, saturation boost.
pub fn traditional_enhance(image: &RgbImage) -> Result<RgbImage, PipelineError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(PipelineError::EnhancementFailure);
    }

    let sharpened = unsharp_mask(image, 2.0, 1.5, -0.5);
    let contrasted = clahe_luma(&sharpened, 3.0, 8);
    let smoothed = bilateral_filter(&contrasted, 9, 75.0, 75.0);
    Ok(boost_saturation(&smoothed, 1.2))
}

/// Sharpen by blending the image against its Gaussian blur:
/// `out = image_weight * img + blur_weight * blur`, clipped.
fn unsharp_mask(image: &RgbImage, sigma: f32, image_weight: f32, blur_weight: f32) -> RgbImage {
    let blurred = gaussian_blur_f32(image, sigma);
    let mut out = RgbImage::new(image.width(), image.height());

    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let src = image.get_pixel(x, y);
        let blur = blurred.get_pixel(x, y);
        for c in 0..3 {
            let v = src[c] as f32 * image_weight + blur[c] as f32 * blur_weight;
            pixel[c] = v.round().clamp(0.0, 255.0) as u8;
        }
    }

    out
}

/// Contrast-limited adaptive histogram equalization applied to the luma
/// channel only; chroma is carried through so colors do not shift.
fn clahe_luma(image: &RgbImage, clip_limit: f32, grid: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    let pixel_count = (width * height) as usize;

    let mut luma = vec![0u8; pixel_count];
    let mut chroma = vec![(0f32, 0f32); pixel_count];

    for (i, pixel) in image.pixels().enumerate() {
        let r = pixel[0] as f32;
        let g = pixel[1] as f32;
        let b = pixel[2] as f32;
        let y = 0.299 * r + 0.587 * g + 0.114 * b;
        luma[i] = y.round().clamp(0.0, 255.0) as u8;
        chroma[i] = (b - y, r - y);
    }

    let equalized = clahe_plane(&luma, width, height, grid, clip_limit);

    let mut out = RgbImage::new(width, height);
    for (i, pixel) in out.pixels_mut().enumerate() {
        let y = equalized[i] as f32;
        let (cb, cr) = chroma[i];
        let r = y + cr;
        let b = y + cb;
        let g = y - (0.299 * cr + 0.114 * cb) / 0.587;
        pixel[0] = r.round().clamp(0.0, 255.0) as u8;
        pixel[1] = g.round().clamp(0.0, 255.0) as u8;
        pixel[2] = b.round().clamp(0.0, 255.0) as u8;
    }

    out
}

/// CLAHE on a single 8-bit plane: per-tile clipped-histogram LUTs with
/// bilinear interpolation between neighboring tile mappings.
fn clahe_plane(plane: &[u8], width: u32, height: u32, grid: u32, clip_limit: f32) -> Vec<u8> {
    let tiles = grid.max(1);
    let tile_w = width.div_ceil(tiles).max(1);
    let tile_h = height.div_ceil(tiles).max(1);
    let tiles_x = width.div_ceil(tile_w);
    let tiles_y = height.div_ceil(tile_h);

    let mut luts = vec![[0u8; 256]; (tiles_x * tiles_y) as usize];

    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(width);
            let y1 = (y0 + tile_h).min(height);

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[plane[(y * width + x) as usize] as usize] += 1;
                }
            }

            let area = ((x1 - x0) * (y1 - y0)) as u64;
            if area == 0 {
                continue;
            }

            // Clip and redistribute the excess evenly
            let clip = ((clip_limit * area as f32 / 256.0).max(1.0)) as u32;
            let mut excess: u64 = 0;
            for bin in hist.iter_mut() {
                if *bin > clip {
                    excess += (*bin - clip) as u64;
                    *bin = clip;
                }
            }
            let bonus = (excess / 256) as u32;
            for bin in hist.iter_mut() {
                *bin += bonus;
            }

            let total: u64 = hist.iter().map(|&c| c as u64).sum();
            let mut cumulative: u64 = 0;
            let lut = &mut luts[(ty * tiles_x + tx) as usize];
            for (value, &count) in hist.iter().enumerate() {
                cumulative += count as u64;
                lut[value] =
                    ((cumulative as f64 * 255.0 / total as f64).round()).min(255.0) as u8;
            }
        }
    }

    let mut out = vec![0u8; plane.len()];
    let max_tx = (tiles_x - 1) as f32;
    let max_ty = (tiles_y - 1) as f32;

    for y in 0..height {
        let gy = ((y as f32 + 0.5) / tile_h as f32 - 0.5).clamp(0.0, max_ty);
        let ty0 = gy.floor() as u32;
        let ty1 = (ty0 + 1).min(tiles_y - 1);
        let fy = gy - ty0 as f32;

        for x in 0..width {
            let gx = ((x as f32 + 0.5) / tile_w as f32 - 0.5).clamp(0.0, max_tx);
            let tx0 = gx.floor() as u32;
            let tx1 = (tx0 + 1).min(tiles_x - 1);
            let fx = gx - tx0 as f32;

            let v = plane[(y * width + x) as usize] as usize;
            let v00 = luts[(ty0 * tiles_x + tx0) as usize][v] as f32;
            let v01 = luts[(ty0 * tiles_x + tx1) as usize][v] as f32;
            let v10 = luts[(ty1 * tiles_x + tx0) as usize][v] as f32;
            let v11 = luts[(ty1 * tiles_x + tx1) as usize][v] as f32;

            let top = v00 * (1.0 - fx) + v01 * fx;
            let bottom = v10 * (1.0 - fx) + v11 * fx;
            out[(y * width + x) as usize] =
                (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
        }
    }

    out
}

/// Edge-preserving smoothing: each output pixel is the spatially and
/// photometrically weighted average of its window.
fn bilateral_filter(image: &RgbImage, window: u32, sigma_color: f32, sigma_space: f32) -> RgbImage {
    let (width, height) = image.dimensions();
    let radius = (window / 2) as i64;
    let inv_2s2_space = -1.0 / (2.0 * sigma_space * sigma_space);
    let inv_2s2_color = -1.0 / (2.0 * sigma_color * sigma_color);

    let side = (2 * radius + 1) as usize;
    let mut spatial = vec![0f32; side * side];
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let d2 = (dx * dx + dy * dy) as f32;
            spatial[((dy + radius) as usize) * side + (dx + radius) as usize] =
                (d2 * inv_2s2_space).exp();
        }
    }

    let mut out = RgbImage::new(width, height);
    for y in 0..height as i64 {
        for x in 0..width as i64 {
            let center = image.get_pixel(x as u32, y as u32);
            let mut acc = [0f32; 3];
            let mut weight_sum = 0f32;

            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    let nx = (x + dx).clamp(0, width as i64 - 1) as u32;
                    let ny = (y + dy).clamp(0, height as i64 - 1) as u32;
                    let neighbor = image.get_pixel(nx, ny);

                    let diff = (neighbor[0] as f32 - center[0] as f32).abs()
                        + (neighbor[1] as f32 - center[1] as f32).abs()
                        + (neighbor[2] as f32 - center[2] as f32).abs();
                    let w = spatial
                        [((dy + radius) as usize) * side + (dx + radius) as usize]
                        * (diff * diff * inv_2s2_color).exp();

                    for c in 0..3 {
                        acc[c] += neighbor[c] as f32 * w;
                    }
                    weight_sum += w;
                }
            }

            let pixel = out.get_pixel_mut(x as u32, y as u32);
            for c in 0..3 {
                pixel[c] = (acc[c] / weight_sum).round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    out
}

/// Multiply HSV saturation, clipped to 1.0
fn boost_saturation(image: &RgbImage, factor: f32) -> RgbImage {
    let mut out = RgbImage::new(image.width(), image.height());

    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let src = image.get_pixel(x, y);
        let (h, s, v) = rgb_to_hsv(src[0] as f32, src[1] as f32, src[2] as f32);
        let (r, g, b) = hsv_to_rgb(h, (s * factor).min(1.0), v);
        pixel[0] = r.round().clamp(0.0, 255.0) as u8;
        pixel[1] = g.round().clamp(0.0, 255.0) as u8;
        pixel[2] = b.round().clamp(0.0, 255.0) as u8;
    }

    out
}

/// Convert RGB (0-255) to HSV with hue normalized to [0, 360)
fn rgb_to_hsv(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let r = r / 255.0;
    let g = g / 255.0;
    let b = b / 255.0;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let mut h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (((g - b) / delta) % 6.0)
    } else if max == g {
        60.0 * (((b - r) / delta) + 2.0)
    } else {
        60.0 * (((r - g) / delta) + 4.0)
    };
    if h < 0.0 {
        h += 360.0;
    }

    let s = if max == 0.0 { 0.0 } else { delta / max };
    let v = max;

    (h, s, v)
}

/// Convert HSV back to RGB (0-255)
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (f32, f32, f32) {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r_prime, g_prime, b_prime) = match h as u32 {
        0..=59 => (c, x, 0.0),
        60..=119 => (x, c, 0.0),
        120..=179 => (0.0, c, x),
        180..=239 => (0.0, x, c),
        240..=299 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    (
        (r_prime + m) * 255.0,
        (g_prime + m) * 255.0,
        (b_prime + m) * 255.0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::EnhanceError;
    use image::Rgb;

    struct StubRemote {
        succeed: bool,
    }

    impl RemoteEnhancer for StubRemote {
        fn enhance(&self, image: &RgbImage, _prompt: &str) -> Result<RgbImage, EnhanceError> {
            if self.succeed {
                // Recognizably different output
                Ok(RgbImage::from_pixel(
                    image.width(),
                    image.height(),
                    Rgb([1, 2, 3]),
                ))
            } else {
                Err(EnhanceError("stub failure".to_string()))
            }
        }
    }

    fn sample_image() -> RgbImage {
        RgbImage::from_fn(16, 16, |x, y| {
            Rgb([(x * 16) as u8, (y * 16) as u8, ((x + y) * 8) as u8])
        })
    }

    #[test]
    fn test_selector_covers_every_policy_combination() {
        let modes = [
            EnhanceMode::Disabled,
            EnhanceMode::TraditionalOnly,
            EnhanceMode::AiOnly,
            EnhanceMode::AutoWithFallback,
        ];
        let image = sample_image();

        for &mode in &modes {
            for &has_faces in &[false, true] {
                for &fallback_allowed in &[false, true] {
                    for &skip_on_failure in &[false, true] {
                        for &remote_ok in &[false, true] {
                            let policy = EnhancementPolicy {
                                mode,
                                fallback_allowed,
                                skip_on_failure,
                            };
                            let remote = StubRemote { succeed: remote_ok };
                            let outcome =
                                select_enhancement(&image, has_faces, &policy, &remote);

                            let expected = match mode {
                                EnhanceMode::Disabled => "disabled",
                                EnhanceMode::TraditionalOnly => "traditional",
                                EnhanceMode::AiOnly => {
                                    if remote_ok {
                                        "ai"
                                    } else if skip_on_failure {
                                        "skipped"
                                    } else {
                                        "failed"
                                    }
                                }
                                EnhanceMode::AutoWithFallback => {
                                    if remote_ok {
                                        "ai"
                                    } else if fallback_allowed {
                                        "ai_fallback_traditional"
                                    } else if skip_on_failure {
                                        "skipped"
                                    } else {
                                        "failed"
                                    }
                                }
                            };

                            assert_eq!(
                                outcome.label(),
                                expected,
                                "mode={:?} faces={} fallback={} skip={} remote_ok={}",
                                mode,
                                has_faces,
                                fallback_allowed,
                                skip_on_failure,
                                remote_ok
                            );
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_skipped_outcome_carries_input_unchanged() {
        let image = sample_image();
        let policy = EnhancementPolicy {
            mode: EnhanceMode::AiOnly,
            fallback_allowed: false,
            skip_on_failure: true,
        };
        let outcome = select_enhancement(&image, false, &policy, &StubRemote { succeed: false });
        assert_eq!(outcome.label(), "skipped");
        assert_eq!(outcome.into_image().unwrap(), image);
    }

    #[test]
    fn test_traditional_enhance_preserves_dimensions() {
        let image = sample_image();
        let enhanced = traditional_enhance(&image).unwrap();
        assert_eq!(enhanced.dimensions(), image.dimensions());
    }

    #[test]
    fn test_traditional_enhance_rejects_empty_image() {
        let empty = RgbImage::new(0, 0);
        assert!(traditional_enhance(&empty).is_err());
    }

    #[test]
    fn test_unsharp_mask_is_identity_on_flat_image() {
        // Blur of a constant image is the same constant, so 1.5c - 0.5c = c
        let flat = RgbImage::from_pixel(20, 20, Rgb([120, 60, 200]));
        let sharpened = unsharp_mask(&flat, 2.0, 1.5, -0.5);
        assert_eq!(sharpened, flat);
    }

    #[test]
    fn test_saturation_boost_leaves_gray_pixels_gray() {
        let gray = RgbImage::from_pixel(8, 8, Rgb([128, 128, 128]));
        let boosted = boost_saturation(&gray, 1.2);
        assert_eq!(boosted, gray);
    }

    #[test]
    fn test_saturation_boost_increases_chroma() {
        let image = RgbImage::from_pixel(4, 4, Rgb([180, 100, 100]));
        let boosted = boost_saturation(&image, 1.2);
        let p = boosted.get_pixel(0, 0);
        let spread_before = 180 - 100;
        let spread_after = p[0] as i32 - p[2] as i32;
        assert!(spread_after > spread_before);
    }

    #[test]
    fn test_hsv_round_trip() {
        for &(r, g, b) in &[
            (0.0, 0.0, 0.0),
            (255.0, 255.0, 255.0),
            (255.0, 0.0, 0.0),
            (12.0, 200.0, 96.0),
            (10.0, 20.0, 250.0),
        ] {
            let (h, s, v) = rgb_to_hsv(r, g, b);
            assert!((0.0..360.0).contains(&h) || s == 0.0);
            let (r2, g2, b2) = hsv_to_rgb(h, s, v);
            assert!((r - r2).abs() < 1.0, "r {} vs {}", r, r2);
            assert!((g - g2).abs() < 1.0, "g {} vs {}", g, g2);
            assert!((b - b2).abs() < 1.0, "b {} vs {}", b, b2);
        }
    }

    #[test]
    fn test_bilateral_preserves_hard_edges() {
        // Left half black, right half white; the edge must stay sharp
        let image = RgbImage::from_fn(20, 20, |x, _| {
            if x < 10 {
                Rgb([0, 0, 0])
            } else {
                Rgb([255, 255, 255])
            }
        });
        let smoothed = bilateral_filter(&image, 9, 75.0, 75.0);
        assert!(smoothed.get_pixel(2, 10)[0] < 30);
        assert!(smoothed.get_pixel(17, 10)[0] > 225);
    }

    #[test]
    fn test_clahe_spreads_narrow_histogram() {
        // Low-contrast noise-free gradient confined to [100, 140]
        let image = RgbImage::from_fn(64, 64, |x, _| {
            let v = 100 + ((x * 40) / 64) as u8;
            Rgb([v, v, v])
        });
        let out = clahe_luma(&image, 3.0, 8);

        let (mut min, mut max) = (255u8, 0u8);
        for p in out.pixels() {
            min = min.min(p[0]);
            max = max.max(p[0]);
        }
        let spread_before = 40;
        assert!(
            (max - min) as u32 > spread_before,
            "contrast not expanded: {} -> {}",
            spread_before,
            max - min
        );
    }

    #[test]
    fn test_protection_cycle_keeps_face_pixels_near_original() {
        use crate::image_processing::face_mask::{self, FaceRegion};

        // Blocky texture so every enhancement stage has something to change
        let image = RgbImage::from_fn(160, 120, |x, y| {
            let v = if (x / 8 + y / 8) % 2 == 0 { 200 } else { 55 };
            Rgb([v, v.saturating_sub(30), v.saturating_add(20)])
        });
        let mask = face_mask::build_mask(
            160,
            120,
            &[FaceRegion {
                x: 60,
                y: 40,
                width: 40,
                height: 40,
            }],
            10,
        );

        let softened = face_mask::soften_faces(&image, &mask);
        let enhanced = traditional_enhance(&softened).unwrap();
        let protected = face_mask::restore_faces(&enhanced, &image, &mask);
        let unprotected = traditional_enhance(&image).unwrap();

        // Mean per-channel deviation from the original over the given pixels
        let deviation = |candidate: &RgbImage, keep: &dyn Fn(u32, u32) -> bool| {
            let mut sum = 0u64;
            let mut count = 0u64;
            for (x, y, p) in candidate.enumerate_pixels() {
                if keep(x, y) {
                    let o = image.get_pixel(x, y);
                    for c in 0..3 {
                        sum += (p[c] as i64 - o[c] as i64).unsigned_abs();
                        count += 1;
                    }
                }
            }
            sum as f64 / count as f64
        };

        let in_mask = |x: u32, y: u32| mask.get_pixel(x, y)[0] > 0;
        let protected_dev = deviation(&protected, &in_mask);
        let unprotected_dev = deviation(&unprotected, &in_mask);
        assert!(
            protected_dev < unprotected_dev,
            "face area not protected: {} vs {}",
            protected_dev,
            unprotected_dev
        );

        // Deep inside the ellipse the feathered blend is fully original
        let in_core = |x: u32, y: u32| (70..90).contains(&x) && (50..70).contains(&y);
        assert!(
            deviation(&protected, &in_core) <= 2.0,
            "face core drifted: {}",
            deviation(&protected, &in_core)
        );
    }

    #[test]
    fn test_prompt_mentions_face_protection_only_with_faces() {
        assert!(enhancement_prompt(true).contains("face"));
        assert!(!enhancement_prompt(false).contains("do not retouch"));
    }
}
