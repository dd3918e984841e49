use image::{imageops, RgbImage, RgbaImage};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::warn;

use crate::error::PipelineError;

/// Pixels kept between the watermark and the left/right image edge
const EDGE_MARGIN: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HorizontalPosition {
    Left,
    Center,
    Right,
}

/// Watermark placement and blending, fixed at startup
#[derive(Debug, Clone, Copy)]
pub struct WatermarkSettings {
    /// Watermark width as a fraction of image width
    pub size_ratio: f32,
    pub horizontal: HorizontalPosition,
    /// Vertical center of the watermark as a fraction of image height
    pub vertical: f32,
    /// Global opacity multiplied into the asset's own alpha
    pub opacity: f32,
}

impl Default for WatermarkSettings {
    fn default() -> Self {
        Self {
            size_ratio: 0.15,
            horizontal: HorizontalPosition::Center,
            vertical: 0.85,
            opacity: 0.8,
        }
    }
}

/// Composite the watermark onto the image.
///
/// The asset is scaled to `size_ratio` of the image width (aspect preserved,
/// Lanczos), positioned per settings, clamped fully in-bounds, and alpha
/// blended with `asset alpha x opacity`.
pub fn apply_watermark(
    image: &RgbImage,
    asset: &RgbaImage,
    settings: &WatermarkSettings,
) -> RgbImage {
    let (img_w, img_h) = image.dimensions();
    let (asset_w, asset_h) = asset.dimensions();
    if img_w == 0 || img_h == 0 || asset_w == 0 || asset_h == 0 {
        return image.clone();
    }

    let wm_w = ((img_w as f32 * settings.size_ratio) as u32).clamp(1, img_w);
    let wm_h = ((wm_w as f32 * asset_h as f32 / asset_w as f32) as u32).clamp(1, img_h);

    let scaled;
    let overlay: &RgbaImage = if (wm_w, wm_h) == (asset_w, asset_h) {
        asset
    } else {
        scaled = imageops::resize(asset, wm_w, wm_h, imageops::FilterType::Lanczos3);
        &scaled
    };

    let x = match settings.horizontal {
        HorizontalPosition::Left => EDGE_MARGIN.min(img_w - wm_w),
        HorizontalPosition::Center => (img_w - wm_w) / 2,
        HorizontalPosition::Right => (img_w - wm_w).saturating_sub(EDGE_MARGIN),
    };

    let center_y = (img_h as f32 * settings.vertical) as i64;
    let y = (center_y - wm_h as i64 / 2).clamp(0, (img_h - wm_h) as i64) as u32;

    let opacity = settings.opacity.clamp(0.0, 1.0);
    let mut out = image.clone();

    for wy in 0..wm_h {
        for wx in 0..wm_w {
            let wm_pixel = overlay.get_pixel(wx, wy);
            let alpha = wm_pixel[3] as f32 / 255.0 * opacity;
            if alpha <= 0.0 {
                continue;
            }

            let target = out.get_pixel_mut(x + wx, y + wy);
            for c in 0..3 {
                let blended = target[c] as f32 * (1.0 - alpha) + wm_pixel[c] as f32 * alpha;
                target[c] = blended.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    out
}

/// Process-lifetime cache of watermark assets, keyed by path. Unreadable
/// assets are cached as absent so the error is logged once.
pub struct WatermarkCache {
    assets: Mutex<HashMap<PathBuf, Option<Arc<RgbaImage>>>>,
}

impl WatermarkCache {
    pub fn new() -> Self {
        Self {
            assets: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, path: &Path) -> Option<Arc<RgbaImage>> {
        let mut assets = match self.assets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        assets
            .entry(path.to_path_buf())
            .or_insert_with(|| match image::open(path) {
                Ok(img) => Some(Arc::new(img.to_rgba8())),
                Err(e) => {
                    warn!(
                        "watermarking disabled: {}",
                        PipelineError::WatermarkAssetUnavailable(format!(
                            "{}: {}",
                            path.display(),
                            e
                        ))
                    );
                    None
                }
            })
            .clone()
    }
}

impl Default for WatermarkCache {
    fn default() -> Self {
        Self::new()
    }
}
