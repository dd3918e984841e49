use image::RgbImage;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::warn;

use crate::error::PipelineError;

/// A parsed 3D lookup table from a `.cube` file.
///
/// Values are stored in the 0-255 range; files with 0-1 normalized entries
/// are scaled on load. The data stream is reshaped row-major into
/// `[r][g][b]` lattice order.
#[derive(Debug, Clone)]
pub struct CubeLut {
    size: usize,
    data: Vec<[f32; 3]>,
}

impl CubeLut {
    /// Parse `.cube` text. Comments, `TITLE` and `DOMAIN_*` lines are
    /// skipped; `LUT_3D_SIZE` is required and the data row count must be
    /// exactly size cubed.
    pub fn parse(text: &str) -> Result<Self, PipelineError> {
        let mut size: Option<usize> = None;
        let mut data: Vec<[f32; 3]> = Vec::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with("TITLE")
                || line.starts_with("DOMAIN_MIN")
                || line.starts_with("DOMAIN_MAX")
                || line.starts_with("LUT_1D_SIZE")
            {
                continue;
            }
            if let Some(rest) = line.strip_prefix("LUT_3D_SIZE") {
                let n = rest.trim().parse::<usize>().map_err(|_| {
                    PipelineError::ColorTableUnavailable(format!(
                        "bad LUT_3D_SIZE line: '{}'",
                        line
                    ))
                })?;
                if n < 2 {
                    return Err(PipelineError::ColorTableUnavailable(format!(
                        "LUT size {} too small",
                        n
                    )));
                }
                size = Some(n);
                continue;
            }

            let mut values = [0f32; 3];
            let mut count = 0;
            for part in line.split_whitespace() {
                if count == 3 {
                    count = 4;
                    break;
                }
                values[count] = part.parse::<f32>().map_err(|_| {
                    PipelineError::ColorTableUnavailable(format!(
                        "non-numeric data row: '{}'",
                        line
                    ))
                })?;
                count += 1;
            }
            if count != 3 {
                return Err(PipelineError::ColorTableUnavailable(format!(
                    "expected 3 values per data row, got: '{}'",
                    line
                )));
            }
            data.push(values);
        }

        let size = size.ok_or_else(|| {
            PipelineError::ColorTableUnavailable("missing LUT_3D_SIZE".to_string())
        })?;

        if data.len() != size * size * size {
            return Err(PipelineError::ColorTableUnavailable(format!(
                "expected {} entries for size {}, found {}",
                size * size * size,
                size,
                data.len()
            )));
        }

        // Normalized tables are scaled up to the 0-255 pixel range
        let max = data
            .iter()
            .flat_map(|v| v.iter())
            .fold(0f32, |acc, &v| acc.max(v));
        if max <= 1.0 {
            for entry in data.iter_mut() {
                for v in entry.iter_mut() {
                    *v *= 255.0;
                }
            }
        }

        Ok(Self { size, data })
    }

    pub fn from_file(path: &Path) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::ColorTableUnavailable(format!("{}: {}", path.display(), e))
        })?;
        Self::parse(&text)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    fn entry(&self, r: usize, g: usize, b: usize) -> [f32; 3] {
        self.data[(r * self.size + g) * self.size + b]
    }

    /// Grade an image through the table with trilinear interpolation, then
    /// blend against the input by `intensity`. Zero intensity returns the
    /// input pixel-for-pixel.
    pub fn apply(&self, image: &RgbImage, intensity: f32) -> RgbImage {
        if intensity <= 0.0 {
            return image.clone();
        }
        let intensity = intensity.min(1.0);
        let scale = (self.size - 1) as f32 / 255.0;

        let mut out = RgbImage::new(image.width(), image.height());
        for (x, y, pixel) in out.enumerate_pixels_mut() {
            let src = image.get_pixel(x, y);
            let graded = self.sample(src[0], src[1], src[2], scale);
            for c in 0..3 {
                let blended = src[c] as f32 * (1.0 - intensity) + graded[c] * intensity;
                pixel[c] = blended.round().clamp(0.0, 255.0) as u8;
            }
        }
        out
    }

    /// Trilinear interpolation across the 8 lattice cells surrounding the
    /// pixel, collapsing the R axis, then G, then B.
    fn sample(&self, r: u8, g: u8, b: u8, scale: f32) -> [f32; 3] {
        let max_cell = self.size - 2;

        let rf = r as f32 * scale;
        let gf = g as f32 * scale;
        let bf = b as f32 * scale;

        let ri = (rf.floor() as usize).min(max_cell);
        let gi = (gf.floor() as usize).min(max_cell);
        let bi = (bf.floor() as usize).min(max_cell);

        let fr = rf - ri as f32;
        let fg = gf - gi as f32;
        let fb = bf - bi as f32;

        let c000 = self.entry(ri, gi, bi);
        let c100 = self.entry(ri + 1, gi, bi);
        let c010 = self.entry(ri, gi + 1, bi);
        let c110 = self.entry(ri + 1, gi + 1, bi);
        let c001 = self.entry(ri, gi, bi + 1);
        let c101 = self.entry(ri + 1, gi, bi + 1);
        let c011 = self.entry(ri, gi + 1, bi + 1);
        let c111 = self.entry(ri + 1, gi + 1, bi + 1);

        let mut result = [0f32; 3];
        for c in 0..3 {
            let c00 = c000[c] * (1.0 - fr) + c100[c] * fr;
            let c10 = c010[c] * (1.0 - fr) + c110[c] * fr;
            let c01 = c001[c] * (1.0 - fr) + c101[c] * fr;
            let c11 = c011[c] * (1.0 - fr) + c111[c] * fr;

            let c0 = c00 * (1.0 - fg) + c10 * fg;
            let c1 = c01 * (1.0 - fg) + c11 * fg;

            result[c] = c0 * (1.0 - fb) + c1 * fb;
        }
        result
    }
}

/// Process-lifetime cache of parsed tables, keyed by path.
///
/// A path whose table fails to load is cached as absent so the parse error is
/// logged once, not per capture.
pub struct LutCache {
    tables: Mutex<HashMap<PathBuf, Option<Arc<CubeLut>>>>,
}

impl LutCache {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, path: &Path) -> Option<Arc<CubeLut>> {
        let mut tables = match self.tables.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tables
            .entry(path.to_path_buf())
            .or_insert_with(|| match CubeLut::from_file(path) {
                Ok(lut) => Some(Arc::new(lut)),
                Err(e) => {
                    warn!("color grading disabled: {}", e);
                    None
                }
            })
            .clone()
    }
}

impl Default for LutCache {
    fn default() -> Self {
        Self::new()
    }
}
