use exif::{In, Reader, Tag, Value};
use image::{imageops, RgbImage};
use std::path::Path;

/// EXIF orientation values per the EXIF specification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExifOrientation {
    /// No orientation specified or undefined
    Undefined = 0,
    /// Normal orientation (0 degrees)
    TopLeft = 1,
    /// Horizontally flipped
    TopRight = 2,
    /// Rotated 180 degrees
    BottomRight = 3,
    /// Vertically flipped
    BottomLeft = 4,
    /// Rotated 90 degrees CCW + horizontally flipped
    LeftTop = 5,
    /// Rotated 90 degrees CW (portrait)
    RightTop = 6,
    /// Rotated 90 degrees CW + horizontally flipped
    RightBottom = 7,
    /// Rotated 90 degrees CCW (portrait)
    LeftBottom = 8,
}

impl From<u32> for ExifOrientation {
    fn from(value: u32) -> Self {
        match value {
            1 => ExifOrientation::TopLeft,
            2 => ExifOrientation::TopRight,
            3 => ExifOrientation::BottomRight,
            4 => ExifOrientation::BottomLeft,
            5 => ExifOrientation::LeftTop,
            6 => ExifOrientation::RightTop,
            7 => ExifOrientation::RightBottom,
            8 => ExifOrientation::LeftBottom,
            _ => ExifOrientation::Undefined,
        }
    }
}

/// Read the EXIF orientation tag from an image file.
/// Files without EXIF (or without the tag) are `Undefined`.
pub fn read_exif_orientation(image_path: &Path) -> ExifOrientation {
    let file = match std::fs::File::open(image_path) {
        Ok(f) => f,
        Err(_) => return ExifOrientation::Undefined,
    };

    let mut buf_reader = std::io::BufReader::new(file);
    let exif = match Reader::new().read_from_container(&mut buf_reader) {
        Ok(exif) => exif,
        Err(_) => return ExifOrientation::Undefined,
    };

    if let Some(field) = exif.get_field(Tag::Orientation, In::PRIMARY) {
        if let Value::Short(values) = &field.value {
            if let Some(&orientation_value) = values.first() {
                return ExifOrientation::from(orientation_value as u32);
            }
        }
    }

    ExifOrientation::Undefined
}

/// Apply the rotation/flip a given EXIF orientation calls for
pub fn apply_rotation(img: &RgbImage, orientation: ExifOrientation) -> RgbImage {
    match orientation {
        ExifOrientation::Undefined | ExifOrientation::TopLeft => img.clone(),
        ExifOrientation::TopRight => imageops::flip_horizontal(img),
        ExifOrientation::BottomRight => imageops::rotate180(img),
        ExifOrientation::BottomLeft => imageops::flip_vertical(img),
        ExifOrientation::LeftTop => {
            let rotated = imageops::rotate270(img);
            imageops::flip_horizontal(&rotated)
        }
        ExifOrientation::RightTop => imageops::rotate90(img),
        ExifOrientation::RightBottom => {
            let rotated = imageops::rotate90(img);
            imageops::flip_horizontal(&rotated)
        }
        ExifOrientation::LeftBottom => imageops::rotate270(img),
    }
}

/// Normalize a freshly loaded image to its display orientation, so every
/// later stage (crop detection included) sees upright pixels.
pub fn normalize(image_path: &Path, img: RgbImage) -> RgbImage {
    match read_exif_orientation(image_path) {
        ExifOrientation::Undefined | ExifOrientation::TopLeft => img,
        orientation => apply_rotation(&img, orientation),
    }
}
