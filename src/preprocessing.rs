//! Upload validation and decoding into a canonical RGB pixel array.
//!
//! Resizing is left to [`crate::transform`] so every prediction goes through a
//! single resize/normalize path.

use std::io::Cursor;

use image::io::Reader;
use image::{DynamicImage, ImageFormat, RgbImage};
use tracing::debug;

use crate::error::{ImageDecodeError, ValidationError};

/// Maximum upload size (10 MiB)
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
pub const MIN_DIMENSION: u32 = 50;
pub const MAX_DIMENSION: u32 = 5000;

/// Header-level facts about an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub format: Option<ImageFormat>,
    pub size_bytes: usize,
}

/// Checks size and dimension bounds, reading only the image header.
pub fn check(image_data: &[u8]) -> Result<ImageInfo, ValidationError> {
    if image_data.len() > MAX_UPLOAD_BYTES {
        return Err(ValidationError::TooLarge(image_data.len(), MAX_UPLOAD_BYTES));
    }

    let reader = Reader::new(Cursor::new(image_data))
        .with_guessed_format()
        .map_err(|_| ValidationError::Undecodable)?;
    let format = reader.format();
    let (width, height) = reader
        .into_dimensions()
        .map_err(|_| ValidationError::Undecodable)?;

    if width < MIN_DIMENSION || height < MIN_DIMENSION {
        return Err(ValidationError::TooSmall {
            width,
            height,
            min: MIN_DIMENSION,
        });
    }
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(ValidationError::TooBig {
            width,
            height,
            max: MAX_DIMENSION,
        });
    }

    Ok(ImageInfo {
        width,
        height,
        format,
        size_bytes: image_data.len(),
    })
}

pub fn validate(image_data: &[u8]) -> bool {
    check(image_data).is_ok()
}

/// Decodes the upload, applies its EXIF orientation and converts it to RGB.
pub fn preprocess(image_data: &[u8]) -> Result<RgbImage, ImageDecodeError> {
    if image_data.is_empty() {
        return Err(ImageDecodeError::Empty);
    }

    let img = image::load_from_memory(image_data)?;
    let orientation = read_exif_orientation(image_data);
    let rgb = apply_orientation(img, orientation).to_rgb8();

    debug!(
        "Image preprocessed: {}x{} (orientation {})",
        rgb.width(),
        rgb.height(),
        orientation
    );
    Ok(rgb)
}

/// EXIF tag 0x0112. Returns 1 (normal) when there is no EXIF data.
pub fn read_exif_orientation(image_data: &[u8]) -> u32 {
    let mut cursor = Cursor::new(image_data);
    let exif = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(exif) => exif,
        Err(_) => return 1,
    };

    exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
        .unwrap_or(1)
}

/// 1 = normal, 2 = mirrored, 3 = 180, 4 = flipped, 5 = mirrored + 90 CW,
/// 6 = 90 CW, 7 = mirrored + 270 CW, 8 = 270 CW.
pub fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageOutputFormat, Luma, Rgb};

    fn encode(img: DynamicImage, format: ImageOutputFormat) -> Vec<u8> {
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), format).unwrap();
        bytes
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        encode(DynamicImage::ImageRgb8(img), ImageOutputFormat::Png)
    }

    fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([40, 160, 60]));
        encode(DynamicImage::ImageRgb8(img), ImageOutputFormat::Jpeg(90))
    }

    /// Splices an APP1 segment carrying only the orientation tag after SOI.
    fn with_orientation(jpeg: &[u8], orientation: u8) -> Vec<u8> {
        let app1: [u8; 36] = [
            0xFF, 0xE1, 0x00, 0x22, // APP1, length 34
            b'E', b'x', b'i', b'f', 0x00, 0x00, // Exif header
            0x49, 0x49, 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00, // little-endian TIFF, IFD0 at 8
            0x01, 0x00, // one entry
            0x12, 0x01, 0x03, 0x00, 0x01, 0x00, 0x00, 0x00, orientation, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, // no next IFD
        ];
        let mut out = jpeg[..2].to_vec();
        out.extend_from_slice(&app1);
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    #[test]
    fn accepts_well_formed_jpeg() {
        let bytes = jpeg(224, 224);
        assert!(validate(&bytes));

        let info = check(&bytes).unwrap();
        assert_eq!((info.width, info.height), (224, 224));
        assert_eq!(info.format, Some(ImageFormat::Jpeg));
    }

    #[test]
    fn rejects_tiny_images() {
        assert!(!validate(&png(1, 1)));
        assert_eq!(
            check(&png(49, 200)),
            Err(ValidationError::TooSmall {
                width: 49,
                height: 200,
                min: MIN_DIMENSION
            })
        );
        assert!(validate(&png(50, 50)));
    }

    #[test]
    fn rejects_oversized_dimensions() {
        assert!(matches!(
            check(&png(5001, 60)),
            Err(ValidationError::TooBig { width: 5001, .. })
        ));
    }

    #[test]
    fn rejects_oversized_payload() {
        let bytes = vec![0u8; MAX_UPLOAD_BYTES + 1];
        assert_eq!(
            check(&bytes),
            Err(ValidationError::TooLarge(MAX_UPLOAD_BYTES + 1, MAX_UPLOAD_BYTES))
        );
    }

    #[test]
    fn rejects_garbage_without_panicking() {
        assert!(!validate(b"not an image"));
        assert!(!validate(&[]));
        assert!(matches!(preprocess(&[]), Err(ImageDecodeError::Empty)));
        assert!(matches!(
            preprocess(b"not an image"),
            Err(ImageDecodeError::Decode(_))
        ));
    }

    #[test]
    fn preprocess_is_deterministic_and_unresized() {
        let bytes = png(300, 120);
        let first = preprocess(&bytes).unwrap();
        let second = preprocess(&bytes).unwrap();
        assert_eq!(first.dimensions(), (300, 120));
        assert_eq!(first, second);
    }

    #[test]
    fn grayscale_becomes_rgb() {
        let gray = image::GrayImage::from_pixel(64, 64, Luma([77]));
        let bytes = encode(DynamicImage::ImageLuma8(gray), ImageOutputFormat::Png);
        let rgb = preprocess(&bytes).unwrap();
        assert_eq!(rgb.get_pixel(10, 10), &Rgb([77, 77, 77]));
    }

    #[test]
    fn exif_orientation_is_applied() {
        let bytes = with_orientation(&jpeg(60, 100), 6);
        assert_eq!(read_exif_orientation(&bytes), 6);
        assert!(validate(&bytes));

        let rgb = preprocess(&bytes).unwrap();
        assert_eq!(rgb.dimensions(), (100, 60));
    }

    #[test]
    fn missing_exif_is_identity() {
        assert_eq!(read_exif_orientation(&png(60, 60)), 1);
    }

    #[test]
    fn orientation_transforms() {
        let img = || DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 20, Rgb([1, 2, 3])));
        for (orientation, dims) in [
            (1, (10, 20)),
            (2, (10, 20)),
            (3, (10, 20)),
            (4, (10, 20)),
            (5, (20, 10)),
            (6, (20, 10)),
            (7, (20, 10)),
            (8, (20, 10)),
            (99, (10, 20)),
        ] {
            let out = apply_orientation(img(), orientation);
            assert_eq!((out.width(), out.height()), dims, "orientation {}", orientation);
        }
    }
}
