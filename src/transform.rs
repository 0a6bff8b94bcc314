use std::io::Cursor;
use std::path::Path;

use image::imageops::FilterType;
use image::{GenericImageView, ImageFormat, ImageReader};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("not a supported image: {0}")]
    Image(#[from] image::ImageError),
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// Largest width and height an output image may have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub max_width: u32,
    pub max_height: u32,
}

impl Bounds {
    pub fn contains(&self, width: u32, height: u32) -> bool {
        width <= self.max_width && height <= self.max_height
    }
}

#[derive(Debug, Clone)]
pub struct Transformed {
    /// Re-encoded image, `None` when the input is kept as is.
    pub bytes: Option<Vec<u8>>,
    pub width: u32,
    pub height: u32,
}

/// CPU-side image work. Called from the blocking pool.
pub trait Transform: Send + Sync {
    fn transform(&self, bytes: &[u8], bounds: Bounds) -> Result<Transformed, TransformError>;

    /// Dimensions of a file already on disk, read from its header.
    fn dimensions(&self, path: &Path) -> Option<(u32, u32)>;
}

/// Shrinks images that exceed the bounds, keeping aspect ratio and format.
pub struct ImageTransformer {
    resize: bool,
    filter: FilterType,
}

impl ImageTransformer {
    pub fn new(resize: bool) -> Self {
        Self {
            resize,
            filter: FilterType::Lanczos3,
        }
    }
}

impl Transform for ImageTransformer {
    fn transform(&self, bytes: &[u8], bounds: Bounds) -> Result<Transformed, TransformError> {
        if !self.resize {
            let (width, height) = ImageReader::new(Cursor::new(bytes))
                .with_guessed_format()?
                .into_dimensions()?;
            return Ok(Transformed {
                bytes: None,
                width,
                height,
            });
        }

        let format = image::guess_format(bytes)?;
        let img = image::load_from_memory_with_format(bytes, format)?;
        let (width, height) = img.dimensions();
        if bounds.contains(width, height) {
            return Ok(Transformed {
                bytes: None,
                width,
                height,
            });
        }

        // resize() fits inside the box and keeps the aspect ratio
        let resized = img.resize(bounds.max_width, bounds.max_height, self.filter);
        let mut out = Cursor::new(Vec::new());
        resized.write_to(&mut out, output_format(format))?;
        Ok(Transformed {
            bytes: Some(out.into_inner()),
            width: resized.width(),
            height: resized.height(),
        })
    }

    fn dimensions(&self, path: &Path) -> Option<(u32, u32)> {
        ImageReader::open(path)
            .ok()?
            .with_guessed_format()
            .ok()?
            .into_dimensions()
            .ok()
    }
}

// Formats the image crate can read but not write go out as PNG.
fn output_format(format: ImageFormat) -> ImageFormat {
    if format.writing_enabled() {
        format
    } else {
        ImageFormat::Png
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};

    pub fn png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::new(width, height));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    const BOX: Bounds = Bounds {
        max_width: 100,
        max_height: 100,
    };

    #[test]
    fn shrinks_keeping_aspect_ratio() {
        let t = ImageTransformer::new(true).transform(&png(400, 200), BOX).unwrap();
        assert_eq!((t.width, t.height), (100, 50));
        let bytes = t.bytes.unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Png);
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!(decoded.dimensions(), (100, 50));
    }

    #[test]
    fn tall_image_is_bound_by_height() {
        let t = ImageTransformer::new(true).transform(&png(50, 300), BOX).unwrap();
        assert!(t.height == 100 && t.width <= 17 && t.width >= 16, "{}x{}", t.width, t.height);
    }

    #[test]
    fn never_enlarges() {
        let t = ImageTransformer::new(true).transform(&png(40, 30), BOX).unwrap();
        assert!(t.bytes.is_none());
        assert_eq!((t.width, t.height), (40, 30));
    }

    #[test]
    fn resize_disabled_only_reads_dimensions() {
        let t = ImageTransformer::new(false).transform(&png(400, 200), BOX).unwrap();
        assert!(t.bytes.is_none());
        assert_eq!((t.width, t.height), (400, 200));
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(ImageTransformer::new(true).transform(b"<svg/>", BOX).is_err());
        assert!(ImageTransformer::new(false).transform(b"\x00\x01", BOX).is_err());
    }

    #[test]
    fn dimensions_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.png");
        std::fs::write(&path, png(7, 9)).unwrap();
        let t = ImageTransformer::new(true);
        assert_eq!(t.dimensions(&path), Some((7, 9)));
        assert_eq!(t.dimensions(&dir.path().join("missing.png")), None);
    }
}
