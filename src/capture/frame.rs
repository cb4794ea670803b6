//! Raw frame type shared by capture, pipeline, and publisher

use chrono::{DateTime, Utc};
use std::sync::Arc;

/// One captured frame, RGB8, monotonically numbered within its pipeline
#[derive(Debug, Clone)]
pub struct Frame {
    pub seq: u64,
    pub captured_at: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    /// Row-major RGB8 pixels; shared so clones are cheap
    pub pixels: Arc<Vec<u8>>,
}

impl Frame {
    /// Build a frame from raw RGB8 pixels
    pub fn from_rgb(seq: u64, width: u32, height: u32, pixels: Vec<u8>) -> Self {
        debug_assert_eq!(pixels.len(), (width * height * 3) as usize);
        Self {
            seq,
            captured_at: Utc::now(),
            width,
            height,
            pixels: Arc::new(pixels),
        }
    }

    /// Decode a JPEG buffer into a frame
    pub fn from_jpeg(seq: u64, data: &[u8]) -> crate::error::Result<Self> {
        let decoded = image::load_from_memory(data)
            .map_err(|e| crate::error::Error::Internal(format!("JPEG decode failed: {e}")))?
            .to_rgb8();
        let (width, height) = decoded.dimensions();
        Ok(Self::from_rgb(seq, width, height, decoded.into_raw()))
    }

    /// View as an image buffer for drawing and encoding
    pub fn to_image(&self) -> image::RgbImage {
        image::RgbImage::from_raw(self.width, self.height, self.pixels.as_ref().clone())
            .expect("frame buffer matches dimensions")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rgb_dimensions() {
        let frame = Frame::from_rgb(7, 4, 2, vec![0u8; 4 * 2 * 3]);
        assert_eq!(frame.seq, 7);
        assert_eq!((frame.width, frame.height), (4, 2));
    }

    #[test]
    fn test_jpeg_roundtrip() {
        let img = image::RgbImage::from_pixel(8, 8, image::Rgb([10, 200, 30]));
        let mut jpeg = Vec::new();
        let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 90);
        encoder.encode_image(&img).unwrap();

        let frame = Frame::from_jpeg(1, &jpeg).unwrap();
        assert_eq!((frame.width, frame.height), (8, 8));
    }
}
