//! ArcFace-style face embedder via ONNX Runtime.
//!
//! Crops the detected face with a small margin, resizes to 112x112, and
//! extracts a 512-dimensional embedding, L2-normalized on the way out.

use super::{BBox, FaceEmbedder};
use crate::capture::Frame;
use crate::error::{Error, Result};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const EMBEDDER_INPUT_SIZE: usize = 112;
const EMBEDDER_MEAN: f32 = 127.5;
const EMBEDDER_STD: f32 = 127.5;
const EMBEDDING_DIM: usize = 512;
/// Crop margin relative to box size; gives the model some context
const CROP_MARGIN: f32 = 0.15;

/// ONNX face embedder
pub struct OnnxFaceEmbedder {
    session: Session,
}

impl OnnxFaceEmbedder {
    /// Load the embedder model from the given path
    pub fn load(model_path: &Path) -> Result<Self> {
        if !model_path.exists() {
            return Err(Error::ModelLoad(format!(
                "embedder model not found: {}",
                model_path.display()
            )));
        }

        let session = Session::builder()
            .and_then(|b| Ok(b.with_intra_threads(2)?))
            .and_then(|mut b| b.commit_from_file(model_path))
            .map_err(|e| Error::ModelLoad(format!("embedder: {e}")))?;

        tracing::info!(path = %model_path.display(), "Loaded face embedder model");

        Ok(Self { session })
    }

    /// Crop, resize, and normalize the face region into an NCHW tensor
    fn preprocess(frame: &Frame, bbox: &BBox) -> Array4<f32> {
        let margin_x = bbox.width() * CROP_MARGIN;
        let margin_y = bbox.height() * CROP_MARGIN;
        let expanded = BBox {
            x1: bbox.x1 - margin_x,
            y1: bbox.y1 - margin_y,
            x2: bbox.x2 + margin_x,
            y2: bbox.y2 + margin_y,
        }
        .clamp(frame.width, frame.height);

        let crop_w = (expanded.width() as u32).max(1);
        let crop_h = (expanded.height() as u32).max(1);

        let image = frame.to_image();
        let crop = image::imageops::crop_imm(
            &image,
            expanded.x1 as u32,
            expanded.y1 as u32,
            crop_w,
            crop_h,
        )
        .to_image();
        let resized = image::imageops::resize(
            &crop,
            EMBEDDER_INPUT_SIZE as u32,
            EMBEDDER_INPUT_SIZE as u32,
            image::imageops::FilterType::Triangle,
        );

        let size = EMBEDDER_INPUT_SIZE;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] =
                    (pixel[c] as f32 - EMBEDDER_MEAN) / EMBEDDER_STD;
            }
        }

        tensor
    }
}

impl FaceEmbedder for OnnxFaceEmbedder {
    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }

    fn embed(&mut self, frame: &Frame, bbox: &BBox) -> Result<Vec<f32>> {
        let input = Self::preprocess(frame, bbox);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())
                .map_err(|e| Error::Internal(format!("embedder input: {e}")))?])
            .map_err(|e| Error::Internal(format!("embedder inference: {e}")))?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| Error::Internal(format!("embedding extraction: {e}")))?;

        if raw.len() != EMBEDDING_DIM {
            return Err(Error::DimensionMismatch {
                expected: EMBEDDING_DIM,
                actual: raw.len(),
            });
        }

        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.iter().map(|x| x / norm).collect()
        } else {
            raw.to_vec()
        };

        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_output_shape() {
        let frame = Frame::from_rgb(1, 64, 64, vec![128u8; 64 * 64 * 3]);
        let bbox = BBox { x1: 10.0, y1: 10.0, x2: 50.0, y2: 50.0 };
        let tensor = OnnxFaceEmbedder::preprocess(&frame, &bbox);
        assert_eq!(
            tensor.shape(),
            &[1, 3, EMBEDDER_INPUT_SIZE, EMBEDDER_INPUT_SIZE]
        );
    }

    #[test]
    fn test_preprocess_normalization() {
        // Uniform 128 pixels map close to zero
        let frame = Frame::from_rgb(1, 32, 32, vec![128u8; 32 * 32 * 3]);
        let bbox = BBox { x1: 0.0, y1: 0.0, x2: 32.0, y2: 32.0 };
        let tensor = OnnxFaceEmbedder::preprocess(&frame, &bbox);
        let expected = (128.0 - EMBEDDER_MEAN) / EMBEDDER_STD;
        let val = tensor[[0, 0, 16, 16]];
        assert!((val - expected).abs() < 1e-3, "got {val}, expected {expected}");
    }

    #[test]
    fn test_preprocess_handles_edge_box() {
        // Box hanging off the frame edge must not panic
        let frame = Frame::from_rgb(1, 40, 40, vec![10u8; 40 * 40 * 3]);
        let bbox = BBox { x1: 30.0, y1: 30.0, x2: 60.0, y2: 60.0 };
        let tensor = OnnxFaceEmbedder::preprocess(&frame, &bbox);
        assert_eq!(tensor.shape()[2], EMBEDDER_INPUT_SIZE);
    }
}
