//! SCRFD-style face detector via ONNX Runtime.
//!
//! The model takes a 640x640 NCHW tensor and emits per-stride score and
//! box-distance tensors (strides 8/16/32, two anchors per cell). Decoded
//! boxes are merged with greedy NMS and mapped back to frame coordinates.

use super::{BBox, Detection, FaceDetector};
use crate::capture::Frame;
use crate::error::{Error, Result};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const DETECTOR_INPUT_SIZE: usize = 640;
const DETECTOR_MEAN: f32 = 127.5;
const DETECTOR_STD: f32 = 128.0;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;
const NMS_IOU: f32 = 0.4;

/// ONNX face detector
pub struct OnnxFaceDetector {
    session: Session,
}

impl OnnxFaceDetector {
    /// Load the detector model from the given path
    pub fn load(model_path: &Path) -> Result<Self> {
        if !model_path.exists() {
            return Err(Error::ModelLoad(format!(
                "detector model not found: {}",
                model_path.display()
            )));
        }

        let session = Session::builder()
            .and_then(|b| Ok(b.with_intra_threads(2)?))
            .and_then(|mut b| b.commit_from_file(model_path))
            .map_err(|e| Error::ModelLoad(format!("detector: {e}")))?;

        tracing::info!(path = %model_path.display(), "Loaded face detector model");

        Ok(Self { session })
    }

    /// Scale frame pixels into the square input tensor, keeping aspect ratio
    fn preprocess(frame: &Frame) -> (Array4<f32>, f32) {
        let size = DETECTOR_INPUT_SIZE;
        let scale = (size as f32 / frame.width as f32).min(size as f32 / frame.height as f32);
        let scaled_w = (frame.width as f32 * scale) as usize;
        let scaled_h = (frame.height as f32 * scale) as usize;

        let image = frame.to_image();
        let resized = image::imageops::resize(
            &image,
            scaled_w.max(1) as u32,
            scaled_h.max(1) as u32,
            image::imageops::FilterType::Triangle,
        );

        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] =
                    (pixel[c] as f32 - DETECTOR_MEAN) / DETECTOR_STD;
            }
        }

        (tensor, scale)
    }
}

impl FaceDetector for OnnxFaceDetector {
    fn detect(&mut self, frame: &Frame, threshold: f32) -> Result<Vec<Detection>> {
        let (input, scale) = Self::preprocess(frame);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())
                .map_err(|e| Error::Internal(format!("detector input: {e}")))?])
            .map_err(|e| Error::Internal(format!("detector inference: {e}")))?;

        // Per-stride outputs are published as score_{stride} / bbox_{stride}
        let mut candidates = Vec::new();
        let mut matched_any = false;
        for &stride in &STRIDES {
            let (Some(score_value), Some(bbox_value)) = (
                outputs.get(&format!("score_{stride}")),
                outputs.get(&format!("bbox_{stride}")),
            ) else {
                continue;
            };
            matched_any = true;

            let (_, scores) = score_value
                .try_extract_tensor::<f32>()
                .map_err(|e| Error::Internal(format!("detector scores: {e}")))?;
            let (_, boxes) = bbox_value
                .try_extract_tensor::<f32>()
                .map_err(|e| Error::Internal(format!("detector boxes: {e}")))?;

            decode_stride(scores, boxes, stride, threshold, &mut candidates);
        }

        if !matched_any {
            return Err(Error::Internal(
                "detector published no score_/bbox_ outputs".to_string(),
            ));
        }

        let mut detections = nms(candidates, NMS_IOU);

        // Back to frame coordinates
        for det in &mut detections {
            det.bbox = BBox {
                x1: det.bbox.x1 / scale,
                y1: det.bbox.y1 / scale,
                x2: det.bbox.x2 / scale,
                y2: det.bbox.y2 / scale,
            }
            .clamp(frame.width, frame.height);
        }

        Ok(detections)
    }
}

/// Decode one stride level: score per anchor, box as center distances
fn decode_stride(
    scores: &[f32],
    boxes: &[f32],
    stride: usize,
    threshold: f32,
    out: &mut Vec<Detection>,
) {
    let cells = DETECTOR_INPUT_SIZE / stride;
    let count = (cells * cells * ANCHORS_PER_CELL).min(scores.len());

    for idx in 0..count {
        let confidence = scores[idx];
        if confidence < threshold {
            continue;
        }
        if boxes.len() < (idx + 1) * 4 {
            break;
        }

        let cell = idx / ANCHORS_PER_CELL;
        let cx = ((cell % cells) * stride) as f32;
        let cy = ((cell / cells) * stride) as f32;

        let left = boxes[idx * 4] * stride as f32;
        let top = boxes[idx * 4 + 1] * stride as f32;
        let right = boxes[idx * 4 + 2] * stride as f32;
        let bottom = boxes[idx * 4 + 3] * stride as f32;

        out.push(Detection {
            bbox: BBox {
                x1: cx - left,
                y1: cy - top,
                x2: cx + right,
                y2: cy + bottom,
            },
            confidence,
        });
    }
}

/// Greedy non-maximum suppression, best score first
fn nms(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<Detection> = Vec::new();
    for candidate in candidates {
        if kept
            .iter()
            .all(|k| k.bbox.iou(&candidate.bbox) < iou_threshold)
        {
            kept.push(candidate);
        }
    }
    kept
}
