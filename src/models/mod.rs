//! ModelRegistry - Shared face detection and embedding engines
//!
//! ## Responsibilities
//!
//! - Load the face detector and the embedding extractor once per process
//! - Share them across all pipelines through a fixed-size session pool
//!   (ONNX sessions are not thread-safe; inference runs on blocking tasks)
//!
//! The engines are opaque: pipelines talk to the `FaceDetector` and
//! `FaceEmbedder` traits, so tests substitute scripted implementations.

mod detector;
mod embedder;
mod pool;

pub use detector::OnnxFaceDetector;
pub use embedder::OnnxFaceEmbedder;
pub use pool::EnginePool;

use crate::capture::Frame;
use crate::config::ModelSettings;
use crate::error::Result;
use std::sync::Arc;

/// Axis-aligned box in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Intersection over union with another box
    pub fn iou(&self, other: &BBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) * (y2 - y1);
        let union = self.area() + other.area() - intersection;

        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }

    /// Clamp to image bounds
    pub fn clamp(&self, width: u32, height: u32) -> BBox {
        BBox {
            x1: self.x1.clamp(0.0, width as f32),
            y1: self.y1.clamp(0.0, height as f32),
            x2: self.x2.clamp(0.0, width as f32),
            y2: self.y2.clamp(0.0, height as f32),
        }
    }
}

/// One detected face
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: BBox,
    pub confidence: f32,
}

/// Face detection engine contract
pub trait FaceDetector: Send {
    /// Detect faces scoring at least `threshold`, best-first
    fn detect(&mut self, frame: &Frame, threshold: f32) -> Result<Vec<Detection>>;
}

/// Face embedding engine contract
pub trait FaceEmbedder: Send {
    /// Embedding dimension D
    fn dimension(&self) -> usize;

    /// Extract a unit-norm D-dimensional embedding for a face crop
    fn embed(&mut self, frame: &Frame, bbox: &BBox) -> Result<Vec<f32>>;
}

/// Shared registry holding the pooled engines
pub struct ModelRegistry {
    detectors: EnginePool<dyn FaceDetector>,
    embedders: EnginePool<dyn FaceEmbedder>,
    dimension: usize,
}

impl ModelRegistry {
    /// Load both ONNX models, one session per inference worker
    pub fn load(settings: &ModelSettings) -> Result<Arc<Self>> {
        let workers = settings.inference_workers.max(1);

        let mut detectors: Vec<Box<dyn FaceDetector>> = Vec::with_capacity(workers);
        let mut embedders: Vec<Box<dyn FaceEmbedder>> = Vec::with_capacity(workers);
        for _ in 0..workers {
            detectors.push(Box::new(OnnxFaceDetector::load(&settings.detector_path)?));
            embedders.push(Box::new(OnnxFaceEmbedder::load(&settings.embedder_path)?));
        }

        let dimension = embedders[0].dimension();
        tracing::info!(
            detector = %settings.detector_path.display(),
            embedder = %settings.embedder_path.display(),
            workers,
            dimension,
            "Models loaded"
        );

        Ok(Arc::new(Self {
            detectors: EnginePool::new(detectors),
            embedders: EnginePool::new(embedders),
            dimension,
        }))
    }

    /// Build a registry from caller-supplied engines (tests, alternates)
    pub fn from_engines(
        detectors: Vec<Box<dyn FaceDetector>>,
        embedders: Vec<Box<dyn FaceEmbedder>>,
    ) -> Arc<Self> {
        let dimension = embedders
            .first()
            .map(|e| e.dimension())
            .unwrap_or_default();
        Arc::new(Self {
            detectors: EnginePool::new(detectors),
            embedders: EnginePool::new(embedders),
            dimension,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Run face detection on a pooled engine
    pub async fn detect(&self, frame: &Frame, threshold: f32) -> Result<Vec<Detection>> {
        let frame = frame.clone();
        self.detectors
            .run(move |detector| detector.detect(&frame, threshold))
            .await
    }

    /// Extract an embedding on a pooled engine
    pub async fn embed(&self, frame: &Frame, bbox: BBox) -> Result<Vec<f32>> {
        let frame = frame.clone();
        self.embedders
            .run(move |embedder| embedder.embed(&frame, &bbox))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou_disjoint() {
        let a = BBox { x1: 0.0, y1: 0.0, x2: 10.0, y2: 10.0 };
        let b = BBox { x1: 20.0, y1: 20.0, x2: 30.0, y2: 30.0 };
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_iou_identical() {
        let a = BBox { x1: 0.0, y1: 0.0, x2: 10.0, y2: 10.0 };
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = BBox { x1: 0.0, y1: 0.0, x2: 10.0, y2: 10.0 };
        let b = BBox { x1: 5.0, y1: 0.0, x2: 15.0, y2: 10.0 };
        // intersection 50, union 150
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_clamp_bounds() {
        let b = BBox { x1: -5.0, y1: -5.0, x2: 700.0, y2: 500.0 };
        let clamped = b.clamp(640, 480);
        assert_eq!(clamped.x1, 0.0);
        assert_eq!(clamped.x2, 640.0);
        assert_eq!(clamped.y2, 480.0);
    }
}
