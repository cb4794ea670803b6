//! Shared test doubles: scripted capture backend and inference engines.
//!
//! A `Script` maps frame sequence numbers to the faces (box + embedding)
//! the stub detector and embedder report, so scenarios control exactly
//! what the pipeline sees without any model files or cameras.

use async_trait::async_trait;
use facetrack::capture::{CaptureBackend, CaptureSession, Frame};
use facetrack::config::{CameraDescriptor, ConfigSource, FtsConfig, ModelSettings};
use facetrack::controller::{FtsController, ModelLoader};
use facetrack::error::{Error, Result};
use facetrack::models::{BBox, Detection, FaceDetector, FaceEmbedder, ModelRegistry};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const DIM: usize = 4;

/// Faces per frame sequence number
#[derive(Default)]
pub struct Script {
    pub faces: HashMap<u64, Vec<(BBox, Vec<f32>)>>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_face(mut self, seq: u64, bbox: BBox, embedding: Vec<f32>) -> Self {
        self.faces.entry(seq).or_default().push((bbox, embedding));
        self
    }
}

pub struct ScriptedDetector {
    pub script: Arc<Script>,
}

impl FaceDetector for ScriptedDetector {
    fn detect(&mut self, frame: &Frame, threshold: f32) -> Result<Vec<Detection>> {
        let confidence = 0.99;
        if confidence < threshold {
            return Ok(Vec::new());
        }
        Ok(self
            .script
            .faces
            .get(&frame.seq)
            .map(|faces| {
                faces
                    .iter()
                    .map(|(bbox, _)| Detection {
                        bbox: *bbox,
                        confidence,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

pub struct ScriptedEmbedder {
    pub script: Arc<Script>,
}

impl FaceEmbedder for ScriptedEmbedder {
    fn dimension(&self) -> usize {
        DIM
    }

    fn embed(&mut self, frame: &Frame, bbox: &BBox) -> Result<Vec<f32>> {
        let faces = self
            .script
            .faces
            .get(&frame.seq)
            .ok_or_else(|| Error::Internal(format!("no scripted face for seq {}", frame.seq)))?;

        // Closest scripted face to the requested box
        faces
            .iter()
            .min_by(|a, b| {
                let da = (a.0.x1 - bbox.x1).abs();
                let db = (b.0.x1 - bbox.x1).abs();
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(_, embedding)| embedding.clone())
            .ok_or_else(|| Error::Internal("empty face list".to_string()))
    }
}

/// Model loader wiring the scripted engines into a registry
pub fn scripted_loader(script: Arc<Script>) -> ModelLoader {
    Arc::new(move |_settings: &ModelSettings| {
        Ok(ModelRegistry::from_engines(
            vec![Box::new(ScriptedDetector {
                script: script.clone(),
            })],
            vec![Box::new(ScriptedEmbedder {
                script: script.clone(),
            })],
        ))
    })
}

/// Capture backend emitting synthetic frames on a fixed cadence
pub struct StubBackend {
    pub frames: u64,
    pub width: u32,
    pub height: u32,
    pub interval: Duration,
    /// Open calls fail while this is positive (per backend, not per camera)
    pub fail_opens: AtomicU32,
    opens: Mutex<HashMap<String, u32>>,
}

impl StubBackend {
    pub fn new(frames: u64, width: u32, height: u32, interval: Duration) -> Self {
        Self {
            frames,
            width,
            height,
            interval,
            fail_opens: AtomicU32::new(0),
            opens: Mutex::new(HashMap::new()),
        }
    }

    pub fn always_failing(width: u32, height: u32) -> Self {
        let backend = Self::new(0, width, height, Duration::from_millis(10));
        backend.fail_opens.store(u32::MAX, Ordering::Relaxed);
        backend
    }

    /// How many times `open` ran for one camera id
    pub fn open_count(&self, camera_id: &str) -> u32 {
        self.opens
            .lock()
            .unwrap()
            .get(camera_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl CaptureBackend for StubBackend {
    async fn open(&self, descriptor: &CameraDescriptor) -> Result<Box<dyn CaptureSession>> {
        *self
            .opens
            .lock()
            .unwrap()
            .entry(descriptor.id.clone())
            .or_insert(0) += 1;

        let remaining = self.fail_opens.load(Ordering::Relaxed);
        if remaining > 0 {
            if remaining != u32::MAX {
                self.fail_opens.store(remaining - 1, Ordering::Relaxed);
            }
            return Err(Error::CameraOpen("stub source unreachable".to_string()));
        }

        Ok(Box::new(StubSession {
            seq: 0,
            max: self.frames,
            width: self.width,
            height: self.height,
            interval: self.interval,
        }))
    }
}

pub struct StubSession {
    seq: u64,
    max: u64,
    width: u32,
    height: u32,
    interval: Duration,
}

#[async_trait]
impl CaptureSession for StubSession {
    async fn read(&mut self, _deadline: Duration) -> Result<Frame> {
        if self.seq >= self.max {
            // Source idles once the script runs out; shutdown cancels us
            futures::future::pending::<()>().await;
        }
        tokio::time::sleep(self.interval).await;
        self.seq += 1;
        Ok(Frame::from_rgb(
            self.seq,
            self.width,
            self.height,
            vec![40u8; (self.width * self.height * 3) as usize],
        ))
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    async fn close(&mut self) {}
}

/// Base config pointing every path into `dir`
pub fn test_config(dir: &std::path::Path) -> FtsConfig {
    let mut config = FtsConfig::default();
    config.models.detector_path = "stub-detector.onnx".into();
    config.models.embedder_path = "stub-embedder.onnx".into();
    config.identity.index_path = dir.join("identities.idx");
    config.recorder.spill_path = dir.join("spill.jsonl");
    config.recorder.retry_ceiling_secs = 1;
    config.shutdown_deadline_seconds = 5;
    config.mjpeg.placeholder_hz = 5;
    config.mjpeg.subscriber_buffer = 4;
    config
}

/// Controller wired to the stubs
pub fn controller_with(
    config: FtsConfig,
    backend: Arc<StubBackend>,
    script: Arc<Script>,
) -> Arc<FtsController> {
    let source = Arc::new(ConfigSource::new(config).expect("test config must validate"));
    FtsController::with_components(source, backend, scripted_loader(script))
}

/// Poll until `check` passes or the timeout elapses
pub async fn wait_for<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

/// Encode a small solid image as JPEG (enrollment input)
pub fn sample_jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([120, 110, 100]));
    let mut jpeg = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 90);
    encoder.encode_image(&img).unwrap();
    jpeg
}
