//! MJPEGPublisher - Per-camera bounded frame broadcaster
//!
//! ## Responsibilities
//!
//! - Broadcast JPEG frames to zero or more viewers; a lagging viewer skips
//!   to the latest frame instead of blocking producers
//! - Encode lazily: with no subscribers no overlay or JPEG work happens
//! - Emit a synthesized "NO SIGNAL" placeholder at a steady rate while the
//!   pipeline produces nothing, so viewers always see progress
//!
//! `subscribe()` yields a `multipart/x-mixed-replace` byte stream ready
//! for any HTTP layer to serve.

use crate::capture::Frame;
use crate::config::{MjpegSettings, Tripwire};
use crate::pipeline::overlay;
use crate::pipeline::tracker::Track;
use bytes::Bytes;
use futures::Stream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

/// Multipart boundary between frames
pub const MJPEG_BOUNDARY: &str = "frame";

/// One encoded frame ready for broadcast
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub jpeg: Bytes,
    pub seq: u64,
}

/// FramePublisher instance, one per pipeline
pub struct FramePublisher {
    camera_id: String,
    tx: broadcast::Sender<EncodedFrame>,
    quality: u8,
    placeholder_interval: Duration,
    width: u32,
    height: u32,
    last_publish: Mutex<Option<Instant>>,
    status_text: Mutex<String>,
    published_total: AtomicU64,
}

impl FramePublisher {
    pub fn new(camera_id: &str, settings: &MjpegSettings, width: u32, height: u32) -> Self {
        let (tx, _) = broadcast::channel(settings.subscriber_buffer.max(1));
        Self {
            camera_id: camera_id.to_string(),
            tx,
            quality: settings.jpeg_quality,
            placeholder_interval: Duration::from_secs_f64(
                1.0 / settings.placeholder_hz.max(1) as f64,
            ),
            width,
            height,
            last_publish: Mutex::new(None),
            status_text: Mutex::new("NO SIGNAL".to_string()),
            published_total: AtomicU64::new(0),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Frames handed to subscribers so far (placeholder frames included)
    pub fn published_total(&self) -> u64 {
        self.published_total.load(Ordering::Relaxed)
    }

    /// Message shown on placeholder frames while the source is down
    pub fn set_status_text(&self, text: &str) {
        *self.status_text.lock().unwrap() = text.to_string();
    }

    /// Publish an annotated live frame. Overlay drawing and JPEG encoding
    /// only run when at least one subscriber is connected.
    pub fn publish_annotated(&self, frame: &Frame, tracks: &[Track], tripwires: &[Tripwire]) {
        self.mark_publish();
        self.published_total.fetch_add(1, Ordering::Relaxed);

        if self.tx.receiver_count() == 0 {
            return;
        }

        let mut img = frame.to_image();
        overlay::draw_overlays(&mut img, tracks, tripwires);
        match overlay::encode_jpeg(&img, self.quality) {
            Ok(jpeg) => {
                let _ = self.tx.send(EncodedFrame {
                    jpeg,
                    seq: frame.seq,
                });
            }
            Err(e) => {
                tracing::warn!(camera_id = %self.camera_id, error = %e, "Frame encode failed");
            }
        }
    }

    /// Publish a synthesized frame carrying `message` (capture failures)
    pub fn publish_message_frame(&self, message: &str) {
        self.set_status_text(message);
        self.mark_publish();
        self.published_total.fetch_add(1, Ordering::Relaxed);

        if self.tx.receiver_count() == 0 {
            return;
        }

        let img = overlay::placeholder_image(self.width, self.height, message);
        if let Ok(jpeg) = overlay::encode_jpeg(&img, self.quality) {
            let _ = self.tx.send(EncodedFrame { jpeg, seq: 0 });
        }
    }

    /// Subscribe; the first frame received is the next one produced
    pub fn subscribe(&self) -> MjpegSubscriber {
        tracing::info!(
            camera_id = %self.camera_id,
            subscribers = self.tx.receiver_count() + 1,
            "MJPEG subscriber connected"
        );
        MjpegSubscriber {
            rx: self.tx.subscribe(),
        }
    }

    /// Emit placeholders whenever the pipeline stays silent for one
    /// placeholder interval. Runs until `cancel` fires.
    pub async fn run_placeholder_loop(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.placeholder_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = cancel.cancelled() => break,
            }

            let stale = {
                let last = self.last_publish.lock().unwrap();
                match *last {
                    Some(at) => at.elapsed() >= self.placeholder_interval,
                    None => true,
                }
            };

            if stale {
                let message = self.status_text.lock().unwrap().clone();
                self.publish_message_frame(&message);
            }
        }
    }

    fn mark_publish(&self) {
        *self.last_publish.lock().unwrap() = Some(Instant::now());
    }
}

/// A subscriber to one camera's MJPEG stream
pub struct MjpegSubscriber {
    rx: broadcast::Receiver<EncodedFrame>,
}

impl MjpegSubscriber {
    /// Content type for the multipart stream
    pub fn content_type() -> String {
        format!("multipart/x-mixed-replace; boundary={MJPEG_BOUNDARY}")
    }

    /// Receive the next frame; lagged receivers skip to the latest
    pub async fn recv(&mut self) -> Option<EncodedFrame> {
        loop {
            match self.rx.recv().await {
                Ok(frame) => return Some(frame),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "MJPEG subscriber lagged; resuming at latest");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Byte stream of multipart parts, one per frame
    pub fn into_byte_stream(self) -> impl Stream<Item = Bytes> {
        BroadcastStream::new(self.rx).filter_map(|result| match result {
            Ok(frame) => Some(format_part(&frame.jpeg)),
            // Lagged receivers resume at the next frame
            Err(_) => None,
        })
    }
}

/// Wrap one JPEG as a multipart part with its headers
pub fn format_part(jpeg: &Bytes) -> Bytes {
    let header = format!(
        "--{MJPEG_BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    );
    let mut bytes = Vec::with_capacity(header.len() + jpeg.len() + 2);
    bytes.extend_from_slice(header.as_bytes());
    bytes.extend_from_slice(jpeg);
    bytes.extend_from_slice(b"\r\n");
    Bytes::from(bytes)
}
