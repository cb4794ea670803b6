//! Capture - Camera source backends
//!
//! ## Responsibilities
//!
//! - Open a camera source from its descriptor and stream raw frames
//! - Hide the platform-specific device interface behind one contract:
//!   `open(descriptor) -> session`, `session.read(deadline) -> frame`,
//!   `session.close()`
//!
//! The default backend shells out to ffmpeg (one process per open session,
//! killed on drop) so USB/builtin devices and RTSP/ONVIF streams share a
//! single decode path. Tests plug in scripted backends through the same
//! traits.

mod ffmpeg;
mod frame;

pub use ffmpeg::FfmpegBackend;
pub use frame::Frame;

use crate::config::CameraDescriptor;
use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Open camera sources; one implementation per platform interface
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Open the source described by `descriptor`
    async fn open(&self, descriptor: &CameraDescriptor) -> Result<Box<dyn CaptureSession>>;
}

/// A live capture session on one source
#[async_trait]
pub trait CaptureSession: Send {
    /// Read the next frame; `Error::CameraReadTimeout` if `deadline` passes
    async fn read(&mut self, deadline: Duration) -> Result<Frame>;

    /// Negotiated frame dimensions
    fn dimensions(&self) -> (u32, u32);

    /// Release the source
    async fn close(&mut self);
}
