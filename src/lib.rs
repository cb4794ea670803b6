//! facetrack - Multi-camera Face Tracking Service
//!
//! On-premise face-recognition attendance core.
//!
//! ## Architecture (10 Components)
//!
//! 1. ConfigSource - camera inventory, thresholds, paths, watch stream
//! 2. CameraDiscovery - local device enumeration + subnet ONVIF/RTSP sweep
//! 3. CapabilityProbe - folded into discovery: open, read one frame, report
//! 4. ModelRegistry - pooled face detector and embedder sessions
//! 5. IdentityIndex - enrolled embeddings, cosine queries, binary persistence
//! 6. AttendanceRecorder - debounce, durable store, spill file
//! 7. CameraPipeline - capture -> detect -> embed -> identify -> track ->
//!    tripwire -> publish -> record, one per enabled camera
//! 8. MJPEGPublisher - bounded latest-wins preview broadcast
//! 9. FTSController - lifecycle, supervision, config diffing
//! 10. AdminAdapter - the narrow surface an HTTP layer wraps
//!
//! ## Design Principles
//!
//! - The controller owns every long-lived object; no global state
//! - Per-frame errors never kill a pipeline
//! - Every queue in the core is bounded; producers never block on viewers

pub mod admin;
pub mod attendance;
pub mod capture;
pub mod config;
pub mod controller;
pub mod discovery;
pub mod identity;
pub mod models;
pub mod pipeline;
pub mod publish;
pub mod error;

pub use error::{Error, Result};
