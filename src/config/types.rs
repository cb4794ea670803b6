//! Configuration data types
//!
//! Camera descriptors, tripwires, and the grouped threshold settings.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Full service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtsConfig {
    #[serde(default)]
    pub discovery: DiscoverySettings,
    #[serde(default)]
    pub detect: DetectSettings,
    #[serde(default)]
    pub identify: IdentifySettings,
    #[serde(default)]
    pub track: TrackSettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub recorder: RecorderSettings,
    #[serde(default)]
    pub mjpeg: MjpegSettings,
    #[serde(default)]
    pub models: ModelSettings,
    #[serde(default)]
    pub identity: IdentitySettings,
    #[serde(default = "default_shutdown_deadline")]
    pub shutdown_deadline_seconds: u64,
    /// Camera inventory; one pipeline per enabled descriptor
    #[serde(default)]
    pub cameras: Vec<CameraDescriptor>,
}

impl Default for FtsConfig {
    fn default() -> Self {
        Self {
            discovery: DiscoverySettings::default(),
            detect: DetectSettings::default(),
            identify: IdentifySettings::default(),
            track: TrackSettings::default(),
            pipeline: PipelineSettings::default(),
            recorder: RecorderSettings::default(),
            mjpeg: MjpegSettings::default(),
            models: ModelSettings::default(),
            identity: IdentitySettings::default(),
            shutdown_deadline_seconds: default_shutdown_deadline(),
            cameras: Vec::new(),
        }
    }
}

/// Camera source variants; dispatch happens at pipeline construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceKind {
    /// Built-in camera (device index 0 by convention)
    Builtin { index: u32 },
    /// USB camera by device index
    Usb { index: u32 },
    /// RTSP stream URL
    Rtsp { url: String },
    /// ONVIF device-service endpoint; resolved to an RTSP URL at open
    Onvif { endpoint: String },
}

impl SourceKind {
    /// Human-readable kind label for status and logs
    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::Builtin { .. } => "builtin",
            SourceKind::Usb { .. } => "usb",
            SourceKind::Rtsp { .. } => "rtsp",
            SourceKind::Onvif { .. } => "onvif",
        }
    }
}

/// Stream credentials for authenticated sources
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// One configured camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraDescriptor {
    /// Stable id; at most one live pipeline references it
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location: String,
    pub source: SourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub tripwires: Vec<Tripwire>,
}

impl CameraDescriptor {
    /// Descriptor for a local USB device with defaults
    pub fn usb(id: &str, index: u32) -> Self {
        Self {
            id: id.to_string(),
            name: String::new(),
            location: String::new(),
            source: SourceKind::Usb { index },
            credentials: None,
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            enabled: true,
            tripwires: Vec::new(),
        }
    }

    /// Descriptor for an RTSP stream with defaults
    pub fn rtsp(id: &str, url: &str) -> Self {
        Self {
            id: id.to_string(),
            name: String::new(),
            location: String::new(),
            source: SourceKind::Rtsp {
                url: url.to_string(),
            },
            credentials: None,
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            enabled: true,
            tripwires: Vec::new(),
        }
    }
}

/// Virtual line whose crossing emits an attendance event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tripwire {
    pub id: u32,
    pub name: String,
    pub orientation: TripwireOrientation,
    /// Normalized position along the perpendicular axis, 0.0..=1.0
    pub position: f32,
    /// Hysteresis band width; the side flips only past position +/- spacing/2
    #[serde(default = "default_spacing")]
    pub spacing: f32,
    #[serde(default)]
    pub direction: DirectionPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripwireOrientation {
    Horizontal,
    Vertical,
}

/// Which sign transitions a tripwire reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DirectionPolicy {
    /// Negative-to-positive transitions only
    Enter,
    /// Positive-to-negative transitions only
    Exit,
    /// Either transition, reported with the observed direction.
    /// `monitoring` is a legacy alias.
    #[default]
    #[serde(alias = "monitoring")]
    Both,
}

/// Network discovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySettings {
    /// CIDR to sweep; defaults to the host's primary /24 when unset
    #[serde(default)]
    pub subnet: Option<String>,
    #[serde(default = "default_discover_ports")]
    pub ports: Vec<u16>,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Device indices probed during local enumeration: 0..local_device_count
    #[serde(default = "default_local_device_count")]
    pub local_device_count: u32,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Global deadline for one discovery run
    #[serde(default = "default_discover_timeout_secs")]
    pub global_timeout_secs: u64,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            subnet: None,
            ports: default_discover_ports(),
            probe_timeout_ms: default_probe_timeout_ms(),
            local_device_count: default_local_device_count(),
            concurrency: default_concurrency(),
            global_timeout_secs: default_discover_timeout_secs(),
        }
    }
}

/// Face detection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectSettings {
    #[serde(default = "default_detect_threshold")]
    pub threshold: f32,
}

impl Default for DetectSettings {
    fn default() -> Self {
        Self {
            threshold: default_detect_threshold(),
        }
    }
}

/// Identification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifySettings {
    #[serde(default = "default_identify_threshold")]
    pub threshold: f32,
    /// Extra margin over `threshold` required to re-identify a sticky track
    #[serde(default = "default_reid_margin")]
    pub reid_margin: f32,
}

impl Default for IdentifySettings {
    fn default() -> Self {
        Self {
            threshold: default_identify_threshold(),
            reid_margin: default_reid_margin(),
        }
    }
}

/// Track association settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackSettings {
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,
    /// Frames without association before a track dies
    #[serde(default = "default_expire_frames")]
    pub expire_frames: u64,
}

impl Default for TrackSettings {
    fn default() -> Self {
        Self {
            iou_threshold: default_iou_threshold(),
            expire_frames: default_expire_frames(),
        }
    }
}

/// Per-pipeline failure policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Per-frame errors per minute before the pipeline degrades
    #[serde(default = "default_fail_threshold")]
    pub fail_threshold_per_minute: u32,
    /// Consecutive read failures before the pipeline degrades
    #[serde(default = "default_fail_streak")]
    pub fail_streak: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            fail_threshold_per_minute: default_fail_threshold(),
            fail_streak: default_fail_streak(),
        }
    }
}

/// Attendance recorder settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderSettings {
    #[serde(default = "default_debounce_window")]
    pub debounce_window_seconds: u64,
    /// Exponential backoff ceiling for store retries
    #[serde(default = "default_retry_ceiling")]
    pub retry_ceiling_secs: u64,
    #[serde(default = "default_spill_path")]
    pub spill_path: PathBuf,
    /// Optional database; events stay in memory when unset
    #[serde(default)]
    pub database_url: Option<String>,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            debounce_window_seconds: default_debounce_window(),
            retry_ceiling_secs: default_retry_ceiling(),
            spill_path: default_spill_path(),
            database_url: None,
        }
    }
}

/// MJPEG publisher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MjpegSettings {
    #[serde(default = "default_placeholder_hz")]
    pub placeholder_hz: u32,
    /// Per-subscriber buffer depth; lagging subscribers skip to the latest
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

impl Default for MjpegSettings {
    fn default() -> Self {
        Self {
            placeholder_hz: default_placeholder_hz(),
            subscriber_buffer: default_subscriber_buffer(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

/// Inference model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    #[serde(default)]
    pub detector_path: PathBuf,
    #[serde(default)]
    pub embedder_path: PathBuf,
    /// Size of the shared inference session pool
    #[serde(default = "default_inference_workers")]
    pub inference_workers: usize,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            detector_path: PathBuf::new(),
            embedder_path: PathBuf::new(),
            inference_workers: default_inference_workers(),
        }
    }
}

/// Identity index settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentitySettings {
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            index_path: default_index_path(),
        }
    }
}

fn default_shutdown_deadline() -> u64 {
    10
}
fn default_width() -> u32 {
    1280
}
fn default_height() -> u32 {
    720
}
fn default_fps() -> u32 {
    15
}
fn default_true() -> bool {
    true
}
fn default_spacing() -> f32 {
    0.01
}
fn default_discover_ports() -> Vec<u16> {
    vec![80, 554, 8080, 8554]
}
fn default_probe_timeout_ms() -> u64 {
    500
}
fn default_local_device_count() -> u32 {
    10
}
fn default_concurrency() -> usize {
    50
}
fn default_discover_timeout_secs() -> u64 {
    60
}
fn default_detect_threshold() -> f32 {
    0.5
}
fn default_identify_threshold() -> f32 {
    0.6
}
fn default_reid_margin() -> f32 {
    0.15
}
fn default_iou_threshold() -> f32 {
    0.3
}
fn default_expire_frames() -> u64 {
    30
}
fn default_fail_threshold() -> u32 {
    60
}
fn default_fail_streak() -> u32 {
    30
}
fn default_debounce_window() -> u64 {
    300
}
fn default_retry_ceiling() -> u64 {
    30
}
fn default_spill_path() -> PathBuf {
    PathBuf::from("attendance-spill.jsonl")
}
fn default_placeholder_hz() -> u32 {
    1
}
fn default_subscriber_buffer() -> usize {
    1
}
fn default_jpeg_quality() -> u8 {
    85
}
fn default_inference_workers() -> usize {
    2
}
fn default_index_path() -> PathBuf {
    PathBuf::from("identities.idx")
}
