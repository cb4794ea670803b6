//! ConfigSource - Camera inventory, thresholds, and paths
//!
//! ## Responsibilities
//!
//! - Load configuration from a JSON file with environment-variable overrides
//! - Validate required fields at load (model paths, index path, spill path)
//! - Provide an immutable snapshot plus a watch stream for hot reload
//!
//! The controller consumes the watch stream and performs the minimal set of
//! pipeline stop/start operations when descriptors change.

mod types;

pub use types::*;

use crate::error::{Error, Result};
use std::path::Path;
use tokio::sync::{watch, RwLock};

/// ConfigSource instance
pub struct ConfigSource {
    current: RwLock<FtsConfig>,
    tx: watch::Sender<FtsConfig>,
}

impl ConfigSource {
    /// Create a source from an already-validated config
    pub fn new(config: FtsConfig) -> Result<Self> {
        config.validate()?;
        let (tx, _) = watch::channel(config.clone());
        Ok(Self {
            current: RwLock::new(config),
            tx,
        })
    }

    /// Load from a JSON file, apply env overrides, validate
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await?;
        let mut config: FtsConfig = serde_json::from_str(&raw)?;
        config.apply_env_overrides();
        tracing::info!(
            path = %path.as_ref().display(),
            cameras = config.cameras.len(),
            "Configuration loaded"
        );
        Self::new(config)
    }

    /// Build a config from environment variables only (no camera inventory)
    pub fn from_env() -> Result<Self> {
        let mut config = FtsConfig::default();
        config.apply_env_overrides();
        Self::new(config)
    }

    /// Current configuration snapshot
    pub async fn snapshot(&self) -> FtsConfig {
        self.current.read().await.clone()
    }

    /// Watch stream; yields the full config on every applied change
    pub fn watch(&self) -> watch::Receiver<FtsConfig> {
        self.tx.subscribe()
    }

    /// Validate and install a new configuration, notifying watchers
    pub async fn apply(&self, config: FtsConfig) -> Result<()> {
        config.validate()?;
        {
            let mut current = self.current.write().await;
            *current = config.clone();
        }
        // No receivers is fine; the controller may not be watching yet.
        let _ = self.tx.send(config);
        tracing::info!("Configuration applied");
        Ok(())
    }
}

impl FtsConfig {
    /// Validate required fields; the error names the first offending field
    pub fn validate(&self) -> Result<()> {
        if self.models.detector_path.as_os_str().is_empty() {
            return Err(Error::ConfigInvalid("models.detector_path".to_string()));
        }
        if self.models.embedder_path.as_os_str().is_empty() {
            return Err(Error::ConfigInvalid("models.embedder_path".to_string()));
        }
        if self.models.inference_workers == 0 {
            return Err(Error::ConfigInvalid("models.inference_workers".to_string()));
        }
        if self.identity.index_path.as_os_str().is_empty() {
            return Err(Error::ConfigInvalid("identity.index_path".to_string()));
        }
        if self.recorder.spill_path.as_os_str().is_empty() {
            return Err(Error::ConfigInvalid("recorder.spill_path".to_string()));
        }
        if !(0.0..=1.0).contains(&self.detect.threshold) {
            return Err(Error::ConfigInvalid("detect.threshold".to_string()));
        }
        if !(0.0..=1.0).contains(&self.identify.threshold) {
            return Err(Error::ConfigInvalid("identify.threshold".to_string()));
        }
        if !(0.0..=1.0).contains(&self.track.iou_threshold) {
            return Err(Error::ConfigInvalid("track.iou_threshold".to_string()));
        }
        if self.mjpeg.subscriber_buffer == 0 {
            return Err(Error::ConfigInvalid("mjpeg.subscriber_buffer".to_string()));
        }
        for camera in &self.cameras {
            camera.validate()?;
        }
        Ok(())
    }

    /// Environment variables override file values
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("FTS_DETECTOR_PATH") {
            self.models.detector_path = v.into();
        }
        if let Ok(v) = std::env::var("FTS_EMBEDDER_PATH") {
            self.models.embedder_path = v.into();
        }
        if let Ok(v) = std::env::var("FTS_INDEX_PATH") {
            self.identity.index_path = v.into();
        }
        if let Ok(v) = std::env::var("FTS_SPILL_PATH") {
            self.recorder.spill_path = v.into();
        }
        if let Ok(v) = std::env::var("FTS_DATABASE_URL") {
            self.recorder.database_url = Some(v);
        }
        if let Some(v) = env_parse("FTS_DETECT_THRESHOLD") {
            self.detect.threshold = v;
        }
        if let Some(v) = env_parse("FTS_IDENTIFY_THRESHOLD") {
            self.identify.threshold = v;
        }
        if let Some(v) = env_parse("FTS_DEBOUNCE_WINDOW_SECONDS") {
            self.recorder.debounce_window_seconds = v;
        }
        if let Some(v) = env_parse("FTS_SHUTDOWN_DEADLINE_SECONDS") {
            self.shutdown_deadline_seconds = v;
        }
        if let Ok(v) = std::env::var("FTS_DISCOVER_SUBNET") {
            self.discovery.subnet = Some(v);
        }
    }
}

impl CameraDescriptor {
    /// Validate descriptor fields; the error names the offending field
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::ConfigInvalid("cameras[].id".to_string()));
        }
        if self.fps == 0 {
            return Err(Error::ConfigInvalid(format!("cameras[{}].fps", self.id)));
        }
        if let SourceKind::Rtsp { url } | SourceKind::Onvif { endpoint: url } = &self.source {
            if url.is_empty() {
                return Err(Error::ConfigInvalid(format!(
                    "cameras[{}].source",
                    self.id
                )));
            }
        }
        for tripwire in &self.tripwires {
            if !(0.0..=1.0).contains(&tripwire.position) {
                return Err(Error::ConfigInvalid(format!(
                    "cameras[{}].tripwires[{}].position",
                    self.id, tripwire.id
                )));
            }
            if !(0.0..=1.0).contains(&tripwire.spacing) {
                return Err(Error::ConfigInvalid(format!(
                    "cameras[{}].tripwires[{}].spacing",
                    self.id, tripwire.id
                )));
            }
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
