//! FTSController - Lifecycle owner for the Face Tracking Service
//!
//! ## Responsibilities
//!
//! - Start: load models, restore the identity index, connect the
//!   attendance store, spawn one pipeline per enabled descriptor
//! - Stop: cancel every pipeline, await the drain up to the shutdown
//!   deadline, escalate to abort
//! - ApplyConfig: diff descriptors and perform the minimal pipeline
//!   stop/start set
//! - Aggregate status: per-pipeline state and counters, identity count,
//!   uptime, host CPU/memory
//!
//! The controller owns every long-lived object; discarding it discards
//! all pipelines, workers, and models. Lifecycle transitions are
//! serialized, so concurrent Start calls yield exactly one start.

use crate::attendance::{AttendanceRecorder, AttendanceStore, MemoryStore, SqliteStore};
use crate::capture::{CaptureBackend, FfmpegBackend};
use crate::config::{CameraDescriptor, ConfigSource, FtsConfig, ModelSettings};
use crate::discovery::{CameraDiscovery, DiscoveredCamera};
use crate::error::{Error, Result};
use crate::identity::IdentityIndex;
use crate::models::ModelRegistry;
use crate::pipeline::{
    CameraPipeline, LiveFace, PipelineDeps, PipelineHandle, PipelineSnapshot,
};
use crate::publish::MjpegSubscriber;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

/// Result of an idempotent lifecycle call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOutcome {
    Started,
    AlreadyRunning,
    Stopped,
    NotRunning,
}

impl LifecycleOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            LifecycleOutcome::Started => "Face tracking service started",
            LifecycleOutcome::AlreadyRunning => "Face tracking service is already running",
            LifecycleOutcome::Stopped => "Face tracking service stopped",
            LifecycleOutcome::NotRunning => "Face tracking service is not running",
        }
    }
}

/// Aggregated service status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtsStatus {
    pub running: bool,
    pub uptime_s: u64,
    pub cameras: Vec<PipelineSnapshot>,
    pub identities: usize,
    pub store_healthy: bool,
    pub cpu_percent: f32,
    pub memory_percent: f32,
}

/// Pluggable model loading, so tests run without ONNX files
pub type ModelLoader =
    Arc<dyn Fn(&ModelSettings) -> Result<Arc<ModelRegistry>> + Send + Sync>;

/// Everything alive only while the service runs
struct RunningCore {
    config: FtsConfig,
    models: Arc<ModelRegistry>,
    index: Arc<IdentityIndex>,
    recorder: Arc<AttendanceRecorder>,
    pipelines: HashMap<String, PipelineHandle>,
    started_at: Instant,
}

/// FTSController instance
pub struct FtsController {
    config_source: Arc<ConfigSource>,
    backend: Arc<dyn CaptureBackend>,
    loader: ModelLoader,
    /// Serializes start/stop/restart/apply_config
    lifecycle: Mutex<()>,
    core: RwLock<Option<RunningCore>>,
    system: std::sync::Mutex<sysinfo::System>,
}

impl FtsController {
    /// Production wiring: ffmpeg capture, ONNX model loading
    pub fn new(config_source: Arc<ConfigSource>) -> Arc<Self> {
        Self::with_components(
            config_source,
            Arc::new(FfmpegBackend::new()),
            Arc::new(|settings: &ModelSettings| ModelRegistry::load(settings)),
        )
    }

    /// Custom capture backend and model loader (tests, alternate stacks)
    pub fn with_components(
        config_source: Arc<ConfigSource>,
        backend: Arc<dyn CaptureBackend>,
        loader: ModelLoader,
    ) -> Arc<Self> {
        Arc::new(Self {
            config_source,
            backend,
            loader,
            lifecycle: Mutex::new(()),
            core: RwLock::new(None),
            system: std::sync::Mutex::new(sysinfo::System::new()),
        })
    }

    pub async fn is_running(&self) -> bool {
        self.core.read().await.is_some()
    }

    /// Start the service. Idempotent: a second call reports
    /// `AlreadyRunning` without side effects.
    pub async fn start(&self) -> Result<LifecycleOutcome> {
        let _guard = self.lifecycle.lock().await;

        if self.core.read().await.is_some() {
            return Ok(LifecycleOutcome::AlreadyRunning);
        }

        let config = self.config_source.snapshot().await;

        let models = (self.loader)(&config.models)?;

        let index_path = &config.identity.index_path;
        let index = if index_path.exists() {
            Arc::new(IdentityIndex::load(index_path, models.dimension())?)
        } else {
            Arc::new(IdentityIndex::new(models.dimension()))
        };

        let store: Arc<dyn AttendanceStore> = match &config.recorder.database_url {
            Some(url) => Arc::new(SqliteStore::connect(url).await?),
            None => Arc::new(MemoryStore::new()),
        };
        let recorder = Arc::new(AttendanceRecorder::new(
            store,
            Duration::from_secs(config.recorder.debounce_window_seconds),
            Duration::from_secs(config.recorder.retry_ceiling_secs),
            config.recorder.spill_path.clone(),
        ));

        let deps = PipelineDeps {
            backend: self.backend.clone(),
            models: models.clone(),
            index: index.clone(),
            recorder: recorder.clone(),
        };

        let mut pipelines = HashMap::new();
        for descriptor in config.cameras.iter().filter(|c| c.enabled) {
            let handle = CameraPipeline::spawn(descriptor.clone(), &config, deps.clone());
            pipelines.insert(descriptor.id.clone(), handle);
        }

        tracing::info!(
            cameras = pipelines.len(),
            identities = index.len().await,
            "Face tracking service started"
        );

        *self.core.write().await = Some(RunningCore {
            config,
            models,
            index,
            recorder,
            pipelines,
            started_at: Instant::now(),
        });

        Ok(LifecycleOutcome::Started)
    }

    /// Stop the service. Idempotent: a second call reports `NotRunning`.
    pub async fn stop(&self) -> Result<LifecycleOutcome> {
        let _guard = self.lifecycle.lock().await;
        self.stop_locked().await
    }

    async fn stop_locked(&self) -> Result<LifecycleOutcome> {
        let Some(core) = self.core.write().await.take() else {
            return Ok(LifecycleOutcome::NotRunning);
        };

        let deadline = Duration::from_secs(core.config.shutdown_deadline_seconds);
        let shutdowns = core
            .pipelines
            .into_values()
            .map(|handle| handle.shutdown(deadline));
        let results = futures::future::join_all(shutdowns).await;

        if let Err(e) = core.index.persist(&core.config.identity.index_path).await {
            tracing::warn!(error = %e, "Identity index persist on stop failed");
        }

        let clean = results.iter().all(|c| *c);
        tracing::info!(clean, "Face tracking service stopped");
        Ok(LifecycleOutcome::Stopped)
    }

    /// Stop then start on the same config snapshot
    pub async fn restart(&self) -> Result<LifecycleOutcome> {
        {
            let _guard = self.lifecycle.lock().await;
            self.stop_locked().await?;
        }
        self.start().await
    }

    /// Diff the new config against the running one and apply the minimal
    /// pipeline changes: unchanged descriptors stay untouched, changed
    /// ones are replaced, new ones start, removed ones stop.
    pub async fn apply_config(&self, new_config: FtsConfig) -> Result<()> {
        let _guard = self.lifecycle.lock().await;

        self.config_source.apply(new_config.clone()).await?;

        let mut core_slot = self.core.write().await;
        let Some(core) = core_slot.as_mut() else {
            // Not running: nothing to diff, the next start picks it up
            return Ok(());
        };

        let deadline = Duration::from_secs(core.config.shutdown_deadline_seconds);
        let desired: HashMap<String, CameraDescriptor> = new_config
            .cameras
            .iter()
            .filter(|c| c.enabled)
            .map(|c| (c.id.clone(), c.clone()))
            .collect();

        // Stop pipelines whose descriptor disappeared or changed
        let mut to_stop = Vec::new();
        for (id, handle) in core.pipelines.iter() {
            match desired.get(id) {
                Some(descriptor) if *descriptor == handle.descriptor => {}
                _ => to_stop.push(id.clone()),
            }
        }
        for id in &to_stop {
            if let Some(handle) = core.pipelines.remove(id) {
                tracing::info!(camera_id = %id, "Stopping pipeline (config change)");
                handle.shutdown(deadline).await;
            }
        }

        // Start pipelines for new or replaced descriptors
        let deps = PipelineDeps {
            backend: self.backend.clone(),
            models: core.models.clone(),
            index: core.index.clone(),
            recorder: core.recorder.clone(),
        };
        for (id, descriptor) in desired {
            if !core.pipelines.contains_key(&id) {
                tracing::info!(camera_id = %id, "Starting pipeline (config change)");
                let handle = CameraPipeline::spawn(descriptor, &new_config, deps.clone());
                core.pipelines.insert(id, handle);
            }
        }

        core.config = new_config;
        Ok(())
    }

    /// Aggregate service status
    pub async fn status(&self) -> FtsStatus {
        let (cpu_percent, memory_percent) = {
            let mut system = self.system.lock().unwrap();
            system.refresh_cpu_usage();
            system.refresh_memory();
            let cpus = system.cpus();
            let cpu = if cpus.is_empty() {
                0.0
            } else {
                cpus.iter().map(|c| c.cpu_usage()).sum::<f32>() / cpus.len() as f32
            };
            let memory = if system.total_memory() > 0 {
                (system.used_memory() as f32 / system.total_memory() as f32) * 100.0
            } else {
                0.0
            };
            (cpu, memory)
        };

        let core = self.core.read().await;
        match core.as_ref() {
            Some(core) => {
                let mut cameras = Vec::with_capacity(core.pipelines.len());
                for handle in core.pipelines.values() {
                    cameras.push(handle.snapshot().await);
                }
                cameras.sort_by(|a, b| a.id.cmp(&b.id));

                FtsStatus {
                    running: true,
                    uptime_s: core.started_at.elapsed().as_secs(),
                    cameras,
                    identities: core.index.len().await,
                    store_healthy: core.recorder.store_healthy(),
                    cpu_percent,
                    memory_percent,
                }
            }
            None => FtsStatus {
                running: false,
                uptime_s: 0,
                cameras: Vec::new(),
                identities: 0,
                store_healthy: true,
                cpu_percent,
                memory_percent,
            },
        }
    }

    /// Run one camera discovery pass with the configured settings
    pub async fn discover(&self) -> Result<Vec<DiscoveredCamera>> {
        let config = self.config_source.snapshot().await;
        let discovery = CameraDiscovery::new(self.backend.clone());
        let cancel = CancellationToken::new();
        discovery.run(&config.discovery, &cancel).await
    }

    /// Enroll an identity from an image: exactly one face is required
    pub async fn enroll(
        &self,
        employee_id: &str,
        image_bytes: &[u8],
        display_name: &str,
    ) -> Result<()> {
        let core = self.core.read().await;
        let core = core.as_ref().ok_or(Error::NotRunning)?;

        let frame = crate::capture::Frame::from_jpeg(0, image_bytes)?;
        let detections = core
            .models
            .detect(&frame, core.config.detect.threshold)
            .await?;

        match detections.len() {
            0 => return Err(Error::NoFace),
            1 => {}
            _ => return Err(Error::MultipleFaces),
        }

        let embedding = core.models.embed(&frame, detections[0].bbox).await?;
        core.index.add(employee_id, embedding, display_name).await?;
        core.index.persist(&core.config.identity.index_path).await?;

        Ok(())
    }

    /// Remove an enrolled identity
    pub async fn remove_identity(&self, employee_id: &str) -> Result<()> {
        let core = self.core.read().await;
        let core = core.as_ref().ok_or(Error::NotRunning)?;

        if !core.index.remove(employee_id).await {
            return Err(Error::NotFound(format!("identity {employee_id}")));
        }
        core.index.persist(&core.config.identity.index_path).await?;
        Ok(())
    }

    /// Currently tracked faces per camera
    pub async fn live_faces(&self) -> Result<HashMap<String, Vec<LiveFace>>> {
        let core = self.core.read().await;
        let core = core.as_ref().ok_or(Error::NotRunning)?;

        let mut faces = HashMap::with_capacity(core.pipelines.len());
        for (id, handle) in core.pipelines.iter() {
            faces.insert(id.clone(), handle.live_faces().await);
        }
        Ok(faces)
    }

    /// Subscribe to one camera's MJPEG preview
    pub async fn subscribe_mjpeg(&self, camera_id: &str) -> Result<MjpegSubscriber> {
        let core = self.core.read().await;
        let core = core.as_ref().ok_or(Error::NotRunning)?;

        let handle = core
            .pipelines
            .get(camera_id)
            .ok_or_else(|| Error::NotFound(format!("camera {camera_id}")))?;
        Ok(handle.publisher().subscribe())
    }

    /// Current configuration snapshot
    pub async fn config_snapshot(&self) -> FtsConfig {
        self.config_source.snapshot().await
    }

    /// Recorder handle for report surfaces
    pub async fn recorder(&self) -> Result<Arc<AttendanceRecorder>> {
        let core = self.core.read().await;
        let core = core.as_ref().ok_or(Error::NotRunning)?;
        Ok(core.recorder.clone())
    }
}
