//! CameraPipeline - Per-camera capture/detect/identify/track/record chain
//!
//! ## Responsibilities
//!
//! - Own the worker tasks for one camera: capture (blocking I/O),
//!   process (detect -> embed -> identify -> track -> tripwire -> record),
//!   publish, and the placeholder ticker
//! - Drive the state machine
//!   Initializing -> Running <-> Degraded -> Stopping -> Stopped
//! - Keep per-frame failures local: drop the frame, count it, degrade only
//!   past the per-minute ceiling
//!
//! Capture hands frames to the process stage through a latest-wins channel
//! of depth one, so a slow detector drops frames instead of building a
//! queue. Process hands annotated frames to the publish stage through a
//! bounded channel of depth four.

pub mod overlay;
pub mod tracker;
pub mod tripwire;

use crate::attendance::{AttendanceEvent, AttendanceRecorder};
use crate::capture::{CaptureBackend, Frame};
use crate::config::{CameraDescriptor, FtsConfig};
use crate::error::Error;
use crate::identity::IdentityIndex;
use crate::models::ModelRegistry;
use crate::publish::FramePublisher;
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracker::{FaceTracker, Observation};
use tripwire::TripwireEvaluator;

/// Pipeline lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Initializing,
    Running,
    Degraded,
    Stopping,
    Stopped,
}

/// Currently tracked face, surfaced through the admin adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveFace {
    pub track_id: u64,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub employee_id: Option<String>,
    pub score: f32,
    pub unknown: bool,
}

/// Cumulative pipeline counters
#[derive(Default)]
pub struct PipelineStats {
    pub frames_captured: AtomicU64,
    pub frames_processed: AtomicU64,
    pub detections_total: AtomicU64,
    pub recognitions_total: AtomicU64,
    pub crossings_total: AtomicU64,
    pub read_failures: AtomicU64,
    pub frame_errors: AtomicU64,
}

/// Point-in-time view of one pipeline for status aggregation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSnapshot {
    pub id: String,
    pub state: PipelineState,
    pub fps_in: f32,
    pub fps_out: f32,
    pub last_error: Option<String>,
    pub detections_total: u64,
    pub recognitions_total: u64,
}

/// Shared collaborators handed to every pipeline
#[derive(Clone)]
pub struct PipelineDeps {
    pub backend: Arc<dyn CaptureBackend>,
    pub models: Arc<ModelRegistry>,
    pub index: Arc<IdentityIndex>,
    pub recorder: Arc<AttendanceRecorder>,
}

/// Which stage pushed the pipeline into Degraded
struct DegradeFlags {
    capture: AtomicBool,
    process: AtomicBool,
}

impl DegradeFlags {
    fn new() -> Self {
        Self {
            capture: AtomicBool::new(false),
            process: AtomicBool::new(false),
        }
    }

    fn recompute(&self, state_tx: &watch::Sender<PipelineState>) {
        let degraded =
            self.capture.load(Ordering::Relaxed) || self.process.load(Ordering::Relaxed);
        let current = *state_tx.borrow();
        if matches!(current, PipelineState::Stopping | PipelineState::Stopped) {
            return;
        }
        let target = if degraded {
            PipelineState::Degraded
        } else {
            PipelineState::Running
        };
        if current != target {
            let _ = state_tx.send(target);
        }
    }
}

/// Handle to a running pipeline; dropping it after shutdown releases the
/// publisher and notifies subscribers
pub struct PipelineHandle {
    pub descriptor: CameraDescriptor,
    publisher: Arc<FramePublisher>,
    state_rx: watch::Receiver<PipelineState>,
    state_tx: Arc<watch::Sender<PipelineState>>,
    stats: Arc<PipelineStats>,
    live_faces: Arc<RwLock<Vec<LiveFace>>>,
    last_error: Arc<RwLock<Option<String>>>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    started_at: Instant,
}

impl PipelineHandle {
    pub fn state(&self) -> PipelineState {
        *self.state_rx.borrow()
    }

    pub fn publisher(&self) -> Arc<FramePublisher> {
        self.publisher.clone()
    }

    pub async fn live_faces(&self) -> Vec<LiveFace> {
        self.live_faces.read().await.clone()
    }

    pub async fn snapshot(&self) -> PipelineSnapshot {
        let elapsed = self.started_at.elapsed().as_secs_f32().max(1.0);
        PipelineSnapshot {
            id: self.descriptor.id.clone(),
            state: self.state(),
            fps_in: self.stats.frames_captured.load(Ordering::Relaxed) as f32 / elapsed,
            fps_out: self.publisher.published_total() as f32 / elapsed,
            last_error: self.last_error.read().await.clone(),
            detections_total: self.stats.detections_total.load(Ordering::Relaxed),
            recognitions_total: self.stats.recognitions_total.load(Ordering::Relaxed),
        }
    }

    /// Stop the pipeline: cancel every stage, await the drain, escalate to
    /// abort past `deadline`. Returns true when the drain was clean.
    pub async fn shutdown(mut self, deadline: Duration) -> bool {
        let _ = self.state_tx.send(PipelineState::Stopping);
        self.cancel.cancel();

        let camera_id = self.descriptor.id.clone();
        let started = Instant::now();
        let mut clean = true;

        for task in std::mem::take(&mut self.tasks) {
            let abort = task.abort_handle();
            let remaining = deadline.saturating_sub(started.elapsed());
            if tokio::time::timeout(remaining, task).await.is_err() {
                tracing::warn!(
                    camera_id = %camera_id,
                    "Pipeline drain exceeded deadline; aborting task"
                );
                abort.abort();
                clean = false;
            }
        }

        let _ = self.state_tx.send(PipelineState::Stopped);
        tracing::info!(camera_id = %camera_id, clean, "Pipeline stopped");
        clean
    }
}

/// One frame paired with the track state that annotates it
struct AnnotatedFrame {
    frame: Frame,
    tracks: Vec<tracker::Track>,
}

/// CameraPipeline constructor namespace
pub struct CameraPipeline;

impl CameraPipeline {
    /// Spawn the worker set for one enabled descriptor
    pub fn spawn(
        descriptor: CameraDescriptor,
        config: &FtsConfig,
        deps: PipelineDeps,
    ) -> PipelineHandle {
        let publisher = Arc::new(FramePublisher::new(
            &descriptor.id,
            &config.mjpeg,
            descriptor.width,
            descriptor.height,
        ));
        let (state_tx, state_rx) = watch::channel(PipelineState::Initializing);
        let state_tx = Arc::new(state_tx);
        let stats = Arc::new(PipelineStats::default());
        let live_faces = Arc::new(RwLock::new(Vec::new()));
        let last_error = Arc::new(RwLock::new(None));
        let cancel = CancellationToken::new();
        let degrade = Arc::new(DegradeFlags::new());

        let (frame_tx, frame_rx) = watch::channel::<Option<Frame>>(None);
        let (annotated_tx, annotated_rx) = mpsc::channel::<AnnotatedFrame>(4);

        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(capture_loop(CaptureCtx {
            descriptor: descriptor.clone(),
            backend: deps.backend.clone(),
            publisher: publisher.clone(),
            state_tx: state_tx.clone(),
            degrade: degrade.clone(),
            stats: stats.clone(),
            last_error: last_error.clone(),
            frame_tx,
            fail_streak: config.pipeline.fail_streak,
            cancel: cancel.clone(),
        })));

        tasks.push(tokio::spawn(process_loop(ProcessCtx {
            descriptor: descriptor.clone(),
            config: config.clone(),
            deps: deps.clone(),
            state_tx: state_tx.clone(),
            degrade,
            stats: stats.clone(),
            live_faces: live_faces.clone(),
            last_error: last_error.clone(),
            frame_rx,
            annotated_tx,
            cancel: cancel.clone(),
        })));

        tasks.push(tokio::spawn(publish_loop(
            publisher.clone(),
            descriptor.tripwires.clone(),
            annotated_rx,
            cancel.clone(),
        )));

        {
            let publisher = publisher.clone();
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                publisher.run_placeholder_loop(cancel).await;
            }));
        }

        tracing::info!(
            camera_id = %descriptor.id,
            kind = descriptor.source.label(),
            tripwires = descriptor.tripwires.len(),
            "Pipeline spawned"
        );

        PipelineHandle {
            descriptor,
            publisher,
            state_rx,
            state_tx,
            stats,
            live_faces,
            last_error,
            cancel,
            tasks,
            started_at: Instant::now(),
        }
    }
}

struct CaptureCtx {
    descriptor: CameraDescriptor,
    backend: Arc<dyn CaptureBackend>,
    publisher: Arc<FramePublisher>,
    state_tx: Arc<watch::Sender<PipelineState>>,
    degrade: Arc<DegradeFlags>,
    stats: Arc<PipelineStats>,
    last_error: Arc<RwLock<Option<String>>>,
    frame_tx: watch::Sender<Option<Frame>>,
    fail_streak: u32,
    cancel: CancellationToken,
}

/// Capture stage: open with jittered backoff, read at the source rate,
/// degrade on open failure or a read-failure streak
async fn capture_loop(ctx: CaptureCtx) {
    let camera_id = ctx.descriptor.id.clone();
    let read_deadline = Duration::from_secs_f64(
        (3.0 / ctx.descriptor.fps.max(1) as f64).max(2.0),
    );
    let mut backoff = Duration::from_secs(1);
    let max_backoff = Duration::from_secs(10);

    'open: while !ctx.cancel.is_cancelled() {
        let mut session = match ctx.backend.open(&ctx.descriptor).await {
            Ok(session) => {
                backoff = Duration::from_secs(1);
                session
            }
            Err(e) => {
                let error = Error::CameraOpen(e.to_string());
                tracing::warn!(camera_id = %camera_id, error = %e, "Capture open failed");
                *ctx.last_error.write().await = Some(error.code().to_string());
                ctx.publisher.set_status_text(&format!("CAMERA OPEN FAILED: {camera_id}"));
                ctx.degrade.capture.store(true, Ordering::Relaxed);
                ctx.degrade.recompute(&ctx.state_tx);

                let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..250));
                tokio::select! {
                    _ = tokio::time::sleep(backoff + jitter) => {}
                    _ = ctx.cancel.cancelled() => break 'open,
                }
                backoff = (backoff * 2).min(max_backoff);
                continue 'open;
            }
        };

        let mut consecutive_failures = 0u32;
        loop {
            let frame = tokio::select! {
                result = session.read(read_deadline) => result,
                _ = ctx.cancel.cancelled() => {
                    session.close().await;
                    break 'open;
                }
            };

            match frame {
                Ok(frame) => {
                    if consecutive_failures > 0 || ctx.degrade.capture.load(Ordering::Relaxed) {
                        tracing::info!(camera_id = %camera_id, "Capture recovered");
                    }
                    consecutive_failures = 0;
                    ctx.degrade.capture.store(false, Ordering::Relaxed);
                    ctx.degrade.recompute(&ctx.state_tx);
                    ctx.stats.frames_captured.fetch_add(1, Ordering::Relaxed);
                    // Latest-wins: an unprocessed previous frame is replaced
                    let _ = ctx.frame_tx.send(Some(frame));
                }
                Err(e) => {
                    consecutive_failures += 1;
                    ctx.stats.read_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        camera_id = %camera_id,
                        error = %e,
                        consecutive_failures,
                        "Frame read failed"
                    );

                    if consecutive_failures >= ctx.fail_streak {
                        tracing::warn!(
                            camera_id = %camera_id,
                            consecutive_failures,
                            "Read failure streak; reopening capture"
                        );
                        *ctx.last_error.write().await = Some(e.code().to_string());
                        ctx.publisher.set_status_text("NO SIGNAL");
                        ctx.degrade.capture.store(true, Ordering::Relaxed);
                        ctx.degrade.recompute(&ctx.state_tx);
                        session.close().await;
                        continue 'open;
                    }
                }
            }
        }
    }

    tracing::debug!(camera_id = %camera_id, "Capture task exited");
}

struct ProcessCtx {
    descriptor: CameraDescriptor,
    config: FtsConfig,
    deps: PipelineDeps,
    state_tx: Arc<watch::Sender<PipelineState>>,
    degrade: Arc<DegradeFlags>,
    stats: Arc<PipelineStats>,
    live_faces: Arc<RwLock<Vec<LiveFace>>>,
    last_error: Arc<RwLock<Option<String>>>,
    frame_rx: watch::Receiver<Option<Frame>>,
    annotated_tx: mpsc::Sender<AnnotatedFrame>,
    cancel: CancellationToken,
}

/// Process stage: detect, embed, identify, track, evaluate tripwires,
/// record crossings, then hand the annotated frame to the publish stage
async fn process_loop(mut ctx: ProcessCtx) {
    let camera_id = ctx.descriptor.id.clone();
    let mut face_tracker = FaceTracker::new(
        ctx.config.track.iou_threshold,
        ctx.config.track.expire_frames,
        ctx.config.identify.threshold,
        ctx.config.identify.reid_margin,
    );
    let mut evaluator = TripwireEvaluator::new(ctx.descriptor.tripwires.clone());
    // Sliding one-minute window of per-frame failures
    let mut error_window: VecDeque<Instant> = VecDeque::new();

    loop {
        tokio::select! {
            changed = ctx.frame_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = ctx.cancel.cancelled() => break,
        }

        let Some(frame) = ctx.frame_rx.borrow_and_update().clone() else {
            continue;
        };

        match process_frame(&mut ctx, &mut face_tracker, &mut evaluator, &frame).await {
            Ok(()) => {
                ctx.stats.frames_processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                ctx.stats.frame_errors.fetch_add(1, Ordering::Relaxed);
                error_window.push_back(Instant::now());
                *ctx.last_error.write().await = Some(e.code().to_string());
                tracing::debug!(camera_id = %camera_id, error = %e, "Frame dropped");
            }
        }

        if let Some(minute_ago) = Instant::now().checked_sub(Duration::from_secs(60)) {
            while error_window.front().is_some_and(|t| *t < minute_ago) {
                error_window.pop_front();
            }
        }

        let over_ceiling =
            error_window.len() as u32 > ctx.config.pipeline.fail_threshold_per_minute;
        let was_degraded = ctx.degrade.process.swap(over_ceiling, Ordering::Relaxed);
        if over_ceiling != was_degraded {
            if over_ceiling {
                tracing::warn!(
                    camera_id = %camera_id,
                    errors_last_minute = error_window.len(),
                    "Per-frame error ceiling exceeded"
                );
            }
            ctx.degrade.recompute(&ctx.state_tx);
        }
    }

    tracing::debug!(camera_id = %camera_id, "Process task exited");
}

async fn process_frame(
    ctx: &mut ProcessCtx,
    face_tracker: &mut FaceTracker,
    evaluator: &mut TripwireEvaluator,
    frame: &Frame,
) -> crate::error::Result<()> {
    let detections = ctx
        .deps
        .models
        .detect(frame, ctx.config.detect.threshold)
        .await?;
    ctx.stats
        .detections_total
        .fetch_add(detections.len() as u64, Ordering::Relaxed);

    let mut observations = Vec::with_capacity(detections.len());
    for detection in detections {
        let embedding = ctx.deps.models.embed(frame, detection.bbox).await?;
        let matches = ctx.deps.index.query(&embedding, 1).await?;
        let candidate = matches
            .into_iter()
            .next()
            .map(|m| (m.employee_id, m.score));
        observations.push(Observation {
            bbox: detection.bbox,
            confidence: detection.confidence,
            candidate,
        });
    }

    let recognized_now = observations
        .iter()
        .filter(|o| {
            o.candidate
                .as_ref()
                .is_some_and(|(_, score)| *score >= ctx.config.identify.threshold)
        })
        .count() as u64;
    ctx.stats
        .recognitions_total
        .fetch_add(recognized_now, Ordering::Relaxed);

    let expired = face_tracker.update(frame.seq, &observations);
    for track_id in expired {
        evaluator.forget_track(track_id);
    }

    // Tripwire evaluation runs every frame so tracks keep their side state
    let mut events = Vec::new();
    for track in face_tracker.tracks() {
        let (cx, cy) = track.bbox.center();
        for crossing in evaluator.evaluate(track.id, cx, cy, frame.width, frame.height) {
            ctx.stats.crossings_total.fetch_add(1, Ordering::Relaxed);
            if let Some(identity) = &track.identity {
                if identity.score >= ctx.config.identify.threshold {
                    events.push(AttendanceEvent {
                        timestamp: Utc::now(),
                        employee_id: identity.employee_id.clone(),
                        camera_id: ctx.descriptor.id.clone(),
                        tripwire_id: crossing.tripwire_id,
                        direction: crossing.direction,
                        confidence: identity.score,
                    });
                }
            }
        }
    }

    // Crossings reach the recorder in frame order
    for event in events {
        match ctx.deps.recorder.record(event).await {
            Ok(_) => {}
            Err(e) => {
                *ctx.last_error.write().await = Some(e.code().to_string());
                tracing::warn!(
                    camera_id = %ctx.descriptor.id,
                    error = %e,
                    "Attendance record failed"
                );
            }
        }
    }

    *ctx.live_faces.write().await = face_tracker
        .tracks()
        .iter()
        .map(|track| LiveFace {
            track_id: track.id,
            x: track.bbox.x1,
            y: track.bbox.y1,
            width: track.bbox.width(),
            height: track.bbox.height(),
            employee_id: track.identity.as_ref().map(|i| i.employee_id.clone()),
            score: track
                .identity
                .as_ref()
                .map(|i| i.score)
                .unwrap_or(track.last_score),
            unknown: track.identity.is_none(),
        })
        .collect();

    let annotated = AnnotatedFrame {
        frame: frame.clone(),
        tracks: face_tracker.tracks().to_vec(),
    };
    // Bounded hand-off; shutdown drains the receiver
    tokio::select! {
        result = ctx.annotated_tx.send(annotated) => {
            if result.is_err() {
                return Ok(());
            }
        }
        _ = ctx.cancel.cancelled() => {}
    }

    Ok(())
}

/// Publish stage: frames reach subscribers in capture order
async fn publish_loop(
    publisher: Arc<FramePublisher>,
    tripwires: Vec<crate::config::Tripwire>,
    mut annotated_rx: mpsc::Receiver<AnnotatedFrame>,
    cancel: CancellationToken,
) {
    loop {
        let annotated = tokio::select! {
            item = annotated_rx.recv() => item,
            _ = cancel.cancelled() => break,
        };
        let Some(annotated) = annotated else { break };
        publisher.publish_annotated(&annotated.frame, &annotated.tracks, &tripwires);
    }
}
