//! Controller lifecycle scenarios: degraded cameras, hot reload,
//! idempotent start/stop, and shutdown completeness.

mod support;

use facetrack::config::CameraDescriptor;
use facetrack::pipeline::PipelineState;
use std::sync::Arc;
use std::time::{Duration, Instant};
use support::*;

const W: u32 = 64;
const H: u32 = 48;

fn camera(id: &str) -> CameraDescriptor {
    let mut descriptor = CameraDescriptor::usb(id, 0);
    descriptor.width = W;
    descriptor.height = H;
    descriptor.fps = 30;
    descriptor
}

/// An unreachable source degrades the pipeline, keeps the placeholder
/// stream alive, reports the open error, and still stops in time.
#[tokio::test(flavor = "multi_thread")]
async fn unreachable_camera_degrades_and_stops_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.cameras = vec![CameraDescriptor::rtsp(
        "cam-bad",
        "rtsp://203.0.113.9:554/stream1",
    )];
    config.cameras[0].width = W;
    config.cameras[0].height = H;

    let backend = Arc::new(StubBackend::always_failing(W, H));
    let controller = controller_with(config, backend, Arc::new(Script::new()));

    controller.start().await.unwrap();

    let degraded = wait_for(Duration::from_secs(5), || {
        let controller = controller.clone();
        async move {
            let status = controller.status().await;
            status
                .cameras
                .first()
                .is_some_and(|c| c.state == PipelineState::Degraded)
        }
    })
    .await;
    assert!(degraded, "pipeline never entered Degraded");

    let status = controller.status().await;
    assert_eq!(
        status.cameras[0].last_error.as_deref(),
        Some("CAMERA_OPEN")
    );

    // Placeholder stream keeps producing frames for viewers
    let mut subscriber = controller.subscribe_mjpeg("cam-bad").await.unwrap();
    for _ in 0..2 {
        let frame = tokio::time::timeout(Duration::from_secs(2), subscriber.recv())
            .await
            .expect("placeholder frame overdue");
        assert!(frame.is_some());
    }

    // Stop completes within the shutdown deadline
    let started = Instant::now();
    controller.stop().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5 + 1));
    assert!(!controller.is_running().await);
}

/// Hot reload: A stays untouched (no capture re-open), B stops, C starts.
#[tokio::test(flavor = "multi_thread")]
async fn apply_config_performs_minimal_diff() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.cameras = vec![camera("cam-a"), camera("cam-b")];

    let backend = Arc::new(StubBackend::new(
        1_000_000,
        W,
        H,
        Duration::from_millis(20),
    ));
    let controller = controller_with(config.clone(), backend.clone(), Arc::new(Script::new()));

    controller.start().await.unwrap();
    let running = wait_for(Duration::from_secs(5), || {
        let controller = controller.clone();
        async move {
            controller
                .status()
                .await
                .cameras
                .iter()
                .all(|c| c.state == PipelineState::Running)
        }
    })
    .await;
    assert!(running, "initial pipelines never reached Running");

    let opens_a_before = backend.open_count("cam-a");
    assert_eq!(opens_a_before, 1);

    let mut new_config = config.clone();
    new_config.cameras = vec![camera("cam-a"), camera("cam-c")];
    controller.apply_config(new_config).await.unwrap();

    let status = controller.status().await;
    let ids: Vec<&str> = status.cameras.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["cam-a", "cam-c"]);

    // A kept its original capture session
    assert_eq!(backend.open_count("cam-a"), opens_a_before);
    assert_eq!(backend.open_count("cam-c"), 1);

    controller.stop().await.unwrap();
}

/// Start and Stop are idempotent; doubled calls change nothing.
#[tokio::test(flavor = "multi_thread")]
async fn start_and_stop_are_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.cameras = vec![camera("cam-a")];

    let backend = Arc::new(StubBackend::new(1_000_000, W, H, Duration::from_millis(20)));
    let controller = controller_with(config, backend.clone(), Arc::new(Script::new()));

    use facetrack::controller::LifecycleOutcome;
    assert_eq!(controller.start().await.unwrap(), LifecycleOutcome::Started);
    assert_eq!(
        controller.start().await.unwrap(),
        LifecycleOutcome::AlreadyRunning
    );
    // The doubled start spawned nothing extra
    assert_eq!(backend.open_count("cam-a"), 1);
    assert_eq!(controller.status().await.cameras.len(), 1);

    assert_eq!(controller.stop().await.unwrap(), LifecycleOutcome::Stopped);
    assert_eq!(
        controller.stop().await.unwrap(),
        LifecycleOutcome::NotRunning
    );
    assert!(!controller.is_running().await);
}

/// Concurrent starts collapse to exactly one
#[tokio::test(flavor = "multi_thread")]
async fn concurrent_starts_yield_one_start() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.cameras = vec![camera("cam-a")];

    let backend = Arc::new(StubBackend::new(1_000_000, W, H, Duration::from_millis(20)));
    let controller = controller_with(config, backend.clone(), Arc::new(Script::new()));

    let (a, b, c) = tokio::join!(
        controller.start(),
        controller.start(),
        controller.start()
    );
    let outcomes = [a.unwrap(), b.unwrap(), c.unwrap()];
    let started = outcomes
        .iter()
        .filter(|o| **o == facetrack::controller::LifecycleOutcome::Started)
        .count();
    assert_eq!(started, 1);
    assert_eq!(backend.open_count("cam-a"), 1);

    controller.stop().await.unwrap();
}

/// After Stop no further attendance events are emitted and the index
/// survives for the next start.
#[tokio::test(flavor = "multi_thread")]
async fn stop_silences_recorder_and_persists_index() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.cameras = vec![camera("cam-a")];

    let v_a = vec![1.0, 0.0, 0.0, 0.0];
    let script = Script::new().with_face(
        0,
        facetrack::models::BBox {
            x1: 20.0,
            y1: 10.0,
            x2: 36.0,
            y2: 26.0,
        },
        v_a,
    );

    let backend = Arc::new(StubBackend::new(1_000_000, W, H, Duration::from_millis(20)));
    let controller = controller_with(config, backend.clone(), Arc::new(script));

    controller.start().await.unwrap();
    controller
        .enroll("E001", &sample_jpeg(W, H), "Alice")
        .await
        .unwrap();
    let recorder = controller.recorder().await.unwrap();

    controller.stop().await.unwrap();

    // Recorder stays silent after the drain
    let before = recorder
        .recent_for("E001", Duration::from_secs(60))
        .await
        .unwrap()
        .len();
    tokio::time::sleep(Duration::from_millis(300)).await;
    let after = recorder
        .recent_for("E001", Duration::from_secs(60))
        .await
        .unwrap()
        .len();
    assert_eq!(before, after);

    // Enrolled identity came back from disk
    controller.start().await.unwrap();
    assert_eq!(controller.status().await.identities, 1);
    controller.stop().await.unwrap();
}
