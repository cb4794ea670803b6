//! MJPEG streaming scenarios: subscriber lag isolation and the multipart
//! wire format, driven end to end through a running pipeline.

mod support;

use facetrack::config::CameraDescriptor;
use facetrack::publish::MjpegSubscriber;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
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

/// One fast and one stalled subscriber: the fast one keeps pace with the
/// producer, the stalled one resumes at the most recent frame instead of
/// replaying a backlog.
#[tokio::test(flavor = "multi_thread")]
async fn stalled_subscriber_does_not_slow_producer() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.mjpeg.subscriber_buffer = 2;
    config.cameras = vec![camera("cam-1")];

    let backend = Arc::new(StubBackend::new(1_000_000, W, H, Duration::from_millis(20)));
    let controller = controller_with(config, backend, Arc::new(Script::new()));
    controller.start().await.unwrap();

    let mut fast = controller.subscribe_mjpeg("cam-1").await.unwrap();
    let mut slow = controller.subscribe_mjpeg("cam-1").await.unwrap();

    // The slow subscriber reads one frame and stalls
    let first_slow = tokio::time::timeout(Duration::from_secs(3), slow.recv())
        .await
        .unwrap()
        .unwrap();

    // The fast subscriber consumes for a second at the source rate
    let mut fast_frames = 0u32;
    let mut last_seq = 0u64;
    let window = tokio::time::Instant::now() + Duration::from_secs(1);
    while tokio::time::Instant::now() < window {
        match tokio::time::timeout(Duration::from_millis(500), fast.recv()).await {
            Ok(Some(frame)) => {
                assert!(frame.seq > last_seq, "frames must arrive in capture order");
                last_seq = frame.seq;
                fast_frames += 1;
            }
            _ => break,
        }
    }
    // Source runs at 50 fps; the stalled peer must not throttle this one
    assert!(fast_frames >= 20, "fast subscriber got {fast_frames} frames");

    // The stalled subscriber resumes near the head, not at its backlog
    let resumed = tokio::time::timeout(Duration::from_secs(2), slow.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(
        resumed.seq + 4 >= last_seq,
        "stalled subscriber replayed a backlog: resumed at {} vs head {}",
        resumed.seq,
        last_seq
    );
    assert!(resumed.seq > first_slow.seq);

    controller.stop().await.unwrap();
}

/// The byte stream is a valid multipart/x-mixed-replace sequence
#[tokio::test(flavor = "multi_thread")]
async fn byte_stream_formats_multipart_parts() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.cameras = vec![camera("cam-1")];

    let backend = Arc::new(StubBackend::new(1_000_000, W, H, Duration::from_millis(20)));
    let controller = controller_with(config, backend, Arc::new(Script::new()));
    controller.start().await.unwrap();

    assert_eq!(
        MjpegSubscriber::content_type(),
        "multipart/x-mixed-replace; boundary=frame"
    );

    let subscriber = controller.subscribe_mjpeg("cam-1").await.unwrap();
    let mut stream = Box::pin(subscriber.into_byte_stream());

    let part = tokio::time::timeout(Duration::from_secs(3), stream.next())
        .await
        .unwrap()
        .unwrap();

    let head = String::from_utf8_lossy(&part[..part.len().min(96)]);
    assert!(head.starts_with("--frame\r\n"));
    assert!(head.contains("Content-Type: image/jpeg\r\n"));

    let length_line = head
        .lines()
        .find(|l| l.starts_with("Content-Length: "))
        .expect("missing Content-Length");
    let declared: usize = length_line["Content-Length: ".len()..].trim().parse().unwrap();

    let header_end = part
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("missing header terminator")
        + 4;
    let body = &part[header_end..part.len() - 2];
    assert_eq!(body.len(), declared);
    assert_eq!(&body[0..2], &[0xFF, 0xD8]);

    controller.stop().await.unwrap();
}

/// Subscribers are notified when the service stops
#[tokio::test(flavor = "multi_thread")]
async fn stop_ends_subscriber_streams() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.cameras = vec![camera("cam-1")];

    let backend = Arc::new(StubBackend::new(1_000_000, W, H, Duration::from_millis(20)));
    let controller = controller_with(config, backend, Arc::new(Script::new()));
    controller.start().await.unwrap();

    let mut subscriber = controller.subscribe_mjpeg("cam-1").await.unwrap();
    // Drain one live frame first
    tokio::time::timeout(Duration::from_secs(3), subscriber.recv())
        .await
        .unwrap()
        .unwrap();

    controller.stop().await.unwrap();

    // The publisher is gone; recv drains any buffered frames then ends
    let ended = tokio::time::timeout(Duration::from_secs(2), async {
        while subscriber.recv().await.is_some() {}
    })
    .await;
    assert!(ended.is_ok(), "stream did not end after stop");
}
