mod common;

use astitva_hw::{CameraError, FacingMode, Resolution};
use astitva_scan::CameraSession;
use common::{open_face, FakeDevices, SceneDetector, ScriptedDetector, FRAME_PIXELS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;

const POLL: Duration = Duration::from_millis(100);

fn session<F: astitva_core::FaceDetector>(
    devices: &Arc<FakeDevices>,
    detector: Arc<F>,
) -> CameraSession<FakeDevices, F> {
    CameraSession::new(Arc::clone(devices), detector, Resolution::default(), POLL)
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_idempotent() {
    let devices = FakeDevices::new();
    let mut session = session(&devices, SceneDetector::new());

    session.start(FacingMode::User).await.unwrap();
    assert!(session.is_active());

    assert!(session.stop());
    assert!(!session.is_active());
    assert!(!session.stop());

    let probe = &devices.probes()[0];
    assert!(!probe.is_live());
    assert_eq!(probe.stops.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_no_ticks_after_stop() {
    let devices = FakeDevices::new();
    let detector = Arc::new(ScriptedDetector::new(vec![], vec![open_face()]));
    let mut session = session(&devices, Arc::clone(&detector));

    let mut ticks = session.subscribe();
    session.start(FacingMode::User).await.unwrap();

    let first = ticks.recv().await.unwrap();
    assert_eq!(first.epoch, session.epoch());
    assert_eq!(first.face_count, 1);
    assert!(first.primary.is_some());

    session.stop();
    while ticks.try_recv().is_ok() {}
    let calls = detector.calls();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(matches!(ticks.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(detector.calls(), calls);
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_detection_is_discarded() {
    let devices = FakeDevices::new();
    let detector = Arc::new(
        ScriptedDetector::new(vec![], vec![open_face()]).with_delay(Duration::from_millis(50)),
    );
    let mut session = session(&devices, Arc::clone(&detector));

    let mut ticks = session.subscribe();
    session.start(FacingMode::User).await.unwrap();

    // The first poll is now waiting on detection.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(detector.calls(), 1);
    session.stop();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(matches!(ticks.try_recv(), Err(TryRecvError::Empty)));
    assert!(!session.face_detected());
}

#[tokio::test(start_paused = true)]
async fn test_ticks_arrive_every_poll_interval() {
    let devices = FakeDevices::new();
    let mut session = session(&devices, SceneDetector::new());

    let mut ticks = session.subscribe();
    session.start(FacingMode::User).await.unwrap();

    let a = ticks.recv().await.unwrap();
    let b = ticks.recv().await.unwrap();
    let c = ticks.recv().await.unwrap();
    let slack = Duration::from_millis(1);
    for gap in [b.observed_at - a.observed_at, c.observed_at - b.observed_at] {
        assert!(gap + slack >= POLL && gap <= POLL + slack, "gap was {gap:?}");
    }
    assert_eq!((a.sequence, b.sequence, c.sequence), (1, 2, 3));
}

#[tokio::test(start_paused = true)]
async fn test_restart_stops_previous_stream() {
    let devices = FakeDevices::new();
    let mut session = session(&devices, SceneDetector::new());

    session.start(FacingMode::User).await.unwrap();
    let first_epoch = session.epoch();
    session.start(FacingMode::Environment).await.unwrap();

    let probes = devices.probes();
    assert_eq!(probes.len(), 2);
    assert!(!probes[0].is_live());
    assert!(probes[1].is_live());
    assert_eq!(probes[1].facing, FacingMode::Environment);
    assert_eq!(session.facing(), FacingMode::Environment);
    assert!(session.epoch() > first_epoch);
    assert_eq!(devices.live_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_toggle_stops_and_flips() {
    let devices = FakeDevices::new();
    let mut session = session(&devices, SceneDetector::new());

    session.start(FacingMode::User).await.unwrap();
    assert_eq!(session.toggle(), FacingMode::Environment);
    assert!(!session.is_active());
    assert_eq!(devices.live_count(), 0);
    assert_eq!(session.toggle(), FacingMode::User);
}

#[tokio::test(start_paused = true)]
async fn test_permission_denied_leaves_session_inactive() {
    let devices = FakeDevices::denying();
    let mut session = session(&devices, SceneDetector::new());

    let err = session.start(FacingMode::User).await.unwrap_err();
    assert!(err.is_permission_denied());
    assert!(!session.is_active());
    assert!(!session.stop());
}

#[tokio::test(start_paused = true)]
async fn test_capture_still_mirrors_front_camera() {
    let devices = FakeDevices::new();
    let mut session = session(&devices, SceneDetector::new());

    session.start(FacingMode::User).await.unwrap();
    let front = session.capture_still().await.unwrap();
    assert_eq!(front.data, vec![40, 30, 20, 10, 80, 70, 60, 50]);

    session.start(FacingMode::Environment).await.unwrap();
    let rear = session.capture_still().await.unwrap();
    assert_eq!(rear.data, FRAME_PIXELS.to_vec());
}

#[tokio::test(start_paused = true)]
async fn test_capture_still_requires_active_stream() {
    let devices = FakeDevices::new();
    let session = session(&devices, SceneDetector::new());
    assert!(matches!(session.capture_still().await, Err(CameraError::Stopped)));
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_release_after_grace() {
    let devices = FakeDevices::new();
    let mut session = session(&devices, SceneDetector::new());

    session.start(FacingMode::User).await.unwrap();
    session.schedule_release(Duration::from_secs(5));

    tokio::time::sleep(Duration::from_millis(4900)).await;
    assert!(session.is_active());
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!session.is_active());
    assert_eq!(devices.live_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_restart_cancels_pending_release() {
    let devices = FakeDevices::new();
    let mut session = session(&devices, SceneDetector::new());

    session.start(FacingMode::User).await.unwrap();
    session.schedule_release(Duration::from_secs(5));
    tokio::time::sleep(Duration::from_secs(1)).await;
    session.start(FacingMode::User).await.unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(session.is_active());
    assert_eq!(devices.live_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_drop_releases_stream() {
    let devices = FakeDevices::new();
    {
        let mut session = session(&devices, SceneDetector::new());
        session.start(FacingMode::User).await.unwrap();
        assert_eq!(devices.live_count(), 1);
    }
    assert_eq!(devices.live_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_candidate_survives_empty_ticks() {
    let devices = FakeDevices::new();
    let detector = Arc::new(ScriptedDetector::new(vec![vec![open_face()]], vec![]));
    let mut session = session(&devices, detector);

    let mut ticks = session.subscribe();
    session.start(FacingMode::User).await.unwrap();

    assert_eq!(ticks.recv().await.unwrap().face_count, 1);
    assert!(session.face_detected());

    assert_eq!(ticks.recv().await.unwrap().face_count, 0);
    assert!(!session.face_detected());
    assert_eq!(session.face_count(), 0);
    assert!(session.candidate().is_some());
}
