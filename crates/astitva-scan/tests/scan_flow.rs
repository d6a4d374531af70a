mod common;

use astitva_core::{Descriptor, LabeledDescriptors, ScanOutcome, ScanStage};
use astitva_hw::FacingMode;
use astitva_scan::{ConfigError, FaceScanner, ScanConfig, ScanError};
use common::{blink_twice, open_face, FakeDevices, ScriptedDetector};
use std::sync::Arc;
use std::time::Duration;

fn gallery() -> Vec<LabeledDescriptors> {
    vec![
        LabeledDescriptors {
            label: "CS2024001".into(),
            name: "John Smith".into(),
            // 0.4 from the probe descriptor [0, 0, 0, 0]
            descriptors: vec![Descriptor::new(vec![0.4, 0.0, 0.0, 0.0])],
        },
        LabeledDescriptors {
            label: "CS2024002".into(),
            name: "Emma Johnson".into(),
            descriptors: vec![Descriptor::new(vec![0.9, 0.9, 0.0, 0.0])],
        },
    ]
}

fn scanner(
    devices: &Arc<FakeDevices>,
    detector: ScriptedDetector,
    gallery: Vec<LabeledDescriptors>,
) -> FaceScanner<FakeDevices, ScriptedDetector> {
    FaceScanner::new(
        Arc::clone(devices),
        Arc::new(detector),
        gallery,
        &ScanConfig::default(),
    )
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_blinking_face_is_matched() {
    let devices = FakeDevices::new();
    let mut scanner = scanner(&devices, ScriptedDetector::cycle(blink_twice()), gallery());
    let status = scanner.status();

    let outcome = scanner.scan(FacingMode::User).await.unwrap();
    match outcome {
        ScanOutcome::Success {
            id,
            name,
            confidence,
            distance,
        } => {
            assert_eq!(id, "CS2024001");
            assert_eq!(name, "John Smith");
            assert_eq!(confidence, 60);
            assert!((distance - 0.4).abs() < 1e-4);
        }
        other => panic!("expected a match, got {other:?}"),
    }

    let snapshot = status.borrow().clone();
    assert_eq!(snapshot.stage, ScanStage::Complete);
    assert_eq!(snapshot.progress, 100.0);
    assert_eq!(snapshot.blink_count, 2);
    assert_eq!(snapshot.attempts, 3);
    assert_eq!(snapshot.confidence, 75);
    let report = snapshot.report.unwrap();
    assert!(report.success);
    assert_eq!(report.id.as_deref(), Some("CS2024001"));
}

#[tokio::test(start_paused = true)]
async fn test_camera_released_five_seconds_after_finish() {
    let devices = FakeDevices::new();
    let mut scanner = scanner(&devices, ScriptedDetector::cycle(blink_twice()), gallery());

    scanner.scan(FacingMode::User).await.unwrap();
    assert!(scanner.session().is_active());

    tokio::time::sleep(Duration::from_millis(4900)).await;
    assert!(scanner.session().is_active());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!scanner.session().is_active());
    assert_eq!(devices.live_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_face_is_no_match() {
    let devices = FakeDevices::new();
    let far = vec![LabeledDescriptors {
        label: "CS2024009".into(),
        name: "Far Away".into(),
        descriptors: vec![Descriptor::new(vec![3.0, 3.0, 3.0, 3.0])],
    }];
    let mut scanner = scanner(&devices, ScriptedDetector::cycle(blink_twice()), far);

    let outcome = scanner.scan(FacingMode::User).await.unwrap();
    assert_eq!(
        outcome,
        ScanOutcome::NoMatch {
            message: "No matching student found in database".into(),
            suggestion: "Please register or try again".into(),
        }
    );
    let report = scanner.status().borrow().report.clone().unwrap();
    assert!(!report.success);
    assert_eq!(report.blink_count, 2);
}

#[tokio::test(start_paused = true)]
async fn test_empty_gallery_is_no_match() {
    let devices = FakeDevices::new();
    let mut scanner = scanner(&devices, ScriptedDetector::cycle(blink_twice()), vec![]);
    let outcome = scanner.scan(FacingMode::User).await.unwrap();
    assert!(matches!(outcome, ScanOutcome::NoMatch { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_photo_that_never_blinks_times_out() {
    let devices = FakeDevices::new();
    let detector = ScriptedDetector::new(vec![], vec![open_face()]);
    let mut scanner = scanner(&devices, detector, gallery());
    let status = scanner.status();

    let err = scanner.scan(FacingMode::User).await.unwrap_err();
    assert!(matches!(err, ScanError::TimedOut(d) if d == Duration::from_secs(30)));
    assert!(!scanner.session().is_active());
    assert_eq!(scanner.stage(), ScanStage::Idle);
    assert_eq!(status.borrow().stage, ScanStage::Idle);
    assert_eq!(devices.live_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_permission_denied_is_surfaced() {
    let devices = FakeDevices::denying();
    let mut scanner = scanner(&devices, ScriptedDetector::cycle(blink_twice()), gallery());

    let err = scanner.scan(FacingMode::User).await.unwrap_err();
    assert!(err.is_permission_denied());
    assert!(!scanner.session().is_active());
    assert_eq!(scanner.stage(), ScanStage::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_progress_never_decreases_during_scan() {
    let devices = FakeDevices::new();
    let mut scanner = scanner(&devices, ScriptedDetector::cycle(blink_twice()), gallery());
    let mut status = scanner.status();

    let watcher = tokio::spawn(async move {
        let mut seen = vec![status.borrow().progress];
        while status.changed().await.is_ok() {
            let snapshot = status.borrow().clone();
            seen.push(snapshot.progress);
            if snapshot.stage == ScanStage::Complete {
                break;
            }
        }
        seen
    });

    scanner.scan(FacingMode::User).await.unwrap();
    let seen = watcher.await.unwrap();
    assert!(seen.windows(2).all(|w| w[1] >= w[0]), "progress went backwards: {seen:?}");
    assert_eq!(seen.last().copied(), Some(100.0));
}

#[tokio::test(start_paused = true)]
async fn test_second_scan_keeps_new_session_open() {
    let devices = FakeDevices::new();
    let mut scanner = scanner(&devices, ScriptedDetector::cycle(blink_twice()), gallery());

    scanner.scan(FacingMode::User).await.unwrap();
    scanner.scan(FacingMode::User).await.unwrap();
    assert_eq!(devices.open_count(), 2);
    assert_eq!(devices.live_count(), 1);

    // The first scan's release timer must not close the second session.
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(scanner.session().is_active());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!scanner.session().is_active());
}

#[tokio::test(start_paused = true)]
async fn test_reset_returns_to_idle() {
    let devices = FakeDevices::new();
    let mut scanner = scanner(&devices, ScriptedDetector::cycle(blink_twice()), gallery());

    scanner.scan(FacingMode::User).await.unwrap();
    scanner.reset();
    assert_eq!(scanner.stage(), ScanStage::Idle);
    assert!(!scanner.session().is_active());
    assert_eq!(scanner.status().borrow().progress, 0.0);
}

#[tokio::test]
async fn test_scanner_rejects_zero_verify_tick() {
    let devices = FakeDevices::new();
    let config = ScanConfig {
        verify_tick_ms: 0,
        ..ScanConfig::default()
    };
    let result = FaceScanner::new(
        Arc::clone(&devices),
        Arc::new(ScriptedDetector::cycle(blink_twice())),
        gallery(),
        &config,
    );
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}

#[tokio::test]
async fn test_scanner_rejects_zero_poll_interval() {
    let devices = FakeDevices::new();
    let config = ScanConfig {
        poll_interval_ms: 0,
        ..ScanConfig::default()
    };
    let result = FaceScanner::new(
        Arc::clone(&devices),
        Arc::new(ScriptedDetector::cycle(blink_twice())),
        gallery(),
        &config,
    );
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
    assert_eq!(devices.open_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_truncated_gallery_descriptor_never_matches() {
    let devices = FakeDevices::new();
    let gallery = vec![LabeledDescriptors {
        label: "CS2024009".into(),
        name: "Corrupt Record".into(),
        descriptors: vec![Descriptor::new(vec![0.0])],
    }];
    let mut scanner = scanner(&devices, ScriptedDetector::cycle(blink_twice()), gallery);

    let outcome = scanner.scan(FacingMode::User).await.unwrap();
    assert!(matches!(outcome, ScanOutcome::NoMatch { .. }));
}
