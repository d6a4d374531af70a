//! Verification scan driver.
//!
//! Runs one scan end to end on a [`CameraSession`]: detection ticks feed
//! the liveness check, a slower verification tick samples confidence, and
//! the best gallery match finalizes the outcome. Progress is published on
//! a `watch` channel for whatever is drawing the UI.

use crate::config::{ConfigError, ScanConfig};
use crate::session::CameraSession;
use astitva_core::{
    FaceDetector, FaceMatcher, LabeledDescriptors, ScanOutcome, ScanReport, ScanStage,
    VerificationAggregator,
};
use astitva_hw::{CameraError, FacingMode, MediaDevices};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("scan timed out after {0:?}")]
    TimedOut(Duration),
    #[error("detection stream closed")]
    StreamClosed,
}

impl ScanError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, ScanError::Camera(e) if e.is_permission_denied())
    }
}

/// Snapshot of a scan for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanStatus {
    pub active: bool,
    pub face_detected: bool,
    pub stage: ScanStage,
    pub progress: f32,
    pub blink_count: u32,
    pub confidence: u32,
    pub attempts: u32,
    pub report: Option<ScanReport>,
}

impl Default for ScanStatus {
    fn default() -> Self {
        Self {
            active: false,
            face_detected: false,
            stage: ScanStage::Idle,
            progress: 0.0,
            blink_count: 0,
            confidence: 0,
            attempts: 0,
            report: None,
        }
    }
}

struct ScanTiming {
    verify_tick: Duration,
    release_grace: Duration,
    scan_timeout: Duration,
}

/// Drives verification scans against a labeled gallery.
pub struct FaceScanner<M: MediaDevices, F: FaceDetector> {
    session: CameraSession<M, F>,
    aggregator: VerificationAggregator<FaceMatcher>,
    matcher_threshold: f32,
    timing: ScanTiming,
    status: watch::Sender<ScanStatus>,
}

impl<M: MediaDevices, F: FaceDetector> FaceScanner<M, F> {
    pub fn new(
        devices: Arc<M>,
        detector: Arc<F>,
        gallery: Vec<LabeledDescriptors>,
        config: &ScanConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let session = CameraSession::new(devices, detector, config.resolution(), config.poll_interval());
        let matcher = FaceMatcher::new(gallery, config.matcher_threshold);
        let (status, _) = watch::channel(ScanStatus::default());
        Ok(Self {
            session,
            aggregator: VerificationAggregator::new(matcher, config.policy(), config.liveness()),
            matcher_threshold: config.matcher_threshold,
            timing: ScanTiming {
                verify_tick: config.verify_tick(),
                release_grace: config.release_grace(),
                scan_timeout: config.scan_timeout(),
            },
            status,
        })
    }

    /// Replace the gallery used by later scans.
    pub fn set_gallery(&mut self, gallery: Vec<LabeledDescriptors>) {
        self.aggregator
            .set_matcher(FaceMatcher::new(gallery, self.matcher_threshold));
    }

    /// Watch scan progress.
    pub fn status(&self) -> watch::Receiver<ScanStatus> {
        self.status.subscribe()
    }

    pub fn session(&self) -> &CameraSession<M, F> {
        &self.session
    }

    pub fn stage(&self) -> ScanStage {
        self.aggregator.stage()
    }

    /// Run one scan on the camera facing `facing`.
    ///
    /// `NoMatch` and `NoFace` are ordinary outcomes. Errors are reserved
    /// for the camera failing to open and for the overall deadline; in
    /// both cases the camera is released and the scanner is back at idle.
    pub async fn scan(&mut self, facing: FacingMode) -> Result<ScanOutcome, ScanError> {
        let deadline = self.timing.scan_timeout;
        match tokio::time::timeout(deadline, self.run_scan(facing)).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => {
                self.abandon();
                Err(e)
            }
            Err(_) => {
                tracing::warn!(timeout_secs = deadline.as_secs(), stage = %self.aggregator.stage(), "scan timed out");
                self.abandon();
                Err(ScanError::TimedOut(deadline))
            }
        }
    }

    /// Stop the camera and return to idle.
    pub fn reset(&mut self) {
        self.abandon();
    }

    fn abandon(&mut self) {
        self.session.stop();
        self.aggregator.reset();
        self.publish(None);
    }

    async fn run_scan(&mut self, facing: FacingMode) -> Result<ScanOutcome, ScanError> {
        self.aggregator.begin();
        let mut ticks = self.session.subscribe();
        self.session.start(facing).await?;
        let epoch = self.session.epoch();
        self.publish(None);

        while matches!(
            self.aggregator.stage(),
            ScanStage::Detecting | ScanStage::LivenessCheck
        ) {
            let tick = ticks.recv().await.ok_or(ScanError::StreamClosed)?;
            if tick.epoch != epoch {
                continue;
            }
            let observation = self.aggregator.observe(tick.primary.as_ref(), tick.observed_at);
            if observation.blink_counted || observation.stage_changed {
                self.publish(None);
            }
        }

        if self.aggregator.stage() == ScanStage::Verifying {
            let period = self.timing.verify_tick;
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if self.aggregator.sample().is_some() {
                    break;
                }
                self.publish(None);
            }
        }

        let outcome = self.aggregator.outcome().cloned().unwrap_or(ScanOutcome::NoFace);
        let report = ScanReport::new(&outcome, self.aggregator.blink_count());
        self.publish(Some(report));
        self.session.schedule_release(self.timing.release_grace);
        Ok(outcome)
    }

    fn publish(&self, report: Option<ScanReport>) {
        let status = ScanStatus {
            active: self.session.is_active(),
            face_detected: self.session.face_detected(),
            stage: self.aggregator.stage(),
            progress: self.aggregator.progress(),
            blink_count: self.aggregator.blink_count(),
            confidence: self.aggregator.confidence(),
            attempts: self.aggregator.attempts(),
            report,
        };
        self.status.send_replace(status);
    }
}
