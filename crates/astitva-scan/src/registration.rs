//! Registration capture flow: open the camera, collect stills, submit.

use crate::backend::{register_student_complete, BackendError, RegistrationReceipt, StudentBackend, StudentDetails};
use crate::config::{ConfigError, ScanConfig};
use crate::session::CameraSession;
use astitva_core::{
    CaptureError, CaptureProgress, CaptureSequencer, CapturedFace, DetectorError, FaceDetector,
    RegistrationStep,
};
use astitva_hw::{CameraError, FacingMode, FrameError, MediaDevices};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("capture at least one face before submitting")]
    NoCaptures,
}

/// Captures the face stills for one new student.
pub struct FaceRegistration<M: MediaDevices, F: FaceDetector> {
    session: CameraSession<M, F>,
    detector: Arc<F>,
    sequencer: CaptureSequencer,
    jpeg_quality: u8,
}

impl<M: MediaDevices, F: FaceDetector> FaceRegistration<M, F> {
    pub fn new(devices: Arc<M>, detector: Arc<F>, config: &ScanConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            session: CameraSession::new(
                devices,
                Arc::clone(&detector),
                config.resolution(),
                config.poll_interval(),
            ),
            detector,
            sequencer: CaptureSequencer::new(config.capture_target),
            jpeg_quality: config.jpeg_quality,
        })
    }

    pub async fn open_camera(&mut self, facing: FacingMode) -> Result<(), RegistrationError> {
        self.session.start(facing).await?;
        Ok(())
    }

    pub fn close_camera(&self) -> bool {
        self.session.stop()
    }

    /// Switch between front and rear cameras, reopening if one was open.
    pub async fn toggle_camera(&mut self) -> Result<FacingMode, RegistrationError> {
        let was_active = self.session.is_active();
        let facing = self.session.toggle();
        if was_active {
            self.session.start(facing).await?;
        }
        Ok(facing)
    }

    /// Grab a still, check it holds exactly one face and keep it.
    ///
    /// Reaching the capture target moves the flow to review and releases
    /// the camera.
    pub async fn capture_face(&mut self) -> Result<CaptureProgress, RegistrationError> {
        if self.sequencer.is_complete() {
            return Err(CaptureError::Full(self.sequencer.target()).into());
        }

        let frame = self.session.capture_still().await?;
        let jpeg = frame.to_jpeg(self.jpeg_quality)?;
        let detections = self
            .detector
            .detect(&frame.data, frame.width, frame.height)
            .await?;

        let faces = detections.len();
        let progress = self.sequencer.accept(jpeg, detections).map_err(|e| {
            tracing::info!(faces, error = %e, "capture rejected");
            e
        })?;

        if progress.advanced {
            self.session.stop();
        }
        Ok(progress)
    }

    pub fn remove_capture(&mut self, id: Uuid) -> Option<CapturedFace> {
        self.sequencer.remove(id)
    }

    /// Clear every capture and start over.
    pub fn reset_capture(&mut self) {
        self.sequencer.reset();
        tracing::debug!("captures cleared");
    }

    pub fn captures(&self) -> &[CapturedFace] {
        self.sequencer.captures()
    }

    pub fn step(&self) -> RegistrationStep {
        self.sequencer.step()
    }

    pub fn session(&self) -> &CameraSession<M, F> {
        &self.session
    }

    /// Register the student with every captured still.
    pub async fn submit<B: StudentBackend>(
        &self,
        backend: &B,
        details: &StudentDetails,
    ) -> Result<RegistrationReceipt, RegistrationError> {
        if self.sequencer.count() == 0 {
            return Err(RegistrationError::NoCaptures);
        }
        let images = self
            .sequencer
            .captures()
            .iter()
            .map(|c| c.image.clone())
            .collect();
        let receipt =
            register_student_complete(backend, details, images, self.sequencer.descriptors()).await?;
        Ok(receipt)
    }
}
