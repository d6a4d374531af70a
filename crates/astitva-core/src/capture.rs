//! Registration capture sequencer.
//!
//! Collects a fixed number of single-face stills for one student. Each
//! accepted still keeps its JPEG bytes and descriptor; frames with no face
//! or several faces are rejected without touching the list.

use crate::types::{Descriptor, Detection};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Stills collected per registration.
pub const DEFAULT_CAPTURE_TARGET: usize = 3;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("no face detected, make sure your face is clearly visible")]
    NoFace,
    #[error("{0} faces detected, make sure only your face is in frame")]
    MultipleFaces(usize),
    #[error("maximum of {0} face captures reached")]
    Full(usize),
}

/// Registration wizard step driven by the capture count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStep {
    Capture,
    Review,
}

/// One accepted still.
#[derive(Debug, Clone, Serialize)]
pub struct CapturedFace {
    pub id: Uuid,
    /// JPEG-encoded frame.
    #[serde(skip)]
    pub image: Vec<u8>,
    pub descriptor: Descriptor,
    pub captured_at: DateTime<Utc>,
}

/// Result of an accepted capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureProgress {
    pub id: Uuid,
    pub captured: usize,
    pub target: usize,
    /// `true` when this capture moved the flow to review.
    pub advanced: bool,
}

#[derive(Debug, Clone)]
pub struct CaptureSequencer {
    target: usize,
    captures: Vec<CapturedFace>,
    step: RegistrationStep,
}

impl Default for CaptureSequencer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPTURE_TARGET)
    }
}

impl CaptureSequencer {
    pub fn new(target: usize) -> Self {
        Self {
            target: target.max(1),
            captures: Vec::new(),
            step: RegistrationStep::Capture,
        }
    }

    /// Offer one still and the faces detected in it.
    pub fn accept(
        &mut self,
        image: Vec<u8>,
        detections: Vec<Detection>,
    ) -> Result<CaptureProgress, CaptureError> {
        if self.captures.len() >= self.target {
            return Err(CaptureError::Full(self.target));
        }

        let mut detections = detections.into_iter();
        let detection = match (detections.next(), detections.len()) {
            (None, _) => return Err(CaptureError::NoFace),
            (Some(d), 0) => d,
            (Some(_), rest) => return Err(CaptureError::MultipleFaces(rest + 1)),
        };

        let face = CapturedFace {
            id: Uuid::new_v4(),
            image,
            descriptor: detection.descriptor,
            captured_at: Utc::now(),
        };
        let id = face.id;
        self.captures.push(face);

        let advanced = self.captures.len() >= self.target && self.step == RegistrationStep::Capture;
        if advanced {
            self.step = RegistrationStep::Review;
        }
        tracing::info!(
            captured = self.captures.len(),
            target = self.target,
            advanced,
            "face captured"
        );

        Ok(CaptureProgress {
            id,
            captured: self.captures.len(),
            target: self.target,
            advanced,
        })
    }

    /// Drop one capture. Falling below the target returns the flow to capture.
    pub fn remove(&mut self, id: Uuid) -> Option<CapturedFace> {
        let idx = self.captures.iter().position(|c| c.id == id)?;
        let removed = self.captures.remove(idx);
        if self.captures.len() < self.target {
            self.step = RegistrationStep::Capture;
        }
        tracing::debug!(%id, remaining = self.captures.len(), "capture removed");
        Some(removed)
    }

    /// Clear every capture and the count together.
    pub fn reset(&mut self) {
        self.captures.clear();
        self.step = RegistrationStep::Capture;
    }

    pub fn captures(&self) -> &[CapturedFace] {
        &self.captures
    }

    pub fn count(&self) -> usize {
        self.captures.len()
    }

    pub fn target(&self) -> usize {
        self.target
    }

    pub fn step(&self) -> RegistrationStep {
        self.step
    }

    pub fn is_complete(&self) -> bool {
        self.captures.len() >= self.target
    }

    /// Descriptors in capture order.
    pub fn descriptors(&self) -> Vec<Descriptor> {
        self.captures.iter().map(|c| c.descriptor.clone()).collect()
    }
}
