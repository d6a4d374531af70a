//! Active liveness detection via blink counting.
//!
//! A printed photograph or a still image held up to the camera never
//! blinks. Each poll tick feeds the eye landmarks of the tracked face into
//! [`LivenessEvaluator`], which computes an eye-aspect-ratio (EAR) and
//! counts the moments the eyes close. Two debounced blinks confirm a live
//! subject.
//!
//! # Threat Coverage
//!
//! - **Blocks:** Printed photographs, static images on a screen.
//! - **Does not block:** Video replay (the recorded subject blinks),
//!   3D masks with cut-out eyes.

use crate::types::{Landmarks, Point};
use std::time::{Duration, Instant};

/// EAR below which the eyes are treated as closed.
pub const DEFAULT_BLINK_THRESHOLD: f32 = 0.2;
/// Minimum spacing between two counted blinks. A single blink spans
/// several 100 ms poll ticks; without this it would count more than once.
pub const DEFAULT_BLINK_DEBOUNCE: Duration = Duration::from_millis(300);
/// Blinks needed before liveness is confirmed.
pub const DEFAULT_REQUIRED_BLINKS: u32 = 2;

/// Tunables for [`LivenessEvaluator`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LivenessConfig {
    pub blink_threshold: f32,
    pub debounce: Duration,
    pub required_blinks: u32,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            blink_threshold: DEFAULT_BLINK_THRESHOLD,
            debounce: DEFAULT_BLINK_DEBOUNCE,
            required_blinks: DEFAULT_REQUIRED_BLINKS,
        }
    }
}

/// Height-over-width ratio of one eye outline.
///
/// Uses the 68-point eye convention: `p0`/`p3` are the corners, `p1`/`p5`
/// the upper and lower lid points on the outer half.
fn single_eye_ratio(eye: &[Point]) -> Option<f32> {
    if eye.len() < 6 {
        return None;
    }
    let height = (eye[1].y - eye[5].y).abs();
    let width = (eye[0].x - eye[3].x).abs();
    if width <= f32::EPSILON {
        return None;
    }
    Some(height / width)
}

/// Mean eye-aspect-ratio of both eyes.
///
/// Returns `None` when either eye has fewer than six points or zero width.
pub fn eye_aspect_ratio(left_eye: &[Point], right_eye: &[Point]) -> Option<f32> {
    let left = single_eye_ratio(left_eye)?;
    let right = single_eye_ratio(right_eye)?;
    Some((left + right) / 2.0)
}

/// Blink counter for one scanning session.
#[derive(Debug, Clone)]
pub struct LivenessEvaluator {
    config: LivenessConfig,
    blink_count: u32,
    last_blink: Option<Instant>,
    confirmed: bool,
}

impl Default for LivenessEvaluator {
    fn default() -> Self {
        Self::new(LivenessConfig::default())
    }
}

impl LivenessEvaluator {
    pub fn new(config: LivenessConfig) -> Self {
        Self {
            config,
            blink_count: 0,
            last_blink: None,
            confirmed: false,
        }
    }

    /// Feed one EAR sample taken at `at`. Returns `true` if it counted as a blink.
    pub fn observe(&mut self, ear: f32, at: Instant) -> bool {
        if ear >= self.config.blink_threshold {
            return false;
        }
        if let Some(last) = self.last_blink {
            if at.saturating_duration_since(last) < self.config.debounce {
                tracing::trace!(ear, "closed-eye sample inside debounce window");
                return false;
            }
        }

        self.last_blink = Some(at);
        self.blink_count += 1;
        if !self.confirmed && self.blink_count >= self.config.required_blinks {
            self.confirmed = true;
            tracing::info!(blinks = self.blink_count, "liveness confirmed");
        } else {
            tracing::debug!(ear, blinks = self.blink_count, "blink counted");
        }
        true
    }

    /// Compute the EAR from a face's landmarks and feed it in.
    ///
    /// Returns the EAR that was evaluated, or `None` if the landmarks did
    /// not describe both eyes.
    pub fn observe_landmarks(&mut self, landmarks: &Landmarks, at: Instant) -> Option<f32> {
        let ear = eye_aspect_ratio(landmarks.left_eye(), landmarks.right_eye())?;
        self.observe(ear, at);
        Some(ear)
    }

    pub fn blink_count(&self) -> u32 {
        self.blink_count
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    pub fn config(&self) -> &LivenessConfig {
        &self.config
    }

    /// Clear all counters for a new session.
    pub fn reset(&mut self) {
        self.blink_count = 0;
        self.last_blink = None;
        self.confirmed = false;
    }
}
