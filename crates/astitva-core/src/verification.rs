//! Verification stage machine.
//!
//! Drives one scan from `Detecting` to a terminal outcome:
//!
//! ```text
//! idle → detecting → liveness_check → verifying → complete
//!                                   ↘ no_face
//! ```
//!
//! The aggregator is purely reactive. The caller feeds it detection ticks
//! ([`VerificationAggregator::observe`]) and verification ticks
//! ([`VerificationAggregator::sample`]); timing lives with the caller.

use crate::liveness::{LivenessConfig, LivenessEvaluator};
use crate::types::{Descriptor, Detection, Matcher};
use serde::{Deserialize, Serialize};
use std::time::Instant;

pub const NO_MATCH_MESSAGE: &str = "No matching student found in database";
pub const NO_MATCH_SUGGESTION: &str = "Please register or try again";

/// Where a scan currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStage {
    Idle,
    Detecting,
    LivenessCheck,
    Verifying,
    Complete,
    NoFace,
}

impl ScanStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, ScanStage::Complete | ScanStage::NoFace)
    }
}

impl std::fmt::Display for ScanStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScanStage::Idle => "idle",
            ScanStage::Detecting => "detecting",
            ScanStage::LivenessCheck => "liveness_check",
            ScanStage::Verifying => "verifying",
            ScanStage::Complete => "complete",
            ScanStage::NoFace => "no_face",
        };
        f.write_str(s)
    }
}

/// Terminal result of a scan.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    Success {
        id: String,
        name: String,
        /// `round((1 - distance) * 100)`.
        confidence: u8,
        distance: f32,
    },
    NoMatch {
        message: String,
        suggestion: String,
    },
    NoFace,
}

impl ScanOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ScanOutcome::Success { .. })
    }
}

/// Flat, serializable view of a [`ScanOutcome`] for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    pub blink_count: u32,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ScanReport {
    pub fn new(outcome: &ScanOutcome, blink_count: u32) -> Self {
        let mut report = Self {
            success: false,
            id: None,
            name: None,
            confidence: None,
            distance: None,
            message: None,
            suggestion: None,
            blink_count,
            timestamp: chrono::Utc::now(),
        };
        match outcome {
            ScanOutcome::Success {
                id,
                name,
                confidence,
                distance,
            } => {
                report.success = true;
                report.id = Some(id.clone());
                report.name = Some(name.clone());
                report.confidence = Some(*confidence);
                report.distance = Some(*distance);
            }
            ScanOutcome::NoMatch {
                message,
                suggestion,
            } => {
                report.message = Some(message.clone());
                report.suggestion = Some(suggestion.clone());
            }
            ScanOutcome::NoFace => {
                report.message = Some("No face detected".to_string());
                report.suggestion = Some("Position your face in the frame and try again".to_string());
            }
        }
        report
    }
}

/// Confidence sampling and acceptance rules.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerificationPolicy {
    /// Confidence before the first attempt is added.
    pub base_confidence: u32,
    /// Confidence added per attempt.
    pub confidence_step: u32,
    /// Finalize after this many attempts.
    pub max_attempts: u32,
    /// Finalize early once confidence is strictly above this.
    pub finalize_above: u32,
    /// A match is accepted only below this distance.
    pub accept_distance: f32,
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        Self {
            base_confidence: 30,
            confidence_step: 15,
            max_attempts: 3,
            finalize_above: 70,
            accept_distance: 0.5,
        }
    }
}

impl VerificationPolicy {
    /// Confidence shown after `attempts` samples, capped at 100.
    pub fn confidence_at(&self, attempts: u32) -> u32 {
        self.base_confidence
            .saturating_add(attempts.saturating_mul(self.confidence_step))
            .min(100)
    }
}

/// What a single `observe` call changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub blink_counted: bool,
    pub stage_changed: bool,
}

/// Per-scan verification state.
#[derive(Debug)]
pub struct VerificationAggregator<M> {
    matcher: M,
    policy: VerificationPolicy,
    liveness: LivenessEvaluator,
    stage: ScanStage,
    progress: f32,
    attempts: u32,
    confidence: u32,
    candidate: Option<Descriptor>,
    outcome: Option<ScanOutcome>,
}

impl<M: Matcher> VerificationAggregator<M> {
    pub fn new(matcher: M, policy: VerificationPolicy, liveness: LivenessConfig) -> Self {
        Self {
            matcher,
            policy,
            liveness: LivenessEvaluator::new(liveness),
            stage: ScanStage::Idle,
            progress: 0.0,
            attempts: 0,
            confidence: 0,
            candidate: None,
            outcome: None,
        }
    }

    /// Start a new scan: clears liveness, attempts and any previous outcome.
    pub fn begin(&mut self) {
        self.liveness.reset();
        self.attempts = 0;
        self.confidence = 0;
        self.candidate = None;
        self.outcome = None;
        self.progress = 0.0;
        self.set_stage(ScanStage::Detecting);
        self.raise_progress(30.0);
    }

    /// Return to idle. Progress resets because the session is over.
    pub fn reset(&mut self) {
        self.liveness.reset();
        self.attempts = 0;
        self.confidence = 0;
        self.candidate = None;
        self.outcome = None;
        self.progress = 0.0;
        self.set_stage(ScanStage::Idle);
    }

    /// Feed one detection tick. `face` is the first detected face, if any.
    ///
    /// Ticks outside the detecting and liveness stages are ignored.
    pub fn observe(&mut self, face: Option<&Detection>, at: Instant) -> Observation {
        let mut observation = Observation {
            blink_counted: false,
            stage_changed: false,
        };
        if !matches!(self.stage, ScanStage::Detecting | ScanStage::LivenessCheck) {
            return observation;
        }
        let Some(face) = face else {
            return observation;
        };

        self.candidate = Some(face.descriptor.clone());

        if self.stage == ScanStage::Detecting {
            self.set_stage(ScanStage::LivenessCheck);
            observation.stage_changed = true;
        }

        let before = self.liveness.blink_count();
        self.liveness.observe_landmarks(&face.landmarks, at);
        observation.blink_counted = self.liveness.blink_count() > before;

        let blinks = self.liveness.blink_count().min(self.liveness.config().required_blinks);
        self.raise_progress(30.0 + 15.0 * blinks as f32);

        if self.liveness.is_confirmed() {
            let candidate = self.candidate.clone();
            self.start_verification(candidate);
            observation.stage_changed = true;
        }
        observation
    }

    /// Enter `Verifying` with the given descriptor, or `NoFace` without one.
    ///
    /// Only valid from `LivenessCheck` once liveness is confirmed; ignored otherwise.
    pub fn start_verification(&mut self, descriptor: Option<Descriptor>) {
        if !self.liveness.is_confirmed() || self.stage != ScanStage::LivenessCheck {
            return;
        }
        self.raise_progress(60.0);
        match descriptor {
            Some(descriptor) => {
                self.candidate = Some(descriptor);
                self.attempts = 0;
                self.confidence = 0;
                self.set_stage(ScanStage::Verifying);
            }
            None => {
                tracing::warn!("no descriptor available when verification started");
                self.outcome = Some(ScanOutcome::NoFace);
                self.set_stage(ScanStage::NoFace);
            }
        }
    }

    /// One verification tick. Returns the outcome once finalized.
    pub fn sample(&mut self) -> Option<&ScanOutcome> {
        if self.stage != ScanStage::Verifying {
            return None;
        }
        self.attempts += 1;
        self.confidence = self.policy.confidence_at(self.attempts);
        self.raise_progress(60.0 + self.confidence as f32 * 0.4);
        tracing::debug!(
            attempts = self.attempts,
            confidence = self.confidence,
            "verification sample"
        );

        if self.attempts >= self.policy.max_attempts || self.confidence > self.policy.finalize_above {
            self.finalize();
            return self.outcome.as_ref();
        }
        None
    }

    fn finalize(&mut self) {
        let outcome = match self.candidate.as_ref() {
            None => ScanOutcome::NoFace,
            Some(descriptor) => match self.matcher.best_match(descriptor) {
                Some(best) if !best.is_unknown() && best.distance < self.policy.accept_distance => {
                    ScanOutcome::Success {
                        name: best.name.unwrap_or_else(|| best.label.clone()),
                        id: best.label,
                        confidence: ((1.0 - best.distance) * 100.0).round().clamp(0.0, 100.0) as u8,
                        distance: best.distance,
                    }
                }
                _ => ScanOutcome::NoMatch {
                    message: NO_MATCH_MESSAGE.to_string(),
                    suggestion: NO_MATCH_SUGGESTION.to_string(),
                },
            },
        };

        match &outcome {
            ScanOutcome::Success {
                id, confidence, ..
            } => tracing::info!(id = %id, confidence, "scan matched"),
            ScanOutcome::NoMatch { .. } => tracing::info!("scan finished without a match"),
            ScanOutcome::NoFace => tracing::warn!("scan finished without a face"),
        }

        self.outcome = Some(outcome);
        self.raise_progress(100.0);
        self.set_stage(ScanStage::Complete);
    }

    fn set_stage(&mut self, stage: ScanStage) {
        if self.stage != stage {
            tracing::info!(from = %self.stage, to = %stage, "scan stage changed");
            self.stage = stage;
        }
    }

    fn raise_progress(&mut self, target: f32) {
        self.progress = self.progress.max(target.min(100.0));
    }

    pub fn stage(&self) -> ScanStage {
        self.stage
    }

    /// Cosmetic progress in percent, never decreasing within one scan.
    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn confidence(&self) -> u32 {
        self.confidence
    }

    pub fn blink_count(&self) -> u32 {
        self.liveness.blink_count()
    }

    pub fn is_live(&self) -> bool {
        self.liveness.is_confirmed()
    }

    pub fn outcome(&self) -> Option<&ScanOutcome> {
        self.outcome.as_ref()
    }

    pub fn policy(&self) -> &VerificationPolicy {
        &self.policy
    }

    /// Swap the gallery between scans.
    pub fn set_matcher(&mut self, matcher: M) {
        self.matcher = matcher;
    }
}
