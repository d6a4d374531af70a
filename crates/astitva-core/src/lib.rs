//! astitva-core — Face verification and registration state machines.
//!
//! Holds the pieces of the attendance scanner that do not touch hardware
//! or the network: descriptor matching, blink-based liveness, the
//! verification stage machine and the registration capture sequencer.
//! Face detection itself is a consumed capability behind [`FaceDetector`].

pub mod capture;
pub mod detector;
pub mod liveness;
pub mod types;
pub mod verification;

pub use capture::{CaptureError, CaptureProgress, CaptureSequencer, CapturedFace, RegistrationStep};
pub use detector::{DetectorError, FaceDetector};
pub use liveness::{eye_aspect_ratio, LivenessConfig, LivenessEvaluator};
pub use types::{
    BestMatch, BoundingBox, Descriptor, Detection, FaceMatcher, LabeledDescriptors, Landmarks,
    Matcher, Point,
};
pub use verification::{
    Observation, ScanOutcome, ScanReport, ScanStage, VerificationAggregator, VerificationPolicy,
};
