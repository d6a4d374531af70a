//! astitva-scan — camera-driven verification and registration flows.
//!
//! Wires the state machines from `astitva-core` to a live camera
//! (`astitva-hw`) and to the attendance backend:
//!
//! - [`CameraSession`] owns one stream and its detection poller.
//! - [`FaceScanner`] runs a verification scan: blink liveness, confidence
//!   sampling, best-match finalization.
//! - [`FaceRegistration`] captures the stills for a new student and
//!   submits them.
//! - [`StudentBackend`] is the REST seam, with [`HttpBackend`] and
//!   [`MockBackend`] behind it.

pub mod backend;
pub mod config;
mod poller;
pub mod registration;
pub mod scanner;
pub mod session;

pub use backend::{
    register_student_complete, AttendanceRequest, BackendError, HttpBackend, MockBackend,
    NewStudent, RegistrationReceipt, StudentBackend, StudentDetails, StudentRecord, StudentUpdate,
};
pub use config::{ConfigError, ScanConfig};
pub use registration::{FaceRegistration, RegistrationError};
pub use scanner::{FaceScanner, ScanError, ScanStatus};
pub use session::{CameraSession, DetectionTick};
