//! Face detection capability.
//!
//! Detection, landmarking and descriptor extraction run in an external
//! model; the scanner only consumes results through [`FaceDetector`].

use crate::types::Detection;
use std::future::Future;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector not ready: {0}")]
    NotReady(String),
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
}

/// Finds every face in a grayscale frame, with landmarks and descriptor.
///
/// Results are ordered by the implementation's own ranking; consumers
/// that need a single face take the first entry.
pub trait FaceDetector: Send + Sync + 'static {
    fn detect(
        &self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> impl Future<Output = Result<Vec<Detection>, DetectorError>> + Send;
}
