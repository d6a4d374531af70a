//! Media-capture seam: facing modes, stream acquisition and release.

use crate::frame::Frame;
use serde::{Deserialize, Serialize};
use std::future::Future;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("camera stream is stopped")]
    Stopped,
}

impl CameraError {
    /// Access was refused, as opposed to no camera being there at all.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, CameraError::PermissionDenied(_))
    }
}

/// Which camera to use, named the way browsers name them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    /// Front camera, facing the user. Stills are mirrored.
    #[default]
    User,
    /// Rear camera.
    Environment,
}

impl FacingMode {
    pub fn toggled(self) -> Self {
        match self {
            FacingMode::User => FacingMode::Environment,
            FacingMode::Environment => FacingMode::User,
        }
    }

    /// Front-camera stills are flipped so they read like a mirror.
    pub fn is_mirrored(self) -> bool {
        self == FacingMode::User
    }
}

impl std::fmt::Display for FacingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FacingMode::User => f.write_str("user"),
            FacingMode::Environment => f.write_str("environment"),
        }
    }
}

impl std::str::FromStr for FacingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "user" | "front" => Ok(FacingMode::User),
            "environment" | "back" | "rear" => Ok(FacingMode::Environment),
            other => Err(format!("unknown facing mode: {other} (use user or environment)")),
        }
    }
}

/// Requested capture size. Drivers may negotiate something else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
        }
    }
}

/// A live camera stream.
pub trait VideoStream: Send + Sync + 'static {
    /// Grab the current frame as grayscale.
    fn grab_frame(&self) -> impl Future<Output = Result<Frame, CameraError>> + Send;

    /// Release every track held by this stream. Calling it again is a no-op.
    fn stop(&self);

    fn is_live(&self) -> bool;
}

/// Something that can hand out camera streams by facing mode.
pub trait MediaDevices: Send + Sync + 'static {
    type Stream: VideoStream;

    fn open(
        &self,
        facing: FacingMode,
        resolution: Resolution,
    ) -> impl Future<Output = Result<Self::Stream, CameraError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_flips() {
        assert_eq!(FacingMode::User.toggled(), FacingMode::Environment);
        assert_eq!(FacingMode::Environment.toggled(), FacingMode::User);
    }

    #[test]
    fn test_parse_facing_aliases() {
        assert_eq!("front".parse::<FacingMode>().unwrap(), FacingMode::User);
        assert_eq!("Rear".parse::<FacingMode>().unwrap(), FacingMode::Environment);
        assert!("sideways".parse::<FacingMode>().is_err());
    }

    #[test]
    fn test_facing_serde_names() {
        assert_eq!(serde_json::to_string(&FacingMode::Environment).unwrap(), "\"environment\"");
        assert_eq!(FacingMode::User.to_string(), "user");
    }

    #[test]
    fn test_permission_denied_is_distinct() {
        assert!(CameraError::PermissionDenied("/dev/video0".into()).is_permission_denied());
        assert!(!CameraError::DeviceNotFound("/dev/video0".into()).is_permission_denied());
    }

    #[test]
    fn test_default_resolution() {
        assert_eq!(Resolution::default(), Resolution { width: 640, height: 480 });
    }
}
