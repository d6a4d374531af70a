//! astitva-hw — Camera access for the attendance scanner.
//!
//! Defines the media-capture seam ([`MediaDevices`] / [`VideoStream`])
//! that camera sessions run against, plus a V4L2 implementation that maps
//! front/back facing modes onto configured device nodes.

pub mod camera;
pub mod frame;
pub mod v4l2;

pub use camera::{CameraError, FacingMode, MediaDevices, Resolution, VideoStream};
pub use frame::{Frame, FrameError};
pub use v4l2::{V4lCamera, V4lDevices, V4lStream};
