//! V4L2 camera capture via the `v4l` crate.

use crate::camera::{CameraError, FacingMode, MediaDevices, Resolution, VideoStream};
use crate::frame::{self, Frame};
use std::path::Path;
use std::sync::{Arc, Mutex};
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, extract Y channel).
    Yuyv,
    /// 8-bit grayscale (1 byte/pixel).
    Grey,
}

/// Map an `open(2)` failure onto the camera error taxonomy.
fn open_error(device_path: &str, err: &std::io::Error) -> CameraError {
    match err.raw_os_error() {
        Some(libc::EACCES) | Some(libc::EPERM) => {
            CameraError::PermissionDenied(device_path.to_string())
        }
        Some(libc::EBUSY) => CameraError::DeviceBusy,
        _ => CameraError::DeviceNotFound(format!("{device_path}: {err}")),
    }
}

/// V4L2 camera device handle.
pub struct V4lCamera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl V4lCamera {
    /// Open a V4L2 camera by path and negotiate the requested resolution.
    pub fn open(device_path: &str, resolution: Resolution) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| open_error(device_path, &e))?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        // Ask for YUYV; accept GREY if that is all the driver offers.
        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;

        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = resolution.width;
        fmt.height = resolution.height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = if fourcc == FourCC::new(b"GREY") {
            PixelFormat::Grey
        } else if fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV or GREY)"
            )));
        };

        tracing::info!(
            requested_width = resolution.width,
            requested_height = resolution.height,
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    /// Capture a single frame, converting to grayscale if needed.
    pub fn capture_frame(&self) -> Result<Frame, CameraError> {
        let mut stream =
            MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4).map_err(|e| {
                CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
            })?;

        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

        let gray = self.buf_to_grayscale(buf)?;
        let is_dark = frame::is_dark_frame(&gray, 0.95);

        Ok(Frame {
            data: gray,
            width: self.width,
            height: self.height,
            timestamp: std::time::Instant::now(),
            sequence: meta.sequence,
            is_dark,
        })
    }

    fn buf_to_grayscale(&self, buf: &[u8]) -> Result<Vec<u8>, CameraError> {
        let pixels = (self.width * self.height) as usize;

        match self.pixel_format {
            PixelFormat::Grey => {
                if buf.len() < pixels {
                    return Err(CameraError::CaptureFailed(format!(
                        "GREY buffer too short: expected {pixels}, got {}",
                        buf.len()
                    )));
                }
                Ok(buf[..pixels].to_vec())
            }
            PixelFormat::Yuyv => frame::yuyv_to_grayscale(buf, self.width, self.height)
                .map_err(|e| CameraError::CaptureFailed(format!("YUYV conversion failed: {e}"))),
        }
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

/// Facing-mode → device-node mapping for V4L2 cameras.
#[derive(Debug, Clone)]
pub struct V4lDevices {
    front: String,
    rear: Option<String>,
}

impl V4lDevices {
    pub fn new(front: impl Into<String>, rear: Option<String>) -> Self {
        Self {
            front: front.into(),
            rear,
        }
    }

    /// Device node used for the given facing mode.
    pub fn device_for(&self, facing: FacingMode) -> Result<&str, CameraError> {
        match facing {
            FacingMode::User => Ok(&self.front),
            FacingMode::Environment => self.rear.as_deref().ok_or_else(|| {
                CameraError::DeviceNotFound("no rear (environment) camera configured".into())
            }),
        }
    }
}

impl MediaDevices for V4lDevices {
    type Stream = V4lStream;

    async fn open(
        &self,
        facing: FacingMode,
        resolution: Resolution,
    ) -> Result<V4lStream, CameraError> {
        let path = self.device_for(facing)?.to_string();
        tracing::debug!(device = %path, %facing, "acquiring camera");

        let camera = tokio::task::spawn_blocking(move || V4lCamera::open(&path, resolution))
            .await
            .map_err(|e| CameraError::CaptureFailed(format!("camera open task failed: {e}")))??;

        Ok(V4lStream {
            facing,
            camera: Arc::new(Mutex::new(Some(camera))),
        })
    }
}

/// An open V4L2 camera. Stopping drops the device, closing its descriptor.
pub struct V4lStream {
    facing: FacingMode,
    camera: Arc<Mutex<Option<V4lCamera>>>,
}

impl V4lStream {
    pub fn facing(&self) -> FacingMode {
        self.facing
    }
}

impl VideoStream for V4lStream {
    async fn grab_frame(&self) -> Result<Frame, CameraError> {
        let camera = Arc::clone(&self.camera);
        tokio::task::spawn_blocking(move || {
            let guard = camera
                .lock()
                .map_err(|_| CameraError::CaptureFailed("camera lock poisoned".into()))?;
            match guard.as_ref() {
                Some(cam) => cam.capture_frame(),
                None => Err(CameraError::Stopped),
            }
        })
        .await
        .map_err(|e| CameraError::CaptureFailed(format!("capture task failed: {e}")))?
    }

    fn stop(&self) {
        let released = match self.camera.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(cam) = released {
            tracing::info!(device = %cam.device_path, "camera released");
        }
    }

    fn is_live(&self) -> bool {
        self.camera
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }
}
