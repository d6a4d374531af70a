//! Fake camera and detectors shared by the integration tests.

#![allow(dead_code)]

use astitva_core::{BoundingBox, Descriptor, Detection, DetectorError, FaceDetector, Landmarks, Point};
use astitva_hw::{CameraError, FacingMode, Frame, MediaDevices, Resolution, VideoStream};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Pixels every fake frame carries: a 4x2 image with distinct values.
pub const FRAME_PIXELS: [u8; 8] = [10, 20, 30, 40, 50, 60, 70, 80];
pub const FRAME_WIDTH: u32 = 4;
pub const FRAME_HEIGHT: u32 = 2;

/// Observable state of one opened fake stream.
#[derive(Debug)]
pub struct StreamProbe {
    pub facing: FacingMode,
    pub live: AtomicBool,
    pub grabs: AtomicUsize,
    pub stops: AtomicUsize,
}

impl StreamProbe {
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

pub struct FakeStream {
    probe: Arc<StreamProbe>,
    sequence: AtomicU32,
}

impl VideoStream for FakeStream {
    async fn grab_frame(&self) -> Result<Frame, CameraError> {
        if !self.probe.is_live() {
            return Err(CameraError::Stopped);
        }
        self.probe.grabs.fetch_add(1, Ordering::SeqCst);
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        Ok(Frame::from_gray(FRAME_PIXELS.to_vec(), FRAME_WIDTH, FRAME_HEIGHT, sequence))
    }

    fn stop(&self) {
        if self.probe.live.swap(false, Ordering::SeqCst) {
            self.probe.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_live(&self) -> bool {
        self.probe.is_live()
    }
}

/// Media devices that hand out in-memory streams, or refuse access.
#[derive(Default)]
pub struct FakeDevices {
    deny: bool,
    opened: Mutex<Vec<Arc<StreamProbe>>>,
}

impl FakeDevices {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn denying() -> Arc<Self> {
        Arc::new(Self {
            deny: true,
            ..Self::default()
        })
    }

    pub fn probes(&self) -> Vec<Arc<StreamProbe>> {
        self.opened.lock().unwrap().clone()
    }

    pub fn open_count(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    pub fn live_count(&self) -> usize {
        self.probes().iter().filter(|p| p.is_live()).count()
    }
}

impl MediaDevices for FakeDevices {
    type Stream = FakeStream;

    async fn open(&self, facing: FacingMode, _resolution: Resolution) -> Result<FakeStream, CameraError> {
        if self.deny {
            return Err(CameraError::PermissionDenied("/dev/video0".into()));
        }
        let probe = Arc::new(StreamProbe {
            facing,
            live: AtomicBool::new(true),
            grabs: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        });
        self.opened.lock().unwrap().push(Arc::clone(&probe));
        Ok(FakeStream {
            probe,
            sequence: AtomicU32::new(0),
        })
    }
}

/// Detector that plays back a fixed list of results, optionally on repeat.
pub struct ScriptedDetector {
    script: Vec<Vec<Detection>>,
    repeat: bool,
    fallback: Vec<Detection>,
    cursor: AtomicUsize,
    delay: Option<Duration>,
    pub calls: AtomicUsize,
}

impl ScriptedDetector {
    pub fn new(script: Vec<Vec<Detection>>, fallback: Vec<Detection>) -> Self {
        Self {
            script,
            repeat: false,
            fallback,
            cursor: AtomicUsize::new(0),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn cycle(script: Vec<Vec<Detection>>) -> Self {
        Self {
            repeat: true,
            ..Self::new(script, Vec::new())
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FaceDetector for ScriptedDetector {
    async fn detect(&self, _frame: &[u8], _width: u32, _height: u32) -> Result<Vec<Detection>, DetectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let index = self.cursor.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let result = if self.repeat && !self.script.is_empty() {
            self.script[index % self.script.len()].clone()
        } else {
            self.script.get(index).cloned().unwrap_or_else(|| self.fallback.clone())
        };
        Ok(result)
    }
}

/// Detector that reports whatever faces are currently "in view".
#[derive(Default)]
pub struct SceneDetector {
    faces: Mutex<Vec<Detection>>,
    last_frame: Mutex<Vec<u8>>,
}

impl SceneDetector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn show(&self, faces: Vec<Detection>) {
        *self.faces.lock().unwrap() = faces;
    }

    pub fn last_frame(&self) -> Vec<u8> {
        self.last_frame.lock().unwrap().clone()
    }
}

impl FaceDetector for SceneDetector {
    async fn detect(&self, frame: &[u8], _width: u32, _height: u32) -> Result<Vec<Detection>, DetectorError> {
        *self.last_frame.lock().unwrap() = frame.to_vec();
        Ok(self.faces.lock().unwrap().clone())
    }
}

/// A 68-point face whose eyes are 30 px wide and `opening` px tall.
pub fn face(opening: f32, descriptor: Vec<f32>) -> Detection {
    let mut points = vec![Point::new(0.0, 0.0); 68];
    for (offset, x0) in [(36usize, 100.0f32), (42, 160.0)] {
        points[offset] = Point::new(x0, 120.0);
        points[offset + 1] = Point::new(x0 + 10.0, 120.0 - opening / 2.0);
        points[offset + 2] = Point::new(x0 + 20.0, 120.0 - opening / 2.0);
        points[offset + 3] = Point::new(x0 + 30.0, 120.0);
        points[offset + 4] = Point::new(x0 + 20.0, 120.0 + opening / 2.0);
        points[offset + 5] = Point::new(x0 + 10.0, 120.0 + opening / 2.0);
    }
    Detection {
        region: BoundingBox {
            x: 80.0,
            y: 60.0,
            width: 140.0,
            height: 160.0,
            score: 0.97,
        },
        landmarks: Landmarks::new(points),
        descriptor: Descriptor::new(descriptor),
    }
}

/// Eyes open: EAR 0.3.
pub fn open_face() -> Detection {
    face(9.0, vec![0.0; 4])
}

/// Eyes closed: EAR 0.1.
pub fn closed_face() -> Detection {
    face(3.0, vec![0.0; 4])
}

/// Open, closed, open, open, closed: two blinks 300 ms apart at 100 ms polling.
pub fn blink_twice() -> Vec<Vec<Detection>> {
    vec![
        vec![open_face()],
        vec![closed_face()],
        vec![open_face()],
        vec![open_face()],
        vec![closed_face()],
    ]
}
