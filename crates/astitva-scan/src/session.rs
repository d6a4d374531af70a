//! Camera session: one stream, one detection poller, one epoch.
//!
//! Every `start` and `stop` bumps the session epoch. The poller and the
//! release timer capture the epoch they were started under and do
//! nothing once it has moved on, so a stale tick or a late release can
//! never touch a newer session.

use crate::poller::{self, PollContext};
use astitva_core::{Detection, FaceDetector};
use astitva_hw::{CameraError, FacingMode, Frame, MediaDevices, Resolution, VideoStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Ticks buffered for a subscriber before new ones are dropped.
const TICK_BUFFER: usize = 16;

/// One poll result, delivered to the current subscriber.
#[derive(Debug, Clone)]
pub struct DetectionTick {
    /// Session epoch the tick was produced under.
    pub epoch: u64,
    pub sequence: u32,
    pub observed_at: Instant,
    pub face_count: usize,
    /// First detected face, if any.
    pub primary: Option<Detection>,
}

/// Latest detection state shared between the poller and the session owner.
#[derive(Debug, Clone, Default)]
pub(crate) struct DetectionState {
    pub face_detected: bool,
    pub face_count: usize,
    /// Most recent first-face detection. Kept across empty ticks.
    pub candidate: Option<Detection>,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State reachable from the poller and the release timer.
pub(crate) struct Shared<S> {
    epoch: AtomicU64,
    stream: Mutex<Option<Arc<S>>>,
    poller: Mutex<Option<JoinHandle<()>>>,
    release: Mutex<Option<JoinHandle<()>>>,
    detection: Mutex<DetectionState>,
    subscriber: Mutex<Option<mpsc::Sender<DetectionTick>>>,
}

impl<S: VideoStream> Shared<S> {
    fn new() -> Self {
        Self {
            epoch: AtomicU64::new(0),
            stream: Mutex::new(None),
            poller: Mutex::new(None),
            release: Mutex::new(None),
            detection: Mutex::new(DetectionState::default()),
            subscriber: Mutex::new(None),
        }
    }

    pub(crate) fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    /// Store the outcome of one poll and build its tick.
    ///
    /// Returns `None` without touching the state once `epoch` is stale. The
    /// check runs under the detection lock, which `halt` also holds while it
    /// moves the epoch on.
    pub(crate) fn record(&self, epoch: u64, sequence: u32, detections: Vec<Detection>) -> Option<DetectionTick> {
        let face_count = detections.len();
        let primary = detections.into_iter().next();

        let mut state = lock(&self.detection);
        if !self.is_current(epoch) {
            return None;
        }
        state.face_detected = face_count > 0;
        state.face_count = face_count;
        if let Some(face) = &primary {
            state.candidate = Some(face.clone());
        }
        drop(state);

        Some(DetectionTick {
            epoch,
            sequence,
            observed_at: tokio::time::Instant::now().into_std(),
            face_count,
            primary,
        })
    }

    /// Hand a tick to the subscriber without waiting on it.
    pub(crate) fn publish(&self, tick: DetectionTick) {
        let mut subscriber = lock(&self.subscriber);
        let Some(tx) = subscriber.as_ref() else {
            return;
        };
        match tx.try_send(tick) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(tick)) => {
                tracing::trace!(sequence = tick.sequence, "subscriber lagging, tick dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("tick subscriber went away");
                *subscriber = None;
            }
        }
    }

    /// Invalidate the epoch, abort polling and release the stream.
    /// Returns whether a stream was active.
    fn halt(&self) -> bool {
        {
            let mut state = lock(&self.detection);
            self.epoch.fetch_add(1, Ordering::SeqCst);
            *state = DetectionState::default();
        }
        if let Some(poller) = lock(&self.poller).take() {
            poller.abort();
        }
        let stream = lock(&self.stream).take();
        match stream {
            Some(stream) => {
                stream.stop();
                true
            }
            None => false,
        }
    }

    fn cancel_release(&self) {
        if let Some(timer) = lock(&self.release).take() {
            timer.abort();
        }
    }
}

/// A camera stream plus its detection poller.
pub struct CameraSession<M: MediaDevices, F: FaceDetector> {
    devices: Arc<M>,
    detector: Arc<F>,
    resolution: Resolution,
    poll_interval: Duration,
    facing: FacingMode,
    shared: Arc<Shared<M::Stream>>,
}

impl<M: MediaDevices, F: FaceDetector> CameraSession<M, F> {
    pub fn new(
        devices: Arc<M>,
        detector: Arc<F>,
        resolution: Resolution,
        poll_interval: Duration,
    ) -> Self {
        Self {
            devices,
            detector,
            resolution,
            poll_interval,
            facing: FacingMode::default(),
            shared: Arc::new(Shared::new()),
        }
    }

    /// Acquire a stream for `facing` and start polling it.
    ///
    /// An already active stream is stopped first. On failure the session
    /// stays inactive and the error is returned as-is, so callers can tell
    /// a refused permission from a missing camera.
    pub async fn start(&mut self, facing: FacingMode) -> Result<(), CameraError> {
        self.shared.cancel_release();
        if self.shared.halt() {
            tracing::debug!("stopped previous stream before restart");
        }
        self.facing = facing;

        let stream = match self.devices.open(facing, self.resolution).await {
            Ok(stream) => Arc::new(stream),
            Err(e) => {
                if e.is_permission_denied() {
                    tracing::warn!(%facing, error = %e, "camera permission denied");
                } else {
                    tracing::warn!(%facing, error = %e, "failed to open camera");
                }
                return Err(e);
            }
        };

        let epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        *lock(&self.shared.stream) = Some(Arc::clone(&stream));

        let handle = tokio::spawn(poller::run(PollContext {
            shared: Arc::clone(&self.shared),
            stream,
            detector: Arc::clone(&self.detector),
            epoch,
            period: self.poll_interval,
        }));
        *lock(&self.shared.poller) = Some(handle);

        tracing::info!(%facing, epoch, "camera session started");
        Ok(())
    }

    /// Release the stream and halt polling.
    ///
    /// Returns `false` (and does nothing else) when no stream was active.
    pub fn stop(&self) -> bool {
        self.shared.cancel_release();
        let was_active = self.shared.halt();
        if was_active {
            tracing::info!(facing = %self.facing, "camera session stopped");
        }
        was_active
    }

    /// Stop the current stream and flip the facing mode for the next start.
    pub fn toggle(&mut self) -> FacingMode {
        self.stop();
        self.facing = self.facing.toggled();
        tracing::debug!(facing = %self.facing, "facing mode toggled");
        self.facing
    }

    /// Receive one tick per poll from now on. Replaces any earlier subscriber.
    pub fn subscribe(&self) -> mpsc::Receiver<DetectionTick> {
        let (tx, rx) = mpsc::channel(TICK_BUFFER);
        *lock(&self.shared.subscriber) = Some(tx);
        rx
    }

    /// Grab a still from the active stream, mirrored for the front camera.
    pub async fn capture_still(&self) -> Result<Frame, CameraError> {
        let stream = lock(&self.shared.stream)
            .as_ref()
            .map(Arc::clone)
            .ok_or(CameraError::Stopped)?;
        let frame = stream.grab_frame().await?;
        if self.facing.is_mirrored() {
            Ok(frame.mirrored())
        } else {
            Ok(frame)
        }
    }

    /// Stop the session after `grace`, unless it is restarted or stopped first.
    pub fn schedule_release(&self, grace: Duration) {
        let epoch = self.epoch();
        let shared = Arc::clone(&self.shared);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if shared.is_current(epoch) && shared.halt() {
                tracing::info!(grace_ms = grace.as_millis() as u64, "camera released after grace period");
            }
        });
        if let Some(previous) = lock(&self.shared.release).replace(timer) {
            previous.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        lock(&self.shared.stream).is_some()
    }

    pub fn facing(&self) -> FacingMode {
        self.facing
    }

    pub fn epoch(&self) -> u64 {
        self.shared.epoch.load(Ordering::SeqCst)
    }

    pub fn face_detected(&self) -> bool {
        lock(&self.shared.detection).face_detected
    }

    pub fn face_count(&self) -> usize {
        lock(&self.shared.detection).face_count
    }

    /// Most recent first-face detection of this session.
    pub fn candidate(&self) -> Option<Detection> {
        lock(&self.shared.detection).candidate.clone()
    }
}

impl<M: MediaDevices, F: FaceDetector> Drop for CameraSession<M, F> {
    fn drop(&mut self) {
        self.shared.cancel_release();
        if self.shared.halt() {
            tracing::debug!("camera session dropped while active");
        }
    }
}
