//! Fixed-period detection polling for an active camera session.

use crate::session::Shared;
use astitva_core::FaceDetector;
use astitva_hw::{CameraError, VideoStream};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

pub(crate) struct PollContext<S, F> {
    pub shared: Arc<Shared<S>>,
    pub stream: Arc<S>,
    pub detector: Arc<F>,
    pub epoch: u64,
    pub period: Duration,
}

/// Poll until the session epoch moves on or the stream stops.
///
/// A failed grab or detection skips that tick; the next one tries again.
pub(crate) async fn run<S: VideoStream, F: FaceDetector>(ctx: PollContext<S, F>) {
    let PollContext {
        shared,
        stream,
        detector,
        epoch,
        period,
    } = ctx;

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sequence: u32 = 0;

    tracing::debug!(epoch, period_ms = period.as_millis() as u64, "detection poller started");

    loop {
        ticker.tick().await;
        if !shared.is_current(epoch) {
            break;
        }

        let frame = match stream.grab_frame().await {
            Ok(frame) => frame,
            Err(CameraError::Stopped) => break,
            Err(e) => {
                tracing::warn!(epoch, error = %e, "frame grab failed, skipping tick");
                continue;
            }
        };

        let detections = match detector.detect(&frame.data, frame.width, frame.height).await {
            Ok(detections) => detections,
            Err(e) => {
                tracing::warn!(epoch, error = %e, "face detection failed, skipping tick");
                continue;
            }
        };

        // The session may have been stopped while detection was in flight.
        sequence = sequence.wrapping_add(1);
        let Some(tick) = shared.record(epoch, sequence, detections) else {
            tracing::trace!(epoch, "discarding stale detection");
            break;
        };
        tracing::trace!(epoch, sequence, faces = tick.face_count, "detection tick");
        shared.publish(tick);
    }

    tracing::debug!(epoch, "detection poller exited");
}
