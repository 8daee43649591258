//! Asynchronous pixel readback with bounded retry and paced delivery
//!
//! The readback path asks the frame sink to copy its current output into a
//! [`PixelBuffer`]. Results arrive on whatever execution context the sink
//! completes on, so the pipeline keeps two independent critical sections:
//!
//! - the capture state (retry counter, next delivery slot, statistics),
//!   touched when a result arrives;
//! - the paint section, held only while a frame is handed to the embedder.
//!
//! A slow embedder therefore never stalls the recording of a fresh result.
//!
//! # Retry policy
//!
//! A failed or empty capture is re-issued for the same damage region while
//! the per-pipeline retry counter stays within [`FRAME_RETRY_LIMIT`]. The
//! counter is reset only by a successful capture; once exhausted, further
//! failures drop their frame silently until a capture succeeds again.

use crate::renderer::bitmap::PixelBuffer;
use crate::renderer::damage::{DamageRegion, Size};
use crate::renderer::frame_pacing::{Delivery, FrameSchedule, DEFAULT_IMMEDIATE_DELIVERY_DIVISOR};
use log::{debug, trace, warn};
use parking_lot::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Number of times a failed capture is re-issued before its frame is dropped
pub const FRAME_RETRY_LIMIT: u32 = 2;

/// Why a capture produced no usable pixels
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("capture returned no pixels")]
    Empty,

    #[error("capture returned a degenerate {width}x{height} buffer")]
    Degenerate { width: u32, height: u32 },

    #[error("capture target surface is gone")]
    SurfaceLost,

    #[error("frame sink failed: {0}")]
    Backend(String),
}

/// Result delivered by a frame sink for one capture request
pub type CaptureResult = Result<PixelBuffer, CaptureError>;

/// Completion callback handed to a frame sink with each capture request
pub type CaptureCallback = Box<dyn FnOnce(CaptureResult) + Send>;

/// An issued capture request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRequest {
    pub id: u64,
    /// Damage the request was issued for; retries reuse it unchanged
    pub damage: DamageRegion,
    pub output_size: Size,
}

/// What the coordination thread should do with a capture result
#[derive(Debug)]
pub enum CaptureOutcome {
    /// Re-issue a capture for the same damage
    Retry { damage: DamageRegion },
    /// Retry budget exhausted; the frame is lost
    Dropped { damage: DamageRegion },
    /// Deliver the captured frame, now or after a delay
    Deliver {
        damage: DamageRegion,
        buffer: PixelBuffer,
        delivery: Delivery,
    },
}

/// Counters describing a pipeline's lifetime behaviour
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub requests: u64,
    pub retries: u64,
    pub dropped: u64,
    pub immediate: u64,
    pub deferred: u64,
}

impl CaptureStats {
    pub fn delivered(&self) -> u64 {
        self.immediate + self.deferred
    }
}

#[derive(Debug)]
struct CaptureState {
    schedule: FrameSchedule,
    retry_count: u32,
    next_request_id: u64,
    stats: CaptureStats,
}

/// Readback pipeline for one surface
#[derive(Debug)]
pub struct CopyPixelPipeline {
    state: Mutex<CaptureState>,
    paint_lock: Mutex<()>,
    retry_limit: u32,
}

impl CopyPixelPipeline {
    /// Creates a pipeline with the default retry limit and delivery
    /// threshold
    pub fn new(frame_interval: Duration) -> Self {
        Self::with_policy(
            frame_interval,
            FRAME_RETRY_LIMIT,
            DEFAULT_IMMEDIATE_DELIVERY_DIVISOR,
        )
    }

    pub fn with_policy(frame_interval: Duration, retry_limit: u32, immediate_divisor: u32) -> Self {
        Self {
            state: Mutex::new(CaptureState {
                schedule: FrameSchedule::new(frame_interval, immediate_divisor, Instant::now()),
                retry_count: 0,
                next_request_id: 0,
                stats: CaptureStats::default(),
            }),
            paint_lock: Mutex::new(()),
            retry_limit,
        }
    }

    pub fn set_frame_interval(&self, interval: Duration) {
        self.state.lock().schedule.set_frame_interval(interval);
    }

    pub fn frame_interval(&self) -> Duration {
        self.state.lock().schedule.frame_interval()
    }

    pub fn retry_limit(&self) -> u32 {
        self.retry_limit
    }

    pub fn retry_count(&self) -> u32 {
        self.state.lock().retry_count
    }

    pub fn stats(&self) -> CaptureStats {
        self.state.lock().stats
    }

    /// Registers a new capture request for `damage` over the full output
    pub fn begin_request(&self, damage: DamageRegion, output_size: Size) -> CaptureRequest {
        let mut state = self.state.lock();
        state.next_request_id += 1;
        state.stats.requests += 1;
        let request = CaptureRequest {
            id: state.next_request_id,
            damage,
            output_size,
        };
        trace!("📸 Capture #{} issued for {:?}", request.id, damage);
        request
    }

    /// Records the result of `request` at `now` and decides what happens to
    /// the frame. Safe to call from any thread.
    pub fn handle_result(
        &self,
        request: &CaptureRequest,
        result: CaptureResult,
        now: Instant,
    ) -> CaptureOutcome {
        let buffer = result.and_then(|buffer| {
            if buffer.width() == 0 && buffer.height() == 0 {
                Err(CaptureError::Empty)
            } else if buffer.is_empty() {
                Err(CaptureError::Degenerate {
                    width: buffer.width(),
                    height: buffer.height(),
                })
            } else {
                Ok(buffer)
            }
        });

        let mut state = self.state.lock();
        match buffer {
            Ok(buffer) => {
                state.retry_count = 0;
                let delivery = state.schedule.on_frame_captured(now);
                match delivery {
                    Delivery::Immediate => state.stats.immediate += 1,
                    Delivery::Deferred(_) => state.stats.deferred += 1,
                }
                trace!("📸 Capture #{} succeeded: {:?}", request.id, delivery);
                CaptureOutcome::Deliver {
                    damage: request.damage,
                    buffer,
                    delivery,
                }
            }
            Err(err) => {
                state.retry_count = state.retry_count.saturating_add(1);
                if state.retry_count <= self.retry_limit {
                    state.stats.retries += 1;
                    debug!(
                        "📸 Capture #{} failed ({}), retry {}/{}",
                        request.id, err, state.retry_count, self.retry_limit
                    );
                    CaptureOutcome::Retry {
                        damage: request.damage,
                    }
                } else {
                    state.stats.dropped += 1;
                    warn!("📸 Capture #{} failed ({}), frame dropped", request.id, err);
                    CaptureOutcome::Dropped {
                        damage: request.damage,
                    }
                }
            }
        }
    }

    /// Runs `paint` inside the paint critical section
    pub fn deliver<R>(&self, paint: impl FnOnce() -> R) -> R {
        let _guard = self.paint_lock.lock();
        paint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::bitmap::Color;

    fn frame() -> PixelBuffer {
        PixelBuffer::filled(4, 4, Color::WHITE)
    }

    fn request(pipeline: &CopyPixelPipeline) -> CaptureRequest {
        pipeline.begin_request(DamageRegion::new(1, 2, 3, 4), Size::new(4, 4))
    }

    #[test]
    fn test_retries_are_bounded() {
        let pipeline = CopyPixelPipeline::new(Duration::from_millis(16));
        let req = request(&pipeline);
        let now = Instant::now();

        let outcomes: Vec<_> = (0..3)
            .map(|_| pipeline.handle_result(&req, Err(CaptureError::Empty), now))
            .collect();

        assert!(matches!(outcomes[0], CaptureOutcome::Retry { damage } if damage == req.damage));
        assert!(matches!(outcomes[1], CaptureOutcome::Retry { .. }));
        assert!(matches!(outcomes[2], CaptureOutcome::Dropped { .. }));
        assert_eq!(pipeline.stats().retries, 2);
        assert_eq!(pipeline.stats().dropped, 1);
    }

    #[test]
    fn test_success_resets_retry_counter() {
        let pipeline = CopyPixelPipeline::new(Duration::from_millis(16));
        let req = request(&pipeline);
        let now = Instant::now();

        pipeline.handle_result(&req, Err(CaptureError::Backend("lost".into())), now);
        assert_eq!(pipeline.retry_count(), 1);

        let outcome = pipeline.handle_result(&req, Ok(frame()), now);
        assert!(matches!(outcome, CaptureOutcome::Deliver { .. }));
        assert_eq!(pipeline.retry_count(), 0);
    }

    #[test]
    fn test_empty_buffer_counts_as_failure() {
        let pipeline = CopyPixelPipeline::new(Duration::from_millis(16));
        let req = request(&pipeline);
        let outcome = pipeline.handle_result(&req, Ok(PixelBuffer::default()), Instant::now());
        assert!(matches!(outcome, CaptureOutcome::Retry { .. }));
    }

    #[test]
    fn test_deliveries_follow_schedule() {
        let interval = Duration::from_millis(20);
        let pipeline = CopyPixelPipeline::new(interval);
        let req = request(&pipeline);
        let start = Instant::now();

        // The first slot is due at creation time.
        let first = pipeline.handle_result(&req, Ok(frame()), start);
        assert!(matches!(
            first,
            CaptureOutcome::Deliver { delivery: Delivery::Immediate, .. }
        ));

        // A burst right after is held back to the next slot.
        let second = pipeline.handle_result(&req, Ok(frame()), start + Duration::from_millis(1));
        match second {
            CaptureOutcome::Deliver { delivery, .. } => {
                assert_eq!(delivery, Delivery::Deferred(Duration::from_millis(19)));
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        let stats = pipeline.stats();
        assert_eq!((stats.immediate, stats.deferred), (1, 1));
        assert_eq!(stats.delivered(), 2);
    }

    #[test]
    fn test_paint_section_is_independent_of_capture_state() {
        let pipeline = CopyPixelPipeline::new(Duration::from_millis(16));
        let req = request(&pipeline);

        // Recording a result while a delivery is in progress must not block.
        let outcome = pipeline.deliver(|| pipeline.handle_result(&req, Ok(frame()), Instant::now()));
        assert!(matches!(outcome, CaptureOutcome::Deliver { .. }));
    }
}
