//! Frame pacing for off-screen surfaces
//!
//! Three clocks meet here: the renderer's own frame production, the frame
//! rate the embedder asked for, and the latency of asynchronous pixel
//! readback. This module holds the pieces that reconcile them:
//!
//! - [`FramePacer`]: a delay-based periodic timer that drives begin-frame
//!   ticks at the configured interval.
//! - [`FrameSchedule`]: decides, for each successful capture, whether the
//!   frame is delivered immediately or held until the next pacing slot.
//! - [`BeginFrameArgs`]: the timing information sent with every tick.
//!
//! # Usage
//!
//! ```no_run
//! use osrview::renderer::frame_pacing::{frame_interval_for_rate, FramePacer};
//! use std::sync::Arc;
//!
//! # async fn demo() {
//! let mut pacer = FramePacer::new(Arc::new(|| println!("tick")));
//! pacer.start(frame_interval_for_rate(60));
//! // ... later, the embedder lowers the rate; the next tick uses it
//! pacer.set_interval(frame_interval_for_rate(30));
//! pacer.stop();
//! # }
//! ```

use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Lowest frame rate a surface can be configured with
pub const MIN_FRAME_RATE: u32 = 1;

/// Highest frame rate a surface can be configured with
pub const MAX_FRAME_RATE: u32 = 240;

/// Frame rate used when nothing else is configured
pub const DEFAULT_FRAME_RATE: u32 = 60;

/// A capture landing more than `interval / divisor` before its slot is held
/// back until the slot; anything later is delivered at once.
///
/// The value is a policy choice carried over from production tuning, not a
/// derived bound on compositor latency.
pub const DEFAULT_IMMEDIATE_DELIVERY_DIVISOR: u32 = 4;

/// Estimated browser composite time is `1s / (fraction * 60)`.
pub const DEFAULT_ESTIMATED_COMPOSITE_FRACTION: u32 = 3;

/// Clamps a requested frame rate into `MIN_FRAME_RATE..=MAX_FRAME_RATE`.
///
/// Out-of-range requests are not errors; they are silently clamped.
pub fn clamp_frame_rate(rate: i32) -> u32 {
    rate.clamp(MIN_FRAME_RATE as i32, MAX_FRAME_RATE as i32) as u32
}

/// Duration of one frame at `rate` frames per second, in whole microseconds.
pub fn frame_interval_for_rate(rate: u32) -> Duration {
    Duration::from_micros(1_000_000 / rate.max(MIN_FRAME_RATE) as u64)
}

/// Callback invoked on every pacer tick
pub type TickCallback = Arc<dyn Fn() + Send + Sync>;

/// Periodic begin-frame timer
///
/// Wraps a tokio delay-based timer. While active it invokes the registered
/// callback once per elapsed interval. Changing the interval affects the tick
/// after the one already scheduled; a pending tick is never moved.
pub struct FramePacer {
    interval: watch::Sender<Duration>,
    callback: TickCallback,
    task: Option<JoinHandle<()>>,
}

impl FramePacer {
    /// Creates an inactive pacer with the default 60 FPS interval
    pub fn new(callback: TickCallback) -> Self {
        Self::with_interval(frame_interval_for_rate(DEFAULT_FRAME_RATE), callback)
    }

    /// Creates an inactive pacer with the given interval
    pub fn with_interval(interval: Duration, callback: TickCallback) -> Self {
        let (tx, _rx) = watch::channel(interval);
        Self {
            interval: tx,
            callback,
            task: None,
        }
    }

    /// Starts ticking at `interval`. Restarting an active pacer only updates
    /// the interval.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self, interval: Duration) {
        self.set_interval(interval);
        if self.is_active() {
            return;
        }

        let mut interval_rx = self.interval.subscribe();
        let callback = self.callback.clone();
        info!("🎬 Frame pacer started: interval={:?}", interval);

        self.task = Some(tokio::spawn(async move {
            let mut next_tick = Instant::now() + *interval_rx.borrow_and_update();
            loop {
                tokio::time::sleep_until(next_tick).await;
                callback();

                next_tick += *interval_rx.borrow_and_update();
                let now = Instant::now();
                if next_tick <= now {
                    // Missed ticks are skipped rather than replayed.
                    next_tick = now + *interval_rx.borrow();
                }
            }
        }));
    }

    /// Stops ticking. Pending ticks are discarded.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("🎬 Frame pacer stopped");
        }
    }

    /// Activates or deactivates the pacer at its current interval
    pub fn set_active(&mut self, active: bool) {
        if active {
            self.start(self.interval());
        } else {
            self.stop();
        }
    }

    /// Changes the tick interval, taking effect for the next scheduled tick
    pub fn set_interval(&self, interval: Duration) {
        let previous = self.interval.send_replace(interval);
        if previous != interval {
            debug!("🎬 Frame pacer interval {:?} -> {:?}", previous, interval);
        }
    }

    pub fn interval(&self) -> Duration {
        *self.interval.borrow()
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for FramePacer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// When a captured frame should reach the embedder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The pacing slot is due; deliver now
    Immediate,
    /// Hold the frame for this long, until its pacing slot
    Deferred(Duration),
}

/// Next-delivery bookkeeping for one surface
///
/// Mutated only by the capture-completion path and by frame-rate changes.
#[derive(Debug, Clone)]
pub struct FrameSchedule {
    next_frame_time: Instant,
    frame_interval: Duration,
    immediate_divisor: u32,
}

impl FrameSchedule {
    pub fn new(frame_interval: Duration, immediate_divisor: u32, now: Instant) -> Self {
        Self {
            next_frame_time: now,
            frame_interval,
            immediate_divisor: immediate_divisor.max(1),
        }
    }

    pub fn frame_interval(&self) -> Duration {
        self.frame_interval
    }

    pub fn set_frame_interval(&mut self, interval: Duration) {
        self.frame_interval = interval;
    }

    pub fn next_frame_time(&self) -> Instant {
        self.next_frame_time
    }

    /// Threshold below which a capture is considered to have arrived in its
    /// slot
    pub fn immediate_threshold(&self) -> Duration {
        self.frame_interval / self.immediate_divisor
    }

    /// Records a successful capture at `now` and decides its delivery time.
    ///
    /// A capture that lands comfortably before the next slot is held until
    /// that slot and the slot advances by one interval. A capture that lands
    /// close to or after the slot boundary is delivered immediately and the
    /// next slot is reset to one interval from now.
    pub fn on_frame_captured(&mut self, now: Instant) -> Delivery {
        let next_frame_in = self.next_frame_time.saturating_duration_since(now);
        if next_frame_in > self.immediate_threshold() {
            self.next_frame_time += self.frame_interval;
            Delivery::Deferred(next_frame_in)
        } else {
            self.next_frame_time = now + self.frame_interval;
            Delivery::Immediate
        }
    }
}

/// Timing information sent to the renderer with each begin-frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeginFrameArgs {
    pub source_id: u64,
    pub sequence_number: u64,
    pub frame_time: Instant,
    pub deadline: Instant,
    pub interval: Duration,
}

impl BeginFrameArgs {
    /// Builds the args for a tick at `frame_time`.
    ///
    /// The frame is expected on screen one interval later; the deadline
    /// leaves room for the browser-side composite before that.
    pub fn new(
        source_id: u64,
        sequence_number: u64,
        frame_time: Instant,
        interval: Duration,
        composite_fraction: u32,
    ) -> Self {
        let display_time = frame_time + interval;
        let estimated_composite = estimated_composite_time(composite_fraction);
        let deadline = display_time
            .checked_sub(estimated_composite)
            .unwrap_or(frame_time);

        Self {
            source_id,
            sequence_number,
            frame_time,
            deadline,
            interval,
        }
    }
}

/// Time reserved for the browser-side composite of each frame
pub fn estimated_composite_time(composite_fraction: u32) -> Duration {
    Duration::from_micros(1_000_000 / (composite_fraction.max(1) as u64 * 60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_pacer(interval: Duration) -> (FramePacer, Arc<AtomicUsize>) {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let pacer = FramePacer::with_interval(
            interval,
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        (pacer, ticks)
    }

    #[test]
    fn test_frame_rate_clamping() {
        assert_eq!(clamp_frame_rate(0), 1);
        assert_eq!(clamp_frame_rate(-30), 1);
        assert_eq!(clamp_frame_rate(1000), 240);
        assert_eq!(clamp_frame_rate(60), 60);
    }

    #[test]
    fn test_frame_interval_for_rate() {
        assert_eq!(frame_interval_for_rate(60), Duration::from_micros(16_666));
        assert_eq!(frame_interval_for_rate(1), Duration::from_secs(1));
        assert_eq!(frame_interval_for_rate(0), Duration::from_secs(1));
    }

    #[test]
    fn test_capture_early_in_slot_is_deferred() {
        let t0 = Instant::now();
        let interval = Duration::from_millis(16);
        let mut schedule = FrameSchedule::new(interval, 4, t0 + interval);

        let delivery = schedule.on_frame_captured(t0 + Duration::from_millis(2));
        assert_eq!(delivery, Delivery::Deferred(Duration::from_millis(14)));
        assert_eq!(schedule.next_frame_time(), t0 + Duration::from_millis(32));
    }

    #[test]
    fn test_capture_near_slot_boundary_is_immediate() {
        let t0 = Instant::now();
        let interval = Duration::from_millis(16);
        let mut schedule = FrameSchedule::new(interval, 4, t0 + interval);

        // 4ms before the slot is exactly the quarter threshold.
        let now = t0 + Duration::from_millis(12);
        assert_eq!(schedule.on_frame_captured(now), Delivery::Immediate);
        assert_eq!(schedule.next_frame_time(), now + interval);
    }

    #[test]
    fn test_capture_after_slot_is_immediate_and_resets() {
        let t0 = Instant::now();
        let interval = Duration::from_millis(16);
        let mut schedule = FrameSchedule::new(interval, 4, t0);

        let late = t0 + Duration::from_millis(40);
        assert_eq!(schedule.on_frame_captured(late), Delivery::Immediate);
        assert_eq!(schedule.next_frame_time(), late + interval);
    }

    #[test]
    fn test_sustained_bursts_are_spaced_by_interval() {
        let t0 = Instant::now();
        let interval = Duration::from_millis(20);
        let mut schedule = FrameSchedule::new(interval, 4, t0);

        // Captures arrive every 2ms; delivered timestamps must stay an
        // interval apart unless a capture lands within the threshold.
        let mut delivered = Vec::new();
        for i in 0..50u64 {
            let now = t0 + Duration::from_millis(i * 2);
            match schedule.on_frame_captured(now) {
                Delivery::Immediate => delivered.push((now, true)),
                Delivery::Deferred(delay) => delivered.push((now + delay, false)),
            }
        }

        for pair in delivered.windows(2) {
            let (prev, _) = pair[0];
            let (next, immediate) = pair[1];
            if !immediate {
                assert!(next.duration_since(prev) >= interval);
            }
        }
    }

    #[test]
    fn test_begin_frame_deadline() {
        let now = Instant::now();
        let interval = Duration::from_micros(16_666);
        let args = BeginFrameArgs::new(7, 3, now, interval, 3);

        assert_eq!(args.sequence_number, 3);
        assert_eq!(args.deadline, now + interval - Duration::from_micros(5_555));
        assert!(args.deadline > args.frame_time);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacer_ticks_once_per_interval() {
        let (mut pacer, ticks) = counting_pacer(Duration::from_millis(10));
        pacer.start(Duration::from_millis(10));
        assert!(pacer.is_active());

        tokio::time::sleep(Duration::from_millis(35)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        pacer.stop();
        assert!(!pacer.is_active());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_change_applies_after_scheduled_tick() {
        let (mut pacer, ticks) = counting_pacer(Duration::from_millis(10));
        pacer.start(Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(15)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);

        // The tick at 20ms is already scheduled and still fires; the one
        // after it moves to 20 + 30 = 50ms.
        pacer.set_interval(Duration::from_millis(30));
        tokio::time::sleep(Duration::from_millis(30)).await; // t = 45
        assert_eq!(ticks.load(Ordering::SeqCst), 2);

        tokio::time::sleep(Duration::from_millis(10)).await; // t = 55
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_active_toggles() {
        let (mut pacer, ticks) = counting_pacer(Duration::from_millis(5));
        pacer.set_active(true);
        tokio::time::sleep(Duration::from_millis(12)).await;
        pacer.set_active(false);
        let seen = ticks.load(Ordering::SeqCst);
        assert_eq!(seen, 2);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn clamped_rate_is_always_in_range(rate in any::<i32>()) {
                let clamped = clamp_frame_rate(rate);
                prop_assert!((MIN_FRAME_RATE..=MAX_FRAME_RATE).contains(&clamped));
                if (1..=240).contains(&rate) {
                    prop_assert_eq!(clamped as i32, rate);
                }
            }

            #[test]
            fn deferred_delivery_never_exceeds_one_interval(
                interval_ms in 1u64..100,
                offset_ms in 0u64..200,
            ) {
                let t0 = Instant::now();
                let interval = Duration::from_millis(interval_ms);
                let mut schedule = FrameSchedule::new(interval, 4, t0 + interval);

                if let Delivery::Deferred(delay) =
                    schedule.on_frame_captured(t0 + Duration::from_millis(offset_ms))
                {
                    prop_assert!(delay <= interval);
                    prop_assert!(delay > schedule.immediate_threshold());
                }
            }
        }
    }
}
