//! Producer thread: fills the ping package from every enabled stream and
//! publishes it once the consumer has released the previous one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flume::{Receiver, Sender, TrySendError};
use tracing::{debug, info, instrument, trace, warn};

use super::pingpang::{Delivery, PingPangBuffer, Producer};
use super::stats::{CaptureStats, StatsSnapshot};
use crate::capture::{open_source, FrameSource, ImagePackage, StreamFrames, StreamId, Tier};
use crate::{Config, Error, Result};

/// What one iteration of the loop ended with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A complete package went out with this sequence number.
    Published(u64),
    /// The stream's small tier had nothing ready; the cycle was abandoned.
    SmallTierMiss(StreamId),
    /// The stream's large tier exhausted the configured retry limit.
    LargeTierStalled(StreamId),
    /// Everything was captured but the last delivery is still held; data dropped.
    Backpressure,
    /// The stop flag was raised mid-cycle.
    Stopped,
    /// The consumer side hung up.
    Disconnected,
}

/// Where the loop is inside one iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Between cycles; a publish may still be awaiting acknowledgment.
    Idle,
    Filling,
    Publishing,
}

/// Large-tier retry settings shared by all streams
#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    poll_interval: Duration,
    limit: Option<u32>,
}

impl RetryPolicy {
    /// Count one failed poll; `true` once the limit is reached. Without a limit
    /// the count saturates instead of wrapping.
    fn give_up(&self, attempts: &mut u32) -> bool {
        *attempts = attempts.saturating_add(1);
        self.limit.is_some_and(|limit| *attempts >= limit)
    }
}

/// The capture loop.
///
/// Owns the frame sources and the producer side of the ping-pang buffer.
/// Deliveries go out on a single-slot channel; see [`CaptureLoop::new`].
pub struct CaptureLoop {
    primary: Box<dyn FrameSource>,
    secondary: Option<Box<dyn FrameSource>>,
    producer: Producer<ImagePackage>,
    tx: Sender<Delivery<ImagePackage>>,
    next_frame_idx: u64,
    retry: RetryPolicy,
    capture_core: Option<usize>,
    state: LoopState,
    stop: Arc<AtomicBool>,
    stats: Arc<CaptureStats>,
}

impl CaptureLoop {
    /// Open the configured sources and build the loop.
    pub fn from_config(config: &Config) -> Result<(Self, Receiver<Delivery<ImagePackage>>)> {
        let primary = open_source(StreamId::Primary, &config.capture.primary)?;
        let secondary = if config.capture.secondary_enabled {
            Some(open_source(StreamId::Secondary, &config.capture.secondary)?)
        } else {
            None
        };
        Self::new(config, primary, secondary)
    }

    /// Build the loop around already-opened sources.
    ///
    /// Both image packages are allocated here. The returned receiver yields one
    /// [`Delivery`] per publish; releasing it is the acknowledgment.
    #[instrument(skip_all, fields(secondary = config.capture.secondary_enabled))]
    pub fn new(
        config: &Config,
        primary: Box<dyn FrameSource>,
        secondary: Option<Box<dyn FrameSource>>,
    ) -> Result<(Self, Receiver<Delivery<ImagePackage>>)> {
        config.validate()?;

        let secondary = match (config.capture.secondary_enabled, secondary) {
            (true, Some(source)) => Some(source),
            (true, None) => {
                return Err(Error::SourceUnavailable {
                    stream: StreamId::Secondary,
                    tier: Tier::Small,
                    reason: "secondary stream enabled but no source supplied".into(),
                })
            }
            (false, Some(_)) => {
                warn!("Secondary stream disabled, ignoring supplied source");
                None
            }
            (false, None) => None,
        };

        let producer = PingPangBuffer::new(
            ImagePackage::new(&config.capture),
            ImagePackage::new(&config.capture),
        );
        let (tx, rx) = flume::bounded(1);

        info!(
            poll_interval = ?config.pipeline.poll_interval(),
            large_tier_retry_limit = ?config.pipeline.large_tier_retry_limit,
            "Capture loop initialized"
        );

        let capture_loop = Self {
            primary,
            secondary,
            producer,
            tx,
            next_frame_idx: 0,
            retry: RetryPolicy {
                poll_interval: config.pipeline.poll_interval(),
                limit: config.pipeline.large_tier_retry_limit,
            },
            capture_core: config.pipeline.capture_core,
            state: LoopState::Idle,
            stop: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(CaptureStats::default()),
        };
        Ok((capture_loop, rx))
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stats(&self) -> Arc<CaptureStats> {
        Arc::clone(&self.stats)
    }

    /// Raising this flag ends the loop at the next check.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Run exactly one iteration: fill, then publish if the consumer is idle.
    pub fn step(&mut self) -> CycleOutcome {
        self.stats.record_cycle();

        self.enter(LoopState::Filling);
        if let Err(outcome) = self.fill() {
            self.enter(LoopState::Idle);
            return outcome;
        }

        // Every completed frame set consumes a sequence number, published or not.
        let frame_idx = self.next_frame_idx;
        self.next_frame_idx = frame_idx.wrapping_add(1);
        self.producer.target().frame_idx = frame_idx;

        if !self.producer.acknowledged() {
            // Never run more than one package ahead of the consumer.
            trace!(frame_idx, "Consumer busy, dropping captured package");
            self.stats.record_backpressure();
            self.enter(LoopState::Idle);
            return CycleOutcome::Backpressure;
        }

        self.enter(LoopState::Publishing);
        let outcome = self.publish(frame_idx);
        self.enter(LoopState::Idle);
        outcome
    }

    /// Write every required channel into the ping package.
    fn fill(&mut self) -> Result<(), CycleOutcome> {
        let stop = &*self.stop;
        let package = self.producer.target();

        acquire_stream(
            StreamId::Primary,
            &mut *self.primary,
            &mut package.primary,
            self.retry,
            &self.stats,
            stop,
        )?;

        if let (Some(source), Some(frames)) = (self.secondary.as_mut(), package.secondary.as_mut())
        {
            acquire_stream(
                StreamId::Secondary,
                &mut **source,
                frames,
                self.retry,
                &self.stats,
                stop,
            )?;
        }
        Ok(())
    }

    fn publish(&mut self, frame_idx: u64) -> CycleOutcome {
        let Some(delivery) = self.producer.publish() else {
            self.stats.record_backpressure();
            return CycleOutcome::Backpressure;
        };

        match self.tx.try_send(delivery) {
            Ok(()) => {
                self.stats.record_published();
                debug!(frame_idx, "Published image package");
                CycleOutcome::Published(frame_idx)
            }
            Err(TrySendError::Full(_)) => {
                // The slot only fills while a delivery is unacknowledged, which
                // the publish above already ruled out.
                warn!(frame_idx, "Notification slot occupied, package dropped");
                self.stats.record_backpressure();
                CycleOutcome::Backpressure
            }
            Err(TrySendError::Disconnected(_)) => CycleOutcome::Disconnected,
        }
    }

    fn enter(&mut self, state: LoopState) {
        if self.state != state {
            trace!(from = ?self.state, to = ?state, "Capture loop state");
            self.state = state;
        }
    }

    /// Run on the current thread until stopped or the consumer disconnects.
    pub fn run(mut self) {
        self.pin_to_core();
        info!("Capture loop running");

        while !self.stop.load(Ordering::Acquire) {
            match self.step() {
                CycleOutcome::Published(_) => {}
                CycleOutcome::Disconnected => {
                    info!("Consumer disconnected, stopping capture loop");
                    break;
                }
                CycleOutcome::Stopped => break,
                _ => thread::sleep(self.retry.poll_interval),
            }
        }

        let stats = self.stats.snapshot();
        info!(
            published = stats.published,
            dropped = stats.backpressure_drops,
            misses = stats.small_tier_misses,
            "Capture loop stopped"
        );
    }

    /// Move the loop onto a dedicated `capture` thread.
    pub fn spawn(self) -> Result<CaptureHandle> {
        let stop = self.stop_flag();
        let stats = self.stats();
        let join = thread::Builder::new()
            .name("capture".into())
            .spawn(move || self.run())
            .map_err(Error::Spawn)?;
        Ok(CaptureHandle {
            stop,
            stats,
            join: Some(join),
        })
    }

    fn pin_to_core(&self) {
        let Some(core) = self.capture_core else {
            return;
        };
        let pinned = core_affinity::get_core_ids()
            .and_then(|ids| ids.into_iter().find(|id| id.id == core))
            .map(core_affinity::set_for_current)
            .unwrap_or(false);
        if pinned {
            info!(core, "Capture thread pinned");
        } else {
            warn!(core, "Failed to pin capture thread");
        }
    }
}

/// Small tier first, single poll; large tier after it, retried.
fn acquire_stream(
    stream: StreamId,
    source: &mut dyn FrameSource,
    frames: &mut StreamFrames,
    retry: RetryPolicy,
    stats: &CaptureStats,
    stop: &AtomicBool,
) -> Result<(), CycleOutcome> {
    if !source.try_get_frame(Tier::Small, &mut frames.small).is_ready() {
        trace!(%stream, "Small tier not ready");
        stats.record_small_tier_miss(stream);
        return Err(CycleOutcome::SmallTierMiss(stream));
    }

    // Same pipeline as the small tier, so the large frame is expected shortly.
    let mut attempts = 0u32;
    while !source.try_get_frame(Tier::Large, &mut frames.large).is_ready() {
        stats.record_large_tier_retry(stream);
        if retry.give_up(&mut attempts) {
            warn!(%stream, attempts, "Large tier stalled, abandoning cycle");
            stats.record_large_tier_stall(stream);
            return Err(CycleOutcome::LargeTierStalled(stream));
        }
        if stop.load(Ordering::Acquire) {
            return Err(CycleOutcome::Stopped);
        }
        thread::sleep(retry.poll_interval);
    }
    Ok(())
}

/// Handle to a spawned capture thread. Dropping it stops and joins the thread.
pub struct CaptureHandle {
    stop: Arc<AtomicBool>,
    stats: Arc<CaptureStats>,
    join: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stop the loop, wait for the thread to exit and return the final counters.
    pub fn join(mut self) -> StatsSnapshot {
        self.shutdown();
        self.stats()
    }

    fn shutdown(&mut self) {
        self.stop();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                warn!("Capture thread panicked");
            }
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::capture::{FrameBuffer, Grab};

    /// Replays a fixed readiness script per tier; an exhausted script is ready.
    struct Scripted {
        small: VecDeque<bool>,
        large: VecDeque<bool>,
        sequence: u64,
    }

    impl Scripted {
        fn new(small: &[bool], large: &[bool]) -> Box<Self> {
            Box::new(Self {
                small: small.iter().copied().collect(),
                large: large.iter().copied().collect(),
                sequence: 0,
            })
        }
    }

    impl FrameSource for Scripted {
        fn try_get_frame(&mut self, tier: Tier, buf: &mut FrameBuffer) -> Grab {
            let script = match tier {
                Tier::Small => &mut self.small,
                Tier::Large => &mut self.large,
            };
            if script.pop_front().unwrap_or(true) {
                self.sequence += 1;
                buf.stamp(self.sequence, 0);
                Grab::Ready
            } else {
                Grab::NotReady
            }
        }
    }

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.pipeline.poll_interval_us = 0;
        config
    }

    #[test]
    fn small_tier_miss_abandons_cycle() {
        let config = fast_config();
        let (mut capture, rx) =
            CaptureLoop::new(&config, Scripted::new(&[false, true], &[]), None).unwrap();

        assert_eq!(
            capture.step(),
            CycleOutcome::SmallTierMiss(StreamId::Primary)
        );
        assert!(rx.is_empty());
        assert_eq!(capture.step(), CycleOutcome::Published(0));
        assert_eq!(capture.state(), LoopState::Idle);
    }

    #[test]
    fn large_tier_is_retried_until_ready() {
        let config = fast_config();
        let (mut capture, rx) = CaptureLoop::new(
            &config,
            Scripted::new(&[], &[false, false, false, true]),
            None,
        )
        .unwrap();

        assert_eq!(capture.step(), CycleOutcome::Published(0));
        assert_eq!(capture.stats().snapshot().large_tier_retries, 3);
        assert_eq!(rx.recv().unwrap().frame_idx, 0);
    }

    #[test]
    fn bounded_large_tier_retry_reports_stall() {
        let mut config = fast_config();
        config.pipeline.large_tier_retry_limit = Some(2);
        let (mut capture, rx) =
            CaptureLoop::new(&config, Scripted::new(&[], &[false; 5]), None).unwrap();

        assert_eq!(
            capture.step(),
            CycleOutcome::LargeTierStalled(StreamId::Primary)
        );
        assert!(rx.is_empty());
        let stats = capture.stats().snapshot();
        assert_eq!(stats.large_tier_stalls, 1);
        assert_eq!(stats.published, 0);
    }

    #[test]
    fn unbounded_retry_count_saturates() {
        let retry = RetryPolicy {
            poll_interval: Duration::ZERO,
            limit: None,
        };
        let mut attempts = u32::MAX - 1;
        assert!(!retry.give_up(&mut attempts));
        assert!(!retry.give_up(&mut attempts));
        assert_eq!(attempts, u32::MAX);

        let bounded = RetryPolicy {
            limit: Some(3),
            ..retry
        };
        let mut attempts = 0;
        assert!(!bounded.give_up(&mut attempts));
        assert!(!bounded.give_up(&mut attempts));
        assert!(bounded.give_up(&mut attempts));
    }

    #[test]
    fn zero_retry_limit_fails_construction() {
        let mut config = fast_config();
        config.pipeline.large_tier_retry_limit = Some(0);
        let err = CaptureLoop::new(&config, Scripted::new(&[], &[]), None)
            .err()
            .unwrap();
        assert!(matches!(err, Error::ZeroRetryLimit));
    }

    #[test]
    fn retry_limit_of_one_stalls_after_first_failed_poll() {
        let mut config = fast_config();
        config.pipeline.large_tier_retry_limit = Some(1);
        let (mut capture, _rx) =
            CaptureLoop::new(&config, Scripted::new(&[], &[false, true]), None).unwrap();
        assert_eq!(
            capture.step(),
            CycleOutcome::LargeTierStalled(StreamId::Primary)
        );
        assert_eq!(capture.stats().snapshot().large_tier_retries, 1);
    }

    #[test]
    fn stop_flag_interrupts_large_tier_retry() {
        let config = fast_config();
        let (mut capture, _rx) =
            CaptureLoop::new(&config, Scripted::new(&[], &[false; 8]), None).unwrap();
        capture.stop_flag().store(true, Ordering::Release);
        assert_eq!(capture.step(), CycleOutcome::Stopped);
    }

    #[test]
    fn enabled_secondary_requires_a_source() {
        let mut config = fast_config();
        config.capture.secondary_enabled = true;
        let err = CaptureLoop::new(&config, Scripted::new(&[], &[]), None)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            Error::SourceUnavailable {
                stream: StreamId::Secondary,
                ..
            }
        ));
    }

    #[test]
    fn dropped_receiver_disconnects() {
        let config = fast_config();
        let (mut capture, rx) = CaptureLoop::new(&config, Scripted::new(&[], &[]), None).unwrap();
        drop(rx);
        assert_eq!(capture.step(), CycleOutcome::Disconnected);
        assert!(capture.producer.acknowledged());
    }
}
