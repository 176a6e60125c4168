//! Capture loop counters

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::utils::CachePadded;
use metrics::counter;

use crate::capture::StreamId;

/// Lock-free counters shared between the capture thread and observers
#[derive(Debug, Default)]
pub struct CaptureStats {
    cycles: CachePadded<AtomicU64>,
    published: CachePadded<AtomicU64>,
    small_tier_misses: AtomicU64,
    large_tier_retries: AtomicU64,
    large_tier_stalls: AtomicU64,
    backpressure_drops: AtomicU64,
}

/// Point-in-time copy of [`CaptureStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub cycles: u64,
    pub published: u64,
    pub small_tier_misses: u64,
    pub large_tier_retries: u64,
    pub large_tier_stalls: u64,
    pub backpressure_drops: u64,
}

impl CaptureStats {
    pub(crate) fn record_cycle(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
        counter!("camreader_published_total").increment(1);
    }

    pub(crate) fn record_small_tier_miss(&self, stream: StreamId) {
        self.small_tier_misses.fetch_add(1, Ordering::Relaxed);
        counter!("camreader_small_tier_misses_total", "stream" => stream.as_str()).increment(1);
    }

    pub(crate) fn record_large_tier_retry(&self, stream: StreamId) {
        self.large_tier_retries.fetch_add(1, Ordering::Relaxed);
        counter!("camreader_large_tier_retries_total", "stream" => stream.as_str()).increment(1);
    }

    pub(crate) fn record_large_tier_stall(&self, stream: StreamId) {
        self.large_tier_stalls.fetch_add(1, Ordering::Relaxed);
        counter!("camreader_large_tier_stalls_total", "stream" => stream.as_str()).increment(1);
    }

    pub(crate) fn record_backpressure(&self) {
        self.backpressure_drops.fetch_add(1, Ordering::Relaxed);
        counter!("camreader_backpressure_drops_total").increment(1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            small_tier_misses: self.small_tier_misses.load(Ordering::Relaxed),
            large_tier_retries: self.large_tier_retries.load(Ordering::Relaxed),
            large_tier_stalls: self.large_tier_stalls.load(Ordering::Relaxed),
            backpressure_drops: self.backpressure_drops.load(Ordering::Relaxed),
        }
    }
}
