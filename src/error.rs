use thiserror::Error;

use crate::capture::{Size, StreamId, Tier};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Construction-time failures. The steady-state capture loop never returns these.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid geometry for {stream} {tier} channel: {width}x{height}")]
    InvalidGeometry {
        stream: StreamId,
        tier: Tier,
        width: u32,
        height: u32,
    },

    #[error("{stream} {tier} channel {channel} exceeds sensor input {input}")]
    ChannelExceedsInput {
        stream: StreamId,
        tier: Tier,
        channel: Size,
        input: Size,
    },

    #[error("{stream} large and small tiers share scaler channel {index}")]
    DuplicateChannel { stream: StreamId, index: u32 },

    #[error("large_tier_retry_limit must be at least 1 (omit it to retry without limit)")]
    ZeroRetryLimit,

    #[error("{stream} source unavailable for {tier} tier: {reason}")]
    SourceUnavailable {
        stream: StreamId,
        tier: Tier,
        reason: String,
    },

    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
