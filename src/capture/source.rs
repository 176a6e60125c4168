use tracing::info;

use super::frame::FrameBuffer;
use super::package::{StreamId, Tier};
use super::synthetic::SyntheticSource;
use crate::{Result, SourceConfig, StreamConfig};

/// Result of one non-blocking poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grab {
    /// A frame was written into the caller's buffer.
    Ready,
    /// Nothing available yet; the buffer is untouched.
    NotReady,
}

impl Grab {
    pub fn is_ready(self) -> bool {
        self == Grab::Ready
    }
}

/// Per-sensor frame producer.
///
/// Implementations must never block waiting for a frame: a tier with nothing
/// queued reports [`Grab::NotReady`] and the caller decides whether to retry.
pub trait FrameSource: Send {
    fn try_get_frame(&mut self, tier: Tier, buf: &mut FrameBuffer) -> Grab;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn try_get_frame(&mut self, tier: Tier, buf: &mut FrameBuffer) -> Grab {
        (**self).try_get_frame(tier, buf)
    }
}

/// Open the source configured for `stream`.
pub fn open_source(stream: StreamId, config: &StreamConfig) -> Result<Box<dyn FrameSource>> {
    info!(%stream, name = %config.name, source = ?config.source, "Opening frame source");
    match &config.source {
        SourceConfig::Synthetic {
            small_every,
            large_lag,
        } => Ok(Box::new(SyntheticSource::new(*small_every, *large_lag))),
        #[cfg(feature = "v4l2")]
        SourceConfig::V4l2 {
            large_device,
            small_device,
        } => {
            let source = super::v4l2::V4l2Source::open(stream, config, large_device, small_device)?;
            Ok(Box::new(source))
        }
        #[cfg(not(feature = "v4l2"))]
        SourceConfig::V4l2 { .. } => Err(crate::Error::SourceUnavailable {
            stream,
            tier: Tier::Large,
            reason: "built without the `v4l2` feature".into(),
        }),
    }
}
