//! V4L2 frame source: one memory-mapped capture node per tier

use std::io;
use std::time::Duration;

use tracing::{info, instrument, trace, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::frame::{verify_negotiated, FrameBuffer, PixelFormat};
use super::geometry::{effective_size, Size};
use super::package::{StreamId, Tier};
use super::source::{FrameSource, Grab};
use crate::{ChannelConfig, Error, Result, StreamConfig};

const BUFFER_COUNT: u32 = 4;

/// Layout every tier buffer is allocated in.
const FORMAT: PixelFormat = PixelFormat::Nv21;

/// A single tier's capture node
struct TierStream {
    _device: Box<Device>,
    stream: MmapStream<'static>,
}

impl TierStream {
    fn open(stream_id: StreamId, tier: Tier, path: &str, channel: &ChannelConfig) -> Result<Self> {
        let unavailable = |reason: String| Error::SourceUnavailable {
            stream: stream_id,
            tier,
            reason,
        };

        let device = Device::with_path(path).map_err(|e| unavailable(format!("{path}: {e}")))?;
        let caps = device
            .query_caps()
            .map_err(|e| unavailable(format!("{path}: {e}")))?;
        info!(
            "{} {} tier (channel {}): {} ({})",
            stream_id, tier, channel.index, caps.card, caps.driver
        );

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(unavailable(format!("{path} doesn't support video capture")));
        }

        // Frames must land in buffers allocated at the same effective size.
        let size = effective_size(channel.size, channel.rotation);
        let mut fmt = device
            .format()
            .map_err(|e| unavailable(format!("{path}: {e}")))?;
        fmt.width = size.width;
        fmt.height = size.height;
        fmt.fourcc = FourCC::new(&FORMAT.fourcc());
        let applied = device
            .set_format(&fmt)
            .map_err(|e| unavailable(format!("{path}: {e}")))?;
        verify_negotiated(
            size,
            FORMAT,
            Size::new(applied.width, applied.height),
            applied.fourcc.repr,
        )
        .map_err(|reason| unavailable(format!("{path}: {reason}")))?;
        info!("{} {} tier: {} {:?}", stream_id, tier, size, FORMAT);

        let device = Box::new(device);
        let mut stream = MmapStream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)
            .map_err(|e| unavailable(format!("{path}: {e}")))?;
        // Zero timeout turns the dequeue into a poll.
        stream.set_timeout(Duration::ZERO);

        Ok(Self {
            _device: device,
            stream,
        })
    }

    fn try_dequeue(&mut self, buf: &mut FrameBuffer) -> io::Result<Option<usize>> {
        match self.stream.next() {
            Ok((data, meta)) => Ok(Some(buf.fill_from(data, u64::from(meta.sequence)))),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Sensor pipeline exposed as separate large/small V4L2 nodes
pub struct V4l2Source {
    stream_id: StreamId,
    large: TierStream,
    small: TierStream,
}

impl V4l2Source {
    #[instrument(skip(config), fields(name = %config.name))]
    pub fn open(
        stream_id: StreamId,
        config: &StreamConfig,
        large_device: &str,
        small_device: &str,
    ) -> Result<Self> {
        let large = TierStream::open(stream_id, Tier::Large, large_device, &config.large)?;
        let small = TierStream::open(stream_id, Tier::Small, small_device, &config.small)?;
        info!("{} V4L2 source ready with {} buffers per tier", stream_id, BUFFER_COUNT);
        Ok(Self {
            stream_id,
            large,
            small,
        })
    }
}

impl FrameSource for V4l2Source {
    fn try_get_frame(&mut self, tier: Tier, buf: &mut FrameBuffer) -> Grab {
        let stream = match tier {
            Tier::Large => &mut self.large,
            Tier::Small => &mut self.small,
        };
        match stream.try_dequeue(buf) {
            Ok(Some(len)) => {
                trace!(stream = %self.stream_id, %tier, len, "Dequeued frame");
                Grab::Ready
            }
            Ok(None) => Grab::NotReady,
            Err(e) => {
                // Driver hiccups are treated like an empty queue; the loop polls again.
                warn!(stream = %self.stream_id, %tier, "Dequeue failed: {}", e);
                Grab::NotReady
            }
        }
    }
}
