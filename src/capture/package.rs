//! One complete multi-stream frame set.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::frame::{FrameBuffer, PixelFormat};
use super::geometry::effective_size;
use crate::{CaptureConfig, StreamConfig};

/// Physical sensor pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamId {
    Primary,
    Secondary,
}

impl StreamId {
    pub const fn as_str(self) -> &'static str {
        match self {
            StreamId::Primary => "primary",
            StreamId::Secondary => "secondary",
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolution captured per stream per frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    Large,
    Small,
}

impl Tier {
    pub const ALL: [Tier; 2] = [Tier::Large, Tier::Small];

    pub const fn as_str(self) -> &'static str {
        match self {
            Tier::Large => "large",
            Tier::Small => "small",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Large and small frames of one stream
#[derive(Debug)]
pub struct StreamFrames {
    pub large: FrameBuffer,
    pub small: FrameBuffer,
}

impl StreamFrames {
    fn allocate(config: &StreamConfig) -> Self {
        let alloc = |tier: Tier| {
            let channel = config.channel(tier);
            FrameBuffer::new(
                effective_size(channel.size, channel.rotation),
                PixelFormat::Nv21,
            )
        };
        Self {
            large: alloc(Tier::Large),
            small: alloc(Tier::Small),
        }
    }

    pub fn tier(&self, tier: Tier) -> &FrameBuffer {
        match tier {
            Tier::Large => &self.large,
            Tier::Small => &self.small,
        }
    }
}

/// Frame set handed to the consumer in one publish
#[derive(Debug)]
pub struct ImagePackage {
    /// Sequence number assigned at publish time.
    pub frame_idx: u64,
    pub primary: StreamFrames,
    /// Present only when the secondary stream is enabled.
    pub secondary: Option<StreamFrames>,
}

impl ImagePackage {
    /// Allocate every enabled channel up front at its effective size.
    #[instrument(skip(config), fields(secondary = config.secondary_enabled))]
    pub fn new(config: &CaptureConfig) -> Self {
        let primary = StreamFrames::allocate(&config.primary);
        let secondary = config
            .secondary_enabled
            .then(|| StreamFrames::allocate(&config.secondary));
        debug!(
            large = %primary.large.size(),
            small = %primary.small.size(),
            "Allocated image package"
        );
        Self {
            frame_idx: 0,
            primary,
            secondary,
        }
    }

    pub fn stream(&self, id: StreamId) -> Option<&StreamFrames> {
        match id {
            StreamId::Primary => Some(&self.primary),
            StreamId::Secondary => self.secondary.as_ref(),
        }
    }
}
