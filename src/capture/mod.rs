pub mod frame;
pub mod geometry;
pub mod package;
pub mod source;
pub mod synthetic;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use frame::{verify_negotiated, FrameBuffer, FrameMetadata, PixelFormat};
pub use geometry::{effective_size, Rotation, Size};
pub use package::{ImagePackage, StreamFrames, StreamId, Tier};
pub use source::{open_source, FrameSource, Grab};
pub use synthetic::SyntheticSource;
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Source;
