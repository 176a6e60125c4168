use std::time::Instant;

use bytes::BytesMut;
use serde::{Deserialize, Serialize};

use super::geometry::Size;

/// Pixel layouts a channel can deliver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// YUV 4:2:0 semi-planar, VU interleaved. Scaler channels emit this.
    #[default]
    Nv21,
    Nv12,
    Yuyv4,
    Rgb24,
}

impl PixelFormat {
    /// Bytes needed for one frame of `size` in this layout.
    pub const fn frame_len(self, size: Size) -> usize {
        let area = size.area();
        match self {
            PixelFormat::Nv21 | PixelFormat::Nv12 => area * 3 / 2,
            PixelFormat::Yuyv4 => area * 2,
            PixelFormat::Rgb24 => area * 3,
        }
    }

    /// V4L2 four-character code for this layout.
    pub const fn fourcc(self) -> [u8; 4] {
        match self {
            PixelFormat::Nv21 => *b"NV21",
            PixelFormat::Nv12 => *b"NV12",
            PixelFormat::Yuyv4 => *b"YUYV",
            PixelFormat::Rgb24 => *b"RGB3",
        }
    }

    pub fn from_fourcc(code: [u8; 4]) -> Option<Self> {
        match &code {
            b"NV21" => Some(PixelFormat::Nv21),
            b"NV12" => Some(PixelFormat::Nv12),
            b"YUYV" => Some(PixelFormat::Yuyv4),
            b"RGB3" => Some(PixelFormat::Rgb24),
            _ => None,
        }
    }
}

/// Check that what a device agreed to deliver fills a buffer allocated for
/// `requested` exactly. Any other size or layout would be cut short or
/// underfilled on every grab.
pub fn verify_negotiated(
    requested: Size,
    format: PixelFormat,
    applied: Size,
    applied_fourcc: [u8; 4],
) -> Result<(), String> {
    let applied_format = PixelFormat::from_fourcc(applied_fourcc);
    if applied == requested && applied_format == Some(format) {
        return Ok(());
    }
    let layout = match applied_format {
        Some(f) => format!("{f:?}"),
        None => String::from_utf8_lossy(&applied_fourcc).into_owned(),
    };
    Err(format!(
        "driver applied {applied} {layout}, buffers expect {requested} {format:?}"
    ))
}

/// Frame metadata, rewritten in place on every grab
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameMetadata {
    /// Sequence number reported by the source for this frame.
    pub sequence: u64,
    /// Bytes the source actually wrote.
    pub bytes_used: usize,
    /// When the frame landed in this buffer; `None` until the first grab.
    pub captured_at: Option<Instant>,
}

/// Preallocated storage for one channel's frames.
///
/// The backing memory is sized once from the channel's effective size and is
/// overwritten on every capture; nothing is reallocated per frame.
pub struct FrameBuffer {
    data: BytesMut,
    size: Size,
    format: PixelFormat,
    meta: FrameMetadata,
}

impl FrameBuffer {
    pub fn new(size: Size, format: PixelFormat) -> Self {
        Self {
            data: BytesMut::zeroed(format.frame_len(size)),
            size,
            format,
            meta: FrameMetadata::default(),
        }
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn meta(&self) -> &FrameMetadata {
        &self.meta
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Writable view for sources filling the buffer.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Copy `src` into the buffer, truncating to capacity, and stamp it.
    pub fn fill_from(&mut self, src: &[u8], sequence: u64) -> usize {
        let len = src.len().min(self.data.len());
        self.data[..len].copy_from_slice(&src[..len]);
        self.stamp(sequence, len);
        len
    }

    /// Record that a source just wrote `bytes_used` bytes of frame `sequence`.
    pub fn stamp(&mut self, sequence: u64, bytes_used: usize) {
        self.meta = FrameMetadata {
            sequence,
            bytes_used,
            captured_at: Some(Instant::now()),
        };
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("size", &self.size)
            .field("format", &self.format)
            .field("capacity", &self.data.len())
            .field("meta", &self.meta)
            .finish()
    }
}
