use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::pipeline::pool::PooledBuffer;

/// Planar camera frame.
///
/// The buffer belongs to the source's pool. Dropping the frame, or calling
/// [`Frame::release`], hands the slot back to the source.
pub struct Frame {
    data: PooledBuffer,

    /// Frame metadata
    pub meta: FrameMetadata,

    /// Host time at which the frame was dequeued, for latency tracking
    pub captured_at: Instant,
}

/// Frame metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub device_timestamp: Option<Duration>, // Sensor timestamp if available
}

/// 4:2:0 planar formats: a full-resolution luma plane followed by one
/// half-resolution plane of interleaved chroma pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Chroma pairs stored V then U.
    #[default]
    Nv21,
    /// Chroma pairs stored U then V.
    Nv12,
}

impl PixelFormat {
    /// Byte length of one frame: `width*height*3/2`.
    pub const fn frame_len(self, width: u32, height: u32) -> usize {
        width as usize * height as usize * 3 / 2
    }

    pub const fn fourcc(self) -> &'static [u8; 4] {
        match self {
            PixelFormat::Nv21 => b"NV21",
            PixelFormat::Nv12 => b"NV12",
        }
    }

    /// Offsets of (U, V) within an interleaved chroma pair.
    pub(crate) const fn chroma_order(self) -> (usize, usize) {
        match self {
            PixelFormat::Nv21 => (1, 0),
            PixelFormat::Nv12 => (0, 1),
        }
    }
}

impl Frame {
    pub fn new(data: PooledBuffer, meta: FrameMetadata) -> Self {
        Self {
            data,
            meta,
            captured_at: Instant::now(),
        }
    }

    /// Wrap a caller-owned buffer that is not backed by a source pool.
    pub fn from_vec(data: Vec<u8>, meta: FrameMetadata) -> Self {
        Self::new(PooledBuffer::detached(data), meta)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    pub fn format(&self) -> PixelFormat {
        self.meta.format
    }

    /// Hand the buffer slot back to the source.
    pub fn release(self) {}
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("meta", &self.meta)
            .field("len", &self.data.len())
            .finish()
    }
}
