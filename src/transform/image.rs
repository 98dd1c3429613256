use std::time::Instant;

use crate::pipeline::pool::PooledBuffer;
use crate::transform::ProcessingMode;
use crate::SessionGeometry;

/// RGBA output of one transform pass.
///
/// The pixel buffer is borrowed from the engine's output pool and returns to
/// it when the image is dropped.
pub struct TransformedImage {
    data: PooledBuffer,
    geometry: SessionGeometry,
    mode: ProcessingMode,
    frame_sequence: u64,
    captured_at: Instant,
}

impl TransformedImage {
    pub(crate) fn new(
        data: PooledBuffer,
        geometry: SessionGeometry,
        mode: ProcessingMode,
        frame_sequence: u64,
        captured_at: Instant,
    ) -> Self {
        debug_assert_eq!(data.len(), geometry.rgba_len());
        Self {
            data,
            geometry,
            mode,
            frame_sequence,
            captured_at,
        }
    }

    /// Tightly packed RGBA rows, `width*height*4` bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn width(&self) -> u32 {
        self.geometry.width
    }

    pub fn height(&self) -> u32 {
        self.geometry.height
    }

    pub fn geometry(&self) -> SessionGeometry {
        self.geometry
    }

    /// Mode the image was produced with.
    pub fn mode(&self) -> ProcessingMode {
        self.mode
    }

    /// Sequence number of the source frame.
    pub fn frame_sequence(&self) -> u64 {
        self.frame_sequence
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * self.geometry.width as usize + x as usize) * 4;
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }
}

impl std::fmt::Debug for TransformedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformedImage")
            .field("geometry", &self.geometry)
            .field("mode", &self.mode)
            .field("frame_sequence", &self.frame_sequence)
            .finish()
    }
}
