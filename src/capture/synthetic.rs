//! Test-pattern camera that needs no hardware

use std::thread;
use std::time::{Duration, Instant};

use tracing::info;

use crate::capture::device::{
    CameraDescriptor, CameraProvider, CameraStream, CapturedFrame, Facing, StreamCapability,
    SupportedSizes,
};
use crate::capture::frame::PixelFormat;
use crate::error::CameraError;
use crate::SessionGeometry;

/// Luma content of generated frames. Chroma is neutral unless noted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    /// Horizontal ramp with a bright bar sweeping across it, tinted chroma.
    MovingBars,
    /// Every luma sample set to one value.
    Uniform(u8),
    /// `left` before `column`, `right` from `column` on, full height.
    VerticalStep { column: u32, left: u8, right: u8 },
    /// Alternating cells of limited-range black and white.
    Checkerboard { cell: u32 },
}

impl Pattern {
    /// Write one full planar frame into `dst`.
    pub fn render(&self, dst: &mut [u8], geometry: SessionGeometry, format: PixelFormat, tick: u64) {
        let (w, h) = (geometry.width as usize, geometry.height as usize);
        let (luma, chroma) = dst.split_at_mut(w * h);

        for (y, row) in luma.chunks_exact_mut(w).enumerate() {
            for (x, px) in row.iter_mut().enumerate() {
                *px = self.luma_at(x, y, w, tick);
            }
        }

        let (u_off, v_off) = format.chroma_order();
        for (cy, row) in chroma.chunks_exact_mut(w).enumerate() {
            for (cx, pair) in row.chunks_exact_mut(2).enumerate() {
                let (u, v) = match self {
                    Pattern::MovingBars => (
                        (64 + cx * 2 * 128 / w) as u8,
                        (64 + cy * 2 * 128 / h) as u8,
                    ),
                    _ => (128, 128),
                };
                pair[u_off] = u;
                pair[v_off] = v;
            }
        }
    }

    fn luma_at(&self, x: usize, y: usize, width: usize, tick: u64) -> u8 {
        match *self {
            Pattern::MovingBars => {
                let bar_width = (width / 16).max(1);
                let bar_start = (tick as usize * 4) % width;
                if (x + width - bar_start) % width < bar_width {
                    235
                } else {
                    (16 + x * 219 / width) as u8
                }
            }
            Pattern::Uniform(value) => value,
            Pattern::VerticalStep { column, left, right } => {
                if x < column as usize {
                    left
                } else {
                    right
                }
            }
            Pattern::Checkerboard { cell } => {
                let cell = cell.max(1) as usize;
                if (x / cell + y / cell) % 2 == 0 {
                    16
                } else {
                    235
                }
            }
        }
    }
}

/// Camera provider producing generated frames at a fixed rate.
#[derive(Debug, Clone)]
pub struct SyntheticCamera {
    devices: Vec<CameraDescriptor>,
    pattern: Pattern,
    fps: u32,
}

impl SyntheticCamera {
    /// One rear-facing device accepting any geometry. `fps == 0` delivers
    /// frames as fast as they are read.
    pub fn new(fps: u32) -> Self {
        Self {
            devices: vec![Self::descriptor("synthetic:0", Facing::Back)],
            pattern: Pattern::MovingBars,
            fps,
        }
    }

    pub fn descriptor(id: &str, facing: Facing) -> CameraDescriptor {
        CameraDescriptor {
            id: id.to_string(),
            name: format!("Synthetic camera ({id})"),
            facing,
            capabilities: vec![
                StreamCapability {
                    format: PixelFormat::Nv21,
                    sizes: SupportedSizes::Any,
                },
                StreamCapability {
                    format: PixelFormat::Nv12,
                    sizes: SupportedSizes::Any,
                },
            ],
        }
    }

    pub fn with_devices(mut self, devices: Vec<CameraDescriptor>) -> Self {
        self.devices = devices;
        self
    }

    pub fn with_pattern(mut self, pattern: Pattern) -> Self {
        self.pattern = pattern;
        self
    }
}

impl CameraProvider for SyntheticCamera {
    fn devices(&self) -> Result<Vec<CameraDescriptor>, CameraError> {
        Ok(self.devices.clone())
    }

    fn open(
        &self,
        device: &CameraDescriptor,
        geometry: SessionGeometry,
        format: PixelFormat,
    ) -> Result<Box<dyn CameraStream>, CameraError> {
        info!("Synthetic camera {} streaming {} at {} fps", device.id, geometry, self.fps);
        let interval = (self.fps > 0).then(|| Duration::from_secs(1) / self.fps);
        let now = Instant::now();
        Ok(Box::new(SyntheticStream {
            geometry,
            format,
            pattern: self.pattern,
            interval,
            deadline: now,
            started: now,
            tick: 0,
        }))
    }
}

struct SyntheticStream {
    geometry: SessionGeometry,
    format: PixelFormat,
    pattern: Pattern,
    interval: Option<Duration>,
    deadline: Instant,
    started: Instant,
    tick: u64,
}

impl CameraStream for SyntheticStream {
    fn read_frame(&mut self, dst: Option<&mut [u8]>) -> Result<CapturedFrame, CameraError> {
        if let Some(interval) = self.interval {
            let now = Instant::now();
            if self.deadline > now {
                thread::sleep(self.deadline - now);
                self.deadline += interval;
            } else {
                // Fell behind; keep cadence from here rather than bursting.
                self.deadline = now + interval;
            }
        }

        if let Some(dst) = dst {
            let expected = self.format.frame_len(self.geometry.width, self.geometry.height);
            if dst.len() != expected {
                return Err(CameraError::FrameUnavailable {
                    reason: format!("destination is {} bytes, frame is {}", dst.len(), expected),
                });
            }
            self.pattern.render(dst, self.geometry, self.format, self.tick);
        }
        self.tick += 1;

        Ok(CapturedFrame {
            width: self.geometry.width,
            height: self.geometry.height,
            format: self.format,
            device_timestamp: Some(self.started.elapsed()),
        })
    }
}
