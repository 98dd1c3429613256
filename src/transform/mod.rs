//! Pre-allocated image pipeline: planar YUV → RGBA, grayscale, and edge map

pub mod blur;
pub mod canny;
pub mod convert;
pub mod image;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::capture::Frame;
use crate::error::{InvalidGeometry, ProcessingError};
use crate::pipeline::pool::BufferPool;
use crate::SessionGeometry;

pub use canny::EdgeDetector;
pub use image::TransformedImage;

/// Output images kept in rotation: one being written, one waiting in the
/// handoff, one being uploaded.
pub const DEFAULT_OUTPUT_IMAGES: usize = 3;

/// Visual transform applied to every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    #[default]
    Raw,
    Grayscale,
    Edge,
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProcessingMode::Raw => "raw",
            ProcessingMode::Grayscale => "grayscale",
            ProcessingMode::Edge => "edge",
        })
    }
}

impl FromStr for ProcessingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(ProcessingMode::Raw),
            "gray" | "grayscale" => Ok(ProcessingMode::Grayscale),
            "edge" | "edges" | "canny" => Ok(ProcessingMode::Edge),
            other => Err(format!("unknown processing mode {other:?}")),
        }
    }
}

/// Hysteresis thresholds for the edge detector. Always `0 <= low < high`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeParameters {
    low: f64,
    high: f64,
}

impl EdgeParameters {
    pub const DEFAULT_LOW: f64 = 50.0;
    pub const DEFAULT_HIGH: f64 = 150.0;

    /// Smallest accepted `high`, leaving room for a `low` below it.
    pub const MIN_HIGH: f64 = 1.0;

    /// Build parameters, clamping instead of failing: `high` is raised to at
    /// least [`MIN_HIGH`](Self::MIN_HIGH) and `low` is clamped into
    /// `[0, high)`. A `low` at or above `high` becomes `high - 1`, the
    /// largest whole gradient level below it. Non-finite values fall back to
    /// the defaults.
    pub fn new(low: f64, high: f64) -> Self {
        let high = if high.is_finite() {
            high.max(Self::MIN_HIGH)
        } else {
            Self::DEFAULT_HIGH
        };
        let low = if low.is_finite() { low } else { Self::DEFAULT_LOW };
        let low = if low >= high { high - 1.0 } else { low };
        Self {
            low: low.max(0.0),
            high,
        }
    }

    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn high(&self) -> f64 {
        self.high
    }
}

impl Default for EdgeParameters {
    fn default() -> Self {
        Self {
            low: Self::DEFAULT_LOW,
            high: Self::DEFAULT_HIGH,
        }
    }
}

struct Scratch {
    geometry: SessionGeometry,
    rgba: Vec<u8>,
    gray: Vec<u8>,
    blur_tmp: Vec<u16>,
    blurred: Vec<u8>,
    mask: Vec<u8>,
    edges: EdgeDetector,
    output: Arc<BufferPool>,
}

impl Scratch {
    fn new(geometry: SessionGeometry, output_images: usize) -> Self {
        let pixels = geometry.pixels();
        let (w, h) = (geometry.width as usize, geometry.height as usize);
        Self {
            geometry,
            rgba: vec![0; geometry.rgba_len()],
            gray: vec![0; pixels],
            blur_tmp: vec![0; pixels],
            blurred: vec![0; pixels],
            mask: vec![0; pixels],
            edges: EdgeDetector::new(w, h),
            output: BufferPool::new(output_images, geometry.rgba_len()),
        }
    }
}

/// Frame transform with scratch buffers sized once per session geometry.
///
/// `transform` takes the mode and thresholds by value, so a call always
/// completes with the snapshot it was given.
pub struct TransformEngine {
    output_images: usize,
    scratch: Option<Scratch>,
    pool_misses: u64,
}

impl Default for TransformEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformEngine {
    pub fn new() -> Self {
        Self::with_output_images(DEFAULT_OUTPUT_IMAGES)
    }

    pub fn with_output_images(output_images: usize) -> Self {
        Self {
            output_images: output_images.max(1),
            scratch: None,
            pool_misses: 0,
        }
    }

    /// Allocate every scratch and output buffer for `width`×`height`.
    ///
    /// Re-initialising replaces the previous buffers; images still held
    /// downstream stay valid and are freed when dropped.
    #[instrument(skip(self))]
    pub fn init(&mut self, width: u32, height: u32) -> Result<SessionGeometry, InvalidGeometry> {
        let geometry = SessionGeometry::new(width, height)?;
        self.scratch = Some(Scratch::new(geometry, self.output_images));
        self.pool_misses = 0;
        info!(
            "Transform engine initialized for {}x{} ({} output images)",
            width, height, self.output_images
        );
        Ok(geometry)
    }

    pub fn is_initialized(&self) -> bool {
        self.scratch.is_some()
    }

    pub fn geometry(&self) -> Option<SessionGeometry> {
        self.scratch.as_ref().map(|s| s.geometry)
    }

    /// Output buffers that had to be allocated because the pool was empty.
    pub fn pool_misses(&self) -> u64 {
        self.pool_misses
    }

    /// Run one frame through the pipeline.
    pub fn transform(
        &mut self,
        frame: &Frame,
        mode: ProcessingMode,
        params: EdgeParameters,
    ) -> Result<TransformedImage, ProcessingError> {
        let scratch = self.scratch.as_mut().ok_or(ProcessingError::NotInitialized)?;
        let geometry = scratch.geometry;

        let expected = geometry.planar_len();
        if frame.len() != expected {
            return Err(ProcessingError::SizeMismatch {
                expected,
                actual: frame.len(),
            });
        }
        if frame.width() != geometry.width || frame.height() != geometry.height {
            return Err(ProcessingError::GeometryMismatch {
                width: geometry.width,
                height: geometry.height,
                actual_width: frame.width(),
                actual_height: frame.height(),
            });
        }

        let (w, h) = (geometry.width as usize, geometry.height as usize);
        convert::planar_to_rgba(frame.data(), w, h, frame.format(), &mut scratch.rgba);

        let (mut output, allocated) = scratch.output.acquire_or_alloc();
        if allocated {
            self.pool_misses += 1;
            debug!(misses = self.pool_misses, "Output pool exhausted, allocated image");
        }

        match mode {
            ProcessingMode::Raw => output.copy_from_slice(&scratch.rgba),
            ProcessingMode::Grayscale => {
                convert::rgba_to_luma(&scratch.rgba, &mut scratch.gray);
                convert::luma_to_rgba(&scratch.gray, &mut output);
            }
            ProcessingMode::Edge => {
                convert::rgba_to_luma(&scratch.rgba, &mut scratch.gray);
                blur::gaussian_5x5(&scratch.gray, &mut scratch.blur_tmp, &mut scratch.blurred, w, h);
                scratch
                    .edges
                    .detect(&scratch.blurred, &mut scratch.mask, params.low(), params.high());
                convert::luma_to_rgba(&scratch.mask, &mut output);
            }
        }

        Ok(TransformedImage::new(
            output,
            geometry,
            mode,
            frame.meta.sequence,
            frame.captured_at,
        ))
    }

    /// Free all buffers. The engine must be re-initialised before reuse.
    pub fn release(&mut self) {
        if self.scratch.take().is_some() {
            info!("Transform engine resources released");
        }
    }
}
