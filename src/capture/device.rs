//! Camera subsystem boundary
//!
//! Backends (V4L2, GStreamer, the synthetic test pattern) implement
//! [`CameraProvider`] for enumeration and [`CameraStream`] for an opened
//! device. Everything above this module only sees planar frames.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capture::frame::PixelFormat;
use crate::error::{CameraError, ErrorKind};
use crate::SessionGeometry;

/// Physical mounting of a camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    Back,
    Front,
    External,
}

/// Resolutions a device can deliver for one format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupportedSizes {
    Discrete(Vec<SessionGeometry>),
    Stepwise {
        min: SessionGeometry,
        max: SessionGeometry,
        step_width: u32,
        step_height: u32,
    },
    Any,
}

impl SupportedSizes {
    pub fn contains(&self, geometry: SessionGeometry) -> bool {
        match self {
            SupportedSizes::Discrete(sizes) => sizes.contains(&geometry),
            SupportedSizes::Stepwise {
                min,
                max,
                step_width,
                step_height,
            } => {
                let fits = |value: u32, lo: u32, hi: u32, step: u32| {
                    value >= lo && value <= hi && (step == 0 || (value - lo) % step == 0)
                };
                fits(geometry.width, min.width, max.width, *step_width)
                    && fits(geometry.height, min.height, max.height, *step_height)
            }
            SupportedSizes::Any => true,
        }
    }
}

/// Capability entry: one pixel format and the sizes it is offered at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamCapability {
    pub format: PixelFormat,
    pub sizes: SupportedSizes,
}

/// Enumerated camera device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraDescriptor {
    pub id: String,
    pub name: String,
    pub facing: Facing,
    pub capabilities: Vec<StreamCapability>,
}

impl CameraDescriptor {
    /// First supported planar format offered at `geometry`, preferring NV21.
    pub fn format_for(&self, geometry: SessionGeometry) -> Option<PixelFormat> {
        [PixelFormat::Nv21, PixelFormat::Nv12]
            .into_iter()
            .find(|format| {
                self.capabilities
                    .iter()
                    .any(|cap| cap.format == *format && cap.sizes.contains(geometry))
            })
    }
}

/// Pick a device: rear-facing first, then front-facing, then whatever was
/// enumerated first.
pub fn select_device(devices: &[CameraDescriptor]) -> Option<&CameraDescriptor> {
    devices
        .iter()
        .find(|d| d.facing == Facing::Back)
        .or_else(|| devices.iter().find(|d| d.facing == Facing::Front))
        .or_else(|| devices.first())
}

/// What the stream wrote for one dequeued frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapturedFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub device_timestamp: Option<Duration>,
}

/// Device lifecycle notifications, dispatched through
/// [`crate::pipeline::state::SessionState::next`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Opened,
    Disconnected,
    Error(ErrorKind),
}

impl DeviceEvent {
    pub fn from_error(err: &CameraError) -> Self {
        match err {
            CameraError::Disconnected { .. } => DeviceEvent::Disconnected,
            other => DeviceEvent::Error(other.kind()),
        }
    }
}

/// Camera enumeration and opening.
pub trait CameraProvider: Send + Sync {
    fn devices(&self) -> Result<Vec<CameraDescriptor>, CameraError>;

    /// Open `device` and configure it to stream `format` at `geometry`.
    fn open(
        &self,
        device: &CameraDescriptor,
        geometry: SessionGeometry,
        format: PixelFormat,
    ) -> Result<Box<dyn CameraStream>, CameraError>;
}

/// An opened, configured device. Owned by the capture thread.
pub trait CameraStream: Send {
    /// Block until the sensor produces a frame.
    ///
    /// With `Some(dst)` the planar data is written into `dst`, which is
    /// exactly one frame long. With `None` the frame is dequeued and
    /// discarded so the sensor keeps its cadence.
    fn read_frame(&mut self, dst: Option<&mut [u8]>) -> Result<CapturedFrame, CameraError>;

    /// Stop streaming and release the device. Called once, from the capture
    /// thread, before it exits.
    fn stop(&mut self) {}
}
