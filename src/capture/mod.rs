pub mod device;
pub mod frame;
pub mod source;
pub mod synthetic;

#[cfg(feature = "gstreamer")]
pub mod gst_capture;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use device::{CameraDescriptor, CameraProvider, CameraStream, DeviceEvent, Facing};
pub use frame::{Frame, FrameMetadata, PixelFormat};
pub use source::{Delivery, FrameSink, FrameSource, OpenRequest};
pub use synthetic::{Pattern, SyntheticCamera};

#[cfg(feature = "gstreamer")]
pub use gst_capture::GstCamera;
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Camera;
