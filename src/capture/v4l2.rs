//! V4L2 camera backend with memory-mapped streaming

use std::io;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, info, instrument};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::framesize::FrameSizeEnum;
use v4l::io::traits::CaptureStream as _;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::device::{
    CameraDescriptor, CameraProvider, CameraStream, CapturedFrame, Facing, StreamCapability,
    SupportedSizes,
};
use crate::capture::frame::PixelFormat;
use crate::error::CameraError;
use crate::SessionGeometry;

const MAX_DEVICE_INDEX: u32 = 16;

/// Scans `/dev/video*` for capture devices that offer NV21 or NV12.
pub struct V4l2Camera {
    buffer_count: u32,
}

impl Default for V4l2Camera {
    fn default() -> Self {
        Self { buffer_count: 4 }
    }
}

impl V4l2Camera {
    pub fn new(buffer_count: u32) -> Self {
        Self {
            buffer_count: buffer_count.max(2),
        }
    }

    fn probe(path: &str) -> Option<CameraDescriptor> {
        let dev = Device::with_path(path).ok()?;
        let caps = dev.query_caps().ok()?;
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return None;
        }

        let formats = dev.enum_formats().ok()?;
        let capabilities: Vec<StreamCapability> = [PixelFormat::Nv21, PixelFormat::Nv12]
            .into_iter()
            .filter(|format| {
                formats
                    .iter()
                    .any(|desc| desc.fourcc == FourCC::new(format.fourcc()))
            })
            .map(|format| StreamCapability {
                format,
                sizes: frame_sizes(&dev, format),
            })
            .collect();

        if capabilities.is_empty() {
            debug!("{} ({}) offers no planar 4:2:0 format, skipping", path, caps.card);
            return None;
        }

        info!("Found capture device: {} - {}", path, caps.card);
        Some(CameraDescriptor {
            id: path.to_string(),
            name: caps.card,
            facing: Facing::External,
            capabilities,
        })
    }
}

fn frame_sizes(dev: &Device, format: PixelFormat) -> SupportedSizes {
    let Ok(sizes) = dev.enum_framesizes(FourCC::new(format.fourcc())) else {
        return SupportedSizes::Any;
    };
    let mut discrete = Vec::new();
    for size in sizes {
        match size.size {
            FrameSizeEnum::Discrete(d) => discrete.push(SessionGeometry {
                width: d.width,
                height: d.height,
            }),
            FrameSizeEnum::Stepwise(s) => {
                return SupportedSizes::Stepwise {
                    min: SessionGeometry {
                        width: s.min_width,
                        height: s.min_height,
                    },
                    max: SessionGeometry {
                        width: s.max_width,
                        height: s.max_height,
                    },
                    step_width: s.step_width,
                    step_height: s.step_height,
                }
            }
        }
    }
    SupportedSizes::Discrete(discrete)
}

fn map_io_error(device: &str, err: io::Error) -> CameraError {
    let device = device.to_string();
    if err.kind() == io::ErrorKind::PermissionDenied {
        return CameraError::PermissionDenied { device };
    }
    match err.raw_os_error() {
        Some(libc::EBUSY) => CameraError::DeviceBusy { device },
        Some(libc::ENODEV) | Some(libc::ENXIO) => CameraError::Disconnected { device },
        Some(libc::EAGAIN) | Some(libc::EINTR) | Some(libc::EIO) => CameraError::FrameUnavailable {
            reason: err.to_string(),
        },
        _ => CameraError::Fatal {
            device,
            reason: err.to_string(),
        },
    }
}

impl CameraProvider for V4l2Camera {
    fn devices(&self) -> Result<Vec<CameraDescriptor>, CameraError> {
        info!("Scanning V4L2 capture devices...");
        Ok((0..MAX_DEVICE_INDEX)
            .map(|i| format!("/dev/video{i}"))
            .filter(|path| Path::new(path).exists())
            .filter_map(|path| Self::probe(&path))
            .collect())
    }

    #[instrument(skip(self, device), fields(device = %device.id))]
    fn open(
        &self,
        device: &CameraDescriptor,
        geometry: SessionGeometry,
        format: PixelFormat,
    ) -> Result<Box<dyn CameraStream>, CameraError> {
        let dev = Device::with_path(&device.id).map_err(|e| map_io_error(&device.id, e))?;

        let mut fmt = dev.format().map_err(|e| map_io_error(&device.id, e))?;
        fmt.width = geometry.width;
        fmt.height = geometry.height;
        fmt.fourcc = FourCC::new(format.fourcc());
        let fmt = dev
            .set_format(&fmt)
            .map_err(|e| map_io_error(&device.id, e))?;

        // The driver may silently pick another size or pad rows.
        if fmt.width != geometry.width
            || fmt.height != geometry.height
            || fmt.fourcc != FourCC::new(format.fourcc())
            || fmt.stride != geometry.width
        {
            return Err(CameraError::ConfigurationFailed {
                reason: format!(
                    "driver negotiated {}x{} {} stride {}, requested {} {:?}",
                    fmt.width, fmt.height, fmt.fourcc, fmt.stride, geometry, format
                ),
            });
        }

        let stream = MmapStream::with_buffers(&dev, Type::VideoCapture, self.buffer_count)
            .map_err(|e| map_io_error(&device.id, e))?;
        info!(
            "Capture stream started with {} buffers",
            self.buffer_count
        );

        Ok(Box::new(V4l2Stream {
            _device: dev,
            stream,
            id: device.id.clone(),
            geometry,
            format,
        }))
    }
}

struct V4l2Stream {
    _device: Device,
    stream: MmapStream<'static>,
    id: String,
    geometry: SessionGeometry,
    format: PixelFormat,
}

impl CameraStream for V4l2Stream {
    fn read_frame(&mut self, dst: Option<&mut [u8]>) -> Result<CapturedFrame, CameraError> {
        let (buf, meta) = self.stream.next().map_err(|e| map_io_error(&self.id, e))?;

        if let Some(dst) = dst {
            let used = (meta.bytesused as usize).min(buf.len());
            if used < dst.len() {
                return Err(CameraError::FrameUnavailable {
                    reason: format!("short frame: {} of {} bytes", used, dst.len()),
                });
            }
            dst.copy_from_slice(&buf[..dst.len()]);
        }

        Ok(CapturedFrame {
            width: self.geometry.width,
            height: self.geometry.height,
            format: self.format,
            device_timestamp: Some(
                Duration::from_secs(meta.timestamp.sec as u64)
                    + Duration::from_micros(meta.timestamp.usec as u64),
            ),
        })
    }

    fn stop(&mut self) {
        debug!("Stopping V4L2 stream on {}", self.id);
    }
}
