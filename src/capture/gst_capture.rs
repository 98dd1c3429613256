//! GStreamer capture backend built on an appsink pipeline

use std::time::Duration;

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{debug, info, instrument, warn};

use crate::capture::device::{
    CameraDescriptor, CameraProvider, CameraStream, CapturedFrame, Facing, StreamCapability,
    SupportedSizes,
};
use crate::capture::frame::PixelFormat;
use crate::error::CameraError;
use crate::SessionGeometry;

const PULL_TIMEOUT_MS: u64 = 500;

/// Camera provider wrapping a GStreamer source element description such as
/// `v4l2src device=/dev/video0` or `libcamerasrc`.
///
/// `videoconvert` sits between the source and the appsink, so the source may
/// produce any raw format; the sink always receives NV21 or NV12.
pub struct GstCamera {
    source: String,
    fps: u32,
}

impl GstCamera {
    pub fn new(source: impl Into<String>, fps: u32) -> Result<Self, CameraError> {
        gst::init().map_err(|e| CameraError::Fatal {
            device: "gstreamer".into(),
            reason: format!("failed to initialize GStreamer: {e}"),
        })?;
        Ok(Self {
            source: source.into(),
            fps,
        })
    }

    fn pipeline_description(&self, geometry: SessionGeometry, format: PixelFormat) -> String {
        let caps_format = match format {
            PixelFormat::Nv21 => "NV21",
            PixelFormat::Nv12 => "NV12",
        };
        let framerate = if self.fps > 0 {
            format!(",framerate={}/1", self.fps)
        } else {
            String::new()
        };
        format!(
            "{} ! videoconvert ! videoscale ! \
             video/x-raw,format={},width={},height={}{} ! \
             queue max-size-buffers=2 max-size-time=0 max-size-bytes=0 leaky=downstream ! \
             appsink name=appsink",
            self.source, caps_format, geometry.width, geometry.height, framerate
        )
    }
}

impl CameraProvider for GstCamera {
    fn devices(&self) -> Result<Vec<CameraDescriptor>, CameraError> {
        let factory = self.source.split_whitespace().next().unwrap_or_default();
        if gst::ElementFactory::find(factory).is_none() {
            warn!("GStreamer element {} not available", factory);
            return Ok(Vec::new());
        }
        let any = |format| StreamCapability {
            format,
            sizes: SupportedSizes::Any,
        };
        Ok(vec![CameraDescriptor {
            id: self.source.clone(),
            name: format!("GStreamer {factory}"),
            facing: Facing::External,
            capabilities: vec![any(PixelFormat::Nv21), any(PixelFormat::Nv12)],
        }])
    }

    #[instrument(skip(self, device), fields(device = %device.id))]
    fn open(
        &self,
        device: &CameraDescriptor,
        geometry: SessionGeometry,
        format: PixelFormat,
    ) -> Result<Box<dyn CameraStream>, CameraError> {
        let description = self.pipeline_description(geometry, format);
        info!("Pipeline: {}", description);

        let configuration = |reason: String| CameraError::ConfigurationFailed { reason };

        let pipeline = gst::parse::launch(&description)
            .map_err(|e| configuration(format!("invalid pipeline: {e}")))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| configuration("description did not produce a pipeline".into()))?;

        let appsink = pipeline
            .by_name("appsink")
            .and_then(|e| e.downcast::<gst_app::AppSink>().ok())
            .ok_or_else(|| configuration("appsink element missing".into()))?;

        appsink.set_property("emit-signals", false);
        appsink.set_property("max-buffers", 2u32);
        appsink.set_property("drop", true);
        appsink.set_property("sync", false);

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| CameraError::Fatal {
                device: device.id.clone(),
                reason: format!("failed to start pipeline: {e:?}"),
            })?;

        let (state_change, _, _) = pipeline.state(Some(gst::ClockTime::from_seconds(5)));
        if state_change.is_err() {
            let _ = pipeline.set_state(gst::State::Null);
            return Err(CameraError::DeviceBusy {
                device: device.id.clone(),
            });
        }
        info!("Pipeline playing");

        Ok(Box::new(GstStream {
            pipeline,
            appsink,
            id: device.id.clone(),
            geometry,
            format,
        }))
    }
}

struct GstStream {
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    id: String,
    geometry: SessionGeometry,
    format: PixelFormat,
}

impl GstStream {
    /// Copy both planes into a tightly packed destination, dropping any row
    /// padding the negotiated layout carries.
    fn copy_planes(
        &self,
        info: &gst_video::VideoInfo,
        src: &[u8],
        dst: &mut [u8],
    ) -> Result<(), CameraError> {
        let width = self.geometry.width as usize;
        let height = self.geometry.height as usize;
        let (luma, chroma) = dst.split_at_mut(width * height);

        for (plane, dst, rows) in [(0usize, luma, height), (1, chroma, height / 2)] {
            let stride = info.stride()[plane] as usize;
            let offset = info.offset()[plane];
            for (row, out) in dst.chunks_exact_mut(width).take(rows).enumerate() {
                let start = offset + row * stride;
                let line = src.get(start..start + width).ok_or_else(|| {
                    CameraError::FrameUnavailable {
                        reason: format!("buffer of {} bytes too short for plane {plane}", src.len()),
                    }
                })?;
                out.copy_from_slice(line);
            }
        }
        Ok(())
    }
}

impl CameraStream for GstStream {
    fn read_frame(&mut self, dst: Option<&mut [u8]>) -> Result<CapturedFrame, CameraError> {
        let Some(sample) = self
            .appsink
            .try_pull_sample(gst::ClockTime::from_mseconds(PULL_TIMEOUT_MS))
        else {
            if self.appsink.is_eos() {
                return Err(CameraError::Disconnected {
                    device: self.id.clone(),
                });
            }
            return Err(CameraError::FrameUnavailable {
                reason: "no sample within timeout".into(),
            });
        };

        let buffer = sample.buffer().ok_or_else(|| CameraError::FrameUnavailable {
            reason: "sample contains no buffer".into(),
        })?;
        let device_timestamp = buffer.pts().map(|pts| Duration::from_nanos(pts.nseconds()));

        if let Some(dst) = dst {
            let caps = sample.caps().ok_or_else(|| CameraError::FrameUnavailable {
                reason: "sample has no caps".into(),
            })?;
            let info = gst_video::VideoInfo::from_caps(caps).map_err(|e| {
                CameraError::FrameUnavailable {
                    reason: format!("unreadable caps: {e}"),
                }
            })?;
            if info.width() != self.geometry.width || info.height() != self.geometry.height {
                return Err(CameraError::Fatal {
                    device: self.id.clone(),
                    reason: format!(
                        "pipeline renegotiated to {}x{}",
                        info.width(),
                        info.height()
                    ),
                });
            }
            let map = buffer
                .map_readable()
                .map_err(|e| CameraError::FrameUnavailable {
                    reason: format!("failed to map buffer: {e}"),
                })?;
            self.copy_planes(&info, map.as_slice(), dst)?;
        }

        Ok(CapturedFrame {
            width: self.geometry.width,
            height: self.geometry.height,
            format: self.format,
            device_timestamp,
        })
    }

    fn stop(&mut self) {
        debug!("Stopping GStreamer pipeline for {}", self.id);
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!("Failed to stop pipeline: {:?}", e);
        }
    }
}

impl Drop for GstStream {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}
