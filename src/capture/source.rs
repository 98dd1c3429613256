//! Capture session: device selection, the capture thread, and buffer slots

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, instrument, trace, warn};

use crate::capture::device::{
    select_device, CameraDescriptor, CameraProvider, CameraStream, DeviceEvent,
};
use crate::capture::frame::{Frame, FrameMetadata, PixelFormat};
use crate::error::CameraError;
use crate::pipeline::pool::BufferPool;
use crate::pipeline::state::{SessionEvent, StateCell};
use crate::pipeline::stats::PipelineStats;
use crate::{SessionGeometry, SessionState};

/// Buffer slots a source owns when none are configured.
pub const DEFAULT_BUFFER_COUNT: usize = 2;

/// What the sink did with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The frame made the full round trip downstream.
    Accepted,
    /// The frame was discarded downstream.
    Dropped,
}

/// Receiver of frames and device events, run on the capture thread.
///
/// `on_frame` must not block on the consumer; the source keeps reading
/// while it runs, and skips frames when every buffer slot is still held.
pub trait FrameSink: Send + 'static {
    fn on_frame(&mut self, frame: Frame) -> Delivery;

    fn on_device_event(&mut self, _event: &DeviceEvent) {}
}

impl<F> FrameSink for F
where
    F: FnMut(Frame) -> Delivery + Send + 'static,
{
    fn on_frame(&mut self, frame: Frame) -> Delivery {
        self(frame)
    }
}

/// Parameters for [`FrameSource::open`].
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub geometry: SessionGeometry,
    pub buffer_count: usize,
    /// Device id to open instead of applying the facing policy.
    pub device: Option<String>,
    pub pin_core: Option<usize>,
}

impl OpenRequest {
    pub fn new(geometry: SessionGeometry) -> Self {
        Self {
            geometry,
            buffer_count: DEFAULT_BUFFER_COUNT,
            device: None,
            pin_core: None,
        }
    }
}

/// An open capture session with its dedicated thread.
pub struct FrameSource {
    device_id: String,
    geometry: SessionGeometry,
    cancel: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    state: StateCell,
    pool: Arc<BufferPool>,
}

impl FrameSource {
    /// Select and open a camera, then start delivering frames to `sink` on a
    /// new thread.
    ///
    /// `state` enters `Opening` here, moves to `Streaming` after the first
    /// accepted frame, and to `Failed` on configuration or device errors.
    #[instrument(skip(provider, request, state, stats, sink), fields(geometry = %request.geometry))]
    pub fn open<S: FrameSink>(
        provider: &dyn CameraProvider,
        request: OpenRequest,
        state: StateCell,
        stats: Arc<PipelineStats>,
        mut sink: S,
    ) -> Result<FrameSource, CameraError> {
        state.apply(&SessionEvent::StartRequested);
        let result = Self::open_stream(provider, &request);
        let (descriptor, format, stream) = match result {
            Ok(opened) => opened,
            Err(err) => {
                let event = match &err {
                    CameraError::ConfigurationFailed { .. } | CameraError::InvalidGeometry(_) => {
                        SessionEvent::ConfigurationFailed
                    }
                    other => SessionEvent::Device(DeviceEvent::from_error(other)),
                };
                state.apply(&event);
                warn!("Failed to open camera: {}", err);
                return Err(err);
            }
        };

        info!(
            "Opened camera {} ({}, {:?}) at {} {:?}",
            descriptor.id, descriptor.name, descriptor.facing, request.geometry, format
        );
        state.apply(&SessionEvent::Device(DeviceEvent::Opened));
        sink.on_device_event(&DeviceEvent::Opened);

        let pool = BufferPool::new(
            request.buffer_count.max(1),
            format.frame_len(request.geometry.width, request.geometry.height),
        );
        let cancel = Arc::new(AtomicBool::new(false));

        let worker = CaptureWorker {
            stream,
            sink,
            pool: Arc::clone(&pool),
            cancel: Arc::clone(&cancel),
            state: state.clone(),
            stats,
            device_id: descriptor.id.clone(),
            sequence: 0,
            streaming: false,
        };
        let pin_core = request.pin_core;
        let thread = thread::Builder::new()
            .name("edgeview-capture".into())
            .spawn(move || {
                if let Some(core) = pin_core {
                    pin_to_core(core);
                }
                worker.run();
            })
            .map_err(|e| spawn_failed(&state, &descriptor.id, e))?;

        Ok(FrameSource {
            device_id: descriptor.id,
            geometry: request.geometry,
            cancel,
            thread: Some(thread),
            state,
            pool,
        })
    }

    fn open_stream(
        provider: &dyn CameraProvider,
        request: &OpenRequest,
    ) -> Result<(CameraDescriptor, PixelFormat, Box<dyn CameraStream>), CameraError> {
        let devices = provider.devices()?;
        let descriptor = match &request.device {
            Some(id) => devices.iter().find(|d| &d.id == id),
            None => select_device(&devices),
        }
        .ok_or(CameraError::NoDeviceAvailable)?
        .clone();

        let format = descriptor
            .format_for(request.geometry)
            .ok_or_else(|| CameraError::ConfigurationFailed {
                reason: format!(
                    "camera {} offers no planar format at {}",
                    descriptor.id, request.geometry
                ),
            })?;

        let stream = provider.open(&descriptor, request.geometry, format)?;
        Ok((descriptor, format, stream))
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn geometry(&self) -> SessionGeometry {
        self.geometry
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Buffer slots not currently held by a frame.
    pub fn free_slots(&self) -> usize {
        self.pool.available()
    }

    /// Stop the capture thread and wait for it. When this returns no frame
    /// callback is running and none will run again. Idempotent.
    pub fn close(&mut self) {
        self.cancel.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            self.state.apply(&SessionEvent::StopRequested);
            if thread.thread().id() == thread::current().id() {
                // Closing from inside the sink; the loop exits on its own.
                warn!("FrameSource closed from its own capture thread");
                return;
            }
            if thread.join().is_err() {
                error!("Capture thread panicked");
            }
            self.state.apply(&SessionEvent::Released);
            info!("Camera {} closed", self.device_id);
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Mark the session failed when the capture thread could not be started.
fn spawn_failed(state: &StateCell, device: &str, err: io::Error) -> CameraError {
    let err = CameraError::Fatal {
        device: device.to_owned(),
        reason: format!("failed to spawn capture thread: {err}"),
    };
    state.apply(&SessionEvent::Device(DeviceEvent::from_error(&err)));
    error!("Camera {} not started: {}", device, err);
    err
}

fn pin_to_core(core: usize) {
    let Some(ids) = core_affinity::get_core_ids() else {
        warn!("Unable to query CPU cores, capture thread not pinned");
        return;
    };
    match ids.into_iter().find(|id| id.id == core) {
        Some(id) if core_affinity::set_for_current(id) => {
            debug!("Capture thread pinned to core {}", core)
        }
        _ => warn!("Failed to pin capture thread to core {}", core),
    }
}

struct CaptureWorker<S> {
    stream: Box<dyn CameraStream>,
    sink: S,
    pool: Arc<BufferPool>,
    cancel: Arc<AtomicBool>,
    state: StateCell,
    stats: Arc<PipelineStats>,
    device_id: String,
    sequence: u64,
    streaming: bool,
}

impl<S: FrameSink> CaptureWorker<S> {
    fn run(mut self) {
        debug!("Capture thread started for {}", self.device_id);

        while !self.cancel.load(Ordering::Acquire) {
            let mut slot = self.pool.try_acquire();
            let read = self.stream.read_frame(slot.as_deref_mut());

            let captured = match read {
                Ok(captured) => captured,
                Err(err) if !err.is_fatal() => {
                    warn!("Skipping frame: {}", err);
                    continue;
                }
                Err(err) => {
                    if !self.cancel.load(Ordering::Acquire) {
                        error!("Camera {} failed: {}", self.device_id, err);
                        let event = DeviceEvent::from_error(&err);
                        self.state.apply(&SessionEvent::Device(event.clone()));
                        self.sink.on_device_event(&event);
                    }
                    break;
                }
            };

            self.stats.record_captured();
            self.sequence += 1;
            let sequence = self.sequence;

            let Some(buffer) = slot else {
                // Every slot is still held downstream: skip this frame.
                trace!(sequence, "No free buffer slot, frame dropped");
                self.stats.record_dropped();
                continue;
            };

            if self.cancel.load(Ordering::Acquire) {
                break;
            }

            let frame = Frame::new(
                buffer,
                FrameMetadata {
                    sequence,
                    width: captured.width,
                    height: captured.height,
                    format: captured.format,
                    device_timestamp: captured.device_timestamp,
                },
            );

            if self.sink.on_frame(frame) == Delivery::Accepted && !self.streaming {
                self.streaming = true;
                self.state.apply(&SessionEvent::FirstFrame);
                info!("First frame delivered, streaming from {}", self.device_id);
            }
        }

        self.stream.stop();
        debug!("Capture thread for {} exiting", self.device_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn spawn_failure_leaves_session_failed() {
        let state = StateCell::new();
        state.apply(&SessionEvent::StartRequested);
        state.apply(&SessionEvent::Device(DeviceEvent::Opened));
        assert!(state.get().is_active());

        let err = spawn_failed(&state, "cam0", io::Error::other("no threads left"));
        assert_eq!(err.kind(), ErrorKind::FatalDevice);
        assert_eq!(state.get(), SessionState::Failed);
        assert!(!state.get().is_active());
    }
}
