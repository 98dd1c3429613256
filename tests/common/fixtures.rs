use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use edgeview::capture::device::{
    CameraDescriptor, CameraProvider, CameraStream, CapturedFrame, Facing,
};
use edgeview::capture::{Pattern, PixelFormat, SyntheticCamera};
use edgeview::display::RenderBackend;
use edgeview::{CameraError, ResourceError, SessionGeometry, TransformedImage};

/// Camera provider whose failures are scripted by the test.
///
/// Open errors are consumed one per `open` call; once the queue is empty
/// opens succeed. A stream fails with `stream_error` after `fail_after`
/// frames when both are set. The first `misreported` frames of a stream
/// claim a width that does not match the session.
#[derive(Clone)]
pub struct ScriptedCamera {
    pub devices: Vec<CameraDescriptor>,
    pub pattern: Pattern,
    pub frame_interval: Duration,
    open_errors: Arc<Mutex<VecDeque<CameraError>>>,
    stream_failure: Arc<Mutex<Option<(u64, CameraError)>>>,
    misreported: Arc<Mutex<u64>>,
    pub opened: Arc<Mutex<Vec<(String, SessionGeometry)>>>,
}

impl ScriptedCamera {
    pub fn new(pattern: Pattern) -> Self {
        Self {
            devices: vec![SyntheticCamera::descriptor("scripted:back", Facing::Back)],
            pattern,
            frame_interval: Duration::from_millis(2),
            open_errors: Arc::default(),
            stream_failure: Arc::default(),
            misreported: Arc::default(),
            opened: Arc::default(),
        }
    }

    pub fn with_devices(mut self, devices: Vec<CameraDescriptor>) -> Self {
        self.devices = devices;
        self
    }

    pub fn fail_next_open(&self, err: CameraError) {
        self.open_errors.lock().unwrap().push_back(err);
    }

    /// Make the next opened stream fail after `frames` frames.
    pub fn fail_stream_after(&self, frames: u64, err: CameraError) {
        *self.stream_failure.lock().unwrap() = Some((frames, err));
    }

    /// Make the next opened stream report a wrong width for its first
    /// `frames` frames.
    pub fn misreport_first(&self, frames: u64) {
        *self.misreported.lock().unwrap() = frames;
    }
}

impl CameraProvider for ScriptedCamera {
    fn devices(&self) -> Result<Vec<CameraDescriptor>, CameraError> {
        Ok(self.devices.clone())
    }

    fn open(
        &self,
        device: &CameraDescriptor,
        geometry: SessionGeometry,
        format: PixelFormat,
    ) -> Result<Box<dyn CameraStream>, CameraError> {
        if let Some(err) = self.open_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.opened
            .lock()
            .unwrap()
            .push((device.id.clone(), geometry));
        Ok(Box::new(ScriptedStream {
            geometry,
            format,
            pattern: self.pattern,
            interval: self.frame_interval,
            failure: self.stream_failure.lock().unwrap().take(),
            misreported: std::mem::take(&mut *self.misreported.lock().unwrap()),
            delivered: 0,
        }))
    }
}

struct ScriptedStream {
    geometry: SessionGeometry,
    format: PixelFormat,
    pattern: Pattern,
    interval: Duration,
    failure: Option<(u64, CameraError)>,
    misreported: u64,
    delivered: u64,
}

impl CameraStream for ScriptedStream {
    fn read_frame(&mut self, dst: Option<&mut [u8]>) -> Result<CapturedFrame, CameraError> {
        thread::sleep(self.interval);
        if let Some((after, err)) = &self.failure {
            if self.delivered >= *after {
                return Err(err.clone());
            }
        }
        if let Some(dst) = dst {
            self.pattern
                .render(dst, self.geometry, self.format, self.delivered);
        }
        let width = if self.delivered < self.misreported {
            self.geometry.width + 2
        } else {
            self.geometry.width
        };
        self.delivered += 1;
        Ok(CapturedFrame {
            width,
            height: self.geometry.height,
            format: self.format,
            device_timestamp: None,
        })
    }
}

/// In-memory [`RenderBackend`] recording every call.
#[derive(Default)]
pub struct RecordingBackend {
    pub configured: Vec<(u32, u32)>,
    /// Frame sequence and first pixel of every upload.
    pub uploads: Vec<(u64, [u8; 4])>,
    pub draws: usize,
    pub releases: usize,
    pub texture: Option<(u32, u32)>,
    pub fail_upload: Option<ResourceError>,
}

impl RenderBackend for RecordingBackend {
    fn configure(&mut self, width: u32, height: u32) -> Result<(), ResourceError> {
        self.configured.push((width, height));
        Ok(())
    }

    fn upload(&mut self, image: &TransformedImage) -> Result<(), ResourceError> {
        if let Some(err) = self.fail_upload.clone() {
            return Err(err);
        }
        self.texture = Some((image.width(), image.height()));
        self.uploads.push((image.frame_sequence(), image.pixel(0, 0)));
        Ok(())
    }

    fn draw(&mut self) -> Result<(), ResourceError> {
        self.draws += 1;
        Ok(())
    }

    fn release(&mut self) {
        self.texture = None;
        self.releases += 1;
    }
}

/// Poll `cond` until it holds or five seconds pass.
pub fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

pub fn geometry(width: u32, height: u32) -> SessionGeometry {
    SessionGeometry::new(width, height).unwrap()
}
