//! Session orchestration: lifecycle, live settings, error notifications

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use arc_swap::ArcSwap;
use tracing::{debug, error, info, instrument, warn};

use crate::capture::device::{CameraProvider, DeviceEvent};
use crate::capture::frame::Frame;
use crate::capture::source::{Delivery, FrameSink, FrameSource, OpenRequest, DEFAULT_BUFFER_COUNT};
use crate::error::{CameraError, ErrorKind, ErrorNotice};
use crate::pipeline::handoff::{FrameHandoff, HandoffReader};
use crate::pipeline::state::{SessionEvent, SessionState, StateCell};
use crate::pipeline::stats::{FrameTimings, PipelineStats, StatsSnapshot};
use crate::transform::{EdgeParameters, ProcessingMode, TransformEngine, DEFAULT_OUTPUT_IMAGES};
use crate::{Config, SessionGeometry};

const ERROR_CHANNEL_CAPACITY: usize = 32;
const TIMING_WINDOW: usize = 256;

/// Mode and thresholds read by the capture thread once per frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProcessingSettings {
    pub mode: ProcessingMode,
    pub edge: EdgeParameters,
}

/// Session parameters that do not change while the controller lives.
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub buffer_count: usize,
    pub output_images: usize,
    pub device: Option<String>,
    pub pin_core: Option<usize>,
    /// Frames between timing summaries in the log. Zero disables them.
    pub stats_interval: u64,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            buffer_count: DEFAULT_BUFFER_COUNT,
            output_images: DEFAULT_OUTPUT_IMAGES,
            device: None,
            pin_core: None,
            stats_interval: 300,
        }
    }
}

struct ActiveSession {
    source: FrameSource,
    geometry: SessionGeometry,
    active: Arc<AtomicBool>,
}

/// Owns one capture/transform session at a time.
///
/// Lifecycle calls (`start`, `stop`) are serialized by an internal lock.
/// Mode and threshold updates never take that lock; the capture thread reads
/// them through an atomic snapshot at the start of each frame.
pub struct PipelineController {
    provider: Arc<dyn CameraProvider>,
    options: ControllerOptions,
    settings: Arc<ArcSwap<ProcessingSettings>>,
    handoff: Arc<FrameHandoff>,
    stats: Arc<PipelineStats>,
    state: StateCell,
    session: Mutex<Option<ActiveSession>>,
    errors_tx: flume::Sender<ErrorNotice>,
    errors_rx: flume::Receiver<ErrorNotice>,
}

impl PipelineController {
    pub fn new(provider: Arc<dyn CameraProvider>, options: ControllerOptions) -> Self {
        let (errors_tx, errors_rx) = flume::bounded(ERROR_CHANNEL_CAPACITY);
        Self {
            provider,
            options,
            settings: Arc::new(ArcSwap::from_pointee(ProcessingSettings::default())),
            handoff: Arc::new(FrameHandoff::new()),
            stats: Arc::new(PipelineStats::default()),
            state: StateCell::new(),
            session: Mutex::new(None),
            errors_tx,
            errors_rx,
        }
    }

    /// Controller with session options and initial settings taken from `config`.
    pub fn from_config(provider: Arc<dyn CameraProvider>, config: &Config) -> Self {
        let controller = Self::new(
            provider,
            ControllerOptions {
                buffer_count: config.capture.buffer_count,
                output_images: config.processing.output_images,
                device: config.capture.device.clone(),
                pin_core: config.capture.pin_core,
                stats_interval: config.processing.stats_interval,
            },
        );
        controller.settings.store(Arc::new(ProcessingSettings {
            mode: config.processing.mode,
            edge: config.edge_parameters(),
        }));
        controller
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a camera at `geometry` and start streaming into the handoff.
    ///
    /// Calling `start` again with the same geometry while a session is live
    /// is a no-op. A different geometry tears the running session down and
    /// opens a new one.
    #[instrument(skip(self), fields(geometry = %geometry))]
    pub fn start(&self, geometry: SessionGeometry) -> Result<(), CameraError> {
        let mut session = self.lock_session();

        if let Some(current) = session.as_ref() {
            if self.state.get().is_active() && current.geometry == geometry {
                debug!("Session already running at {}", geometry);
                return Ok(());
            }
            if self.state.apply(&SessionEvent::ReconfigureRequested).is_some() {
                info!("Reconfiguring session {} -> {}", current.geometry, geometry);
            }
            self.teardown(&mut session);
        }

        let mut engine = TransformEngine::with_output_images(self.options.output_images);
        if let Err(err) = engine.init(geometry.width, geometry.height) {
            self.state.apply(&SessionEvent::StartRequested);
            self.state.apply(&SessionEvent::ConfigurationFailed);
            let err = CameraError::from(err);
            self.notify(ErrorNotice::with_detail(err.kind(), &err));
            return Err(err);
        }

        let active = Arc::new(AtomicBool::new(true));
        let sink = SessionSink {
            engine,
            settings: Arc::clone(&self.settings),
            handoff: Arc::clone(&self.handoff),
            stats: Arc::clone(&self.stats),
            active: Arc::clone(&active),
            timings: FrameTimings::new(TIMING_WINDOW),
            stats_interval: self.options.stats_interval,
            since_summary: 0,
            errors: self.errors_tx.clone(),
        };

        let request = OpenRequest {
            geometry,
            buffer_count: self.options.buffer_count,
            device: self.options.device.clone(),
            pin_core: self.options.pin_core,
        };

        match FrameSource::open(
            &*self.provider,
            request,
            self.state.clone(),
            Arc::clone(&self.stats),
            sink,
        ) {
            Ok(source) => {
                info!("Session started on {} at {}", source.device_id(), geometry);
                *session = Some(ActiveSession {
                    source,
                    geometry,
                    active,
                });
                Ok(())
            }
            Err(err) => {
                self.notify(ErrorNotice::with_detail(err.kind(), &err));
                Err(err)
            }
        }
    }

    /// End the current session and release its resources. When this returns
    /// no frame callback is running, nothing further reaches the handoff, and
    /// the state is `Idle`. Safe to call any number of times.
    #[instrument(skip(self))]
    pub fn stop(&self) {
        let mut session = self.lock_session();
        self.teardown(&mut session);
    }

    fn teardown(&self, session: &mut Option<ActiveSession>) {
        match session.take() {
            Some(mut current) => {
                current.active.store(false, Ordering::Release);
                current.source.close();
                // A source closed from its own thread leaves the state in Closing.
                self.state.apply(&SessionEvent::Released);
                self.handoff.reset();
                info!("Session at {} stopped", current.geometry);
            }
            None => {
                self.state.apply(&SessionEvent::StopRequested);
                self.state.apply(&SessionEvent::Released);
            }
        }
    }

    pub fn set_mode(&self, mode: ProcessingMode) {
        self.settings.rcu(|current| ProcessingSettings {
            mode,
            ..**current
        });
        info!("Processing mode set to {}", mode);
    }

    /// Update both thresholds in one exchange. Out-of-range values are
    /// clamped so the stored pair always has `low < high`.
    pub fn set_edge_thresholds(&self, low: f64, high: f64) {
        let edge = EdgeParameters::new(low, high);
        self.settings.rcu(|current| ProcessingSettings {
            edge,
            ..**current
        });
        info!("Edge thresholds set to {}/{}", edge.low(), edge.high());
    }

    pub fn mode(&self) -> ProcessingMode {
        self.settings.load().mode
    }

    pub fn edge_parameters(&self) -> EdgeParameters {
        self.settings.load().edge
    }

    pub fn settings(&self) -> ProcessingSettings {
        **self.settings.load()
    }

    /// Forward an error from outside the capture path (the presenter, for
    /// one) to subscribers. Fatal kinds fail the running session.
    pub fn report_error(&self, kind: ErrorKind) {
        if kind.is_fatal() && self.state.get().is_active() {
            self.state
                .apply(&SessionEvent::Device(DeviceEvent::Error(kind)));
        }
        self.notify(ErrorNotice::new(kind));
    }

    fn notify(&self, notice: ErrorNotice) {
        send_notice(&self.errors_tx, notice);
    }

    /// Receiver for error notices. Receivers share one queue, so each notice
    /// reaches exactly one of them.
    pub fn subscribe_errors(&self) -> flume::Receiver<ErrorNotice> {
        self.errors_rx.clone()
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    pub fn geometry(&self) -> Option<SessionGeometry> {
        self.lock_session().as_ref().map(|s| s.geometry)
    }

    pub fn handoff(&self) -> Arc<FrameHandoff> {
        Arc::clone(&self.handoff)
    }

    /// New reader on the handoff, for a presenter.
    pub fn reader(&self) -> HandoffReader {
        self.handoff.reader()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        self.stop();
    }
}

fn send_notice(tx: &flume::Sender<ErrorNotice>, notice: ErrorNotice) {
    error!("{}", notice);
    if let Err(flume::TrySendError::Full(notice)) = tx.try_send(notice) {
        warn!("Error channel full, dropping notice: {}", notice);
    }
}

/// Per-session frame consumer living on the capture thread.
struct SessionSink {
    engine: TransformEngine,
    settings: Arc<ArcSwap<ProcessingSettings>>,
    handoff: Arc<FrameHandoff>,
    stats: Arc<PipelineStats>,
    active: Arc<AtomicBool>,
    timings: FrameTimings,
    stats_interval: u64,
    since_summary: u64,
    errors: flume::Sender<ErrorNotice>,
}

impl SessionSink {
    fn log_summary(&mut self) {
        if self.stats_interval == 0 {
            return;
        }
        self.since_summary += 1;
        if self.since_summary < self.stats_interval {
            return;
        }
        self.since_summary = 0;
        if let Some(summary) = self.timings.summary() {
            let counts = self.stats.snapshot();
            info!(
                mean_us = summary.mean_us,
                p99_us = summary.p99_us,
                max_us = summary.max_us,
                captured = counts.frames_captured,
                dropped = counts.frames_dropped,
                overwritten = self.handoff.overwritten(),
                "transform timings over {} frames",
                summary.samples
            );
        }
    }
}

impl FrameSink for SessionSink {
    fn on_frame(&mut self, frame: Frame) -> Delivery {
        if !self.active.load(Ordering::Acquire) {
            return Delivery::Dropped;
        }

        let settings = **self.settings.load();
        let started = Instant::now();
        let result = self.engine.transform(&frame, settings.mode, settings.edge);
        let sequence = frame.meta.sequence;
        frame.release();

        match result {
            Ok(image) => {
                let elapsed = started.elapsed();
                self.stats.record_transformed(elapsed);
                self.timings.record(elapsed);
                if !self.active.load(Ordering::Acquire) {
                    return Delivery::Dropped;
                }
                self.handoff.publish(image);
                self.stats.record_published();
                self.log_summary();
                Delivery::Accepted
            }
            Err(err) => {
                warn!(sequence, "Dropping frame: {}", err);
                self.stats.record_failed();
                Delivery::Dropped
            }
        }
    }

    fn on_device_event(&mut self, event: &DeviceEvent) {
        let kind = match event {
            DeviceEvent::Opened => return,
            DeviceEvent::Disconnected => ErrorKind::FatalDevice,
            DeviceEvent::Error(kind) => *kind,
        };
        send_notice(&self.errors, ErrorNotice::new(kind));
    }
}

impl Drop for SessionSink {
    fn drop(&mut self) {
        self.engine.release();
    }
}
