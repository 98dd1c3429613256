//! winit host: window lifecycle, redraw loop and keyboard controls

use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use tracing::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowId};

use crate::display::gpu::GpuRenderer;
use crate::display::presenter::Presenter;
use crate::error::{ErrorKind, ErrorNotice, ResourceError};
use crate::pipeline::PipelineController;
use crate::transform::ProcessingMode;
use crate::DisplayConfig;

const THRESHOLD_STEP: f64 = 10.0;

/// Application handler for the winit event loop.
///
/// Keys: `1`/`2`/`3` select raw, grayscale and edge mode; `[` and `]` lower
/// and raise both edge thresholds; `Escape` quits.
pub struct ViewerApp {
    config: DisplayConfig,
    controller: Arc<PipelineController>,
    errors: flume::Receiver<ErrorNotice>,
    presenter: Option<Presenter<GpuRenderer>>,
    window: Option<Arc<Window>>,
    failure: Option<ResourceError>,
}

impl ViewerApp {
    pub fn new(config: DisplayConfig, controller: Arc<PipelineController>) -> Self {
        let errors = controller.subscribe_errors();
        Self {
            config,
            controller,
            errors,
            presenter: None,
            window: None,
            failure: None,
        }
    }

    fn create_presenter(&mut self, event_loop: &ActiveEventLoop) -> Result<(), ResourceError> {
        let attrs = Window::default_attributes()
            .with_title(self.config.title.clone())
            .with_inner_size(LogicalSize::new(self.config.width, self.config.height));
        let window = Arc::new(
            event_loop
                .create_window(attrs)
                .map_err(|e| ResourceError::Surface(e.to_string()))?,
        );

        let renderer = pollster::block_on(GpuRenderer::new(Arc::clone(&window), self.config.vsync))?;
        let mut presenter = Presenter::new(self.controller.reader(), renderer);
        let size = window.inner_size();
        presenter.on_surface_ready(size.width.max(1), size.height.max(1))?;

        self.window = Some(window);
        self.presenter = Some(presenter);
        Ok(())
    }

    /// Presenter resources are gone: report, tear the session down, quit.
    fn fail(&mut self, event_loop: &ActiveEventLoop, err: ResourceError) {
        error!("Display error: {}", err);
        self.controller.report_error(ErrorKind::Resource);
        self.controller.stop();
        if let Some(presenter) = self.presenter.as_mut() {
            presenter.teardown();
        }
        self.failure = Some(err);
        event_loop.exit();
    }

    fn on_key(&mut self, event_loop: &ActiveEventLoop, event: &KeyEvent) {
        if event.state != ElementState::Pressed || event.repeat {
            return;
        }
        match &event.logical_key {
            Key::Named(NamedKey::Escape) => {
                self.shutdown();
                event_loop.exit();
            }
            Key::Character(c) => match c.as_str() {
                "1" => self.controller.set_mode(ProcessingMode::Raw),
                "2" => self.controller.set_mode(ProcessingMode::Grayscale),
                "3" => self.controller.set_mode(ProcessingMode::Edge),
                "[" => self.shift_thresholds(-THRESHOLD_STEP),
                "]" => self.shift_thresholds(THRESHOLD_STEP),
                _ => {}
            },
            _ => {}
        }
    }

    fn shift_thresholds(&self, delta: f64) {
        let edge = self.controller.edge_parameters();
        self.controller
            .set_edge_thresholds(edge.low() + delta, edge.high() + delta);
    }

    fn shutdown(&mut self) {
        if let Some(presenter) = self.presenter.as_mut() {
            presenter.teardown();
        }
    }
}

impl ApplicationHandler for ViewerApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.presenter.is_none() {
            if let Err(e) = self.create_presenter(event_loop) {
                self.fail(event_loop, e);
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Window close requested");
                self.shutdown();
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                let Some(presenter) = self.presenter.as_mut() else {
                    return;
                };
                if let Err(e) = presenter.on_frame_tick() {
                    self.fail(event_loop, e);
                }
            }
            WindowEvent::Resized(size) => {
                // Minimized windows report zero; keep the old surface.
                if size.width == 0 || size.height == 0 {
                    return;
                }
                let Some(presenter) = self.presenter.as_mut() else {
                    return;
                };
                if let Err(e) = presenter.on_surface_ready(size.width, size.height) {
                    self.fail(event_loop, e);
                }
            }
            WindowEvent::KeyboardInput { event, .. } => self.on_key(event_loop, &event),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        let Some(window) = self.window.as_ref() else {
            return;
        };
        if let Some(notice) = self.errors.try_iter().last() {
            warn!("Showing error: {}", notice);
            window.set_title(&format!("{} - {}", self.config.title, notice));
        }
        window.request_redraw();
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.shutdown();
    }
}

/// Open the viewer window and present frames from `controller` until the
/// window closes.
pub fn run_viewer(config: DisplayConfig, controller: Arc<PipelineController>) -> Result<()> {
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = ViewerApp::new(config, controller);
    event_loop.run_app(&mut app)?;

    match app.failure {
        Some(err) => Err(eyre!(err)),
        None => Ok(()),
    }
}
