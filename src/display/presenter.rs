//! Render-thread side of the pipeline: pulls the newest image and draws it

use std::thread::{self, ThreadId};
use std::time::Instant;

use tracing::{debug, info, instrument, trace};

use crate::error::ResourceError;
use crate::pipeline::handoff::HandoffReader;
use crate::transform::TransformedImage;

/// GPU operations the presenter needs. Every method is called on the thread
/// that owns the rendering context.
pub trait RenderBackend {
    /// (Re)configure the output surface.
    fn configure(&mut self, width: u32, height: u32) -> Result<(), ResourceError>;

    /// Copy `image` into the frame texture, creating or resizing it as needed.
    fn upload(&mut self, image: &TransformedImage) -> Result<(), ResourceError>;

    /// Draw the frame texture as a full-screen quad, or clear the surface if
    /// there is no texture.
    fn draw(&mut self) -> Result<(), ResourceError>;

    /// Free the frame texture. The surface stays configured.
    fn release(&mut self);
}

/// Result of one [`Presenter::on_frame_tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A new image was uploaded and drawn.
    Fresh(u64),
    /// Nothing new; the previous texture was drawn again.
    Repeat,
    /// Nothing has been uploaded yet; the surface was cleared.
    Blank,
    /// No surface to draw on.
    NoSurface,
}

/// Draws the most recent image from a [`HandoffReader`] once per display
/// refresh.
///
/// The presenter binds to the thread that calls [`on_surface_ready`] and
/// panics if any later GPU-touching call comes from another thread.
///
/// [`on_surface_ready`]: Presenter::on_surface_ready
pub struct Presenter<R: RenderBackend> {
    reader: HandoffReader,
    backend: R,
    render_thread: Option<ThreadId>,
    surface: Option<(u32, u32)>,
    has_texture: bool,
    presented: u64,
    repeated: u64,
}

impl<R: RenderBackend> Presenter<R> {
    pub fn new(reader: HandoffReader, backend: R) -> Self {
        Self {
            reader,
            backend,
            render_thread: None,
            surface: None,
            has_texture: false,
            presented: 0,
            repeated: 0,
        }
    }

    #[track_caller]
    fn assert_render_thread(&self) {
        if let Some(owner) = self.render_thread {
            assert_eq!(
                owner,
                thread::current().id(),
                "presenter used off its render thread"
            );
        }
    }

    /// Bind to the calling thread and configure the surface. Called again on
    /// every resize.
    #[instrument(skip(self))]
    pub fn on_surface_ready(&mut self, width: u32, height: u32) -> Result<(), ResourceError> {
        self.assert_render_thread();
        self.render_thread = Some(thread::current().id());
        self.backend.configure(width, height)?;
        if self.surface.is_none() {
            info!("Surface ready at {}x{}", width, height);
        }
        self.surface = Some((width, height));
        Ok(())
    }

    /// The host surface is gone. The texture is released and ticks become
    /// no-ops until the next `on_surface_ready`.
    pub fn on_surface_destroyed(&mut self) {
        self.assert_render_thread();
        self.release_texture();
        self.surface = None;
        self.render_thread = None;
        debug!("Surface destroyed");
    }

    /// Draw once. Uploads the pending image if the handoff has a newer one,
    /// otherwise redraws the texture already on the GPU.
    pub fn on_frame_tick(&mut self) -> Result<TickOutcome, ResourceError> {
        self.assert_render_thread();

        if self.reader.poll_reset() {
            debug!("Session ended, releasing frame texture");
            self.release_texture();
        }
        if self.surface.is_none() {
            return Ok(TickOutcome::NoSurface);
        }

        let started = Instant::now();
        let outcome = match self.reader.try_consume() {
            Some(image) => self.upload(&image)?,
            None if self.has_texture => {
                self.repeated += 1;
                TickOutcome::Repeat
            }
            None => TickOutcome::Blank,
        };
        self.backend.draw()?;
        metrics::histogram!("edgeview_render_us").record(started.elapsed().as_micros() as f64);
        trace!(?outcome, "frame tick");
        Ok(outcome)
    }

    /// Upload and draw `image` directly, for hosts that drive timing
    /// themselves instead of ticking.
    pub fn submit(&mut self, image: TransformedImage) -> Result<TickOutcome, ResourceError> {
        self.assert_render_thread();
        if self.surface.is_none() {
            return Err(ResourceError::NoSurface);
        }
        let outcome = self.upload(&image)?;
        self.backend.draw()?;
        Ok(outcome)
    }

    fn upload(&mut self, image: &TransformedImage) -> Result<TickOutcome, ResourceError> {
        self.backend.upload(image)?;
        self.has_texture = true;
        self.presented += 1;
        metrics::histogram!("edgeview_frame_latency_ms")
            .record(image.captured_at().elapsed().as_secs_f64() * 1000.0);
        Ok(TickOutcome::Fresh(image.frame_sequence()))
    }

    fn release_texture(&mut self) {
        if self.has_texture {
            self.backend.release();
            self.has_texture = false;
        }
    }

    /// Release every GPU resource the presenter holds. Idempotent.
    pub fn teardown(&mut self) {
        self.assert_render_thread();
        if self.surface.is_some() || self.has_texture {
            info!(
                presented = self.presented,
                repeated = self.repeated,
                "Presenter torn down"
            );
        }
        self.release_texture();
        self.surface = None;
    }

    pub fn has_texture(&self) -> bool {
        self.has_texture
    }

    /// Images uploaded so far.
    pub fn presented(&self) -> u64 {
        self.presented
    }

    /// Ticks that redrew an already uploaded image.
    pub fn repeated(&self) -> u64 {
        self.repeated
    }

    pub fn backend(&self) -> &R {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut R {
        &mut self.backend
    }
}
