pub mod presenter;

#[cfg(feature = "gpu-display")]
pub mod gpu;
#[cfg(feature = "gpu-display")]
pub mod window;

pub use presenter::{Presenter, RenderBackend, TickOutcome};

#[cfg(feature = "gpu-display")]
pub use gpu::GpuRenderer;
#[cfg(feature = "gpu-display")]
pub use window::{run_viewer, ViewerApp};
