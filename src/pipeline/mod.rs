pub mod controller;
pub mod handoff;
pub mod pool;
pub mod state;
pub mod stats;

pub use controller::{ControllerOptions, PipelineController, ProcessingSettings};
pub use handoff::{FrameHandoff, HandoffReader};
pub use pool::{BufferPool, PooledBuffer};
pub use state::{SessionEvent, SessionState, StateCell};
pub use stats::{FrameTimings, PipelineStats, StatsSnapshot, TimingSummary};
