//! Live camera viewer pipeline: capture → transform → handoff → present.
//!
//! The [`pipeline::PipelineController`] owns the session lifecycle. Frames are
//! captured and transformed on the capture thread, published into a
//! most-recent-wins [`pipeline::FrameHandoff`], and drawn by a
//! [`display::Presenter`] on the render thread.

pub mod capture;
pub mod display;
pub mod error;
pub mod pipeline;
pub mod transform;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use capture::{Frame, PixelFormat};
pub use error::{
    CameraError, ConfigError, ErrorKind, ErrorNotice, InvalidGeometry, ProcessingError,
    ResourceError,
};
pub use pipeline::{FrameHandoff, PipelineController, SessionState};
pub use transform::{EdgeParameters, ProcessingMode, TransformEngine, TransformedImage};

/// Resolution of one session. Fixed until the session is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionGeometry {
    pub width: u32,
    pub height: u32,
}

impl SessionGeometry {
    /// Validated constructor: both dimensions positive and even (4:2:0
    /// chroma subsampling).
    pub fn new(width: u32, height: u32) -> Result<Self, InvalidGeometry> {
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(InvalidGeometry { width, height });
        }
        Ok(Self { width, height })
    }

    pub const fn pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Bytes in one planar input frame.
    pub const fn planar_len(&self) -> usize {
        self.pixels() * 3 / 2
    }

    /// Bytes in one RGBA output image.
    pub const fn rgba_len(&self) -> usize {
        self.pixels() * 4
    }
}

impl std::fmt::Display for SessionGeometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub processing: ProcessingConfig,
    pub display: DisplayConfig,
    pub log: LogConfig,
}

/// Camera backends the binary can build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Synthetic,
    V4l2,
    Gstreamer,
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "synthetic" | "test" => Ok(SourceKind::Synthetic),
            "v4l2" => Ok(SourceKind::V4l2),
            "gstreamer" | "gst" => Ok(SourceKind::Gstreamer),
            other => Err(format!("unknown source {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub source: SourceKind,
    pub device: Option<String>, // Device path or id, auto-selected when unset
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub buffer_count: usize,      // Frame slots owned by the source
    pub pin_core: Option<usize>, // Pin the capture thread to this core
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::Synthetic,
            device: None,
            width: 1280,
            height: 720,
            fps: 30,
            buffer_count: 2,
            pin_core: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub mode: ProcessingMode,
    pub low_threshold: f64,
    pub high_threshold: f64,
    pub output_images: usize,
    pub stats_interval: u64, // Frames between timing summaries
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            mode: ProcessingMode::Raw,
            low_threshold: EdgeParameters::DEFAULT_LOW,
            high_threshold: EdgeParameters::DEFAULT_HIGH,
            output_images: transform::DEFAULT_OUTPUT_IMAGES,
            stats_interval: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
    pub title: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            vsync: true,
            title: "edgeview".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "edgeview=info".to_string(),
        }
    }
}

impl Config {
    /// Layer built-in defaults, an optional TOML file, and `EDGEVIEW__*`
    /// environment variables (`EDGEVIEW__CAPTURE__WIDTH=640`).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: Config = builder
            .add_source(
                config::Environment::with_prefix("EDGEVIEW")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.geometry()
            .map_err(|e| ConfigError::Invalid(format!("capture: {e}")))?;
        if self.capture.buffer_count == 0 {
            return Err(ConfigError::Invalid("capture.buffer_count must be at least 1".into()));
        }
        if self.capture.fps == 0 {
            return Err(ConfigError::Invalid("capture.fps must be positive".into()));
        }
        if self.processing.output_images == 0 {
            return Err(ConfigError::Invalid(
                "processing.output_images must be at least 1".into(),
            ));
        }
        if self.display.width == 0 || self.display.height == 0 {
            return Err(ConfigError::Invalid("display size must be positive".into()));
        }
        Ok(())
    }

    pub fn geometry(&self) -> Result<SessionGeometry, InvalidGeometry> {
        SessionGeometry::new(self.capture.width, self.capture.height)
    }

    pub fn edge_parameters(&self) -> EdgeParameters {
        EdgeParameters::new(self.processing.low_threshold, self.processing.high_threshold)
    }
}
