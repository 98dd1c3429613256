//! Typed error hierarchy for the pipeline.
//!
//! Library code returns these `thiserror` enums; the binary wraps them in
//! `color_eyre` reports. Every error maps onto an [`ErrorKind`] so the
//! controller's notification channel can carry a stable, human-readable
//! message without string parsing.

use std::fmt;

/// Session geometry rejected by [`crate::SessionGeometry::new`] or
/// [`crate::transform::TransformEngine::init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid geometry {width}x{height}: dimensions must be positive and even")]
pub struct InvalidGeometry {
    pub width: u32,
    pub height: u32,
}

/// Per-frame failures. The offending frame is dropped and the pipeline
/// continues with the next one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessingError {
    #[error("input buffer size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("frame is {actual_width}x{actual_height}, engine is initialized for {width}x{height}")]
    GeometryMismatch {
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("transform engine not initialized, call init() first")]
    NotInitialized,
}

/// Errors raised by the camera boundary and the lifecycle operations that
/// drive it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CameraError {
    #[error("no camera device available")]
    NoDeviceAvailable,

    #[error("permission denied for camera {device}")]
    PermissionDenied { device: String },

    #[error("camera {device} is in use by another client")]
    DeviceBusy { device: String },

    #[error("camera {device} is disabled")]
    DeviceDisabled { device: String },

    #[error("camera configuration failed: {reason}")]
    ConfigurationFailed { reason: String },

    #[error(transparent)]
    InvalidGeometry(#[from] InvalidGeometry),

    #[error("camera {device} disconnected")]
    Disconnected { device: String },

    #[error("fatal error on camera {device}: {reason}")]
    Fatal { device: String, reason: String },

    /// A single frame could not be read; the stream itself is still usable.
    #[error("frame unavailable: {reason}")]
    FrameUnavailable { reason: String },
}

impl CameraError {
    /// Whether the error ends the capture session.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CameraError::FrameUnavailable { .. })
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CameraError::NoDeviceAvailable => ErrorKind::NoCamera,
            CameraError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            CameraError::DeviceBusy { .. } => ErrorKind::DeviceBusy,
            CameraError::DeviceDisabled { .. } => ErrorKind::DeviceDisabled,
            CameraError::ConfigurationFailed { .. } | CameraError::InvalidGeometry(_) => {
                ErrorKind::ConfigurationFailed
            }
            CameraError::Disconnected { .. } | CameraError::Fatal { .. } => ErrorKind::FatalDevice,
            CameraError::FrameUnavailable { .. } => ErrorKind::Processing,
        }
    }
}

/// GPU texture, surface, or context failures. Fatal to the presenter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    #[error("no suitable GPU adapter found")]
    NoAdapter,

    #[error("GPU device request failed: {0}")]
    Device(String),

    #[error("surface error: {0}")]
    Surface(String),

    #[error("GPU out of memory")]
    OutOfMemory,

    #[error("presenter has no surface, call on_surface_ready() first")]
    NoSurface,
}

/// Configuration loading and validation failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Coarse classification delivered on the controller's error channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NoCamera,
    PermissionDenied,
    DeviceBusy,
    DeviceDisabled,
    ConfigurationFailed,
    FatalDevice,
    Processing,
    Resource,
}

impl ErrorKind {
    /// Human-readable message for the UI layer.
    pub fn message(self) -> &'static str {
        match self {
            ErrorKind::NoCamera => "No camera found on this device",
            ErrorKind::PermissionDenied => "Camera permission denied",
            ErrorKind::DeviceBusy => "Camera is in use by another application",
            ErrorKind::DeviceDisabled => "Camera is disabled",
            ErrorKind::ConfigurationFailed => "Camera configuration failed",
            ErrorKind::FatalDevice => "Camera encountered a fatal error",
            ErrorKind::Processing => "Frame processing failed",
            ErrorKind::Resource => "Display resources failed",
        }
    }

    /// Whether the error ends the current session.
    pub fn is_fatal(self) -> bool {
        !matches!(self, ErrorKind::Processing)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Notification sent to subscribers of the controller's error channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorNotice {
    pub kind: ErrorKind,
    pub message: String,
    pub detail: Option<String>,
}

impl ErrorNotice {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: kind.message().to_string(),
            detail: None,
        }
    }

    pub fn with_detail(kind: ErrorKind, detail: impl fmt::Display) -> Self {
        Self {
            detail: Some(detail.to_string()),
            ..Self::new(kind)
        }
    }
}

impl fmt::Display for ErrorNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{} ({})", self.message, detail),
            None => f.write_str(&self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_errors_map_to_channel_kinds() {
        assert_eq!(CameraError::NoDeviceAvailable.kind(), ErrorKind::NoCamera);
        let busy = CameraError::DeviceBusy {
            device: "cam0".into(),
        };
        assert_eq!(busy.kind(), ErrorKind::DeviceBusy);
        assert!(busy.is_fatal());

        let transient = CameraError::FrameUnavailable {
            reason: "short read".into(),
        };
        assert!(!transient.is_fatal());
        assert!(!transient.kind().is_fatal());
    }

    #[test]
    fn notice_includes_detail() {
        let notice = ErrorNotice::with_detail(ErrorKind::DeviceBusy, "cam0");
        assert_eq!(
            notice.to_string(),
            "Camera is in use by another application (cam0)"
        );
    }
}
