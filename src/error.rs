//! Error types for the camera framework.
//!
//! `CameraError` is the single error type returned by the public API. Driver and
//! backend implementations report failures as `anyhow::Error`; the camera and
//! collection layers always wrap those into one of the variants below, adding the
//! camera name as context, so callers never see a raw device error.
//!
//! ## Error Hierarchy
//!
//! - **`Connection`**: connect or disconnect failed at the device level, or the
//!   camera was already connected.
//! - **`Capture`**: the exposure pipeline failed. This covers invalid exposure
//!   parameters, device capture failures, "no data produced" and post-process
//!   failures.
//! - **`Write`**: writing an exposure to disk failed after retries were exhausted.
//! - **`Lookup`**: a camera that does not exist was requested.
//! - **`Configuration`**: ambiguous or missing identifying information, or an
//!   invalid configuration value.
//! - **`Unsupported`**: the camera's driver does not implement a capability.
//! - **`Device`**: a capability-level device call (shutter, cooler, image area)
//!   failed.
//! - **`ListenerNotRegistered`** / **`CallbackNotRegistered`**: misuse of the
//!   notification substrate.
//! - **`ShutdownFailed`**: one or more cameras could not be removed while a
//!   collection shut down.

use thiserror::Error;

use crate::config::ConfigError;

/// Convenience alias for results using the framework error type.
pub type CameraResult<T> = std::result::Result<T, CameraError>;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Camera {camera} - connection error: {message}")]
    Connection { camera: String, message: String },

    #[error("Camera {camera} - capture error: {message}")]
    Capture { camera: String, message: String },

    #[error("Write error: {0}")]
    Write(String),

    #[error("Lookup error: {0}")]
    Lookup(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Camera {camera} does not support {capability}")]
    Unsupported { camera: String, capability: String },

    #[error("Camera {camera} - device error: {message}")]
    Device { camera: String, message: String },

    #[error("Listener is not registered with this notifier")]
    ListenerNotRegistered,

    #[error("Callback is not registered with this listener")]
    CallbackNotRegistered,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Shutdown failed with {} error(s): {:?}", .0.len(), .0)]
    ShutdownFailed(Vec<CameraError>),
}

impl CameraError {
    pub(crate) fn connection(camera: &str, message: impl ToString) -> Self {
        Self::Connection {
            camera: camera.to_string(),
            message: message.to_string(),
        }
    }

    pub(crate) fn capture(camera: &str, message: impl ToString) -> Self {
        Self::Capture {
            camera: camera.to_string(),
            message: message.to_string(),
        }
    }

    pub(crate) fn device(camera: &str, err: anyhow::Error) -> Self {
        Self::Device {
            camera: camera.to_string(),
            message: format!("{err:#}"),
        }
    }
}

impl From<ConfigError> for CameraError {
    fn from(err: ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CameraError::connection("cam1", "cable unplugged");
        assert_eq!(
            err.to_string(),
            "Camera cam1 - connection error: cable unplugged"
        );
    }

    #[test]
    fn test_device_error_keeps_context_chain() {
        let source = anyhow::anyhow!("timeout").context("reading temperature");
        let err = CameraError::device("cam1", source);
        assert!(err.to_string().contains("reading temperature: timeout"));
    }

    #[test]
    fn test_config_error_converts() {
        let err: CameraError = ConfigError::ValidationError("duplicate uid".into()).into();
        assert!(matches!(err, CameraError::Configuration(_)));
        assert!(err.to_string().contains("duplicate uid"));
    }
}
