//! Vendor-facing traits.
//!
//! A vendor integration provides a [`CameraBackend`] (device enumeration and
//! driver construction) and a [`CameraDriver`] per device. Drivers report
//! failures as `anyhow::Error`; the [`Camera`] wraps them before they reach
//! callers.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::capabilities::{CoolerControl, ImageAreaControl, ShutterControl};
use super::Camera;
use crate::config::CameraConfig;
use crate::exposure::Exposure;

/// Result of asking a backend which devices are attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraListing {
    /// Unique ids of the attached devices.
    Supported(Vec<String>),
    /// The backend cannot enumerate devices.
    Unsupported,
}

/// Device-specific primitives for one camera.
#[async_trait]
pub trait CameraDriver: Send + Sync {
    /// Opens the device with the merged connection parameters.
    async fn connect(&self, params: &Map<String, Value>) -> anyhow::Result<()>;

    /// Closes the device. On error the camera stays connected.
    async fn disconnect(&self) -> anyhow::Result<()>;

    /// Device status snapshot.
    async fn status(&self) -> anyhow::Result<Map<String, Value>> {
        Ok(Map::new())
    }

    /// Integrates once and stores the pixels in `exposure.data`.
    ///
    /// `camera` gives access to event emission and to the camera's own
    /// capability front-ends (e.g. to drive the shutter).
    async fn expose(
        &self,
        camera: &Camera,
        exposure: &mut Exposure,
        params: &Map<String, Value>,
    ) -> anyhow::Result<()>;

    /// Optional post-processing of a finished exposure.
    async fn post_process(&self, _camera: &Camera, exposure: Exposure) -> anyhow::Result<Exposure> {
        Ok(exposure)
    }

    /// Unique id reported by the device firmware, if any.
    fn uid(&self) -> Option<String> {
        None
    }

    fn as_shutter(&self) -> Option<&dyn ShutterControl> {
        None
    }

    fn as_cooler(&self) -> Option<&dyn CoolerControl> {
        None
    }

    fn as_image_area(&self) -> Option<&dyn ImageAreaControl> {
        None
    }
}

/// Vendor library entry point used by a camera collection.
#[async_trait]
pub trait CameraBackend: Send + Sync {
    /// Version of the vendor library.
    fn version(&self) -> String;

    /// Lists attached devices. Backends without enumeration keep the default.
    async fn list_available_cameras(&self) -> anyhow::Result<CameraListing> {
        Ok(CameraListing::Unsupported)
    }

    /// Builds a driver for a camera with the given resolved configuration.
    fn create_driver(&self, config: &CameraConfig) -> anyhow::Result<Arc<dyn CameraDriver>>;
}
