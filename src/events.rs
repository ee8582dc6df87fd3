//! Event tags and payloads published through the [`Notifier`](crate::notifier::Notifier).
//!
//! Events come from two closed enumerations: collection-level events
//! ([`CameraSystemEvent`]) and camera-level events ([`CameraEvent`]). Both are
//! wrapped in [`Event`], which is what listeners filter and wait on.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::camera::Camera;

/// Events emitted by a camera collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraSystemEvent {
    CameraAdded,
    CameraRemoved,
}

/// Events emitted by an individual camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraEvent {
    CameraConnected,
    CameraConnectFailed,
    CameraDisconnected,
    CameraDisconnectFailed,
    ExposureFlushing,
    ExposureIntegrating,
    ExposureReading,
    ExposureDone,
    ExposureFailed,
    ExposureWriting,
    ExposureWritten,
    ExposurePostProcessing,
    ExposurePostProcessDone,
    ExposurePostProcessFailed,
    NewSetPoint,
    SetPointReached,
}

/// Any event that can travel through the notifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Event {
    System(CameraSystemEvent),
    Camera(CameraEvent),
}

impl From<CameraSystemEvent> for Event {
    fn from(event: CameraSystemEvent) -> Self {
        Event::System(event)
    }
}

impl From<CameraEvent> for Event {
    fn from(event: CameraEvent) -> Self {
        Event::Camera(event)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::System(event) => write!(f, "{event:?}"),
            Event::Camera(event) => write!(f, "{event:?}"),
        }
    }
}

/// Key/value payload carried with every event.
///
/// Values are JSON so payloads can be forwarded to external consumers
/// unchanged. The emitting camera, when there is one, travels alongside as a
/// typed back-reference.
#[derive(Clone, Default)]
pub struct Payload {
    values: Map<String, Value>,
    camera: Option<Arc<Camera>>,
}

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn with_camera(mut self, camera: Arc<Camera>) -> Self {
        self.camera = Some(camera);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn camera(&self) -> Option<&Arc<Camera>> {
        self.camera.as_ref()
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("values", &self.values)
            .field("camera", &self.camera.as_ref().map(|c| c.name().to_string()))
            .finish()
    }
}
