//! Common test utilities for rust_camera integration tests
//!
//! This module provides reusable test helpers for:
//! - Building collections over the simulated backend
//! - Recording the event stream seen by a listener
//! - Polling for conditions that settle asynchronously

#![allow(dead_code)] // Utilities may not all be used by every test binary

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rust_camera::camera::Camera;
use rust_camera::config::{CameraConfig, ImageNamerConfig};
use rust_camera::simulated::{SimulatedBackend, SimulatedCamera};
use rust_camera::{
    AddCameraOptions, CameraCollection, CameraQuery, Callback, CollectionConfig, Event, Listener,
    Payload,
};

/// Default time to wait for asynchronous effects.
pub const SETTLE: Duration = Duration::from_secs(2);

/// A small sensor keeps stacking and FITS rendering fast.
pub fn small_backend<I, S>(uids: I) -> Arc<SimulatedBackend>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Arc::new(
        SimulatedBackend::new(uids)
            .with_template(|uid: &str| SimulatedCamera::with_resolution(uid, 32, 24)),
    )
}

/// Configuration entry named `name` for `uid`, writing images into `dir`.
pub fn camera_config(name: &str, uid: &str, dir: &Path) -> CameraConfig {
    CameraConfig {
        name: name.to_string(),
        image_namer: ImageNamerConfig {
            dirname: dir.to_string_lossy().into_owned(),
            ..Default::default()
        },
        ..CameraConfig::for_uid(uid)
    }
}

/// A collection configured with `cam1` -> `U1` and a recorder on all events.
pub fn collection_with_cam1(
    dir: &Path,
    customize: impl FnOnce(&mut CameraConfig),
) -> (Arc<CameraCollection>, Arc<SimulatedBackend>, Recorder) {
    let mut cam1 = camera_config("cam1", "U1", dir);
    customize(&mut cam1);
    let config = CollectionConfig::from_cameras([cam1]).unwrap();

    let backend = small_backend(["U1"]);
    let collection = CameraCollection::new(backend.clone(), Some(config));
    let recorder = Recorder::attach(&collection.subscribe().unwrap());
    (collection, backend, recorder)
}

/// Adds and connects `cam1`, returning the camera and its simulated driver.
pub async fn connected_cam1(
    collection: &CameraCollection,
    backend: &SimulatedBackend,
) -> (Arc<Camera>, Arc<SimulatedCamera>) {
    let camera = collection
        .add_camera(CameraQuery::name("cam1"), AddCameraOptions::default())
        .await
        .unwrap();
    let driver = backend.driver("U1").unwrap();
    (camera, driver)
}

/// Records every event dispatched by a listener, in order.
#[derive(Clone, Default)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<(Event, Payload)>>>,
}

impl Recorder {
    pub fn attach(listener: &Listener) -> Self {
        let recorder = Self::default();
        let seen = recorder.seen.clone();
        listener.register_callback(Callback::sync(move |event, payload| {
            seen.lock().push((*event, payload.clone()));
        }));
        recorder
    }

    pub fn events(&self) -> Vec<Event> {
        self.seen.lock().iter().map(|(event, _)| *event).collect()
    }

    pub fn count(&self, event: impl Into<Event>) -> usize {
        let event = event.into();
        self.seen.lock().iter().filter(|(seen, _)| *seen == event).count()
    }

    pub fn payloads(&self, event: impl Into<Event>) -> Vec<Payload> {
        let event = event.into();
        self.seen
            .lock()
            .iter()
            .filter(|(seen, _)| *seen == event)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// Waits until `event` has been recorded at least `n` times.
    pub async fn wait_for_count(&self, event: impl Into<Event>, n: usize) {
        let event = event.into();
        eventually(|| self.count(event) >= n).await;
    }
}

/// Polls `condition` until it holds, panicking after [`SETTLE`].
pub async fn eventually(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + SETTLE;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition did not hold within {:?}",
            SETTLE
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Like [`eventually`], for conditions that must be awaited.
pub async fn eventually_async<F, Fut>(condition: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + SETTLE;
    while !condition().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition did not hold within {:?}",
            SETTLE
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
