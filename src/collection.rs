//! Camera collection: the registry of live cameras for one instrument.
//!
//! The collection resolves per-camera configuration, creates and connects
//! cameras through the vendor [`CameraBackend`], keeps them in an ordered live
//! list and publishes `CameraAdded`/`CameraRemoved` events. When the backend
//! can enumerate devices, a discovery [`Poller`] keeps the live list in sync
//! with what is attached.
//!
//! # Example
//!
//! ```rust,ignore
//! let config = CollectionConfig::load_from("config/cameras.toml")?;
//! let collection = CameraCollection::new(backend, Some(config));
//!
//! let listener = collection.subscribe()?;
//! let camera = collection.add_camera(CameraQuery::name("guider"), AddCameraOptions::default()).await?;
//! let exposure = camera.expose(1.0, ExposeOptions::default().write(true)).await?;
//! ```

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::Map;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::camera::{Camera, CameraBackend, CameraListing};
use crate::config::{CameraConfig, CameraOverrides, CollectionConfig};
use crate::error::{CameraError, CameraResult};
use crate::events::{CameraSystemEvent, Event};
use crate::notifier::{Listener, Notifier};
use crate::poller::Poller;

/// Identifies a camera by name, unique id, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CameraQuery {
    pub name: Option<String>,
    pub uid: Option<String>,
}

impl CameraQuery {
    /// Matches the only live camera, if there is exactly one.
    pub fn any() -> Self {
        Self::default()
    }

    /// Matches by configured name.
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            uid: None,
        }
    }

    /// Matches by device uid.
    pub fn uid(uid: impl Into<String>) -> Self {
        Self {
            name: None,
            uid: Some(uid.into()),
        }
    }

    /// Matches only when both name and uid agree.
    pub fn both(name: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            uid: Some(uid.into()),
        }
    }

    /// Returns `true` if neither name nor uid is set.
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.uid.is_none()
    }

    fn matches(&self, camera: &Camera) -> bool {
        self.name.as_deref().map_or(true, |name| camera.name() == name)
            && self.uid.as_deref().map_or(true, |uid| camera.uid() == uid)
    }
}

impl std::fmt::Display for CameraQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.name, &self.uid) {
            (Some(name), Some(uid)) => write!(f, "name={name}, uid={uid}"),
            (Some(name), None) => write!(f, "name={name}"),
            (None, Some(uid)) => write!(f, "uid={uid}"),
            (None, None) => f.write_str("<any>"),
        }
    }
}

/// Options for [`CameraCollection::add_camera`].
#[derive(Debug, Clone)]
pub struct AddCameraOptions {
    /// Pin the camera so discovery never removes it.
    pub force: bool,
    /// Connect after creating. The configuration can also disable this.
    pub autoconnect: bool,
    /// Merged over the stored configuration for this camera.
    pub overrides: CameraOverrides,
}

impl Default for AddCameraOptions {
    fn default() -> Self {
        Self {
            force: false,
            autoconnect: true,
            overrides: CameraOverrides::default(),
        }
    }
}

/// Owner of all live cameras for one instrument.
pub struct CameraCollection {
    name: String,
    backend: Arc<dyn CameraBackend>,
    config: Option<CollectionConfig>,
    include: Option<HashSet<String>>,
    exclude: HashSet<String>,
    poll_interval: Duration,
    notifier: Arc<Notifier>,
    cameras: RwLock<Vec<Arc<Camera>>>,
    /// Per-uid guards so only one add for a given device runs at a time.
    adding: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    poller: tokio::sync::Mutex<Option<Poller>>,
    self_ref: Weak<CameraCollection>,
}

impl CameraCollection {
    /// Creates an empty collection. The discovery poller is not started.
    pub fn new(backend: Arc<dyn CameraBackend>, config: Option<CollectionConfig>) -> Arc<Self> {
        let settings = config
            .as_ref()
            .map(|config| config.collection.clone())
            .unwrap_or_default();

        info!(
            collection = %settings.name,
            version = %backend.version(),
            "Creating camera collection"
        );

        Arc::new_cyclic(|self_ref| Self {
            name: settings.name,
            backend,
            config,
            include: settings.include.map(|uids| uids.into_iter().collect()),
            exclude: settings.exclude.into_iter().collect(),
            poll_interval: settings.poll_interval,
            notifier: Arc::new(Notifier::new()),
            cameras: RwLock::new(Vec::new()),
            adding: Mutex::new(HashMap::new()),
            poller: tokio::sync::Mutex::new(None),
            self_ref: self_ref.clone(),
        })
    }

    /// Collection name, used in logs and the poller name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version string reported by the vendor backend.
    pub fn backend_version(&self) -> String {
        self.backend.version()
    }

    /// Notifier shared by the collection and all of its cameras.
    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    /// Creates a listener for every event and registers it.
    pub fn subscribe(&self) -> CameraResult<Arc<Listener>> {
        let listener = Listener::new();
        self.notifier.register_listener(&listener)?;
        Ok(listener)
    }

    /// Creates a listener for the given events and registers it.
    pub fn subscribe_filtered<I, E>(&self, events: I) -> CameraResult<Arc<Listener>>
    where
        I: IntoIterator<Item = E>,
        E: Into<Event>,
    {
        let listener = Listener::filtered(events);
        self.notifier.register_listener(&listener)?;
        Ok(listener)
    }

    /// Snapshot of the live cameras, in the order they were added.
    pub fn cameras(&self) -> Vec<Arc<Camera>> {
        self.cameras.read().clone()
    }

    /// Looks up a stored configuration entry.
    ///
    /// Returns `None` if no configuration was loaded or nothing matches. If
    /// both name and uid are given they must refer to the same entry.
    pub fn get_camera_config(&self, query: &CameraQuery) -> CameraResult<Option<CameraConfig>> {
        if query.is_empty() {
            return Err(CameraError::Configuration(
                "a camera name or uid is required".to_string(),
            ));
        }
        let Some(config) = &self.config else {
            return Ok(None);
        };

        let by_name = query.name.as_deref().and_then(|name| config.camera_by_name(name));
        if let (Some(entry), Some(uid)) = (by_name, query.uid.as_deref()) {
            if entry.uid != uid {
                return Err(CameraError::Configuration(format!(
                    "camera '{}' is configured with uid '{}', not '{}'",
                    entry.name, entry.uid, uid
                )));
            }
        }

        Ok(by_name
            .or_else(|| query.uid.as_deref().and_then(|uid| config.camera_by_uid(uid)))
            .cloned())
    }

    /// Returns a live camera.
    ///
    /// An empty query matches the only live camera if there is exactly one.
    /// Otherwise every given field must match.
    pub fn get_camera(&self, query: &CameraQuery) -> Option<Arc<Camera>> {
        let cameras = self.cameras.read();
        if query.is_empty() {
            return match cameras.as_slice() {
                [only] => Some(only.clone()),
                _ => None,
            };
        }
        cameras.iter().find(|camera| query.matches(camera)).cloned()
    }

    fn resolve_config(&self, query: &CameraQuery, overrides: &CameraOverrides) -> CameraResult<CameraConfig> {
        let stored = if query.is_empty() {
            None
        } else {
            self.get_camera_config(query)?
        };

        let base = match (stored, query.uid.as_deref()) {
            (Some(config), _) => config,
            (None, Some(uid)) => CameraConfig::for_uid(uid),
            (None, None) => {
                return Err(CameraError::Configuration(format!(
                    "cannot determine the uid of camera {query}"
                )))
            }
        };

        let mut config = base.merged(overrides);
        if let Some(name) = &query.name {
            config.name = name.clone();
        }
        if config.name.is_empty() {
            config.name = config.uid.clone();
        }
        Ok(config)
    }

    /// Creates a camera, optionally connects it and adds it to the live list.
    ///
    /// If a camera with the same uid is already live it is returned unchanged.
    /// Adds for the same uid are serialized, so concurrent calls connect the
    /// device only once.
    pub async fn add_camera(&self, query: CameraQuery, options: AddCameraOptions) -> CameraResult<Arc<Camera>> {
        let config = self.resolve_config(&query, &options.overrides)?;
        let uid = config.uid.clone();

        let guard = self.adding.lock().entry(uid.clone()).or_default().clone();
        let result = {
            let _adding = guard.lock().await;
            self.add_camera_locked(config, options).await
        };

        drop(guard);
        let mut adding = self.adding.lock();
        if adding
            .get(&uid)
            .map_or(false, |entry| Arc::strong_count(entry) == 1)
        {
            adding.remove(&uid);
        }
        result
    }

    /// Body of [`Self::add_camera`]; the caller holds the per-uid guard.
    async fn add_camera_locked(
        &self,
        config: CameraConfig,
        options: AddCameraOptions,
    ) -> CameraResult<Arc<Camera>> {
        let uid = config.uid.clone();
        {
            let cameras = self.cameras.read();
            if let Some(existing) = cameras.iter().find(|camera| camera.uid() == uid) {
                warn!(camera = %existing.name(), uid = %uid, "Camera already connected");
                return Ok(existing.clone());
            }
            if let Some(clash) = cameras.iter().find(|camera| camera.name() == config.name) {
                return Err(CameraError::Configuration(format!(
                    "camera name '{}' is already used by uid '{}'",
                    config.name,
                    clash.uid()
                )));
            }
        }

        let name = config.name.clone();
        let connect = options.autoconnect && config.autoconnect();
        let driver = self.backend.create_driver(&config).map_err(|err| {
            CameraError::connection(&name, format!("failed to create driver: {err:#}"))
        })?;

        let camera = Camera::builder(config, driver, self.notifier.clone())
            .force(options.force)
            .build();

        if connect {
            camera.connect(false, &Map::new()).await?;
        }

        self.cameras.write().push(camera.clone());
        info!(camera = %name, uid = %uid, connected = camera.is_connected(), "Camera added");
        self.notifier
            .notify(CameraSystemEvent::CameraAdded, camera.payload());

        Ok(camera)
    }

    /// Disconnects a live camera and removes it from the list.
    pub async fn remove_camera(&self, query: &CameraQuery) -> CameraResult<()> {
        let camera = self
            .get_camera(query)
            .ok_or_else(|| CameraError::Lookup(format!("cannot find camera {query}")))?;

        if camera.is_connected() {
            camera.disconnect().await?;
        }

        self.cameras
            .write()
            .retain(|live| !Arc::ptr_eq(live, &camera));
        info!(camera = %camera.name(), uid = %camera.uid(), "Camera removed");
        self.notifier
            .notify(CameraSystemEvent::CameraRemoved, camera.payload());
        Ok(())
    }

    /// Schedules an add in the background. Meant for vendor connect hooks.
    pub fn on_camera_connected(&self, uid: &str) -> JoinHandle<CameraResult<Arc<Camera>>> {
        let collection = self.self_ref.clone();
        let uid = uid.to_string();
        tokio::spawn(async move {
            let collection = collection
                .upgrade()
                .ok_or_else(|| CameraError::Lookup("camera collection was dropped".to_string()))?;
            collection
                .add_camera(CameraQuery::uid(uid), AddCameraOptions::default())
                .await
        })
    }

    /// Schedules a removal in the background. Meant for vendor disconnect hooks.
    pub fn on_camera_disconnected(&self, uid: &str) -> JoinHandle<CameraResult<()>> {
        let collection = self.self_ref.clone();
        let uid = uid.to_string();
        tokio::spawn(async move {
            let collection = collection
                .upgrade()
                .ok_or_else(|| CameraError::Lookup("camera collection was dropped".to_string()))?;
            collection.remove_camera(&CameraQuery::uid(uid)).await
        })
    }

    // =========================================================================
    // Discovery
    // =========================================================================

    /// Starts the discovery poller, creating it on first use.
    ///
    /// Calling it again re-times the running poller. `None` uses the
    /// configured poll interval.
    pub async fn start_camera_poller(&self, interval: Option<Duration>) {
        let interval = interval.unwrap_or(self.poll_interval);
        let mut poller = self.poller.lock().await;
        let poller = poller.get_or_insert_with(|| {
            let collection = self.self_ref.clone();
            Poller::new(
                format!("{}-discovery", self.name),
                move || {
                    let collection = collection.clone();
                    async move {
                        match collection.upgrade() {
                            Some(collection) => collection.check_cameras().await,
                            None => Ok(()),
                        }
                    }
                },
                interval,
            )
        });
        poller.start(Some(interval));
    }

    /// Stops the discovery poller if it exists. Live cameras are kept.
    pub async fn stop_camera_poller(&self) {
        if let Some(poller) = self.poller.lock().await.as_mut() {
            poller.stop().await;
        }
    }

    /// Returns `true` while the discovery poller is running.
    pub async fn poller_running(&self) -> bool {
        self.poller
            .lock()
            .await
            .as_ref()
            .map_or(false, Poller::running)
    }

    /// Syncs the live list with the devices the backend reports.
    async fn check_cameras(self: Arc<Self>) -> anyhow::Result<()> {
        let available: HashSet<String> = match self.backend.list_available_cameras().await? {
            CameraListing::Supported(uids) => uids.into_iter().collect(),
            CameraListing::Unsupported => {
                error!(
                    collection = %self.name,
                    "Backend cannot list cameras. Stopping the camera poller."
                );
                // Stopping from inside the poller's own callback would cancel it.
                let collection = self.clone();
                tokio::spawn(async move { collection.stop_camera_poller().await });
                return Ok(());
            }
        };

        let stale: Vec<Arc<Camera>> = self
            .cameras()
            .into_iter()
            .filter(|camera| !camera.is_forced() && !available.contains(camera.uid()))
            .collect();
        for camera in stale {
            debug!(uid = %camera.uid(), "Camera no longer available");
            if let Err(err) = self.remove_camera(&CameraQuery::uid(camera.uid())).await {
                error!(uid = %camera.uid(), "Failed removing camera: {}", err);
            }
        }

        let candidates: BTreeSet<&String> = available
            .iter()
            .filter(|uid| !self.exclude.contains(*uid))
            .filter(|uid| self.include.as_ref().map_or(true, |include| include.contains(*uid)))
            .collect();
        for uid in candidates {
            if self.get_camera(&CameraQuery::uid(uid.as_str())).is_some() {
                continue;
            }
            debug!(uid = %uid, "New camera available");
            if let Err(err) = self
                .add_camera(CameraQuery::uid(uid.as_str()), AddCameraOptions::default())
                .await
            {
                error!(uid = %uid, "Failed adding camera: {}", err);
            }
        }

        Ok(())
    }

    /// Stops discovery and removes every live camera.
    pub async fn shutdown(&self) -> CameraResult<()> {
        self.stop_camera_poller().await;

        let mut failures = Vec::new();
        for camera in self.cameras() {
            if let Err(err) = self.remove_camera(&CameraQuery::uid(camera.uid())).await {
                error!(camera = %camera.name(), "Failed removing camera during shutdown: {}", err);
                failures.push(err);
            }
        }

        if failures.is_empty() {
            info!(collection = %self.name, "Camera collection shut down");
            Ok(())
        } else {
            Err(CameraError::ShutdownFailed(failures))
        }
    }
}
