//! Per-device camera front-end.
//!
//! A [`Camera`] wraps a vendor [`CameraDriver`] and adds everything that is
//! common to all vendors: the connection state machine, a cached status
//! snapshot, the exposure pipeline (stacking, post-processing, disk write) and
//! front-ends for the optional shutter, cooler and image-area capabilities.
//! Every lifecycle step is published through the shared [`Notifier`].
//!
//! Cameras are always handled through `Arc<Camera>`; see [`Camera::builder`].

pub mod capabilities;
pub mod driver;

pub use capabilities::{
    Binning, Capability, CoolerControl, ImageArea, ImageAreaControl, ShutterControl,
};
pub use driver::{CameraBackend, CameraDriver, CameraListing};

use std::path::PathBuf;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::CameraConfig;
use crate::error::{CameraError, CameraResult};
use crate::events::{CameraEvent, Payload};
use crate::exposure::{
    Exposure, ExposureRenderer, FitsRenderer, ImageNamer, ImageType, PixelData, StackFunction,
};
use crate::notifier::Notifier;
use crate::tasks::cancel_task;

/// How a temperature set-point request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetPointOutcome {
    Reached,
    /// A newer set point replaced this one, or the camera disconnected.
    Superseded,
}

/// Options for [`Camera::expose`].
#[derive(Debug, Clone)]
pub struct ExposeOptions {
    pub image_type: ImageType,
    /// Number of frames to capture and combine.
    pub stack: u32,
    pub stack_function: StackFunction,
    pub output_path: Option<PathBuf>,
    pub write: bool,
    pub postprocess: bool,
    /// Passed through to the driver's capture step.
    pub params: Map<String, Value>,
}

impl Default for ExposeOptions {
    fn default() -> Self {
        Self {
            image_type: ImageType::Object,
            stack: 1,
            stack_function: StackFunction::Median,
            output_path: None,
            write: false,
            postprocess: false,
            params: Map::new(),
        }
    }
}

impl ExposeOptions {
    pub fn image_type(mut self, image_type: ImageType) -> Self {
        self.image_type = image_type;
        self
    }

    pub fn stack(mut self, stack: u32) -> Self {
        self.stack = stack;
        self
    }

    pub fn stack_function(mut self, stack_function: StackFunction) -> Self {
        self.stack_function = stack_function;
        self
    }

    pub fn output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    pub fn write(mut self, write: bool) -> Self {
        self.write = write;
        self
    }

    pub fn postprocess(mut self, postprocess: bool) -> Self {
        self.postprocess = postprocess;
        self
    }

    pub fn param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Default)]
struct CameraState {
    connected: bool,
    status: Map<String, Value>,
}

/// Builder for [`Camera`].
pub struct CameraBuilder {
    config: CameraConfig,
    driver: Arc<dyn CameraDriver>,
    notifier: Arc<Notifier>,
    renderer: Arc<dyn ExposureRenderer>,
    force: bool,
}

impl CameraBuilder {
    /// Pins the camera so discovery never removes it.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn ExposureRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn build(self) -> Arc<Camera> {
        let mut config = self.config;
        if config.name.is_empty() {
            config.name = config.uid.clone();
        }
        let namer = ImageNamer::new(config.image_namer.clone());

        Arc::new_cyclic(|self_ref| Camera {
            name: config.name.clone(),
            uid: config.uid.clone(),
            force: self.force,
            driver: self.driver,
            notifier: self.notifier,
            renderer: self.renderer,
            state: Mutex::new(CameraState::default()),
            namer: tokio::sync::Mutex::new(namer),
            lifecycle: tokio::sync::Mutex::new(()),
            set_point: Mutex::new(None),
            self_ref: self_ref.clone(),
            config,
        })
    }
}

/// One controllable imaging device.
pub struct Camera {
    name: String,
    uid: String,
    config: CameraConfig,
    force: bool,
    driver: Arc<dyn CameraDriver>,
    notifier: Arc<Notifier>,
    renderer: Arc<dyn ExposureRenderer>,
    state: Mutex<CameraState>,
    namer: tokio::sync::Mutex<ImageNamer>,
    /// Serializes connect and disconnect.
    lifecycle: tokio::sync::Mutex<()>,
    set_point: Mutex<Option<JoinHandle<()>>>,
    self_ref: Weak<Camera>,
}

impl Camera {
    pub fn builder(
        config: CameraConfig,
        driver: Arc<dyn CameraDriver>,
        notifier: Arc<Notifier>,
    ) -> CameraBuilder {
        CameraBuilder {
            config,
            driver,
            notifier,
            renderer: Arc::new(FitsRenderer),
            force: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    /// Whether discovery must leave this camera alone.
    pub fn is_forced(&self) -> bool {
        self.force
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    pub fn driver(&self) -> &Arc<dyn CameraDriver> {
        &self.driver
    }

    /// Base payload for events emitted by this camera.
    pub fn payload(&self) -> Payload {
        let payload = Payload::new()
            .with("uid", self.uid.as_str())
            .with("name", self.name.as_str());
        match self.self_ref.upgrade() {
            Some(camera) => payload.with_camera(camera),
            None => payload,
        }
    }

    /// Publishes a camera event. Drivers use this for device-specific phases
    /// such as flushing and reading.
    pub fn notify(&self, event: CameraEvent, payload: Payload) -> bool {
        self.notifier.notify(event, payload)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Connects to the device.
    ///
    /// `overrides` are merged over the configured connection parameters.
    /// Fails if already connected unless `force` is set.
    pub async fn connect(&self, force: bool, overrides: &Map<String, Value>) -> CameraResult<()> {
        let _lifecycle = self.lifecycle.lock().await;

        if self.is_connected() && !force {
            return Err(CameraError::connection(&self.name, "camera is already connected"));
        }

        let mut params = self.config.connection_params.clone();
        for (key, value) in overrides {
            params.insert(key.clone(), value.clone());
        }

        info!(camera = %self.name, uid = %self.uid, "Connecting camera");
        match self.driver.connect(&params).await {
            Ok(()) => {
                if let Some(firmware_uid) = self.driver.uid() {
                    if firmware_uid != self.uid {
                        warn!(
                            camera = %self.name,
                            "Device reports uid {} but camera is configured as {}",
                            firmware_uid,
                            self.uid
                        );
                    }
                }
                self.state.lock().connected = true;
                self.notify(CameraEvent::CameraConnected, self.payload());
                Ok(())
            }
            Err(err) => {
                self.state.lock().connected = false;
                error!(camera = %self.name, "Failed to connect: {:#}", err);
                self.notify(
                    CameraEvent::CameraConnectFailed,
                    self.payload().with("error", format!("{err:#}")),
                );
                Err(CameraError::connection(&self.name, format!("failed to connect: {err:#}")))
            }
        }
    }

    /// Disconnects from the device, cancelling any pending set-point wait.
    pub async fn disconnect(&self) -> CameraResult<()> {
        let _lifecycle = self.lifecycle.lock().await;

        let wait = self.set_point.lock().take();
        cancel_task(wait).await;

        info!(camera = %self.name, "Disconnecting camera");
        match self.driver.disconnect().await {
            Ok(()) => {
                self.state.lock().connected = false;
                self.notify(CameraEvent::CameraDisconnected, self.payload());
                Ok(())
            }
            Err(err) => {
                error!(camera = %self.name, "Failed to disconnect: {:#}", err);
                self.notify(
                    CameraEvent::CameraDisconnectFailed,
                    self.payload().with("error", format!("{err:#}")),
                );
                Err(CameraError::connection(
                    &self.name,
                    format!("failed to disconnect: {err:#}"),
                ))
            }
        }
    }

    /// Returns the cached status, querying the device if `update` is set or
    /// nothing is cached. Device failures are logged and yield an empty map.
    pub async fn get_status(&self, update: bool) -> Map<String, Value> {
        {
            let state = self.state.lock();
            if !update && !state.status.is_empty() {
                return state.status.clone();
            }
        }

        let status = match self.driver.status().await {
            Ok(status) => status,
            Err(err) => {
                warn!(camera = %self.name, "Failed to get status: {:#}", err);
                Map::new()
            }
        };
        self.state.lock().status = status.clone();
        status
    }

    // =========================================================================
    // Exposures
    // =========================================================================

    /// Next output path from this camera's image namer.
    pub async fn next_image_path(&self, num: Option<u32>) -> CameraResult<PathBuf> {
        self.namer
            .lock()
            .await
            .next_path(&self.name, &self.uid, num)
            .await
    }

    /// Runs the exposure pipeline.
    ///
    /// Captures `options.stack` frames, combines them if needed, resolves the
    /// output path, then optionally post-processes and writes the result.
    pub async fn expose(&self, exptime: f64, options: ExposeOptions) -> CameraResult<Exposure> {
        if !exptime.is_finite() || exptime < 0.0 {
            return Err(CameraError::capture(
                &self.name,
                "exposure time must be a finite number >= 0",
            ));
        }
        if options.stack == 0 {
            return Err(CameraError::capture(&self.name, "stack must be at least 1"));
        }

        let mut exptime = exptime;
        if options.image_type == ImageType::Bias && exptime > 0.0 {
            warn!(camera = %self.name, "Setting exposure time for bias to 0 seconds");
            exptime = 0.0;
        }

        if !self.is_connected() {
            return Err(CameraError::capture(&self.name, "camera is not connected"));
        }

        let phase_payload = || {
            self.payload()
                .with("exptime", exptime)
                .with("image_type", options.image_type.as_str())
                .with("stack", options.stack)
        };

        let mut frames: Vec<Exposure> = Vec::new();
        for frame in 1..=options.stack {
            let mut exposure = Exposure::new(
                &self.name,
                &self.uid,
                exptime,
                options.image_type,
                self.renderer.clone(),
            );

            self.notify(
                CameraEvent::ExposureIntegrating,
                phase_payload().with("frame", frame),
            );

            if let Err(err) = self.driver.expose(self, &mut exposure, &options.params).await {
                return Err(self.fail_exposure(format!("failed capturing exposure: {err:#}")));
            }
            if !exposure.has_data() {
                return Err(self.fail_exposure("data was not taken".to_string()));
            }
            frames.push(exposure);
        }

        let mut exposure = if frames.len() > 1 {
            let stacked: Vec<_> = frames
                .iter()
                .filter_map(|frame| frame.data.as_ref().map(PixelData::to_f32))
                .collect();
            let combined = match options.stack_function.combine(&stacked) {
                Ok(combined) => combined,
                Err(err) => return Err(self.fail_exposure(format!("failed stacking frames: {err:#}"))),
            };
            let mut first = frames.swap_remove(0);
            first.data = Some(PixelData::F32(combined));
            first.stack_function = Some(options.stack_function);
            first
        } else {
            frames.swap_remove(0)
        };

        exposure.stack = options.stack;
        exposure.exptime_total = exptime * f64::from(options.stack);
        let path = match options.output_path.clone().or_else(|| exposure.path.take()) {
            Some(path) => path,
            None => match self.next_image_path(None).await {
                Ok(path) => path,
                Err(err) => {
                    error!(camera = %self.name, "Cannot name exposure: {}", err);
                    self.notify(
                        CameraEvent::ExposureFailed,
                        phase_payload().with("error", err.to_string()),
                    );
                    return Err(err);
                }
            },
        };
        exposure.path = Some(path);

        let filename = exposure
            .path
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_default();
        self.notify(
            CameraEvent::ExposureDone,
            phase_payload().with("filename", filename),
        );

        if options.postprocess {
            self.notify(CameraEvent::ExposurePostProcessing, phase_payload());
            exposure = match self.driver.post_process(self, exposure).await {
                Ok(exposure) => exposure,
                Err(err) => {
                    error!(camera = %self.name, "Post-processing failed: {:#}", err);
                    self.notify(
                        CameraEvent::ExposurePostProcessFailed,
                        phase_payload().with("error", format!("{err:#}")),
                    );
                    return Err(CameraError::capture(
                        &self.name,
                        format!("failed post-processing exposure: {err:#}"),
                    ));
                }
            };
            self.notify(CameraEvent::ExposurePostProcessDone, phase_payload());
        }

        if options.write {
            self.notify(CameraEvent::ExposureWriting, phase_payload());
            match exposure.write(None, &self.config.write).await {
                Ok(path) => {
                    info!(camera = %self.name, path = %path.display(), "Exposure written");
                    self.notify(
                        CameraEvent::ExposureWritten,
                        phase_payload().with("filename", path.display().to_string()),
                    );
                }
                Err(err) => {
                    error!(camera = %self.name, "{}", err);
                    self.notify(
                        CameraEvent::ExposureFailed,
                        phase_payload().with("error", err.to_string()),
                    );
                    return Err(err);
                }
            }
        }

        Ok(exposure)
    }

    fn fail_exposure(&self, message: String) -> CameraError {
        error!(camera = %self.name, "{}", message);
        self.notify(
            CameraEvent::ExposureFailed,
            self.payload().with("error", message.as_str()),
        );
        CameraError::capture(&self.name, message)
    }

    pub async fn bias(&self) -> CameraResult<Exposure> {
        self.expose(0.0, ExposeOptions::default().image_type(ImageType::Bias))
            .await
    }

    pub async fn dark(&self, exptime: f64) -> CameraResult<Exposure> {
        self.expose(exptime, ExposeOptions::default().image_type(ImageType::Dark))
            .await
    }

    pub async fn flat(&self, exptime: f64) -> CameraResult<Exposure> {
        self.expose(exptime, ExposeOptions::default().image_type(ImageType::Flat))
            .await
    }

    pub async fn object(&self, exptime: f64) -> CameraResult<Exposure> {
        self.expose(exptime, ExposeOptions::default()).await
    }

    // =========================================================================
    // Capabilities
    // =========================================================================

    pub fn has_capability(&self, capability: Capability) -> bool {
        match capability {
            Capability::Shutter => self.driver.as_shutter().is_some(),
            Capability::Cooler => self.driver.as_cooler().is_some(),
            Capability::ImageArea => self.driver.as_image_area().is_some(),
        }
    }

    pub fn capabilities(&self) -> Vec<Capability> {
        Capability::ALL
            .into_iter()
            .filter(|capability| self.has_capability(*capability))
            .collect()
    }

    fn unsupported(&self, capability: Capability) -> CameraError {
        CameraError::Unsupported {
            camera: self.name.clone(),
            capability: capability.to_string(),
        }
    }

    fn ensure_connected(&self) -> CameraResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(CameraError::connection(&self.name, "camera is not connected"))
        }
    }

    fn shutter(&self) -> CameraResult<&dyn ShutterControl> {
        self.driver
            .as_shutter()
            .ok_or_else(|| self.unsupported(Capability::Shutter))
    }

    fn cooler(&self) -> CameraResult<&dyn CoolerControl> {
        self.driver
            .as_cooler()
            .ok_or_else(|| self.unsupported(Capability::Cooler))
    }

    fn image_area(&self) -> CameraResult<&dyn ImageAreaControl> {
        self.driver
            .as_image_area()
            .ok_or_else(|| self.unsupported(Capability::ImageArea))
    }

    /// Moves the shutter. Re-issuing the current position is a no-op unless
    /// `force` is set. Returns the resulting position.
    pub async fn set_shutter(&self, open: bool, force: bool) -> CameraResult<bool> {
        let shutter = self.shutter()?;
        self.ensure_connected()?;

        let current = shutter
            .get_shutter()
            .await
            .map_err(|err| CameraError::device(&self.name, err))?;
        if current == open && !force {
            debug!(camera = %self.name, open, "Shutter already in position");
            return Ok(current);
        }

        shutter
            .set_shutter(open)
            .await
            .map_err(|err| CameraError::device(&self.name, err))?;
        debug!(camera = %self.name, open, "Shutter moved");
        Ok(open)
    }

    pub async fn open_shutter(&self) -> CameraResult<bool> {
        self.set_shutter(true, false).await
    }

    pub async fn close_shutter(&self) -> CameraResult<bool> {
        self.set_shutter(false, false).await
    }

    pub async fn get_shutter(&self) -> CameraResult<bool> {
        self.shutter()?
            .get_shutter()
            .await
            .map_err(|err| CameraError::device(&self.name, err))
    }

    pub async fn get_temperature(&self) -> CameraResult<f64> {
        self.cooler()?
            .get_temperature()
            .await
            .map_err(|err| CameraError::device(&self.name, err))
    }

    /// Sets a new temperature set point and waits until it is reached.
    ///
    /// A newer call supersedes this one: the older wait is cancelled and its
    /// caller gets [`SetPointOutcome::Superseded`].
    pub async fn set_temperature(&self, temperature: f64) -> CameraResult<SetPointOutcome> {
        let cooler = self.cooler()?;
        self.ensure_connected()?;

        let previous = self.set_point.lock().take();
        cancel_task(previous).await;

        cooler
            .set_temperature(temperature)
            .await
            .map_err(|err| CameraError::device(&self.name, err))?;
        info!(camera = %self.name, temperature, "New temperature set point");
        self.notify(
            CameraEvent::NewSetPoint,
            self.payload().with("temperature", temperature),
        );

        let camera = self.self_ref.upgrade().ok_or_else(|| {
            CameraError::connection(&self.name, "camera is being dropped")
        })?;
        let (reached_tx, reached_rx) = oneshot::channel();
        let wait = tokio::spawn(async move {
            if camera.wait_for_set_point(temperature).await {
                // The caller may have gone away.
                let _ = reached_tx.send(());
            }
        });

        // Another request may have slipped in while the driver was busy.
        let stale = self.set_point.lock().replace(wait);
        cancel_task(stale).await;

        match reached_rx.await {
            Ok(()) => Ok(SetPointOutcome::Reached),
            Err(_) => Ok(SetPointOutcome::Superseded),
        }
    }

    async fn wait_for_set_point(&self, goal: f64) -> bool {
        let tolerance = self.config.cooler.tolerance;
        let interval = self.config.cooler.poll_interval;

        loop {
            let Some(cooler) = self.driver.as_cooler() else {
                return false;
            };
            match cooler.get_temperature().await {
                Ok(temperature) if (temperature - goal).abs() <= tolerance => break,
                Ok(temperature) => {
                    debug!(camera = %self.name, temperature, goal, "Waiting for set point")
                }
                Err(err) => warn!(camera = %self.name, "Failed reading temperature: {:#}", err),
            }
            tokio::time::sleep(interval).await;
        }

        info!(camera = %self.name, temperature = goal, "Set point reached");
        self.notify(
            CameraEvent::SetPointReached,
            self.payload().with("temperature", goal),
        );
        true
    }

    pub async fn get_image_area(&self) -> CameraResult<ImageArea> {
        self.image_area()?
            .get_image_area()
            .await
            .map_err(|err| CameraError::device(&self.name, err))
    }

    /// Sets the readout window. `None` restores the full frame.
    pub async fn set_image_area(&self, area: Option<ImageArea>) -> CameraResult<()> {
        let control = self.image_area()?;
        self.ensure_connected()?;
        if let Some(area) = &area {
            area.validate().map_err(CameraError::Configuration)?;
        }
        control
            .set_image_area(area)
            .await
            .map_err(|err| CameraError::device(&self.name, err))
    }

    pub async fn get_binning(&self) -> CameraResult<Binning> {
        self.image_area()?
            .get_binning()
            .await
            .map_err(|err| CameraError::device(&self.name, err))
    }

    /// Sets the binning. `vbin` defaults to `hbin`.
    pub async fn set_binning(&self, hbin: u32, vbin: Option<u32>) -> CameraResult<()> {
        let control = self.image_area()?;
        self.ensure_connected()?;
        let binning = Binning::new(hbin, vbin.unwrap_or(hbin));
        if binning.horizontal == 0 || binning.vertical == 0 {
            return Err(CameraError::Configuration(
                "binning factors must be at least 1".to_string(),
            ));
        }
        control
            .set_binning(binning)
            .await
            .map_err(|err| CameraError::device(&self.name, err))
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        if let Some(wait) = self.set_point.get_mut().take() {
            wait.abort();
        }
    }
}

impl std::fmt::Debug for Camera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Camera")
            .field("name", &self.name)
            .field("uid", &self.uid)
            .field("connected", &self.is_connected())
            .field("force", &self.force)
            .finish()
    }
}
