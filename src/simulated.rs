//! Simulated camera hardware
//!
//! Provides a vendor backend and driver for running the framework without
//! physical devices. All delays use `tokio::time`, so tests can run them on a
//! paused clock.
//!
//! # Behaviour
//!
//! - `SimulatedCamera` - 640x480 sensor by default, 10ms readout
//! - Every capability is implemented (the shutter only if configured)
//! - Frame `n` (1-based, counted since creation) has pixel value
//!   `100 * n + (x + y) % 7`, so stacking results are predictable
//! - The cooler reaches a new set point `ramp_time` after it is commanded
//! - Faults can be injected with [`SimulatedFaults`]
//!
//! # Example
//!
//! ```rust,ignore
//! let backend = Arc::new(SimulatedBackend::new(["DEV_1", "DEV_2"]));
//! let collection = CameraCollection::new(backend.clone(), None);
//! collection.start_camera_poller(None).await;
//!
//! backend.unplug("DEV_2"); // removed on the next discovery check
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use ndarray::Array2;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration, Instant};
use tracing::debug;

use crate::camera::{
    Binning, Camera, CameraBackend, CameraDriver, CameraListing, CoolerControl, ImageArea,
    ImageAreaControl, ShutterControl,
};
use crate::config::CameraConfig;
use crate::events::CameraEvent;
use crate::exposure::{Exposure, PixelData};

/// Reported by [`SimulatedBackend::version`].
pub const SIMULATED_VERSION: &str = concat!("simulated-", env!("CARGO_PKG_VERSION"));

const AMBIENT_TEMPERATURE: f64 = 20.0;

/// Failures to inject into a [`SimulatedCamera`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatedFaults {
    pub fail_connect: bool,
    pub fail_disconnect: bool,
    pub fail_expose: bool,
    /// Capture succeeds but produces no pixels.
    pub no_data: bool,
    pub fail_post_process: bool,
}

#[derive(Debug, Clone, Copy)]
struct Ramp {
    from: f64,
    target: f64,
    started: Instant,
}

#[derive(Debug)]
struct SimulatedState {
    connected: bool,
    shutter_open: bool,
    ramp: Ramp,
    area: ImageArea,
    binning: Binning,
    frame_count: u32,
    connect_count: u32,
    shutter_moves: u32,
    last_params: Map<String, Value>,
}

// =============================================================================
// SimulatedCamera - Simulated Driver
// =============================================================================

/// Simulated camera driver.
pub struct SimulatedCamera {
    uid: String,
    width: u32,
    height: u32,
    has_shutter: bool,
    readout: Duration,
    ramp_time: Duration,
    connect_delay: Duration,
    state: RwLock<SimulatedState>,
    faults: Mutex<SimulatedFaults>,
}

impl SimulatedCamera {
    /// Create a simulated camera with a 640x480 sensor.
    pub fn new(uid: impl Into<String>) -> Self {
        Self::with_resolution(uid, 640, 480)
    }

    pub fn with_resolution(uid: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            uid: uid.into(),
            width,
            height,
            has_shutter: true,
            readout: Duration::from_millis(10),
            ramp_time: Duration::from_millis(200),
            connect_delay: Duration::ZERO,
            state: RwLock::new(SimulatedState {
                connected: false,
                shutter_open: false,
                ramp: Ramp {
                    from: AMBIENT_TEMPERATURE,
                    target: AMBIENT_TEMPERATURE,
                    started: Instant::now(),
                },
                area: ImageArea::full(width, height),
                binning: Binning::default(),
                frame_count: 0,
                connect_count: 0,
                shutter_moves: 0,
                last_params: Map::new(),
            }),
            faults: Mutex::new(SimulatedFaults::default()),
        }
    }

    pub fn with_shutter(mut self, has_shutter: bool) -> Self {
        self.has_shutter = has_shutter;
        self
    }

    /// Time the cooler takes to reach a new set point.
    pub fn with_ramp_time(mut self, ramp_time: Duration) -> Self {
        self.ramp_time = ramp_time;
        self
    }

    /// Extra time spent in `connect`, to widen race windows in tests.
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn set_faults(&self, faults: SimulatedFaults) {
        *self.faults.lock() = faults;
    }

    pub async fn is_connected(&self) -> bool {
        self.state.read().await.connected
    }

    /// Total frames produced since creation.
    pub async fn frame_count(&self) -> u32 {
        self.state.read().await.frame_count
    }

    /// Number of successful device connects.
    pub async fn connect_count(&self) -> u32 {
        self.state.read().await.connect_count
    }

    /// Number of physical shutter movements.
    pub async fn shutter_moves(&self) -> u32 {
        self.state.read().await.shutter_moves
    }

    /// Parameters passed to the most recent connect.
    pub async fn last_params(&self) -> Map<String, Value> {
        self.state.read().await.last_params.clone()
    }

    fn faults(&self) -> SimulatedFaults {
        self.faults.lock().clone()
    }

    fn temperature_at(&self, ramp: &Ramp, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(ramp.started);
        if self.ramp_time.is_zero() || elapsed >= self.ramp_time {
            return ramp.target;
        }
        let fraction = elapsed.as_secs_f64() / self.ramp_time.as_secs_f64();
        ramp.from + (ramp.target - ramp.from) * fraction
    }

    async fn ensure_connected(&self) -> Result<()> {
        if !self.state.read().await.connected {
            bail!("SimulatedCamera {}: device is not open", self.uid);
        }
        Ok(())
    }
}

/// Pixel value of frame `frame` at column `x`, row `y`.
fn pixel(frame: u32, x: usize, y: usize) -> u16 {
    let value = 100 * u64::from(frame) + ((x + y) % 7) as u64;
    u16::try_from(value).unwrap_or(u16::MAX)
}

#[async_trait]
impl CameraDriver for SimulatedCamera {
    async fn connect(&self, params: &Map<String, Value>) -> Result<()> {
        if !self.connect_delay.is_zero() {
            sleep(self.connect_delay).await;
        }
        if self.faults().fail_connect {
            bail!("SimulatedCamera {}: connection refused", self.uid);
        }

        let mut state = self.state.write().await;
        state.connected = true;
        state.connect_count += 1;
        state.last_params = params.clone();
        debug!(uid = %self.uid, "SimulatedCamera: opened");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if self.faults().fail_disconnect {
            bail!("SimulatedCamera {}: device busy", self.uid);
        }
        self.state.write().await.connected = false;
        debug!(uid = %self.uid, "SimulatedCamera: closed");
        Ok(())
    }

    async fn status(&self) -> Result<Map<String, Value>> {
        let state = self.state.read().await;
        let temperature = self.temperature_at(&state.ramp, Instant::now());

        let mut status = Map::new();
        status.insert("connected".into(), state.connected.into());
        status.insert("temperature".into(), temperature.into());
        status.insert("set_point".into(), state.ramp.target.into());
        status.insert("shutter_open".into(), state.shutter_open.into());
        status.insert("frames".into(), state.frame_count.into());
        status.insert(
            "binning".into(),
            serde_json::to_value(state.binning).context("serializing binning")?,
        );
        status.insert(
            "area".into(),
            serde_json::to_value(state.area).context("serializing image area")?,
        );
        Ok(status)
    }

    async fn expose(
        &self,
        camera: &Camera,
        exposure: &mut Exposure,
        _params: &Map<String, Value>,
    ) -> Result<()> {
        self.ensure_connected().await?;
        let faults = self.faults();
        let integration = Duration::try_from_secs_f64(exposure.exptime)
            .with_context(|| format!("invalid exposure time {}", exposure.exptime))?;

        let use_shutter = self.has_shutter
            && camera.config().auto_shutter
            && exposure.image_type.is_illuminated();

        camera.notify(CameraEvent::ExposureFlushing, camera.payload());
        if use_shutter {
            camera.open_shutter().await?;
        }

        sleep(integration).await;

        if use_shutter {
            camera.close_shutter().await?;
        }
        camera.notify(CameraEvent::ExposureReading, camera.payload());
        sleep(self.readout).await;

        if faults.fail_expose {
            bail!("SimulatedCamera {}: readout timed out", self.uid);
        }
        if faults.no_data {
            return Ok(());
        }

        let mut state = self.state.write().await;
        state.frame_count += 1;
        let frame = state.frame_count;
        let rows = (state.area.height() / state.binning.vertical).max(1) as usize;
        let cols = (state.area.width() / state.binning.horizontal).max(1) as usize;
        drop(state);

        exposure.data = Some(PixelData::U16(Array2::from_shape_fn(
            (rows, cols),
            |(y, x)| pixel(frame, x, y),
        )));
        exposure.add_header("SIMFRAME", frame, Some("Simulated frame number"));
        Ok(())
    }

    async fn post_process(&self, _camera: &Camera, mut exposure: Exposure) -> Result<Exposure> {
        if self.faults().fail_post_process {
            return Err(anyhow!("SimulatedCamera {}: post-processing crashed", self.uid));
        }
        exposure.add_header("SIMPROC", true, Some("Processed by the simulator"));
        Ok(exposure)
    }

    fn uid(&self) -> Option<String> {
        Some(self.uid.clone())
    }

    fn as_shutter(&self) -> Option<&dyn ShutterControl> {
        if self.has_shutter {
            Some(self)
        } else {
            None
        }
    }

    fn as_cooler(&self) -> Option<&dyn CoolerControl> {
        Some(self)
    }

    fn as_image_area(&self) -> Option<&dyn ImageAreaControl> {
        Some(self)
    }
}

#[async_trait]
impl ShutterControl for SimulatedCamera {
    async fn set_shutter(&self, open: bool) -> Result<()> {
        self.ensure_connected().await?;
        let mut state = self.state.write().await;
        state.shutter_open = open;
        state.shutter_moves += 1;
        debug!(uid = %self.uid, open, "SimulatedCamera: shutter moved");
        Ok(())
    }

    async fn get_shutter(&self) -> Result<bool> {
        Ok(self.state.read().await.shutter_open)
    }
}

#[async_trait]
impl CoolerControl for SimulatedCamera {
    async fn set_temperature(&self, temperature: f64) -> Result<()> {
        self.ensure_connected().await?;
        let mut state = self.state.write().await;
        let now = Instant::now();
        let from = self.temperature_at(&state.ramp, now);
        state.ramp = Ramp {
            from,
            target: temperature,
            started: now,
        };
        Ok(())
    }

    async fn get_temperature(&self) -> Result<f64> {
        let state = self.state.read().await;
        Ok(self.temperature_at(&state.ramp, Instant::now()))
    }
}

#[async_trait]
impl ImageAreaControl for SimulatedCamera {
    async fn get_image_area(&self) -> Result<ImageArea> {
        Ok(self.state.read().await.area)
    }

    async fn set_image_area(&self, area: Option<ImageArea>) -> Result<()> {
        let area = area.unwrap_or_else(|| ImageArea::full(self.width, self.height));
        if area.x1 > self.width || area.y1 > self.height {
            bail!(
                "SimulatedCamera {}: image area {} exceeds the {}x{} sensor",
                self.uid,
                area,
                self.width,
                self.height
            );
        }
        self.state.write().await.area = area;
        Ok(())
    }

    async fn get_binning(&self) -> Result<Binning> {
        Ok(self.state.read().await.binning)
    }

    async fn set_binning(&self, binning: Binning) -> Result<()> {
        self.state.write().await.binning = binning;
        Ok(())
    }
}

// =============================================================================
// SimulatedBackend - Simulated Vendor Library
// =============================================================================

/// Simulated vendor library.
///
/// Devices can be plugged and unplugged at runtime. Drivers are created on
/// demand and kept, so tests can reach the driver behind a camera with
/// [`SimulatedBackend::driver`].
pub struct SimulatedBackend {
    available: Mutex<Vec<String>>,
    listing: bool,
    template: Mutex<Box<dyn Fn(&str) -> SimulatedCamera + Send + Sync>>,
    drivers: Mutex<HashMap<String, Arc<SimulatedCamera>>>,
}

impl SimulatedBackend {
    pub fn new<I, S>(available: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            available: Mutex::new(available.into_iter().map(Into::into).collect()),
            listing: true,
            template: Mutex::new(Box::new(|uid: &str| SimulatedCamera::new(uid))),
            drivers: Mutex::new(HashMap::new()),
        }
    }

    /// A backend that cannot enumerate devices.
    pub fn without_listing() -> Self {
        Self {
            listing: false,
            ..Self::new(Vec::<String>::new())
        }
    }

    /// Customizes drivers created from now on.
    pub fn with_template<F>(self, template: F) -> Self
    where
        F: Fn(&str) -> SimulatedCamera + Send + Sync + 'static,
    {
        *self.template.lock() = Box::new(template);
        self
    }

    pub fn plug(&self, uid: &str) {
        let mut available = self.available.lock();
        if !available.iter().any(|known| known == uid) {
            available.push(uid.to_string());
        }
    }

    pub fn unplug(&self, uid: &str) {
        self.available.lock().retain(|known| known != uid);
    }

    /// The driver created for `uid`, if any.
    pub fn driver(&self, uid: &str) -> Option<Arc<SimulatedCamera>> {
        self.drivers.lock().get(uid).cloned()
    }
}

#[async_trait]
impl CameraBackend for SimulatedBackend {
    fn version(&self) -> String {
        SIMULATED_VERSION.to_string()
    }

    async fn list_available_cameras(&self) -> Result<CameraListing> {
        if !self.listing {
            return Ok(CameraListing::Unsupported);
        }
        Ok(CameraListing::Supported(self.available.lock().clone()))
    }

    fn create_driver(&self, config: &CameraConfig) -> Result<Arc<dyn CameraDriver>> {
        let driver: Arc<dyn CameraDriver> = self
            .drivers
            .lock()
            .entry(config.uid.clone())
            .or_insert_with(|| {
                let camera = (self.template.lock())(&config.uid);
                Arc::new(camera.with_shutter(config.shutter))
            })
            .clone();
        Ok(driver)
    }
}
