//! Camera collection configuration using Figment
//!
//! Configuration is loaded from:
//! 1. A TOML file (base configuration)
//! 2. Environment variables (prefixed with `RUSTCAM_`, nested keys split on `__`)
//!
//! ```toml
//! [collection]
//! name = "spectrograph"
//! poll_interval = "1s"
//! exclude = ["DEV_BROKEN"]
//!
//! [cameras.guider]
//! uid = "DEV_12345"
//! shutter = true
//!
//! [cameras.guider.connection_params]
//! address = "192.168.1.20"
//!
//! [cameras.guider.image_namer]
//! dirname = "/data/{mjd}"
//! ```
//!
//! ```text
//! RUSTCAM_COLLECTION__LOG_LEVEL=debug
//! RUSTCAM_CAMERAS__GUIDER__AUTOCONNECT=false
//! ```
//!
//! Individual calls can override stored camera settings with
//! [`CameraOverrides`]. The precedence is explicit call argument, then per-call
//! override, then stored configuration, then the defaults below.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level configuration for a camera collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionConfig {
    #[serde(default)]
    pub collection: CollectionSettings,
    /// Camera entries keyed by camera name.
    #[serde(default)]
    pub cameras: BTreeMap<String, CameraConfig>,
}

/// Collection-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionSettings {
    #[serde(default = "default_collection_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Interval between discovery checks.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    /// If set, discovery only adds these unique ids.
    #[serde(default)]
    pub include: Option<Vec<String>>,
    /// Unique ids that discovery never adds.
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl Default for CollectionSettings {
    fn default() -> Self {
        Self {
            name: default_collection_name(),
            log_level: default_log_level(),
            poll_interval: default_poll_interval(),
            include: None,
            exclude: Vec::new(),
        }
    }
}

/// Configuration for one camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Filled from the table key when loaded from a file.
    #[serde(default)]
    pub name: String,
    pub uid: String,
    /// `None` means the collection default (connect on add).
    #[serde(default)]
    pub autoconnect: Option<bool>,
    #[serde(default)]
    pub shutter: bool,
    /// Open and close the shutter around each exposure.
    #[serde(default)]
    pub auto_shutter: bool,
    /// Vendor-specific connection parameters passed to the driver.
    #[serde(default)]
    pub connection_params: Map<String, Value>,
    #[serde(default)]
    pub image_namer: ImageNamerConfig,
    #[serde(default)]
    pub cooler: CoolerConfig,
    #[serde(default)]
    pub write: WriteConfig,
}

impl CameraConfig {
    /// A default entry for a camera only known by its unique id.
    pub fn for_uid(uid: &str) -> Self {
        Self {
            name: uid.to_string(),
            uid: uid.to_string(),
            autoconnect: None,
            shutter: false,
            auto_shutter: false,
            connection_params: Map::new(),
            image_namer: ImageNamerConfig::default(),
            cooler: CoolerConfig::default(),
            write: WriteConfig::default(),
        }
    }

    pub fn autoconnect(&self) -> bool {
        self.autoconnect.unwrap_or(true)
    }

    /// Returns a copy with `overrides` applied on top.
    pub fn merged(&self, overrides: &CameraOverrides) -> Self {
        let mut config = self.clone();
        if let Some(name) = &overrides.name {
            config.name = name.clone();
        }
        if overrides.autoconnect.is_some() {
            config.autoconnect = overrides.autoconnect;
        }
        if let Some(shutter) = overrides.shutter {
            config.shutter = shutter;
        }
        if let Some(auto_shutter) = overrides.auto_shutter {
            config.auto_shutter = auto_shutter;
        }
        for (key, value) in &overrides.connection_params {
            config.connection_params.insert(key.clone(), value.clone());
        }
        if let Some(namer) = &overrides.image_namer {
            config.image_namer = namer.clone();
        }
        if let Some(cooler) = &overrides.cooler {
            config.cooler = cooler.clone();
        }
        if let Some(write) = &overrides.write {
            config.write = write.clone();
        }
        config
    }
}

/// Per-call overrides for a stored [`CameraConfig`].
#[derive(Debug, Clone, Default)]
pub struct CameraOverrides {
    pub name: Option<String>,
    pub autoconnect: Option<bool>,
    pub shutter: Option<bool>,
    pub auto_shutter: Option<bool>,
    /// Merged key by key into the stored connection parameters.
    pub connection_params: Map<String, Value>,
    pub image_namer: Option<ImageNamerConfig>,
    pub cooler: Option<CoolerConfig>,
    pub write: Option<WriteConfig>,
}

impl CameraOverrides {
    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.connection_params.insert(key.to_string(), value.into());
        self
    }
}

/// Output file naming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageNamerConfig {
    /// Must contain a `{num}` placeholder, optionally padded as `{num:04}`.
    #[serde(default = "default_basename")]
    pub basename: String,
    #[serde(default = "default_dirname")]
    pub dirname: String,
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default = "default_true")]
    pub reset_sequence: bool,
}

impl Default for ImageNamerConfig {
    fn default() -> Self {
        Self {
            basename: default_basename(),
            dirname: default_dirname(),
            overwrite: false,
            reset_sequence: true,
        }
    }
}

/// Cooler set-point tracking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoolerConfig {
    /// Degrees within which the set point counts as reached.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default = "default_cooler_poll", with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for CoolerConfig {
    fn default() -> Self {
        Self {
            tolerance: default_tolerance(),
            poll_interval: default_cooler_poll(),
        }
    }
}

/// Disk write behaviour for exposures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteConfig {
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default)]
    pub checksum: bool,
    #[serde(default = "default_true")]
    pub retry: bool,
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self {
            overwrite: false,
            checksum: false,
            retry: true,
        }
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_collection_name() -> String {
    "cameras".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_basename() -> String {
    "{name}-{num:04}.fits".to_string()
}

fn default_dirname() -> String {
    ".".to_string()
}

fn default_tolerance() -> f64 {
    0.1
}

fn default_cooler_poll() -> Duration {
    Duration::from_millis(500)
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl CollectionConfig {
    /// Load configuration from a TOML file and `RUSTCAM_` environment variables.
    ///
    /// Environment variables take precedence over the file. The result is
    /// validated before it is returned.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::extract(
            Figment::new()
                .merge(Toml::file(path.as_ref()))
                .merge(Env::prefixed("RUSTCAM_").split("__")),
        )
    }

    /// Parse configuration from a TOML string. Environment variables are not
    /// consulted.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Self::extract(Figment::new().merge(Toml::string(toml)))
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let mut config: Self = figment.extract().map_err(ConfigError::LoadError)?;
        for (name, camera) in config.cameras.iter_mut() {
            camera.name = name.clone();
        }
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from camera entries, keyed by their names.
    pub fn from_cameras(cameras: impl IntoIterator<Item = CameraConfig>) -> Result<Self, ConfigError> {
        let config = Self {
            collection: CollectionSettings::default(),
            cameras: cameras
                .into_iter()
                .map(|camera| (camera.name.clone(), camera))
                .collect(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Poll interval is non-zero
    /// - Camera unique ids are present and unique
    /// - Image name templates carry a `{num}` placeholder
    /// - Include and exclude filters do not overlap
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.collection.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.collection.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.collection.poll_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "poll_interval must be greater than zero".to_string(),
            ));
        }

        let mut uids = HashSet::new();
        for (name, camera) in &self.cameras {
            if camera.uid.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "Camera '{}': 'uid' cannot be empty",
                    name
                )));
            }
            if !uids.insert(camera.uid.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate camera uid: '{}'",
                    camera.uid
                )));
            }
            if !camera.image_namer.basename.contains("{num") {
                return Err(ConfigError::ValidationError(format!(
                    "Camera '{}': image basename must contain a {{num}} placeholder",
                    name
                )));
            }
            if camera.cooler.tolerance <= 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "Camera '{}': cooler tolerance must be positive",
                    name
                )));
            }
        }

        if let Some(include) = &self.collection.include {
            if let Some(uid) = include.iter().find(|uid| self.collection.exclude.contains(uid)) {
                return Err(ConfigError::ValidationError(format!(
                    "uid '{}' is both included and excluded",
                    uid
                )));
            }
        }

        Ok(())
    }

    pub fn camera_by_name(&self, name: &str) -> Option<&CameraConfig> {
        self.cameras.get(name)
    }

    pub fn camera_by_uid(&self, uid: &str) -> Option<&CameraConfig> {
        self.cameras.values().find(|camera| camera.uid == uid)
    }
}
