//! Core library for the rust_camera framework.
//!
//! This library provides a vendor-neutral camera layer for instrument control
//! software. Vendor integrations implement [`CameraBackend`] and
//! [`CameraDriver`]; the framework supplies everything else:
//!
//! - [`CameraCollection`]: registry of live cameras with optional discovery
//! - [`Camera`]: connection state machine, exposure pipeline and the shutter,
//!   cooler and image-area capabilities
//! - [`Notifier`] / [`Listener`]: asynchronous event delivery with filtering
//!   and waiting
//! - [`Poller`]: a restartable periodic task
//! - [`Exposure`]: captured images with FITS output and sequential naming
//!
//! A [`simulated`] backend allows running everything without hardware.

pub mod camera;
pub mod collection;
pub mod config;
pub mod error;
pub mod events;
pub mod exposure;
pub mod logging;
pub mod notifier;
pub mod poller;
pub mod retry;
pub mod simulated;
pub mod tasks;

pub use camera::{
    Binning, Camera, CameraBackend, CameraDriver, CameraListing, Capability, ExposeOptions,
    ImageArea, SetPointOutcome,
};
pub use collection::{AddCameraOptions, CameraCollection, CameraQuery};
pub use config::{CameraConfig, CameraOverrides, CollectionConfig, ConfigError};
pub use error::{CameraError, CameraResult};
pub use events::{CameraEvent, CameraSystemEvent, Event, Payload};
pub use exposure::{Exposure, ImageType, PixelData, StackFunction};
pub use notifier::{Callback, CallbackId, Listener, Notifier};
pub use poller::Poller;
