//! Optional device features: shutter, cooling and image-area control.
//!
//! Drivers advertise these through [`Capability`] and implement the matching
//! trait; the camera front-end adds events and logging around each call.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Optional operation sets a camera driver may implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Shutter,
    Cooler,
    ImageArea,
}

impl Capability {
    pub const ALL: [Capability; 3] = [Capability::Shutter, Capability::Cooler, Capability::ImageArea];
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Shutter => "shutter",
            Capability::Cooler => "cooler",
            Capability::ImageArea => "image area",
        };
        f.write_str(name)
    }
}

/// Capability for cameras with a mechanical shutter.
#[async_trait]
pub trait ShutterControl: Send + Sync {
    async fn set_shutter(&self, open: bool) -> Result<()>;
    /// `true` if the shutter is open.
    async fn get_shutter(&self) -> Result<bool>;
}

/// Capability for cameras with temperature control.
#[async_trait]
pub trait CoolerControl: Send + Sync {
    /// Commands a new set point in degrees Celsius. Returns once the command
    /// is accepted, not when the temperature is reached.
    async fn set_temperature(&self, temperature: f64) -> Result<()>;
    async fn get_temperature(&self) -> Result<f64>;
}

/// Capability for cameras with a configurable readout window and binning.
#[async_trait]
pub trait ImageAreaControl: Send + Sync {
    async fn get_image_area(&self) -> Result<ImageArea>;
    /// `None` restores the full frame.
    async fn set_image_area(&self, area: Option<ImageArea>) -> Result<()>;
    async fn get_binning(&self) -> Result<Binning>;
    async fn set_binning(&self, binning: Binning) -> Result<()>;
}

/// A readout window in 1-indexed, inclusive pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageArea {
    pub x0: u32,
    pub x1: u32,
    pub y0: u32,
    pub y1: u32,
}

impl ImageArea {
    pub fn new(x0: u32, x1: u32, y0: u32, y1: u32) -> Self {
        Self { x0, x1, y0, y1 }
    }

    /// The area covering a full `width` x `height` frame.
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(1, width, 1, height)
    }

    pub fn width(&self) -> u32 {
        self.x1.saturating_add(1).saturating_sub(self.x0)
    }

    pub fn height(&self) -> u32 {
        self.y1.saturating_add(1).saturating_sub(self.y0)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.x0 == 0 || self.y0 == 0 {
            return Err(format!("image area {self} is not 1-indexed"));
        }
        if self.x0 > self.x1 || self.y0 > self.y1 {
            return Err(format!("image area {self} has inverted corners"));
        }
        Ok(())
    }
}

impl fmt::Display for ImageArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {}, {})", self.x0, self.x1, self.y0, self.y1)
    }
}

/// Horizontal and vertical binning factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binning {
    pub horizontal: u32,
    pub vertical: u32,
}

impl Binning {
    pub fn new(horizontal: u32, vertical: u32) -> Self {
        Self {
            horizontal,
            vertical,
        }
    }
}

impl Default for Binning {
    fn default() -> Self {
        Self::new(1, 1)
    }
}
