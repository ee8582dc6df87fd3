//! Exposures: one capture's pixels and metadata, plus the disk write path.
//!
//! An [`Exposure`] is created fresh by the camera for every capture attempt and
//! handed to the driver, which fills in [`Exposure::data`]. Producing the file
//! is delegated to an [`ExposureRenderer`]; the default is [`FitsRenderer`].

pub mod fits;
pub mod namer;

pub use fits::FitsRenderer;
pub use namer::ImageNamer;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::WriteConfig;
use crate::error::{CameraError, CameraResult};
use crate::retry::{retry_async, RetryPolicy};

/// The closed set of image types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    Bias,
    Dark,
    Flat,
    #[default]
    Object,
}

impl ImageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageType::Bias => "bias",
            ImageType::Dark => "dark",
            ImageType::Flat => "flat",
            ImageType::Object => "object",
        }
    }

    /// Whether light reaches the detector for this image type.
    pub fn is_illuminated(&self) -> bool {
        matches!(self, ImageType::Flat | ImageType::Object)
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageType {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bias" => Ok(ImageType::Bias),
            "dark" => Ok(ImageType::Dark),
            "flat" => Ok(ImageType::Flat),
            "object" => Ok(ImageType::Object),
            other => Err(CameraError::Configuration(format!(
                "invalid image type '{other}'"
            ))),
        }
    }
}

/// Element-wise reduction used to combine stacked frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StackFunction {
    #[default]
    Median,
    Mean,
    Sum,
    Min,
    Max,
}

impl StackFunction {
    /// Identifier recorded in the exposure header.
    pub fn name(&self) -> &'static str {
        match self {
            StackFunction::Median => "median",
            StackFunction::Mean => "mean",
            StackFunction::Sum => "sum",
            StackFunction::Min => "min",
            StackFunction::Max => "max",
        }
    }

    /// Combines frames of identical shape pixel by pixel.
    pub fn combine(&self, frames: &[Array2<f32>]) -> anyhow::Result<Array2<f32>> {
        let first = frames.first().ok_or_else(|| anyhow!("no frames to combine"))?;
        let shape = first.dim();
        if frames.iter().any(|frame| frame.dim() != shape) {
            bail!("cannot combine frames with different shapes");
        }

        let mut values = Vec::with_capacity(frames.len());
        Ok(Array2::from_shape_fn(shape, |index| {
            values.clear();
            values.extend(frames.iter().map(|frame| frame[index]));
            self.reduce(&mut values)
        }))
    }

    fn reduce(&self, values: &mut [f32]) -> f32 {
        let n = values.len();
        match self {
            StackFunction::Median => {
                values.sort_by(f32::total_cmp);
                if n % 2 == 1 {
                    values[n / 2]
                } else {
                    (values[n / 2 - 1] + values[n / 2]) / 2.0
                }
            }
            StackFunction::Mean => values.iter().sum::<f32>() / n as f32,
            StackFunction::Sum => values.iter().sum(),
            StackFunction::Min => values.iter().copied().fold(f32::INFINITY, f32::min),
            StackFunction::Max => values.iter().copied().fold(f32::NEG_INFINITY, f32::max),
        }
    }
}

impl FromStr for StackFunction {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "median" => Ok(StackFunction::Median),
            "mean" => Ok(StackFunction::Mean),
            "sum" => Ok(StackFunction::Sum),
            "min" => Ok(StackFunction::Min),
            "max" => Ok(StackFunction::Max),
            other => Err(CameraError::Configuration(format!(
                "invalid stack function '{other}'"
            ))),
        }
    }
}

/// Pixel storage. Raw frames are `U16`; stacked frames become `F32`.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelData {
    U16(Array2<u16>),
    F32(Array2<f32>),
}

impl PixelData {
    /// `(rows, columns)`.
    pub fn shape(&self) -> (usize, usize) {
        match self {
            PixelData::U16(data) => data.dim(),
            PixelData::F32(data) => data.dim(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            PixelData::U16(data) => data.is_empty(),
            PixelData::F32(data) => data.is_empty(),
        }
    }

    pub fn to_f32(&self) -> Array2<f32> {
        match self {
            PixelData::U16(data) => data.mapv(f32::from),
            PixelData::F32(data) => data.clone(),
        }
    }
}

/// An extra header keyword attached by a driver or post-process hook.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderCard {
    pub keyword: String,
    pub value: Value,
    pub comment: Option<String>,
}

/// Writes an exposure in some on-disk format.
///
/// Implementations are blocking and run on the blocking thread pool. `path`
/// is a fresh scratch file in the destination directory that the caller
/// moves into place once `write` returns successfully. It may already exist
/// and may be overwritten.
pub trait ExposureRenderer: Send + Sync {
    fn write(&self, exposure: &Exposure, path: &Path, checksum: bool) -> anyhow::Result<()>;

    /// Conventional file extension, without the dot.
    fn extension(&self) -> &str {
        "fits"
    }
}

/// One capture's data and metadata.
#[derive(Clone)]
pub struct Exposure {
    camera_name: String,
    camera_uid: String,
    /// Absent until the driver's capture step succeeds.
    pub data: Option<PixelData>,
    /// Exposure time of a single integration, in seconds.
    pub exptime: f64,
    /// `exptime` times the number of stacked frames.
    pub exptime_total: f64,
    pub stack: u32,
    pub stack_function: Option<StackFunction>,
    pub image_type: ImageType,
    pub obstime: DateTime<Utc>,
    pub path: Option<PathBuf>,
    pub headers: Vec<HeaderCard>,
    renderer: Arc<dyn ExposureRenderer>,
}

impl Exposure {
    pub fn new(
        camera_name: &str,
        camera_uid: &str,
        exptime: f64,
        image_type: ImageType,
        renderer: Arc<dyn ExposureRenderer>,
    ) -> Self {
        Self {
            camera_name: camera_name.to_string(),
            camera_uid: camera_uid.to_string(),
            data: None,
            exptime,
            exptime_total: exptime,
            stack: 1,
            stack_function: None,
            image_type,
            obstime: Utc::now(),
            path: None,
            headers: Vec::new(),
            renderer,
        }
    }

    pub fn camera_name(&self) -> &str {
        &self.camera_name
    }

    pub fn camera_uid(&self) -> &str {
        &self.camera_uid
    }

    /// Whether the capture step produced usable pixels.
    pub fn has_data(&self) -> bool {
        self.data.as_ref().map_or(false, |data| !data.is_empty())
    }

    pub fn add_header(&mut self, keyword: &str, value: impl Into<Value>, comment: Option<&str>) {
        self.headers.push(HeaderCard {
            keyword: keyword.to_string(),
            value: value.into(),
            comment: comment.map(str::to_string),
        });
    }

    /// Writes the exposure to disk and returns the absolute path written.
    ///
    /// `path` takes precedence over [`Exposure::path`]. The file is produced
    /// under a temporary name in the destination directory and only moved into
    /// place when complete, so a failed attempt leaves nothing behind. With
    /// `options.retry` a failed attempt is retried exactly once.
    pub async fn write(&mut self, path: Option<PathBuf>, options: &WriteConfig) -> CameraResult<PathBuf> {
        let path = path
            .or_else(|| self.path.clone())
            .filter(|path| !path.as_os_str().is_empty())
            .ok_or_else(|| CameraError::Write("exposure has no output path".to_string()))?;
        let path = std::path::absolute(&path).map_err(|err| {
            CameraError::Write(format!("invalid output path {}: {err}", path.display()))
        })?;
        self.path = Some(path.clone());

        let policy = if options.retry {
            RetryPolicy::once()
        } else {
            RetryPolicy::none()
        };

        let this = &*self;
        let target = path.as_path();
        retry_async(&policy, "writing exposure to disk", move || this.write_once(target, options))
            .await
            .map_err(|err| {
                CameraError::Write(format!(
                    "failed writing exposure to {}: {:#}",
                    path.display(),
                    err
                ))
            })?;

        Ok(path)
    }

    async fn write_once(&self, path: &Path, options: &WriteConfig) -> anyhow::Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow!("{} has no parent directory", path.display()))?
            .to_path_buf();
        tokio::fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;

        let exposure = self.clone();
        let target = path.to_path_buf();
        let overwrite = options.overwrite;
        let checksum = options.checksum;
        tokio::task::spawn_blocking(move || {
            let scratch = tempfile::Builder::new()
                .prefix(".")
                .suffix(".partial")
                .tempfile_in(&parent)
                .with_context(|| format!("creating scratch file in {}", parent.display()))?
                .into_temp_path();

            exposure
                .renderer
                .write(&exposure, &scratch, checksum)
                .context("rendering exposure")?;

            let persisted = if overwrite {
                scratch.persist(&target)
            } else {
                scratch.persist_noclobber(&target)
            };
            persisted
                .map_err(|err| err.error)
                .with_context(|| format!("moving exposure into place at {}", target.display()))
        })
        .await
        .context("write task failed")?
    }
}

impl fmt::Debug for Exposure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exposure")
            .field("camera", &self.camera_name)
            .field("shape", &self.data.as_ref().map(PixelData::shape))
            .field("exptime", &self.exptime)
            .field("exptime_total", &self.exptime_total)
            .field("stack", &self.stack)
            .field("stack_function", &self.stack_function)
            .field("image_type", &self.image_type)
            .field("obstime", &self.obstime)
            .field("path", &self.path)
            .finish()
    }
}
