//! Sequential output file names.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::config::ImageNamerConfig;
use crate::error::{CameraError, CameraResult};

/// Matches `{num}` or `{num:04}`.
static NUM_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"\{num(?::0?(\d+))?\}").unwrap()
});

/// Days between the MJD epoch (1858-11-17) and the Unix epoch.
const MJD_UNIX_EPOCH: i64 = 40_587;

/// Generates the next unique output path for a camera.
///
/// The basename may use `{name}`, `{uid}` and must contain `{num}` (optionally
/// zero padded, `{num:04}`). The dirname may use `{name}`, `{uid}`, `{date}`
/// (UTC `YYYYMMDD`) and `{mjd}`. Unless `overwrite` is set, numbering continues
/// after the highest sequence number already present in the directory.
#[derive(Debug, Clone)]
pub struct ImageNamer {
    config: ImageNamerConfig,
    last_num: u32,
    previous_dirname: Option<PathBuf>,
}

impl ImageNamer {
    pub fn new(config: ImageNamerConfig) -> Self {
        Self {
            config,
            last_num: 0,
            previous_dirname: None,
        }
    }

    pub fn config(&self) -> &ImageNamerConfig {
        &self.config
    }

    pub fn last_num(&self) -> u32 {
        self.last_num
    }

    /// Returns the next path and records its sequence number.
    ///
    /// An explicit `num` bypasses the directory scan. Fails with a write error
    /// once the sequence number cannot be incremented any further.
    pub async fn next_path(&mut self, name: &str, uid: &str, num: Option<u32>) -> CameraResult<PathBuf> {
        let now = Utc::now();
        let dirname = self.dirname(name, uid, now);
        let basename = expand(&self.config.basename, name, uid, now);

        let num = match num {
            Some(num) => num,
            None => self.next_num(&dirname, &basename).await?,
        };
        self.last_num = num;

        let path = dirname.join(format_num(&basename, num));
        debug!(camera = %name, path = %path.display(), "Generated image name");
        Ok(path)
    }

    fn dirname(&mut self, name: &str, uid: &str, now: DateTime<Utc>) -> PathBuf {
        let dirname = PathBuf::from(expand(&self.config.dirname, name, uid, now));
        if let Some(previous) = &self.previous_dirname {
            if *previous != dirname && self.config.reset_sequence {
                self.last_num = 0;
            }
        }
        self.previous_dirname = Some(dirname.clone());
        dirname
    }

    async fn next_num(&self, dirname: &Path, basename: &str) -> CameraResult<u32> {
        let last = if self.config.overwrite {
            self.last_num
        } else {
            existing_numbers(dirname, basename)
                .await?
                .into_iter()
                .max()
                .unwrap_or(self.last_num)
        };
        last.checked_add(1).ok_or_else(|| {
            CameraError::Write(format!(
                "image sequence in {} is exhausted at {}",
                dirname.display(),
                last
            ))
        })
    }
}

impl Default for ImageNamer {
    fn default() -> Self {
        Self::new(ImageNamerConfig::default())
    }
}

fn expand(template: &str, name: &str, uid: &str, now: DateTime<Utc>) -> String {
    let mjd = now.timestamp().div_euclid(86_400) + MJD_UNIX_EPOCH;
    template
        .replace("{name}", name)
        .replace("{uid}", uid)
        .replace("{date}", &now.format("%Y%m%d").to_string())
        .replace("{mjd}", &mjd.to_string())
}

fn format_num(basename: &str, num: u32) -> String {
    NUM_PLACEHOLDER
        .replace(basename, |caps: &regex::Captures| {
            let width = caps
                .get(1)
                .and_then(|w| w.as_str().parse::<usize>().ok())
                .unwrap_or(0);
            format!("{:0width$}", num, width = width)
        })
        .into_owned()
}

/// Sequence numbers of files in `dirname` that match `basename`.
///
/// A directory that does not exist yet holds no numbers.
async fn existing_numbers(dirname: &Path, basename: &str) -> CameraResult<Vec<u32>> {
    let Some(placeholder) = NUM_PLACEHOLDER.find(basename) else {
        return Ok(Vec::new());
    };
    let pattern = format!(
        "^{}([0-9]+){}$",
        regex::escape(&basename[..placeholder.start()]),
        regex::escape(&basename[placeholder.end()..])
    );
    let regex = Regex::new(&pattern)
        .map_err(|err| CameraError::Configuration(format!("invalid image basename: {err}")))?;

    let mut entries = match tokio::fs::read_dir(dirname).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut numbers = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        // Numbers too large for u32 are not ours.
        if let Some(num) = regex
            .captures(file_name)
            .and_then(|caps| caps.get(1))
            .and_then(|num| num.as_str().parse().ok())
        {
            numbers.push(num);
        }
    }
    Ok(numbers)
}
