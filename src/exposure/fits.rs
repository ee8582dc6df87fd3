//! Single-HDU FITS output via `fitsio`.
//!
//! The image goes into the primary HDU. Raw `u16` frames use cfitsio's
//! unsigned-short convention (`BITPIX = 16`, `BZERO = 32768`); stacked frames
//! are stored as `BITPIX = -32`.

use std::path::Path;

use anyhow::{anyhow, bail, Context};
use fitsio::hdu::FitsHdu;
use fitsio::images::{ImageDescription, ImageType};
use fitsio::FitsFile;
use serde_json::Value;

use super::{Exposure, ExposureRenderer, PixelData};

/// Writes exposures as FITS files.
#[derive(Debug, Clone, Copy, Default)]
pub struct FitsRenderer;

impl ExposureRenderer for FitsRenderer {
    fn write(&self, exposure: &Exposure, path: &Path, checksum: bool) -> anyhow::Result<()> {
        let data = exposure
            .data
            .as_ref()
            .ok_or_else(|| anyhow!("exposure has no data to write"))?;
        let (rows, columns) = data.shape();

        let description = ImageDescription {
            data_type: match data {
                PixelData::U16(_) => ImageType::UnsignedShort,
                PixelData::F32(_) => ImageType::Float,
            },
            dimensions: &[rows, columns],
        };

        let mut fptr = FitsFile::create(path)
            .with_custom_primary(&description)
            .overwrite()
            .open()
            .with_context(|| format!("creating FITS file {}", path.display()))?;
        let hdu = fptr.primary_hdu().context("opening primary HDU")?;

        match data {
            PixelData::U16(pixels) => {
                let flat: Vec<u16> = pixels.iter().copied().collect();
                hdu.write_image(&mut fptr, &flat)?;
            }
            PixelData::F32(pixels) => {
                let flat: Vec<f32> = pixels.iter().copied().collect();
                hdu.write_image(&mut fptr, &flat)?;
            }
        }

        write_cards(&mut fptr, &hdu, exposure).context("writing header cards")?;

        if checksum {
            write_checksum(&mut fptr)?;
        }
        Ok(())
    }
}

fn write_cards(fptr: &mut FitsFile, hdu: &FitsHdu, exposure: &Exposure) -> anyhow::Result<()> {
    hdu.write_key(fptr, "CAMNAME", exposure.camera_name().to_string())?;
    hdu.write_key(fptr, "CAMUID", exposure.camera_uid().to_string())?;
    hdu.write_key(fptr, "IMAGETYP", exposure.image_type.to_string())?;
    hdu.write_key(fptr, "EXPTIME", exposure.exptime)?;
    hdu.write_key(fptr, "EXPTIMEN", exposure.exptime_total)?;
    hdu.write_key(fptr, "STACK", i64::from(exposure.stack))?;
    if let Some(function) = exposure.stack_function {
        hdu.write_key(fptr, "STACKFUN", function.name().to_string())?;
    }
    hdu.write_key(
        fptr,
        "DATE-OBS",
        exposure.obstime.format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
    )?;

    for card in &exposure.headers {
        let keyword = card.keyword.to_ascii_uppercase();
        match &card.value {
            Value::Number(n) if n.is_i64() => {
                hdu.write_key(fptr, &keyword, n.as_i64().unwrap_or_default())?
            }
            Value::Number(n) => hdu.write_key(fptr, &keyword, n.as_f64().unwrap_or(f64::NAN))?,
            Value::Bool(b) => hdu.write_key(fptr, &keyword, if *b { "T" } else { "F" }.to_string())?,
            Value::String(s) => hdu.write_key(fptr, &keyword, s.clone())?,
            other => hdu.write_key(fptr, &keyword, other.to_string())?,
        }
    }
    Ok(())
}

/// Adds `CHECKSUM` and `DATASUM` to the current HDU.
#[allow(unsafe_code)]
fn write_checksum(fptr: &mut FitsFile) -> anyhow::Result<()> {
    let mut status = 0;
    // SAFETY: the pointer belongs to an open file that outlives this call.
    unsafe {
        fitsio::sys::ffpcks(fptr.as_raw(), &mut status);
    }
    if status != 0 {
        bail!("cfitsio failed to write checksum keywords (status {status})");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exposure::{ImageType, StackFunction};
    use ndarray::array;
    use std::sync::Arc;

    fn read_back(path: &Path) -> (FitsFile, FitsHdu) {
        let mut fptr = FitsFile::open(path).unwrap();
        let hdu = fptr.primary_hdu().unwrap();
        (fptr, hdu)
    }

    fn key_str(fptr: &mut FitsFile, hdu: &FitsHdu, key: &str) -> String {
        hdu.read_key::<String>(fptr, key).unwrap().trim_end().to_string()
    }

    #[test]
    fn test_write_u16_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.fits");

        let mut exposure = Exposure::new("cam1", "U1", 2.0, ImageType::Object, Arc::new(FitsRenderer));
        exposure.data = Some(PixelData::U16(array![[0, 1, 2], [3, 4, 65535]]));
        exposure.add_header("observer", "Vera O'Neil", Some("who took it"));
        exposure.add_header("AIRMASS", 1.25, None);

        FitsRenderer.write(&exposure, &path, false).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len() % 2880, 0);

        let (mut fptr, hdu) = read_back(&path);
        assert_eq!(hdu.read_key::<i64>(&mut fptr, "BITPIX").unwrap(), 16);
        assert_eq!(hdu.read_key::<f64>(&mut fptr, "BZERO").unwrap(), 32768.0);
        assert_eq!(hdu.read_key::<i64>(&mut fptr, "NAXIS1").unwrap(), 3);
        assert_eq!(hdu.read_key::<i64>(&mut fptr, "NAXIS2").unwrap(), 2);
        assert_eq!(key_str(&mut fptr, &hdu, "CAMNAME"), "cam1");
        assert_eq!(key_str(&mut fptr, &hdu, "IMAGETYP"), "object");
        assert_eq!(key_str(&mut fptr, &hdu, "OBSERVER"), "Vera O'Neil");
        assert_eq!(hdu.read_key::<f64>(&mut fptr, "EXPTIME").unwrap(), 2.0);
        assert_eq!(hdu.read_key::<f64>(&mut fptr, "AIRMASS").unwrap(), 1.25);
        assert!(hdu.read_key::<String>(&mut fptr, "STACKFUN").is_err());
        assert!(hdu.read_key::<String>(&mut fptr, "DATASUM").is_err());

        let pixels: Vec<u16> = hdu.read_image(&mut fptr).unwrap();
        assert_eq!(pixels, vec![0, 1, 2, 3, 4, 65535]);
    }

    #[test]
    fn test_write_stacked_frame_with_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stacked.fits");

        let mut exposure = Exposure::new("cam1", "U1", 1.0, ImageType::Flat, Arc::new(FitsRenderer));
        exposure.data = Some(PixelData::F32(array![[1.5, 2.5]]));
        exposure.stack = 2;
        exposure.exptime_total = 2.0;
        exposure.stack_function = Some(StackFunction::Median);

        FitsRenderer.write(&exposure, &path, true).unwrap();

        let (mut fptr, hdu) = read_back(&path);
        assert_eq!(hdu.read_key::<i64>(&mut fptr, "BITPIX").unwrap(), -32);
        assert_eq!(key_str(&mut fptr, &hdu, "STACKFUN"), "median");
        assert_eq!(hdu.read_key::<f64>(&mut fptr, "EXPTIMEN").unwrap(), 2.0);
        assert_eq!(hdu.read_key::<i64>(&mut fptr, "STACK").unwrap(), 2);
        assert!(hdu.read_key::<String>(&mut fptr, "CHECKSUM").is_ok());
        assert!(hdu.read_key::<String>(&mut fptr, "DATASUM").is_ok());
        assert!(hdu.read_key::<f64>(&mut fptr, "BZERO").is_err());

        let pixels: Vec<f32> = hdu.read_image(&mut fptr).unwrap();
        assert_eq!(pixels, vec![1.5, 2.5]);
    }

    #[test]
    fn test_write_without_data_fails() {
        let dir = tempfile::tempdir().unwrap();
        let exposure = Exposure::new("cam1", "U1", 1.0, ImageType::Bias, Arc::new(FitsRenderer));
        assert!(FitsRenderer
            .write(&exposure, &dir.path().join("empty.fits"), false)
            .is_err());
    }
}
