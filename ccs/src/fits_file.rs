//! FITS frame files
//!
//! The simulated driver writes each window as a 16-bit primary image with
//! the exposure's header cards, and the pipeline side reads keywords back.
//! Both go through cfitsio by way of the `fitsio` crate.

use std::fs;
use std::path::Path;

use ccsmsg::{CcsError, CcsResult, FitsCard, FitsValue};
use fitsio::hdu::FitsHdu;
use fitsio::images::{ImageDescription, ImageType};
use fitsio::FitsFile;

/// Longest keyword written without the HIERARCH convention
const KEYWORD_LEN: usize = 8;

fn fits_error(path: &Path, e: fitsio::errors::Error) -> CcsError {
    CcsError::driver(format!("FITS {}: {}", path.display(), e))
}

/// Header keyword as written: upper case, at most eight characters
pub fn keyword(name: &str) -> String {
    name.to_ascii_uppercase().chars().take(KEYWORD_LEN).collect()
}

/// Write a `naxis1` by `naxis2` frame of `pixels`, replacing any existing file
pub fn write_frame(
    path: &Path,
    naxis1: usize,
    naxis2: usize,
    pixels: &[u16],
    cards: &[FitsCard],
) -> CcsResult<()> {
    if pixels.len() != naxis1 * naxis2 {
        return Err(CcsError::driver(format!(
            "{} pixels for a {}x{} frame",
            pixels.len(),
            naxis1,
            naxis2
        )));
    }

    let description = ImageDescription {
        data_type: ImageType::UnsignedShort,
        dimensions: &[naxis2, naxis1],
    };
    let mut fptr = FitsFile::create(path)
        .with_custom_primary(&description)
        .overwrite()
        .open()
        .map_err(|e| fits_error(path, e))?;
    let hdu = fptr.primary_hdu().map_err(|e| fits_error(path, e))?;
    hdu.write_image(&mut fptr, pixels)
        .map_err(|e| fits_error(path, e))?;

    for card in cards {
        write_card(&mut fptr, &hdu, card).map_err(|e| fits_error(path, e))?;
    }
    Ok(())
}

fn write_card(fptr: &mut FitsFile, hdu: &FitsHdu, card: &FitsCard) -> fitsio::errors::Result<()> {
    let name = keyword(&card.keyword);
    match &card.value {
        FitsValue::String(s) => hdu.write_key(fptr, &name, s.clone()),
        FitsValue::Int(i) => hdu.write_key(fptr, &name, *i),
        FitsValue::Float(f) => hdu.write_key(fptr, &name, *f),
        // Logical cards go out as T or F strings
        FitsValue::Bool(b) => hdu.write_key(fptr, &name, if *b { "T" } else { "F" }),
    }
}

/// An open frame, for reading header keywords
pub struct FrameFile {
    fptr: FitsFile,
    hdu: FitsHdu,
    name: String,
}

impl FrameFile {
    pub fn open(path: &Path) -> CcsResult<Self> {
        // A missing file is an io error, not a FITS one
        fs::metadata(path)?;
        let mut fptr = FitsFile::open(path).map_err(|e| fits_error(path, e))?;
        let hdu = fptr.primary_hdu().map_err(|e| fits_error(path, e))?;
        Ok(Self {
            fptr,
            hdu,
            name: path.display().to_string(),
        })
    }

    pub fn string(&mut self, name: &str) -> Option<String> {
        self.hdu.read_key::<String>(&mut self.fptr, name).ok()
    }

    pub fn float(&mut self, name: &str) -> CcsResult<f64> {
        self.hdu
            .read_key::<f64>(&mut self.fptr, name)
            .map_err(|_| self.missing(name))
    }

    pub fn int(&mut self, name: &str) -> CcsResult<i64> {
        self.hdu
            .read_key::<i64>(&mut self.fptr, name)
            .map_err(|_| self.missing(name))
    }

    fn missing(&self, name: &str) -> CcsError {
        CcsError::invalid(format!("{}: no {} in header", self.name, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_and_read_keywords() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.fits");
        let cards = [
            FitsCard::new("OBSTYPE", FitsValue::String("SKY-FLAT".into()), "Observation type"),
            FitsCard::new("EXPTIME", FitsValue::Float(2.5), "Seconds"),
            FitsCard::new("runnum", FitsValue::Int(7), ""),
        ];
        write_frame(&path, 6, 4, &[1000; 24], &cards).unwrap();

        let mut frame = FrameFile::open(&path).unwrap();
        assert_eq!(frame.int("NAXIS").unwrap(), 2);
        assert_eq!(frame.int("NAXIS1").unwrap(), 6);
        assert_eq!(frame.int("NAXIS2").unwrap(), 4);
        assert_eq!(frame.string("OBSTYPE").as_deref(), Some("SKY-FLAT"));
        assert_eq!(frame.float("EXPTIME").unwrap(), 2.5);
        assert_eq!(frame.int("RUNNUM").unwrap(), 7);
        assert!(matches!(frame.float("FILTER1"), Err(CcsError::InvalidParameter(_))));
    }

    #[test]
    fn test_overwrites_existing_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("glance.fits");
        write_frame(&path, 2, 2, &[0; 4], &[]).unwrap();
        write_frame(&path, 3, 1, &[0; 3], &[]).unwrap();
        assert_eq!(FrameFile::open(&path).unwrap().int("NAXIS1").unwrap(), 3);
    }

    #[test]
    fn test_rejects_short_pixel_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.fits");
        assert!(write_frame(&path, 4, 4, &[0; 3], &[]).is_err());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = FrameFile::open(Path::new("/nonexistent/frame.fits"));
        assert!(matches!(result, Err(CcsError::Io(_))));
    }

    #[test]
    fn test_keyword_truncated() {
        assert_eq!(keyword("comments"), "COMMENTS");
        assert_eq!(keyword("longkeyword"), "LONGKEYW");
    }
}
