//! Simulated DpRt
//!
//! Reads the header of the frame it is asked to reduce and makes up
//! results from the sky model: seeing from the telescope focus, counts from
//! the exposure length and the twilight sky.

use std::path::Path;
use std::sync::Mutex;

use log::info;
use ccs_lib::fits_file::FrameFile;
use ccsmsg::{CcsResult, DpRtCommand, DpRtRequest, ReductionResult};

use crate::sky::{SkyModel, BIAS_COUNTS, SATURATION_COUNTS};

/// Peak counts of the star in a one second science frame
const STAR_RATE: f64 = 5000.0;

struct FrameHeader {
    obstype: String,
    exposure_s: f64,
    x_size: f64,
    y_size: f64,
}

fn read_header(filename: &str) -> CcsResult<FrameHeader> {
    let mut frame = FrameFile::open(Path::new(filename))?;
    Ok(FrameHeader {
        obstype: frame.string("OBSTYPE").unwrap_or_default(),
        exposure_s: frame.float("EXPTIME")?,
        x_size: frame.int("NAXIS1")? as f64,
        y_size: frame.int("NAXIS2")? as f64,
    })
}

pub fn handle(sky: &Mutex<SkyModel>, command: &DpRtCommand) -> CcsResult<ReductionResult> {
    let sky = sky.lock().unwrap_or_else(|e| e.into_inner());
    let filename = command.request.filename().to_string();
    let header = read_header(&filename)?;

    let result = match command.request {
        DpRtRequest::ExposeReduce { .. } => ReductionResult {
            seeing: sky.measure_seeing(),
            counts: (BIAS_COUNTS + STAR_RATE * header.exposure_s).min(SATURATION_COUNTS),
            x_pix: header.x_size / 2.0,
            y_pix: header.y_size / 2.0,
            photometricity: 1.0,
            sky_brightness: 20.5,
            filename,
            ..ReductionResult::default()
        },
        DpRtRequest::CalibrateReduce { .. } => {
            let counts = match header.obstype.as_str() {
                "SKY-FLAT" => sky.flat_counts(header.exposure_s),
                "DARK" => sky.dark_counts(header.exposure_s),
                _ => BIAS_COUNTS,
            };
            ReductionResult {
                counts,
                saturation: counts >= SATURATION_COUNTS,
                filename,
                ..ReductionResult::default()
            }
        }
    };
    info!(
        "DpRt reduced {}: seeing {:.2}, counts {:.0}",
        result.filename, result.seeing, result.counts
    );
    Ok(result)
}
