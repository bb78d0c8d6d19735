//! One module per command

pub mod abort;
pub mod calibrate;
pub mod config;
pub mod expose;
pub mod get_status;
pub mod reboot;
pub mod telfocus;
pub mod twilight_calibrate;

use std::time::Duration;

use log::info;
use ccsmsg::{CcsError, CcsResult, Command, CommandType, ExposureCode, ReductionResult};

use crate::implementation::Acknowledger;
use crate::instrument::{display_name, Instrument};

/// Error for a command handed to the wrong implementation
pub(crate) fn wrong_command(expected: CommandType, command: &Command) -> CcsError {
    CcsError::Protocol(format!(
        "{} given to the {} implementation",
        command.cmd_type().name(),
        expected.name()
    ))
}

/// Reduction to ask of the pipeline for each frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reduce {
    None,
    Expose,
    Calibrate,
}

/// Frames of one multrun
#[derive(Debug, Default)]
pub(crate) struct Frames {
    pub multrun: u32,
    pub filenames: Vec<String>,
    pub reduction: Option<ReductionResult>,
}

/// Take `count` frames as a new multrun, acknowledging before each one
pub(crate) fn take_frames(
    instrument: &Instrument,
    code: ExposureCode,
    exposure: Duration,
    count: u32,
    open_shutter: bool,
    reduce: Reduce,
    ack: &mut dyn Acknowledger,
) -> CcsResult<Frames> {
    instrument.current_config()?;
    let status = instrument.status();
    let mut frames = Frames {
        multrun: instrument.next_multrun()?,
        ..Frames::default()
    };
    status.start_exposures(count);

    for number in 1..=count {
        instrument.check_abort()?;
        ack.acknowledge(instrument.frame_time(exposure).saturating_mul(count - number + 1))?;
        status.set_exposure_number(number);

        let files = instrument.expose_frame(code, exposure, open_shutter)?;
        for file in &files {
            match reduce {
                Reduce::None => {}
                Reduce::Expose => {
                    frames.reduction = Some(instrument.pipeline().expose_reduce(file)?);
                }
                Reduce::Calibrate => {
                    frames.reduction = Some(instrument.pipeline().calibrate_reduce(file)?);
                }
            }
        }
        frames.filenames.extend(files.iter().map(|file| display_name(file)));
    }

    info!("Multrun {} complete: {} frames", frames.multrun, count);
    Ok(frames)
}
