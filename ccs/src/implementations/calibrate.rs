//! BIAS and DARK

use std::time::Duration;

use ccsmsg::{CalibrateData, CcsResult, Command, CommandType, DoneData, ExposureCode};

use crate::implementation::{Acknowledger, CommandImplementation};
use crate::implementations::{take_frames, wrong_command, Reduce};
use crate::instrument::Instrument;

fn calibrate(
    instrument: &Instrument,
    code: ExposureCode,
    exposure: Duration,
    pipeline_process: bool,
    ack: &mut dyn Acknowledger,
) -> CcsResult<DoneData> {
    let reduce = if pipeline_process { Reduce::Calibrate } else { Reduce::None };
    let frames = take_frames(instrument, code, exposure, 1, false, reduce, ack)?;
    Ok(DoneData::Calibrate(CalibrateData {
        filenames: frames.filenames,
        reduction: frames.reduction,
    }))
}

pub struct BiasImplementation;

impl CommandImplementation for BiasImplementation {
    fn ack_time(&self, instrument: &Instrument, _command: &Command) -> Duration {
        instrument.frame_time(Duration::ZERO)
    }

    fn execute(
        &self,
        instrument: &Instrument,
        command: &Command,
        ack: &mut dyn Acknowledger,
    ) -> CcsResult<DoneData> {
        let Command::Bias(cmd) = command else {
            return Err(wrong_command(CommandType::Bias, command));
        };
        calibrate(instrument, ExposureCode::Bias, Duration::ZERO, cmd.pipeline_process, ack)
    }
}

pub struct DarkImplementation;

impl CommandImplementation for DarkImplementation {
    fn ack_time(&self, instrument: &Instrument, command: &Command) -> Duration {
        match command {
            Command::Dark(cmd) => instrument.frame_time(Duration::from_millis(cmd.exposure_ms)),
            _ => instrument.frame_time(Duration::ZERO),
        }
    }

    fn execute(
        &self,
        instrument: &Instrument,
        command: &Command,
        ack: &mut dyn Acknowledger,
    ) -> CcsResult<DoneData> {
        let Command::Dark(cmd) = command else {
            return Err(wrong_command(CommandType::Dark, command));
        };
        let exposure = Duration::from_millis(cmd.exposure_ms);
        calibrate(instrument, ExposureCode::Dark, exposure, cmd.pipeline_process, ack)
    }
}
