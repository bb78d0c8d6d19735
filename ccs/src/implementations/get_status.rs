//! GET_STATUS

use std::time::Duration;

use ccsmsg::{CcsResult, Command, CommandType, DoneData, StatusLevel};

use crate::config::constants::QUICK_COMMAND_TIME;
use crate::implementation::{Acknowledger, CommandImplementation};
use crate::implementations::wrong_command;
use crate::instrument::Instrument;

pub struct GetStatusImplementation;

impl CommandImplementation for GetStatusImplementation {
    fn ack_time(&self, _instrument: &Instrument, _command: &Command) -> Duration {
        QUICK_COMMAND_TIME
    }

    fn execute(
        &self,
        instrument: &Instrument,
        command: &Command,
        _ack: &mut dyn Acknowledger,
    ) -> CcsResult<DoneData> {
        let Command::GetStatus(cmd) = command else {
            return Err(wrong_command(CommandType::GetStatus, command));
        };

        let monitor = instrument.monitor();
        let (length, elapsed) = monitor.exposure_progress();
        let mut data = instrument.status().status_data();
        data.ccd_state = monitor.state();
        data.exposure_length_ms = u64::try_from(length.as_millis()).unwrap_or(u64::MAX);
        data.exposure_elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

        if cmd.level >= StatusLevel::Intermediate {
            data.temperature_c = monitor.temperature();
        }
        if cmd.level >= StatusLevel::Full {
            data.driver_status = instrument.driver_status();
        }
        Ok(DoneData::Status(data))
    }
}
