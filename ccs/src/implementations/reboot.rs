//! REBOOT
//!
//! REDATUM reloads the configuration and sets the driver up again in place.
//! The other levels stop the server; the exit status tells the supervising
//! script whether to restart the program, reboot or power off.

use std::time::Duration;

use log::warn;
use ccsmsg::{CcsError, CcsResult, Command, CommandType, DoneData, RebootLevel};

use crate::config::constants::CONFIG_TIME;
use crate::implementation::{Acknowledger, CommandImplementation};
use crate::implementations::wrong_command;
use crate::instrument::{Instrument, ShutdownReason};

pub struct RebootImplementation;

impl CommandImplementation for RebootImplementation {
    fn ack_time(&self, _instrument: &Instrument, _command: &Command) -> Duration {
        CONFIG_TIME
    }

    fn execute(
        &self,
        instrument: &Instrument,
        command: &Command,
        _ack: &mut dyn Acknowledger,
    ) -> CcsResult<DoneData> {
        let Command::Reboot(cmd) = command else {
            return Err(wrong_command(CommandType::Reboot, command));
        };

        let reason = match cmd.level {
            RebootLevel::Redatum => None,
            RebootLevel::Software => Some(ShutdownReason::Software),
            RebootLevel::Hardware => Some(ShutdownReason::Hardware),
            RebootLevel::PowerOff => Some(ShutdownReason::PowerOff),
        };
        if matches!(reason, Some(ShutdownReason::Hardware | ShutdownReason::PowerOff))
            && !instrument.config().reboot.hardware_enabled {
            return Err(CcsError::InvalidParameter(format!(
                "Reboot level {} is disabled", cmd.level.level()
            )));
        }

        warn!("Reboot level {:?}", cmd.level);
        instrument.monitor().abort();
        match reason {
            None => instrument.redatum()?,
            Some(reason) => instrument.shutdown(reason),
        }
        Ok(DoneData::Empty)
    }
}
