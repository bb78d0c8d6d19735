//! ABORT

use std::time::Duration;

use log::info;
use ccsmsg::{CcsResult, Command, DoneData};

use crate::config::constants::QUICK_COMMAND_TIME;
use crate::implementation::{Acknowledger, CommandImplementation};
use crate::instrument::Instrument;

pub struct AbortImplementation;

impl CommandImplementation for AbortImplementation {
    fn ack_time(&self, _instrument: &Instrument, _command: &Command) -> Duration {
        QUICK_COMMAND_TIME
    }

    /// Raise the abort flag. The command in progress, if any, sees it at its
    /// next check and finishes with an aborted DONE.
    fn execute(
        &self,
        instrument: &Instrument,
        _command: &Command,
        _ack: &mut dyn Acknowledger,
    ) -> CcsResult<DoneData> {
        match instrument.status().current_command() {
            Some(current) => info!("Aborting {} ({})", current.name, current.sequence),
            None => info!("Abort with no command running"),
        }
        instrument.monitor().abort();
        Ok(DoneData::Empty)
    }
}
