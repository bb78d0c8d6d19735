//! Command implementations and their registry
//!
//! Every command type has one implementation. The connection thread asks it
//! how long the command will take, sends that as the first ACK, then runs it.
//! Long commands send further ACKs through the `Acknowledger` as they go.

use std::collections::HashMap;
use std::time::Duration;

use ccsmsg::{CcsResult, Command, CommandType, DoneData};

use crate::implementations::{
    abort::AbortImplementation, calibrate::BiasImplementation, calibrate::DarkImplementation,
    config::ConfigImplementation, expose::GlanceImplementation, expose::MultrunImplementation,
    expose::RunAtImplementation, get_status::GetStatusImplementation, reboot::RebootImplementation,
    telfocus::TelFocusImplementation, twilight_calibrate::TwilightCalibrateImplementation,
};
use crate::instrument::Instrument;

/// Sends ACKs back to the client while a command runs
pub trait Acknowledger {
    /// Promise completion within `time_to_complete` from now
    fn acknowledge(&mut self, time_to_complete: Duration) -> CcsResult<()>;
}

/// Ignores ACKs, for commands run without a client
pub struct NoAcknowledge;

impl Acknowledger for NoAcknowledge {
    fn acknowledge(&mut self, _time_to_complete: Duration) -> CcsResult<()> {
        Ok(())
    }
}

pub trait CommandImplementation: Send + Sync {
    /// Time to put in the first ACK
    fn ack_time(&self, instrument: &Instrument, command: &Command) -> Duration;

    /// Run the command
    fn execute(
        &self,
        instrument: &Instrument,
        command: &Command,
        ack: &mut dyn Acknowledger,
    ) -> CcsResult<DoneData>;
}

/// Implementation lookup by command type
pub struct Implementations {
    map: HashMap<CommandType, Box<dyn CommandImplementation>>,
}

impl Implementations {
    pub fn new() -> Self {
        let mut map: HashMap<CommandType, Box<dyn CommandImplementation>> = HashMap::new();
        map.insert(CommandType::GetStatus, Box::new(GetStatusImplementation));
        map.insert(CommandType::Config, Box::new(ConfigImplementation));
        map.insert(CommandType::Abort, Box::new(AbortImplementation));
        map.insert(CommandType::Reboot, Box::new(RebootImplementation));
        map.insert(CommandType::Glance, Box::new(GlanceImplementation));
        map.insert(CommandType::Multrun, Box::new(MultrunImplementation));
        map.insert(CommandType::RunAt, Box::new(RunAtImplementation));
        map.insert(CommandType::Bias, Box::new(BiasImplementation));
        map.insert(CommandType::Dark, Box::new(DarkImplementation));
        map.insert(CommandType::TelFocus, Box::new(TelFocusImplementation));
        map.insert(CommandType::TwilightCalibrate, Box::new(TwilightCalibrateImplementation));
        Self { map }
    }

    pub fn get(&self, cmd_type: CommandType) -> Option<&dyn CommandImplementation> {
        self.map.get(&cmd_type).map(|implementation| implementation.as_ref())
    }
}

impl Default for Implementations {
    fn default() -> Self {
        Self::new()
    }
}
