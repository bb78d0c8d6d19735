//! Command definitions for Ccs
//!
//! Commands are sent from the observing client to the Ccs server. Each one
//! is answered with zero or more ACKs followed by exactly one DONE.

use serde::{Deserialize, Serialize};
use crate::types::{CcdConfig, RebootLevel, Timestamp};

/// Command message header
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandHeader {
    /// Command sequence number for tracking
    pub sequence: u32,
    /// Command type identifier
    pub cmd_type: CommandType,
}

impl CommandHeader {
    fn new(sequence: u32, cmd_type: CommandType) -> Self {
        Self { sequence, cmd_type }
    }
}

/// Command types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CommandType {
    GetStatus,
    Config,
    Abort,
    Reboot,
    Glance,
    Multrun,
    RunAt,
    Bias,
    Dark,
    TelFocus,
    TwilightCalibrate,
}

impl CommandType {
    pub const ALL: [CommandType; 11] = [
        CommandType::GetStatus,
        CommandType::Config,
        CommandType::Abort,
        CommandType::Reboot,
        CommandType::Glance,
        CommandType::Multrun,
        CommandType::RunAt,
        CommandType::Bias,
        CommandType::Dark,
        CommandType::TelFocus,
        CommandType::TwilightCalibrate,
    ];

    /// Protocol name of the command
    pub fn name(&self) -> &'static str {
        match self {
            CommandType::GetStatus => "GET_STATUS",
            CommandType::Config => "CONFIG",
            CommandType::Abort => "ABORT",
            CommandType::Reboot => "REBOOT",
            CommandType::Glance => "GLANCE",
            CommandType::Multrun => "MULTRUN",
            CommandType::RunAt => "RUNAT",
            CommandType::Bias => "BIAS",
            CommandType::Dark => "DARK",
            CommandType::TelFocus => "TELFOCUS",
            CommandType::TwilightCalibrate => "TWILIGHT_CALIBRATE",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let upper = name.to_ascii_uppercase();
        Self::ALL.iter().copied().find(|cmd_type| cmd_type.name() == upper)
    }

    /// Interrupt commands may run while another command is in progress
    pub fn is_interrupt(&self) -> bool {
        matches!(self, CommandType::GetStatus | CommandType::Abort | CommandType::Reboot)
    }
}

/// Detail requested by GET_STATUS
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum StatusLevel {
    #[default]
    Basic,
    Intermediate,
    Full,
}

/// GET_STATUS command - report what the instrument is doing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct GetStatusCommand {
    pub header: CommandHeader,
    pub level: StatusLevel,
}

impl GetStatusCommand {
    pub fn new(sequence: u32, level: StatusLevel) -> Self {
        Self {
            header: CommandHeader::new(sequence, CommandType::GetStatus),
            level,
        }
    }
}

/// CONFIG command - set binning, windows and filters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigCommand {
    pub header: CommandHeader,
    pub config: CcdConfig,
}

impl ConfigCommand {
    pub fn new(sequence: u32, config: CcdConfig) -> Self {
        Self {
            header: CommandHeader::new(sequence, CommandType::Config),
            config,
        }
    }
}

/// ABORT command - stop the command in progress
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AbortCommand {
    pub header: CommandHeader,
}

impl AbortCommand {
    pub fn new(sequence: u32) -> Self {
        Self {
            header: CommandHeader::new(sequence, CommandType::Abort),
        }
    }
}

/// REBOOT command - reset the server at the given level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RebootCommand {
    pub header: CommandHeader,
    pub level: RebootLevel,
}

impl RebootCommand {
    pub fn new(sequence: u32, level: RebootLevel) -> Self {
        Self {
            header: CommandHeader::new(sequence, CommandType::Reboot),
            level,
        }
    }
}

/// GLANCE command - one exposure into a scratch file
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct GlanceCommand {
    pub header: CommandHeader,
    pub exposure_ms: u64,
}

impl GlanceCommand {
    pub fn new(sequence: u32, exposure_ms: u64) -> Self {
        Self {
            header: CommandHeader::new(sequence, CommandType::Glance),
            exposure_ms,
        }
    }
}

/// MULTRUN command - a run of identical exposures
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MultrunCommand {
    pub header: CommandHeader,
    pub exposure_ms: u64,
    pub count: u32,
    /// Observation of a standard star
    pub standard: bool,
    /// Send each frame to the data pipeline
    pub pipeline_process: bool,
}

impl MultrunCommand {
    pub fn new(
        sequence: u32,
        exposure_ms: u64,
        count: u32,
        standard: bool,
        pipeline_process: bool,
    ) -> Self {
        Self {
            header: CommandHeader::new(sequence, CommandType::Multrun),
            exposure_ms,
            count,
            standard,
            pipeline_process,
        }
    }
}

/// RUNAT command - one exposure started at a given time
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunAtCommand {
    pub header: CommandHeader,
    pub start_time: Timestamp,
    pub exposure_ms: u64,
    pub standard: bool,
    pub pipeline_process: bool,
}

impl RunAtCommand {
    pub fn new(
        sequence: u32,
        start_time: Timestamp,
        exposure_ms: u64,
        standard: bool,
        pipeline_process: bool,
    ) -> Self {
        Self {
            header: CommandHeader::new(sequence, CommandType::RunAt),
            start_time,
            exposure_ms,
            standard,
            pipeline_process,
        }
    }
}

/// BIAS command - zero length closed shutter frame
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BiasCommand {
    pub header: CommandHeader,
    pub pipeline_process: bool,
}

impl BiasCommand {
    pub fn new(sequence: u32, pipeline_process: bool) -> Self {
        Self {
            header: CommandHeader::new(sequence, CommandType::Bias),
            pipeline_process,
        }
    }
}

/// DARK command - closed shutter frame of the given length
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DarkCommand {
    pub header: CommandHeader,
    pub exposure_ms: u64,
    pub pipeline_process: bool,
}

impl DarkCommand {
    pub fn new(sequence: u32, exposure_ms: u64, pipeline_process: bool) -> Self {
        Self {
            header: CommandHeader::new(sequence, CommandType::Dark),
            exposure_ms,
            pipeline_process,
        }
    }
}

/// TELFOCUS command - find the telescope focus giving the best seeing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TelFocusCommand {
    pub header: CommandHeader,
    /// First focus position in millimetres
    pub focus_start: f64,
    /// Last focus position in millimetres
    pub focus_end: f64,
    /// Step between focus positions in millimetres
    pub focus_step: f64,
    pub exposure_ms: u64,
}

impl TelFocusCommand {
    pub fn new(
        sequence: u32,
        focus_start: f64,
        focus_end: f64,
        focus_step: f64,
        exposure_ms: u64,
    ) -> Self {
        Self {
            header: CommandHeader::new(sequence, CommandType::TelFocus),
            focus_start,
            focus_end,
            focus_step,
            exposure_ms,
        }
    }
}

/// TWILIGHT_CALIBRATE command - take sky flats for as long as the budget allows
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TwilightCalibrateCommand {
    pub header: CommandHeader,
    pub time_to_complete_ms: u64,
}

impl TwilightCalibrateCommand {
    pub fn new(sequence: u32, time_to_complete_ms: u64) -> Self {
        Self {
            header: CommandHeader::new(sequence, CommandType::TwilightCalibrate),
            time_to_complete_ms,
        }
    }
}

/// Union of all command types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Command {
    GetStatus(GetStatusCommand),
    Config(ConfigCommand),
    Abort(AbortCommand),
    Reboot(RebootCommand),
    Glance(GlanceCommand),
    Multrun(MultrunCommand),
    RunAt(RunAtCommand),
    Bias(BiasCommand),
    Dark(DarkCommand),
    TelFocus(TelFocusCommand),
    TwilightCalibrate(TwilightCalibrateCommand),
}

impl Command {
    fn header(&self) -> &CommandHeader {
        match self {
            Command::GetStatus(cmd) => &cmd.header,
            Command::Config(cmd) => &cmd.header,
            Command::Abort(cmd) => &cmd.header,
            Command::Reboot(cmd) => &cmd.header,
            Command::Glance(cmd) => &cmd.header,
            Command::Multrun(cmd) => &cmd.header,
            Command::RunAt(cmd) => &cmd.header,
            Command::Bias(cmd) => &cmd.header,
            Command::Dark(cmd) => &cmd.header,
            Command::TelFocus(cmd) => &cmd.header,
            Command::TwilightCalibrate(cmd) => &cmd.header,
        }
    }

    pub fn sequence(&self) -> u32 {
        self.header().sequence
    }

    pub fn cmd_type(&self) -> CommandType {
        self.header().cmd_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_type_names() {
        assert_eq!(CommandType::TwilightCalibrate.name(), "TWILIGHT_CALIBRATE");
        assert_eq!(CommandType::from_name("multrun"), Some(CommandType::Multrun));
        assert_eq!(CommandType::from_name("EXPOSE"), None);
    }

    #[test]
    fn test_interrupt_commands() {
        let interrupts: Vec<_> = CommandType::ALL.iter().filter(|t| t.is_interrupt()).collect();
        assert_eq!(interrupts.len(), 3);
        assert!(!CommandType::Multrun.is_interrupt());
    }

    #[test]
    fn test_multrun_command() {
        let cmd = Command::Multrun(MultrunCommand::new(7, 1000, 3, false, true));
        assert_eq!(cmd.sequence(), 7);
        assert_eq!(cmd.cmd_type(), CommandType::Multrun);
    }

    #[test]
    fn test_command_serialization() {
        let cmd = Command::TelFocus(TelFocusCommand::new(42, 10.0, 12.0, 0.5, 2000));
        let json = serde_json::to_string(&cmd).unwrap();
        let deserialized: Command = serde_json::from_str(&json).unwrap();
        assert_eq!(cmd, deserialized);
    }
}
