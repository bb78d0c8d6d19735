//! Server status shared between connection threads

use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::debug;
use ccsmsg::{CcdConfig, CcsError, CcsResult, Command, StatusData, Timestamp};

/// The non-interrupt command in progress
#[derive(Debug, Clone)]
pub struct CurrentCommand {
    pub name: &'static str,
    pub sequence: u32,
    pub started: Instant,
}

/// Bookkeeping for the exposures of the current or last command
#[derive(Debug, Clone, Default)]
pub struct ExposureStatus {
    pub count: u32,
    pub number: u32,
    pub multrun: u32,
    pub last_filename: Option<String>,
}

#[derive(Debug, Default)]
struct ConfigStatus {
    id: u32,
    config: Option<CcdConfig>,
}

pub struct CcsStatus {
    started: Instant,
    current: Mutex<Option<CurrentCommand>>,
    exposure: Mutex<ExposureStatus>,
    config: Mutex<ConfigStatus>,
}

impl CcsStatus {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            current: Mutex::new(None),
            exposure: Mutex::new(ExposureStatus::default()),
            config: Mutex::new(ConfigStatus::default()),
        }
    }

    /// Record the start of a command.
    ///
    /// Interrupt commands (GET_STATUS, ABORT, REBOOT) may run alongside
    /// anything. Any other command is refused while another one runs.
    pub fn begin_command(&self, command: &Command) -> CcsResult<CommandGuard<'_>> {
        let cmd_type = command.cmd_type();
        if cmd_type.is_interrupt() {
            return Ok(CommandGuard { status: self, claimed: false });
        }

        let mut current = self.current.lock()
            .map_err(|_| CcsError::Driver("Status lock poisoned".to_string()))?;
        if let Some(running) = current.as_ref() {
            return Err(CcsError::Busy(running.name.to_string()));
        }
        *current = Some(CurrentCommand {
            name: cmd_type.name(),
            sequence: command.sequence(),
            started: Instant::now(),
        });
        debug!("Command {} ({}) started", cmd_type.name(), command.sequence());
        Ok(CommandGuard { status: self, claimed: true })
    }

    pub fn current_command(&self) -> Option<CurrentCommand> {
        self.current.lock().ok().and_then(|current| current.clone())
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Start counting the exposures of a command
    pub fn start_exposures(&self, count: u32) {
        if let Ok(mut exposure) = self.exposure.lock() {
            exposure.count = count;
            exposure.number = 0;
        }
    }

    pub fn set_exposure_number(&self, number: u32) {
        if let Ok(mut exposure) = self.exposure.lock() {
            exposure.number = number;
        }
    }

    pub fn set_multrun(&self, multrun: u32) {
        if let Ok(mut exposure) = self.exposure.lock() {
            exposure.multrun = multrun;
        }
    }

    pub fn set_last_filename(&self, filename: &str) {
        if let Ok(mut exposure) = self.exposure.lock() {
            exposure.last_filename = Some(filename.to_string());
        }
    }

    pub fn exposure(&self) -> ExposureStatus {
        self.exposure.lock().map(|exposure| exposure.clone()).unwrap_or_default()
    }

    /// Store a new configuration and return its id
    pub fn set_config(&self, config: CcdConfig) -> u32 {
        match self.config.lock() {
            Ok(mut status) => {
                status.id += 1;
                status.config = Some(config);
                status.id
            }
            Err(_) => 0,
        }
    }

    pub fn config(&self) -> Option<CcdConfig> {
        self.config.lock().ok().and_then(|status| status.config.clone())
    }

    pub fn config_id(&self) -> u32 {
        self.config.lock().map(|status| status.id).unwrap_or(0)
    }

    /// Forget the configuration and exposure bookkeeping. The config id keeps counting.
    pub fn reset(&self) {
        if let Ok(mut status) = self.config.lock() {
            status.config = None;
        }
        if let Ok(mut exposure) = self.exposure.lock() {
            *exposure = ExposureStatus::default();
        }
    }

    /// The parts of GET_STATUS kept here
    pub fn status_data(&self) -> StatusData {
        let exposure = self.exposure();
        let config = self.config();
        StatusData {
            current_command: self.current_command().map(|current| current.name.to_string()),
            exposure_count: exposure.count,
            exposure_number: exposure.number,
            multrun_number: exposure.multrun,
            config_id: self.config_id(),
            config_name: config.as_ref().map(|c| c.name.clone()),
            lower_filter: config.as_ref().map(|c| c.lower_filter.clone()),
            upper_filter: config.as_ref().map(|c| c.upper_filter.clone()),
            last_filename: exposure.last_filename,
            uptime_s: self.uptime().as_secs(),
            timestamp: Some(Timestamp::now()),
            ..StatusData::default()
        }
    }
}

impl Default for CcsStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Clears the current command when dropped
pub struct CommandGuard<'a> {
    status: &'a CcsStatus,
    claimed: bool,
}

impl CommandGuard<'_> {
    /// True if this command holds the command slot
    pub fn is_claimed(&self) -> bool {
        self.claimed
    }
}

impl Drop for CommandGuard<'_> {
    fn drop(&mut self) {
        if self.claimed {
            if let Ok(mut current) = self.status.current.lock() {
                if let Some(finished) = current.take() {
                    debug!("Command {} ({}) finished after {:?}",
                        finished.name, finished.sequence, finished.started.elapsed());
                }
            }
        }
    }
}
