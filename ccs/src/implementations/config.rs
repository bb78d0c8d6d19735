//! CONFIG

use std::time::Duration;

use ccsmsg::{CcsResult, Command, CommandType, ConfigData, DoneData};

use crate::config::constants::CONFIG_TIME;
use crate::implementation::{Acknowledger, CommandImplementation};
use crate::implementations::wrong_command;
use crate::instrument::Instrument;

pub struct ConfigImplementation;

impl CommandImplementation for ConfigImplementation {
    fn ack_time(&self, _instrument: &Instrument, _command: &Command) -> Duration {
        CONFIG_TIME
    }

    fn execute(
        &self,
        instrument: &Instrument,
        command: &Command,
        _ack: &mut dyn Acknowledger,
    ) -> CcsResult<DoneData> {
        let Command::Config(cmd) = command else {
            return Err(wrong_command(CommandType::Config, command));
        };

        let config_id = instrument.apply_config(&cmd.config)?;
        Ok(DoneData::Config(ConfigData {
            config_id,
            config_name: cmd.config.name.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use ccsmsg::{Binning, CcdConfig, CcsError, ConfigCommand, Window};
    use crate::implementation::NoAcknowledge;
    use crate::instrument::tests::test_instrument;

    #[test]
    fn test_config() {
        let dir = tempfile::tempdir().unwrap();
        let instrument = test_instrument(dir.path(), Arc::default(), Arc::default());
        let config = CcdConfig::new("windowed", Binning::new(1, 1), "V", "Halpha")
            .with_windows(vec![Window::new(1, 1, 16, 16), Window::new(33, 1, 48, 16)]);

        let command = Command::Config(ConfigCommand::new(4, config.clone()));
        let done = ConfigImplementation.execute(&instrument, &command, &mut NoAcknowledge).unwrap();
        let expected = ConfigData {
            config_id: 1,
            config_name: "windowed".to_string(),
        };
        assert_eq!(done, DoneData::Config(expected));
        assert_eq!(instrument.status().config(), Some(config));
    }

    #[test]
    fn test_too_many_windows() {
        let dir = tempfile::tempdir().unwrap();
        let instrument = test_instrument(dir.path(), Arc::default(), Arc::default());
        let windows = (0..5).map(|i| Window::new(1 + i * 10, 1, 5 + i * 10, 5)).collect();
        let config =
            CcdConfig::new("many", Binning::default(), "clear", "clear").with_windows(windows);

        let command = Command::Config(ConfigCommand::new(5, config));
        let result = ConfigImplementation.execute(&instrument, &command, &mut NoAcknowledge);
        assert!(matches!(result, Err(CcsError::InvalidParameter(_))));
        assert!(instrument.status().config().is_none());
    }
}
