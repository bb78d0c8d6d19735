//! Command line parsing for ccssend

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ccsmsg::{
    commands::*, Binning, CcdConfig, CcsError, CcsResult, RebootLevel, Timestamp,
};

pub const USAGE: &str = "\
usage: ccssend <host:port> <COMMAND> [arguments]

  GET_STATUS [basic|intermediate|full]
  CONFIG <name> <bin> <lower_filter> <upper_filter>
  ABORT
  REBOOT <1-4>
  GLANCE <exposure_ms>
  MULTRUN <exposure_ms> <count> [standard] [pipeline]
  RUNAT <unix_seconds|+delay_seconds> <exposure_ms> [standard] [pipeline]
  BIAS [pipeline]
  DARK <exposure_ms> [pipeline]
  TELFOCUS <start_mm> <end_mm> <step_mm> <exposure_ms>
  TWILIGHT_CALIBRATE <time_to_complete_s>";

fn arg<'a>(args: &[&'a str], index: usize, name: &str) -> CcsResult<&'a str> {
    args.get(index)
        .copied()
        .ok_or_else(|| CcsError::invalid(format!("Missing {}", name)))
}

fn number<T: std::str::FromStr>(args: &[&str], index: usize, name: &str) -> CcsResult<T> {
    let value = arg(args, index, name)?;
    value.parse()
        .map_err(|_| CcsError::invalid(format!("Bad {}: {}", name, value)))
}

/// Optional trailing words such as `standard` and `pipeline`
fn has_flag(args: &[&str], from: usize, flag: &str) -> bool {
    args.iter().skip(from).any(|word| word.eq_ignore_ascii_case(flag))
}

fn start_time(value: &str) -> CcsResult<Timestamp> {
    let bad = || CcsError::invalid(format!("Bad start time: {}", value));
    let since_epoch = match value.strip_prefix('+') {
        Some(delay) => {
            let delay: f64 = delay.parse().map_err(|_| bad())?;
            SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default()
                + Duration::try_from_secs_f64(delay).map_err(|_| bad())?
        }
        None => Duration::try_from_secs_f64(value.parse().map_err(|_| bad())?).map_err(|_| bad())?,
    };
    Ok(Timestamp::from_duration(since_epoch))
}

/// Build the command named by `name` from its arguments
pub fn parse_command(sequence: u32, name: &str, args: &[&str]) -> CcsResult<Command> {
    let cmd_type = CommandType::from_name(name)
        .ok_or_else(|| CcsError::Unsupported(name.to_string()))?;

    let command = match cmd_type {
        CommandType::GetStatus => {
            let level = match args.first().map(|level| level.to_ascii_lowercase()).as_deref() {
                None | Some("basic") => StatusLevel::Basic,
                Some("intermediate") => StatusLevel::Intermediate,
                Some("full") => StatusLevel::Full,
                Some(other) => {
                    return Err(CcsError::invalid(format!("Bad status level: {}", other)));
                }
            };
            Command::GetStatus(GetStatusCommand::new(sequence, level))
        }
        CommandType::Config => {
            let bin = number(args, 1, "bin")?;
            let config = CcdConfig::new(
                arg(args, 0, "name")?,
                Binning::new(bin, bin),
                arg(args, 2, "lower filter")?,
                arg(args, 3, "upper filter")?,
            );
            Command::Config(ConfigCommand::new(sequence, config))
        }
        CommandType::Abort => Command::Abort(AbortCommand::new(sequence)),
        CommandType::Reboot => {
            let level: u8 = number(args, 0, "reboot level")?;
            let level = RebootLevel::from_level(level)
                .ok_or_else(|| CcsError::invalid(format!("Bad reboot level: {}", level)))?;
            Command::Reboot(RebootCommand::new(sequence, level))
        }
        CommandType::Glance => {
            Command::Glance(GlanceCommand::new(sequence, number(args, 0, "exposure")?))
        }
        CommandType::Multrun => Command::Multrun(MultrunCommand::new(
            sequence,
            number(args, 0, "exposure")?,
            number(args, 1, "count")?,
            has_flag(args, 2, "standard"),
            has_flag(args, 2, "pipeline"),
        )),
        CommandType::RunAt => Command::RunAt(RunAtCommand::new(
            sequence,
            start_time(arg(args, 0, "start time")?)?,
            number(args, 1, "exposure")?,
            has_flag(args, 2, "standard"),
            has_flag(args, 2, "pipeline"),
        )),
        CommandType::Bias => {
            Command::Bias(BiasCommand::new(sequence, has_flag(args, 0, "pipeline")))
        }
        CommandType::Dark => Command::Dark(DarkCommand::new(
            sequence,
            number(args, 0, "exposure")?,
            has_flag(args, 1, "pipeline"),
        )),
        CommandType::TelFocus => Command::TelFocus(TelFocusCommand::new(
            sequence,
            number(args, 0, "focus start")?,
            number(args, 1, "focus end")?,
            number(args, 2, "focus step")?,
            number(args, 3, "exposure")?,
        )),
        CommandType::TwilightCalibrate => {
            let seconds: u64 = number(args, 0, "time to complete")?;
            let time_to_complete_ms = seconds
                .checked_mul(1000)
                .ok_or_else(|| CcsError::invalid(format!("{} seconds is too long", seconds)))?;
            Command::TwilightCalibrate(TwilightCalibrateCommand::new(sequence, time_to_complete_ms))
        }
    };
    Ok(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_multrun() {
        match parse_command(3, "multrun", &["1000", "5", "pipeline"]).unwrap() {
            Command::Multrun(cmd) => {
                assert_eq!(cmd.exposure_ms, 1000);
                assert_eq!(cmd.count, 5);
                assert!(!cmd.standard);
                assert!(cmd.pipeline_process);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_config() {
        match parse_command(1, "CONFIG", &["flats", "2", "R", "clear"]).unwrap() {
            Command::Config(cmd) => {
                assert_eq!(cmd.config.binning, Binning::new(2, 2));
                assert_eq!(cmd.config.lower_filter, "R");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_run_at() {
        match parse_command(1, "RUNAT", &["1700000000", "500"]).unwrap() {
            Command::RunAt(cmd) => assert_eq!(cmd.start_time.seconds, 1_700_000_000),
            other => panic!("unexpected {:?}", other),
        }
        assert!(parse_command(1, "RUNAT", &["+10", "500"]).is_ok());
        assert!(parse_command(1, "RUNAT", &["soon", "500"]).is_err());
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse_command(1, "FLY", &[]), Err(CcsError::Unsupported(_))));
        assert!(parse_command(1, "GLANCE", &[]).is_err());
        assert!(parse_command(1, "REBOOT", &["9"]).is_err());
        assert!(parse_command(1, "GET_STATUS", &["verbose"]).is_err());
    }

    #[test]
    fn test_twilight_seconds() {
        match parse_command(1, "twilight_calibrate", &["1800"]).unwrap() {
            Command::TwilightCalibrate(cmd) => assert_eq!(cmd.time_to_complete_ms, 1_800_000),
            other => panic!("unexpected {:?}", other),
        }
        let too_long = u64::MAX.to_string();
        let result = parse_command(1, "TWILIGHT_CALIBRATE", &[too_long.as_str()]);
        assert!(matches!(result, Err(CcsError::InvalidParameter(_))));
    }
}
