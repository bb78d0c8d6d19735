//! GLANCE, MULTRUN and RUNAT

use std::time::{Duration, SystemTime};

use log::info;
use ccsmsg::{
    CcsError, CcsResult, Command, CommandType, DoneData, ExposeData, ExposureCode, MultrunData,
};

use crate::implementation::{Acknowledger, CommandImplementation};
use crate::implementations::{take_frames, wrong_command, Reduce};
use crate::instrument::{display_name, Instrument};

fn exposure_code(standard: bool) -> ExposureCode {
    if standard {
        ExposureCode::Standard
    } else {
        ExposureCode::Exposure
    }
}

fn reduce(pipeline_process: bool) -> Reduce {
    if pipeline_process {
        Reduce::Expose
    } else {
        Reduce::None
    }
}

pub struct GlanceImplementation;

impl CommandImplementation for GlanceImplementation {
    fn ack_time(&self, instrument: &Instrument, command: &Command) -> Duration {
        match command {
            Command::Glance(cmd) => instrument.frame_time(Duration::from_millis(cmd.exposure_ms)),
            _ => instrument.frame_time(Duration::ZERO),
        }
    }

    fn execute(
        &self,
        instrument: &Instrument,
        command: &Command,
        _ack: &mut dyn Acknowledger,
    ) -> CcsResult<DoneData> {
        let Command::Glance(cmd) = command else {
            return Err(wrong_command(CommandType::Glance, command));
        };

        instrument.status().start_exposures(1);
        instrument.status().set_exposure_number(1);
        let files = instrument.expose_glance(Duration::from_millis(cmd.exposure_ms))?;
        Ok(DoneData::Expose(ExposeData {
            filenames: files.iter().map(|file| display_name(file)).collect(),
            reduction: None,
        }))
    }
}

/// Bias frame, in its own multrun, for a configuration that asks for
/// calibration around its exposures
fn calibration_bias(
    instrument: &Instrument,
    ack: &mut dyn Acknowledger,
) -> CcsResult<Vec<String>> {
    let frames = take_frames(
        instrument,
        ExposureCode::Bias,
        Duration::ZERO,
        1,
        false,
        Reduce::None,
        ack,
    )?;
    Ok(frames.filenames)
}

pub struct MultrunImplementation;

impl CommandImplementation for MultrunImplementation {
    fn ack_time(&self, instrument: &Instrument, command: &Command) -> Duration {
        match command {
            Command::Multrun(cmd) => {
                let calibrations = instrument.status().config().map_or(0, |config| {
                    u32::from(config.calibrate_before) + u32::from(config.calibrate_after)
                });
                let bias = instrument.frame_time(Duration::ZERO).saturating_mul(calibrations);
                instrument
                    .frame_time(Duration::from_millis(cmd.exposure_ms))
                    .saturating_mul(cmd.count.max(1))
                    .saturating_add(bias)
            }
            _ => instrument.frame_time(Duration::ZERO),
        }
    }

    fn execute(
        &self,
        instrument: &Instrument,
        command: &Command,
        ack: &mut dyn Acknowledger,
    ) -> CcsResult<DoneData> {
        let Command::Multrun(cmd) = command else {
            return Err(wrong_command(CommandType::Multrun, command));
        };
        if cmd.count == 0 {
            return Err(CcsError::invalid("MULTRUN count must be at least 1"));
        }
        let ccd_config = instrument.current_config()?;

        let mut filenames = Vec::new();
        if ccd_config.calibrate_before {
            filenames.extend(calibration_bias(instrument, ack)?);
        }
        let frames = take_frames(
            instrument,
            exposure_code(cmd.standard),
            Duration::from_millis(cmd.exposure_ms),
            cmd.count,
            true,
            reduce(cmd.pipeline_process),
            ack,
        )?;
        filenames.extend(frames.filenames);
        if ccd_config.calibrate_after {
            filenames.extend(calibration_bias(instrument, ack)?);
        }

        Ok(DoneData::Multrun(MultrunData {
            multrun_number: frames.multrun,
            filenames,
            reduction: frames.reduction,
        }))
    }
}

pub struct RunAtImplementation;

impl CommandImplementation for RunAtImplementation {
    fn ack_time(&self, instrument: &Instrument, command: &Command) -> Duration {
        match command {
            Command::RunAt(cmd) => {
                let wait = cmd
                    .start_time
                    .to_system_time()
                    .and_then(|start| start.duration_since(SystemTime::now()).ok())
                    .unwrap_or_default();
                wait.saturating_add(instrument.frame_time(Duration::from_millis(cmd.exposure_ms)))
            }
            _ => instrument.frame_time(Duration::ZERO),
        }
    }

    fn execute(
        &self,
        instrument: &Instrument,
        command: &Command,
        ack: &mut dyn Acknowledger,
    ) -> CcsResult<DoneData> {
        let Command::RunAt(cmd) = command else {
            return Err(wrong_command(CommandType::RunAt, command));
        };

        instrument.current_config()?;
        let start = cmd.start_time.to_system_time().ok_or_else(|| {
            CcsError::InvalidParameter(format!(
                "Start time {}.{:09} is out of range",
                cmd.start_time.seconds, cmd.start_time.nanoseconds
            ))
        })?;
        if start > SystemTime::now() {
            info!("RUNAT waiting for {:?}", start);
        }
        instrument.wait_until(start)?;

        let frames = take_frames(
            instrument,
            exposure_code(cmd.standard),
            Duration::from_millis(cmd.exposure_ms),
            1,
            true,
            reduce(cmd.pipeline_process),
            ack,
        )?;
        Ok(DoneData::Expose(ExposeData {
            filenames: frames.filenames,
            reduction: frames.reduction,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;
    use ccsmsg::{Binning, CcdConfig, GlanceCommand, MultrunCommand, RunAtCommand, Timestamp};
    use crate::implementation::tests::RecordingAcknowledger;
    use crate::implementation::NoAcknowledge;
    use crate::instrument::tests::{configured_instrument, test_instrument};
    use crate::pipeline::tests::MockPipeline;

    fn from_now(delay: Duration) -> Timestamp {
        let now = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap();
        Timestamp::from_duration(now + delay)
    }

    #[test]
    fn test_multrun() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Arc::new(MockPipeline::default());
        let instrument = configured_instrument(dir.path(), Arc::default(), pipeline.clone());

        let command = Command::Multrun(MultrunCommand::new(3, 10, 3, true, true));
        let mut ack = RecordingAcknowledger::default();
        let done = MultrunImplementation.execute(&instrument, &command, &mut ack).unwrap();

        let data = match done {
            DoneData::Multrun(data) => data,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(data.multrun_number, 1);
        assert_eq!(data.filenames.len(), 3);
        assert!(data.filenames.iter().all(|name| name.contains("/c_s_")));
        assert!(data.filenames[2].ends_with("_1_3_1_0.fits"));
        assert_eq!(data.reduction.unwrap().filename, data.filenames[2]);
        assert_eq!(pipeline.reduced.lock().unwrap().len(), 3);
        assert_eq!(ack.acks.len(), 3);
        assert!(ack.acks[0] > ack.acks[2]);
        assert_eq!(instrument.status().exposure().number, 3);
    }

    #[test]
    fn test_multrun_calibrates_before_and_after() {
        let dir = tempfile::tempdir().unwrap();
        let instrument = test_instrument(dir.path(), Arc::default(), Arc::default());
        let mut config = CcdConfig::new("cal", Binning::new(2, 2), "R", "clear");
        config.calibrate_before = true;
        config.calibrate_after = true;
        instrument.apply_config(&config).unwrap();

        let command = Command::Multrun(MultrunCommand::new(4, 10, 2, false, false));
        let plain = instrument.frame_time(Duration::from_millis(10)).saturating_mul(2);
        assert!(MultrunImplementation.ack_time(&instrument, &command) > plain);

        let done = MultrunImplementation.execute(&instrument, &command, &mut NoAcknowledge);
        let data = match done.unwrap() {
            DoneData::Multrun(data) => data,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(data.multrun_number, 2);
        assert_eq!(data.filenames.len(), 4);
        assert!(data.filenames[0].contains("/c_b_"));
        assert!(data.filenames[0].ends_with("_1_1_1_0.fits"));
        assert!(data.filenames[1..3].iter().all(|name| name.contains("/c_e_")));
        assert!(data.filenames[3].contains("/c_b_"));
        assert!(data.filenames[3].ends_with("_3_1_1_0.fits"));
    }

    #[test]
    fn test_multrun_without_config() {
        let dir = tempfile::tempdir().unwrap();
        let instrument = test_instrument(dir.path(), Arc::default(), Arc::default());
        let command = Command::Multrun(MultrunCommand::new(1, 10, 2, false, false));
        let result = MultrunImplementation.execute(&instrument, &command, &mut NoAcknowledge);
        assert!(matches!(result, Err(CcsError::NotConfigured)));
    }

    #[test]
    fn test_multrun_numbers_increase() {
        let dir = tempfile::tempdir().unwrap();
        let instrument = configured_instrument(dir.path(), Arc::default(), Arc::default());
        let command = Command::Multrun(MultrunCommand::new(1, 1, 1, false, false));
        for expected in 1..=2 {
            let done = MultrunImplementation.execute(&instrument, &command, &mut NoAcknowledge);
            match done.unwrap() {
                DoneData::Multrun(data) => assert_eq!(data.multrun_number, expected),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn test_glance() {
        let dir = tempfile::tempdir().unwrap();
        let instrument = configured_instrument(dir.path(), Arc::default(), Arc::default());
        let command = Command::Glance(GlanceCommand::new(2, 5));
        match GlanceImplementation.execute(&instrument, &command, &mut NoAcknowledge).unwrap() {
            DoneData::Expose(data) => {
                assert_eq!(data.filenames, vec![display_name(&dir.path().join("glance.fits"))]);
                assert!(dir.path().join("glance.fits").exists());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_run_at_waits() {
        let dir = tempfile::tempdir().unwrap();
        let instrument = configured_instrument(dir.path(), Arc::default(), Arc::default());
        let start = from_now(Duration::from_millis(200));
        let command = Command::RunAt(RunAtCommand::new(5, start, 5, false, false));

        let started = Instant::now();
        let done = RunAtImplementation.execute(&instrument, &command, &mut NoAcknowledge).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(150));
        match done {
            DoneData::Expose(data) => assert_eq!(data.filenames.len(), 1),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_run_at_abort_during_wait() {
        let dir = tempfile::tempdir().unwrap();
        let instrument = configured_instrument(dir.path(), Arc::default(), Arc::default());
        let start = from_now(Duration::from_secs(5));
        let command = Command::RunAt(RunAtCommand::new(6, start, 5, false, false));

        let started = Instant::now();
        let result = std::thread::scope(|scope| {
            scope.spawn(|| {
                std::thread::sleep(Duration::from_millis(100));
                instrument.monitor().abort();
            });
            RunAtImplementation.execute(&instrument, &command, &mut NoAcknowledge)
        });
        assert!(matches!(result, Err(CcsError::Aborted)));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn test_run_at_start_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let instrument = configured_instrument(dir.path(), Arc::default(), Arc::default());
        for start_time in [
            Timestamp { seconds: u64::MAX, nanoseconds: 0 },
            Timestamp { seconds: u64::MAX, nanoseconds: 1_999_999_999 },
        ] {
            let command = Command::RunAt(RunAtCommand::new(7, start_time, 5, false, false));
            assert!(RunAtImplementation.ack_time(&instrument, &command) > Duration::ZERO);
            let result = RunAtImplementation.execute(&instrument, &command, &mut NoAcknowledge);
            assert!(matches!(result, Err(CcsError::InvalidParameter(_))));
        }
    }

    #[test]
    fn test_multrun_ack_time_saturates() {
        let dir = tempfile::tempdir().unwrap();
        let instrument = test_instrument(dir.path(), Arc::default(), Arc::default());
        let command = Command::Multrun(MultrunCommand::new(8, u64::MAX, u32::MAX, false, false));
        assert_eq!(MultrunImplementation.ack_time(&instrument, &command), Duration::MAX);
    }
}

