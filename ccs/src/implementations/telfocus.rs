//! TELFOCUS
//!
//! Steps the telescope focus through a range, measures the seeing of a frame
//! at each position, fits a parabola to seeing against focus and leaves the
//! telescope at the focus of best seeing.

use std::time::Duration;

use log::{info, warn};
use ccsmsg::{
    CcsError, CcsResult, Command, CommandType, DoneData, ExposureCode, TelFocusCommand,
    TelFocusData,
};

use crate::focus_fit::{fit_focus, MIN_FIT_POSITIONS};
use crate::implementation::{Acknowledger, CommandImplementation};
use crate::implementations::wrong_command;
use crate::instrument::Instrument;

/// Slack when counting positions, so `0.0..=0.3` by `0.1` gives four
const STEP_TOLERANCE: f64 = 1e-6;

/// Focus positions the command asks for, start first
pub fn focus_positions(cmd: &TelFocusCommand, max_positions: usize) -> CcsResult<Vec<f64>> {
    let span = cmd.focus_end - cmd.focus_start;
    if !cmd.focus_step.is_finite() || cmd.focus_step == 0.0 || !span.is_finite() {
        return Err(CcsError::invalid("Focus range and step must be finite, step non-zero"));
    }
    if span != 0.0 && span.signum() != cmd.focus_step.signum() {
        return Err(CcsError::invalid("Focus step points away from the end of the range"));
    }

    // Compare as a float first; a huge range would saturate the cast
    let steps = (span / cmd.focus_step + STEP_TOLERANCE).floor();
    if steps + 1.0 > max_positions as f64 {
        return Err(CcsError::InvalidParameter(format!(
            "{} focus positions, at most {}",
            steps + 1.0,
            max_positions
        )));
    }
    let count = steps as usize + 1;
    if count < MIN_FIT_POSITIONS {
        return Err(CcsError::InvalidParameter(format!(
            "{} focus positions, need at least {}", count, MIN_FIT_POSITIONS
        )));
    }
    Ok((0..count).map(|i| cmd.focus_start + cmd.focus_step * i as f64).collect())
}

pub struct TelFocusImplementation;

impl TelFocusImplementation {
    fn frame_time(instrument: &Instrument, exposure: Duration) -> Duration {
        let config = instrument.config();
        exposure
            .saturating_add(config.ccd.readout)
            .saturating_add(Duration::from_millis(config.telfocus.frame_overhead_ms))
    }
}

impl CommandImplementation for TelFocusImplementation {
    fn ack_time(&self, instrument: &Instrument, command: &Command) -> Duration {
        match command {
            Command::TelFocus(cmd) => {
                let max_positions = instrument.config().telfocus.max_positions;
                let count = focus_positions(cmd, max_positions).map(|p| p.len()).unwrap_or(1);
                Self::frame_time(instrument, Duration::from_millis(cmd.exposure_ms))
                    .saturating_mul(count as u32)
            }
            _ => Self::frame_time(instrument, Duration::ZERO),
        }
    }

    fn execute(
        &self,
        instrument: &Instrument,
        command: &Command,
        ack: &mut dyn Acknowledger,
    ) -> CcsResult<DoneData> {
        let Command::TelFocus(cmd) = command else {
            return Err(wrong_command(CommandType::TelFocus, command));
        };

        let telfocus = instrument.config().telfocus;
        let positions = focus_positions(cmd, telfocus.max_positions)?;
        instrument.current_config()?;

        let exposure = Duration::from_millis(cmd.exposure_ms);
        let frame_time = Self::frame_time(instrument, exposure);
        let status = instrument.status();
        let multrun = instrument.next_multrun()?;
        status.start_exposures(positions.len() as u32);
        info!("TELFOCUS multrun {}: {} positions from {} to {} mm",
            multrun, positions.len(), cmd.focus_start, cmd.focus_end);

        let mut samples = Vec::with_capacity(positions.len());
        for (index, &focus) in positions.iter().enumerate() {
            instrument.check_abort()?;
            ack.acknowledge(frame_time.saturating_mul((positions.len() - index) as u32))?;

            let focus = instrument.telescope().set_focus(focus)?;
            status.set_exposure_number(index as u32 + 1);
            let files = instrument.expose_frame(ExposureCode::Exposure, exposure, true)?;
            let reduction = instrument.pipeline().expose_reduce(&files[0])?;
            if reduction.seeing > 0.0 {
                info!("Focus {:.3} mm: seeing {:.2} arcsec", focus, reduction.seeing);
                samples.push((focus, reduction.seeing));
            } else {
                warn!("Focus {:.3} mm: no seeing measured in {}", focus, reduction.filename);
            }
        }

        if samples.len() < telfocus.min_samples {
            return Err(CcsError::Fit(format!(
                "{} usable frames, need {}", samples.len(), telfocus.min_samples
            )));
        }
        let fit = fit_focus(&samples)?;
        let focus_min = fit.minimum();
        let (low, high) = if cmd.focus_start <= cmd.focus_end {
            (cmd.focus_start, cmd.focus_end)
        } else {
            (cmd.focus_end, cmd.focus_start)
        };
        if focus_min < low || focus_min > high {
            return Err(CcsError::Fit(format!(
                "Best focus {:.3} mm outside {:.3} to {:.3} mm", focus_min, low, high
            )));
        }

        instrument.check_abort()?;
        instrument.telescope().set_focus(focus_min)?;
        info!("Best focus {:.3} mm, seeing {:.2} arcsec", focus_min, fit.seeing_at_minimum());

        Ok(DoneData::TelFocus(TelFocusData {
            focus_min,
            seeing_min: fit.seeing_at_minimum(),
            a: fit.a,
            b: fit.b,
            c: fit.c,
            chi_squared: fit.chi_squared,
            samples,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::implementation::tests::RecordingAcknowledger;
    use crate::implementation::NoAcknowledge;
    use crate::instrument::tests::configured_instrument;
    use crate::pipeline::tests::MockPipeline;
    use crate::telescope::tests::MockTelescope;

    #[test]
    fn test_focus_positions() {
        let cmd = TelFocusCommand::new(1, 0.0, 0.3, 0.1, 10);
        let positions = focus_positions(&cmd, 20).unwrap();
        assert_eq!(positions.len(), 4);
        assert!((positions[3] - 0.3).abs() < 1e-12);

        let descending = TelFocusCommand::new(1, 1.0, 0.0, -0.25, 10);
        assert_eq!(focus_positions(&descending, 20).unwrap().len(), 5);

        for bad in [
            TelFocusCommand::new(1, 0.0, 1.0, 0.0, 10),
            TelFocusCommand::new(1, 0.0, 1.0, -0.1, 10),
            TelFocusCommand::new(1, 0.0, 0.1, 0.1, 10),
            TelFocusCommand::new(1, 0.0, 10.0, 0.1, 10),
        ] {
            assert!(focus_positions(&bad, 20).is_err());
        }
    }

    #[test]
    fn test_telfocus() {
        let dir = tempfile::tempdir().unwrap();
        let seeing: Vec<f64> = (0..5)
            .map(|i| {
                let focus = 0.1 * i as f64;
                3.0 * (focus - 0.25) * (focus - 0.25) + 1.2
            })
            .collect();
        let telescope = Arc::new(MockTelescope::default());
        let pipeline = Arc::new(MockPipeline::with_seeing(&seeing));
        let instrument = configured_instrument(dir.path(), telescope.clone(), pipeline);

        let command = Command::TelFocus(TelFocusCommand::new(1, 0.0, 0.4, 0.1, 5));
        let mut ack = RecordingAcknowledger::default();
        let done = TelFocusImplementation.execute(&instrument, &command, &mut ack).unwrap();

        let data = match done {
            DoneData::TelFocus(data) => data,
            other => panic!("unexpected {:?}", other),
        };
        assert!((data.focus_min - 0.25).abs() < 1e-6);
        assert!((data.seeing_min - 1.2).abs() < 1e-6);
        assert_eq!(data.samples.len(), 5);
        assert_eq!(ack.acks.len(), 5);

        let focus = telescope.focus.lock().unwrap();
        assert_eq!(focus.len(), 6);
        assert!((focus[5] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_minimum_outside_range() {
        let dir = tempfile::tempdir().unwrap();
        // Still falling at the end of the range
        let pipeline = Arc::new(MockPipeline::with_seeing(&[3.0, 2.5, 2.1, 1.8, 1.6]));
        let instrument = configured_instrument(dir.path(), Arc::default(), pipeline);

        let command = Command::TelFocus(TelFocusCommand::new(1, 0.0, 0.4, 0.1, 5));
        let result = TelFocusImplementation.execute(&instrument, &command, &mut NoAcknowledge);
        assert!(matches!(result, Err(CcsError::Fit(_))));
    }

    #[test]
    fn test_too_few_measurements() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Arc::new(MockPipeline::with_seeing(&[0.0, 2.0, 0.0, 0.0, 1.9]));
        let instrument = configured_instrument(dir.path(), Arc::default(), pipeline);

        let command = Command::TelFocus(TelFocusCommand::new(1, 0.0, 0.4, 0.1, 5));
        let result = TelFocusImplementation.execute(&instrument, &command, &mut NoAcknowledge);
        assert!(matches!(result, Err(CcsError::Fit(_))));
    }

    #[test]
    fn test_huge_focus_range_rejected() {
        let cmd = TelFocusCommand::new(1, 0.0, 1e300, 1.0, 10);
        assert!(matches!(focus_positions(&cmd, 20), Err(CcsError::InvalidParameter(_))));

        let overflowing = TelFocusCommand::new(1, -1e308, 1e308, 1.0, 10);
        assert!(matches!(focus_positions(&overflowing, 20), Err(CcsError::InvalidParameter(_))));

        let dir = tempfile::tempdir().unwrap();
        let instrument = configured_instrument(dir.path(), Arc::default(), Arc::default());
        let command = Command::TelFocus(cmd);
        let ack_time = TelFocusImplementation.ack_time(&instrument, &command);
        assert!(ack_time >= Duration::from_millis(10));
        let result = TelFocusImplementation.execute(&instrument, &command, &mut NoAcknowledge);
        assert!(matches!(result, Err(CcsError::InvalidParameter(_))));
    }
}
