//! TWILIGHT_CALIBRATE
//!
//! Takes sky flats while the sky brightness changes. Each configured
//! calibration (binning and filters) wants a number of frames whose mean
//! counts lie between the configured limits. After every frame the exposure
//! is scaled so the next one lands on the best counts. At sunset the sky
//! darkens, so a calibration ends early once the exposure it needs is longer
//! than the maximum; at sunrise it ends once the exposure needed is shorter
//! than the minimum. Telescope offsets between frames keep stars from landing
//! on the same pixels.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local, NaiveTime, Timelike, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use ccsmsg::{
    CcdConfig, CcsResult, Command, CommandType, DoneData, ExposureCode, TwilightCalibrateData,
};

use crate::config::{Calibration, TwilightCalibrateConfig};
use crate::implementation::{Acknowledger, CommandImplementation};
use crate::implementations::wrong_command;
use crate::instrument::{display_name, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwilightKind {
    Sunset,
    Sunrise,
}

impl TwilightKind {
    /// Afternoon and evening mean sunset
    pub fn for_time(time: NaiveTime) -> Self {
        if time.hour() >= 12 {
            TwilightKind::Sunset
        } else {
            TwilightKind::Sunrise
        }
    }

    fn name(&self) -> &'static str {
        match self {
            TwilightKind::Sunset => "sunset",
            TwilightKind::Sunrise => "sunrise",
        }
    }
}

/// When each calibration was last completed, kept in a JSON file
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TwilightState {
    #[serde(skip)]
    path: PathBuf,
    last_done: BTreeMap<String, DateTime<Utc>>,
}

impl TwilightState {
    /// Read the state file. A missing or unreadable file means nothing has
    /// been done yet.
    pub fn load(path: &Path) -> Self {
        let loaded = File::open(path)
            .map_err(|e| e.to_string())
            .and_then(|file| {
                serde_json::from_reader::<_, TwilightState>(BufReader::new(file))
                    .map_err(|e| e.to_string())
            });
        let mut state = match loaded {
            Ok(state) => state,
            Err(e) => {
                if path.exists() {
                    warn!("Ignoring twilight state {}: {}", path.display(), e);
                }
                TwilightState::default()
            }
        };
        state.path = path.to_path_buf();
        state
    }

    pub fn save(&self) -> CcsResult<()> {
        let file = File::create(&self.path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }

    fn key(kind: TwilightKind, calibration: &Calibration) -> String {
        format!("{}.{}", kind.name(), calibration.key())
    }

    pub fn is_due(
        &self,
        kind: TwilightKind,
        calibration: &Calibration,
        now: DateTime<Utc>,
    ) -> bool {
        match self.last_done.get(&Self::key(kind, calibration)) {
            Some(last) => match (now - *last).to_std() {
                Ok(since) => since >= calibration.frequency,
                Err(_) => false,
            },
            None => true,
        }
    }

    pub fn mark_done(&mut self, kind: TwilightKind, calibration: &Calibration, now: DateTime<Utc>) {
        self.last_done.insert(Self::key(kind, calibration), now);
    }
}

/// How one calibration ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Complete,
    /// Sky too dark for the longest exposure
    TooDark,
    /// Sky too bright for the shortest exposure
    TooBright,
    OutOfTime,
}

struct Twilight<'a> {
    instrument: &'a Instrument,
    config: &'a TwilightCalibrateConfig,
    kind: TwilightKind,
    deadline: Instant,
    exposure: Duration,
    offset_index: usize,
    data: TwilightCalibrateData,
}

impl Twilight<'_> {
    fn frame_time(&self) -> Duration {
        self.exposure + self.instrument.config().ccd.readout + self.config.frame_overhead
    }

    fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    fn next_offset(&mut self) -> CcsResult<()> {
        if self.config.offsets.is_empty() {
            return Ok(());
        }
        let offset = self.config.offsets[self.offset_index % self.config.offsets.len()];
        self.offset_index += 1;
        self.instrument.telescope().offset_ra_dec(offset.ra_arcsec, offset.dec_arcsec)
    }

    /// Exposure giving the best counts, if the sky still allows one
    fn scale_exposure(&mut self, counts: f64) -> Option<Outcome> {
        let min = self.config.min_exposure.as_secs_f64();
        let max = self.config.max_exposure.as_secs_f64();
        let required = if counts > 0.0 {
            self.exposure.as_secs_f64() * self.config.best_counts / counts
        } else {
            f64::INFINITY
        };
        debug!("{:.0} counts: next exposure {:.3} s", counts, required);

        match self.kind {
            TwilightKind::Sunset if required > max => return Some(Outcome::TooDark),
            TwilightKind::Sunrise if required < min => return Some(Outcome::TooBright),
            _ => {}
        }
        self.exposure = Duration::from_secs_f64(required.clamp(min, max));
        None
    }

    fn calibrate(
        &mut self,
        calibration: &Calibration,
        ack: &mut dyn Acknowledger,
    ) -> CcsResult<Outcome> {
        let instrument = self.instrument;
        let ccd_config = CcdConfig::new(
            format!("twilight {}", calibration.key()),
            calibration.binning,
            calibration.lower_filter.clone(),
            calibration.upper_filter.clone(),
        );
        instrument.apply_config(&ccd_config)?;

        let multrun = instrument.next_multrun()?;
        instrument.status().start_exposures(calibration.frame_count);
        info!(
            "Twilight {} multrun {}: {} frames wanted",
            calibration.key(),
            multrun,
            calibration.frame_count
        );

        let mut kept = 0;
        while kept < calibration.frame_count {
            instrument.check_abort()?;
            if self.frame_time() > self.remaining() {
                return Ok(Outcome::OutOfTime);
            }
            ack.acknowledge(self.remaining())?;

            self.next_offset()?;
            instrument.status().set_exposure_number(kept + 1);
            let files = instrument.expose_frame(ExposureCode::SkyFlat, self.exposure, true)?;
            let reduction = instrument.pipeline().calibrate_reduce(&files[0])?;
            let counts = reduction.counts;

            self.data.frames_taken += 1;
            self.data.last_counts = counts;
            if counts >= self.config.min_counts && counts <= self.config.max_counts {
                kept += 1;
                self.data.frames_kept += 1;
                self.data.last_filename = files.last().map(|file| display_name(file));
                info!("Kept {} with {:.0} counts", display_name(&files[0]), counts);
            } else {
                warn!("Rejected {} with {:.0} counts", display_name(&files[0]), counts);
                for file in &files {
                    if let Err(e) = fs::remove_file(file) {
                        if e.kind() != io::ErrorKind::NotFound {
                            warn!("Cannot remove {}: {}", file.display(), e);
                        }
                    }
                }
            }

            if let Some(outcome) = self.scale_exposure(counts) {
                return Ok(outcome);
            }
        }
        Ok(Outcome::Complete)
    }
}

/// Run the calibrations for one twilight within `budget`
pub fn run_calibrations(
    instrument: &Instrument,
    kind: TwilightKind,
    budget: Duration,
    now: DateTime<Utc>,
    ack: &mut dyn Acknowledger,
) -> CcsResult<TwilightCalibrateData> {
    let config = instrument.config();
    let tc = &config.twilight_calibrate;
    let (calibrations, initial) = match kind {
        TwilightKind::Sunset => (&tc.sunset, tc.sunset_initial_exposure),
        TwilightKind::Sunrise => (&tc.sunrise, tc.sunrise_initial_exposure),
    };

    let mut state = TwilightState::load(&tc.state_filename);
    let mut twilight = Twilight {
        instrument,
        config: tc,
        kind,
        deadline: Instant::now() + budget,
        exposure: initial,
        offset_index: 0,
        data: TwilightCalibrateData::default(),
    };
    info!(
        "Twilight calibrate at {}: {} calibrations, {:?} budget",
        kind.name(),
        calibrations.len(),
        budget
    );

    let mut result = Ok(());
    for calibration in calibrations {
        if !state.is_due(kind, calibration, now) {
            debug!("{} not due", calibration.key());
            continue;
        }
        match twilight.calibrate(calibration, ack) {
            Ok(Outcome::Complete) => {
                twilight.data.calibrations_completed += 1;
                state.mark_done(kind, calibration, Utc::now());
                if let Err(e) = state.save() {
                    result = Err(e);
                    break;
                }
            }
            Ok(Outcome::TooDark) => info!("{}: sky too dark", calibration.key()),
            Ok(Outcome::TooBright) => info!("{}: sky too bright", calibration.key()),
            Ok(Outcome::OutOfTime) => {
                info!("Out of time during {}", calibration.key());
                break;
            }
            Err(e) => {
                result = Err(e);
                break;
            }
        }
    }

    if twilight.offset_index > 0 {
        if let Err(e) = instrument.telescope().offset_ra_dec(0.0, 0.0) {
            warn!("Cannot reset telescope offsets: {}", e);
        }
    }
    result.map(|_| twilight.data)
}

pub struct TwilightCalibrateImplementation;

impl CommandImplementation for TwilightCalibrateImplementation {
    fn ack_time(&self, _instrument: &Instrument, command: &Command) -> Duration {
        match command {
            Command::TwilightCalibrate(cmd) => Duration::from_millis(cmd.time_to_complete_ms),
            _ => Duration::ZERO,
        }
    }

    fn execute(
        &self,
        instrument: &Instrument,
        command: &Command,
        ack: &mut dyn Acknowledger,
    ) -> CcsResult<DoneData> {
        let Command::TwilightCalibrate(cmd) = command else {
            return Err(wrong_command(CommandType::TwilightCalibrate, command));
        };

        let kind = TwilightKind::for_time(Local::now().time());
        let budget = Duration::from_millis(cmd.time_to_complete_ms);
        let data = run_calibrations(instrument, kind, budget, Utc::now(), ack)?;
        Ok(DoneData::TwilightCalibrate(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::implementation::NoAcknowledge;
    use crate::instrument::tests::test_instrument;
    use crate::pipeline::tests::MockPipeline;
    use crate::telescope::tests::MockTelescope;

    const BUDGET: Duration = Duration::from_secs(600);

    fn sunset(
        instrument: &Instrument,
        budget: Duration,
        now: DateTime<Utc>,
    ) -> CcsResult<TwilightCalibrateData> {
        run_calibrations(instrument, TwilightKind::Sunset, budget, now, &mut NoAcknowledge)
    }

    #[test]
    fn test_kind_for_time() {
        let evening = NaiveTime::from_hms_opt(18, 30, 0).unwrap();
        let morning = NaiveTime::from_hms_opt(5, 0, 0).unwrap();
        assert_eq!(TwilightKind::for_time(evening), TwilightKind::Sunset);
        assert_eq!(TwilightKind::for_time(morning), TwilightKind::Sunrise);
    }

    #[test]
    fn test_sunset_calibration() {
        let dir = tempfile::tempdir().unwrap();
        let telescope = Arc::new(MockTelescope::default());
        // Too bright, then two good frames
        let pipeline = Arc::new(MockPipeline::with_counts(&[60000.0, 30000.0, 25000.0]));
        let instrument = test_instrument(dir.path(), telescope.clone(), pipeline);

        let now = Utc::now();
        let data = sunset(&instrument, BUDGET, now).unwrap();
        assert_eq!(data.frames_taken, 3);
        assert_eq!(data.frames_kept, 2);
        assert_eq!(data.calibrations_completed, 1);
        assert_eq!(data.last_counts, 25000.0);

        let offsets = telescope.offsets.lock().unwrap().clone();
        assert_eq!(offsets.len(), 4);
        assert_eq!(offsets[1], (20.0, 20.0));
        assert_eq!(offsets[3], (0.0, 0.0));
        assert_eq!(instrument.status().config().unwrap().lower_filter, "R");

        // Done within its frequency, so not repeated
        let again = sunset(&instrument, BUDGET, now).unwrap();
        assert_eq!(again.frames_taken, 0);
        assert!(dir.path().join("twilight_state.json").exists());
    }

    #[test]
    fn test_rejected_frames_removed() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Arc::new(MockPipeline::with_counts(&[60000.0, 30000.0, 30000.0]));
        let instrument = test_instrument(dir.path(), Arc::default(), pipeline.clone());
        sunset(&instrument, BUDGET, Utc::now()).unwrap();

        let reduced = pipeline.reduced.lock().unwrap();
        assert!(!Path::new(&reduced[0]).exists());
        assert!(Path::new(&reduced[1]).exists());
    }

    #[test]
    fn test_sunset_too_dark() {
        let dir = tempfile::tempdir().unwrap();
        // 10 ms gives 5000 counts, so 60 ms next; that gives 2000, needing 900 ms
        let pipeline = Arc::new(MockPipeline::with_counts(&[5000.0, 2000.0]));
        let instrument = test_instrument(dir.path(), Arc::default(), pipeline);

        let data = sunset(&instrument, BUDGET, Utc::now()).unwrap();
        assert_eq!(data.frames_taken, 2);
        assert_eq!(data.frames_kept, 0);
        assert_eq!(data.calibrations_completed, 0);
    }

    #[test]
    fn test_sunrise_too_bright() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Arc::new(MockPipeline::with_counts(&[40000.0, 200000.0]));
        let instrument = test_instrument(dir.path(), Arc::default(), pipeline);

        let now = Utc::now();
        let mut ack = NoAcknowledge;
        let kind = TwilightKind::Sunrise;
        let data = run_calibrations(&instrument, kind, BUDGET, now, &mut ack).unwrap();
        assert_eq!(data.frames_taken, 2);
        assert_eq!(data.frames_kept, 1);
        assert_eq!(data.calibrations_completed, 0);
        assert_eq!(instrument.status().config().unwrap().lower_filter, "B");
    }

    #[test]
    fn test_out_of_time() {
        let dir = tempfile::tempdir().unwrap();
        let telescope = Arc::new(MockTelescope::default());
        let instrument = test_instrument(dir.path(), telescope.clone(), Arc::default());

        let data = sunset(&instrument, Duration::from_millis(1), Utc::now()).unwrap();
        assert_eq!(data.frames_taken, 0);
        assert!(telescope.offsets.lock().unwrap().is_empty());
    }

    #[test]
    fn test_state_due() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let calibration = Calibration {
            binning: ccsmsg::Binning::new(1, 1),
            lower_filter: "V".to_string(),
            upper_filter: "clear".to_string(),
            frequency: Duration::from_secs(3600),
            frame_count: 1,
        };
        let now = Utc::now();

        let mut state = TwilightState::load(&path);
        assert!(state.is_due(TwilightKind::Sunset, &calibration, now));
        state.mark_done(TwilightKind::Sunset, &calibration, now);
        state.save().unwrap();

        let state = TwilightState::load(&path);
        let half_hour = now + chrono::Duration::minutes(30);
        let past_hour = now + chrono::Duration::minutes(61);
        assert!(!state.is_due(TwilightKind::Sunset, &calibration, half_hour));
        assert!(state.is_due(TwilightKind::Sunset, &calibration, past_hour));
        assert!(state.is_due(TwilightKind::Sunrise, &calibration, now));
    }
}
