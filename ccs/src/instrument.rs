//! The instrument: CCD driver, telescope, pipeline and status together
//!
//! One `Instrument` is shared by every connection thread. The command
//! implementations do their work through it, so exposure sequencing, header
//! assembly and filename allocation live here rather than in each command.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::{Duration, SystemTime};

use chrono::{Local, Utc};
use log::{info, warn};
use ccsmsg::{CcdConfig, CcsError, CcsResult, Command, ExposureCode, FitsValue};

use crate::ccd::{CcdDriver, CcdMonitor, ExposureRequest};
use crate::config::constants::{
    ABORT_CHECK_INTERVAL, FRAME_OVERHEAD, LOWER_WHEEL, UPPER_WHEEL,
};
use crate::config::{load_config, CcsConfig, DriverKind};
use crate::filename::{glance_filenames, FilenameGenerator};
use crate::fits_header::FitsHeader;
use crate::pipeline::{DpRtPipeline, Pipeline};
use crate::sim_ccd::SimulatedCcd;
use crate::status::{CcsStatus, CommandGuard};
use crate::telescope::{IssTelescope, Telescope};

const CELSIUS_TO_KELVIN: f64 = 273.15;

/// Why the server stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal,
    Software,
    Hardware,
    PowerOff,
}

impl ShutdownReason {
    /// Exit status telling the supervising script what to do next
    pub fn exit_code(&self) -> i32 {
        match self {
            ShutdownReason::Signal => 0,
            ShutdownReason::Software => 10,
            ShutdownReason::Hardware => 11,
            ShutdownReason::PowerOff => 12,
        }
    }
}

pub struct Instrument {
    config: RwLock<Arc<CcsConfig>>,
    config_path: Option<PathBuf>,
    status: CcsStatus,
    ccd: Mutex<Box<dyn CcdDriver>>,
    monitor: Arc<CcdMonitor>,
    telescope: Arc<dyn Telescope>,
    pipeline: Arc<dyn Pipeline>,
    filenames: Mutex<FilenameGenerator>,
    running: Arc<AtomicBool>,
    shutdown_reason: Mutex<Option<ShutdownReason>>,
}

impl Instrument {
    pub fn new(
        config: CcsConfig,
        mut ccd: Box<dyn CcdDriver>,
        telescope: Arc<dyn Telescope>,
        pipeline: Arc<dyn Pipeline>,
        config_path: Option<PathBuf>,
    ) -> CcsResult<Self> {
        fs::create_dir_all(&config.instrument.data_dir)?;
        ccd.setup(&config.ccd)?;
        let monitor = ccd.monitor();
        monitor.set_status_lines(ccd.status_strings());

        let instrument = &config.instrument;
        let mut filenames = FilenameGenerator::new(&instrument.data_dir, instrument.code);
        filenames.resume_from_directory(Local::now().naive_local())?;

        Ok(Self {
            config: RwLock::new(Arc::new(config)),
            config_path,
            status: CcsStatus::new(),
            ccd: Mutex::new(ccd),
            monitor,
            telescope,
            pipeline,
            filenames: Mutex::new(filenames),
            running: Arc::new(AtomicBool::new(true)),
            shutdown_reason: Mutex::new(None),
        })
    }

    /// Build the instrument with the driver and peers the configuration names
    pub fn from_config(config: CcsConfig, config_path: Option<PathBuf>) -> CcsResult<Self> {
        let ccd: Box<dyn CcdDriver> = match config.ccd.driver {
            DriverKind::Simulated => Box::new(SimulatedCcd::new()),
        };
        let telescope = Arc::new(IssTelescope::new(&config.iss));
        let pipeline = Arc::new(DpRtPipeline::new(&config.dprt));
        Self::new(config, ccd, telescope, pipeline, config_path)
    }

    pub fn config(&self) -> Arc<CcsConfig> {
        match self.config.read() {
            Ok(config) => Arc::clone(&config),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn status(&self) -> &CcsStatus {
        &self.status
    }

    pub fn monitor(&self) -> &CcdMonitor {
        &self.monitor
    }

    pub fn telescope(&self) -> &dyn Telescope {
        self.telescope.as_ref()
    }

    pub fn pipeline(&self) -> &dyn Pipeline {
        self.pipeline.as_ref()
    }

    /// Run `op` on the locked driver, then publish the driver's status lines
    fn with_ccd<T>(&self, op: impl FnOnce(&mut dyn CcdDriver) -> CcsResult<T>) -> CcsResult<T> {
        let mut ccd = self
            .ccd
            .lock()
            .map_err(|_| CcsError::driver("CCD driver lock poisoned"))?;
        let result = op(&mut **ccd);
        self.monitor.set_status_lines(ccd.status_strings());
        result
    }

    /// Driver status lines, without waiting on an exposure in progress
    pub fn driver_status(&self) -> Vec<String> {
        self.monitor.status_lines()
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask the server to stop
    pub fn shutdown(&self, reason: ShutdownReason) {
        info!("Shutdown requested: {:?}", reason);
        if let Ok(mut current) = self.shutdown_reason.lock() {
            current.get_or_insert(reason);
        }
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn shutdown_reason(&self) -> ShutdownReason {
        self.shutdown_reason
            .lock()
            .ok()
            .and_then(|reason| *reason)
            .unwrap_or(ShutdownReason::Signal)
    }

    /// Claim the command slot. A command that claims it starts with the abort
    /// flag clear.
    pub fn begin_command(&self, command: &Command) -> CcsResult<CommandGuard<'_>> {
        let guard = self.status.begin_command(command)?;
        if guard.is_claimed() {
            self.monitor.clear_abort();
        }
        Ok(guard)
    }

    pub fn check_abort(&self) -> CcsResult<()> {
        if self.monitor.is_aborted() {
            Err(CcsError::Aborted)
        } else {
            Ok(())
        }
    }

    pub fn current_config(&self) -> CcsResult<CcdConfig> {
        self.status.config().ok_or(CcsError::NotConfigured)
    }

    /// Time one frame may take, for ACKs
    pub fn frame_time(&self, exposure: Duration) -> Duration {
        exposure
            .saturating_add(self.config().ccd.readout)
            .saturating_add(FRAME_OVERHEAD)
    }

    /// Sleep until `start`, stopping early on abort
    pub fn wait_until(&self, start: SystemTime) -> CcsResult<()> {
        loop {
            self.check_abort()?;
            let remaining = match start.duration_since(SystemTime::now()) {
                Ok(remaining) if !remaining.is_zero() => remaining,
                _ => return Ok(()),
            };
            thread::sleep(remaining.min(ABORT_CHECK_INTERVAL));
        }
    }

    /// Check a configuration against the camera and set the driver up for it.
    /// Returns the new config id.
    pub fn apply_config(&self, ccd_config: &CcdConfig) -> CcsResult<u32> {
        let config = self.config();
        let setup = &config.ccd;

        let binning = ccd_config.binning;
        let bin_range = 1..=setup.max_bin;
        if !bin_range.contains(&binning.x) || !bin_range.contains(&binning.y) {
            return Err(CcsError::InvalidParameter(format!(
                "Binning {}x{} outside 1..{}",
                binning.x, binning.y, setup.max_bin
            )));
        }
        if ccd_config.windows.len() > setup.max_windows {
            return Err(CcsError::InvalidParameter(format!(
                "{} windows, at most {}",
                ccd_config.windows.len(),
                setup.max_windows
            )));
        }
        let off_chip = ccd_config
            .windows
            .iter()
            .find(|w| !w.fits_chip(setup.x_size, setup.y_size));
        if let Some(window) = off_chip {
            return Err(CcsError::InvalidParameter(format!(
                "Window {:?} is off the chip",
                window
            )));
        }

        let filter_position = |wheel_name: &str, filter: &str| -> CcsResult<(usize, usize)> {
            let (wheel, wheel_config) = config
                .filter_wheel(wheel_name)
                .ok_or_else(|| CcsError::Config(format!("No {} filter wheel", wheel_name)))?;
            let position = wheel_config.position(filter).ok_or_else(|| {
                CcsError::InvalidParameter(format!("No filter {} in {} wheel", filter, wheel_name))
            })?;
            Ok((wheel, position))
        };
        let lower = filter_position(LOWER_WHEEL, &ccd_config.lower_filter)?;
        let upper = filter_position(UPPER_WHEEL, &ccd_config.upper_filter)?;

        self.with_ccd(|ccd| {
            ccd.setup_dimensions(binning, ccd_config.amplifier, &ccd_config.windows)?;
            self.check_abort()?;
            ccd.move_filter_wheel(lower.0, lower.1)?;
            self.check_abort()?;
            ccd.move_filter_wheel(upper.0, upper.1)
        })?;

        let id = self.status.set_config(ccd_config.clone());
        info!(
            "Configuration {} ({}) applied: bin {}x{}, filters {}/{}",
            id,
            ccd_config.name,
            binning.x,
            binning.y,
            ccd_config.lower_filter,
            ccd_config.upper_filter
        );
        Ok(id)
    }

    /// Start a new multrun and return its number
    pub fn next_multrun(&self) -> CcsResult<u32> {
        let multrun = self
            .filenames
            .lock()
            .map_err(|_| CcsError::driver("Filename lock poisoned"))?
            .next_multrun(Local::now().naive_local());
        self.status.set_multrun(multrun);
        Ok(multrun)
    }

    /// Take one frame of the current multrun and return its files
    pub fn expose_frame(
        &self,
        code: ExposureCode,
        exposure: Duration,
        open_shutter: bool,
    ) -> CcsResult<Vec<PathBuf>> {
        let ccd_config = self.current_config()?;
        let filenames = {
            let mut generator = self
                .filenames
                .lock()
                .map_err(|_| CcsError::driver("Filename lock poisoned"))?;
            generator.next_run();
            generator.filenames(code, ccd_config.window_count())
        };
        self.expose_files(code, exposure, open_shutter, &ccd_config, filenames)
    }

    /// Take one frame into the glance file
    pub fn expose_glance(&self, exposure: Duration) -> CcsResult<Vec<PathBuf>> {
        let ccd_config = self.current_config()?;
        let glance = self.config().instrument.glance_filename.clone();
        let filenames = glance_filenames(&glance, ccd_config.window_count());
        self.expose_files(ExposureCode::Exposure, exposure, true, &ccd_config, filenames)
    }

    fn expose_files(
        &self,
        code: ExposureCode,
        exposure: Duration,
        open_shutter: bool,
        ccd_config: &CcdConfig,
        filenames: Vec<PathBuf>,
    ) -> CcsResult<Vec<PathBuf>> {
        self.check_abort()?;
        let header = self.build_header(code, exposure, ccd_config);

        self.with_ccd(|ccd| {
            ccd.expose(&ExposureRequest {
                open_shutter,
                exposure,
                filenames: &filenames,
                header: header.cards(),
            })
        })?;

        if let Some(last) = filenames.last() {
            self.status.set_last_filename(&last.to_string_lossy());
            info!("Saved {}", last.display());
        }
        Ok(filenames)
    }

    /// Header cards for one exposure: configured defaults, then what the
    /// instrument knows, then the telescope's cards
    pub fn build_header(
        &self,
        code: ExposureCode,
        exposure: Duration,
        ccd_config: &CcdConfig,
    ) -> FitsHeader {
        let config = self.config();
        let exposure_status = self.status.exposure();
        let text = |value: &str| FitsValue::String(value.to_string());
        let int = |value: u32| FitsValue::Int(i64::from(value));
        let date_obs = Utc::now().format("%Y-%m-%dT%H:%M:%S%.3f").to_string();

        let mut header = FitsHeader::new();
        header.extend(config.fits_defaults.iter().cloned());
        header.add_value("INSTRUME", text(&config.instrument.name), "Instrument used");
        header.add_value("DATE-OBS", text(&date_obs), "Start of exposure (UTC)");
        let exptime = FitsValue::Float(exposure.as_secs_f64());
        header.add_value("EXPTIME", exptime, "Exposure length in seconds");
        header.add_value("OBSTYPE", text(code.obstype()), "Observation type");
        header.add_value("RUNNUM", int(exposure_status.multrun), "Multrun number");
        header.add_value("EXPNUM", int(exposure_status.number), "Exposure number in multrun");
        header.add_value("EXPTOTAL", int(exposure_status.count), "Exposures in multrun");
        header.add_value("CCDXBIN", int(ccd_config.binning.x), "Column binning");
        header.add_value("CCDYBIN", int(ccd_config.binning.y), "Row binning");
        header.add_value("FILTER1", text(&ccd_config.lower_filter), "Lower filter wheel");
        header.add_value("FILTER2", text(&ccd_config.upper_filter), "Upper filter wheel");
        header.add_value("CONFIGID", int(self.status.config_id()), "Configuration id");
        header.add_value("CONFNAME", text(&ccd_config.name), "Configuration name");
        if let Some(temperature) = self.monitor.temperature() {
            let kelvin = FitsValue::Float(temperature + CELSIUS_TO_KELVIN);
            header.add_value("CCDATEMP", kelvin, "CCD temperature in Kelvin");
        }

        match self.telescope.get_fits() {
            Ok(cards) => header.extend(cards),
            Err(e) => warn!("No telescope FITS cards: {}", e),
        }
        header
    }

    /// Reload the configuration file and set the driver up again
    pub fn redatum(&self) -> CcsResult<()> {
        let config = match &self.config_path {
            Some(path) => Arc::new(load_config(path)?),
            None => self.config(),
        };
        if config.server.listen_addr != self.config().server.listen_addr {
            warn!("Listen address change to {} needs a restart", config.server.listen_addr);
        }

        fs::create_dir_all(&config.instrument.data_dir)?;
        self.with_ccd(|ccd| ccd.setup(&config.ccd))?;
        self.status.reset();
        {
            let mut generator = self
                .filenames
                .lock()
                .map_err(|_| CcsError::driver("Filename lock poisoned"))?;
            let instrument = &config.instrument;
            *generator = FilenameGenerator::new(&instrument.data_dir, instrument.code);
            generator.resume_from_directory(Local::now().naive_local())?;
        }
        match self.config.write() {
            Ok(mut current) => *current = config,
            Err(poisoned) => *poisoned.into_inner() = config,
        }
        info!("Redatum complete");
        Ok(())
    }

    /// Stop the driver
    pub fn close(&self) -> CcsResult<()> {
        self.with_ccd(|ccd| ccd.shutdown())
    }

    pub fn data_dir(&self) -> PathBuf {
        self.config().instrument.data_dir.clone()
    }
}

/// File name as reported in replies
pub fn display_name(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
