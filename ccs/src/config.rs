//! Configuration loading for Ccs
//!
//! The configuration file is JSON. It is read into the `*Json` structures
//! below, which mirror the file, and then checked and converted into the
//! typed configuration the server uses.

use std::fs::File;
use std::io::BufReader;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use ccsmsg::{Binning, CcsError, CcsResult, FitsCard};

/// Load the Ccs configuration from a JSON file
pub fn load_config<P: AsRef<Path>>(path: P) -> CcsResult<CcsConfig> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let config_json: CcsConfigJson = serde_json::from_reader(reader)?;
    config_json.to_ccs_config()
}

/// Configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CcsConfigJson {
    pub server: ServerConfigJson,
    pub instrument: InstrumentConfigJson,
    pub ccd: CcdSetupJson,
    #[serde(default)]
    pub filter_wheels: Vec<FilterWheelConfig>,
    pub iss: PeerConfigJson,
    pub dprt: PeerConfigJson,
    #[serde(default)]
    pub fits: FitsConfigJson,
    #[serde(default)]
    pub telfocus: TelFocusConfig,
    pub twilight_calibrate: TwilightCalibrateConfigJson,
    #[serde(default)]
    pub reboot: RebootConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfigJson {
    pub address: String,
    pub port: u16,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

fn default_read_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentConfigJson {
    pub name: String,
    /// Single letter starting every observation filename
    pub code: String,
    pub data_dir: String,
    pub glance_filename: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CcdSetupJson {
    pub driver: String,
    pub x_size: u32,
    pub y_size: u32,
    pub max_bin: u32,
    pub max_windows: usize,
    pub readout_ms: u64,
    pub target_temperature_c: f64,
}

/// Filters loaded in one wheel, indexed by wheel position
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilterWheelConfig {
    pub name: String,
    pub filters: Vec<String>,
}

impl FilterWheelConfig {
    /// Wheel position holding the named filter
    pub fn position(&self, filter: &str) -> Option<usize> {
        self.filters.iter().position(|f| f == filter)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfigJson {
    pub address: String,
    pub port: u16,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FitsConfigJson {
    #[serde(default)]
    pub defaults: Vec<FitsCard>,
}

/// TELFOCUS tunables
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TelFocusConfig {
    /// Fewest usable seeing measurements for a fit
    pub min_samples: usize,
    /// Most focus positions one command may ask for
    pub max_positions: usize,
    /// Time allowed per frame on top of exposure and readout
    pub frame_overhead_ms: u64,
}

impl Default for TelFocusConfig {
    fn default() -> Self {
        Self {
            min_samples: 3,
            max_positions: 50,
            frame_overhead_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwilightCalibrateConfigJson {
    pub state_filename: String,
    pub min_exposure_ms: u64,
    pub max_exposure_ms: u64,
    pub sunset_initial_exposure_ms: u64,
    pub sunrise_initial_exposure_ms: u64,
    pub frame_overhead_ms: u64,
    pub min_counts: f64,
    pub best_counts: f64,
    pub max_counts: f64,
    #[serde(default)]
    pub offsets: Vec<OffsetConfig>,
    #[serde(default)]
    pub sunset: Vec<CalibrationJson>,
    #[serde(default)]
    pub sunrise: Vec<CalibrationJson>,
}

/// Telescope offset applied before a flat field
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct OffsetConfig {
    pub ra_arcsec: f64,
    pub dec_arcsec: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationJson {
    pub bin: u32,
    pub lower_filter: String,
    pub upper_filter: String,
    /// Seconds before the calibration is due again
    pub frequency_s: u64,
    /// Good frames wanted
    pub frame_count: u32,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RebootConfig {
    /// Permit the hardware and power-off levels
    #[serde(default)]
    pub hardware_enabled: bool,
}

/// Kind of CCD driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    Simulated,
}

/// Command server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// How long a client may take to send its command
    pub read_timeout: Duration,
}

/// Instrument identity and file locations
#[derive(Debug, Clone)]
pub struct InstrumentConfig {
    pub name: String,
    pub code: char,
    pub data_dir: PathBuf,
    pub glance_filename: PathBuf,
}

/// CCD geometry and driver selection
#[derive(Debug, Clone)]
pub struct CcdSetup {
    pub driver: DriverKind,
    pub x_size: u32,
    pub y_size: u32,
    pub max_bin: u32,
    pub max_windows: usize,
    pub readout: Duration,
    pub target_temperature_c: f64,
}

/// Address and timeout of the ISS or DpRt
#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub address: SocketAddr,
    pub timeout: Duration,
}

/// One sky-flat calibration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Calibration {
    pub binning: Binning,
    pub lower_filter: String,
    pub upper_filter: String,
    pub frequency: Duration,
    pub frame_count: u32,
}

impl Calibration {
    /// Key identifying the calibration in the state file
    pub fn key(&self) -> String {
        format!("{}x{}.{}.{}", self.binning.x, self.binning.y, self.lower_filter, self.upper_filter)
    }
}

/// TWILIGHT_CALIBRATE configuration
#[derive(Debug, Clone)]
pub struct TwilightCalibrateConfig {
    pub state_filename: PathBuf,
    pub min_exposure: Duration,
    pub max_exposure: Duration,
    pub sunset_initial_exposure: Duration,
    pub sunrise_initial_exposure: Duration,
    pub frame_overhead: Duration,
    pub min_counts: f64,
    pub best_counts: f64,
    pub max_counts: f64,
    pub offsets: Vec<OffsetConfig>,
    pub sunset: Vec<Calibration>,
    pub sunrise: Vec<Calibration>,
}

/// Typed Ccs configuration
#[derive(Debug, Clone)]
pub struct CcsConfig {
    pub server: ServerConfig,
    pub instrument: InstrumentConfig,
    pub ccd: CcdSetup,
    pub filter_wheels: Vec<FilterWheelConfig>,
    pub iss: PeerConfig,
    pub dprt: PeerConfig,
    pub fits_defaults: Vec<FitsCard>,
    pub telfocus: TelFocusConfig,
    pub twilight_calibrate: TwilightCalibrateConfig,
    pub reboot: RebootConfig,
}

impl CcsConfig {
    /// Look up a filter wheel by name
    pub fn filter_wheel(&self, name: &str) -> Option<(usize, &FilterWheelConfig)> {
        self.filter_wheels.iter().enumerate().find(|(_, wheel)| wheel.name == name)
    }
}

fn resolve(address: &str, port: u16) -> CcsResult<SocketAddr> {
    (address, port)
        .to_socket_addrs()
        .map_err(|e| CcsError::Config(format!("Cannot resolve {}:{}: {}", address, port, e)))?
        .next()
        .ok_or_else(|| CcsError::Config(format!("No address for {}:{}", address, port)))
}

impl CcsConfigJson {
    pub fn to_ccs_config(&self) -> CcsResult<CcsConfig> {
        let ccd = self.ccd.to_ccd_setup()?;
        let instrument = self.instrument.to_instrument_config()?;

        for wheel in &self.filter_wheels {
            if wheel.filters.is_empty() {
                return Err(CcsError::Config(format!("Filter wheel {} has no filters", wheel.name)));
            }
        }

        let twilight_calibrate = self
            .twilight_calibrate
            .to_twilight_config(&instrument, ccd.max_bin)?;

        Ok(CcsConfig {
            server: ServerConfig {
                listen_addr: resolve(&self.server.address, self.server.port)?,
                read_timeout: Duration::from_millis(self.server.read_timeout_ms),
            },
            instrument,
            ccd,
            filter_wheels: self.filter_wheels.clone(),
            iss: self.iss.to_peer_config()?,
            dprt: self.dprt.to_peer_config()?,
            fits_defaults: self.fits.defaults.clone(),
            telfocus: self.telfocus,
            twilight_calibrate,
            reboot: self.reboot,
        })
    }
}

impl InstrumentConfigJson {
    pub fn to_instrument_config(&self) -> CcsResult<InstrumentConfig> {
        let mut chars = self.code.chars();
        let code = match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_alphabetic() => c,
            _ => return Err(CcsError::Config(format!("Invalid instrument code: {}", self.code))),
        };

        let data_dir = PathBuf::from(&self.data_dir);
        let glance_filename = data_dir.join(&self.glance_filename);

        Ok(InstrumentConfig {
            name: self.name.clone(),
            code,
            data_dir,
            glance_filename,
        })
    }
}

impl CcdSetupJson {
    pub fn to_ccd_setup(&self) -> CcsResult<CcdSetup> {
        let driver = match self.driver.as_str() {
            "simulated" => DriverKind::Simulated,
            _ => return Err(CcsError::Config(format!("Invalid CCD driver: {}", self.driver))),
        };
        if self.x_size == 0 || self.y_size == 0 {
            return Err(CcsError::config("CCD size must be non-zero"));
        }
        if self.max_bin == 0 {
            return Err(CcsError::config("Maximum binning must be at least 1"));
        }

        Ok(CcdSetup {
            driver,
            x_size: self.x_size,
            y_size: self.y_size,
            max_bin: self.max_bin,
            max_windows: self.max_windows,
            readout: Duration::from_millis(self.readout_ms),
            target_temperature_c: self.target_temperature_c,
        })
    }
}

impl PeerConfigJson {
    pub fn to_peer_config(&self) -> CcsResult<PeerConfig> {
        Ok(PeerConfig {
            address: resolve(&self.address, self.port)?,
            timeout: Duration::from_millis(self.timeout_ms),
        })
    }
}

impl CalibrationJson {
    pub fn to_calibration(&self, max_bin: u32) -> CcsResult<Calibration> {
        if self.bin == 0 || self.bin > max_bin {
            return Err(CcsError::Config(format!("Invalid calibration binning: {}", self.bin)));
        }
        Ok(Calibration {
            binning: Binning::new(self.bin, self.bin),
            lower_filter: self.lower_filter.clone(),
            upper_filter: self.upper_filter.clone(),
            frequency: Duration::from_secs(self.frequency_s),
            frame_count: self.frame_count,
        })
    }
}

impl TwilightCalibrateConfigJson {
    pub fn to_twilight_config(
        &self,
        instrument: &InstrumentConfig,
        max_bin: u32,
    ) -> CcsResult<TwilightCalibrateConfig> {
        if self.min_exposure_ms == 0 || self.min_exposure_ms > self.max_exposure_ms {
            return Err(CcsError::config("Twilight exposure limits are inconsistent"));
        }
        if !(self.min_counts < self.best_counts && self.best_counts < self.max_counts) {
            return Err(CcsError::config("Twilight counts must satisfy min < best < max"));
        }

        let to_calibrations = |list: &[CalibrationJson]| -> CcsResult<Vec<Calibration>> {
            list.iter().map(|c| c.to_calibration(max_bin)).collect()
        };

        let clamp = |ms: u64| {
            Duration::from_millis(ms.clamp(self.min_exposure_ms, self.max_exposure_ms))
        };

        Ok(TwilightCalibrateConfig {
            state_filename: instrument.data_dir.join(&self.state_filename),
            min_exposure: Duration::from_millis(self.min_exposure_ms),
            max_exposure: Duration::from_millis(self.max_exposure_ms),
            sunset_initial_exposure: clamp(self.sunset_initial_exposure_ms),
            sunrise_initial_exposure: clamp(self.sunrise_initial_exposure_ms),
            frame_overhead: Duration::from_millis(self.frame_overhead_ms),
            min_counts: self.min_counts,
            best_counts: self.best_counts,
            max_counts: self.max_counts,
            offsets: self.offsets.clone(),
            sunset: to_calibrations(&self.sunset)?,
            sunrise: to_calibrations(&self.sunrise)?,
        })
    }
}

/// Configuration constants
pub mod constants {
    use std::time::Duration;

    /// Default configuration file
    pub const DEFAULT_CONFIG_PATH: &str = "ccs.json";

    /// How often the accept loop checks the running flag
    pub const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(250);

    /// Longest sleep between abort checks while exposing or waiting
    pub const ABORT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

    /// ACK time for commands that return at once
    pub const QUICK_COMMAND_TIME: Duration = Duration::from_secs(5);

    /// ACK time allowed for CONFIG, covering filter wheel moves
    pub const CONFIG_TIME: Duration = Duration::from_secs(60);

    /// Time allowed per frame on top of exposure and readout, for headers,
    /// file writing and the pipeline
    pub const FRAME_OVERHEAD: Duration = Duration::from_secs(10);

    /// Filter wheel holding `CcdConfig::lower_filter`
    pub const LOWER_WHEEL: &str = "lower";

    /// Filter wheel holding `CcdConfig::upper_filter`
    pub const UPPER_WHEEL: &str = "upper";
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Configuration used across the crate's tests, writing under `data_dir`
    pub(crate) fn test_config_json(data_dir: &Path) -> String {
        format!(r#"{{
            "server": {{ "address": "127.0.0.1", "port": 0, "read_timeout_ms": 2000 }},
            "instrument": {{
                "name": "TestCam",
                "code": "c",
                "data_dir": "{}",
                "glance_filename": "glance.fits"
            }},
            "ccd": {{
                "driver": "simulated",
                "x_size": 64,
                "y_size": 32,
                "max_bin": 4,
                "max_windows": 4,
                "readout_ms": 5,
                "target_temperature_c": -110.0
            }},
            "filter_wheels": [
                {{ "name": "lower", "filters": ["clear", "B", "V", "R"] }},
                {{ "name": "upper", "filters": ["clear", "Halpha", "ND1"] }}
            ],
            "iss": {{ "address": "127.0.0.1", "port": 7383, "timeout_ms": 1000 }},
            "dprt": {{ "address": "127.0.0.1", "port": 6880, "timeout_ms": 1000 }},
            "fits": {{
                "defaults": [
                    {{
                        "keyword": "ORIGIN",
                        "value": {{ "String": "Test Observatory" }},
                        "comment": "Origin"
                    }},
                    {{
                        "keyword": "INSTRUME",
                        "value": {{ "String": "TestCam" }},
                        "comment": "Instrument"
                    }}
                ]
            }},
            "telfocus": {{ "min_samples": 3, "max_positions": 20, "frame_overhead_ms": 100 }},
            "twilight_calibrate": {{
                "state_filename": "twilight_state.json",
                "min_exposure_ms": 10,
                "max_exposure_ms": 80,
                "sunset_initial_exposure_ms": 10,
                "sunrise_initial_exposure_ms": 80,
                "frame_overhead_ms": 5,
                "min_counts": 10000.0,
                "best_counts": 30000.0,
                "max_counts": 50000.0,
                "offsets": [
                    {{ "ra_arcsec": 0.0, "dec_arcsec": 0.0 }},
                    {{ "ra_arcsec": 20.0, "dec_arcsec": 20.0 }}
                ],
                "sunset": [
                    {{
                        "bin": 2, "lower_filter": "R", "upper_filter": "clear",
                        "frequency_s": 3600, "frame_count": 2
                    }}
                ],
                "sunrise": [
                    {{
                        "bin": 2, "lower_filter": "B", "upper_filter": "clear",
                        "frequency_s": 3600, "frame_count": 2
                    }}
                ]
            }}
        }}"#, data_dir.display())
    }

    pub(crate) fn test_config(data_dir: &Path) -> CcsConfig {
        let json: CcsConfigJson = serde_json::from_str(&test_config_json(data_dir)).unwrap();
        json.to_ccs_config().unwrap()
    }

    #[test]
    fn test_load_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(test_config_json(dir.path()).as_bytes()).unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.instrument.code, 'c');
        assert_eq!(config.ccd.driver, DriverKind::Simulated);
        assert_eq!(config.filter_wheels.len(), 2);
        assert_eq!(config.fits_defaults.len(), 2);
        assert_eq!(config.twilight_calibrate.sunset.len(), 1);
        assert_eq!(config.twilight_calibrate.sunset[0].binning, Binning::new(2, 2));
        assert_eq!(config.instrument.glance_filename, dir.path().join("glance.fits"));
    }

    #[test]
    fn test_shipped_config() {
        let json: CcsConfigJson = serde_json::from_str(include_str!("../../ccs.json")).unwrap();
        let config = json.to_ccs_config().unwrap();
        assert_eq!(config.server.listen_addr.port(), 8367);
        assert_eq!(config.twilight_calibrate.sunset.len(), 3);
        assert_eq!(config.twilight_calibrate.offsets.len(), 5);
    }

    #[test]
    fn test_filter_wheel_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let (index, wheel) = config.filter_wheel("upper").unwrap();
        assert_eq!(index, 1);
        assert_eq!(wheel.position("ND1"), Some(2));
        assert_eq!(wheel.position("Z"), None);
        assert!(config.filter_wheel("middle").is_none());
    }

    #[test]
    fn test_rejects_bad_instrument_code() {
        let json = InstrumentConfigJson {
            name: "x".to_string(),
            code: "cc".to_string(),
            data_dir: "/tmp".to_string(),
            glance_filename: "g.fits".to_string(),
        };
        assert!(matches!(json.to_instrument_config(), Err(CcsError::Config(_))));
    }

    #[test]
    fn test_rejects_unknown_driver() {
        let json = CcdSetupJson {
            driver: "libccd".to_string(),
            x_size: 10,
            y_size: 10,
            max_bin: 1,
            max_windows: 1,
            readout_ms: 0,
            target_temperature_c: 0.0,
        };
        assert!(json.to_ccd_setup().is_err());
    }

    #[test]
    fn test_rejects_inconsistent_counts() {
        let dir = tempfile::tempdir().unwrap();
        let mut json: CcsConfigJson = serde_json::from_str(&test_config_json(dir.path())).unwrap();
        json.twilight_calibrate.best_counts = 60000.0;
        assert!(json.to_ccs_config().is_err());
    }

    #[test]
    fn test_calibration_key() {
        let calibration = Calibration {
            binning: Binning::new(2, 2),
            lower_filter: "R".to_string(),
            upper_filter: "clear".to_string(),
            frequency: Duration::from_secs(60),
            frame_count: 3,
        };
        assert_eq!(calibration.key(), "2x2.R.clear");
    }
}
