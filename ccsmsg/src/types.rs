//! Type definitions shared between the Ccs server and its peers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Timestamp type for instrument time
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    /// Seconds since UNIX epoch
    pub seconds: u64,
    /// Nanoseconds within the current second
    pub nanoseconds: u32,
}

impl Timestamp {
    /// Create a new timestamp from the current system time
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self::from_duration(duration)
    }

    pub fn from_duration(duration: Duration) -> Self {
        Self {
            seconds: duration.as_secs(),
            nanoseconds: duration.subsec_nanos(),
        }
    }

    /// The same instant as a `SystemTime`, or `None` if the platform
    /// cannot represent it
    pub fn to_system_time(&self) -> Option<SystemTime> {
        Duration::from_secs(self.seconds)
            .checked_add(Duration::from_nanos(u64::from(self.nanoseconds)))
            .and_then(|since_epoch| UNIX_EPOCH.checked_add(since_epoch))
    }
}

/// On-chip binning
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Binning {
    pub x: u32,
    pub y: u32,
}

impl Binning {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

impl Default for Binning {
    fn default() -> Self {
        Self { x: 1, y: 1 }
    }
}

/// Readout window in unbinned chip pixels, 1-based and inclusive
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Window {
    pub x_start: u32,
    pub y_start: u32,
    pub x_end: u32,
    pub y_end: u32,
}

impl Window {
    pub fn new(x_start: u32, y_start: u32, x_end: u32, y_end: u32) -> Self {
        Self { x_start, y_start, x_end, y_end }
    }

    pub fn width(&self) -> u32 {
        self.x_end.saturating_sub(self.x_start) + 1
    }

    pub fn height(&self) -> u32 {
        self.y_end.saturating_sub(self.y_start) + 1
    }

    /// True if the window is well formed and lies on a chip of the given size
    pub fn fits_chip(&self, x_size: u32, y_size: u32) -> bool {
        self.x_start >= 1
            && self.y_start >= 1
            && self.x_start <= self.x_end
            && self.y_start <= self.y_end
            && self.x_end <= x_size
            && self.y_end <= y_size
    }
}

/// Output amplifier used for readout
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Amplifier {
    #[default]
    Bottom,
    Top,
    Both,
}

/// Instrument configuration sent with the CONFIG command
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CcdConfig {
    /// Name used in FITS headers and status
    pub name: String,
    pub binning: Binning,
    pub amplifier: Amplifier,
    /// Readout windows, empty for a full frame
    #[serde(default)]
    pub windows: Vec<Window>,
    pub lower_filter: String,
    pub upper_filter: String,
    #[serde(default)]
    pub calibrate_before: bool,
    #[serde(default)]
    pub calibrate_after: bool,
}

impl CcdConfig {
    pub fn new(
        name: impl Into<String>,
        binning: Binning,
        lower_filter: impl Into<String>,
        upper_filter: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            binning,
            amplifier: Amplifier::default(),
            windows: Vec::new(),
            lower_filter: lower_filter.into(),
            upper_filter: upper_filter.into(),
            calibrate_before: false,
            calibrate_after: false,
        }
    }

    pub fn with_windows(mut self, windows: Vec<Window>) -> Self {
        self.windows = windows;
        self
    }

    /// Number of files one exposure produces
    pub fn window_count(&self) -> usize {
        self.windows.len().max(1)
    }
}

/// Exposure type codes used in observation filenames
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExposureCode {
    Arc,
    Bias,
    Dark,
    Exposure,
    SkyFlat,
    Standard,
    LampFlat,
    Acquire,
}

impl ExposureCode {
    pub fn to_char(&self) -> char {
        match self {
            ExposureCode::Arc => 'a',
            ExposureCode::Bias => 'b',
            ExposureCode::Dark => 'd',
            ExposureCode::Exposure => 'e',
            ExposureCode::SkyFlat => 'f',
            ExposureCode::Standard => 's',
            ExposureCode::LampFlat => 'w',
            ExposureCode::Acquire => 'q',
        }
    }

    pub fn from_char(value: char) -> Option<Self> {
        match value {
            'a' => Some(ExposureCode::Arc),
            'b' => Some(ExposureCode::Bias),
            'd' => Some(ExposureCode::Dark),
            'e' => Some(ExposureCode::Exposure),
            'f' => Some(ExposureCode::SkyFlat),
            's' => Some(ExposureCode::Standard),
            'w' => Some(ExposureCode::LampFlat),
            'q' => Some(ExposureCode::Acquire),
            _ => None,
        }
    }

    /// Value of the OBSTYPE header keyword
    pub fn obstype(&self) -> &'static str {
        match self {
            ExposureCode::Arc => "ARC",
            ExposureCode::Bias => "BIAS",
            ExposureCode::Dark => "DARK",
            ExposureCode::Exposure | ExposureCode::Standard => "EXPOSE",
            ExposureCode::SkyFlat | ExposureCode::LampFlat => "SKY-FLAT",
            ExposureCode::Acquire => "ACQUIRE",
        }
    }
}

/// Reduction results returned by the data pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReductionResult {
    /// Name of the reduced file
    pub filename: String,
    /// FWHM seeing in arcseconds, zero or negative if it could not be measured
    pub seeing: f64,
    /// Mean counts of the frame, or peak counts of the brightest object
    pub counts: f64,
    pub x_pix: f64,
    pub y_pix: f64,
    pub photometricity: f64,
    pub sky_brightness: f64,
    pub saturation: bool,
}

/// Value of a FITS header card
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum FitsValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for FitsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FitsValue::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            FitsValue::Int(i) => write!(f, "{}", i),
            FitsValue::Float(x) => write!(f, "{:E}", x),
            FitsValue::Bool(b) => write!(f, "{}", if *b { "T" } else { "F" }),
        }
    }
}

/// A single FITS header card
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FitsCard {
    pub keyword: String,
    pub value: FitsValue,
    #[serde(default)]
    pub comment: String,
}

impl FitsCard {
    pub fn new(keyword: impl Into<String>, value: FitsValue, comment: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            value,
            comment: comment.into(),
        }
    }
}

/// State of the CCD controller as reported by the driver
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum CcdState {
    #[default]
    Idle,
    Exposing,
    Reading,
    Paused,
    Aborting,
}

/// Level of a REBOOT command
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RebootLevel {
    /// Reload configuration and reset the driver
    Redatum,
    /// Restart the server process
    Software,
    /// Reboot the instrument computer
    Hardware,
    /// Power the instrument computer off
    PowerOff,
}

impl RebootLevel {
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            1 => Some(RebootLevel::Redatum),
            2 => Some(RebootLevel::Software),
            3 => Some(RebootLevel::Hardware),
            4 => Some(RebootLevel::PowerOff),
            _ => None,
        }
    }

    pub fn level(&self) -> u8 {
        match self {
            RebootLevel::Redatum => 1,
            RebootLevel::Software => 2,
            RebootLevel::Hardware => 3,
            RebootLevel::PowerOff => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_now() {
        let ts = Timestamp::now();
        assert!(ts.seconds > 0);
    }

    #[test]
    fn test_timestamp_to_system_time() {
        let ts = Timestamp { seconds: 1_700_000_000, nanoseconds: 500 };
        let since_epoch = ts.to_system_time().unwrap().duration_since(UNIX_EPOCH).unwrap();
        assert_eq!(Timestamp::from_duration(since_epoch), ts);

        assert_eq!(Timestamp { seconds: u64::MAX, nanoseconds: 0 }.to_system_time(), None);
        let carries = Timestamp { seconds: u64::MAX, nanoseconds: 1_999_999_999 };
        assert_eq!(carries.to_system_time(), None);
    }

    #[test]
    fn test_window_bounds() {
        let window = Window::new(1, 1, 100, 50);
        assert_eq!(window.width(), 100);
        assert_eq!(window.height(), 50);
        assert!(window.fits_chip(2048, 2048));
        assert!(!window.fits_chip(99, 2048));
        assert!(!Window::new(0, 1, 10, 10).fits_chip(2048, 2048));
        assert!(!Window::new(20, 1, 10, 10).fits_chip(2048, 2048));
    }

    #[test]
    fn test_exposure_code_chars() {
        assert_eq!(ExposureCode::SkyFlat.to_char(), 'f');
        assert_eq!(ExposureCode::from_char('b'), Some(ExposureCode::Bias));
        assert_eq!(ExposureCode::from_char('z'), None);
    }

    #[test]
    fn test_window_count() {
        let config = CcdConfig::new("test", Binning::new(2, 2), "clear", "clear");
        assert_eq!(config.window_count(), 1);
        let windows = vec![Window::new(1, 1, 10, 10), Window::new(20, 20, 30, 30)];
        let config = config.with_windows(windows);
        assert_eq!(config.window_count(), 2);
    }

    #[test]
    fn test_fits_value_display() {
        assert_eq!(FitsValue::String("it's".to_string()).to_string(), "'it''s'");
        assert_eq!(FitsValue::Bool(true).to_string(), "T");
        assert_eq!(FitsValue::Int(-3).to_string(), "-3");
    }

    #[test]
    fn test_reboot_level() {
        assert_eq!(RebootLevel::from_level(2), Some(RebootLevel::Software));
        assert_eq!(RebootLevel::PowerOff.level(), 4);
        assert_eq!(RebootLevel::from_level(9), None);
    }
}
