//! CCD driver interface
//!
//! The CCD controller library is reached only through `CcdDriver`. The
//! driver sits behind a mutex for the length of an exposure, so everything
//! another thread needs while an exposure runs goes through the driver's
//! `CcdMonitor` instead: abort, progress, temperature and the last status
//! lines the driver reported.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ccsmsg::{Amplifier, Binning, CcdState, CcsResult, FitsCard, Window};

use crate::config::CcdSetup;

/// One exposure as handed to the driver
#[derive(Debug, Clone)]
pub struct ExposureRequest<'a> {
    pub open_shutter: bool,
    pub exposure: Duration,
    /// One file per readout window
    pub filenames: &'a [PathBuf],
    pub header: &'a [FitsCard],
}

/// Operations of the CCD controller library
pub trait CcdDriver: Send {
    /// Initialise the controller and start cooling
    fn setup(&mut self, setup: &CcdSetup) -> CcsResult<()>;

    /// Set binning, amplifier and readout windows. No windows means full frame.
    fn setup_dimensions(
        &mut self,
        binning: Binning,
        amplifier: Amplifier,
        windows: &[Window],
    ) -> CcsResult<()>;

    /// Move a filter wheel to a position
    fn move_filter_wheel(&mut self, wheel: usize, position: usize) -> CcsResult<()>;

    /// Take an exposure and save one file per window. Returns `Aborted` if
    /// the monitor's abort flag was raised.
    fn expose(&mut self, request: &ExposureRequest<'_>) -> CcsResult<()>;

    /// Shared progress and abort handle
    fn monitor(&self) -> Arc<CcdMonitor>;

    /// Lines describing the controller, for full status
    fn status_strings(&self) -> Vec<String>;

    /// Stop cooling and close the controller
    fn shutdown(&mut self) -> CcsResult<()>;
}

#[derive(Debug, Default)]
struct MonitorState {
    state: CcdState,
    exposure_start: Option<Instant>,
    exposure_length: Duration,
    temperature_c: Option<f64>,
    status_lines: Vec<String>,
}

/// Exposure progress and abort flag shared between the driver and the server
#[derive(Debug, Default)]
pub struct CcdMonitor {
    aborted: AtomicBool,
    inner: Mutex<MonitorState>,
}

impl CcdMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the exposure in progress, if any, to stop
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        if let Ok(mut inner) = self.inner.lock() {
            if inner.state != CcdState::Idle {
                inner.state = CcdState::Aborting;
            }
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub fn clear_abort(&self) {
        self.aborted.store(false, Ordering::SeqCst);
    }

    pub fn set_state(&self, state: CcdState) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.state = state;
            if state == CcdState::Idle {
                inner.exposure_start = None;
            }
        }
    }

    pub fn state(&self) -> CcdState {
        self.inner.lock().map(|inner| inner.state).unwrap_or_default()
    }

    pub fn start_exposure(&self, length: Duration) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.state = CcdState::Exposing;
            inner.exposure_start = Some(Instant::now());
            inner.exposure_length = length;
        }
    }

    /// Length and elapsed time of the current exposure
    pub fn exposure_progress(&self) -> (Duration, Duration) {
        self.inner
            .lock()
            .map(|inner| {
                let elapsed = inner.exposure_start.map(|start| start.elapsed()).unwrap_or_default();
                (inner.exposure_length, elapsed.min(inner.exposure_length))
            })
            .unwrap_or_default()
    }

    pub fn set_temperature(&self, temperature_c: f64) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.temperature_c = Some(temperature_c);
        }
    }

    pub fn temperature(&self) -> Option<f64> {
        self.inner.lock().ok().and_then(|inner| inner.temperature_c)
    }

    pub fn set_status_lines(&self, lines: Vec<String>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.status_lines = lines;
        }
    }

    /// Driver status as of its last operation
    pub fn status_lines(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|inner| inner.status_lines.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_flag() {
        let monitor = CcdMonitor::new();
        assert!(!monitor.is_aborted());
        monitor.abort();
        assert!(monitor.is_aborted());
        assert_eq!(monitor.state(), CcdState::Idle);
        monitor.clear_abort();
        assert!(!monitor.is_aborted());
    }

    #[test]
    fn test_abort_while_exposing() {
        let monitor = CcdMonitor::new();
        monitor.start_exposure(Duration::from_secs(10));
        monitor.abort();
        assert_eq!(monitor.state(), CcdState::Aborting);
    }

    #[test]
    fn test_exposure_progress() {
        let monitor = CcdMonitor::new();
        monitor.start_exposure(Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(20));
        let (length, elapsed) = monitor.exposure_progress();
        assert_eq!(length, Duration::from_millis(5));
        assert_eq!(elapsed, length);
        monitor.set_state(CcdState::Idle);
        assert_eq!(monitor.exposure_progress().1, Duration::ZERO);
    }

    #[test]
    fn test_status_lines() {
        let monitor = CcdMonitor::new();
        assert!(monitor.status_lines().is_empty());
        monitor.set_status_lines(vec!["Driver: simulated".to_string()]);
        monitor.start_exposure(Duration::from_secs(1));
        assert_eq!(monitor.status_lines(), vec!["Driver: simulated".to_string()]);
    }
}
