//! Simulated CCD driver
//!
//! Stands in for the controller library on the bench and in tests. Exposures
//! take real time, honour abort, and leave a small but valid FITS file per
//! window so the pipeline simulator can read the header back.

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info};
use ccsmsg::{Amplifier, Binning, CcdState, CcsError, CcsResult, FitsCard, Window};

use crate::ccd::{CcdDriver, CcdMonitor, ExposureRequest};
use crate::config::constants::ABORT_CHECK_INTERVAL;
use crate::config::CcdSetup;
use crate::fits_file::write_frame;

pub struct SimulatedCcd {
    monitor: Arc<CcdMonitor>,
    x_size: u32,
    y_size: u32,
    readout: Duration,
    binning: Binning,
    amplifier: Amplifier,
    windows: Vec<Window>,
    filter_positions: Vec<usize>,
    exposure_count: u64,
    initialised: bool,
}

impl SimulatedCcd {
    pub fn new() -> Self {
        Self {
            monitor: Arc::new(CcdMonitor::new()),
            x_size: 0,
            y_size: 0,
            readout: Duration::ZERO,
            binning: Binning::default(),
            amplifier: Amplifier::default(),
            windows: Vec::new(),
            filter_positions: Vec::new(),
            exposure_count: 0,
            initialised: false,
        }
    }

    pub fn filter_position(&self, wheel: usize) -> Option<usize> {
        self.filter_positions.get(wheel).copied()
    }

    /// Sleep for `length`, waking every few milliseconds to check for abort
    fn wait_abortable(&self, length: Duration) -> CcsResult<()> {
        let end = Instant::now() + length;
        loop {
            if self.monitor.is_aborted() {
                self.monitor.set_state(CcdState::Idle);
                return Err(CcsError::Aborted);
            }
            let now = Instant::now();
            if now >= end {
                return Ok(());
            }
            thread::sleep((end - now).min(ABORT_CHECK_INTERVAL));
        }
    }

    /// Binned image size of each output file
    fn image_sizes(&self) -> Vec<(u32, u32)> {
        let binned = |pixels: u32, bin: u32| (pixels / bin).max(1);
        if self.windows.is_empty() {
            vec![(binned(self.x_size, self.binning.x), binned(self.y_size, self.binning.y))]
        } else {
            self.windows
                .iter()
                .map(|w| (binned(w.width(), self.binning.x), binned(w.height(), self.binning.y)))
                .collect()
        }
    }

    fn write_fits(
        &self,
        path: &Path,
        naxis1: u32,
        naxis2: u32,
        header: &[FitsCard],
    ) -> CcsResult<()> {
        let (naxis1, naxis2) = (naxis1 as usize, naxis2 as usize);
        let pixels = vec![0u16; naxis1 * naxis2];
        write_frame(path, naxis1, naxis2, &pixels, header)
    }
}

impl Default for SimulatedCcd {
    fn default() -> Self {
        Self::new()
    }
}

impl CcdDriver for SimulatedCcd {
    fn setup(&mut self, setup: &CcdSetup) -> CcsResult<()> {
        info!(
            "Simulated CCD {}x{} starting, target {} C",
            setup.x_size, setup.y_size, setup.target_temperature_c
        );
        self.x_size = setup.x_size;
        self.y_size = setup.y_size;
        self.readout = setup.readout;
        self.binning = Binning::default();
        self.windows.clear();
        self.monitor.set_temperature(setup.target_temperature_c);
        self.monitor.set_state(CcdState::Idle);
        self.initialised = true;
        Ok(())
    }

    fn setup_dimensions(
        &mut self,
        binning: Binning,
        amplifier: Amplifier,
        windows: &[Window],
    ) -> CcsResult<()> {
        if !self.initialised {
            return Err(CcsError::driver("Controller not set up"));
        }
        if binning.x == 0 || binning.y == 0 {
            return Err(CcsError::driver("Binning must be non-zero"));
        }
        if let Some(window) = windows.iter().find(|w| !w.fits_chip(self.x_size, self.y_size)) {
            return Err(CcsError::driver(format!("Window {:?} is off the chip", window)));
        }
        debug!(
            "Dimensions: bin {}x{}, {:?}, {} windows",
            binning.x,
            binning.y,
            amplifier,
            windows.len()
        );
        self.binning = binning;
        self.amplifier = amplifier;
        self.windows = windows.to_vec();
        Ok(())
    }

    fn move_filter_wheel(&mut self, wheel: usize, position: usize) -> CcsResult<()> {
        if self.filter_positions.len() <= wheel {
            self.filter_positions.resize(wheel + 1, 0);
        }
        debug!("Filter wheel {} to position {}", wheel, position);
        self.filter_positions[wheel] = position;
        Ok(())
    }

    fn expose(&mut self, request: &ExposureRequest<'_>) -> CcsResult<()> {
        if !self.initialised {
            return Err(CcsError::driver("Controller not set up"));
        }
        let sizes = self.image_sizes();
        if request.filenames.len() != sizes.len() {
            return Err(CcsError::driver(format!(
                "{} filenames for {} windows", request.filenames.len(), sizes.len()
            )));
        }

        self.monitor.start_exposure(request.exposure);
        self.wait_abortable(request.exposure)?;

        self.monitor.set_state(CcdState::Reading);
        self.wait_abortable(self.readout)?;

        for (path, (naxis1, naxis2)) in request.filenames.iter().zip(sizes) {
            self.write_fits(path, naxis1, naxis2, request.header)?;
        }

        self.exposure_count += 1;
        self.monitor.set_state(CcdState::Idle);
        Ok(())
    }

    fn monitor(&self) -> Arc<CcdMonitor> {
        Arc::clone(&self.monitor)
    }

    fn status_strings(&self) -> Vec<String> {
        vec![
            "Driver: simulated".to_string(),
            format!("Chip: {}x{}", self.x_size, self.y_size),
            format!("Binning: {}x{}", self.binning.x, self.binning.y),
            format!("Amplifier: {:?}", self.amplifier),
            format!("Windows: {}", self.windows.len()),
            format!("Exposures: {}", self.exposure_count),
        ]
    }

    fn shutdown(&mut self) -> CcsResult<()> {
        info!("Simulated CCD shutting down");
        self.initialised = false;
        self.monitor.set_state(CcdState::Idle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use ccsmsg::FitsValue;
    use crate::config::DriverKind;
    use crate::fits_file::FrameFile;

    fn setup() -> CcdSetup {
        CcdSetup {
            driver: DriverKind::Simulated,
            x_size: 64,
            y_size: 32,
            max_bin: 4,
            max_windows: 4,
            readout: Duration::from_millis(1),
            target_temperature_c: -100.0,
        }
    }

    #[test]
    fn test_expose_writes_fits() {
        let dir = tempfile::tempdir().unwrap();
        let mut ccd = SimulatedCcd::new();
        ccd.setup(&setup()).unwrap();
        ccd.setup_dimensions(Binning::new(2, 2), Amplifier::Bottom, &[]).unwrap();

        let filenames = vec![dir.path().join("frame.fits")];
        let header = vec![FitsCard::new("EXPTIME", FitsValue::Float(0.01), "")];
        ccd.expose(&ExposureRequest {
            open_shutter: true,
            exposure: Duration::from_millis(10),
            filenames: &filenames,
            header: &header,
        }).unwrap();

        let mut frame = FrameFile::open(&filenames[0]).unwrap();
        assert_eq!(frame.int("BITPIX").unwrap(), 16);
        assert_eq!(frame.int("NAXIS1").unwrap(), 32);
        assert_eq!(frame.int("NAXIS2").unwrap(), 16);
        assert_eq!(frame.float("EXPTIME").unwrap(), 0.01);
        assert_eq!(ccd.monitor().state(), CcdState::Idle);
    }

    #[test]
    fn test_expose_needs_one_file_per_window() {
        let dir = tempfile::tempdir().unwrap();
        let mut ccd = SimulatedCcd::new();
        ccd.setup(&setup()).unwrap();
        ccd.setup_dimensions(Binning::default(), Amplifier::Bottom,
            &[Window::new(1, 1, 10, 10), Window::new(20, 20, 30, 30)]).unwrap();

        let filenames: Vec<PathBuf> = vec![dir.path().join("one.fits")];
        let result = ccd.expose(&ExposureRequest {
            open_shutter: true,
            exposure: Duration::ZERO,
            filenames: &filenames,
            header: &[],
        });
        assert!(matches!(result, Err(CcsError::Driver(_))));
    }

    #[test]
    fn test_rejects_window_off_chip() {
        let mut ccd = SimulatedCcd::new();
        ccd.setup(&setup()).unwrap();
        let off_chip = [Window::new(1, 1, 100, 10)];
        let result = ccd.setup_dimensions(Binning::default(), Amplifier::Top, &off_chip);
        assert!(result.is_err());
    }

    #[test]
    fn test_abort_stops_exposure() {
        let dir = tempfile::tempdir().unwrap();
        let mut ccd = SimulatedCcd::new();
        ccd.setup(&setup()).unwrap();
        let monitor = ccd.monitor();

        let aborter = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            monitor.abort();
        });

        let filenames = vec![dir.path().join("aborted.fits")];
        let started = Instant::now();
        let result = ccd.expose(&ExposureRequest {
            open_shutter: true,
            exposure: Duration::from_secs(10),
            filenames: &filenames,
            header: &[],
        });
        aborter.join().unwrap();

        assert!(matches!(result, Err(CcsError::Aborted)));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!filenames[0].exists());
    }

    #[test]
    fn test_filter_wheel_positions() {
        let mut ccd = SimulatedCcd::new();
        ccd.move_filter_wheel(1, 3).unwrap();
        assert_eq!(ccd.filter_position(0), Some(0));
        assert_eq!(ccd.filter_position(1), Some(3));
    }
}
