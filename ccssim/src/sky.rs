//! Simulated telescope and sky
//!
//! Seeing follows a parabola in the telescope focus, and the twilight sky
//! fades after sunset or brightens before sunrise exponentially in time.

use std::time::{Duration, Instant};

use rand::Rng;

/// Counts in a frame with no light
pub const BIAS_COUNTS: f64 = 1000.0;

/// Counts at which the simulated CCD saturates
pub const SATURATION_COUNTS: f64 = 65535.0;

/// Dark current in counts per second
pub const DARK_RATE: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Twilight {
    Sunset,
    Sunrise,
}

#[derive(Debug, Clone)]
pub struct SkyModel {
    pub focus_mm: f64,
    pub best_focus_mm: f64,
    /// Seeing at best focus, arcseconds
    pub best_seeing: f64,
    /// Seeing growth per square millimetre of defocus
    pub focus_curvature: f64,
    /// Largest random change in a seeing measurement
    pub seeing_noise: f64,
    pub ra_offset_arcsec: f64,
    pub dec_offset_arcsec: f64,
    pub twilight: Twilight,
    /// Sky rate in counts per second when the simulator started
    pub sky_rate: f64,
    /// Time for the sky rate to change by a factor of e
    pub sky_time_constant: Duration,
    started: Instant,
}

impl SkyModel {
    pub fn new(twilight: Twilight) -> Self {
        Self {
            focus_mm: 0.0,
            best_focus_mm: 0.25,
            best_seeing: 1.2,
            focus_curvature: 8.0,
            seeing_noise: 0.05,
            ra_offset_arcsec: 0.0,
            dec_offset_arcsec: 0.0,
            twilight,
            sky_rate: 20000.0,
            sky_time_constant: Duration::from_secs(600),
            started: Instant::now(),
        }
    }

    /// Seeing without noise at a focus position
    pub fn seeing_at(&self, focus_mm: f64) -> f64 {
        let defocus = focus_mm - self.best_focus_mm;
        self.best_seeing + self.focus_curvature * defocus * defocus
    }

    /// Seeing measured at the current focus
    pub fn measure_seeing(&self) -> f64 {
        let noise = if self.seeing_noise > 0.0 {
            rand::thread_rng().gen_range(-self.seeing_noise..self.seeing_noise)
        } else {
            0.0
        };
        (self.seeing_at(self.focus_mm) + noise).max(0.1)
    }

    /// Sky rate in counts per second after `elapsed`
    pub fn sky_rate_after(&self, elapsed: Duration) -> f64 {
        let scale = elapsed.as_secs_f64() / self.sky_time_constant.as_secs_f64();
        match self.twilight {
            Twilight::Sunset => self.sky_rate * (-scale).exp(),
            Twilight::Sunrise => self.sky_rate * scale.exp(),
        }
    }

    /// Mean counts of a sky flat of `exposure_s` seconds taken now
    pub fn flat_counts(&self, exposure_s: f64) -> f64 {
        let rate = self.sky_rate_after(self.started.elapsed());
        (BIAS_COUNTS + rate * exposure_s).min(SATURATION_COUNTS)
    }

    pub fn dark_counts(&self, exposure_s: f64) -> f64 {
        BIAS_COUNTS + DARK_RATE * exposure_s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeing_best_at_focus() {
        let sky = SkyModel::new(Twilight::Sunset);
        assert_eq!(sky.seeing_at(sky.best_focus_mm), sky.best_seeing);
        assert!(sky.seeing_at(0.0) > sky.seeing_at(0.2));
        assert!((sky.seeing_at(0.15) - sky.seeing_at(0.35)).abs() < 1e-12);
    }

    #[test]
    fn test_measure_seeing_noise() {
        let mut sky = SkyModel::new(Twilight::Sunset);
        sky.focus_mm = 0.5;
        let expected = sky.seeing_at(0.5);
        for _ in 0..20 {
            assert!((sky.measure_seeing() - expected).abs() <= sky.seeing_noise);
        }
    }

    #[test]
    fn test_sky_changes_with_twilight() {
        let sunset = SkyModel::new(Twilight::Sunset);
        let sunrise = SkyModel::new(Twilight::Sunrise);
        let later = Duration::from_secs(600);
        assert!(sunset.sky_rate_after(later) < sunset.sky_rate);
        assert!(sunrise.sky_rate_after(later) > sunrise.sky_rate);
    }

    #[test]
    fn test_flat_counts_saturate() {
        let sky = SkyModel::new(Twilight::Sunrise);
        assert_eq!(sky.flat_counts(100.0), SATURATION_COUNTS);
        assert!(sky.flat_counts(0.0) >= BIAS_COUNTS);
    }
}
