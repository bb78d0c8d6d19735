//! Observation filenames
//!
//! `<instrument>_<exposure code>_<night>_<multrun>_<run>_<window>_<pipeline>.fits`,
//! for example `c_e_20240304_12_3_1_0.fits`. The night is the date on which
//! the night started, so frames taken after midnight keep the previous date.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use log::info;
use ccsmsg::{CcsResult, ExposureCode};

/// Hour of local time at which the night date changes
const NIGHT_ROLLOVER_HOUR: u32 = 12;

/// Pipeline flag of a raw frame
const RAW_PIPELINE_FLAG: u32 = 0;

/// Date of the night containing `now`
pub fn night_date(now: NaiveDateTime) -> NaiveDate {
    let date = now.date();
    if now.hour() < NIGHT_ROLLOVER_HOUR {
        date.pred_opt().unwrap_or(date)
    } else {
        date
    }
}

/// Parsed form of an observation filename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservationFilename {
    pub instrument_code: char,
    pub exposure_code: ExposureCode,
    pub night: NaiveDate,
    pub multrun: u32,
    pub run: u32,
    pub window: u32,
    pub pipeline: u32,
}

impl ObservationFilename {
    pub fn parse(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(".fits")?;
        let fields: Vec<&str> = stem.split('_').collect();
        if fields.len() != 7 {
            return None;
        }
        let single = |field: &str| {
            let mut chars = field.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Some(c),
                _ => None,
            }
        };

        Some(Self {
            instrument_code: single(fields[0])?,
            exposure_code: ExposureCode::from_char(single(fields[1])?)?,
            night: NaiveDate::parse_from_str(fields[2], "%Y%m%d").ok()?,
            multrun: fields[3].parse().ok()?,
            run: fields[4].parse().ok()?,
            window: fields[5].parse().ok()?,
            pipeline: fields[6].parse().ok()?,
        })
    }
}

impl fmt::Display for ObservationFilename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}_{}_{}_{}.fits",
            self.instrument_code,
            self.exposure_code.to_char(),
            self.night.format("%Y%m%d"),
            self.multrun,
            self.run,
            self.window,
            self.pipeline
        )
    }
}

/// Hands out multrun and run numbers and builds filenames from them
#[derive(Debug)]
pub struct FilenameGenerator {
    data_dir: PathBuf,
    instrument_code: char,
    night: Option<NaiveDate>,
    multrun: u32,
    run: u32,
}

impl FilenameGenerator {
    pub fn new(data_dir: impl Into<PathBuf>, instrument_code: char) -> Self {
        Self {
            data_dir: data_dir.into(),
            instrument_code,
            night: None,
            multrun: 0,
            run: 0,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn multrun(&self) -> u32 {
        self.multrun
    }

    pub fn run(&self) -> u32 {
        self.run
    }

    /// Carry on after the highest multrun already in the data directory for
    /// the night containing `now`
    pub fn resume_from_directory(&mut self, now: NaiveDateTime) -> CcsResult<()> {
        let night = night_date(now);
        self.night = Some(night);
        self.multrun = 0;
        self.run = 0;

        let entries = match fs::read_dir(&self.data_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let parsed = name.to_str().and_then(ObservationFilename::parse);
            if let Some(parsed) = parsed {
                if parsed.instrument_code == self.instrument_code && parsed.night == night {
                    self.multrun = self.multrun.max(parsed.multrun);
                }
            }
        }

        if self.multrun > 0 {
            info!("Resuming after multrun {} of night {}", self.multrun, night.format("%Y%m%d"));
        }
        Ok(())
    }

    /// Start a new multrun. A new night starts again from 1.
    pub fn next_multrun(&mut self, now: NaiveDateTime) -> u32 {
        let night = night_date(now);
        if self.night != Some(night) {
            self.night = Some(night);
            self.multrun = 0;
        }
        self.multrun += 1;
        self.run = 0;
        self.multrun
    }

    pub fn next_run(&mut self) -> u32 {
        self.run += 1;
        self.run
    }

    /// Filenames for the current run, one per readout window
    pub fn filenames(&self, exposure_code: ExposureCode, window_count: usize) -> Vec<PathBuf> {
        let night = self.night.unwrap_or_else(|| night_date(chrono::Local::now().naive_local()));
        (1..=window_count.max(1) as u32)
            .map(|window| {
                let name = ObservationFilename {
                    instrument_code: self.instrument_code,
                    exposure_code,
                    night,
                    multrun: self.multrun,
                    run: self.run,
                    window,
                    pipeline: RAW_PIPELINE_FLAG,
                };
                self.data_dir.join(name.to_string())
            })
            .collect()
    }
}

/// Glance filenames: the configured file, or one numbered file per window
pub fn glance_filenames(glance: &Path, window_count: usize) -> Vec<PathBuf> {
    if window_count <= 1 {
        return vec![glance.to_path_buf()];
    }
    let stem = glance.file_stem().and_then(|s| s.to_str()).unwrap_or("glance");
    (1..=window_count)
        .map(|window| glance.with_file_name(format!("{}_{}.fits", stem, window)))
        .collect()
}
