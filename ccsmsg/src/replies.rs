//! Reply definitions for Ccs
//!
//! Replies go from server to client. A command is answered by any number of
//! ACKs, each promising completion within a time, and then one DONE. The
//! envelope is generic over the DONE payload so the telescope and pipeline
//! protocols share it.

use serde::{Deserialize, Serialize};
use crate::types::{CcdState, ReductionResult, Timestamp};

/// Acknowledgement extending the client's wait for the DONE
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AckReply {
    /// Sequence number matching the command being acknowledged
    pub sequence: u32,
    /// Time from now within which the command should complete
    pub time_to_complete_ms: u64,
}

impl AckReply {
    pub fn new(sequence: u32, time_to_complete_ms: u64) -> Self {
        Self { sequence, time_to_complete_ms }
    }
}

/// DONE message header
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DoneHeader {
    /// Sequence number matching the command that generated this response
    pub sequence: u32,
    pub successful: bool,
    /// Zero on success
    pub error_num: i32,
    pub error_string: String,
}

/// Final reply to a command
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DoneReply<D> {
    pub header: DoneHeader,
    pub data: D,
}

impl<D> DoneReply<D> {
    pub fn success(sequence: u32, data: D) -> Self {
        Self {
            header: DoneHeader {
                sequence,
                successful: true,
                error_num: 0,
                error_string: String::new(),
            },
            data,
        }
    }

    pub fn is_success(&self) -> bool {
        self.header.successful
    }
}

impl<D: Default> DoneReply<D> {
    pub fn failure(sequence: u32, error_num: i32, error_string: impl Into<String>) -> Self {
        Self {
            header: DoneHeader {
                sequence,
                successful: false,
                error_num,
                error_string: error_string.into(),
            },
            data: D::default(),
        }
    }
}

/// Union of reply types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Reply<D> {
    Ack(AckReply),
    Done(DoneReply<D>),
}

impl<D> Reply<D> {
    pub fn sequence(&self) -> u32 {
        match self {
            Reply::Ack(ack) => ack.sequence,
            Reply::Done(done) => done.header.sequence,
        }
    }
}

/// GET_STATUS results
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StatusData {
    /// Name of the non-interrupt command in progress
    pub current_command: Option<String>,
    pub ccd_state: CcdState,
    pub exposure_length_ms: u64,
    pub exposure_elapsed_ms: u64,
    /// Exposures in the current command
    pub exposure_count: u32,
    /// Exposure being taken, 1-based
    pub exposure_number: u32,
    pub multrun_number: u32,
    pub config_id: u32,
    pub config_name: Option<String>,
    pub lower_filter: Option<String>,
    pub upper_filter: Option<String>,
    pub last_filename: Option<String>,
    pub uptime_s: u64,
    pub timestamp: Option<Timestamp>,
    /// CCD temperature in Celsius, Intermediate level and above
    pub temperature_c: Option<f64>,
    /// Driver specific status lines, Full level only
    #[serde(default)]
    pub driver_status: Vec<String>,
}

/// CONFIG results
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigData {
    pub config_id: u32,
    pub config_name: String,
}

/// Results of a single exposure (GLANCE, RUNAT)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExposeData {
    pub filenames: Vec<String>,
    pub reduction: Option<ReductionResult>,
}

/// MULTRUN results
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MultrunData {
    pub multrun_number: u32,
    pub filenames: Vec<String>,
    /// Reduction of the last frame sent to the pipeline
    pub reduction: Option<ReductionResult>,
}

/// BIAS and DARK results
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CalibrateData {
    pub filenames: Vec<String>,
    pub reduction: Option<ReductionResult>,
}

/// TELFOCUS results
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TelFocusData {
    /// Focus position of best seeing in millimetres
    pub focus_min: f64,
    /// Seeing predicted by the fit at `focus_min`
    pub seeing_min: f64,
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub chi_squared: f64,
    /// Measured (focus, seeing) samples
    pub samples: Vec<(f64, f64)>,
}

/// TWILIGHT_CALIBRATE results
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TwilightCalibrateData {
    pub frames_taken: u32,
    pub frames_kept: u32,
    pub calibrations_completed: u32,
    pub last_filename: Option<String>,
    pub last_counts: f64,
}

/// Payload of a Ccs DONE
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub enum DoneData {
    #[default]
    Empty,
    Status(StatusData),
    Config(ConfigData),
    Expose(ExposeData),
    Multrun(MultrunData),
    Calibrate(CalibrateData),
    TelFocus(TelFocusData),
    TwilightCalibrate(TwilightCalibrateData),
}

/// Reply type of the Ccs server
pub type CcsReply = Reply<DoneData>;
