//! Data pipeline (DpRt) messages

use serde::{Deserialize, Serialize};
use crate::replies::Reply;
use crate::types::ReductionResult;

/// Reductions the pipeline performs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum DpRtRequest {
    /// Reduce a science frame: seeing, counts, photometricity
    ExposeReduce { filename: String },
    /// Reduce a calibration frame: mean counts
    CalibrateReduce { filename: String },
}

impl DpRtRequest {
    pub fn filename(&self) -> &str {
        match self {
            DpRtRequest::ExposeReduce { filename } => filename,
            DpRtRequest::CalibrateReduce { filename } => filename,
        }
    }
}

/// DpRt command with its sequence number
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DpRtCommand {
    pub sequence: u32,
    pub request: DpRtRequest,
}

impl DpRtCommand {
    pub fn new(sequence: u32, request: DpRtRequest) -> Self {
        Self { sequence, request }
    }
}

/// Reply type of the DpRt
pub type DpRtReply = Reply<ReductionResult>;
