//! Telescope (ISS) messages
//!
//! The Ccs server is a client of the ISS. It moves the telescope focus,
//! applies small pointing offsets between flat fields, and asks for the
//! telescope's FITS header cards before each exposure.

use serde::{Deserialize, Serialize};
use crate::replies::Reply;
use crate::types::FitsCard;

/// Commands sent to the ISS
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum IssRequest {
    /// Move the telescope focus to an absolute position in millimetres
    SetFocus { focus_mm: f64 },
    /// Offset the pointing from the current target, in arcseconds
    OffsetRaDec { ra_arcsec: f64, dec_arcsec: f64 },
    /// Ask for the telescope FITS header cards
    GetFits,
}

impl IssRequest {
    pub fn name(&self) -> &'static str {
        match self {
            IssRequest::SetFocus { .. } => "SET_FOCUS",
            IssRequest::OffsetRaDec { .. } => "OFFSET_RA_DEC",
            IssRequest::GetFits => "GET_FITS",
        }
    }
}

/// ISS command with its sequence number
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct IssCommand {
    pub sequence: u32,
    pub request: IssRequest,
}

impl IssCommand {
    pub fn new(sequence: u32, request: IssRequest) -> Self {
        Self { sequence, request }
    }
}

/// Payload of an ISS DONE
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub enum IssDoneData {
    #[default]
    Empty,
    /// Focus position after a focus move
    Focus { focus_mm: f64 },
    Fits { cards: Vec<FitsCard> },
}

/// Reply type of the ISS
pub type IssReply = Reply<IssDoneData>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_names() {
        assert_eq!(IssRequest::GetFits.name(), "GET_FITS");
        assert_eq!(IssRequest::SetFocus { focus_mm: 1.0 }.name(), "SET_FOCUS");
    }
}
