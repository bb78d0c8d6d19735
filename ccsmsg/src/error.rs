//! Error definitions for Ccs

use thiserror::Error;

/// Ccs error types
#[derive(Error, Debug)]
pub enum CcsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Timeout")]
    Timeout,

    #[error("Busy running {0}")]
    Busy(String),

    #[error("Aborted")]
    Aborted,

    #[error("No configuration has been set")]
    NotConfigured,

    #[error("CCD driver error: {0}")]
    Driver(String),

    #[error("Telescope error {0}: {1}")]
    Telescope(i32, String),

    #[error("Pipeline error {0}: {1}")]
    Pipeline(i32, String),

    #[error("Focus fit failed: {0}")]
    Fit(String),

    #[error("Command {0} not supported")]
    Unsupported(String),
}

impl CcsError {
    /// Error number reported in a DONE
    pub fn error_num(&self) -> i32 {
        match self {
            CcsError::Io(_) => 1,
            CcsError::Json(_) => 2,
            CcsError::Config(_) => 3,
            CcsError::Protocol(_) => 4,
            CcsError::InvalidParameter(_) => 5,
            CcsError::Timeout => 6,
            CcsError::Busy(_) => 7,
            CcsError::Aborted => 8,
            CcsError::NotConfigured => 9,
            CcsError::Driver(_) => 10,
            CcsError::Telescope(_, _) => 11,
            CcsError::Pipeline(_, _) => 12,
            CcsError::Fit(_) => 13,
            CcsError::Unsupported(_) => 14,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        CcsError::Config(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        CcsError::InvalidParameter(msg.into())
    }

    pub fn driver(msg: impl Into<String>) -> Self {
        CcsError::Driver(msg.into())
    }
}

/// Result type alias for Ccs operations
pub type CcsResult<T> = Result<T, CcsError>;
