//! Ccs Message Library (ccsmsg)
//!
//! This library contains definitions shared between the Ccs server, its
//! clients, and the telescope (ISS) and data pipeline (DpRt) processes the
//! server talks to.

pub mod types;
pub mod commands;
pub mod replies;
pub mod iss;
pub mod dprt;
pub mod protocol;
pub mod error;

pub use types::*;
pub use commands::*;
pub use replies::*;
pub use iss::*;
pub use dprt::*;
pub use protocol::*;
pub use error::*;
