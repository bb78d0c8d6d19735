//! Ccs - CCD camera control server
//!
//! Ccs runs next to the camera and accepts commands from the robotic
//! control system. It drives the CCD, asks the telescope (ISS) for focus
//! moves, offsets and FITS cards, and hands frames to the data pipeline
//! (DpRt) for reduction.

pub mod ccd;
pub mod config;
pub mod filename;
pub mod fits_file;
pub mod fits_header;
pub mod focus_fit;
pub mod implementation;
pub mod implementations;
pub mod instrument;
pub mod pipeline;
pub mod server;
pub mod sim_ccd;
pub mod status;
pub mod telescope;

pub use ccd::*;
pub use config::*;
pub use instrument::*;
pub use server::*;
