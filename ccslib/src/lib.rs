//! Ccs Client Library (ccslib)
//!
//! This library provides the client side of the Ccs protocol: a framed TCP
//! connection, the ACK/DONE call pattern, and a typed client for the Ccs
//! server. The Ccs server uses the same call to reach the ISS and DpRt.

pub mod client;
pub mod connection;

pub use client::*;
pub use connection::*;
pub use ccsmsg::*;
