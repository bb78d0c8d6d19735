//! Ccs peer simulator (ccssim)
//!
//! Stands in for the telescope (ISS) and the data pipeline (DpRt) so Ccs
//! can be run without either. Both share one sky model:
//!
//! | Peer | Default address | Commands                             |
//! |------|-----------------|--------------------------------------|
//! | ISS  | 127.0.0.1:7383  | SET_FOCUS, OFFSET_RA_DEC, GET_FITS   |
//! | DpRt | 127.0.0.1:6880  | EXPOSE_REDUCE, CALIBRATE_REDUCE      |
//!
//! Usage: `ccssim [iss_address] [dprt_address]`

mod dprt;
mod iss;
mod peer;
mod sky;

use std::env;
use std::net::SocketAddr;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use chrono::{Local, Timelike};
use log::{error, info};
use ccsmsg::{DpRtCommand, IssCommand};
use sky::{SkyModel, Twilight};

const DEFAULT_ISS_ADDRESS: &str = "127.0.0.1:7383";
const DEFAULT_DPRT_ADDRESS: &str = "127.0.0.1:6880";

fn address_arg(index: usize, default: &str) -> SocketAddr {
    let arg = env::args().nth(index).unwrap_or_else(|| default.to_string());
    match arg.parse() {
        Ok(addr) => addr,
        Err(e) => {
            eprintln!("Invalid address {}: {}", arg, e);
            process::exit(1);
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    info!("ccssim starting up");

    let iss_addr = address_arg(1, DEFAULT_ISS_ADDRESS);
    let dprt_addr = address_arg(2, DEFAULT_DPRT_ADDRESS);

    // Afternoon and evening runs simulate sunset
    let twilight = if Local::now().hour() >= 12 { Twilight::Sunset } else { Twilight::Sunrise };
    info!("Simulating {:?} sky", twilight);
    let sky = Arc::new(Mutex::new(SkyModel::new(twilight)));

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        running_clone.store(false, Ordering::SeqCst);
    }) {
        eprintln!("Error setting Ctrl+C handler: {}", e);
        process::exit(1);
    }

    let (iss_listener, dprt_listener) = match (peer::bind(iss_addr), peer::bind(dprt_addr)) {
        (Ok(iss), Ok(dprt)) => (iss, dprt),
        (Err(e), _) | (_, Err(e)) => {
            eprintln!("Error binding listeners: {}", e);
            process::exit(1);
        }
    };

    let iss_thread = {
        let sky = sky.clone();
        let running = running.clone();
        thread::spawn(move || {
            peer::serve("ISS", iss_listener, running, |command: &IssCommand| {
                iss::handle(&sky, command)
            })
        })
    };
    let dprt_thread = {
        let sky = sky.clone();
        let running = running.clone();
        thread::spawn(move || {
            peer::serve("DpRt", dprt_listener, running, |command: &DpRtCommand| {
                dprt::handle(&sky, command)
            })
        })
    };

    for (name, handle) in [("ISS", iss_thread), ("DpRt", dprt_thread)] {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("{} error: {}", name, e),
            Err(_) => error!("{} thread panicked", name),
        }
    }

    info!("ccssim shutdown complete");
}
