//! Ccs main entry point
//!
//! Loads the configuration, sets up the camera and serves commands until a
//! REBOOT or a signal stops it.

use std::env;
use std::io::Write;
use std::process;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use ccs_lib::config::{constants::DEFAULT_CONFIG_PATH, load_config};
use ccs_lib::{CcsServer, Instrument};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {:5} {}: {}",
                buf.timestamp_millis(),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    // Get config file path from command line or use default
    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    println!("Ccs starting...");
    println!("Loading configuration from: {}", config_path);

    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            process::exit(1);
        }
    };

    println!("Instrument {} ({}), listening on {}",
        config.instrument.name, config.instrument.code, config.server.listen_addr);
    println!("ISS at {}, DpRt at {}", config.iss.address, config.dprt.address);

    let instrument = match Instrument::from_config(config, Some(config_path.into())) {
        Ok(instrument) => Arc::new(instrument),
        Err(e) => {
            eprintln!("Error setting up the camera: {}", e);
            process::exit(1);
        }
    };

    let running = instrument.running();
    if let Err(e) = ctrlc::set_handler(move || running.store(false, Ordering::SeqCst)) {
        eprintln!("Error setting signal handler: {}", e);
        process::exit(1);
    }

    let server = match CcsServer::new(Arc::clone(&instrument)) {
        Ok(server) => server,
        Err(e) => {
            eprintln!("Error creating command server: {}", e);
            process::exit(1);
        }
    };

    println!("Ccs initialized, accepting commands...");

    match server.run() {
        Ok(reason) => {
            println!("Ccs shutdown complete ({:?})", reason);
            process::exit(reason.exit_code());
        }
        Err(e) => {
            eprintln!("Error in main loop: {}", e);
            if let Err(e) = instrument.close() {
                eprintln!("Error closing camera: {}", e);
            }
            process::exit(1);
        }
    }
}
