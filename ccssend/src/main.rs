//! Ccs command line client (ccssend)
//!
//! Sends one command to a Ccs server, waits through its ACKs and prints the
//! DONE as JSON. Exits 0 when the command succeeded, 2 when the server
//! reported a failure and 1 when the command could not be sent.

mod args;

use std::env;
use std::net::{SocketAddr, ToSocketAddrs};
use std::process::exit;

use log::debug;
use ccslib::CcsClient;

use crate::args::{parse_command, USAGE};

fn resolve(address: &str) -> Option<SocketAddr> {
    address.to_socket_addrs().ok()?.next()
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let argv: Vec<String> = env::args().skip(1).collect();
    if argv.len() < 2 {
        eprintln!("{}", USAGE);
        exit(1);
    }

    let Some(address) = resolve(&argv[0]) else {
        eprintln!("Cannot resolve {}", argv[0]);
        exit(1);
    };
    let rest: Vec<&str> = argv[2..].iter().map(String::as_str).collect();
    let command = match parse_command(1, &argv[1], &rest) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{}\n\n{}", e, USAGE);
            exit(1);
        }
    };

    debug!("Sending {:?} to {}", command, address);
    let client = CcsClient::new(address);
    let done = match client.send(&command) {
        Ok(done) => done,
        Err(e) => {
            eprintln!("{} failed: {}", command.cmd_type().name(), e);
            exit(1);
        }
    };

    match serde_json::to_string_pretty(&done) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Cannot print DONE: {}", e),
    }
    exit(if done.is_success() { 0 } else { 2 });
}
