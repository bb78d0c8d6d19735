//! Serves one simulated peer
//!
//! Each connection carries one command. The simulator ACKs it, works out
//! the answer and replies with a DONE, as the real ISS and DpRt do.

use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use ccslib::{Connection, TcpConnection};
use ccsmsg::{AckReply, CcsResult, DoneReply, DpRtCommand, IssCommand, Reply};

/// Time promised by the ACK
const ACK_TIME: Duration = Duration::from_secs(2);

/// How long a client may take to send its command
const READ_TIMEOUT: Duration = Duration::from_secs(5);

const ACCEPT_SLEEP: Duration = Duration::from_millis(100);

/// Commands carrying a sequence number to echo in replies
pub trait Sequenced {
    fn sequence(&self) -> u32;
}

impl Sequenced for IssCommand {
    fn sequence(&self) -> u32 {
        self.sequence
    }
}

impl Sequenced for DpRtCommand {
    fn sequence(&self) -> u32 {
        self.sequence
    }
}

pub fn bind(addr: SocketAddr) -> CcsResult<TcpListener> {
    let listener = TcpListener::bind(addr)?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}

/// Answer commands on `listener` with `handler` until `running` clears
pub fn serve<C, D, F>(
    name: &str,
    listener: TcpListener,
    running: Arc<AtomicBool>,
    handler: F,
) -> CcsResult<()>
where
    C: DeserializeOwned + Sequenced,
    D: Serialize + Default,
    F: Fn(&C) -> CcsResult<D>,
{
    info!("{} listening on {}", name, listener.local_addr()?);

    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!("{} connection from {}", name, peer);
                if let Err(e) = handle_connection(stream, peer, &handler) {
                    warn!("{} connection from {}: {}", name, peer, e);
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_SLEEP),
            Err(e) => {
                warn!("{} accept error: {}", name, e);
                thread::sleep(ACCEPT_SLEEP);
            }
        }
    }

    info!("{} stopped", name);
    Ok(())
}

fn handle_connection<C, D, F>(stream: TcpStream, peer: SocketAddr, handler: &F) -> CcsResult<()>
where
    C: DeserializeOwned + Sequenced,
    D: Serialize + Default,
    F: Fn(&C) -> CcsResult<D>,
{
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    stream.set_nodelay(true)?;
    let mut conn: TcpConnection<Reply<D>, C> = TcpConnection::from_stream(stream, peer);

    let command = conn.receive()?;
    let sequence = command.sequence();
    conn.send(&Reply::Ack(AckReply::new(sequence, ACK_TIME.as_millis() as u64)))?;

    let done = match handler(&command) {
        Ok(data) => DoneReply::success(sequence, data),
        Err(e) => {
            warn!("Command {} failed: {}", sequence, e);
            DoneReply::failure(sequence, e.error_num(), e.to_string())
        }
    };
    conn.send(&Reply::Done(done))?;
    conn.close()
}
