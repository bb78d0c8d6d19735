//! Ccs command server
//!
//! Listens for client connections and runs each one on its own thread. A
//! connection carries one command: the thread reads it, claims the command
//! slot, sends an ACK with the expected duration, runs the implementation and
//! sends the DONE.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::AsFd;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use socket2::{Domain, Protocol, Socket, Type};
use ccslib::{Connection, TcpConnection};
use ccsmsg::{
    CcsError, CcsReply, CcsResult, Command, DoneData, DoneReply, Reply, AckReply,
};

use crate::config::constants::ACCEPT_POLL_INTERVAL;
use crate::implementation::{Acknowledger, CommandImplementation, Implementations};
use crate::instrument::{Instrument, ShutdownReason};

/// Pending connections the kernel may queue
const LISTEN_BACKLOG: i32 = 16;

type ServerConnection = TcpConnection<CcsReply, Command>;

pub struct CcsServer {
    instrument: Arc<Instrument>,
    implementations: Arc<Implementations>,
    listener: TcpListener,
}

impl CcsServer {
    /// Bind the listening socket
    pub fn new(instrument: Arc<Instrument>) -> CcsResult<Self> {
        let addr = instrument.config().server.listen_addr;
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(LISTEN_BACKLOG)?;
        let listener: TcpListener = socket.into();
        info!("Ccs listening on {}", listener.local_addr()?);

        Ok(Self {
            instrument,
            implementations: Arc::new(Implementations::new()),
            listener,
        })
    }

    pub fn local_addr(&self) -> CcsResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Wait up to `timeout` for a connection to accept
    fn wait_for_connection(&self, timeout: Duration) -> CcsResult<bool> {
        let mut poll_fds = [PollFd::new(self.listener.as_fd(), PollFlags::POLLIN)];
        let timeout = PollTimeout::try_from(timeout).unwrap_or(PollTimeout::MAX);

        match poll(&mut poll_fds, timeout) {
            Ok(0) => Ok(false),
            Ok(_) => Ok(poll_fds[0]
                .revents()
                .map(|revents| revents.contains(PollFlags::POLLIN))
                .unwrap_or(false)),
            Err(Errno::EINTR) => Ok(false),
            Err(e) => Err(CcsError::Io(io::Error::from_raw_os_error(e as i32))),
        }
    }

    /// Accept connections until the running flag clears, then stop the driver
    pub fn run(&self) -> CcsResult<ShutdownReason> {
        let mut handlers: Vec<JoinHandle<()>> = Vec::new();

        while self.instrument.is_running() {
            handlers.retain(|handler| !handler.is_finished());
            if !self.wait_for_connection(ACCEPT_POLL_INTERVAL)? {
                continue;
            }

            let (stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(e)
                    if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) =>
                {
                    continue
                }
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    continue;
                }
            };
            debug!("Connection from {}", peer);

            let instrument = Arc::clone(&self.instrument);
            let implementations = Arc::clone(&self.implementations);
            let spawned = thread::Builder::new()
                .name(format!("ccs-{}", peer))
                .spawn(move || {
                    if let Err(e) = handle_connection(&instrument, &implementations, stream, peer) {
                        warn!("Connection from {}: {}", peer, e);
                    }
                });
            match spawned {
                Ok(handler) => handlers.push(handler),
                Err(e) => error!("Cannot start thread for {}: {}", peer, e),
            }
        }

        info!("Ccs stopping");
        self.instrument.monitor().abort();
        for handler in handlers {
            if handler.join().is_err() {
                error!("Connection thread panicked");
            }
        }
        if let Err(e) = self.instrument.close() {
            warn!("Closing CCD driver: {}", e);
        }
        Ok(self.instrument.shutdown_reason())
    }
}

/// Sends ACKs down the command's connection
struct ConnectionAcknowledger<'a> {
    conn: &'a mut ServerConnection,
    sequence: u32,
    connected: bool,
}

impl Acknowledger for ConnectionAcknowledger<'_> {
    /// A client that has gone away does not stop the command
    fn acknowledge(&mut self, time_to_complete: Duration) -> CcsResult<()> {
        if !self.connected {
            return Ok(());
        }
        let millis = u64::try_from(time_to_complete.as_millis()).unwrap_or(u64::MAX);
        let ack = AckReply::new(self.sequence, millis);
        if let Err(e) = self.conn.send(&Reply::Ack(ack)) {
            warn!("ACK to {} failed: {}", self.conn.peer_addr(), e);
            self.connected = false;
        }
        Ok(())
    }
}

fn handle_connection(
    instrument: &Instrument,
    implementations: &Implementations,
    stream: TcpStream,
    peer: SocketAddr,
) -> CcsResult<()> {
    stream.set_read_timeout(Some(instrument.config().server.read_timeout))?;
    stream.set_nodelay(true)?;
    let mut conn = ServerConnection::from_stream(stream, peer);

    let command = conn.receive()?;
    let sequence = command.sequence();
    let name = command.cmd_type().name();
    info!("{} ({}) from {}", name, sequence, peer);

    let done = match implementations.get(command.cmd_type()) {
        Some(implementation) => run_command(instrument, implementation, &command, &mut conn),
        None => {
            let e = CcsError::Unsupported(name.to_string());
            DoneReply::failure(sequence, e.error_num(), e.to_string())
        }
    };

    if done.is_success() {
        info!("{} ({}) done", name, sequence);
    } else {
        warn!("{} ({}) failed: {}", name, sequence, done.header.error_string);
    }
    conn.send(&Reply::Done(done))?;
    conn.close()
}

fn run_command(
    instrument: &Instrument,
    implementation: &dyn CommandImplementation,
    command: &Command,
    conn: &mut ServerConnection,
) -> DoneReply<DoneData> {
    let sequence = command.sequence();
    let result = instrument.begin_command(command).and_then(|_guard| {
        let mut ack = ConnectionAcknowledger { conn, sequence, connected: true };
        ack.acknowledge(implementation.ack_time(instrument, command))?;
        implementation.execute(instrument, command, &mut ack)
    });

    match result {
        Ok(data) => DoneReply::success(sequence, data),
        Err(e) => DoneReply::failure(sequence, e.error_num(), e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use ccslib::CcsClient;
    use ccsmsg::{Binning, CcdConfig, RebootLevel, StatusLevel};
    use crate::instrument::tests::test_instrument;

    type Running = (
        Arc<Instrument>,
        CcsClient,
        JoinHandle<CcsResult<ShutdownReason>>,
        tempfile::TempDir,
    );

    fn start() -> Running {
        let dir = tempfile::tempdir().unwrap();
        let instrument = Arc::new(test_instrument(dir.path(), Arc::default(), Arc::default()));
        let server = CcsServer::new(Arc::clone(&instrument)).unwrap();
        let client = CcsClient::new(server.local_addr().unwrap());
        let handle = thread::spawn(move || server.run());
        (instrument, client, handle, dir)
    }

    #[test]
    fn test_commands_over_tcp() {
        let (_instrument, client, handle, _dir) = start();

        let done = client.multrun(5, 1, false, false).unwrap();
        assert!(!done.is_success());
        assert_eq!(done.header.error_num, CcsError::NotConfigured.error_num());

        let done = client.config(CcdConfig::new("tcp", Binning::new(1, 1), "V", "clear")).unwrap();
        assert!(done.is_success());

        match client.multrun(5, 2, false, false).unwrap().data {
            DoneData::Multrun(data) => assert_eq!(data.filenames.len(), 2),
            other => panic!("unexpected {:?}", other),
        }

        match client.get_status(StatusLevel::Full).unwrap().data {
            DoneData::Status(status) => {
                assert_eq!(status.config_name.as_deref(), Some("tcp"));
                assert_eq!(status.exposure_count, 2);
                assert!(!status.driver_status.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!(client.reboot(RebootLevel::Software).unwrap().is_success());
        assert_eq!(handle.join().unwrap().unwrap(), ShutdownReason::Software);
    }

    #[test]
    fn test_busy_and_abort() {
        let (instrument, client, handle, _dir) = start();
        let client = Arc::new(client);
        let config = CcdConfig::new("busy", Binning::new(1, 1), "clear", "clear");
        assert!(client.config(config).unwrap().is_success());

        let runner = {
            let client = Arc::clone(&client);
            thread::spawn(move || client.multrun(500, 20, false, false))
        };
        thread::sleep(Duration::from_millis(300));

        let done = client.glance(5).unwrap();
        assert_eq!(done.header.error_num, CcsError::Busy(String::new()).error_num());

        assert!(client.abort().unwrap().is_success());
        let done = runner.join().unwrap().unwrap();
        assert_eq!(done.header.error_num, CcsError::Aborted.error_num());

        instrument.running().store(false, Ordering::SeqCst);
        assert_eq!(handle.join().unwrap().unwrap(), ShutdownReason::Signal);
    }

    #[test]
    fn test_malformed_input_closes_connection() {
        use std::io::Write;
        let (instrument, client, handle, _dir) = start();

        let mut stream = TcpStream::connect(client.address()).unwrap();
        stream.write_all(&[0, 0, 0, 4, b'j', b'u', b'n', b'k']).unwrap();
        let mut buf = [0u8; 16];
        let read = io::Read::read(&mut stream, &mut buf).unwrap_or(0);
        assert_eq!(read, 0);

        assert!(client.get_status(StatusLevel::Basic).unwrap().is_success());
        instrument.running().store(false, Ordering::SeqCst);
        handle.join().unwrap().unwrap();
    }
}
