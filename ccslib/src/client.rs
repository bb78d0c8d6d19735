//! Client interface for the Ccs, ISS and DpRt servers
//!
//! All three speak the same pattern: one command per connection, answered by
//! any number of ACKs and a final DONE.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use ccsmsg::{
    commands::*,
    CcdConfig, CcsError, CcsResult, DoneData, DoneReply, RebootLevel, Reply, Timestamp,
};
use crate::connection::{Connection, TcpConnection};

/// Default timeout for the first reply to a command
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for establishing a connection
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Slack added to the time promised by an ACK
pub const ACK_MARGIN: Duration = Duration::from_secs(5);

/// Send a command and wait for its DONE, extending the wait on every ACK.
///
/// An unsuccessful DONE is returned as is; only transport failures and
/// timeouts are errors.
pub fn call<C, D, N>(
    conn: &mut N,
    command: &C,
    sequence: u32,
    timeout: Duration,
) -> CcsResult<DoneReply<D>>
where
    N: Connection<C, Reply<D>> + ?Sized,
{
    conn.send(command)?;
    let mut deadline = Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(CcsError::Timeout);
        }

        match conn.receive_timeout(remaining)? {
            Reply::Ack(ack) => {
                if ack.sequence != sequence {
                    warn!("ACK for sequence {} while waiting for {}", ack.sequence, sequence);
                }
                debug!("ACK {}: complete within {} ms", ack.sequence, ack.time_to_complete_ms);
                let wait =
                    Duration::from_millis(ack.time_to_complete_ms).saturating_add(ACK_MARGIN);
                deadline = Instant::now().checked_add(wait).unwrap_or(deadline);
            }
            Reply::Done(done) => {
                if done.header.sequence != sequence {
                    return Err(CcsError::Protocol(format!(
                        "DONE for sequence {} while waiting for {}",
                        done.header.sequence, sequence
                    )));
                }
                return Ok(done);
            }
        }
    }
}

/// Client for one server address, opening a connection per command
#[derive(Debug, Clone)]
pub struct RpcClient {
    address: SocketAddr,
    connect_timeout: Duration,
    timeout: Duration,
}

impl RpcClient {
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the time allowed for the first reply
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Connect, send the command and wait for its DONE
    pub fn call<C, D>(&self, command: &C, sequence: u32) -> CcsResult<DoneReply<D>>
    where
        C: Serialize,
        D: DeserializeOwned,
    {
        let mut conn: TcpConnection<C, Reply<D>> =
            TcpConnection::connect(self.address, self.connect_timeout)?;
        let result = call(&mut conn, command, sequence, self.timeout);
        let _ = conn.close();
        result
    }
}

/// Typed client for the Ccs server
pub struct CcsClient {
    rpc: RpcClient,
    sequence: AtomicU32,
}

impl CcsClient {
    pub fn new(address: SocketAddr) -> Self {
        Self::with_rpc(RpcClient::new(address))
    }

    pub fn with_rpc(rpc: RpcClient) -> Self {
        Self {
            rpc,
            sequence: AtomicU32::new(1),
        }
    }

    pub fn address(&self) -> SocketAddr {
        self.rpc.address()
    }

    /// Get the next sequence number
    fn next_sequence(&self) -> u32 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// Send any command
    pub fn send(&self, command: &Command) -> CcsResult<DoneReply<DoneData>> {
        self.rpc.call(command, command.sequence())
    }

    pub fn get_status(&self, level: StatusLevel) -> CcsResult<DoneReply<DoneData>> {
        let seq = self.next_sequence();
        self.send(&Command::GetStatus(GetStatusCommand::new(seq, level)))
    }

    pub fn config(&self, config: CcdConfig) -> CcsResult<DoneReply<DoneData>> {
        let seq = self.next_sequence();
        self.send(&Command::Config(ConfigCommand::new(seq, config)))
    }

    pub fn abort(&self) -> CcsResult<DoneReply<DoneData>> {
        let seq = self.next_sequence();
        self.send(&Command::Abort(AbortCommand::new(seq)))
    }

    pub fn reboot(&self, level: RebootLevel) -> CcsResult<DoneReply<DoneData>> {
        let seq = self.next_sequence();
        self.send(&Command::Reboot(RebootCommand::new(seq, level)))
    }

    pub fn glance(&self, exposure_ms: u64) -> CcsResult<DoneReply<DoneData>> {
        let seq = self.next_sequence();
        self.send(&Command::Glance(GlanceCommand::new(seq, exposure_ms)))
    }

    pub fn multrun(
        &self,
        exposure_ms: u64,
        count: u32,
        standard: bool,
        pipeline_process: bool,
    ) -> CcsResult<DoneReply<DoneData>> {
        let seq = self.next_sequence();
        self.send(&Command::Multrun(MultrunCommand::new(
            seq,
            exposure_ms,
            count,
            standard,
            pipeline_process,
        )))
    }

    pub fn run_at(
        &self,
        start_time: Timestamp,
        exposure_ms: u64,
        standard: bool,
        pipeline_process: bool,
    ) -> CcsResult<DoneReply<DoneData>> {
        let seq = self.next_sequence();
        self.send(&Command::RunAt(RunAtCommand::new(
            seq,
            start_time,
            exposure_ms,
            standard,
            pipeline_process,
        )))
    }

    pub fn bias(&self, pipeline_process: bool) -> CcsResult<DoneReply<DoneData>> {
        let seq = self.next_sequence();
        self.send(&Command::Bias(BiasCommand::new(seq, pipeline_process)))
    }

    pub fn dark(&self, exposure_ms: u64, pipeline_process: bool) -> CcsResult<DoneReply<DoneData>> {
        let seq = self.next_sequence();
        self.send(&Command::Dark(DarkCommand::new(seq, exposure_ms, pipeline_process)))
    }

    pub fn tel_focus(
        &self,
        focus_start: f64,
        focus_end: f64,
        focus_step: f64,
        exposure_ms: u64,
    ) -> CcsResult<DoneReply<DoneData>> {
        let seq = self.next_sequence();
        self.send(&Command::TelFocus(TelFocusCommand::new(
            seq,
            focus_start,
            focus_end,
            focus_step,
            exposure_ms,
        )))
    }

    pub fn twilight_calibrate(&self, time_to_complete_ms: u64) -> CcsResult<DoneReply<DoneData>> {
        let seq = self.next_sequence();
        self.send(&Command::TwilightCalibrate(TwilightCalibrateCommand::new(
            seq,
            time_to_complete_ms,
        )))
    }
}
