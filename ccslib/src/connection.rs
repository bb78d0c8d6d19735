//! Connection management for the Ccs protocols

use std::io;
use std::marker::PhantomData;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;
use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use ccsmsg::{read_message, write_message, CcsError, CcsResult};

/// Connection to a server sending `Out` messages and receiving `In` messages
pub trait Connection<Out, In>: Send {
    /// Send a message
    fn send(&mut self, message: &Out) -> CcsResult<()>;

    /// Receive a message
    fn receive(&mut self) -> CcsResult<In>;

    /// Receive a message with a timeout
    fn receive_timeout(&mut self, timeout: Duration) -> CcsResult<In>;

    /// Close the connection
    fn close(&mut self) -> CcsResult<()>;
}

/// TCP connection carrying length-prefixed JSON frames
pub struct TcpConnection<Out, In> {
    stream: TcpStream,
    peer: SocketAddr,
    _marker: PhantomData<fn(Out) -> In>,
}

impl<Out, In> TcpConnection<Out, In> {
    /// Create a new TCP connection
    pub fn connect(remote_addr: SocketAddr, connect_timeout: Duration) -> CcsResult<Self> {
        let stream = TcpStream::connect_timeout(&remote_addr, connect_timeout)?;
        stream.set_nodelay(true)?;
        debug!("Connected to {}", remote_addr);
        Ok(Self::from_stream(stream, remote_addr))
    }

    /// Wrap an already connected stream
    pub fn from_stream(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            _marker: PhantomData,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Set the write timeout
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> CcsResult<()> {
        self.stream.set_write_timeout(timeout)?;
        Ok(())
    }
}

impl<Out, In> Connection<Out, In> for TcpConnection<Out, In>
where
    Out: Serialize,
    In: DeserializeOwned,
{
    fn send(&mut self, message: &Out) -> CcsResult<()> {
        write_message(&mut self.stream, message)
    }

    fn receive(&mut self) -> CcsResult<In> {
        read_message(&mut self.stream)
    }

    fn receive_timeout(&mut self, timeout: Duration) -> CcsResult<In> {
        // A zero timeout means block forever to set_read_timeout
        let timeout = timeout.max(Duration::from_millis(1));
        self.stream.set_read_timeout(Some(timeout))?;
        let result = match self.receive() {
            Err(CcsError::Io(e)) if is_timeout(&e) => Err(CcsError::Timeout),
            other => other,
        };
        self.stream.set_read_timeout(None)?;
        result
    }

    fn close(&mut self) -> CcsResult<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(CcsError::Io(e)),
        }
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;
    use ccsmsg::{AbortCommand, Command};

    #[test]
    fn test_send_and_receive() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (stream, peer) = listener.accept().unwrap();
            let mut conn: TcpConnection<u32, Command> = TcpConnection::from_stream(stream, peer);
            let cmd = conn.receive().unwrap();
            conn.send(&cmd.sequence()).unwrap();
        });

        let mut conn: TcpConnection<Command, u32> =
            TcpConnection::connect(addr, Duration::from_secs(1)).unwrap();
        conn.send(&Command::Abort(AbortCommand::new(17))).unwrap();
        assert_eq!(conn.receive().unwrap(), 17);
        server.join().unwrap();
    }

    #[test]
    fn test_receive_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut conn: TcpConnection<u32, u32> =
            TcpConnection::connect(addr, Duration::from_secs(1)).unwrap();
        let _held = listener.accept().unwrap();
        let result = conn.receive_timeout(Duration::from_millis(50));
        assert!(matches!(result, Err(CcsError::Timeout)));
    }
}
