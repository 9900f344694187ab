//! Stream transport over TCP.

use super::{fd_can_read, fd_can_write, fd_has_error, not_open, resolve, Transport};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use std::time::Duration;
use tracing::debug;

const LISTEN_BACKLOG: i32 = 1024;

/// Upper bound on each connect attempt.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
enum TcpState {
    #[default]
    Closed,
    Stream(TcpStream),
    Listener(TcpListener),
}

/// TCP socket that is either closed, a connected stream or a listener.
#[derive(Debug, Default)]
pub struct Tcp {
    state: TcpState,
}

impl Tcp {
    pub fn new() -> Self {
        Self::default()
    }

    fn raw_fd(&self) -> Option<i32> {
        match &self.state {
            TcpState::Closed => None,
            TcpState::Stream(s) => Some(s.as_raw_fd()),
            TcpState::Listener(l) => Some(l.as_raw_fd()),
        }
    }

    fn stream(&mut self) -> io::Result<&mut TcpStream> {
        match &mut self.state {
            TcpState::Stream(s) => Ok(s),
            _ => Err(not_open()),
        }
    }
}

impl From<TcpStream> for Tcp {
    fn from(stream: TcpStream) -> Self {
        Self {
            state: TcpState::Stream(stream),
        }
    }
}

impl Transport for Tcp {
    fn connect(&mut self, address: &str, port: u16) -> io::Result<()> {
        self.disconnect();

        let mut last_err = None;
        for addr in resolve(address, port)? {
            let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
            match socket.connect_timeout(&addr.into(), CONNECT_TIMEOUT) {
                Ok(()) => {
                    let stream: TcpStream = socket.into();
                    stream.set_nodelay(true)?;
                    debug!(peer = %addr, "Connected");
                    self.state = TcpState::Stream(stream);
                    return Ok(());
                }
                Err(e) => {
                    debug!(peer = %addr, error = %e, "Connect attempt failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(not_open))
    }

    fn disconnect(&mut self) {
        self.state = TcpState::Closed;
    }

    fn start_server(&mut self, port: u16) -> io::Result<()> {
        self.disconnect();

        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(LISTEN_BACKLOG)?;

        self.state = TcpState::Listener(socket.into());
        Ok(())
    }

    fn accept(&mut self) -> Option<Self> {
        let TcpState::Listener(listener) = &self.state else {
            return None;
        };
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                }
                Some(Self::from(stream))
            }
            Err(e) => {
                debug!(error = %e, "Accept failed");
                None
            }
        }
    }

    /// A zero-byte read into a non-empty buffer means the peer closed the
    /// stream and is reported as `UnexpectedEof`.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.stream()?.read(buf)?;
        if n == 0 && !buf.is_empty() {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream()?.write(buf)
    }

    fn can_read(&self) -> bool {
        self.raw_fd().is_some_and(fd_can_read)
    }

    fn can_write(&self) -> bool {
        match &self.state {
            TcpState::Stream(s) => fd_can_write(s.as_raw_fd()),
            _ => false,
        }
    }

    fn has_error(&self) -> bool {
        self.raw_fd().is_some_and(fd_has_error)
    }

    fn set_blocking(&self, blocking: bool) -> io::Result<()> {
        match &self.state {
            TcpState::Closed => Err(not_open()),
            TcpState::Stream(s) => s.set_nonblocking(!blocking),
            TcpState::Listener(l) => l.set_nonblocking(!blocking),
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        match &self.state {
            TcpState::Closed => Err(not_open()),
            TcpState::Stream(s) => s.local_addr(),
            TcpState::Listener(l) => l.local_addr(),
        }
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        match &self.state {
            TcpState::Stream(s) => s.peer_addr(),
            _ => Err(not_open()),
        }
    }

    fn is_open(&self) -> bool {
        !matches!(self.state, TcpState::Closed)
    }
}
