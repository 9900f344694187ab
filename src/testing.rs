//! In-memory transport for unit tests.

use crate::transport::Transport;
use std::cell::Cell;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;

/// Transport that serves reads from a preloaded byte queue and records
/// writes.
///
/// `chunk` caps the bytes moved per call to simulate partial I/O. The
/// `*_limit` fields make calls fail once that many bytes have moved.
///
/// In non-blocking mode an exhausted read queue reports `WouldBlock`, and so
/// does a write once `write_window` bytes have been accepted.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    pub incoming: VecDeque<u8>,
    pub written: Vec<u8>,
    pub chunk: Option<usize>,
    pub read_limit: Option<usize>,
    pub write_limit: Option<usize>,
    pub write_window: Option<usize>,
    pub refuse_connect: bool,
    pub open: bool,
    pub connects: usize,
    nonblocking: Cell<bool>,
    delivered: usize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            open: true,
            ..Self::default()
        }
    }

    pub fn with_incoming(bytes: &[u8]) -> Self {
        Self {
            incoming: bytes.iter().copied().collect(),
            ..Self::new()
        }
    }

    pub fn chunked(mut self, chunk: usize) -> Self {
        self.chunk = Some(chunk);
        self
    }

    pub fn is_nonblocking(&self) -> bool {
        self.nonblocking.get()
    }

    fn window_left(&self) -> Option<usize> {
        self.write_window
            .map(|window| window.saturating_sub(self.written.len()))
    }

    fn step(&self, requested: usize, limit: Option<usize>, moved: usize) -> io::Result<usize> {
        if !self.open {
            return Err(io::ErrorKind::NotConnected.into());
        }
        let mut n = requested;
        if let Some(chunk) = self.chunk {
            n = n.min(chunk);
        }
        if let Some(limit) = limit {
            if moved >= limit {
                return Err(io::ErrorKind::ConnectionReset.into());
            }
            n = n.min(limit - moved);
        }
        Ok(n)
    }
}

impl Transport for ScriptedTransport {
    fn connect(&mut self, _address: &str, _port: u16) -> io::Result<()> {
        self.connects += 1;
        if self.refuse_connect {
            self.open = false;
            return Err(io::ErrorKind::ConnectionRefused.into());
        }
        self.open = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.open = false;
    }

    fn start_server(&mut self, _port: u16) -> io::Result<()> {
        self.open = true;
        Ok(())
    }

    fn accept(&mut self) -> Option<Self> {
        None
    }

    /// An exhausted queue reads as end of stream, or would block in
    /// non-blocking mode.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.open && self.incoming.is_empty() && !buf.is_empty() && self.nonblocking.get() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = self
            .step(buf.len(), self.read_limit, self.delivered)?
            .min(self.incoming.len());
        for (slot, byte) in buf.iter_mut().zip(self.incoming.drain(..n)) {
            *slot = byte;
        }
        self.delivered += n;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut n = self.step(buf.len(), self.write_limit, self.written.len())?;
        if let Some(left) = self.window_left() {
            if left == 0 && !buf.is_empty() {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            n = n.min(left);
        }
        self.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn can_read(&self) -> bool {
        self.open && !self.incoming.is_empty()
    }

    fn can_write(&self) -> bool {
        self.open && self.window_left() != Some(0)
    }

    fn has_error(&self) -> bool {
        false
    }

    fn set_blocking(&self, blocking: bool) -> io::Result<()> {
        self.nonblocking.set(!blocking);
        Ok(())
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(SocketAddr::from(([127, 0, 0, 1], 0)))
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        Ok(SocketAddr::from(([127, 0, 0, 1], 0)))
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
