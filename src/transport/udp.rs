//! Datagram transport over UDP.
//!
//! One `write` sends one datagram and one `read` receives one datagram. A
//! zero-length datagram is a valid empty read, not an error.

use super::{
    fd_can_read, fd_can_write, fd_has_error, not_open, resolve, DatagramTransport, Transport,
};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::os::unix::io::AsRawFd;
use tracing::debug;

#[derive(Debug, Default)]
pub struct Udp {
    socket: Option<UdpSocket>,
}

impl Udp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an unbound socket for `write_to` use.
    pub fn open(&mut self) -> io::Result<()> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.bind(&SocketAddr::from(([0, 0, 0, 0], 0)).into())?;
        self.socket = Some(socket.into());
        Ok(())
    }

    fn socket(&self) -> io::Result<&UdpSocket> {
        self.socket.as_ref().ok_or_else(not_open)
    }
}

impl Transport for Udp {
    /// Associates the socket with the remote address. No packets are
    /// exchanged, so this only fails on resolution or socket errors.
    fn connect(&mut self, address: &str, port: u16) -> io::Result<()> {
        self.disconnect();

        let addr = resolve(address, port)?[0];
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        socket.connect(&addr.into())?;
        debug!(peer = %addr, "UDP socket associated");
        self.socket = Some(socket.into());
        Ok(())
    }

    fn disconnect(&mut self) {
        self.socket = None;
    }

    fn start_server(&mut self, port: u16) -> io::Result<()> {
        self.disconnect();

        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        self.socket = Some(socket.into());
        Ok(())
    }

    /// Datagram sockets have no pending clients.
    fn accept(&mut self) -> Option<Self> {
        None
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket()?.recv(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.socket()?.send(buf)
    }

    fn can_read(&self) -> bool {
        self.socket
            .as_ref()
            .is_some_and(|s| fd_can_read(s.as_raw_fd()))
    }

    fn can_write(&self) -> bool {
        self.socket
            .as_ref()
            .is_some_and(|s| fd_can_write(s.as_raw_fd()))
    }

    fn can_accept(&self) -> bool {
        false
    }

    fn has_error(&self) -> bool {
        self.socket
            .as_ref()
            .is_some_and(|s| fd_has_error(s.as_raw_fd()))
    }

    fn set_blocking(&self, blocking: bool) -> io::Result<()> {
        self.socket()?.set_nonblocking(!blocking)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket()?.local_addr()
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.socket()?.peer_addr()
    }

    fn is_open(&self) -> bool {
        self.socket.is_some()
    }
}

impl DatagramTransport for Udp {
    fn read_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket()?.recv_from(buf)
    }

    fn write_to(&mut self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.socket()?.send_to(buf, addr)
    }
}
