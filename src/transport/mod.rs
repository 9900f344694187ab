//! Socket transports consumed by connections and the network handler.
//!
//! Both transports wrap `std::net` sockets created through `socket2`, so
//! socket options (address reuse, blocking mode) can be set before binding.
//! Readiness probes use a zero-timeout `poll(2)` and never block.

mod tcp;
mod udp;

pub use tcp::Tcp;
pub use udp::Udp;

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::os::unix::io::RawFd;

/// Byte-level socket capability.
///
/// `read` and `write` report the number of bytes moved, which may be fewer
/// than requested. Probes return `false` on any error.
pub trait Transport: Sized + Send + 'static {
    /// Connect to a remote `address:port`, replacing any open socket.
    fn connect(&mut self, address: &str, port: u16) -> io::Result<()>;

    /// Close the socket. Idempotent.
    fn disconnect(&mut self);

    /// Open, set address reuse and bind to `port` on all interfaces.
    /// Stream transports also start listening.
    fn start_server(&mut self, port: u16) -> io::Result<()>;

    /// Accept a pending client, or `None` if none is pending or accept failed.
    fn accept(&mut self) -> Option<Self>;

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    fn can_read(&self) -> bool;

    fn can_write(&self) -> bool;

    fn can_accept(&self) -> bool {
        self.can_read()
    }

    fn has_error(&self) -> bool;

    fn set_blocking(&self, blocking: bool) -> io::Result<()>;

    fn local_addr(&self) -> io::Result<SocketAddr>;

    fn peer_addr(&self) -> io::Result<SocketAddr>;

    fn is_open(&self) -> bool;
}

/// Address-tagged I/O for datagram transports.
pub trait DatagramTransport: Transport {
    fn read_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    fn write_to(&mut self, buf: &[u8], addr: SocketAddr) -> io::Result<usize>;
}

pub(crate) fn not_open() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "socket is not open")
}

/// Resolve `address:port`, accepting hostnames such as `localhost`.
///
/// IPv4 addresses come first since servers bind `0.0.0.0`.
pub(crate) fn resolve(address: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
    let mut addrs: Vec<SocketAddr> = (address, port).to_socket_addrs()?.collect();
    addrs.sort_by_key(|a| a.is_ipv6());
    if addrs.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no addresses for {address}:{port}"),
        ));
    }
    Ok(addrs)
}

/// Poll `fd` for `events` without blocking. Returns the reported events, or
/// `None` if poll failed.
pub(crate) fn poll_now(fd: RawFd, events: libc::c_short) -> Option<libc::c_short> {
    let mut pfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };
    // SAFETY: pfd is a valid pollfd for the duration of the call and nfds is 1.
    let res = unsafe { libc::poll(&mut pfd, 1, 0) };
    if res < 0 {
        None
    } else {
        Some(pfd.revents)
    }
}

/// Data, a hangup or a pending socket error all count as readable, so the
/// next `read` either returns bytes or reports the failure.
pub(crate) fn fd_can_read(fd: RawFd) -> bool {
    matches!(
        poll_now(fd, libc::POLLIN),
        Some(revents) if revents & (libc::POLLIN | libc::POLLERR | libc::POLLHUP) != 0
    )
}

pub(crate) fn fd_can_write(fd: RawFd) -> bool {
    match poll_now(fd, libc::POLLOUT) {
        Some(revents) => {
            revents & libc::POLLOUT != 0
                && revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) == 0
        }
        None => false,
    }
}

pub(crate) fn fd_has_error(fd: RawFd) -> bool {
    matches!(
        poll_now(fd, 0),
        Some(revents) if revents & (libc::POLLERR | libc::POLLNVAL) != 0
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_localhost() {
        let addrs = resolve("localhost", 8080).unwrap();
        assert!(addrs.iter().all(|a| a.port() == 8080));
        assert!(addrs.iter().any(|a| a.ip().is_loopback()));
    }

    #[test]
    fn test_resolve_literal() {
        let addrs = resolve("127.0.0.1", 1).unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:1".parse::<SocketAddr>().unwrap()]);
    }

    #[test]
    fn test_readiness_on_bad_fd() {
        assert!(!fd_can_read(-1));
        assert!(!fd_can_write(-1));
    }
}
