//! Demo servers.
//!
//! `Server` accepts framed TCP clients speaking the demo protocol and serves
//! each on its own thread. `UdpEcho` sends every datagram back to its sender.
//! Both stop on a shutdown request from a peer (or the one-byte sentinel
//! payload) and on a local `ShutdownHandle`.

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::protocol::{is_shutdown_sentinel, DemoHeader, PacketKind};
use crate::transport::{DatagramTransport, Tcp, Transport, Udp};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Sleep between polls when there is nothing to do.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Id the server signs its replies with.
pub const SERVER_ID: u32 = 0;

pub type DemoConnection = Connection<Tcp, DemoHeader>;

/// Cloneable stop flag shared by a server and its sessions.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    stop: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn is_shutdown(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

/// A handshake as the server received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub id: u32,
    pub payload: Vec<u8>,
}

/// Summary of a finished server run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerReport {
    /// Clients accepted.
    pub clients: usize,
    /// Successful handshakes, in session completion order.
    pub handshakes: Vec<Handshake>,
}

impl ServerReport {
    pub fn handshake_ids(&self) -> Vec<u32> {
        self.handshakes.iter().map(|h| h.id).collect()
    }
}

/// Framed TCP server for the demo protocol.
pub struct Server {
    listener: DemoConnection,
    shutdown: ShutdownHandle,
}

impl Server {
    /// Listen on `port` on all interfaces. Port 0 picks a free port.
    pub fn bind(port: u16) -> Result<Self> {
        let mut listener = DemoConnection::default();
        listener.start_server(port)?;
        let addr = listener.local_addr()?;
        info!(address = %addr, "Server listening");

        Ok(Self {
            listener,
            shutdown: ShutdownHandle::default(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Accept and serve clients until shutdown is requested, then wait for
    /// every session to finish.
    pub fn run(mut self) -> Result<ServerReport> {
        let mut sessions: Vec<JoinHandle<Option<Handshake>>> = Vec::new();
        let mut report = ServerReport::default();

        while !self.shutdown.is_shutdown() {
            if self.listener.can_accept() {
                if let Some(client) = self.listener.accept() {
                    match client.peer_addr() {
                        Ok(peer) => {
                            info!(peer = %peer, "New client");
                            let shutdown = self.shutdown.clone();
                            let handle = thread::Builder::new()
                                .name(format!("session-{}", peer.port()))
                                .spawn(move || serve(client, peer, shutdown))?;
                            sessions.push(handle);
                            report.clients += 1;
                        }
                        Err(e) => warn!(error = %e, "Failed to get peer address"),
                    }
                }
            }
            thread::sleep(POLL_INTERVAL);
        }

        for session in sessions {
            match session.join() {
                Ok(Some(handshake)) => report.handshakes.push(handshake),
                Ok(None) => {}
                Err(_) => error!("Session thread panicked"),
            }
        }

        self.listener.disconnect();
        info!(clients = report.clients, "Server stopped");
        Ok(report)
    }
}

/// Serve one client. Returns the handshake if it succeeded.
fn serve(
    mut client: DemoConnection,
    peer: SocketAddr,
    shutdown: ShutdownHandle,
) -> Option<Handshake> {
    let mut payload = Vec::new();

    let handshake = match next_packet(&mut client, &mut payload, &shutdown)? {
        Ok(header) if header.kind() == Ok(PacketKind::Handshake) => {
            info!(peer = %peer, id = header.id, len = payload.len(), "Handshake");
            Handshake {
                id: header.id,
                payload: std::mem::take(&mut payload),
            }
        }
        Ok(header) => {
            warn!(peer = %peer, header = ?header, "Expected handshake, closing client");
            client.disconnect();
            return None;
        }
        Err(e) => {
            warn!(peer = %peer, error = %e, "Failed to read handshake, closing client");
            return None;
        }
    };

    while let Some(next) = next_packet(&mut client, &mut payload, &shutdown) {
        let header = match next {
            Ok(header) => header,
            Err(e) => {
                debug!(peer = %peer, error = %e, "Client gone");
                break;
            }
        };

        if is_shutdown_sentinel(&payload) {
            info!(peer = %peer, "Shutdown sentinel received");
            shutdown.shutdown();
            break;
        }

        match header.kind() {
            Ok(PacketKind::Handshake) => debug!(peer = %peer, "Repeated handshake ignored"),
            Ok(PacketKind::Ping) => {
                debug!(peer = %peer, len = payload.len(), "Ping");
                let pong = DemoHeader::new(PacketKind::Pong, SERVER_ID);
                if let Err(e) = client.write(&pong, &payload) {
                    warn!(peer = %peer, error = %e, "Failed to write pong");
                    break;
                }
            }
            Ok(PacketKind::Pong) => debug!(peer = %peer, "Unexpected pong ignored"),
            Ok(PacketKind::Shutdown) => {
                info!(peer = %peer, "Shutdown requested");
                shutdown.shutdown();
                break;
            }
            Err(kind) => debug!(peer = %peer, kind, "Unknown packet kind ignored"),
        }
    }

    client.disconnect();
    Some(handshake)
}

/// Wait for the next packet, giving up with `None` once shutdown is
/// requested.
fn next_packet(
    client: &mut DemoConnection,
    payload: &mut Vec<u8>,
    shutdown: &ShutdownHandle,
) -> Option<std::result::Result<DemoHeader, Error>> {
    loop {
        if shutdown.is_shutdown() {
            return None;
        }
        if client.can_read() || client.has_error() {
            return Some(client.read(payload).map_err(|e| e.source));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// UDP server that echoes datagrams back to their sender.
pub struct UdpEcho {
    socket: Udp,
    shutdown: ShutdownHandle,
    buffer: Vec<u8>,
}

impl UdpEcho {
    pub fn bind(port: u16) -> Result<Self> {
        let mut socket = Udp::new();
        socket.start_server(port)?;
        info!(address = %socket.local_addr()?, "UDP echo listening");

        Ok(Self {
            socket,
            shutdown: ShutdownHandle::default(),
            buffer: vec![0u8; u16::MAX as usize],
        })
    }

    /// Stop together with another server.
    pub fn with_shutdown(mut self, shutdown: ShutdownHandle) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Echo until the sentinel arrives or shutdown is requested. Returns the
    /// number of datagrams echoed.
    pub fn run(mut self) -> Result<usize> {
        let mut echoed = 0;

        while !self.shutdown.is_shutdown() {
            if !self.socket.can_read() {
                thread::sleep(POLL_INTERVAL);
                continue;
            }

            let (n, peer) = self.socket.read_from(&mut self.buffer)?;
            if is_shutdown_sentinel(&self.buffer[..n]) {
                info!(peer = %peer, "Shutdown sentinel received");
                self.shutdown.shutdown();
                break;
            }

            self.socket.write_to(&self.buffer[..n], peer)?;
            echoed += 1;
        }

        info!(echoed, "UDP echo stopped");
        Ok(echoed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_for(addr: SocketAddr) -> DemoConnection {
        let mut client = DemoConnection::default();
        client.connect("127.0.0.1", addr.port()).unwrap();
        client
    }

    #[test]
    fn test_handshake_ping_shutdown() {
        let server = Server::bind(0).unwrap();
        let addr = server.local_addr().unwrap();
        let runner = thread::spawn(move || server.run());

        let mut client = client_for(addr);
        client
            .write(&DemoHeader::new(PacketKind::Handshake, 42), b"")
            .unwrap();
        client
            .write(&DemoHeader::new(PacketKind::Ping, 42), b"hello")
            .unwrap();

        let mut payload = Vec::new();
        let pong = client.read(&mut payload).unwrap();
        assert_eq!(pong.kind(), Ok(PacketKind::Pong));
        assert_eq!(pong.id, SERVER_ID);
        assert_eq!(payload, b"hello");

        client
            .write(&DemoHeader::new(PacketKind::Shutdown, 42), b"")
            .unwrap();

        let report = runner.join().unwrap().unwrap();
        assert_eq!(report.clients, 1);
        assert_eq!(report.handshake_ids(), vec![42]);
        assert!(report.handshakes[0].payload.is_empty());
    }

    #[test]
    fn test_rejects_missing_handshake() {
        let server = Server::bind(0).unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = server.shutdown_handle();
        let runner = thread::spawn(move || server.run());

        let mut client = client_for(addr);
        client
            .write(&DemoHeader::new(PacketKind::Ping, 7), b"early")
            .unwrap();

        // The server closes the session without answering.
        let mut payload = Vec::new();
        assert!(client.read(&mut payload).is_err());

        shutdown.shutdown();
        let report = runner.join().unwrap().unwrap();
        assert_eq!(report.clients, 1);
        assert!(report.handshakes.is_empty());
    }

    #[test]
    fn test_local_shutdown_stops_idle_sessions() {
        let server = Server::bind(0).unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = server.shutdown_handle();
        let runner = thread::spawn(move || server.run());

        let mut client = client_for(addr);
        client
            .write(&DemoHeader::new(PacketKind::Handshake, 9), b"hi")
            .unwrap();
        thread::sleep(Duration::from_millis(50));

        shutdown.shutdown();
        let report = runner.join().unwrap().unwrap();
        assert_eq!(
            report.handshakes,
            vec![Handshake {
                id: 9,
                payload: b"hi".to_vec(),
            }]
        );
    }

    #[test]
    fn test_udp_echo() {
        let echo = UdpEcho::bind(0).unwrap();
        let port = echo.local_addr().unwrap().port();
        let runner = thread::spawn(move || echo.run());

        let mut client = Udp::new();
        client.connect("127.0.0.1", port).unwrap();
        client.write(b"marco").unwrap();

        let mut buf = [0u8; 16];
        let n = client.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"marco");

        client.write(&[0x0F]).unwrap();
        assert_eq!(runner.join().unwrap().unwrap(), 1);
    }
}
