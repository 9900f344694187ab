//! Demo client driven through a `NetworkHandler`.
//!
//! The client never touches the socket itself: it queues packets, polls
//! events and drains received frames while the worker thread does the I/O.

use crate::connection::{Connection, Frame};
use crate::error::{Error, Result};
use crate::handler::{HandlerConfig, NetworkEvent, NetworkHandler};
use crate::protocol::{DemoHeader, PacketKind, CLIENT_ID};
use crate::transport::Tcp;
use std::collections::VecDeque;
use std::io;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub type DemoHandler = NetworkHandler<Connection<Tcp, DemoHeader>>;

const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Greeting sent in the ping.
pub const PING_MESSAGE: &[u8] = b"Hey there, from the client.";

pub struct Client {
    handler: DemoHandler,
    timeout: Duration,
    /// Events seen while retrying a send, replayed by `wait_event`.
    backlog: VecDeque<NetworkEvent>,
}

impl Client {
    pub fn new(config: HandlerConfig, timeout: Duration) -> io::Result<Self> {
        Ok(Self {
            handler: DemoHandler::with_config(config)?,
            timeout,
            backlog: VecDeque::new(),
        })
    }

    /// Connect, introduce ourselves and wait for the outcome.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        info!(host, port, "Connecting");
        self.handler.connect(host, port);

        match self.wait_event()? {
            NetworkEvent::Connected => {}
            NetworkEvent::FailedToConnect => {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    format!("failed to connect to {host}:{port}"),
                )
                .into());
            }
            event => return Err(unexpected(event)),
        }

        self.send(DemoHeader::new(PacketKind::Handshake, CLIENT_ID), &[])?;
        info!(id = CLIENT_ID, "Handshake sent");
        Ok(())
    }

    /// Send a ping and return the payload of the pong.
    pub fn ping(&mut self, message: &[u8]) -> Result<Vec<u8>> {
        self.send(DemoHeader::new(PacketKind::Ping, CLIENT_ID), message)?;

        loop {
            match self.wait_event()? {
                NetworkEvent::NewData => {
                    let Some(frame) = self.handler.recv() else {
                        continue;
                    };
                    if frame.header.kind() == Ok(PacketKind::Pong) {
                        debug!(len = frame.payload.len(), "Pong received");
                        return Ok(frame.payload);
                    }
                    debug!(header = ?frame.header, "Ignoring packet while waiting for pong");
                }
                NetworkEvent::SendQueueFull | NetworkEvent::RecvQueueFull => {}
                event => return Err(unexpected(event)),
            }
        }
    }

    /// Ask the server to stop and wait until the request has been written.
    pub fn shutdown_server(&mut self) -> Result<()> {
        self.send(DemoHeader::new(PacketKind::Shutdown, CLIENT_ID), &[])?;
        self.flush()
    }

    pub fn is_connected(&self) -> bool {
        self.handler.is_connected()
    }

    /// Queue a packet, retrying while the outbound queue is full.
    ///
    /// Losing the session while waiting is an error. `SendQueueFull` events
    /// from the retries are dropped and any other event is kept for
    /// `wait_event`.
    fn send(&mut self, header: DemoHeader, payload: &[u8]) -> Result<()> {
        let deadline = Instant::now() + self.timeout;
        while !self.handler.send(Frame::new(header, payload)) {
            while let Some(event) = self.handler.get_event() {
                match event {
                    NetworkEvent::SendQueueFull => {}
                    NetworkEvent::Disconnected | NetworkEvent::FailedToConnect => {
                        return Err(unexpected(event));
                    }
                    event => self.backlog.push_back(event),
                }
            }
            if Instant::now() >= deadline {
                return Err(timed_out("send queue stayed full"));
            }
            thread::sleep(POLL_INTERVAL);
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let deadline = Instant::now() + self.timeout;
        while self.handler.pending_sends() > 0 {
            if Instant::now() >= deadline {
                return Err(timed_out("outbound queue did not drain"));
            }
            thread::sleep(POLL_INTERVAL);
        }
        Ok(())
    }

    fn wait_event(&mut self) -> Result<NetworkEvent> {
        if let Some(event) = self.backlog.pop_front() {
            debug!(%event, "Network event");
            return Ok(event);
        }
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(event) = self.handler.get_event() {
                debug!(%event, "Network event");
                return Ok(event);
            }
            if Instant::now() >= deadline {
                return Err(timed_out("no network event"));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Run the full demo exchange against a server. Returns the pong payload.
pub fn run(host: &str, port: u16, config: HandlerConfig, timeout: Duration) -> Result<Vec<u8>> {
    let mut client = Client::new(config, timeout)?;
    client.connect(host, port)?;
    let pong = client.ping(PING_MESSAGE)?;
    info!(pong = %String::from_utf8_lossy(&pong), "Echo received");
    client.shutdown_server()?;
    Ok(pong)
}

fn timed_out(what: &str) -> Error {
    io::Error::new(io::ErrorKind::TimedOut, what.to_string()).into()
}

fn unexpected(event: NetworkEvent) -> Error {
    io::Error::new(
        io::ErrorKind::ConnectionAborted,
        format!("unexpected network event: {event}"),
    )
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::Server;

    fn config() -> HandlerConfig {
        HandlerConfig {
            queue_capacity: 16,
            ..HandlerConfig::default()
        }
    }

    #[test]
    fn test_demo_exchange() {
        let server = Server::bind(0).unwrap();
        let port = server.local_addr().unwrap().port();
        let runner = thread::spawn(move || server.run());

        let pong = run("127.0.0.1", port, config(), Duration::from_secs(5)).unwrap();
        assert_eq!(pong, PING_MESSAGE);

        let report = runner.join().unwrap().unwrap();
        assert_eq!(report.handshake_ids(), vec![CLIENT_ID]);
        assert!(report.handshakes[0].payload.is_empty());
    }

    #[test]
    fn test_send_reports_lost_session() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let acceptor = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            drop(stream);
        });

        // Room for both Connected and Disconnected.
        let config = HandlerConfig {
            queue_capacity: 2,
            ..HandlerConfig::default()
        };
        let mut client = Client::new(config, Duration::from_secs(5)).unwrap();
        client.connect("127.0.0.1", port).unwrap();
        acceptor.join().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while client.is_connected() {
            assert!(Instant::now() < deadline, "session was not dropped");
            thread::sleep(POLL_INTERVAL);
        }

        // Packets queued after the drop are never sent, so the queue fills
        // and the next send sees the Disconnected event.
        let header = DemoHeader::new(PacketKind::Ping, CLIENT_ID);
        let err = loop {
            match client.send(header, b"late") {
                Ok(()) => continue,
                Err(e) => break e,
            }
        };
        assert!(err.to_string().contains("disconnected"), "{err}");
    }

    #[test]
    fn test_backlog_replayed_first() {
        let mut client = Client::new(config(), Duration::from_millis(50)).unwrap();
        client.backlog.push_back(NetworkEvent::NewData);
        assert_eq!(client.wait_event().unwrap(), NetworkEvent::NewData);
        assert!(client.wait_event().is_err());
    }

    #[test]
    fn test_connect_refused() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let mut client = Client::new(config(), Duration::from_secs(5)).unwrap();
        let err = client.connect("127.0.0.1", port).unwrap_err();
        assert!(err.to_string().contains("failed to connect"));
        assert!(!client.is_connected());
    }
}
