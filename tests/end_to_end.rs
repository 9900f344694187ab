//! End-to-end tests over loopback sockets.

use framenet::protocol::{DemoHeader, PacketKind, CLIENT_ID, SHUTDOWN_SENTINEL};
use framenet::server::{DemoConnection, Server, UdpEcho};
use framenet::{
    Connection, Frame, HandlerConfig, Link, NetworkEvent, NetworkHandler, PacketHeader, Tcp, Udp,
};
use std::io::Write;
use std::net::{TcpListener, UdpSocket};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(5);

fn wait_event<L: Link>(handler: &NetworkHandler<L>) -> NetworkEvent {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        if let Some(event) = handler.get_event() {
            return event;
        }
        assert!(Instant::now() < deadline, "timed out waiting for event");
        thread::sleep(Duration::from_millis(1));
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for condition");
        thread::sleep(Duration::from_millis(1));
    }
}

/// Drop the handler on another thread and require the worker to be joined
/// within a few seconds.
fn drop_within_deadline<L: Link>(handler: NetworkHandler<L>) {
    let (done_tx, done_rx) = mpsc::channel();
    thread::spawn(move || {
        drop(handler);
        let _ = done_tx.send(());
    });
    assert!(
        done_rx.recv_timeout(Duration::from_secs(3)).is_ok(),
        "dropping the handler did not stop the worker"
    );
}

#[test]
fn handshake_with_empty_payload() {
    let server = Server::bind(0).unwrap();
    let port = server.local_addr().unwrap().port();
    let runner = thread::spawn(move || server.run());

    let mut client = DemoConnection::default();
    client.connect("127.0.0.1", port).unwrap();
    client
        .write(&DemoHeader::new(PacketKind::Handshake, CLIENT_ID), &[])
        .unwrap();
    client
        .write(&DemoHeader::new(PacketKind::Shutdown, CLIENT_ID), &[])
        .unwrap();

    let report = runner.join().unwrap().unwrap();
    assert_eq!(report.clients, 1);
    assert_eq!(report.handshake_ids(), vec![1337]);
    assert!(report.handshakes[0].payload.is_empty());
}

#[test]
fn large_datagrams_echo_in_order() {
    let echo = UdpEcho::bind(0).unwrap();
    let port = echo.local_addr().unwrap().port();
    let runner = thread::spawn(move || echo.run());

    let handler = NetworkHandler::<Udp>::new().unwrap();
    handler.connect("127.0.0.1", port);
    assert_eq!(wait_event(&handler), NetworkEvent::Connected);
    assert!(handler.is_connected());

    let packets: Vec<Vec<u8>> = (0..3u8)
        .map(|i| (0..60000).map(|j| (j as u8).wrapping_add(i)).collect())
        .collect();

    let mut received = Vec::new();
    for packet in &packets {
        assert!(handler.send(packet.clone()));
        assert_eq!(wait_event(&handler), NetworkEvent::NewData);
        received.push(handler.recv().unwrap());
    }
    assert_eq!(received, packets);
    assert!(handler.recv().is_none());

    assert!(handler.send(vec![SHUTDOWN_SENTINEL]));
    assert_eq!(runner.join().unwrap().unwrap(), 3);
}

#[test]
fn sentinel_stops_tcp_server() {
    let server = Server::bind(0).unwrap();
    let port = server.local_addr().unwrap().port();
    let runner = thread::spawn(move || server.run());

    let mut client = DemoConnection::default();
    client.connect("127.0.0.1", port).unwrap();
    client
        .write(&DemoHeader::new(PacketKind::Handshake, 1), &[])
        .unwrap();
    client
        .write(&DemoHeader::new(PacketKind::Ping, 1), &[SHUTDOWN_SENTINEL])
        .unwrap();

    let report = runner.join().unwrap().unwrap();
    assert_eq!(report.handshake_ids(), vec![1]);

    // The session closed without echoing the sentinel.
    let mut payload = Vec::new();
    assert!(client.read(&mut payload).is_err());
}

#[test]
fn sentinel_stops_udp_echo() {
    let echo = UdpEcho::bind(0).unwrap();
    let port = echo.local_addr().unwrap().port();
    let runner = thread::spawn(move || echo.run());

    let handler = NetworkHandler::<Udp>::new().unwrap();
    handler.connect("localhost", port);
    assert_eq!(wait_event(&handler), NetworkEvent::Connected);
    assert!(handler.send(vec![SHUTDOWN_SENTINEL]));

    assert_eq!(runner.join().unwrap().unwrap(), 0);
}

#[test]
fn handler_lifecycle_over_tcp() {
    let server = Server::bind(0).unwrap();
    let port = server.local_addr().unwrap().port();
    let runner = thread::spawn(move || server.run());

    let config = HandlerConfig {
        queue_capacity: 8,
        ..HandlerConfig::default()
    };
    let handler = NetworkHandler::<Connection<Tcp, DemoHeader>>::with_config(config).unwrap();
    assert!(!handler.is_connected());
    assert!(!handler.has_event());

    handler.connect("127.0.0.1", port);
    assert_eq!(wait_event(&handler), NetworkEvent::Connected);
    assert!(handler.is_connected());

    assert!(handler.send(Frame::new(DemoHeader::new(PacketKind::Handshake, 5), Vec::new())));
    assert!(handler.send(Frame::new(DemoHeader::new(PacketKind::Ping, 5), b"ping".to_vec())));
    assert_eq!(wait_event(&handler), NetworkEvent::NewData);
    let pong = handler.recv().unwrap();
    assert_eq!(pong.header.kind(), Ok(PacketKind::Pong));
    assert_eq!(pong.payload, b"ping");

    // The server closes the session once asked to stop.
    assert!(handler.send(Frame::new(DemoHeader::new(PacketKind::Shutdown, 5), Vec::new())));
    let report = runner.join().unwrap().unwrap();
    assert_eq!(report.handshake_ids(), vec![5]);

    assert_eq!(wait_event(&handler), NetworkEvent::Disconnected);
    wait_until(|| !handler.is_connected());

    // Nothing is listening any more.
    handler.connect("127.0.0.1", port);
    assert_eq!(wait_event(&handler), NetworkEvent::FailedToConnect);
    assert!(!handler.is_connected());
}

#[test]
fn send_queue_fills_while_disconnected() {
    let config = HandlerConfig {
        queue_capacity: 3,
        ..HandlerConfig::default()
    };
    let handler = NetworkHandler::<Udp>::with_config(config).unwrap();

    for _ in 0..3 {
        assert!(handler.send(vec![1, 2, 3]));
    }
    assert!(!handler.send(vec![4]));
    assert!(handler.has_event());
    assert_eq!(handler.get_event(), Some(NetworkEvent::SendQueueFull));
    assert_eq!(handler.get_event(), None);
}

#[test]
fn peer_stalled_mid_packet() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let peer = thread::spawn(move || {
        let (mut first, _) = listener.accept().unwrap();
        // A header announcing ten bytes, followed by only two of them.
        let header = PacketHeader::new(10, DemoHeader::new(PacketKind::Ping, 1)).encode();
        first.write_all(&header).unwrap();
        first.write_all(&[1, 2]).unwrap();
        let (second, _) = listener.accept().unwrap();
        (first, second)
    });

    let handler = NetworkHandler::<Connection<Tcp, DemoHeader>>::new().unwrap();
    handler.connect("127.0.0.1", port);
    assert_eq!(wait_event(&handler), NetworkEvent::Connected);
    thread::sleep(Duration::from_millis(50));

    // The worker still services requests while the packet is incomplete.
    handler.connect("127.0.0.1", port);
    assert_eq!(wait_event(&handler), NetworkEvent::Connected);
    let streams = peer.join().unwrap();
    assert!(handler.recv().is_none());

    drop_within_deadline(handler);
    drop(streams);
}

#[test]
fn peer_that_never_reads() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let peer = thread::spawn(move || listener.accept().unwrap().0);

    let handler = NetworkHandler::<Connection<Tcp, DemoHeader>>::new().unwrap();
    handler.connect("127.0.0.1", port);
    assert_eq!(wait_event(&handler), NetworkEvent::Connected);
    let stream = peer.join().unwrap();

    // Far more than the socket buffers hold.
    for i in 0..32 {
        let frame = Frame::new(DemoHeader::new(PacketKind::Ping, i), vec![0u8; 1 << 20]);
        assert!(handler.send(frame));
    }
    thread::sleep(Duration::from_millis(200));
    assert!(handler.is_connected());
    assert!(handler.pending_sends() > 0);

    drop_within_deadline(handler);
    drop(stream);
}

#[test]
fn udp_port_unreachable_disconnects() {
    let port = {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.local_addr().unwrap().port()
    };

    let handler = NetworkHandler::<Udp>::new().unwrap();
    handler.connect("127.0.0.1", port);
    assert_eq!(wait_event(&handler), NetworkEvent::Connected);

    assert!(handler.send(b"nobody home".to_vec()));
    assert_eq!(wait_event(&handler), NetworkEvent::Disconnected);
    wait_until(|| !handler.is_connected());
}
