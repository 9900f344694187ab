//! The network worker loop.
//!
//! Cooperative polling on a dedicated thread: each iteration sends at most
//! one queued packet if the link is writable, receives at most one packet if
//! the link is readable, and services a pending connect request. Iterations
//! that find no work sleep for the configured idle interval.
//!
//! The link is non-blocking, so a peer that stops reading or stops sending
//! mid-packet never stalls the loop. A packet the link could not finish
//! stays in flight and is offered again on later iterations.

use super::event::NetworkEvent;
use super::link::Link;
use super::{ConnectRequest, SharedState};
use crate::error::Error;
use async_channel::{Receiver, Sender, TrySendError};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

pub(crate) struct Worker<L: Link> {
    link: L,
    state: Arc<SharedState>,
    outbound: Receiver<L::Packet>,
    inbound: Sender<L::Packet>,
    events: Sender<NetworkEvent>,
    connect_requests: Receiver<ConnectRequest>,
    connected: bool,
    in_flight: Option<L::Packet>,
    scratch: Vec<u8>,
    max_payload: usize,
    idle_sleep: Duration,
}

pub(crate) struct WorkerChannels<P> {
    pub outbound: Receiver<P>,
    pub inbound: Sender<P>,
    pub events: Sender<NetworkEvent>,
    pub connect_requests: Receiver<ConnectRequest>,
}

impl<L: Link> Worker<L> {
    pub fn new(
        link: L,
        state: Arc<SharedState>,
        channels: WorkerChannels<L::Packet>,
        recv_buffer_size: usize,
        max_payload: usize,
        idle_sleep: Duration,
    ) -> Self {
        Self {
            link,
            state,
            outbound: channels.outbound,
            inbound: channels.inbound,
            events: channels.events,
            connect_requests: channels.connect_requests,
            connected: false,
            in_flight: None,
            scratch: vec![0u8; recv_buffer_size],
            max_payload,
            idle_sleep,
        }
    }

    /// Run until the foreground clears the run flag.
    pub fn run(mut self) {
        debug!("Network worker started");

        while self.state.running.load(Ordering::Acquire) {
            if !self.poll_once() {
                thread::sleep(self.idle_sleep);
            }
        }

        if self.connected {
            self.link.disconnect();
            self.set_connected(false);
        }
        debug!("Network worker stopped");
    }

    /// One loop iteration. Returns whether any work was done.
    fn poll_once(&mut self) -> bool {
        let mut did_work = false;

        if self.connected && self.link.can_write() {
            did_work |= self.handle_send();
        }

        if self.connected && self.link.can_read() {
            did_work = true;
            self.handle_recv();
        }

        if let Ok(request) = self.connect_requests.try_recv() {
            did_work = true;
            self.handle_connect(request);
        }

        did_work
    }

    /// Start or resume one packet. Returns whether a packet was started,
    /// finished or failed.
    fn handle_send(&mut self) -> bool {
        let mut started = false;
        if self.in_flight.is_none() {
            self.in_flight = self.outbound.try_recv().ok();
            started = self.in_flight.is_some();
        }
        let Some(packet) = self.in_flight.take() else {
            return false;
        };

        match self.link.send_packet(&packet) {
            Ok(true) => true,
            Ok(false) => {
                trace!("Link would block, packet stays in flight");
                self.in_flight = Some(packet);
                started
            }
            Err(e) => {
                self.drop_link(&e);
                true
            }
        }
    }

    fn handle_recv(&mut self) {
        match self.link.recv_packet(&mut self.scratch, self.max_payload) {
            Ok(None) => {}
            Ok(Some(packet)) => match self.inbound.try_send(packet) {
                Ok(()) => self.push_event(NetworkEvent::NewData),
                Err(TrySendError::Full(_)) => {
                    debug!("Inbound queue full, dropping packet");
                    self.push_event(NetworkEvent::RecvQueueFull);
                }
                Err(TrySendError::Closed(_)) => {
                    trace!("Inbound queue closed");
                }
            },
            Err(e) => self.drop_link(&e),
        }
    }

    fn handle_connect(&mut self, request: ConnectRequest) {
        // Make sure the previous session is closed before reconnecting.
        self.link.disconnect();
        self.set_connected(false);

        let result = self.link.connect(&request.address, request.port);
        // Accept new requests before the outcome is visible to the foreground.
        self.state.connect_pending.store(false, Ordering::Release);

        match result {
            Ok(()) => {
                info!(address = %request.address, port = request.port, "Connected");
                self.set_connected(true);
                self.push_event(NetworkEvent::Connected);
            }
            Err(e) => {
                warn!(
                    address = %request.address,
                    port = request.port,
                    error = %e,
                    "Failed to connect"
                );
                self.push_event(NetworkEvent::FailedToConnect);
            }
        }
    }

    /// Transition from connected to disconnected after an I/O failure.
    fn drop_link(&mut self, error: &Error) {
        info!(error = %error, "Disconnected");
        self.link.disconnect();
        self.set_connected(false);
        self.push_event(NetworkEvent::Disconnected);
    }

    fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
        self.state.connected.store(connected, Ordering::Release);
    }

    fn push_event(&self, event: NetworkEvent) {
        if self.events.try_send(event).is_err() {
            warn!(%event, "Event queue full, dropping event");
        }
    }
}
