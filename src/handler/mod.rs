//! Worker-thread network handler.
//!
//! `NetworkHandler` runs all socket I/O for one link on a dedicated worker
//! thread. The owning thread only touches bounded queues and atomics, so
//! every foreground call returns immediately:
//!
//! - `send` pushes to the outbound queue (`false` when full)
//! - `recv` pops from the inbound queue
//! - `has_event` / `get_event` observe connection state changes
//! - `connect` posts a connect request, answered later by a `Connected` or
//!   `FailedToConnect` event
//!
//! Dropping the handler stops the worker and joins it.

mod event;
mod link;
mod worker;

pub use event::NetworkEvent;
pub use link::Link;

use async_channel::{Receiver, Sender, TrySendError};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, warn};
use worker::{Worker, WorkerChannels};

/// Tuning for a network handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerConfig {
    /// Capacity of each of the outbound, inbound and event queues.
    pub queue_capacity: usize,
    /// Worker sleep when an iteration found no work.
    pub idle_sleep: Duration,
    /// Largest packet a single datagram read can deliver.
    pub recv_buffer_size: usize,
    /// Largest payload a framed link accepts from its peer. A header
    /// announcing more drops the session.
    pub max_payload: usize,
}

/// Default bound on received framed payloads.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 512,
            idle_sleep: Duration::from_micros(100),
            recv_buffer_size: u16::MAX as usize,
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// Target of a pending connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ConnectRequest {
    pub address: String,
    pub port: u16,
}

/// Flags shared between the foreground and the worker.
///
/// The foreground writes `running` and sets `connect_pending`; the worker
/// writes `connected` and clears `connect_pending`.
#[derive(Debug)]
pub(crate) struct SharedState {
    pub running: AtomicBool,
    pub connect_pending: AtomicBool,
    pub connected: AtomicBool,
}

/// Non-blocking handle to a link driven by a worker thread.
pub struct NetworkHandler<L: Link> {
    outbound: Sender<L::Packet>,
    inbound: Receiver<L::Packet>,
    events: Receiver<NetworkEvent>,
    event_tx: Sender<NetworkEvent>,
    connect_requests: Sender<ConnectRequest>,
    state: Arc<SharedState>,
    worker: Option<JoinHandle<()>>,
}

impl<L: Link + Default> NetworkHandler<L> {
    /// Start a handler over a fresh link with default tuning.
    pub fn new() -> io::Result<Self> {
        Self::with_link(L::default(), HandlerConfig::default())
    }

    pub fn with_config(config: HandlerConfig) -> io::Result<Self> {
        Self::with_link(L::default(), config)
    }
}

impl<L: Link> NetworkHandler<L> {
    /// Start a handler that takes ownership of `link`.
    pub fn with_link(link: L, config: HandlerConfig) -> io::Result<Self> {
        let capacity = config.queue_capacity.max(1);
        let (outbound_tx, outbound_rx) = async_channel::bounded(capacity);
        let (inbound_tx, inbound_rx) = async_channel::bounded(capacity);
        let (event_tx, event_rx) = async_channel::bounded(capacity);
        let (connect_tx, connect_rx) = async_channel::bounded(1);

        let state = Arc::new(SharedState {
            running: AtomicBool::new(true),
            connect_pending: AtomicBool::new(false),
            connected: AtomicBool::new(false),
        });

        let worker = Worker::new(
            link,
            Arc::clone(&state),
            WorkerChannels {
                outbound: outbound_rx,
                inbound: inbound_tx,
                events: event_tx.clone(),
                connect_requests: connect_rx,
            },
            config.recv_buffer_size,
            config.max_payload,
            config.idle_sleep,
        );

        let handle = thread::Builder::new()
            .name("network-worker".to_string())
            .spawn(move || worker.run())?;

        debug!(
            queue_capacity = capacity,
            idle_sleep_us = config.idle_sleep.as_micros() as u64,
            "Network handler started"
        );

        Ok(Self {
            outbound: outbound_tx,
            inbound: inbound_rx,
            events: event_rx,
            event_tx,
            connect_requests: connect_tx,
            state,
            worker: Some(handle),
        })
    }

    /// Queue a packet for sending. Returns `false` without blocking if the
    /// outbound queue is full, and records a `SendQueueFull` event.
    pub fn send(&self, packet: L::Packet) -> bool {
        match self.outbound.try_send(packet) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("Outbound queue full");
                let event = NetworkEvent::SendQueueFull;
                if self.event_tx.try_send(event).is_err() {
                    warn!(%event, "Event queue full, dropping event");
                }
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Take the oldest received packet, if any.
    pub fn recv(&self) -> Option<L::Packet> {
        self.inbound.try_recv().ok()
    }

    pub fn has_event(&self) -> bool {
        !self.events.is_empty()
    }

    /// Take the oldest event, or `None` if there is none.
    pub fn get_event(&self) -> Option<NetworkEvent> {
        self.events.try_recv().ok()
    }

    /// Ask the worker to (re)connect to `ip:port`.
    ///
    /// Ignored if an earlier request has not been serviced yet. The outcome
    /// arrives as a `Connected` or `FailedToConnect` event.
    pub fn connect(&self, ip: &str, port: u16) {
        if self
            .state
            .connect_pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(ip, port, "Connect request already pending, ignoring");
            return;
        }

        let request = ConnectRequest {
            address: ip.to_string(),
            port,
        };
        if self.connect_requests.try_send(request).is_err() {
            self.state.connect_pending.store(false, Ordering::Release);
        }
    }

    /// Whether the worker currently holds an open session. May lag the event
    /// stream by one worker iteration.
    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::Acquire)
    }

    /// Number of packets waiting in the outbound queue. A packet the worker
    /// has started writing is no longer counted.
    pub fn pending_sends(&self) -> usize {
        self.outbound.len()
    }
}

impl<L: Link> Drop for NetworkHandler<L> {
    fn drop(&mut self) {
        self.state.running.store(false, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("Network worker panicked");
            }
        }
    }
}
