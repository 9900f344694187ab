//! Events reported by the network worker.

use std::fmt;

/// State transitions and backpressure signals observed by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkEvent {
    /// A packet was pushed to the inbound queue.
    NewData,
    /// The link failed while connected and was closed.
    Disconnected,
    /// A connect request succeeded.
    Connected,
    /// A packet could not be queued for sending.
    SendQueueFull,
    /// A received packet was dropped because the inbound queue was full.
    RecvQueueFull,
    /// A connect request failed.
    FailedToConnect,
}

impl NetworkEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkEvent::NewData => "new data",
            NetworkEvent::Disconnected => "disconnected",
            NetworkEvent::Connected => "connected",
            NetworkEvent::SendQueueFull => "send queue full",
            NetworkEvent::RecvQueueFull => "recv queue full",
            NetworkEvent::FailedToConnect => "failed to connect",
        }
    }
}

impl fmt::Display for NetworkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
