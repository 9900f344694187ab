//! framenet: framed packet networking over TCP and UDP.
//!
//! - `header`: fixed-layout packet header codec
//! - `connection`: framed reads and writes over any `Transport`, resuming
//!   partial socket I/O until whole packets have moved
//! - `handler`: a worker thread that owns the socket and exchanges packets
//!   with the caller through bounded queues
//! - `server` / `client`: a small demo protocol built on the above

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod header;
pub mod protocol;
pub mod server;
pub mod transport;

#[cfg(test)]
mod testing;

pub use connection::{Connection, Frame};
pub use error::{Error, ReadError, Result};
pub use handler::{HandlerConfig, Link, NetworkEvent, NetworkHandler, DEFAULT_MAX_PAYLOAD};
pub use header::{HeaderData, PacketHeader, PayloadSize, MAX_PAYLOAD};
pub use transport::{DatagramTransport, Tcp, Transport, Udp};
