//! Error types for framing and transport operations.

use std::fmt::Debug;
use std::io;

/// Errors surfaced by connections, transports and links.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Underlying socket call failed.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    /// Payload does not fit the header's `u32` size field.
    #[error("payload of {len} bytes exceeds the maximum of {max} bytes")]
    PayloadTooLarge { len: usize, max: usize },

    /// Socket has not been opened, connected or bound.
    #[error("transport is not open")]
    NotOpen,

    /// A datagram write moved fewer bytes than the packet holds.
    #[error("short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    /// Peer closed the stream in the middle of a packet.
    #[error("peer closed the connection")]
    UnexpectedEof,
}

pub type Result<T> = std::result::Result<T, Error>;

/// A failed framed read.
///
/// `header` is `None` when the header itself could not be read, and holds the
/// decoded header data when only the payload failed.
#[derive(Debug, thiserror::Error)]
#[error("failed to read packet: {source}")]
pub struct ReadError<H: Debug> {
    pub header: Option<H>,
    #[source]
    pub source: Error,
}

impl<H: Debug> ReadError<H> {
    pub(crate) fn header(source: Error) -> Self {
        Self {
            header: None,
            source,
        }
    }

    pub(crate) fn payload(header: H, source: Error) -> Self {
        Self {
            header: Some(header),
            source,
        }
    }
}
