//! Demo application protocol.
//!
//! Every packet carries a `DemoHeader` identifying its kind and the sender's
//! id. A session starts with a `Handshake`; `Ping` is answered with `Pong`;
//! `Shutdown` asks the server to stop.

use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// Sentinel payload that also requests shutdown.
pub const SHUTDOWN_SENTINEL: u8 = 0x0F;

/// Id the demo client introduces itself with.
pub const CLIENT_ID: u32 = 1337;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    Handshake = 0,
    Ping = 1,
    Pong = 2,
    Shutdown = 3,
}

impl TryFrom<u8> for PacketKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0 => Ok(PacketKind::Handshake),
            1 => Ok(PacketKind::Ping),
            2 => Ok(PacketKind::Pong),
            3 => Ok(PacketKind::Shutdown),
            other => Err(other),
        }
    }
}

/// Fixed-layout header data of the demo protocol.
#[derive(AsBytes, FromBytes, FromZeroes, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct DemoHeader {
    kind: u8,
    _pad: [u8; 3],
    pub id: u32,
}

impl DemoHeader {
    pub fn new(kind: PacketKind, id: u32) -> Self {
        Self {
            kind: kind as u8,
            _pad: [0; 3],
            id,
        }
    }

    /// Packet kind, or the raw byte if it is not a known kind.
    pub fn kind(&self) -> Result<PacketKind, u8> {
        PacketKind::try_from(self.kind)
    }
}

/// Whether `payload` is the one-byte shutdown sentinel.
pub fn is_shutdown_sentinel(payload: &[u8]) -> bool {
    payload == [SHUTDOWN_SENTINEL]
}
