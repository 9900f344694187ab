//! Packet header codec.
//!
//! Every packet on the wire is a fixed-size header followed by exactly
//! `payload_size` bytes of payload:
//!
//! ```text
//! +--------------------+---------------------------+----------------------+
//! | payload_size (u32) | header data (size_of::<H>) | payload              |
//! +--------------------+---------------------------+----------------------+
//! ```
//!
//! Both fields are copied as raw memory in native byte order. Peers must agree
//! on endianness and on the layout of `H`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt::Debug;
use std::mem::size_of;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// Caller-defined data carried in every header after the payload size.
///
/// The `zerocopy` bounds guarantee the record has no padding and that every
/// bit pattern is a valid value, so it can be copied to and from the wire
/// without validation. Implemented automatically for any such type.
pub trait HeaderData: AsBytes + FromBytes + FromZeroes + Copy + Debug + Send + 'static {}

impl<T> HeaderData for T where T: AsBytes + FromBytes + FromZeroes + Copy + Debug + Send + 'static {}

/// Size field type.
pub type PayloadSize = u32;

/// Largest payload a single packet can describe.
pub const MAX_PAYLOAD: usize = PayloadSize::MAX as usize;

/// Decoded packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader<H> {
    payload_size: PayloadSize,
    header_data: H,
}

impl<H: HeaderData> PacketHeader<H> {
    /// Encoded size in bytes.
    pub const SIZE: usize = size_of::<PayloadSize>() + size_of::<H>();

    pub fn new(payload_size: PayloadSize, header_data: H) -> Self {
        Self {
            payload_size,
            header_data,
        }
    }

    pub const fn header_size() -> usize {
        Self::SIZE
    }

    pub fn payload_size(&self) -> PayloadSize {
        self.payload_size
    }

    pub fn header_data(&self) -> H {
        self.header_data
    }

    /// Serialize into exactly `SIZE` bytes.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        buf.put_u32_ne(self.payload_size);
        buf.put_slice(self.header_data.as_bytes());
        buf.freeze()
    }

    /// Deserialize from the first `SIZE` bytes of `bytes`.
    ///
    /// Returns `None` only when fewer than `SIZE` bytes are supplied. The
    /// contents of the header data are not validated.
    pub fn decode(mut bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        let payload_size = bytes.get_u32_ne();
        let header_data = H::read_from(&bytes[..size_of::<H>()])?;
        Some(Self::new(payload_size, header_data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
    #[repr(C)]
    struct TestData {
        kind: u8,
        flags: u8,
        _pad: [u8; 2],
        id: u32,
    }

    #[test]
    fn test_header_size() {
        assert_eq!(PacketHeader::<TestData>::SIZE, 12);
        assert_eq!(PacketHeader::<u32>::header_size(), 8);
        assert_eq!(PacketHeader::<[u8; 0]>::SIZE, 4);
        assert_eq!(PacketHeader::<u64>::SIZE, 12);
    }

    #[test]
    fn test_encode_layout() {
        let data = TestData {
            kind: 3,
            flags: 0xAA,
            _pad: [0; 2],
            id: 1337,
        };
        let bytes = PacketHeader::new(42, data).encode();

        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[..4], &42u32.to_ne_bytes());
        assert_eq!(bytes[4], 3);
        assert_eq!(bytes[5], 0xAA);
        assert_eq!(&bytes[8..], &1337u32.to_ne_bytes());
    }

    #[test]
    fn test_decode() {
        let data = TestData {
            kind: 1,
            flags: 0,
            _pad: [0; 2],
            id: 7,
        };
        let encoded = PacketHeader::new(60000, data).encode();

        let header = PacketHeader::<TestData>::decode(&encoded).unwrap();
        assert_eq!(header.payload_size(), 60000);
        assert_eq!(header.header_data(), data);
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let mut wire = PacketHeader::new(5, 99u32).encode().to_vec();
        wire.extend_from_slice(b"hello");

        let header = PacketHeader::<u32>::decode(&wire).unwrap();
        assert_eq!(header.payload_size(), 5);
        assert_eq!(header.header_data(), 99);
    }

    #[test]
    fn test_decode_short_input() {
        assert!(PacketHeader::<u32>::decode(&[0u8; 7]).is_none());
    }

    #[test]
    fn test_decode_garbage() {
        // Any bit pattern decodes; validity is the caller's concern.
        let header = PacketHeader::<TestData>::decode(&[0xFF; 12]).unwrap();
        assert_eq!(header.payload_size(), u32::MAX);
        assert_eq!(header.header_data().kind, 0xFF);
    }
}
