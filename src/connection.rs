//! Framed packet I/O over a transport.
//!
//! A `Connection` owns exactly one transport and turns its byte-level,
//! possibly partial reads and writes into whole packets: a fixed-size
//! [`PacketHeader`] followed by the payload. Intended for reliable in-order
//! stream transports.
//!
//! `read` and `write` loop until the packet is complete and suit blocking
//! transports. `poll_read` and `poll_write` suit non-blocking ones: they keep
//! the partially transferred packet inside the connection, return when the
//! transport would block, and resume on the next call.

use crate::error::{Error, ReadError, Result};
use crate::header::{HeaderData, PacketHeader, PayloadSize, MAX_PAYLOAD};
use crate::transport::Transport;
use bytes::{BufMut, BytesMut};
use std::io;
use std::marker::PhantomData;
use std::net::SocketAddr;

/// One packet as exchanged through the network handler over a framed link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame<H> {
    pub header: H,
    pub payload: Vec<u8>,
}

impl<H> Frame<H> {
    pub fn new(header: H, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            header,
            payload: payload.into(),
        }
    }
}

/// Progress of a packet being received by `poll_read`.
#[derive(Debug)]
struct RecvState<H> {
    header_bytes: Vec<u8>,
    header_received: usize,
    header: Option<H>,
    payload: Vec<u8>,
    payload_received: usize,
}

impl<H> Default for RecvState<H> {
    fn default() -> Self {
        Self {
            header_bytes: Vec::new(),
            header_received: 0,
            header: None,
            payload: Vec::new(),
            payload_received: 0,
        }
    }
}

/// Progress of a packet being sent by `poll_write`.
#[derive(Debug, Default)]
struct SendState {
    bytes: BytesMut,
    written: usize,
}

/// Framing layer over a transport `T` with caller-defined header data `H`.
#[derive(Debug)]
pub struct Connection<T, H> {
    transport: T,
    recv: RecvState<H>,
    send: SendState,
    _header: PhantomData<fn() -> H>,
}

impl<T: Default, H> Default for Connection<T, H> {
    fn default() -> Self {
        Self {
            transport: T::default(),
            recv: RecvState::default(),
            send: SendState::default(),
            _header: PhantomData,
        }
    }
}

/// Validate that a payload length fits the header's size field.
pub fn payload_size_for(len: usize) -> Result<PayloadSize> {
    PayloadSize::try_from(len).map_err(|_| Error::PayloadTooLarge {
        len,
        max: MAX_PAYLOAD,
    })
}

impl<T: Transport, H: HeaderData> Connection<T, H> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            recv: RecvState::default(),
            send: SendState::default(),
            _header: PhantomData,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    pub fn connect(&mut self, address: &str, port: u16) -> Result<()> {
        self.reset();
        Ok(self.transport.connect(address, port)?)
    }

    /// Close the transport and forget any partially transferred packet.
    pub fn disconnect(&mut self) {
        self.reset();
        self.transport.disconnect();
    }

    fn reset(&mut self) {
        self.recv = RecvState::default();
        self.send = SendState::default();
    }

    /// Read one whole packet.
    ///
    /// The payload replaces the contents of `payload_out`, whose allocation is
    /// reused across calls. Blocks until the full header and payload have
    /// arrived or the transport fails. A non-blocking transport that has no
    /// data fails with `WouldBlock`; use `poll_read` there.
    pub fn read(&mut self, payload_out: &mut Vec<u8>) -> std::result::Result<H, ReadError<H>> {
        if !self.transport.is_open() {
            return Err(ReadError::header(Error::NotOpen));
        }

        let mut header_bytes = vec![0u8; PacketHeader::<H>::SIZE];
        let mut received = 0;
        fill_all(&mut self.transport, &mut header_bytes, &mut received)
            .map_err(ReadError::header)?;

        let header = PacketHeader::<H>::decode(&header_bytes).ok_or_else(|| {
            ReadError::header(Error::Io(io::ErrorKind::InvalidData.into()))
        })?;
        let header_data = header.header_data();
        let payload_size = header.payload_size() as usize;

        payload_out.clear();
        payload_out.resize(payload_size, 0);

        let mut received = 0;
        let res = fill_all(&mut self.transport, payload_out, &mut received);
        payload_out.truncate(received);
        match res {
            Ok(()) => Ok(header_data),
            Err(e) => Err(ReadError::payload(header_data, e)),
        }
    }

    /// Make progress on receiving one packet without waiting.
    ///
    /// Returns `Ok(None)` when the transport would block before the packet is
    /// complete; the bytes received so far are kept for the next call. A
    /// header announcing more than `max_payload` bytes fails with
    /// [`Error::PayloadTooLarge`] before any payload memory is reserved. On
    /// failure the partial packet is discarded.
    pub fn poll_read(
        &mut self,
        max_payload: usize,
    ) -> std::result::Result<Option<Frame<H>>, ReadError<H>> {
        if !self.transport.is_open() {
            return Err(ReadError::header(Error::NotOpen));
        }

        let header_data = match self.recv.header {
            Some(header_data) => header_data,
            None => {
                let state = &mut self.recv;
                state.header_bytes.resize(PacketHeader::<H>::SIZE, 0);
                match fill_partial(
                    &mut self.transport,
                    &mut state.header_bytes,
                    &mut state.header_received,
                ) {
                    Ok(true) => {}
                    Ok(false) => return Ok(None),
                    Err(e) => {
                        self.recv = RecvState::default();
                        return Err(ReadError::header(e));
                    }
                }

                let Some(header) = PacketHeader::<H>::decode(&state.header_bytes) else {
                    self.recv = RecvState::default();
                    return Err(ReadError::header(Error::Io(
                        io::ErrorKind::InvalidData.into(),
                    )));
                };
                let header_data = header.header_data();
                let payload_size = header.payload_size() as usize;
                if payload_size > max_payload {
                    self.recv = RecvState::default();
                    return Err(ReadError::payload(
                        header_data,
                        Error::PayloadTooLarge {
                            len: payload_size,
                            max: max_payload,
                        },
                    ));
                }

                state.header = Some(header_data);
                state.payload.clear();
                state.payload.resize(payload_size, 0);
                state.payload_received = 0;
                header_data
            }
        };

        let state = &mut self.recv;
        match fill_partial(
            &mut self.transport,
            &mut state.payload,
            &mut state.payload_received,
        ) {
            Ok(true) => {
                let payload = std::mem::take(&mut state.payload);
                self.recv = RecvState::default();
                Ok(Some(Frame::new(header_data, payload)))
            }
            Ok(false) => Ok(None),
            Err(e) => {
                self.recv = RecvState::default();
                Err(ReadError::payload(header_data, e))
            }
        }
    }

    /// Whether `poll_read` holds part of a packet.
    pub fn is_receiving(&self) -> bool {
        self.recv.header_received > 0
    }

    /// Write one whole packet.
    ///
    /// Fails with [`Error::PayloadTooLarge`] before anything is sent if the
    /// payload cannot be described by the header.
    pub fn write(&mut self, header_data: &H, payload: &[u8]) -> Result<()> {
        if !self.transport.is_open() {
            return Err(Error::NotOpen);
        }
        let payload_size = payload_size_for(payload.len())?;
        let header = PacketHeader::new(payload_size, *header_data).encode();

        drain_all(&mut self.transport, &header)?;
        drain_all(&mut self.transport, payload)
    }

    /// Make progress on sending one packet without waiting.
    ///
    /// The first call encodes the packet and keeps it until every byte has
    /// been written; while `is_sending` is true further calls resume that
    /// packet and ignore their arguments. Returns `Ok(true)` once the packet
    /// is complete and `Ok(false)` if the transport would block.
    pub fn poll_write(&mut self, header_data: &H, payload: &[u8]) -> Result<bool> {
        if !self.transport.is_open() {
            return Err(Error::NotOpen);
        }

        if !self.is_sending() {
            let payload_size = payload_size_for(payload.len())?;
            let header = PacketHeader::new(payload_size, *header_data).encode();
            let bytes = &mut self.send.bytes;
            bytes.clear();
            bytes.reserve(header.len() + payload.len());
            bytes.put_slice(&header);
            bytes.put_slice(payload);
            self.send.written = 0;
        }

        let res = drain_partial(
            &mut self.transport,
            &self.send.bytes,
            &mut self.send.written,
        );
        match res {
            Ok(true) => {
                self.send.bytes.clear();
                self.send.written = 0;
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(e) => {
                self.send = SendState::default();
                Err(e)
            }
        }
    }

    /// Whether `poll_write` holds part of a packet.
    pub fn is_sending(&self) -> bool {
        !self.send.bytes.is_empty()
    }

    pub fn can_read(&self) -> bool {
        self.transport.can_read()
    }

    pub fn can_write(&self) -> bool {
        self.transport.can_write()
    }

    pub fn has_error(&self) -> bool {
        self.transport.has_error()
    }

    pub fn start_server(&mut self, port: u16) -> Result<()> {
        self.reset();
        Ok(self.transport.start_server(port)?)
    }

    /// Accept a pending client as a new connection, or `None`.
    pub fn accept(&mut self) -> Option<Self> {
        self.transport.accept().map(Self::new)
    }

    pub fn can_accept(&self) -> bool {
        self.transport.can_accept()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.transport.local_addr()?)
    }

    pub fn peer_addr(&self) -> Result<SocketAddr> {
        Ok(self.transport.peer_addr()?)
    }

    pub fn set_blocking(&self, blocking: bool) -> Result<()> {
        Ok(self.transport.set_blocking(blocking)?)
    }
}

/// Read into `buf[*received..]` until it is full or the transport would
/// block. Returns whether `buf` is full.
fn fill_partial<T: Transport>(transport: &mut T, buf: &mut [u8], received: &mut usize) -> Result<bool> {
    while *received < buf.len() {
        match transport.read(&mut buf[*received..]) {
            Ok(0) => return Err(Error::UnexpectedEof),
            Ok(n) => *received += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

/// Write `buf[*written..]` until it is all sent or the transport would
/// block. Returns whether everything was written.
fn drain_partial<T: Transport>(transport: &mut T, buf: &[u8], written: &mut usize) -> Result<bool> {
    while *written < buf.len() {
        match transport.write(&buf[*written..]) {
            Ok(0) => return Err(Error::Io(io::ErrorKind::WriteZero.into())),
            Ok(n) => *written += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

/// Read until `buf` is full. `received` tracks progress even on failure.
fn fill_all<T: Transport>(transport: &mut T, buf: &mut [u8], received: &mut usize) -> Result<()> {
    if fill_partial(transport, buf, received)? {
        Ok(())
    } else {
        Err(Error::Io(io::ErrorKind::WouldBlock.into()))
    }
}

fn drain_all<T: Transport>(transport: &mut T, buf: &[u8]) -> Result<()> {
    let mut written = 0;
    if drain_partial(transport, buf, &mut written)? {
        Ok(())
    } else {
        Err(Error::Io(io::ErrorKind::WouldBlock.into()))
    }
}
