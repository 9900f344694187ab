//! Packet-level links driven by the network worker.
//!
//! A link moves whole packets. Datagram transports map one datagram to one
//! packet; framed connections map one header + payload to one packet.
//!
//! Links are switched to non-blocking mode once connected. A packet that
//! cannot be moved in one go is kept by the link (framed) or retried by the
//! worker (datagram), so the worker never waits on a socket.

use crate::connection::{Connection, Frame};
use crate::error::{Error, Result};
use crate::header::HeaderData;
use crate::transport::{Transport, Udp};
use std::io;

/// Whole-packet I/O used by the worker thread.
pub trait Link: Send + 'static {
    /// Unit exchanged through the handler's queues.
    type Packet: Send + 'static;

    /// Open a session and put it in non-blocking mode.
    fn connect(&mut self, address: &str, port: u16) -> Result<()>;

    fn disconnect(&mut self);

    fn can_read(&self) -> bool;

    fn can_write(&self) -> bool;

    /// Make progress on sending `packet`.
    ///
    /// Returns `Ok(true)` once the packet has been sent in full and
    /// `Ok(false)` if the link would block. After `Ok(false)` the caller must
    /// offer the same packet again until it completes.
    fn send_packet(&mut self, packet: &Self::Packet) -> Result<bool>;

    /// Make progress on receiving one packet, `Ok(None)` if none is complete
    /// yet.
    ///
    /// `scratch` is a worker-owned buffer sized to the largest datagram the
    /// link can deliver in a single read. Framed links refuse packets whose
    /// payload exceeds `max_payload`.
    fn recv_packet(&mut self, scratch: &mut [u8], max_payload: usize) -> Result<Option<Self::Packet>>;
}

impl Link for Udp {
    type Packet = Vec<u8>;

    fn connect(&mut self, address: &str, port: u16) -> Result<()> {
        Transport::connect(self, address, port)?;
        Ok(self.set_blocking(false)?)
    }

    fn disconnect(&mut self) {
        Transport::disconnect(self);
    }

    fn can_read(&self) -> bool {
        Transport::can_read(self)
    }

    fn can_write(&self) -> bool {
        Transport::can_write(self)
    }

    fn send_packet(&mut self, packet: &Vec<u8>) -> Result<bool> {
        let written = match self.write(packet) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if written != packet.len() {
            return Err(Error::ShortWrite {
                written,
                expected: packet.len(),
            });
        }
        Ok(true)
    }

    fn recv_packet(&mut self, scratch: &mut [u8], _max_payload: usize) -> Result<Option<Vec<u8>>> {
        match self.read(scratch) {
            Ok(n) => Ok(Some(scratch[..n].to_vec())),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl<T, H> Link for Connection<T, H>
where
    T: Transport,
    H: HeaderData,
{
    type Packet = Frame<H>;

    fn connect(&mut self, address: &str, port: u16) -> Result<()> {
        Connection::connect(self, address, port)?;
        self.set_blocking(false)
    }

    fn disconnect(&mut self) {
        Connection::disconnect(self);
    }

    fn can_read(&self) -> bool {
        Connection::can_read(self)
    }

    fn can_write(&self) -> bool {
        Connection::can_write(self)
    }

    fn send_packet(&mut self, packet: &Frame<H>) -> Result<bool> {
        self.poll_write(&packet.header, &packet.payload)
    }

    fn recv_packet(&mut self, _scratch: &mut [u8], max_payload: usize) -> Result<Option<Frame<H>>> {
        self.poll_read(max_payload).map_err(|e| e.source)
    }
}
