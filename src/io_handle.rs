//! Registers a transport's underlying stream with a worker's `mio::Registry`
//! and tracks the buffered state that decides what readiness to ask for.
//!
//! Splits the teacher's `Connection::{register,reregister,deregister}` /
//! `event_set` logic out from the read/write/parse logic itself, so the
//! same registration bookkeeping works for both downstream (client) and
//! upstream (origin) sockets, over any [`TransportSocket`] implementation.

use std::io::Result;

use mio::{Interest, Registry, Token};

use crate::buffer::Buffer;
use crate::transport_socket::{Action, RegisterableTransport, TransportSocket};

/// A registered IO source plus its read/write buffers.
///
/// `S` is the concrete stream type (`mio::net::TcpStream` in production,
/// a fake in tests); `T` is the transport wrapping it (plain or TLS).
pub struct IoHandle<S, T> {
    token: Token,
    transport: T,
    read_buf: Buffer,
    write_buf: Buffer,
    closed: bool,
    read_enabled: bool,
    _marker: std::marker::PhantomData<S>,
}

impl<S, T> IoHandle<S, T>
where
    T: TransportSocket,
{
    /// Wraps an already-constructed transport under `token`, with the given
    /// initial buffer capacities.
    pub fn new(token: Token, transport: T, buffer_capacity: usize) -> Self {
        IoHandle {
            token,
            transport,
            read_buf: Buffer::new(buffer_capacity),
            write_buf: Buffer::new(buffer_capacity),
            closed: false,
            read_enabled: true,
            _marker: std::marker::PhantomData,
        }
    }

    /// This handle's registration token.
    pub fn token(&self) -> Token {
        self.token
    }

    /// Borrows the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutably borrows the underlying transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// The accumulated, not-yet-consumed inbound bytes.
    pub fn read_buf(&mut self) -> &mut Buffer {
        &mut self.read_buf
    }

    /// The accumulated, not-yet-flushed outbound bytes.
    pub fn write_buf(&mut self) -> &mut Buffer {
        &mut self.write_buf
    }

    /// Whether the peer has closed, or an unrecoverable transport error
    /// was seen.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Enables or disables requesting `READABLE` interest, for high-watermark
    /// backpressure: a side that can't keep up stops asking to be polled
    /// readable until the other side drains its backlog below the low
    /// watermark.
    pub fn set_read_enabled(&mut self, enabled: bool) {
        self.read_enabled = enabled;
    }

    /// Pulls as many bytes as are currently available into `read_buf`.
    pub fn do_read(&mut self) -> Result<usize> {
        let result = self.transport.do_read(&mut self.read_buf)?;
        if result.action == Action::Close {
            self.closed = true;
        }
        Ok(result.bytes)
    }

    /// Flushes as much of `write_buf` as the transport will currently accept.
    pub fn do_write(&mut self) -> Result<usize> {
        let result = self.transport.do_write(&mut self.write_buf)?;
        if result.action == Action::Close {
            self.closed = true;
        }
        Ok(result.bytes)
    }

    fn event_set(&self) -> Interest {
        let wants_write = self.write_buf.remaining() > 0 || self.transport.interest().is_writable();
        match (self.read_enabled, wants_write) {
            (true, true) => Interest::READABLE | Interest::WRITABLE,
            (true, false) => Interest::READABLE,
            (false, true) => Interest::WRITABLE,
            // mio::Interest can never be empty; with reads paused and
            // nothing to write, keep WRITABLE armed rather than deregister.
            (false, false) => Interest::WRITABLE,
        }
    }
}

impl<S, T> IoHandle<S, T>
where
    T: RegisterableTransport,
{
    /// Registers this handle's readiness with `registry`.
    pub fn register(&mut self, registry: &Registry) -> Result<()> {
        let interest = self.event_set();
        registry.register(self.transport.source_mut(), self.token, interest)
    }

    /// Re-registers with updated interest (call after buffered state changes).
    pub fn reregister(&mut self, registry: &Registry) -> Result<()> {
        let interest = self.event_set();
        registry.reregister(self.transport.source_mut(), self.token, interest)
    }

    /// Deregisters this handle (call before dropping a closed connection).
    pub fn deregister(&mut self, registry: &Registry) -> Result<()> {
        registry.deregister(self.transport.source_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport_socket::PlainTransport;
    use std::io::{Cursor, Read, Write};

    struct Loopback {
        inbound: Cursor<Vec<u8>>,
        outbound: Vec<u8>,
    }

    impl Read for Loopback {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            self.inbound.read(buf)
        }
    }
    impl Write for Loopback {
        fn write(&mut self, buf: &[u8]) -> Result<usize> {
            self.outbound.write(buf)
        }
        fn flush(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn do_read_fills_read_buf_and_reports_bytes() {
        let stream = Loopback { inbound: Cursor::new(b"hi".to_vec()), outbound: Vec::new() };
        let transport = PlainTransport::new(stream);
        let mut handle: IoHandle<Loopback, _> = IoHandle::new(Token(0), transport, 64);
        let n = handle.do_read().unwrap();
        assert_eq!(2, n);
        assert_eq!(b"hi", &handle.read_buf()[..]);
    }

    #[test]
    fn do_read_of_eof_marks_closed() {
        let stream = Loopback { inbound: Cursor::new(Vec::new()), outbound: Vec::new() };
        let transport = PlainTransport::new(stream);
        let mut handle: IoHandle<Loopback, _> = IoHandle::new(Token(0), transport, 64);
        handle.do_read().unwrap();
        assert!(handle.is_closed());
    }

    #[test]
    fn disabling_reads_drops_readable_from_event_set() {
        let stream = Loopback { inbound: Cursor::new(Vec::new()), outbound: Vec::new() };
        let transport = PlainTransport::new(stream);
        let mut handle: IoHandle<Loopback, _> = IoHandle::new(Token(0), transport, 64);
        assert!(handle.event_set().is_readable());
        handle.set_read_enabled(false);
        assert!(!handle.event_set().is_readable());
        assert!(handle.event_set().is_writable());
    }

    #[test]
    fn do_write_drains_write_buf() {
        let stream = Loopback { inbound: Cursor::new(Vec::new()), outbound: Vec::new() };
        let transport = PlainTransport::new(stream);
        let mut handle: IoHandle<Loopback, _> = IoHandle::new(Token(0), transport, 64);
        handle.write_buf().write_all(b"out").unwrap();
        let n = handle.do_write().unwrap();
        assert_eq!(3, n);
        assert_eq!(0, handle.write_buf().remaining());
    }
}
