// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A downstream (client-facing) connection: buffered IO over a
//! [`TransportSocket`], the in-flight [`H1Request`] parse, and the
//! [`RequestContext`] built from it once the head is complete.
//!
//! Generalizes the previous `ConnectionType::{Plain, Tls}` split (which
//! embedded TLS directly into the connection) by going through
//! [`IoHandle`]/[`TransportSocket`] instead, so the same struct drives a
//! plaintext or TLS-terminated client with no duplicated read/write/parse
//! logic.

use std::io::{Result, Write};
use std::net::SocketAddr;

use mio::{Registry, Token};

use crate::buffer::Buffer;
use crate::io_handle::IoHandle;
use crate::parser::h1::request::H1Request;
use crate::parser::h1::response::Response;
use crate::parser::{ParseError, ParseResult, Status};
use crate::request::RequestContext;
use crate::transport_socket::{RegisterableTransport, TransportSocket};
use crate::watermark::WatermarkBuffer;

/// A client-facing connection: its IO handle, the request currently being
/// parsed off the wire, and any response queued for write.
pub struct Connection<S, T> {
    io: IoHandle<S, T>,
    peer_addr: Option<SocketAddr>,
    request: H1Request,
    pending_response: Option<Response>,
    watermark: WatermarkBuffer,
    closed: bool,
}

impl<S, T> Connection<S, T>
where
    T: TransportSocket,
{
    /// Wraps a transport as a fresh client connection, not yet registered.
    pub fn new(token: Token, transport: T, buffer_capacity: usize, high_watermark: usize) -> Self {
        Connection {
            io: IoHandle::new(token, transport, buffer_capacity),
            peer_addr: None,
            request: H1Request::default(),
            pending_response: None,
            watermark: WatermarkBuffer::new(high_watermark),
            closed: false,
        }
    }

    /// Records the peer's address, used later for `X-Forwarded-For`.
    pub fn set_peer_addr(&mut self, addr: SocketAddr) {
        self.peer_addr = Some(addr);
    }

    /// This connection's registration token.
    pub fn token(&self) -> Token {
        self.io.token()
    }

    /// Whether this connection should be torn down.
    pub fn is_closed(&self) -> bool {
        self.closed || self.io.is_closed()
    }

    /// Pulls available bytes off the wire into the read buffer, applying
    /// watermark backpressure bookkeeping.
    pub fn read(&mut self) -> Result<usize> {
        let n = self.io.do_read()?;
        if n > 0 {
            self.watermark.add(n);
        }
        if self.io.is_closed() {
            self.closed = true;
        }
        Ok(n)
    }

    /// Attempts to parse a complete request head from the accumulated read
    /// buffer. Returns `Status::Partial` until `\r\n\r\n` (and then the full
    /// head) has arrived. On completion, drains exactly the consumed head
    /// bytes from the read buffer, leaving any pipelined bytes that follow
    /// for the next request.
    pub fn parse(&mut self) -> ParseResult<()> {
        let buf: &[u8] = &self.io.read_buf()[..];
        let status = self.request.parse(buf)?;
        if status.is_complete() {
            if let Some(len) = crate::parser::h1::request::head_len(buf) {
                self.io.read_buf().mark_read(len);
            }
        }
        Ok(status)
    }

    /// Builds a [`RequestContext`] from the just-completed parse, ready for
    /// routing. Only meaningful immediately after [`Connection::parse`]
    /// returns `Status::Complete`.
    pub fn take_request_context(&self) -> Result<RequestContext> {
        let mut ctx = RequestContext::new();
        ctx.method = self.request.method;
        ctx.target = self.request.target.clone();
        ctx.version = self.request.version;
        ctx.headers = self.request.headers.clone();
        ctx.client_addr = self.peer_addr;
        ctx.ssl_info = self.io.transport().ssl();
        Ok(ctx)
    }

    /// Resets parser state so the next request on a keep-alive connection
    /// starts fresh. Does not touch already-buffered unread bytes
    /// (pipelined requests remain in the read buffer).
    pub fn reset_for_next_request(&mut self) {
        self.request = H1Request::default();
    }

    /// Queues a response for write on the next writable event.
    pub fn prepare_response(&mut self, response: Response) {
        self.pending_response = Some(response);
    }

    /// Queues already-framed bytes for write, bypassing [`Response`]
    /// serialization. Used to relay an upstream response to the client
    /// byte-for-byte rather than re-encoding it through this core's own
    /// response builder.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.io.write_buf().write_all(bytes)?;
        self.watermark.add(bytes.len());
        Ok(())
    }

    /// The accumulated, not-yet-consumed inbound bytes, for callers relaying
    /// raw bytes onward (passthrough/tunnel mode) rather than parsing them.
    pub fn read_buf(&mut self) -> &mut Buffer {
        self.io.read_buf()
    }

    /// Enables or disables requesting further reads from this connection,
    /// for high-watermark backpressure on the direction it's feeding.
    pub fn set_read_enabled(&mut self, enabled: bool) {
        self.io.set_read_enabled(enabled);
    }

    /// Serializes any queued response into the write buffer.
    fn stage_pending_response(&mut self) {
        if let Some(response) = self.pending_response.take() {
            let bytes = response.get_serialized();
            let _ = self.io.write_buf().write_all(&bytes);
        }
    }

    /// Flushes as much of the write buffer (including any just-queued
    /// response) as the transport will currently accept.
    pub fn write(&mut self) -> Result<usize> {
        self.stage_pending_response();
        let n = self.io.do_write()?;
        if n > 0 {
            self.watermark.drain(n);
        }
        if self.io.is_closed() {
            self.closed = true;
        }
        Ok(n)
    }

    /// Whether this connection is currently above its high watermark and
    /// the peer's reads should be throttled.
    pub fn is_above_high_watermark(&self) -> bool {
        self.watermark.is_above_high()
    }
}

impl<S, T> Connection<S, T>
where
    T: RegisterableTransport,
{
    /// Registers this connection's stream with `registry`.
    pub fn register(&mut self, registry: &Registry) -> Result<()> {
        self.io.register(registry)
    }

    /// Re-registers after buffered state (e.g. a response now queued)
    /// changes this connection's desired readiness.
    pub fn reregister(&mut self, registry: &Registry) -> Result<()> {
        self.io.reregister(registry)
    }

    /// Deregisters this connection ahead of teardown.
    pub fn deregister(&mut self, registry: &Registry) -> Result<()> {
        self.io.deregister(registry)
    }
}

/// Well-known parse outcome alias used by callers that only care whether a
/// full head has arrived yet.
pub fn head_complete(status: &Status<()>) -> bool {
    status.is_complete()
}

/// Maps a [`ParseError`] onto a canned `400 Bad Request`, per §7's mapping
/// of malformed input to a fixed status regardless of error subtype.
pub fn bad_request_response(_err: &ParseError) -> Response {
    use crate::parser::status::Status as StatusCode;
    use crate::parser::Version;

    Response::new_with_status_line(Version::H1_1, StatusCode::BadRequest)
        .with_header("Connection", "close")
        .with_body(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport_socket::PlainTransport;
    use std::io::{Cursor, Read};

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

    fn conn_with_request(bytes: &[u8]) -> Connection<Loopback, PlainTransport<Loopback>> {
        let stream = Loopback { inbound: Cursor::new(bytes.to_vec()), outbound: Vec::new() };
        let transport = PlainTransport::new(stream);
        Connection::new(Token(0), transport, 4096, 1 << 16)
    }

    #[test]
    fn reads_and_parses_a_full_request_head() {
        let mut conn = conn_with_request(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n");
        conn.read().unwrap();
        let status = conn.parse().unwrap();
        assert!(status.is_complete());
        let ctx = conn.take_request_context().unwrap();
        assert_eq!(Some("example.com".to_string()), ctx.host());
    }

    #[test]
    fn partial_request_reports_partial_status() {
        let mut conn = conn_with_request(b"GET / HTTP/1.1\r\nHost: example.com\r\n");
        conn.read().unwrap();
        let status = conn.parse().unwrap();
        assert!(!status.is_complete());
    }

    #[test]
    fn eof_with_no_bytes_marks_connection_closed() {
        let mut conn = conn_with_request(b"");
        conn.read().unwrap();
        assert!(conn.is_closed());
    }
}
