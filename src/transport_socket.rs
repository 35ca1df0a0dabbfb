//! Transport abstraction over a plaintext or TLS-terminated byte stream.
//!
//! Generalizes the teacher's `ConnectionType::{Plain, Tls}` split (which
//! only covered the client-facing direction) into a trait so both
//! downstream (client) and upstream (origin) connections can share one
//! adapter. `do_read`/`do_write` return an explicit action rather than
//! relying on the caller to infer close-vs-keep-open from an `io::Result`,
//! matching the IO handle/transport socket contract in the original
//! event/network layer (`rp-raw-buffer-socket.c`,
//! `rp-io-bev-socket-handle-impl.c`).

use std::collections::HashMap;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::Arc;

use mio::event::Source;
use rustls::{ClientConfig, ClientConnection, ServerConfig, ServerConnection};

use crate::buffer::Buffer;

/// Information about a terminated TLS session, surfaced for the `X-SSL-*`
/// header policy (§4.2, §4.4). Fields an X.509 parser would derive
/// (certificate subject/issuer/serial/SHA-1 fingerprint, validity window,
/// and per-OID extensions) are out of this core's scope and left empty
/// rather than fabricated; only what rustls exposes directly is populated.
#[derive(Debug, Clone, Default)]
pub struct SslConnectionInfo {
    /// Negotiated cipher suite, e.g. `TLS13_AES_256_GCM_SHA384`.
    pub cipher_suite: Option<String>,
    /// Negotiated TLS protocol version, e.g. `TLSv1.3`.
    pub protocol_version: Option<String>,
    /// Client-certificate extension values, keyed by dotted OID. Always
    /// empty on this core: populating it requires X.509 parsing this core
    /// does not perform.
    pub extensions_by_oid: HashMap<String, Vec<u8>>,
}

/// What the caller should do after a `do_read`/`do_write` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Keep the connection open; more IO may follow.
    KeepOpen,
    /// The peer closed its write side, or an unrecoverable transport error
    /// occurred; the connection should be torn down.
    Close,
}

/// Outcome of a single `do_read`/`do_write` call.
#[derive(Debug)]
pub struct IoResult {
    /// Bytes moved in this call.
    pub bytes: usize,
    /// What the caller should do next.
    pub action: Action,
}

/// A byte-stream transport: either plaintext or a TLS session terminated
/// over an underlying plaintext stream.
pub trait TransportSocket {
    /// Reads available bytes from the peer into `buf`.
    fn do_read(&mut self, buf: &mut Buffer) -> io::Result<IoResult>;
    /// Writes buffered bytes from `buf` out to the peer.
    fn do_write(&mut self, buf: &mut Buffer) -> io::Result<IoResult>;
    /// Readiness this transport currently wants polled (TLS sessions may
    /// need `WRITABLE` even while only decrypting inbound data).
    fn interest(&self) -> mio::Interest;
    /// TLS session information, if this transport terminated TLS. `None` for
    /// plaintext transports and TLS transports still mid-handshake.
    fn ssl(&self) -> Option<SslConnectionInfo> {
        None
    }
}

/// Transports whose underlying stream can be registered with a
/// `mio::Registry`. Split from [`TransportSocket`] so the fake streams unit
/// tests use (which implement `Read`/`Write` but not `mio::event::Source`)
/// can still exercise `do_read`/`do_write` without needing a real
/// registration target.
pub trait RegisterableTransport: TransportSocket {
    /// The transport's underlying `mio` event source.
    fn source_mut(&mut self) -> &mut dyn Source;
}

impl<S: Read + Write + Source> RegisterableTransport for PlainTransport<S> {
    fn source_mut(&mut self) -> &mut dyn Source {
        &mut self.stream
    }
}

impl<S: Read + Write + Source> RegisterableTransport for ServerTlsTransport<S> {
    fn source_mut(&mut self) -> &mut dyn Source {
        &mut self.stream
    }
}

impl<S: Read + Write + Source> RegisterableTransport for ClientTlsTransport<S> {
    fn source_mut(&mut self) -> &mut dyn Source {
        &mut self.stream
    }
}

/// A plaintext transport: reads and writes pass straight through to the
/// underlying stream.
pub struct PlainTransport<S> {
    stream: S,
}

impl<S> PlainTransport<S> {
    /// Wraps `stream` as a plaintext transport.
    pub fn new(stream: S) -> Self {
        PlainTransport { stream }
    }

    /// Unwraps back to the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Borrows the underlying stream, e.g. for `mio` registration.
    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }
}

impl<S: Read + Write> TransportSocket for PlainTransport<S> {
    fn do_read(&mut self, buf: &mut Buffer) -> io::Result<IoResult> {
        if buf.remaining_mut() < 4096 {
            buf.reserve(4096);
        }
        match self.stream.read(&mut buf[..]) {
            Ok(0) => Ok(IoResult { bytes: 0, action: Action::Close }),
            Ok(n) => {
                buf.mark_written(n);
                Ok(IoResult { bytes: n, action: Action::KeepOpen })
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                Ok(IoResult { bytes: 0, action: Action::KeepOpen })
            }
            Err(e) => Err(e),
        }
    }

    fn do_write(&mut self, buf: &mut Buffer) -> io::Result<IoResult> {
        let available = buf.remaining();
        if available == 0 {
            return Ok(IoResult { bytes: 0, action: Action::KeepOpen });
        }
        match self.stream.write(&buf[..]) {
            Ok(n) => {
                buf.mark_read(n);
                Ok(IoResult { bytes: n, action: Action::KeepOpen })
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                Ok(IoResult { bytes: 0, action: Action::KeepOpen })
            }
            Err(e) => Err(e),
        }
    }

    fn interest(&self) -> mio::Interest {
        mio::Interest::READABLE | mio::Interest::WRITABLE
    }
}

/// A server-side (downstream-facing) TLS transport over rustls.
pub struct ServerTlsTransport<S> {
    stream: S,
    tls: ServerConnection,
}

impl<S: Source + Read + Write> ServerTlsTransport<S> {
    /// Begins a TLS server handshake over `stream` using `config`.
    pub fn new(stream: S, config: Arc<ServerConfig>) -> Result<Self, rustls::Error> {
        Ok(ServerTlsTransport {
            stream,
            tls: ServerConnection::new(config)?,
        })
    }

    /// Negotiated ALPN protocol, if any (used to detect an `h2` upgrade
    /// request so it can be rejected — HTTP/2 is out of this core's scope).
    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        self.tls.alpn_protocol()
    }
}

impl<S: Read + Write> TransportSocket for ServerTlsTransport<S> {
    fn do_read(&mut self, buf: &mut Buffer) -> io::Result<IoResult> {
        let read = loop {
            match self.tls.read_tls(&mut self.stream) {
                Ok(0) => break 0,
                Ok(n) => {
                    if self.tls.process_new_packets().is_err() {
                        return Ok(IoResult { bytes: 0, action: Action::Close });
                    }
                    let _ = n;
                    break plaintext_into(&mut self.tls, buf)?;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break 0,
                Err(e) => return Err(e),
            }
        };

        if read == 0 && matches!(self.tls.process_new_packets(), Err(_)) {
            return Ok(IoResult { bytes: 0, action: Action::Close });
        }

        Ok(IoResult { bytes: read, action: Action::KeepOpen })
    }

    fn do_write(&mut self, buf: &mut Buffer) -> io::Result<IoResult> {
        if buf.remaining() > 0 {
            self.tls.writer().write_all(&buf[..])?;
            buf.mark_read(buf.remaining());
        }
        let n = self.tls.write_tls(&mut self.stream)?;
        Ok(IoResult { bytes: n, action: Action::KeepOpen })
    }

    fn interest(&self) -> mio::Interest {
        if self.tls.wants_write() {
            mio::Interest::READABLE | mio::Interest::WRITABLE
        } else {
            mio::Interest::READABLE
        }
    }

    fn ssl(&self) -> Option<SslConnectionInfo> {
        if !self.tls.is_handshaking() {
            Some(SslConnectionInfo {
                cipher_suite: self.tls.negotiated_cipher_suite().map(|cs| format!("{:?}", cs.suite())),
                protocol_version: self.tls.protocol_version().map(|v| format!("{v:?}")),
                extensions_by_oid: HashMap::new(),
            })
        } else {
            None
        }
    }
}

fn plaintext_into(tls: &mut ServerConnection, buf: &mut Buffer) -> io::Result<usize> {
    let mut total = 0;
    loop {
        if buf.remaining_mut() < 4096 {
            buf.reserve(4096);
        }
        match tls.reader().read(&mut buf[..]) {
            Ok(0) => break,
            Ok(n) => {
                buf.mark_written(n);
                total += n;
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => break,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

/// A client-side (upstream-facing) TLS transport over rustls, used when an
/// origin requires TLS.
pub struct ClientTlsTransport<S> {
    stream: S,
    tls: ClientConnection,
}

impl<S: Read + Write> ClientTlsTransport<S> {
    /// Begins a TLS client handshake over `stream` for `server_name`.
    pub fn new(
        stream: S,
        config: Arc<ClientConfig>,
        server_name: rustls::pki_types::ServerName<'static>,
    ) -> Result<Self, rustls::Error> {
        Ok(ClientTlsTransport {
            stream,
            tls: ClientConnection::new(config, server_name)?,
        })
    }
}

impl<S: Read + Write> TransportSocket for ClientTlsTransport<S> {
    fn do_read(&mut self, buf: &mut Buffer) -> io::Result<IoResult> {
        let read = loop {
            match self.tls.read_tls(&mut self.stream) {
                Ok(0) => break 0,
                Ok(_) => {
                    if self.tls.process_new_packets().is_err() {
                        return Ok(IoResult { bytes: 0, action: Action::Close });
                    }
                    break client_plaintext_into(&mut self.tls, buf)?;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break 0,
                Err(e) => return Err(e),
            }
        };
        Ok(IoResult { bytes: read, action: Action::KeepOpen })
    }

    fn do_write(&mut self, buf: &mut Buffer) -> io::Result<IoResult> {
        if buf.remaining() > 0 {
            self.tls.writer().write_all(&buf[..])?;
            buf.mark_read(buf.remaining());
        }
        let n = self.tls.write_tls(&mut self.stream)?;
        Ok(IoResult { bytes: n, action: Action::KeepOpen })
    }

    fn interest(&self) -> mio::Interest {
        if self.tls.wants_write() {
            mio::Interest::READABLE | mio::Interest::WRITABLE
        } else {
            mio::Interest::READABLE
        }
    }
}

fn client_plaintext_into(tls: &mut ClientConnection, buf: &mut Buffer) -> io::Result<usize> {
    let mut total = 0;
    loop {
        if buf.remaining_mut() < 4096 {
            buf.reserve(4096);
        }
        match tls.reader().read(&mut buf[..]) {
            Ok(0) => break,
            Ok(n) => {
                buf.mark_written(n);
                total += n;
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => break,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}
