//! Crate-wide error types.
//!
//! Each fallible subsystem gets its own `thiserror`-derived enum rather than
//! one monolithic error, so a caller matching on `PoolError` never has to
//! think about config-load failures and vice versa. `anyhow` is reserved for
//! the `server` binary's top-level `main`, which only needs to print a
//! diagnostic and pick an exit code — it does not need to match on variants.

use std::io;

use thiserror::Error;

use crate::parser::ParseError;

/// Errors raised while loading or validating a [`crate::config::Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A `discovery_type` other than `static` was requested.
    #[error("discovery type {0:?} is not implemented by this core")]
    UnsupportedDiscoveryType(crate::config::DiscoveryType),
    /// A rule referenced an upstream group that doesn't exist.
    #[error("rule {rule} references unknown upstream group {group}")]
    UnknownUpstreamGroup {
        /// Offending rule's match pattern.
        rule: String,
        /// Missing group name.
        group: String,
    },
    /// A `Regex`-kind rule's pattern failed to compile.
    #[error("invalid regex in rule {rule}: {source}")]
    InvalidRegex {
        /// Offending rule's match pattern.
        rule: String,
        /// Underlying compile error.
        #[source]
        source: regex::Error,
    },
    /// No vhosts were configured.
    #[error("configuration defines no virtual hosts")]
    NoVHosts,
}

/// Errors raised while routing a request to a vhost/rule/upstream.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum RouterError {
    /// No vhost matched the request's `Host` header.
    #[error("no virtual host matched the request")]
    NoVHostMatch,
    /// A vhost matched, but no rule within it matched the request path.
    #[error("no rule matched the request path")]
    NoRuleMatch,
}

/// Errors raised while acquiring an upstream connection from a pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Every origin in the selected group is in the `Down` state.
    #[error("no healthy upstream available in group {0}")]
    NoHealthyUpstream(String),
    /// The pending queue for this worker is full.
    #[error("pending queue is at capacity ({0})")]
    QueueFull(usize),
    /// A pending request exceeded `pending_timeout` before a connection freed up.
    #[error("timed out waiting for an upstream connection")]
    PendingTimeout,
    /// Connecting to the origin failed at the TCP layer.
    #[error("failed to connect to origin: {0}")]
    Connect(#[source] io::Error),
}

/// Errors surfaced by the event-loop dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The underlying `mio::Poll` failed.
    #[error("poll failed: {0}")]
    Poll(#[source] io::Error),
    /// Registering or deregistering an IO source failed.
    #[error("failed to register IO source: {0}")]
    Register(#[source] io::Error),
}

/// Errors surfaced while assembling a [`crate::server::Server`] from a
/// [`crate::config::Config`]: binding a listener, compiling a vhost table,
/// or starting a worker's dispatcher.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A listener's bind address could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The address that failed to bind.
        addr: std::net::SocketAddr,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A vhost's rules failed to compile.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A worker's dispatcher failed to start.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    /// Loading a TLS certificate/key pair failed.
    #[error("failed to load TLS materials for {listen}: {source}")]
    Tls {
        /// The listener the materials were for.
        listen: std::net::SocketAddr,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

/// Errors surfaced while driving a single connection (read/write/parse).
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The transport (plain socket or TLS session) failed.
    #[error("transport error: {0}")]
    Transport(#[source] io::Error),
    /// The HTTP/1.x parser rejected the bytes on the wire.
    #[error("malformed request: {0}")]
    Parse(#[from] ParseError),
    /// No healthy upstream was available to service the request.
    #[error(transparent)]
    Pool(#[from] PoolError),
    /// Routing failed to find a vhost/rule match.
    #[error(transparent)]
    Router(#[from] RouterError),
}
