//! Per-request timing and outcome bookkeeping.

use std::time::{Duration, Instant};

/// Bitset of conditions that made a request's outcome notable, for logging
/// and metrics without the core depending on a particular sink. Values are
/// bit positions rather than an enum so multiple flags can apply to one
/// request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResponseFlags(u16);

impl ResponseFlags {
    /// The pending queue rejected the request — all upstream slots busy and
    /// `max_pending` already reached.
    pub const FAILED_LOCAL_HEALTH_CHECK: Self = Self(1 << 0);
    /// No healthy upstream existed in the selected group.
    pub const NO_HEALTHY_UPSTREAM: Self = Self(1 << 1);
    /// The upstream request exceeded its read or write timeout.
    pub const UPSTREAM_TIMEOUT: Self = Self(1 << 2);
    /// The upstream connection reset before completing the response.
    pub const UPSTREAM_CONNECTION_TERMINATION: Self = Self(1 << 3);
    /// The request waited in the pending queue longer than `pending_timeout`.
    pub const UPSTREAM_OVERFLOW: Self = Self(1 << 4);
    /// No vhost or rule matched the request.
    pub const NO_ROUTE_FOUND: Self = Self(1 << 5);
    /// The downstream (client) connection hit its high watermark.
    pub const DOWNSTREAM_CONNECTION_TERMINATION: Self = Self(1 << 6);
    /// TCP/TLS connect to the origin failed outright.
    pub const UPSTREAM_CONNECTION_FAILURE: Self = Self(1 << 7);
    /// The request was reset while its leased connection was already Down;
    /// retry is per-connection, not per-request (see §9 open question).
    pub const UPSTREAM_RETRY_LIMIT_EXCEEDED: Self = Self(1 << 8);
    /// A per-request read idle elapsed without progress.
    pub const STREAM_IDLE_TIMEOUT: Self = Self(1 << 9);
    /// The client's request could not be parsed.
    pub const DOWNSTREAM_PROTOCOL_ERROR: Self = Self(1 << 10);
    /// The origin's response could not be parsed.
    pub const UPSTREAM_PROTOCOL_ERROR: Self = Self(1 << 11);
    /// The server-level `pending_timeout` fired.
    pub const DURATION_TIMEOUT: Self = Self(1 << 12);
    /// The proxy itself reset the stream (not a codec-reported error).
    pub const LOCAL_RESET: Self = Self(1 << 13);
    /// The origin reset the stream.
    pub const UPSTREAM_REMOTE_RESET: Self = Self(1 << 14);

    /// An empty flag set.
    pub fn none() -> Self {
        Self(0)
    }

    /// Sets `flag`, returning whether it was newly set (wasn't already present).
    pub fn set(&mut self, flag: Self) -> bool {
        let was_set = self.0 & flag.0 != 0;
        self.0 |= flag.0;
        !was_set
    }

    /// Whether `flag` is set.
    pub fn has(&self, flag: Self) -> bool {
        self.0 & flag.0 != 0
    }
}

/// Monotonic timing points recorded over a request's lifetime, per §4.7.
/// Every point uses [`Instant`] rather than wall-clock time, so a system
/// clock adjustment mid-request can never produce a negative duration.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    start_time: Instant,
    request_received: Option<Instant>,
    upstream_connect_start: Option<Instant>,
    upstream_connect_end: Option<Instant>,
    request_dispatched: Option<Instant>,
    first_upstream_byte: Option<Instant>,
    response_complete: Option<Instant>,
    /// Bitset of notable outcomes accumulated over the request.
    pub response_flags: ResponseFlags,
}

impl StreamInfo {
    /// Starts a new timing record, anchored at the current instant.
    pub fn new() -> Self {
        StreamInfo {
            start_time: Instant::now(),
            request_received: None,
            upstream_connect_start: None,
            upstream_connect_end: None,
            request_dispatched: None,
            first_upstream_byte: None,
            response_complete: None,
            response_flags: ResponseFlags::none(),
        }
    }

    /// Records that the full request head was received.
    pub fn mark_request_received(&mut self) {
        self.request_received = Some(Instant::now());
    }

    /// Records the start of an upstream connection attempt.
    pub fn mark_upstream_connect_start(&mut self) {
        self.upstream_connect_start = Some(Instant::now());
    }

    /// Records the completion of an upstream connection attempt.
    pub fn mark_upstream_connect_end(&mut self) {
        self.upstream_connect_end = Some(Instant::now());
    }

    /// Records the request head handed off to the origin (new connection or
    /// reused), the starting point for this request's RTT sample.
    pub fn mark_request_dispatched(&mut self) {
        self.request_dispatched = Some(Instant::now());
    }

    /// Records the first byte of the upstream response.
    pub fn mark_first_upstream_byte(&mut self) {
        self.first_upstream_byte = Some(Instant::now());
    }

    /// Records the response fully written to the downstream peer.
    pub fn mark_response_complete(&mut self) {
        self.response_complete = Some(Instant::now());
    }

    /// Time spent establishing the upstream TCP connection, if both
    /// endpoints of that interval were recorded.
    pub fn upstream_connect_duration(&self) -> Option<Duration> {
        Some(self.upstream_connect_end?.saturating_duration_since(self.upstream_connect_start?))
    }

    /// Round-trip time from request dispatch to the first response byte,
    /// the sample fed into an origin's RTT EWMA, if both points were recorded.
    pub fn response_duration(&self) -> Option<Duration> {
        Some(self.first_upstream_byte?.saturating_duration_since(self.request_dispatched?))
    }

    /// Total request duration so far (or at completion, if recorded).
    pub fn total_duration(&self) -> Duration {
        self.response_complete
            .unwrap_or_else(Instant::now)
            .saturating_duration_since(self.start_time)
    }
}

impl Default for StreamInfo {
    fn default() -> Self {
        Self::new()
    }
}
