//! Upstream request lifecycle: the state a single request occupies while
//! it travels from the downstream connection to an origin and back.
//!
//! Distinct from [`crate::host::PooledConnection`], which only tracks a TCP
//! slot's connect/idle/active lifecycle — an `UpstreamRequest` tracks one
//! logical request riding on top of whichever slot it was leased.

use std::time::Instant;

use crate::request::RequestContext;

/// Where a request currently sits in its upstream lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamState {
    /// Routed, but no connection has been leased or requested yet.
    Initialized,
    /// Waiting on a new TCP connection to the origin to complete.
    AwaitingConnect,
    /// An idle connection was leased; the request head is being serialized
    /// and queued for write.
    PendingHeaders,
    /// The request head has been fully written to the origin.
    HeadersSent,
    /// The request (and/or response) body is being streamed.
    BodyStreaming,
    /// The response has been fully relayed to the downstream peer.
    Complete,
    /// The request failed before completion (connect failure, timeout, or
    /// a reset from either peer).
    Failed,
}

/// One request's progress through [`UpstreamState`], plus the bookkeeping
/// needed to drive it: which pool slot it holds, and when the current
/// state was entered (for timeout enforcement against the rule's
/// `read_timeout`/`write_timeout`).
pub struct UpstreamRequest {
    state: UpstreamState,
    /// Name of the upstream group this request was routed to.
    pub upstream_group: String,
    /// Index of the selected origin within that group.
    pub origin_idx: usize,
    /// Pool slot key leased from the origin, once a connection is assigned.
    pub connection_key: Option<usize>,
    state_entered_at: Instant,
}

impl UpstreamRequest {
    /// Creates a new request in the `Initialized` state for the given
    /// routing decision.
    pub fn new(upstream_group: String, origin_idx: usize) -> Self {
        UpstreamRequest {
            state: UpstreamState::Initialized,
            upstream_group,
            origin_idx,
            connection_key: None,
            state_entered_at: Instant::now(),
        }
    }

    /// The current state.
    pub fn state(&self) -> UpstreamState {
        self.state
    }

    /// How long the request has held its current state, for timeout checks.
    pub fn time_in_state(&self) -> std::time::Duration {
        self.state_entered_at.elapsed()
    }

    fn transition(&mut self, to: UpstreamState) {
        self.state = to;
        self.state_entered_at = Instant::now();
    }

    /// No idle connection was available; the request must wait for a new
    /// one to connect.
    pub fn await_connect(&mut self) {
        self.transition(UpstreamState::AwaitingConnect);
    }

    /// A connection (new or reused) was leased; the request head can be
    /// serialized and queued for write.
    pub fn connection_leased(&mut self, key: usize) {
        self.connection_key = Some(key);
        self.transition(UpstreamState::PendingHeaders);
    }

    /// The request head has been fully written to the origin.
    pub fn headers_sent(&mut self) {
        self.transition(UpstreamState::HeadersSent);
    }

    /// Either direction's body has started streaming.
    pub fn body_streaming(&mut self) {
        self.transition(UpstreamState::BodyStreaming);
    }

    /// The response was fully relayed downstream.
    pub fn complete(&mut self) {
        self.transition(UpstreamState::Complete);
    }

    /// The request failed and will not be retried on this connection.
    pub fn fail(&mut self) {
        self.transition(UpstreamState::Failed);
    }

    /// Whether this request has left the pipeline, one way or another.
    pub fn is_finished(&self) -> bool {
        matches!(self.state, UpstreamState::Complete | UpstreamState::Failed)
    }
}

/// Bridges origin codec events (bytes parsed off the upstream connection)
/// into the downstream-facing encoder filter chain, keeping the
/// [`RequestContext`]'s timing marks and the [`UpstreamRequest`]'s state in
/// lockstep. Mirrors the codec bridge's role of translating
/// connection-level IO completions into filter-chain-level events.
pub struct CodecBridge;

impl CodecBridge {
    /// Called once the origin connection is established and the request
    /// head is ready to be sent.
    pub fn on_connected(req: &mut UpstreamRequest, ctx: &mut RequestContext, key: usize) {
        req.connection_leased(key);
        ctx.stream_info.mark_upstream_connect_end();
    }

    /// Called once the request head has been fully written to the origin.
    pub fn on_headers_written(req: &mut UpstreamRequest) {
        req.headers_sent();
    }

    /// Called on the first byte of the upstream response.
    pub fn on_first_response_byte(req: &mut UpstreamRequest, ctx: &mut RequestContext) {
        req.body_streaming();
        ctx.stream_info.mark_first_upstream_byte();
    }

    /// Called once the response has been fully relayed to the downstream peer.
    pub fn on_response_complete(req: &mut UpstreamRequest, ctx: &mut RequestContext) {
        req.complete();
        ctx.stream_info.mark_response_complete();
    }
}
