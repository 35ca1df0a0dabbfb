//! Origin hosts and their pooled connections.
//!
//! An [`Origin`] is one upstream `host:port`; it owns a pool of
//! [`PooledConnection`]s cycling through `Disconnected -> Connecting ->
//! Idle -> Active -> Down -> (retry) -> Connecting`. Idle/active membership
//! is tracked with plain index lists rather than the intrusive doubly-linked
//! lists the original C implementation uses — Rust's ownership rules make an
//! intrusive list painful, and a `Vec<usize>` of slab indices gives the same
//! O(1) "move between idle and active" operation this core needs.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use slab::Slab;

/// Lifecycle state of one pooled connection to an origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No TCP connection exists yet.
    Disconnected,
    /// A TCP connect is in flight.
    Connecting,
    /// Connected and not currently serving a request.
    Idle,
    /// Connected and currently serving a request.
    Active,
    /// Marked unhealthy; excluded from selection until a retry succeeds.
    Down,
}

/// One pooled connection slot. The actual IO handle lives in the connection
/// table owned by the worker; this tracks only the state-machine metadata
/// the load balancer and pool need to make decisions without touching IO.
#[derive(Debug, Clone, Copy)]
pub struct PooledConnection {
    state: ConnectionState,
    /// Exponentially-weighted moving average round-trip time, in
    /// microseconds. Updated on every completed request per §4.6 (α=0.125).
    rtt_ewma_micros: f64,
    last_state_change: Instant,
}

const RTT_EWMA_ALPHA: f64 = 0.125;

impl PooledConnection {
    fn new() -> Self {
        PooledConnection {
            state: ConnectionState::Disconnected,
            rtt_ewma_micros: 0.0,
            last_state_change: Instant::now(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Current RTT EWMA, in microseconds.
    pub fn rtt_ewma_micros(&self) -> f64 {
        self.rtt_ewma_micros
    }

    fn transition(&mut self, to: ConnectionState) {
        self.state = to;
        self.last_state_change = Instant::now();
    }

    /// Records a completed request's round-trip time, updating the EWMA.
    pub fn record_rtt(&mut self, sample: Duration) {
        let sample_micros = sample.as_micros() as f64;
        self.rtt_ewma_micros = if self.rtt_ewma_micros == 0.0 {
            sample_micros
        } else {
            RTT_EWMA_ALPHA * sample_micros + (1.0 - RTT_EWMA_ALPHA) * self.rtt_ewma_micros
        };
    }

    /// How long this connection has held its current state.
    pub fn time_in_state(&self) -> Duration {
        self.last_state_change.elapsed()
    }
}

/// One upstream host and its connection pool.
#[derive(Debug)]
pub struct Origin {
    /// The host's address.
    pub addr: SocketAddr,
    connections: Slab<PooledConnection>,
    idle: Vec<usize>,
    active: Vec<usize>,
    down: Vec<usize>,
}

impl Origin {
    /// Creates a new origin with an empty pool.
    pub fn new(addr: SocketAddr) -> Self {
        Origin {
            addr,
            connections: Slab::new(),
            idle: Vec::new(),
            active: Vec::new(),
            down: Vec::new(),
        }
    }

    /// Number of connections currently in the `Active` state.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Number of connections currently in the `Idle` state.
    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    /// Whether this origin has at least one connection available for
    /// immediate reuse (`Idle`) or room to open a new one.
    pub fn is_healthy(&self) -> bool {
        self.connections
            .iter()
            .any(|(_, c)| c.state() != ConnectionState::Down)
            || self.connections.is_empty()
    }

    /// Reserves a new, `Disconnected` pool slot and returns its key.
    pub fn allocate(&mut self) -> usize {
        self.connections.insert(PooledConnection::new())
    }

    /// Moves a slot from `Disconnected` to `Connecting`.
    pub fn begin_connect(&mut self, key: usize) {
        if let Some(c) = self.connections.get_mut(key) {
            c.transition(ConnectionState::Connecting);
        }
    }

    /// Moves a slot from `Connecting` to `Idle`, making it selectable.
    pub fn connected(&mut self, key: usize) {
        if let Some(c) = self.connections.get_mut(key) {
            c.transition(ConnectionState::Idle);
            self.idle.push(key);
        }
    }

    /// Moves a slot from `Idle` to `Active` (leased to a request).
    pub fn lease(&mut self, key: usize) {
        self.idle.retain(|&k| k != key);
        if let Some(c) = self.connections.get_mut(key) {
            c.transition(ConnectionState::Active);
            self.active.push(key);
        }
    }

    /// Moves a slot from `Active` back to `Idle` (request completed cleanly).
    pub fn release(&mut self, key: usize) {
        self.active.retain(|&k| k != key);
        if let Some(c) = self.connections.get_mut(key) {
            c.transition(ConnectionState::Idle);
            self.idle.push(key);
        }
    }

    /// Marks a slot `Down`, removing it from both idle and active lists and
    /// arming a retry: [`Origin::sweep_down`] frees it once it's been down
    /// for at least the configured retry interval.
    pub fn mark_down(&mut self, key: usize) {
        self.idle.retain(|&k| k != key);
        self.active.retain(|&k| k != key);
        if let Some(c) = self.connections.get_mut(key) {
            c.transition(ConnectionState::Down);
            self.down.push(key);
            tracing::warn!(addr = %self.addr, key, "origin connection marked down");
        }
    }

    /// Frees every `Down` slot that's been down for at least
    /// `retry_interval`, removing it from the pool entirely so the next
    /// selection for this origin opens a fresh connection.
    pub fn sweep_down(&mut self, retry_interval: Duration) {
        let ready: Vec<usize> = self
            .down
            .iter()
            .copied()
            .filter(|&k| {
                self.connections
                    .get(k)
                    .map(|c| c.time_in_state() >= retry_interval)
                    .unwrap_or(true)
            })
            .collect();
        for key in ready {
            self.down.retain(|&k| k != key);
            self.connections.try_remove(key);
        }
    }

    /// Number of connections currently `Down`, awaiting retry.
    pub fn down_count(&self) -> usize {
        self.down.len()
    }

    /// Removes a slot from the pool entirely (connection closed for good).
    pub fn remove(&mut self, key: usize) {
        self.idle.retain(|&k| k != key);
        self.active.retain(|&k| k != key);
        self.down.retain(|&k| k != key);
        self.connections.try_remove(key);
    }

    /// Iterates over every idle connection's key and state, for load-balancer selection.
    pub fn idle_connections(&self) -> impl Iterator<Item = (usize, &PooledConnection)> {
        self.idle.iter().filter_map(|&k| self.connections.get(k).map(|c| (k, c)))
    }

    /// Looks up a connection by key.
    pub fn get(&self, key: usize) -> Option<&PooledConnection> {
        self.connections.get(key)
    }

    /// Records a completed request's round-trip time against the pooled
    /// connection it rode on, feeding `lb_method = rtt` selection.
    pub fn record_rtt(&mut self, key: usize, sample: Duration) {
        if let Some(c) = self.connections.get_mut(key) {
            c.record_rtt(sample);
        }
    }
}
