//! Per-worker event loop: owns one [`Dispatcher`], a table of client
//! connections, a table of upstream sockets, the [`Router`], and the
//! [`PendingQueue`] requests wait in when no connection can be leased or
//! opened immediately.
//!
//! Replaces the teacher's mutex-guarded `Worker<S>` (a `Receiver<Event<S>>`
//! draining new connections under a shared lock per event) with a design
//! that holds no lock on its hot path: new connections arrive over a
//! dedicated `crossbeam_channel`, and the worker thread is the sole owner of
//! every table it touches while driving IO.
//!
//! Upstream responses are relayed to the client byte-for-byte rather than
//! parsed into a typed [`crate::parser::h1::response::Response`]: this core
//! only needs to know where the response head ends (to read
//! `Content-Length`), not to rewrite it, so a second full response parser
//! would add real complexity for no behavior this spec asks for.

use std::collections::HashMap;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use mio::{Registry, Token};
use slab::Slab;

use crate::config::ServerConfig;
use crate::connection::{bad_request_response, Connection};
use crate::dispatcher::{Dispatcher, PostHandle};
use crate::error::{DispatchError, PoolError};
use crate::filter_chain::FilterChain;
use crate::header_filter::{HeaderRewriteFilter, UpstreamCodecFilter};
use crate::io_handle::IoHandle;
use crate::parser::h1::request::head_len;
use crate::parser::h1::response::Response;
use crate::parser::status::Status as StatusCode;
use crate::parser::{Method, Status, Version};
use crate::pending_queue::PendingQueue;
use crate::request::RequestContext;
use crate::router::{RouteError, Router};
use crate::stream_info::ResponseFlags;
use crate::transport_socket::{PlainTransport, RegisterableTransport};
use crate::upstream_request::{CodecBridge, UpstreamRequest};
use crate::watermark::WatermarkBuffer;

/// Upstream sockets are keyed in the same `Token` space as client
/// connections (one `mio::Poll` per worker covers both), distinguished by a
/// high bit client connection counts will never reach.
const UPSTREAM_TOKEN_BIT: usize = 1 << 48;

fn is_upstream_token(token: Token) -> bool {
    token.0 >= UPSTREAM_TOKEN_BIT
}
fn upstream_key(token: Token) -> usize {
    token.0 - UPSTREAM_TOKEN_BIT
}
fn upstream_token(key: usize) -> Token {
    Token(UPSTREAM_TOKEN_BIT + key)
}
fn client_token(key: usize) -> Token {
    Token(key)
}

/// Effective per-worker timeouts and sizing, collapsed from a
/// [`ServerConfig`] once at startup.
#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    /// Maximum pending (queued, connection-less) requests before new work
    /// is rejected outright.
    pub max_pending: usize,
    /// How long a request may wait in the pending queue.
    pub pending_timeout: Duration,
    /// Default upstream read timeout, overridable per-rule.
    pub read_timeout: Duration,
    /// Default upstream write timeout, overridable per-rule.
    pub write_timeout: Duration,
    /// High watermark, in bytes, before backpressure applies to a peer.
    pub high_watermark: usize,
    /// Initial capacity of each connection's read/write buffers.
    pub buffer_capacity: usize,
    /// How long an origin connection stays `Down` before a retry is allowed.
    pub retry_interval: Duration,
}

impl From<&ServerConfig> for WorkerConfig {
    fn from(cfg: &ServerConfig) -> Self {
        WorkerConfig {
            max_pending: cfg.max_pending,
            pending_timeout: cfg.pending_timeout,
            read_timeout: cfg.read_timeout,
            write_timeout: cfg.write_timeout,
            high_watermark: cfg.high_watermark,
            buffer_capacity: 8192,
            retry_interval: cfg.retry_interval,
        }
    }
}

/// A just-accepted client connection, handed off from the accept thread.
pub struct NewConnection {
    /// The accepted stream, not yet registered with any `mio::Poll`.
    pub stream: mio::net::TcpStream,
    /// The peer's address.
    pub addr: SocketAddr,
}

/// Live open-connection counter a [`WorkerHandle`] reads for admission
/// control and a [`Worker`] updates as connections open and close.
#[derive(Clone, Default)]
pub struct WorkerLoad(Arc<AtomicUsize>);

impl WorkerLoad {
    /// Creates a fresh, zeroed counter.
    pub fn new() -> Self {
        Self::default()
    }
    fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
    fn decrement(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
    /// The current number of connections this worker holds open.
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
    /// Overwrites the counter with `v`. Used to republish the pending
    /// queue's length for the accept thread's admission check; an
    /// increment/decrement pair at every push/pop would need to span two
    /// modules, so the worker loop just republishes the true length once
    /// per iteration instead.
    fn set(&self, v: usize) {
        self.0.store(v, Ordering::Relaxed);
    }
}

/// The accept thread's handle to one worker: a channel to hand off new
/// connections, plus live load counters exposed for observability.
#[derive(Clone)]
pub struct WorkerHandle {
    tx: Sender<NewConnection>,
    wake: PostHandle,
    load: WorkerLoad,
    pending_load: WorkerLoad,
    stop_flag: Arc<AtomicBool>,
}

impl WorkerHandle {
    /// This worker's current open-connection count.
    pub fn load(&self) -> usize {
        self.load.get()
    }

    /// This worker's pending-queue length, as of its last loop iteration.
    /// Used by the accept thread's pre-accept admission hook (§4.3):
    /// `pending_count + 1 > max_pending` rejects the connection outright.
    pub fn pending_count(&self) -> usize {
        self.pending_load.get()
    }

    /// Hands `conn` off to the worker thread and wakes its poll loop.
    /// Returns `false` if the worker thread has gone away.
    pub fn dispatch(&self, conn: NewConnection) -> bool {
        if self.tx.send(conn).is_err() {
            return false;
        }
        self.wake.post(|| {}).is_ok()
    }

    /// Requests an orderly shutdown of this worker (drain in-flight
    /// connections, then exit its `run` loop) and wakes it so the request
    /// is noticed promptly rather than at the next 250ms timer tick.
    pub fn request_stop(&self) -> bool {
        self.stop_flag.store(true, Ordering::Relaxed);
        self.wake.post(|| {}).is_ok()
    }
}

struct ClientSlot<T> {
    conn: Connection<mio::net::TcpStream, T>,
    filter_chain: FilterChain,
    ctx: Option<RequestContext>,
    upstream: Option<UpstreamRequest>,
    upstream_key: Option<usize>,
    keep_alive: bool,
    /// Set once a CONNECT tunnel or passthrough upgrade has been
    /// established; further inbound bytes are relayed raw rather than
    /// parsed as HTTP (§4.5).
    tunneling: bool,
}

struct UpstreamSlot {
    io: IoHandle<mio::net::TcpStream, PlainTransport<mio::net::TcpStream>>,
    group: String,
    origin_idx: usize,
    pool_key: usize,
    client_key: Option<usize>,
    connecting: bool,
    connect_started: Instant,
    response_head_seen: bool,
    head_len: u64,
    content_length: Option<u64>,
    relayed: u64,
    /// Whether the matched rule allows a successful upgrade/CONNECT response
    /// to detach this pair into opaque byte-pump mode.
    allow_passthrough: bool,
    /// Mirrors `ClientSlot::tunneling` on the upstream side.
    tunneling: bool,
    /// Backpressure accounting for bytes queued to this origin while
    /// tunneling (the request head itself is never large enough to matter).
    write_watermark: WatermarkBuffer,
}

/// A per-worker dispatcher loop driving client connections, the upstream
/// connection pool, and the pending queue to completion. Generic over the
/// downstream transport `T` (plaintext or TLS-terminated); upstream sockets
/// are always plaintext, matching the absence of an upstream TLS option in
/// [`crate::config::RuleConfig`].
pub struct Worker<T> {
    dispatcher: Dispatcher,
    registry: Registry,
    clients: Slab<ClientSlot<T>>,
    upstreams: Slab<UpstreamSlot>,
    pool_index: HashMap<(String, usize, usize), usize>,
    router: Router,
    pending: PendingQueue,
    new_conn_rx: Receiver<NewConnection>,
    load: WorkerLoad,
    pending_load: WorkerLoad,
    stop_flag: Arc<AtomicBool>,
    make_transport: Box<dyn Fn(mio::net::TcpStream) -> std::io::Result<T> + Send>,
    config: WorkerConfig,
    stopping: bool,
}

impl<T> Worker<T>
where
    T: RegisterableTransport,
{
    /// Builds a new worker and the handle the accept thread uses to feed it
    /// connections. `make_transport` wraps a freshly accepted stream as this
    /// worker's transport type (plaintext or TLS).
    pub fn new(
        router: Router,
        config: WorkerConfig,
        make_transport: impl Fn(mio::net::TcpStream) -> std::io::Result<T> + Send + 'static,
    ) -> Result<(Self, WorkerHandle), DispatchError> {
        let dispatcher = Dispatcher::new()?;
        let registry = dispatcher
            .registry()
            .try_clone()
            .map_err(DispatchError::Register)?;
        let (tx, rx) = crossbeam_channel::unbounded();
        let load = WorkerLoad::new();
        let pending_load = WorkerLoad::new();
        let stop_flag = Arc::new(AtomicBool::new(false));

        let handle = WorkerHandle {
            tx,
            wake: dispatcher.post_handle(),
            load: load.clone(),
            pending_load: pending_load.clone(),
            stop_flag: stop_flag.clone(),
        };

        let worker = Worker {
            dispatcher,
            registry,
            clients: Slab::new(),
            upstreams: Slab::new(),
            pool_index: HashMap::new(),
            router,
            pending: PendingQueue::new(config.max_pending),
            new_conn_rx: rx,
            load,
            pending_load,
            stop_flag,
            make_transport: Box::new(make_transport),
            config,
            stopping: false,
        };

        Ok((worker, handle))
    }

    /// Requests an orderly shutdown: stop accepting new work and exit
    /// [`Worker::run`] once every in-flight connection has drained.
    pub fn stop(&mut self) {
        self.stopping = true;
    }

    /// Drives the event loop until [`Worker::stop`] is called and every
    /// connection has closed.
    pub fn run(&mut self) -> Result<(), DispatchError> {
        loop {
            self.dispatcher.schedule_timer(Duration::from_millis(250), || {});
            self.poll_once()?;
            self.drain_new_connections();
            self.sweep();
            self.pending_load.set(self.pending.len());
            if self.stop_flag.load(Ordering::Relaxed) {
                self.stop();
            }
            if self.stopping && self.clients.is_empty() && self.upstreams.is_empty() {
                return Ok(());
            }
        }
    }

    fn poll_once(&mut self) -> Result<(), DispatchError> {
        let Worker {
            dispatcher,
            registry,
            clients,
            upstreams,
            pool_index,
            router,
            pending,
            config,
            ..
        } = self;
        dispatcher.run_once(|event| {
            let token = event.token();
            if is_upstream_token(token) {
                handle_upstream_event(
                    registry,
                    upstreams,
                    clients,
                    router,
                    upstream_key(token),
                    event.is_readable(),
                    event.is_writable(),
                );
            } else {
                handle_client_event(
                    registry,
                    clients,
                    upstreams,
                    pool_index,
                    router,
                    pending,
                    config,
                    token.0,
                    event.is_readable(),
                    event.is_writable(),
                );
            }
        })
    }

    fn drain_new_connections(&mut self) {
        while let Ok(new_conn) = self.new_conn_rx.try_recv() {
            if self.stopping {
                continue;
            }
            if let Ok(transport) = (self.make_transport)(new_conn.stream) {
                self.accept(transport, new_conn.addr);
            }
        }
    }

    fn accept(&mut self, transport: T, addr: SocketAddr) {
        let entry = self.clients.vacant_entry();
        let key = entry.key();
        let mut conn = Connection::new(
            client_token(key),
            transport,
            self.config.buffer_capacity,
            self.config.high_watermark,
        );
        conn.set_peer_addr(addr);
        if conn.register(&self.registry).is_err() {
            return;
        }
        entry.insert(ClientSlot {
            conn,
            filter_chain: FilterChain::new(Vec::new(), Vec::new()),
            ctx: None,
            upstream: None,
            upstream_key: None,
            keep_alive: true,
            tunneling: false,
        });
        self.load.increment();
    }

    /// Periodic sweep: expires pending-queue entries past their timeout,
    /// retries a bounded number of still-pending requests, and fails
    /// upstream requests that have overrun their rule's timeout.
    fn sweep(&mut self) {
        let now = Instant::now();
        for entry in self.pending.drain_expired(now) {
            if let Some(slot) = self.clients.get_mut(entry.token) {
                respond_and_close(&self.registry, slot, StatusCode::ServiceUnavailable, ResponseFlags::DURATION_TIMEOUT);
            }
        }

        let mut retry_budget = 16;
        while retry_budget > 0 {
            let Some(entry) = self.pending.pop() else { break };
            if self.clients.contains(entry.token) {
                self.route_and_dispatch(entry.token);
            }
            retry_budget -= 1;
        }

        let timed_out: Vec<usize> = self
            .upstreams
            .iter()
            .filter(|(_, u)| u.connecting && u.connect_started.elapsed() > self.config.read_timeout)
            .map(|(k, _)| k)
            .collect();
        for key in timed_out {
            tracing::warn!(key, "upstream connect attempt timed out");
            self.fail_upstream(key, ResponseFlags::UPSTREAM_TIMEOUT);
        }

        for group in self.router.all_groups_mut() {
            for origin in group.origins_mut() {
                origin.sweep_down(self.config.retry_interval);
            }
        }
    }

    fn route_and_dispatch(&mut self, client_key: usize) {
        let Worker {
            registry,
            clients,
            upstreams,
            pool_index,
            router,
            pending,
            config,
            ..
        } = self;
        route_and_dispatch(registry, clients, upstreams, pool_index, router, pending, config, client_key);
    }

    fn fail_upstream(&mut self, key: usize, flag: ResponseFlags) {
        let Some(slot) = self.upstreams.get(key) else { return };
        let client_key = slot.client_key;
        let group = slot.group.clone();
        let origin_idx = slot.origin_idx;
        let pool_key = slot.pool_key;
        tracing::debug!(key, group = %group, origin_idx, flag = ?flag, "failing upstream connection");

        if let Some(slot) = self.upstreams.get_mut(key) {
            let _ = slot.io.deregister(&self.registry);
        }
        self.upstreams.remove(key);
        self.pool_index.remove(&(group.clone(), origin_idx, pool_key));
        if let Some(g) = self.router.group_mut(&group) {
            if let Some(o) = g.origin_mut(origin_idx) {
                o.mark_down(pool_key);
            }
        }

        if let Some(client_key) = client_key {
            if let Some(slot) = self.clients.get_mut(client_key) {
                slot.upstream = None;
                slot.upstream_key = None;
                respond_and_close(&self.registry, slot, StatusCode::BadGateway, flag);
            }
        }
    }
}

fn respond_and_close<T: RegisterableTransport>(
    registry: &Registry,
    slot: &mut ClientSlot<T>,
    status: StatusCode,
    flag: ResponseFlags,
) {
    if let Some(ctx) = slot.ctx.as_mut() {
        ctx.stream_info.response_flags.set(flag);
    }
    let response = Response::new_with_status_line(Version::H1_1, status)
        .with_header("connection", "close")
        .with_header("content-length", "0")
        .with_body(Vec::new());
    slot.conn.prepare_response(response);
    slot.keep_alive = false;
    let _ = slot.conn.reregister(registry);
}

#[allow(clippy::too_many_arguments)]
fn handle_client_event<T: RegisterableTransport>(
    registry: &Registry,
    clients: &mut Slab<ClientSlot<T>>,
    upstreams: &mut Slab<UpstreamSlot>,
    pool_index: &mut HashMap<(String, usize, usize), usize>,
    router: &mut Router,
    pending: &mut PendingQueue,
    config: &WorkerConfig,
    key: usize,
    readable: bool,
    writable: bool,
) {
    if readable {
        on_client_readable(registry, clients, upstreams, pool_index, router, pending, config, key);
    }
    if writable && clients.contains(key) {
        let closed = {
            let slot = &mut clients[key];
            let _ = slot.conn.write();
            slot.conn.is_closed()
        };
        if closed {
            close_client(registry, clients, upstreams, router, key);
            return;
        }

        if let Some(upstream_key) = clients[key].upstream_key {
            let paused = clients[key].conn.is_above_high_watermark();
            if let Some(u) = upstreams.get_mut(upstream_key) {
                u.io.set_read_enabled(!paused);
                let _ = u.io.reregister(registry);
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn on_client_readable<T: RegisterableTransport>(
    registry: &Registry,
    clients: &mut Slab<ClientSlot<T>>,
    upstreams: &mut Slab<UpstreamSlot>,
    pool_index: &mut HashMap<(String, usize, usize), usize>,
    router: &mut Router,
    pending: &mut PendingQueue,
    config: &WorkerConfig,
    key: usize,
) {
    if clients.get(key).is_none() {
        return;
    }

    if clients[key].conn.read().is_err() || clients[key].conn.is_closed() {
        close_client(registry, clients, upstreams, router, key);
        return;
    }

    if clients[key].tunneling {
        if let Some(upstream_key) = clients[key].upstream_key {
            let bytes: Vec<u8> = clients[key].conn.read_buf()[..].to_vec();
            let len = bytes.len();
            if let Some(u) = upstreams.get_mut(upstream_key) {
                let _ = u.io.write_buf().write_all(&bytes);
                let crossed = u.write_watermark.add(len);
                let _ = u.io.reregister(registry);
                if crossed {
                    clients[key].conn.set_read_enabled(false);
                    let _ = clients[key].conn.reregister(registry);
                }
            }
            clients[key].conn.read_buf().mark_read(len);
        }
        return;
    }

    if clients[key].upstream.is_some() {
        // Already routed; further inbound bytes belong to a request body,
        // which this core does not stream (see Non-goals).
        return;
    }

    let status = clients[key].conn.parse();
    match status {
        Ok(Status::Complete(())) => {
            let ctx = match clients[key].conn.take_request_context() {
                Ok(ctx) => ctx,
                Err(_) => {
                    close_client(registry, clients, upstreams, router, key);
                    return;
                }
            };
            let keep_alive = ctx
                .header("connection")
                .map(|h| !h.value_str().eq_ignore_ascii_case("close"))
                .unwrap_or(true);
            let mut ctx = ctx;
            ctx.stream_info.mark_request_received();
            clients[key].keep_alive = keep_alive;
            clients[key].ctx = Some(ctx);
            route_and_dispatch(registry, clients, upstreams, pool_index, router, pending, config, key);
        }
        Ok(Status::Partial) => {}
        Err(err) => {
            if let Some(slot) = clients.get_mut(key) {
                slot.conn.prepare_response(bad_request_response(&err));
                slot.keep_alive = false;
                let _ = slot.conn.reregister(registry);
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn route_and_dispatch<T: RegisterableTransport>(
    registry: &Registry,
    clients: &mut Slab<ClientSlot<T>>,
    upstreams: &mut Slab<UpstreamSlot>,
    pool_index: &mut HashMap<(String, usize, usize), usize>,
    router: &mut Router,
    pending: &mut PendingQueue,
    config: &WorkerConfig,
    key: usize,
) {
    let mut ctx = match clients[key].ctx.take() {
        Some(ctx) => ctx,
        None => return,
    };

    let routed = router
        .route(&mut ctx)
        .map(|m| (m.rule.upstream_group.clone(), m.origin_idx, m.rule.allow_passthrough, m.header_policy));

    let (group_name, origin_idx, allow_passthrough) = match routed {
        Ok((group_name, origin_idx, allow_passthrough, header_policy)) => {
            let mut chain = FilterChain::new(
                vec![Box::new(HeaderRewriteFilter::new(header_policy)), Box::new(UpstreamCodecFilter)],
                Vec::new(),
            );
            chain.run_decoders(&mut ctx);
            clients[key].filter_chain = chain;
            clients[key].ctx = Some(ctx);
            (group_name, origin_idx, allow_passthrough)
        }
        Err(RouteError::Router(_)) => {
            clients[key].ctx = Some(ctx);
            tracing::debug!(client = key, "no vhost/rule matched request");
            finish_with_status(registry, clients, key, StatusCode::NotFound, ResponseFlags::NO_ROUTE_FOUND);
            return;
        }
        Err(RouteError::Pool(PoolError::NoHealthyUpstream(_))) => {
            clients[key].ctx = Some(ctx);
            tracing::warn!(client = key, "no healthy upstream for matched rule");
            finish_with_status(registry, clients, key, StatusCode::ServiceUnavailable, ResponseFlags::NO_HEALTHY_UPSTREAM);
            return;
        }
        Err(RouteError::Pool(_)) => {
            clients[key].ctx = Some(ctx);
            finish_with_status(registry, clients, key, StatusCode::BadGateway, ResponseFlags::NO_HEALTHY_UPSTREAM);
            return;
        }
    };

    let idle_pool_key = router
        .group(&group_name)
        .and_then(|g| g.origins().get(origin_idx))
        .and_then(|o| o.idle_connections().next().map(|(k, _)| k));

    let mut req = UpstreamRequest::new(group_name.clone(), origin_idx);

    if let Some(pool_key) = idle_pool_key {
        if let Some(upstream_key) = pool_index.get(&(group_name.clone(), origin_idx, pool_key)).copied() {
            if let Some(g) = router.group_mut(&group_name) {
                if let Some(o) = g.origin_mut(origin_idx) {
                    o.lease(pool_key);
                }
            }
            req.connection_leased(upstream_key);
            clients[key].upstream_key = Some(upstream_key);
            clients[key].upstream = Some(req);
            upstreams[upstream_key].client_key = Some(key);
            upstreams[upstream_key].response_head_seen = false;
            upstreams[upstream_key].content_length = None;
            upstreams[upstream_key].relayed = 0;
            upstreams[upstream_key].allow_passthrough = allow_passthrough;
            upstreams[upstream_key].tunneling = false;
            send_request_head(registry, clients, upstreams, key, upstream_key);
            return;
        }
    }

    let addr = match router.group(&group_name).and_then(|g| g.origins().get(origin_idx)) {
        Some(o) => o.addr,
        None => {
            finish_with_status(registry, clients, key, StatusCode::BadGateway, ResponseFlags::NO_HEALTHY_UPSTREAM);
            return;
        }
    };

    match open_upstream(
        registry,
        upstreams,
        pool_index,
        router,
        &group_name,
        origin_idx,
        addr,
        config.high_watermark,
        allow_passthrough,
    ) {
        Ok(upstream_key) => {
            if let Some(ctx) = clients[key].ctx.as_mut() {
                ctx.stream_info.mark_upstream_connect_start();
            }
            req.await_connect();
            upstreams[upstream_key].client_key = Some(key);
            clients[key].upstream_key = Some(upstream_key);
            clients[key].upstream = Some(req);
        }
        Err(_) => {
            if pending.push(key, config.pending_timeout).is_err() {
                tracing::warn!(client = key, group = %group_name, "pending queue full, rejecting request");
                finish_with_status(
                    registry,
                    clients,
                    key,
                    StatusCode::ServiceUnavailable,
                    ResponseFlags::FAILED_LOCAL_HEALTH_CHECK,
                );
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn open_upstream(
    registry: &Registry,
    upstreams: &mut Slab<UpstreamSlot>,
    pool_index: &mut HashMap<(String, usize, usize), usize>,
    router: &mut Router,
    group_name: &str,
    origin_idx: usize,
    addr: SocketAddr,
    high_watermark: usize,
    allow_passthrough: bool,
) -> std::io::Result<usize> {
    let stream = mio::net::TcpStream::connect(addr)?;
    let _ = stream.set_nodelay(true);

    let pool_key = {
        let group = router
            .group_mut(group_name)
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::NotFound))?;
        let origin = group
            .origin_mut(origin_idx)
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::NotFound))?;
        let key = origin.allocate();
        origin.begin_connect(key);
        key
    };

    let entry = upstreams.vacant_entry();
    let key = entry.key();
    let mut io = IoHandle::new(upstream_token(key), PlainTransport::new(stream), 8192);
    io.register(registry)?;
    entry.insert(UpstreamSlot {
        io,
        group: group_name.to_string(),
        origin_idx,
        pool_key,
        client_key: None,
        connecting: true,
        connect_started: Instant::now(),
        response_head_seen: false,
        head_len: 0,
        content_length: None,
        relayed: 0,
        allow_passthrough,
        tunneling: false,
        write_watermark: WatermarkBuffer::new(high_watermark),
    });
    pool_index.insert((group_name.to_string(), origin_idx, pool_key), key);
    Ok(key)
}

fn finish_with_status<T: RegisterableTransport>(
    registry: &Registry,
    clients: &mut Slab<ClientSlot<T>>,
    key: usize,
    status: StatusCode,
    flag: ResponseFlags,
) {
    if let Some(slot) = clients.get_mut(key) {
        respond_and_close(registry, slot, status, flag);
    }
}

fn send_request_head<T: RegisterableTransport>(
    registry: &Registry,
    clients: &mut Slab<ClientSlot<T>>,
    upstreams: &mut Slab<UpstreamSlot>,
    client_key: usize,
    upstream_key: usize,
) {
    let bytes = match clients[client_key].ctx.as_mut() {
        Some(ctx) => {
            ctx.stream_info.mark_request_dispatched();
            ctx.serialize()
        }
        None => return,
    };
    if let Some(slot) = upstreams.get_mut(upstream_key) {
        let _ = slot.io.write_buf().write_all(&bytes);
        slot.write_watermark.add(bytes.len());
        let _ = slot.io.reregister(registry);
    }
    if let Some(req) = clients[client_key].upstream.as_mut() {
        req.connection_leased(upstream_key);
        req.headers_sent();
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_upstream_event<T: RegisterableTransport>(
    registry: &Registry,
    upstreams: &mut Slab<UpstreamSlot>,
    clients: &mut Slab<ClientSlot<T>>,
    router: &mut Router,
    key: usize,
    readable: bool,
    writable: bool,
) {
    if !upstreams.contains(key) {
        return;
    }

    if writable && upstreams[key].connecting {
        let connect_result = upstreams[key].io.transport_mut().stream_mut().take_error();
        match connect_result {
            Ok(None) => {
                upstreams[key].connecting = false;
                let group = upstreams[key].group.clone();
                let origin_idx = upstreams[key].origin_idx;
                let pool_key = upstreams[key].pool_key;
                if let Some(g) = router.group_mut(&group) {
                    if let Some(o) = g.origin_mut(origin_idx) {
                        o.connected(pool_key);
                        o.lease(pool_key);
                    }
                }
                if let Some(client_key) = upstreams[key].client_key {
                    if let Some(ctx) = clients.get_mut(client_key).and_then(|c| c.ctx.as_mut()) {
                        ctx.stream_info.mark_upstream_connect_end();
                    }
                    send_request_head(registry, clients, upstreams, client_key, key);
                }
            }
            Ok(Some(_)) | Err(_) => {
                retire_upstream_with_failure(
                    registry,
                    upstreams,
                    clients,
                    router,
                    key,
                    ResponseFlags::UPSTREAM_CONNECTION_TERMINATION,
                );
                return;
            }
        }
    } else if writable {
        let n = upstreams[key].io.do_write().unwrap_or(0);
        let below_high = {
            upstreams[key].write_watermark.drain(n);
            !upstreams[key].write_watermark.is_above_high()
        };
        if let Some(client_key) = upstreams[key].client_key {
            if let Some(client) = clients.get_mut(client_key) {
                client.conn.set_read_enabled(below_high);
                let _ = client.conn.reregister(registry);
            }
        }
        let _ = upstreams[key].io.reregister(registry);
    }

    if readable && upstreams.contains(key) && !upstreams[key].connecting {
        let n = upstreams[key].io.do_read().unwrap_or(0);
        let closed = upstreams[key].io.is_closed();

        if n > 0 && upstreams[key].client_key.is_some() {
            let complete = relay_to_client(registry, upstreams, clients, router, key);
            if complete {
                complete_response(registry, upstreams, clients, router, key);
                return;
            }
        }

        if closed {
            if upstreams[key].tunneling {
                retire_tunnel(registry, upstreams, clients, router, key);
            } else if upstreams[key].client_key.is_some() {
                retire_upstream_with_failure(
                    registry,
                    upstreams,
                    clients,
                    router,
                    key,
                    ResponseFlags::UPSTREAM_CONNECTION_TERMINATION,
                );
            } else {
                retire_idle_upstream(registry, upstreams, router, key);
            }
        }
    }
}

/// Relays every currently-buffered byte to the client, returning whether the
/// response is now fully relayed (either `Content-Length` was reached, or the
/// head arrived with no `Content-Length` at all, implying no body).
fn relay_to_client<T: RegisterableTransport>(
    registry: &Registry,
    upstreams: &mut Slab<UpstreamSlot>,
    clients: &mut Slab<ClientSlot<T>>,
    router: &mut Router,
    key: usize,
) -> bool {
    let Some(client_key) = upstreams[key].client_key else { return false };

    if !upstreams[key].response_head_seen {
        let buf_snapshot: Vec<u8> = upstreams[key].io.read_buf()[..].to_vec();
        if let Some(len) = head_len(&buf_snapshot) {
            upstreams[key].response_head_seen = true;
            upstreams[key].head_len = len as u64;
            upstreams[key].content_length = parse_content_length(&buf_snapshot[..len]);
            let status = parse_status_code(&buf_snapshot[..len]);
            let request_method = clients.get(client_key).and_then(|c| c.ctx.as_ref()).and_then(|ctx| ctx.method);
            let becomes_tunnel = match status {
                Some(code) if request_method == Some(Method::Connect) => (200..300).contains(&code),
                Some(101) => upstreams[key].allow_passthrough,
                _ => false,
            };
            if becomes_tunnel {
                upstreams[key].tunneling = true;
                if let Some(client) = clients.get_mut(client_key) {
                    client.tunneling = true;
                }
            }
            if let Some(client) = clients.get_mut(client_key) {
                if let Some(req) = client.upstream.as_mut() {
                    if let Some(ctx) = client.ctx.as_mut() {
                        CodecBridge::on_first_response_byte(req, ctx);
                        if let Some(sample) = ctx.stream_info.response_duration() {
                            let group = upstreams[key].group.clone();
                            let origin_idx = upstreams[key].origin_idx;
                            let pool_key = upstreams[key].pool_key;
                            if let Some(o) = router.group_mut(&group).and_then(|g| g.origin_mut(origin_idx)) {
                                o.record_rtt(pool_key, sample);
                            }
                        }
                    }
                }
            }
        }
    }

    let (bytes, available) = {
        let buf = upstreams[key].io.read_buf();
        let available = buf.remaining();
        (buf[..].to_vec(), available)
    };

    if let Some(client) = clients.get_mut(client_key) {
        let _ = client.conn.write_raw(&bytes);
        let paused = client.conn.is_above_high_watermark();
        let _ = client.conn.reregister(registry);
        if paused {
            upstreams[key].io.set_read_enabled(false);
        }
    }
    upstreams[key].io.read_buf().mark_read(available);
    upstreams[key].relayed += available as u64;

    if upstreams[key].tunneling {
        return false;
    }

    match (upstreams[key].response_head_seen, upstreams[key].content_length) {
        (true, Some(len)) => upstreams[key].relayed >= upstreams[key].head_len + len,
        (true, None) => true,
        (false, _) => false,
    }
}

fn parse_content_length(head: &[u8]) -> Option<u64> {
    let text = String::from_utf8_lossy(head);
    text.lines()
        .find(|line| line.to_ascii_lowercase().starts_with("content-length:"))
        .and_then(|line| line.split_once(':').map(|(_, v)| v.to_string()))
        .and_then(|v| v.trim().parse::<u64>().ok())
}

/// Parses the numeric status code from a response head's status line
/// (`HTTP/1.1 200 OK\r\n...`).
fn parse_status_code(head: &[u8]) -> Option<u16> {
    let text = String::from_utf8_lossy(head);
    let line = text.lines().next()?;
    line.split_whitespace().nth(1)?.parse().ok()
}

fn complete_response<T: RegisterableTransport>(
    registry: &Registry,
    upstreams: &mut Slab<UpstreamSlot>,
    clients: &mut Slab<ClientSlot<T>>,
    router: &mut Router,
    key: usize,
) {
    let Some(slot) = upstreams.get_mut(key) else { return };
    let client_key = slot.client_key.take();
    let group = slot.group.clone();
    let origin_idx = slot.origin_idx;
    let pool_key = slot.pool_key;
    slot.response_head_seen = false;
    slot.content_length = None;
    slot.relayed = 0;
    slot.head_len = 0;

    if let Some(g) = router.group_mut(&group) {
        if let Some(o) = g.origin_mut(origin_idx) {
            o.release(pool_key);
        }
    }

    if let Some(client_key) = client_key {
        if let Some(client) = clients.get_mut(client_key) {
            if let Some(mut req) = client.upstream.take() {
                if let Some(ctx) = client.ctx.as_mut() {
                    CodecBridge::on_response_complete(&mut req, ctx);
                }
            }
            client.upstream_key = None;
            let _ = client.conn.reregister(registry);
            if client.keep_alive {
                client.conn.reset_for_next_request();
                client.ctx = None;
            } else {
                let _ = client.conn.deregister(registry);
            }
        }
    }
}

fn retire_idle_upstream(registry: &Registry, upstreams: &mut Slab<UpstreamSlot>, router: &mut Router, key: usize) {
    let Some(slot) = upstreams.get_mut(key) else { return };
    let group = slot.group.clone();
    let origin_idx = slot.origin_idx;
    let pool_key = slot.pool_key;
    let _ = slot.io.deregister(registry);
    upstreams.remove(key);

    if let Some(g) = router.group_mut(&group) {
        if let Some(o) = g.origin_mut(origin_idx) {
            o.remove(pool_key);
        }
    }
}

fn retire_upstream_with_failure<T: RegisterableTransport>(
    registry: &Registry,
    upstreams: &mut Slab<UpstreamSlot>,
    clients: &mut Slab<ClientSlot<T>>,
    router: &mut Router,
    key: usize,
    flag: ResponseFlags,
) {
    let Some(slot) = upstreams.get(key) else { return };
    let client_key = slot.client_key;
    let group = slot.group.clone();
    let origin_idx = slot.origin_idx;
    let pool_key = slot.pool_key;

    if let Some(slot) = upstreams.get_mut(key) {
        let _ = slot.io.deregister(registry);
    }
    upstreams.remove(key);

    if let Some(g) = router.group_mut(&group) {
        if let Some(o) = g.origin_mut(origin_idx) {
            o.mark_down(pool_key);
        }
    }

    if let Some(client_key) = client_key {
        if let Some(slot) = clients.get_mut(client_key) {
            slot.upstream = None;
            slot.upstream_key = None;
            respond_and_close(registry, slot, StatusCode::BadGateway, flag);
        }
    }
}

/// Tears down a CONNECT/upgrade tunnel on either side closing: no HTTP error
/// response is sent, since the connection has already left HTTP framing.
fn retire_tunnel<T: RegisterableTransport>(
    registry: &Registry,
    upstreams: &mut Slab<UpstreamSlot>,
    clients: &mut Slab<ClientSlot<T>>,
    router: &mut Router,
    key: usize,
) {
    let Some(slot) = upstreams.get(key) else { return };
    let client_key = slot.client_key;
    let group = slot.group.clone();
    let origin_idx = slot.origin_idx;
    let pool_key = slot.pool_key;

    if let Some(slot) = upstreams.get_mut(key) {
        let _ = slot.io.deregister(registry);
    }
    upstreams.remove(key);

    if let Some(g) = router.group_mut(&group) {
        if let Some(o) = g.origin_mut(origin_idx) {
            o.remove(pool_key);
        }
    }

    if let Some(client_key) = client_key {
        if let Some(mut slot) = clients.try_remove(client_key) {
            let _ = slot.conn.deregister(registry);
        }
    }
}

fn close_client<T: RegisterableTransport>(
    registry: &Registry,
    clients: &mut Slab<ClientSlot<T>>,
    upstreams: &mut Slab<UpstreamSlot>,
    router: &mut Router,
    key: usize,
) {
    let Some(mut slot) = clients.try_remove(key) else { return };
    let _ = slot.conn.deregister(registry);

    if let Some(upstream_key) = slot.upstream_key {
        if slot.tunneling {
            if let Some(u) = upstreams.get(upstream_key) {
                let group = u.group.clone();
                let origin_idx = u.origin_idx;
                let pool_key = u.pool_key;
                if let Some(u) = upstreams.get_mut(upstream_key) {
                    let _ = u.io.deregister(registry);
                }
                upstreams.remove(upstream_key);
                if let Some(g) = router.group_mut(&group) {
                    if let Some(o) = g.origin_mut(origin_idx) {
                        o.remove(pool_key);
                    }
                }
            }
        } else if let Some(u) = upstreams.get_mut(upstream_key) {
            u.client_key = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_space_splits_client_and_upstream_ranges() {
        assert!(!is_upstream_token(client_token(5)));
        assert!(is_upstream_token(upstream_token(5)));
        assert_eq!(5, upstream_key(upstream_token(5)));
    }

    #[test]
    fn parse_content_length_reads_header_case_insensitively() {
        let head = b"HTTP/1.1 200 OK\r\nContent-Length: 42\r\n\r\n";
        assert_eq!(Some(42), parse_content_length(head));
    }

    #[test]
    fn parse_content_length_is_none_when_absent() {
        let head = b"HTTP/1.1 204 No Content\r\n\r\n";
        assert_eq!(None, parse_content_length(head));
    }

    #[test]
    fn worker_load_tracks_increment_and_decrement() {
        let load = WorkerLoad::new();
        assert_eq!(0, load.get());
        load.increment();
        load.increment();
        assert_eq!(2, load.get());
        load.decrement();
        assert_eq!(1, load.get());
    }
}
