//! Accept thread: binds one listening socket and dispatches accepted
//! connections across a fixed set of workers.
//!
//! Generalizes the teacher's `Listener` (`src/listener.rs`,
//! `server/src/listener.rs`): rather than owning a `Slab` of sessions and
//! forwarding every IO event itself, this accept thread only ever touches
//! the listening socket. Once a connection is handed to a worker via
//! [`WorkerHandle::dispatch`], the worker drives all of its IO; the listener
//! never sees it again. That split is what lets each worker own its
//! connection table exclusively, per §5's no-lock-on-the-hot-path design.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mio::{Events, Interest, Poll, Token, Waker};

use crate::worker::{NewConnection, WorkerHandle};

const LISTEN_TOKEN: Token = Token(0);
const STOP_TOKEN: Token = Token(1);

/// Accepts connections on one bound socket and dispatches them to a fixed
/// pool of workers.
pub struct Listener {
    inner: mio::net::TcpListener,
    poll: Poll,
    events: Events,
    workers: Vec<WorkerHandle>,
    next: usize,
    max_pending: usize,
    stop: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

/// A cloneable handle other threads use to stop a running [`Listener`].
#[derive(Clone)]
pub struct ListenerHandle {
    stop: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ListenerHandle {
    /// Requests that the listener stop accepting and return from
    /// [`Listener::run`].
    pub fn request_stop(&self) -> io::Result<()> {
        self.stop.store(true, Ordering::Relaxed);
        self.waker.wake()
    }
}

impl Listener {
    /// Binds `addr` and prepares to dispatch accepted connections across
    /// `workers`. `max_pending` mirrors `ServerConfig::max_pending`: the
    /// pre-accept admission check (§4.3) rejects a connection outright when
    /// the chosen worker's pending queue is already at that bound. Zero
    /// disables the check, matching `PendingQueue`'s own "0 is unbounded"
    /// convention.
    pub fn bind(addr: SocketAddr, workers: Vec<WorkerHandle>, max_pending: usize) -> io::Result<Self> {
        let mut inner = mio::net::TcpListener::bind(addr)?;
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut inner, LISTEN_TOKEN, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), STOP_TOKEN)?);

        Ok(Listener {
            inner,
            poll,
            events: Events::with_capacity(256),
            workers,
            next: 0,
            max_pending,
            stop: Arc::new(AtomicBool::new(false)),
            waker,
        })
    }

    /// A cloneable handle another thread uses to stop this listener.
    pub fn handle(&self) -> ListenerHandle {
        ListenerHandle {
            stop: self.stop.clone(),
            waker: self.waker.clone(),
        }
    }

    /// The address actually bound (useful when `addr`'s port was `0`).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Runs the accept loop until [`ListenerHandle::request_stop`] wakes it.
    pub fn run(&mut self) -> io::Result<()> {
        loop {
            self.poll.poll(&mut self.events, None)?;

            if self.stop.load(Ordering::Relaxed) {
                return Ok(());
            }

            let saw_listen = self.events.iter().any(|e| e.token() == LISTEN_TOKEN);
            if saw_listen {
                self.accept();
            }
        }
    }

    fn accept(&mut self) {
        loop {
            match self.inner.accept() {
                Ok((stream, addr)) => self.dispatch(stream, addr),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    fn dispatch(&mut self, stream: mio::net::TcpStream, addr: SocketAddr) {
        // One of the three Nagle toggles per §4.3: the accepted client
        // socket. The other two (upstream connect, listening socket) are set
        // in `worker::open_upstream` and left at the OS default respectively.
        let _ = stream.set_nodelay(true);

        let Some(idx) = self.pick_worker() else {
            tracing::warn!(%addr, "no worker configured, dropping connection");
            return;
        };

        if self.max_pending != 0 && self.workers[idx].pending_count() + 1 > self.max_pending {
            tracing::warn!(%addr, worker = idx, "pending queue at capacity, rejecting connection");
            return;
        }

        if !self.workers[idx].dispatch(NewConnection { stream, addr }) {
            tracing::warn!(%addr, worker = idx, "worker thread gone, dropping connection");
        }
    }

    /// Picks the next worker in round-robin order.
    fn pick_worker(&mut self) -> Option<usize> {
        if self.workers.is_empty() {
            return None;
        }

        let idx = self.next;
        self.next = (self.next + 1) % self.workers.len();
        Some(idx)
    }
}
