//! Per-worker event loop: IO readiness, timers, and deferred work.
//!
//! Built over the teacher's `mio::Poll`/`Token`/`Waker`/`Events` reactor
//! idiom (see `listener.rs`). Each worker owns exactly one [`Dispatcher`] —
//! there is no cross-thread sharing of its state, matching §5's "no locks on
//! the hot path" requirement. Cross-thread handoff happens only through
//! `post`, backed by the same `crossbeam_channel` + `mio::Waker` pairing the
//! teacher already uses between its `Listener` and `Worker`.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use mio::{Events, Poll, Token, Waker};

use crate::error::DispatchError;

const POST_TOKEN: Token = Token(usize::MAX - 2);

/// Identifies a registered timer so it can be cancelled with
/// [`Dispatcher::cancel_timer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

struct TimerEntry {
    deadline: Instant,
    id: TimerId,
    callback: Box<dyn FnOnce() + Send>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline
    }
}
impl Eq for TimerEntry {}
impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline.cmp(&other.deadline)
    }
}

type DeferredQueue = Vec<Box<dyn FnOnce() + Send>>;

/// The per-worker reactor: IO readiness polling, a min-heap of timers, and
/// double-buffered deferred-delete/destroy queues.
pub struct Dispatcher {
    poll: Poll,
    events: Events,
    timers: BinaryHeap<Reverse<TimerEntry>>,
    next_timer_id: u64,
    cancelled_timers: HashSet<u64>,
    /// Two slots so a callback running mid-drain can safely schedule
    /// another deferred action without mutating the vector it's being
    /// drained from: everything scheduled during a drain lands in the
    /// *other* slot, swapped in before the next drain.
    deferred: [DeferredQueue; 2],
    current: usize,
    post_rx: Receiver<Box<dyn FnOnce() + Send>>,
    post_tx: Sender<Box<dyn FnOnce() + Send>>,
    waker: Arc<Waker>,
}

impl Dispatcher {
    /// Creates a new dispatcher with its own `mio::Poll` instance.
    pub fn new() -> Result<Self, DispatchError> {
        let poll = Poll::new().map_err(DispatchError::Poll)?;
        let waker = Arc::new(
            Waker::new(poll.registry(), POST_TOKEN).map_err(DispatchError::Register)?,
        );
        let (post_tx, post_rx) = crossbeam_channel::unbounded();

        Ok(Dispatcher {
            poll,
            events: Events::with_capacity(1024),
            timers: BinaryHeap::new(),
            next_timer_id: 0,
            cancelled_timers: HashSet::new(),
            deferred: [Vec::new(), Vec::new()],
            current: 0,
            post_rx,
            post_tx,
            waker,
        })
    }

    /// The `mio::Registry` other components register their IO sources with.
    pub fn registry(&self) -> &mio::Registry {
        self.poll.registry()
    }

    /// A cloneable handle other threads can use to schedule work on this
    /// dispatcher via [`Dispatcher::post`]'s channel, waking the poll loop.
    pub fn post_handle(&self) -> PostHandle {
        PostHandle {
            tx: self.post_tx.clone(),
            waker: self.waker.clone(),
        }
    }

    /// Schedules `callback` to run once, after the given delay, on this
    /// worker's thread.
    pub fn schedule_timer(&mut self, delay: Duration, callback: impl FnOnce() + Send + 'static) -> TimerId {
        let id = TimerId(self.next_timer_id);
        self.next_timer_id += 1;
        self.timers.push(Reverse(TimerEntry {
            deadline: Instant::now() + delay,
            id,
            callback: Box::new(callback),
        }));
        id
    }

    /// Cancels a pending timer so its callback never runs, even if it's
    /// already due and waiting to be drained in this same iteration. Returns
    /// `true` if the timer was still pending (cancelling an already-fired or
    /// unknown id is a harmless no-op that returns `false`).
    pub fn cancel_timer(&mut self, id: TimerId) -> bool {
        let was_pending = self.timers.iter().any(|Reverse(t)| t.id == id);
        self.cancelled_timers.insert(id.0);
        was_pending
    }

    /// Schedules `callback` to run at the start of the next loop iteration
    /// (after the current batch of IO events has been fully processed).
    pub fn defer_next_iteration(&mut self, callback: impl FnOnce() + Send + 'static) {
        self.deferred[1 - self.current].push(Box::new(callback));
    }

    fn next_timer_wait(&self) -> Option<Duration> {
        self.timers.peek().map(|Reverse(t)| {
            t.deadline.saturating_duration_since(Instant::now())
        })
    }

    fn drain_due_timers(&mut self) {
        let now = Instant::now();
        let mut due = Vec::new();
        while let Some(Reverse(t)) = self.timers.peek() {
            if t.deadline > now {
                break;
            }
            due.push(self.timers.pop().unwrap().0);
        }
        for entry in due {
            if self.cancelled_timers.remove(&entry.id.0) {
                continue;
            }
            (entry.callback)();
        }
    }

    fn drain_deferred(&mut self) {
        self.current = 1 - self.current;
        let queue = std::mem::take(&mut self.deferred[self.current]);
        for callback in queue {
            callback();
        }
    }

    fn drain_post(&mut self) {
        while let Ok(callback) = self.post_rx.try_recv() {
            callback();
        }
    }

    /// Runs one iteration: polls for IO readiness (bounded by the next due
    /// timer), fires due timers, drains posted work, then drains the
    /// deferred queue — in that order, per §4.1/§9.
    pub fn run_once(&mut self, mut on_io: impl FnMut(&mio::event::Event)) -> Result<(), DispatchError> {
        let timeout = self.next_timer_wait();
        self.poll
            .poll(&mut self.events, timeout)
            .map_err(DispatchError::Poll)?;

        for event in self.events.iter() {
            if event.token() != POST_TOKEN {
                on_io(event);
            }
        }

        self.drain_due_timers();
        self.drain_post();
        self.drain_deferred();

        Ok(())
    }
}

/// A cloneable handle that lets other threads schedule work onto a
/// [`Dispatcher`]'s own thread, waking its poll loop if it's blocked.
#[derive(Clone)]
pub struct PostHandle {
    tx: Sender<Box<dyn FnOnce() + Send>>,
    waker: Arc<Waker>,
}

impl PostHandle {
    /// Schedules `callback` to run on the owning dispatcher's thread.
    pub fn post(&self, callback: impl FnOnce() + Send + 'static) -> Result<(), DispatchError> {
        self.tx
            .send(Box::new(callback))
            .map_err(|_| DispatchError::Register(std::io::Error::from(std::io::ErrorKind::BrokenPipe)))?;
        self.waker.wake().map_err(DispatchError::Register)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn timer_fires_after_delay_elapses() {
        let mut d = Dispatcher::new().unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        d.schedule_timer(Duration::from_millis(1), move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        std::thread::sleep(Duration::from_millis(5));
        d.run_once(|_| {}).unwrap();
        assert_eq!(1, fired.load(Ordering::SeqCst));
    }

    #[test]
    fn cancelled_timer_never_runs() {
        let mut d = Dispatcher::new().unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        let id = d.schedule_timer(Duration::from_millis(1), move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        assert!(d.cancel_timer(id));
        std::thread::sleep(Duration::from_millis(5));
        d.run_once(|_| {}).unwrap();
        assert_eq!(0, fired.load(Ordering::SeqCst));
    }

    #[test]
    fn post_handle_wakes_and_runs_callback() {
        let mut d = Dispatcher::new().unwrap();
        let handle = d.post_handle();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        handle.post(move || {
            f.fetch_add(1, Ordering::SeqCst);
        }).unwrap();
        d.run_once(|_| {}).unwrap();
        assert_eq!(1, fired.load(Ordering::SeqCst));
    }

    #[test]
    fn deferred_next_iteration_does_not_run_immediately() {
        let mut d = Dispatcher::new().unwrap();
        let handle = d.post_handle();
        // Kick the poll loop so run_once doesn't block indefinitely.
        handle.post(|| {}).unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        d.defer_next_iteration(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        d.run_once(|_| {}).unwrap();
        assert_eq!(1, fired.load(Ordering::SeqCst));
    }
}
