//! Global pacing of outbound thread fetches.
//!
//! Every candidate monitor takes a ticket before fetching. One ticket is
//! released per interval, oldest first, no matter how many monitors are
//! waiting. The ticker task starts on the first enqueue and runs until
//! [`RequestQueue::stop`] or until the last queue handle is dropped.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// A unit of work released by the queue.
pub trait QueueTask: Send + 'static {
    /// Run the task. Called at most once, from the ticker.
    fn dispatch(self: Box<Self>);

    /// Whether the owner gave up on this task. Aborted tasks still use up
    /// the tick they are popped on.
    fn is_aborted(&self) -> bool {
        false
    }
}

impl QueueTask for oneshot::Sender<()> {
    fn dispatch(self: Box<Self>) {
        let _ = self.send(());
    }

    fn is_aborted(&self) -> bool {
        self.is_closed()
    }
}

/// Receiving half of a queued dispatch permit.
///
/// Resolves to `Ok(())` when the queue releases it and to `Err` if the queue
/// was stopped first. Dropping it aborts the entry.
pub type Ticket = oneshot::Receiver<()>;

#[derive(Default)]
struct QueueState {
    entries: VecDeque<Box<dyn QueueTask>>,
    ticker: Option<CancellationToken>,
    stopped: bool,
}

struct Inner {
    interval: Duration,
    state: Mutex<QueueState>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(ticker) = self.state.get_mut().ticker.take() {
            ticker.cancel();
        }
    }
}

/// FIFO request pacer shared by all monitors of one engine run.
#[derive(Clone)]
pub struct RequestQueue {
    inner: Arc<Inner>,
}

impl RequestQueue {
    pub fn new(interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                interval,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    /// Append a task. Returns false if the queue is stopped, in which case
    /// the task is dropped without running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn enqueue(&self, task: Box<dyn QueueTask>) -> bool {
        let mut state = self.inner.state.lock();
        if state.stopped {
            return false;
        }
        state.entries.push_back(task);

        if state.ticker.is_none() {
            let token = CancellationToken::new();
            state.ticker = Some(token.clone());
            tokio::spawn(run_ticker(
                Arc::downgrade(&self.inner),
                self.inner.interval,
                token,
            ));
            debug!(interval = ?self.inner.interval, "Request queue ticker started");
        }
        true
    }

    /// Queue a dispatch permit and return the receiving end.
    pub fn ticket(&self) -> Ticket {
        let (tx, rx) = oneshot::channel();
        // A stopped queue drops `tx`, so the ticket resolves to `Err` at once.
        self.enqueue(Box::new(tx));
        rx
    }

    /// Halt the ticker and discard every pending entry. Idempotent.
    ///
    /// Fetches already released keep running; their owners abort them.
    pub fn stop(&self) {
        let discarded = {
            let mut state = self.inner.state.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
            if let Some(ticker) = state.ticker.take() {
                ticker.cancel();
            }
            std::mem::take(&mut state.entries)
        };
        debug!(discarded = discarded.len(), "Request queue stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.state.lock().stopped
    }

    /// Entries waiting for a tick, aborted ones included.
    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("RequestQueue")
            .field("interval", &self.inner.interval)
            .field("pending", &state.entries.len())
            .field("stopped", &state.stopped)
            .finish()
    }
}

async fn run_ticker(inner: Weak<Inner>, period: Duration, token: CancellationToken) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = interval.tick() => {}
        }

        let Some(inner) = inner.upgrade() else {
            break;
        };
        let task = {
            let mut state = inner.state.lock();
            if state.stopped {
                break;
            }
            state.entries.pop_front()
        };

        match task {
            Some(task) if task.is_aborted() => trace!("Skipping aborted request"),
            Some(task) => {
                trace!("Dispatching request");
                task.dispatch();
            }
            None => {}
        }
    }

    trace!("Request queue ticker exited");
}
