//! Handler delivery
//!
//! Decoded messages are queued as [`Job`]s and executed by a fixed pool of
//! worker threads, so a slow handler never stalls the socket. Each
//! registration owns a [`Lane`] that hands out tickets in arrival order;
//! a worker only runs a handler once every earlier ticket on that lane has
//! finished. Together with the FIFO queue this keeps per-handler delivery
//! in arrival order and, within one message, handlers in registration
//! order, while different handlers still run in parallel.

use oscroute_core::Message;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, trace, warn};

use crate::dispatch::{Handler, HandlerResult, Registration};
use crate::error::{DeliveryError, HandlerError, Result, RouterError};
use crate::stats::ServerStats;

/// Callback receiving every [`DeliveryError`] the server observes
pub type ErrorObserver = Arc<dyn Fn(&DeliveryError) + Send + Sync>;

thread_local! {
    /// Set while this thread is inside a handler call
    static IN_HANDLER: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as running a handler until dropped
struct HandlerScope {
    outer: bool,
}

impl HandlerScope {
    fn enter() -> Self {
        Self {
            outer: IN_HANDLER.with(|flag| flag.replace(true)),
        }
    }
}

impl Drop for HandlerScope {
    fn drop(&mut self) {
        IN_HANDLER.with(|flag| flag.set(self.outer));
    }
}

/// Per-registration ticket sequencer
pub(crate) struct Lane {
    issued: AtomicU64,
    state: Mutex<LaneState>,
    turn: Condvar,
}

#[derive(Default)]
struct LaneState {
    /// Ticket allowed to run next
    serving: u64,
    retired: bool,
    /// A run is inside the handler
    active: bool,
}

impl Lane {
    pub(crate) fn new() -> Self {
        Self {
            issued: AtomicU64::new(0),
            state: Mutex::new(LaneState::default()),
            turn: Condvar::new(),
        }
    }

    /// Reserve the next position on this lane. Every ticket handed out must
    /// eventually be passed to [`Lane::run`] or the lane stalls.
    pub(crate) fn ticket(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::Relaxed)
    }

    /// Wait for `ticket`'s turn, then run `f` without holding the lock.
    /// Returns `None` if the lane was retired first.
    pub(crate) fn run<R>(&self, ticket: u64, f: impl FnOnce() -> R) -> Option<R> {
        let mut state = self.state.lock();
        while !state.retired && state.serving != ticket {
            self.turn.wait(&mut state);
        }
        if state.retired {
            return None;
        }

        state.active = true;
        let result = MutexGuard::unlocked(&mut state, || {
            let _scope = HandlerScope::enter();
            f()
        });
        state.active = false;
        state.serving += 1;
        self.turn.notify_all();
        Some(result)
    }

    /// Stop all future runs and wait out the one in progress. From inside a
    /// handler it only stops future runs: the run in progress may be the
    /// caller, or a handler that is itself waiting on the caller's lane.
    pub(crate) fn retire(&self) {
        let mut state = self.state.lock();
        state.retired = true;
        self.turn.notify_all();
        if IN_HANDLER.with(Cell::get) {
            return;
        }
        while state.active {
            self.turn.wait(&mut state);
        }
    }
}

/// One message and the registrations it is bound for
pub(crate) struct Job {
    pub message: Message,
    /// Matching registrations in registration order, with their lane tickets
    pub targets: Vec<(Arc<Registration>, u64)>,
}

/// State shared by the receive loop and every worker
pub(crate) struct DeliveryContext {
    pub stats: Arc<ServerStats>,
    observer: Option<ErrorObserver>,
}

impl DeliveryContext {
    pub(crate) fn new(stats: Arc<ServerStats>, observer: Option<ErrorObserver>) -> Self {
        Self { stats, observer }
    }

    /// Log a delivery problem and forward it to the observer
    pub(crate) fn report(&self, err: DeliveryError) {
        if matches!(err, DeliveryError::SocketClosed(_)) {
            error!("{}", err);
        } else {
            warn!("{}", err);
        }

        if let Some(observer) = &self.observer {
            if panic::catch_unwind(AssertUnwindSafe(|| observer(&err))).is_err() {
                error!("Error observer panicked while handling: {}", err);
            }
        }
    }

    fn deliver(&self, job: Job) {
        let Job { message, targets } = job;

        for (registration, ticket) in &targets {
            let outcome = registration
                .lane
                .run(*ticket, || invoke(registration.handler.as_ref(), &message));

            match outcome {
                None => trace!("Skipping {} for {}, unmapped", registration.id, message.address),
                Some(Ok(())) => ServerStats::incr(&self.stats.handler_invocations),
                Some(Err(error)) => {
                    ServerStats::incr(&self.stats.handler_invocations);
                    ServerStats::incr(&self.stats.handler_failures);
                    self.report(DeliveryError::Handler {
                        id: registration.id,
                        pattern: registration.pattern.as_str().to_string(),
                        address: message.address.clone(),
                        error,
                    });
                }
            }
        }
    }
}

/// Call a handler, turning a panic into a [`HandlerError`]
fn invoke(handler: &dyn Handler, message: &Message) -> HandlerResult {
    match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(message))) {
        Ok(result) => result,
        Err(payload) => Err(HandlerError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Fixed set of threads draining the job queue
pub(crate) struct WorkerPool {
    /// Yields `None` once every worker has exited
    done: mpsc::Receiver<()>,
    size: usize,
}

impl WorkerPool {
    pub(crate) fn spawn(
        size: usize,
        jobs: mpsc::Receiver<Job>,
        ctx: Arc<DeliveryContext>,
    ) -> Result<Self> {
        let jobs = Arc::new(Mutex::new(jobs));
        let (done_tx, done) = mpsc::channel(1);

        for index in 0..size {
            let jobs = Arc::clone(&jobs);
            let ctx = Arc::clone(&ctx);
            let done_tx = done_tx.clone();
            thread::Builder::new()
                .name(format!("oscroute-worker-{}", index))
                .spawn(move || worker_loop(jobs, ctx, done_tx))
                .map_err(|e| RouterError::Other(format!("failed to spawn worker: {}", e)))?;
        }

        Ok(Self { done, size })
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    /// Wait up to `grace` for the workers to finish the queued jobs.
    /// Returns false if they are still running when the grace expires.
    pub(crate) async fn drain(mut self, grace: Duration) -> bool {
        tokio::time::timeout(grace, self.done.recv()).await.is_ok()
    }
}

fn worker_loop(
    jobs: Arc<Mutex<mpsc::Receiver<Job>>>,
    ctx: Arc<DeliveryContext>,
    _done: mpsc::Sender<()>,
) {
    loop {
        // Pull under the lock so jobs leave the queue in FIFO order
        let job = jobs.lock().blocking_recv();
        match job {
            Some(job) => ctx.deliver(job),
            None => break,
        }
    }
    trace!("Worker {:?} exiting", thread::current().name());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;

    #[test]
    fn test_lane_runs_tickets_in_order() {
        let lane = Arc::new(Lane::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let tickets: Vec<u64> = (0..8).map(|_| lane.ticket()).collect();

        // Start the threads in reverse so later tickets have to wait
        let handles: Vec<_> = tickets
            .into_iter()
            .rev()
            .map(|ticket| {
                let lane = Arc::clone(&lane);
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    lane.run(ticket, || log.lock().push(ticket));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(*log.lock(), (0..8).collect::<Vec<u64>>());
    }

    #[test]
    fn test_retired_lane_skips_and_releases_waiters() {
        let lane = Arc::new(Lane::new());
        let _first = lane.ticket();
        let second = lane.ticket();

        let waiter = {
            let lane = Arc::clone(&lane);
            thread::spawn(move || lane.run(second, || ()))
        };

        lane.retire();
        assert_eq!(waiter.join().unwrap(), None);
        assert_eq!(lane.run(lane.ticket(), || 1), None);
    }

    #[test]
    fn test_retire_from_inside_run() {
        let lane = Lane::new();
        let ticket = lane.ticket();
        let result = lane.run(ticket, || {
            lane.retire();
            7
        });
        assert_eq!(result, Some(7));
        assert_eq!(lane.run(lane.ticket(), || 8), None);
    }

    #[test]
    fn test_lanes_retire_each_other_from_handlers() {
        let a = Arc::new(Lane::new());
        let b = Arc::new(Lane::new());
        let barrier = Arc::new(Barrier::new(2));

        let cross = |mine: &Arc<Lane>, other: &Arc<Lane>| {
            let mine = Arc::clone(mine);
            let other = Arc::clone(other);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let ticket = mine.ticket();
                mine.run(ticket, || {
                    barrier.wait();
                    other.retire();
                })
            })
        };
        let first = cross(&a, &b);
        let second = cross(&b, &a);

        assert_eq!(first.join().unwrap(), Some(()));
        assert_eq!(second.join().unwrap(), Some(()));
        assert_eq!(a.run(a.ticket(), || ()), None);
        assert_eq!(b.run(b.ticket(), || ()), None);
        assert!(!IN_HANDLER.with(Cell::get));
    }

    #[test]
    fn test_retire_outside_handler_waits_for_run() {
        let lane = Arc::new(Lane::new());
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let finished = Arc::new(AtomicUsize::new(0));

        let runner = {
            let lane = Arc::clone(&lane);
            let finished = Arc::clone(&finished);
            thread::spawn(move || {
                lane.run(lane.ticket(), || {
                    entered_tx.send(()).unwrap();
                    thread::sleep(Duration::from_millis(50));
                    finished.fetch_add(1, Ordering::SeqCst);
                })
            })
        };

        entered_rx.recv().unwrap();
        lane.retire();
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        runner.join().unwrap();
    }

    #[test]
    fn test_invoke_catches_panics() {
        let handler = |_: &Message| panic!("boom");
        let err = invoke(&handler, &Message::new("/p")).unwrap_err();
        assert_eq!(err, HandlerError::Panicked("boom".to_string()));

        let formatted = |_: &Message| panic!("code {}", 3);
        let err = invoke(&formatted, &Message::new("/p")).unwrap_err();
        assert_eq!(err, HandlerError::Panicked("code 3".to_string()));
    }

    #[test]
    fn test_observer_panic_is_contained() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let observer: ErrorObserver = Arc::new(move |_: &DeliveryError| {
            seen.fetch_add(1, Ordering::SeqCst);
            panic!("observer");
        });
        let ctx = DeliveryContext::new(Arc::new(ServerStats::default()), Some(observer));

        ctx.report(DeliveryError::Receive("test".into()));
        ctx.report(DeliveryError::Receive("test".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
