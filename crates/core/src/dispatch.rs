//! Debounced dispatch with a single pending-task slot
//!
//! Requests either run immediately or land in the pending slot. Each new
//! debounced request replaces the slot and pushes the deadline out to a
//! full window from now; the timer thread runs whatever sits in the slot
//! once the deadline passes.
//!
//! The timer claims the task under the same lock that submissions take, so
//! a task that has been superseded can never run in place of its
//! replacement. Claimed tasks run on the execution context's background
//! worker, never on the timer thread itself.

use crate::error::ExecError;
use crate::exec::{self, ExecutionContext, Job};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Default quiet period before a debounced task fires
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_secs(1);

/// Snapshot of dispatcher activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Tasks sent straight through `run_now`
    pub immediate: u64,
    /// Tasks submitted through `run_debounced`
    pub debounced: u64,
    /// Pending tasks replaced before they fired
    pub superseded: u64,
    /// Pending tasks the timer claimed and handed to a worker
    pub fired: u64,
    /// Pending tasks dropped by `cancel_pending`
    pub cancelled: u64,
    /// Fired tasks that panicked on their background worker
    pub panicked: u64,
}

#[derive(Default)]
struct Counters {
    immediate: AtomicU64,
    debounced: AtomicU64,
    superseded: AtomicU64,
    fired: AtomicU64,
    cancelled: AtomicU64,
    panicked: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            immediate: self.immediate.load(Ordering::Relaxed),
            debounced: self.debounced.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
            fired: self.fired.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
        }
    }
}

struct Pending {
    task: Job,
    deadline: Instant,
}

#[derive(Default)]
struct State {
    pending: Option<Pending>,
    shutdown: bool,
}

struct Shared {
    state: Mutex<State>,
    wake: Condvar,
    counters: Counters,
}

/// Runs tasks now, or coalesces them into one trailing execution
pub struct DebouncedDispatcher {
    window: Duration,
    ctx: Arc<dyn ExecutionContext>,
    shared: Arc<Shared>,
    timer: Option<JoinHandle<()>>,
}

impl DebouncedDispatcher {
    /// Create a dispatcher and start its timer thread
    pub fn new(window: Duration, ctx: Arc<dyn ExecutionContext>) -> Result<Self, ExecError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            wake: Condvar::new(),
            counters: Counters::default(),
        });

        let timer = {
            let shared = shared.clone();
            let ctx = ctx.clone();
            thread::Builder::new()
                .name("notigate-debounce".to_string())
                .spawn(move || timer_loop(shared, ctx))?
        };

        info!("Debounced dispatcher started (window: {:?})", window);

        Ok(Self {
            window,
            ctx,
            shared,
            timer: Some(timer),
        })
    }

    /// Quiet period applied to debounced tasks
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Run a task now, off the UI thread
    ///
    /// Leaves any pending debounced task untouched.
    pub fn run_now(&self, task: Job) {
        Counters::bump(&self.shared.counters.immediate);
        exec::run_now(self.ctx.as_ref(), task);
    }

    /// Make `task` the pending task and restart the window
    pub fn run_debounced(&self, task: Job) {
        let deadline = Instant::now() + self.window;

        let replaced = {
            let mut state = self.shared.state.lock();
            state.pending.replace(Pending { task, deadline })
        };
        self.shared.wake.notify_one();

        Counters::bump(&self.shared.counters.debounced);
        if replaced.is_some() {
            Counters::bump(&self.shared.counters.superseded);
            debug!("Superseded pending notification task");
        }
        // Replaced task drops here, outside the lock
    }

    /// Drop the pending task without running it
    ///
    /// Returns true if a task was pending.
    pub fn cancel_pending(&self) -> bool {
        let cancelled = self.shared.state.lock().pending.take();
        self.shared.wake.notify_one();

        match cancelled {
            Some(_) => {
                Counters::bump(&self.shared.counters.cancelled);
                debug!("Cancelled pending notification task");
                true
            }
            None => false,
        }
    }

    /// True while a task is waiting for its deadline
    pub fn is_pending(&self) -> bool {
        self.shared.state.lock().pending.is_some()
    }

    /// Activity counters
    pub fn stats(&self) -> DispatchStats {
        self.shared.counters.snapshot()
    }
}

impl Drop for DebouncedDispatcher {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            if state.pending.take().is_some() {
                debug!("Discarding pending notification task on shutdown");
            }
        }
        self.shared.wake.notify_one();

        if let Some(timer) = self.timer.take() {
            // A task run by an inline context may own the last handle to us
            if timer.thread().id() != thread::current().id() && timer.join().is_err() {
                error!("Debounce timer thread exited abnormally");
            }
        }
    }
}

impl std::fmt::Debug for DebouncedDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebouncedDispatcher")
            .field("window", &self.window)
            .field("pending", &self.is_pending())
            .field("stats", &self.stats())
            .finish()
    }
}

fn timer_loop(shared: Arc<Shared>, ctx: Arc<dyn ExecutionContext>) {
    let mut state = shared.state.lock();

    loop {
        if state.shutdown {
            break;
        }

        let deadline = match state.pending.as_ref() {
            Some(pending) => pending.deadline,
            None => {
                shared.wake.wait(&mut state);
                continue;
            }
        };

        if Instant::now() < deadline {
            shared.wake.wait_until(&mut state, deadline);
            continue;
        }

        // Claimed under the lock: anything submitted after this point
        // becomes a fresh pending task
        let Some(pending) = state.pending.take() else {
            continue;
        };
        Counters::bump(&shared.counters.fired);

        // The timer only hands off; a slow task must not delay later deadlines
        MutexGuard::unlocked(&mut state, || fire(&shared, ctx.as_ref(), pending.task));
    }

    debug!("Debounce timer thread exiting");
}

/// Hand a claimed task to a background worker, counting panics there
fn fire(shared: &Arc<Shared>, ctx: &dyn ExecutionContext, task: Job) {
    let shared = shared.clone();
    let job: Job = Box::new(move || {
        if !exec::run_guarded(task, "debounced task") {
            Counters::bump(&shared.counters.panicked);
        }
    });

    if let Err(e) = ctx.spawn_background(job) {
        error!("Dropping debounced notification task, background spawn failed: {}", e);
    }
}
