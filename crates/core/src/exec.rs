//! Execution contexts that keep notification work off the UI thread
//!
//! Every dispatch path funnels through [`run_now`]: on the UI thread the
//! job is handed to a background context, anywhere else it runs inline.

use crate::error::{panic_message, ExecError};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

/// A unit of notification work
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Where background work runs, and how to tell if we're on the UI thread
pub trait ExecutionContext: Send + Sync {
    /// True when the calling thread is the UI thread
    fn is_on_ui_thread(&self) -> bool;

    /// Hand a job to a background worker
    fn spawn_background(&self, job: Job) -> Result<(), ExecError>;
}

impl<T: ExecutionContext + ?Sized> ExecutionContext for Arc<T> {
    fn is_on_ui_thread(&self) -> bool {
        (**self).is_on_ui_thread()
    }

    fn spawn_background(&self, job: Job) -> Result<(), ExecError> {
        (**self).spawn_background(job)
    }
}

/// Run a job off the UI thread
///
/// Spawns when called on the UI thread, runs inline otherwise. A job whose
/// spawn fails is logged and dropped; it never falls back to the UI thread.
pub fn run_now<C: ExecutionContext + ?Sized>(ctx: &C, job: Job) {
    if ctx.is_on_ui_thread() {
        if let Err(e) = ctx.spawn_background(job) {
            error!("Dropping notification job, background spawn failed: {}", e);
        }
    } else {
        job();
    }
}

/// Identity of the UI thread
///
/// Captured once at wiring time, which happens on the UI thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UiAffinity {
    ui_thread: Option<thread::ThreadId>,
}

impl UiAffinity {
    /// Treat the calling thread as the UI thread
    pub fn capture_current() -> Self {
        Self::for_thread(thread::current().id())
    }

    /// Treat the given thread as the UI thread
    pub fn for_thread(id: thread::ThreadId) -> Self {
        Self {
            ui_thread: Some(id),
        }
    }

    /// No UI thread: every caller counts as background
    pub fn none() -> Self {
        Self { ui_thread: None }
    }

    /// True when called from the UI thread
    pub fn is_current(&self) -> bool {
        self.ui_thread == Some(thread::current().id())
    }
}

/// Run a job, logging a panic instead of unwinding into the worker
pub(crate) fn run_guarded(job: Job, worker: &str) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(job)) {
        Ok(()) => true,
        Err(payload) => {
            error!(
                "Notification job panicked on {}: {}",
                worker,
                panic_message(payload.as_ref())
            );
            false
        }
    }
}

/// Spawns a dedicated OS thread per job
///
/// A panicking job ends only its own thread and is reported by the
/// process panic hook.
#[derive(Debug)]
pub struct ThreadSpawnContext {
    affinity: UiAffinity,
    spawned: AtomicU64,
}

impl ThreadSpawnContext {
    pub fn new(affinity: UiAffinity) -> Self {
        Self {
            affinity,
            spawned: AtomicU64::new(0),
        }
    }

    /// Number of threads spawned so far
    pub fn spawned(&self) -> u64 {
        self.spawned.load(Ordering::Relaxed)
    }
}

impl ExecutionContext for ThreadSpawnContext {
    fn is_on_ui_thread(&self) -> bool {
        self.affinity.is_current()
    }

    fn spawn_background(&self, job: Job) -> Result<(), ExecError> {
        let seq = self.spawned.fetch_add(1, Ordering::Relaxed);
        thread::Builder::new()
            .name(format!("notigate-bg-{}", seq))
            .spawn(job)?;
        Ok(())
    }
}

/// Fixed pool of worker threads fed through a channel
///
/// Workers survive panicking jobs. Dropping the pool closes the queue;
/// jobs already queued still run.
pub struct WorkerPoolContext {
    affinity: UiAffinity,
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPoolContext {
    /// Start `size` workers (at least one)
    pub fn new(size: usize, affinity: UiAffinity) -> Result<Self, ExecError> {
        let size = size.max(1);
        let (tx, rx) = crossbeam_channel::unbounded::<Job>();

        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("notigate-worker-{}", index))
                .spawn(move || worker_loop(rx, index))?;
            workers.push(handle);
        }

        info!("Started notification worker pool ({} workers)", size);

        Ok(Self {
            affinity,
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        })
    }

    /// Number of live worker threads
    pub fn size(&self) -> usize {
        self.workers.lock().len()
    }

    /// Close the queue and wait for workers to drain it
    ///
    /// Safe to call more than once. When called from a worker thread that
    /// worker is not joined.
    pub fn shutdown(&self) {
        drop(self.sender.lock().take());

        let current = thread::current().id();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for handle in workers {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("Notification worker exited abnormally");
            }
        }
    }
}

fn worker_loop(rx: Receiver<Job>, index: usize) {
    let name = format!("worker {}", index);
    for job in rx.iter() {
        run_guarded(job, &name);
    }
    debug!("Notification {} exiting", name);
}

impl ExecutionContext for WorkerPoolContext {
    fn is_on_ui_thread(&self) -> bool {
        self.affinity.is_current()
    }

    fn spawn_background(&self, job: Job) -> Result<(), ExecError> {
        match self.sender.lock().as_ref() {
            Some(tx) => tx.send(job).map_err(|_| ExecError::PoolClosed),
            None => Err(ExecError::PoolClosed),
        }
    }
}

impl Drop for WorkerPoolContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPoolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPoolContext")
            .field("affinity", &self.affinity)
            .field("workers", &self.size())
            .finish()
    }
}

/// Runs jobs on a tokio runtime's blocking pool
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    affinity: UiAffinity,
    handle: tokio::runtime::Handle,
}

impl RuntimeContext {
    pub fn new(handle: tokio::runtime::Handle, affinity: UiAffinity) -> Self {
        Self { affinity, handle }
    }

    /// Borrow the runtime the caller is running inside
    pub fn current(affinity: UiAffinity) -> Result<Self, ExecError> {
        let handle = tokio::runtime::Handle::try_current()?;
        Ok(Self::new(handle, affinity))
    }
}

impl ExecutionContext for RuntimeContext {
    fn is_on_ui_thread(&self) -> bool {
        self.affinity.is_current()
    }

    /// Queue a job on the blocking pool
    ///
    /// A runtime that is shutting down accepts the job and then drops it
    /// unrun; that drop is logged. Failure to start a blocking thread is
    /// returned as [`ExecError::BlockingPool`].
    fn spawn_background(&self, job: Job) -> Result<(), ExecError> {
        let mut unrun = Unrun(Some(job));
        let task = move || {
            if let Some(job) = unrun.0.take() {
                // Join handle is dropped, so panics are reported here
                run_guarded(job, "blocking pool");
            }
        };

        panic::catch_unwind(AssertUnwindSafe(|| {
            drop(self.handle.spawn_blocking(task));
        }))
        .map_err(|payload| ExecError::BlockingPool(panic_message(payload.as_ref())))
    }
}

/// Job slot that reports when it is dropped without running
struct Unrun(Option<Job>);

impl Drop for Unrun {
    fn drop(&mut self) {
        if self.0.is_some() {
            error!("Dropping notification job, runtime shut down before it ran");
        }
    }
}

/// Never on the UI thread; everything runs inline on the caller
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineContext;

impl ExecutionContext for InlineContext {
    fn is_on_ui_thread(&self) -> bool {
        false
    }

    fn spawn_background(&self, job: Job) -> Result<(), ExecError> {
        job();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use std::time::Duration;

    const RECV_TIMEOUT: Duration = Duration::from_secs(2);

    /// Reports the thread a job ran on
    fn thread_probe() -> (Job, Receiver<thread::ThreadId>) {
        let (tx, rx) = bounded(1);
        let job: Job = Box::new(move || {
            let _ = tx.send(thread::current().id());
        });
        (job, rx)
    }

    #[test]
    fn test_affinity_matches_capturing_thread() {
        let affinity = UiAffinity::capture_current();
        assert!(affinity.is_current());

        let seen_elsewhere = thread::spawn(move || affinity.is_current()).join().unwrap();
        assert!(!seen_elsewhere);

        assert!(!UiAffinity::none().is_current());
    }

    #[test]
    fn test_run_now_on_ui_thread_spawns() {
        let ctx = ThreadSpawnContext::new(UiAffinity::capture_current());
        let (job, rx) = thread_probe();

        run_now(&ctx, job);

        let ran_on = rx.recv_timeout(RECV_TIMEOUT).unwrap();
        assert_ne!(ran_on, thread::current().id());
        assert_eq!(ctx.spawned(), 1);
    }

    #[test]
    fn test_run_now_off_ui_thread_runs_inline() {
        let ui = thread::spawn(|| thread::current().id()).join().unwrap();
        let ctx = ThreadSpawnContext::new(UiAffinity::for_thread(ui));
        let (job, rx) = thread_probe();

        run_now(&ctx, job);

        // Already delivered before run_now returned
        assert_eq!(rx.try_recv().unwrap(), thread::current().id());
        assert_eq!(ctx.spawned(), 0);
    }

    #[test]
    fn test_inline_context_never_spawns() {
        let (job, rx) = thread_probe();
        run_now(&InlineContext, job);
        assert_eq!(rx.try_recv().unwrap(), thread::current().id());
    }

    #[test]
    fn test_worker_pool_runs_jobs_off_ui_thread() {
        let pool = WorkerPoolContext::new(2, UiAffinity::capture_current()).unwrap();
        assert_eq!(pool.size(), 2);

        let (job, rx) = thread_probe();
        run_now(&pool, job);

        let ran_on = rx.recv_timeout(RECV_TIMEOUT).unwrap();
        assert_ne!(ran_on, thread::current().id());
    }

    #[test]
    fn test_worker_pool_survives_panicking_job() {
        let pool = WorkerPoolContext::new(1, UiAffinity::capture_current()).unwrap();

        pool.spawn_background(Box::new(|| panic!("render failed"))).unwrap();

        let (job, rx) = thread_probe();
        pool.spawn_background(job).unwrap();
        assert!(rx.recv_timeout(RECV_TIMEOUT).is_ok());
    }

    #[test]
    fn test_worker_pool_rejects_after_shutdown() {
        let pool = WorkerPoolContext::new(1, UiAffinity::none()).unwrap();
        pool.shutdown();
        pool.shutdown();

        let result = pool.spawn_background(Box::new(|| {}));
        assert!(matches!(result, Err(ExecError::PoolClosed)));
        assert_eq!(pool.size(), 0);
    }

    #[test]
    fn test_worker_pool_drains_queue_on_shutdown() {
        let pool = WorkerPoolContext::new(1, UiAffinity::none()).unwrap();
        let counter = Arc::new(AtomicU64::new(0));

        for _ in 0..5 {
            let counter = counter.clone();
            pool.spawn_background(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }
        pool.shutdown();

        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_failed_spawn_drops_job_instead_of_running_inline() {
        let pool = WorkerPoolContext::new(1, UiAffinity::capture_current()).unwrap();
        pool.shutdown();
        let ran = Arc::new(AtomicU64::new(0));

        let counter = ran.clone();
        run_now(
            &pool,
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        thread::sleep(Duration::from_millis(100));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_runtime_context_after_shutdown_drops_job() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let ctx = RuntimeContext::new(runtime.handle().clone(), UiAffinity::capture_current());
        drop(runtime);

        let ran = Arc::new(AtomicU64::new(0));
        let counter = ran.clone();
        let result = ctx.spawn_background(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(result.is_ok());
        thread::sleep(Duration::from_millis(100));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_runtime_context_uses_blocking_pool() {
        let ctx = RuntimeContext::current(UiAffinity::capture_current()).unwrap();
        let (job, rx) = thread_probe();
        let caller = thread::current().id();

        run_now(&ctx, job);

        let ran_on = tokio::task::spawn_blocking(move || rx.recv_timeout(RECV_TIMEOUT))
            .await
            .unwrap()
            .unwrap();
        assert_ne!(ran_on, caller);
    }

    #[test]
    fn test_runtime_context_requires_runtime() {
        let result = RuntimeContext::current(UiAffinity::none());
        assert!(matches!(result, Err(ExecError::NoRuntime(_))));
    }
}
