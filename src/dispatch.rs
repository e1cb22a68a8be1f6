//! Delivery lanes for subscription callbacks.
//!
//! Every callback is scheduled onto one of two lanes: the **main** lane, an
//! ordered queue where jobs run in the order they were submitted, or the
//! **background** lane, a thread pool with no ordering guarantee. Both lanes
//! sit behind the [`Dispatch`] trait so the delivery target is a
//! configuration choice of the [`Publisher`](crate::Publisher), not a
//! hard-wired platform queue.
//!
//! ```text
//! publish(v)
//!     │ snapshot jobs (under the publisher lock)
//!     ▼
//! DeliveryContext
//!     ├──► main lane ───────► worker thread, FIFO
//!     └──► background lane ─► thread pool, unordered
//! ```

use std::io;
use std::sync::{mpsc, Arc, OnceLock};
use std::thread;

use futures::executor::ThreadPool;

/// One scheduled callback invocation.
pub type Job = Box<dyn FnOnce() + Send>;

/// An execution context that can run scheduled jobs.
///
/// Implementations either run the job later, possibly on another thread
/// ([`QueueDispatcher`], [`PoolDispatcher`]), or right now on the calling
/// thread ([`InlineDispatcher`]). The publisher never invokes a dispatcher
/// while holding its subscription-list lock, so an implementation is free
/// to execute the job synchronously.
pub trait Dispatch: Send + Sync {
    fn dispatch(&self, job: Job);
}

/// Which lane a subscription's callbacks are delivered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Target {
    /// The single ordered lane. Jobs run in submission order.
    #[default]
    Main,
    /// The unordered pool. No ordering guarantee between jobs.
    Background,
}

/// Ordered lane: a dedicated worker thread draining a FIFO queue.
///
/// The worker exits once every sender is gone and the queue has drained.
pub struct QueueDispatcher {
    queue: mpsc::Sender<Job>,
}

impl QueueDispatcher {
    /// Spawns the worker thread under the given name.
    pub fn spawn(name: &str) -> io::Result<Self> {
        let (queue, jobs) = mpsc::channel::<Job>();
        thread::Builder::new().name(name.to_owned()).spawn(move || {
            while let Ok(job) = jobs.recv() {
                job();
            }
        })?;
        Ok(QueueDispatcher { queue })
    }
}

impl Dispatch for QueueDispatcher {
    fn dispatch(&self, job: Job) {
        if self.queue.send(job).is_err() {
            log::warn!("delivery queue worker is gone, dropping scheduled callback");
        }
    }
}

/// Unordered lane backed by a [`futures`] thread pool.
pub struct PoolDispatcher {
    pool: ThreadPool,
}

impl PoolDispatcher {
    pub fn new() -> io::Result<Self> {
        let pool = ThreadPool::builder().name_prefix("observable-bg-").create()?;
        Ok(PoolDispatcher { pool })
    }
}

impl Dispatch for PoolDispatcher {
    fn dispatch(&self, job: Job) {
        self.pool.spawn_ok(async move { job() });
    }
}

/// Runs every job immediately on the calling thread.
///
/// Useful in tests and in callers that want synchronous delivery.
pub struct InlineDispatcher;

impl Dispatch for InlineDispatcher {
    fn dispatch(&self, job: Job) {
        job();
    }
}

/// The pair of lanes a publisher delivers on.
#[derive(Clone)]
pub struct DeliveryContext {
    main: Arc<dyn Dispatch>,
    background: Arc<dyn Dispatch>,
}

impl DeliveryContext {
    /// Builds the default pair: an ordered worker thread for [`Target::Main`]
    /// and a thread pool for [`Target::Background`].
    pub fn new() -> io::Result<Self> {
        Ok(DeliveryContext {
            main: Arc::new(QueueDispatcher::spawn("observable-main")?),
            background: Arc::new(PoolDispatcher::new()?),
        })
    }

    /// Builds a context from caller-provided dispatchers.
    pub fn with_dispatchers(main: Arc<dyn Dispatch>, background: Arc<dyn Dispatch>) -> Self {
        DeliveryContext { main, background }
    }

    /// A context that runs every callback inline on the publishing thread.
    pub fn inline() -> Self {
        let run_now: Arc<dyn Dispatch> = Arc::new(InlineDispatcher);
        DeliveryContext {
            main: Arc::clone(&run_now),
            background: run_now,
        }
    }

    pub(crate) fn dispatch(&self, target: Target, job: Job) {
        match target {
            Target::Main => self.main.dispatch(job),
            Target::Background => self.background.dispatch(job),
        }
    }
}

/// Process-wide default context, created on first use.
pub(crate) fn global() -> &'static DeliveryContext {
    static GLOBAL: OnceLock<DeliveryContext> = OnceLock::new();
    GLOBAL.get_or_init(|| DeliveryContext::new().expect("failed to start default delivery lanes"))
}
