//! Bounded-concurrency work queues with drain-to-idle semantics.
//!
//! Both queues accept any number of futures through `enqueue_all` and run at
//! most `concurrency` of them at a time. Every task resolves to
//! `Result<(), SyncError>`; the queue logs and counts failures itself, so a
//! failing, panicking or timed-out task never reaches the caller of `drain`.
//!
//! `RateLimitedQueue` additionally waits on a `governor` limiter before each
//! task starts, spacing starts by `interval / interval_cap`.

use std::fmt;
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::error::{Result, SyncError};

type GovernorRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Outcome counts for every task joined by one `drain` call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub succeeded: usize,
    pub failed: usize,
}

struct Shared {
    name: &'static str,
    permits: Semaphore,
    limiter: Option<GovernorRateLimiter>,
    task_timeout: Option<Duration>,
    scheduled: StdMutex<JoinSet<Result<()>>>,
    pending: AtomicUsize,
    // Serializes drains so a second caller cannot return while the first
    // still holds the batch it took.
    draining: Mutex<()>,
}

impl Shared {
    fn new(
        name: &'static str,
        concurrency: usize,
        limiter: Option<GovernorRateLimiter>,
        task_timeout: Option<Duration>,
    ) -> Self {
        let concurrency = concurrency.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            name,
            permits: Semaphore::new(concurrency),
            limiter,
            task_timeout,
            scheduled: StdMutex::new(JoinSet::new()),
            pending: AtomicUsize::new(0),
            draining: Mutex::new(()),
        }
    }

    fn scheduled(&self) -> MutexGuard<'_, JoinSet<Result<()>>> {
        self.scheduled.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run<F>(&self, task: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|err| SyncError::Scheduling {
                queue: self.name,
                reason: err.to_string(),
            })?;
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
        match self.task_timeout {
            Some(limit) => tokio::time::timeout(limit, task)
                .await
                .map_err(|_| SyncError::Timeout(limit))?,
            None => task.await,
        }
    }

    fn enqueue_all<I, F>(self: &Arc<Self>, tasks: I) -> usize
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let mut scheduled = self.scheduled();
        let mut added = 0;
        for task in tasks {
            let shared = Arc::clone(self);
            scheduled.spawn(async move { shared.run(task).await });
            added += 1;
        }
        // Counted under the lock so a concurrent drain never joins a task
        // before it is accounted for.
        self.pending.fetch_add(added, Ordering::SeqCst);
        debug!(queue = self.name, added, "tasks enqueued");
        added
    }

    async fn drain(&self) -> DrainReport {
        let _draining = self.draining.lock().await;
        let mut report = DrainReport::default();
        loop {
            let mut batch = std::mem::take(&mut *self.scheduled());
            if batch.is_empty() {
                break;
            }
            while let Some(joined) = batch.join_next().await {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                match joined {
                    Ok(Ok(())) => report.succeeded += 1,
                    Ok(Err(err)) => {
                        report.failed += 1;
                        warn!(queue = self.name, error = %err, "task failed");
                    }
                    Err(err) => {
                        report.failed += 1;
                        error!(queue = self.name, error = %err, "task aborted");
                    }
                }
            }
        }
        debug!(
            queue = self.name,
            succeeded = report.succeeded,
            failed = report.failed,
            "queue drained"
        );
        report
    }
}

/// Work queue bounded only by concurrency.
#[derive(Clone)]
pub struct ConcurrentQueue {
    shared: Arc<Shared>,
}

impl ConcurrentQueue {
    pub fn new(name: &'static str, concurrency: usize) -> Self {
        Self::with_task_timeout(name, concurrency, None)
    }

    /// Tasks running longer than `task_timeout` are cancelled and counted as failed.
    pub fn with_task_timeout(
        name: &'static str,
        concurrency: usize,
        task_timeout: Option<Duration>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared::new(name, concurrency, None, task_timeout)),
        }
    }

    /// Schedule `tasks` without waiting for any of them. Must be called from
    /// within a tokio runtime.
    pub fn enqueue_all<I, F>(&self, tasks: I) -> usize
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.shared.enqueue_all(tasks)
    }

    /// Wait until every scheduled task, including ones added meanwhile, has finished.
    pub async fn drain(&self) -> DrainReport {
        self.shared.drain().await
    }

    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }
}

impl fmt::Debug for ConcurrentQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentQueue")
            .field("name", &self.shared.name)
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

/// Work queue that also throttles task starts.
///
/// One instance per remote host: the limiter state lives inside the queue, so
/// clones share it and separately constructed queues do not.
#[derive(Clone)]
pub struct RateLimitedQueue {
    shared: Arc<Shared>,
    interval: Duration,
    interval_cap: u32,
}

impl RateLimitedQueue {
    /// At most `interval_cap` task starts per `interval`, spaced evenly at
    /// `interval / interval_cap` with no burst. A zero interval disables
    /// throttling; a zero cap is treated as one.
    pub fn new(
        name: &'static str,
        concurrency: usize,
        interval: Duration,
        interval_cap: u32,
        task_timeout: Option<Duration>,
    ) -> Self {
        let cap = NonZeroU32::new(interval_cap).unwrap_or(NonZeroU32::MIN);
        let limiter = Quota::with_period(interval / cap.get())
            .map(RateLimiter::direct);
        Self {
            shared: Arc::new(Shared::new(name, concurrency, limiter, task_timeout)),
            interval,
            interval_cap: cap.get(),
        }
    }

    pub fn enqueue_all<I, F>(&self, tasks: I) -> usize
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.shared.enqueue_all(tasks)
    }

    pub async fn drain(&self) -> DrainReport {
        self.shared.drain().await
    }

    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }
}

impl fmt::Debug for RateLimitedQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitedQueue")
            .field("name", &self.shared.name)
            .field("interval", &self.interval)
            .field("interval_cap", &self.interval_cap)
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}
