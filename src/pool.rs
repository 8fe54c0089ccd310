//! Worker pools that execute admitted tasks off the tick task.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::error::{Error, Result};

/// A unit of work handed to a pool.
///
/// A job that is dropped without being called releases its task's
/// identity, so a pool may discard jobs it cannot run.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub trait WorkerPool: Send + Sync + 'static {
    /// Schedule a job and return immediately.
    ///
    /// Fails with [`Error::PoolShutdown`] once [`shutdown`](Self::shutdown)
    /// has been called.
    fn submit(&self, job: Job) -> Result<()>;

    /// Stop accepting jobs. Jobs already submitted keep running.
    fn shutdown(&self);

    fn is_shutdown(&self) -> bool;

    /// Wait for submitted jobs to drain after shutdown. Returns `false` if
    /// the timeout elapsed first.
    fn await_termination(&self, timeout: Duration) -> impl Future<Output = bool> + Send;
}

impl<P: WorkerPool> WorkerPool for Arc<P> {
    fn submit(&self, job: Job) -> Result<()> {
        (**self).submit(job)
    }

    fn shutdown(&self) {
        (**self).shutdown()
    }

    fn is_shutdown(&self) -> bool {
        (**self).is_shutdown()
    }

    fn await_termination(&self, timeout: Duration) -> impl Future<Output = bool> + Send {
        (**self).await_termination(timeout)
    }
}

/// Runs jobs on Tokio's blocking thread pool.
///
/// With a worker limit, at most that many jobs execute at once and the
/// rest wait for a permit; without one, every job starts immediately.
pub struct BlockingPool {
    handle: Handle,
    permits: Option<Arc<Semaphore>>,
    tracker: TaskTracker,
}

impl BlockingPool {
    /// Pool running at most `max_workers` jobs concurrently.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(max_workers: usize) -> Result<Self> {
        if max_workers == 0 {
            return Err(Error::InvalidConfig(
                "worker pool needs at least one worker".to_string(),
            ));
        }
        Self::build(Some(Arc::new(Semaphore::new(max_workers))))
    }

    /// Pool with no concurrency limit.
    pub fn unbounded() -> Result<Self> {
        Self::build(None)
    }

    fn build(permits: Option<Arc<Semaphore>>) -> Result<Self> {
        let handle = Handle::try_current().map_err(|e| Error::NoRuntime(e.to_string()))?;
        Ok(Self {
            handle,
            permits,
            tracker: TaskTracker::new(),
        })
    }

    /// Jobs submitted and not yet finished, queued ones included.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }
}

impl WorkerPool for BlockingPool {
    fn submit(&self, job: Job) -> Result<()> {
        if self.tracker.is_closed() {
            return Err(Error::PoolShutdown);
        }

        let permits = self.permits.clone();
        self.tracker.spawn_on(
            async move {
                let _permit = match permits {
                    Some(semaphore) => match semaphore.acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(e) => {
                            error!("worker permit unavailable, dropping job: {e}");
                            return;
                        }
                    },
                    None => None,
                };
                if let Err(e) = tokio::task::spawn_blocking(job).await {
                    error!("worker job aborted: {e}");
                }
            },
            &self.handle,
        );
        debug!(in_flight = self.tracker.len(), "job submitted");
        Ok(())
    }

    fn shutdown(&self) {
        if self.tracker.close() {
            info!(in_flight = self.tracker.len(), "worker pool shutting down");
        }
    }

    fn is_shutdown(&self) -> bool {
        self.tracker.is_closed()
    }

    async fn await_termination(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_ok()
    }
}
