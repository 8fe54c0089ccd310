//! Fixed-delay periodic timer.
//!
//! The callback runs on a single spawned task. The next run is scheduled
//! `interval` after the previous one returned, so runs never overlap.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::{Error, Result};

#[derive(Default)]
pub struct Ticker {
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Ticker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `callback` after `initial_delay`, then again `interval` after
    /// each run completes, until [`shutdown`](Self::shutdown).
    ///
    /// A ticker is scheduled once: calling this after shutdown fails with
    /// [`Error::AlreadyStopped`], calling it twice with
    /// [`Error::AlreadyRunning`].
    pub fn schedule_fixed_delay<F, Fut>(
        &self,
        mut callback: F,
        initial_delay: Duration,
        interval: Duration,
    ) -> Result<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.is_shutdown() {
            return Err(Error::AlreadyStopped);
        }
        let mut slot = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(Error::AlreadyRunning);
        }
        let handle = Handle::try_current().map_err(|e| Error::NoRuntime(e.to_string()))?;

        let token = self.shutdown.clone();
        *slot = Some(handle.spawn(async move {
            if !initial_delay.is_zero() {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(initial_delay) => {}
                }
            }
            while !token.is_cancelled() {
                callback().await;
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            debug!("ticker loop exited");
        }));
        Ok(())
    }

    /// Stop scheduling runs. A run already in progress is not interrupted.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Wait for the loop to exit. Returns `false` if `timeout` elapsed first.
    pub async fn await_termination(&self, timeout: Duration) -> bool {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut task) = task else {
            return true;
        };

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!("ticker task ended abnormally: {e}");
                true
            }
            Err(_) => {
                *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
                false
            }
        }
    }
}
