//! Dispatcher lifecycle: configuration, start, stop.
//!
//! A dispatcher moves `Created -> Running -> Stopped` and never leaves
//! `Stopped`; restarting requires a new instance.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cycle::DispatchCycle;
use crate::error::{Error, Result};
use crate::event::{EventSink, NoopSink};
use crate::ledger::DedupLedger;
use crate::pool::WorkerPool;
use crate::source::TaskSource;
use crate::ticker::Ticker;

/// Everything a dispatcher needs, validated by [`Dispatcher::new`].
pub struct DispatcherConfig<S: TaskSource, P> {
    pub source: S,
    pub pool: P,
    /// Delay between the end of one tick and the start of the next.
    pub interval: Duration,
    /// Maximum concurrently forwarded tasks. 0 means unbounded.
    pub admission_budget: usize,
    pub sink: Arc<dyn EventSink<S::Item>>,
}

impl<S: TaskSource, P: WorkerPool> DispatcherConfig<S, P> {
    pub fn new(source: S, pool: P, interval: Duration) -> Self {
        Self {
            source,
            pool,
            interval,
            admission_budget: 0,
            sink: Arc::new(NoopSink),
        }
    }

    pub fn admission_budget(mut self, budget: usize) -> Self {
        self.admission_budget = budget;
        self
    }

    pub fn sink(mut self, sink: impl EventSink<S::Item> + 'static) -> Self {
        self.sink = Arc::new(sink);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatcherState {
    Created,
    Running,
    Stopped,
}

impl std::fmt::Display for DispatcherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DispatcherState::Created => "created",
            DispatcherState::Running => "running",
            DispatcherState::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// Polls a task source on a fixed delay and feeds a worker pool.
pub struct Dispatcher<S: TaskSource, P: WorkerPool> {
    id: Uuid,
    cycle: Arc<DispatchCycle<S, P>>,
    ticker: Ticker,
    interval: Duration,
    admission_budget: usize,
    state: Mutex<DispatcherState>,
}

impl<S: TaskSource, P: WorkerPool> Dispatcher<S, P> {
    /// Validate the config and build a dispatcher in the `Created` state.
    pub fn new(config: DispatcherConfig<S, P>) -> Result<Self> {
        if config.interval.is_zero() {
            return Err(Error::InvalidConfig(
                "polling interval must be greater than zero".to_string(),
            ));
        }

        let id = Uuid::new_v4();
        let cycle = DispatchCycle::with_id(
            id,
            config.source,
            config.pool,
            config.admission_budget,
            config.sink,
        );

        Ok(Self {
            id,
            cycle: Arc::new(cycle),
            ticker: Ticker::new(),
            interval: config.interval,
            admission_budget: config.admission_budget,
            state: Mutex::new(DispatcherState::Created),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, DispatcherState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start polling: one tick now, then one every `interval` after the
    /// previous tick returns.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> Result<&Self> {
        let mut state = self.lock_state();
        match *state {
            DispatcherState::Created => {}
            DispatcherState::Running => return Err(Error::AlreadyRunning),
            DispatcherState::Stopped => return Err(Error::AlreadyStopped),
        }

        info!(
            dispatcher_id = %self.id,
            interval_ms = self.interval.as_millis() as u64,
            admission_budget = self.admission_budget,
            "starting task distributor"
        );

        let cycle = Arc::clone(&self.cycle);
        self.ticker.schedule_fixed_delay(
            move || {
                let cycle = Arc::clone(&cycle);
                async move {
                    cycle.tick().await;
                }
            },
            Duration::ZERO,
            self.interval,
        )?;

        *state = DispatcherState::Running;
        info!(dispatcher_id = %self.id, "task distributor started");
        Ok(self)
    }

    /// Stop ticking, then shut the pool down, waiting up to `timeout` for
    /// each. In-flight tasks are never cancelled; an elapsed timeout is
    /// logged and otherwise ignored.
    pub async fn stop(&self, timeout: Duration) -> &Self {
        {
            let mut state = self.lock_state();
            if *state == DispatcherState::Stopped {
                debug!(dispatcher_id = %self.id, "dispatcher already stopped");
                return self;
            }
            *state = DispatcherState::Stopped;
        }

        info!(
            dispatcher_id = %self.id,
            timeout_ms = timeout.as_millis() as u64,
            "requesting stop, waiting for in-flight tasks"
        );

        info!("stopping the ticker");
        self.ticker.shutdown();
        if !self.ticker.await_termination(timeout).await {
            warn!("ticker did not stop within timeout, a tick may still be running");
        }

        info!("stopping the worker pool");
        let pool = self.cycle.pool();
        pool.shutdown();
        if !pool.await_termination(timeout).await {
            warn!(
                forwarded = self.cycle.ledger().forwarded_len(),
                "worker pool did not drain within timeout, tasks are still running"
            );
        }

        info!(dispatcher_id = %self.id, "dispatcher stopped");
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> DispatcherState {
        *self.lock_state()
    }

    pub fn ledger(&self) -> &Arc<DedupLedger<S::Item>> {
        self.cycle.ledger()
    }

    pub fn source(&self) -> &S {
        self.cycle.source()
    }

    pub fn pool(&self) -> &P {
        self.cycle.pool()
    }

    /// Ticks started so far.
    pub fn ticks(&self) -> u64 {
        self.cycle.ticks()
    }
}

impl<S: TaskSource, P: WorkerPool> Drop for Dispatcher<S, P> {
    fn drop(&mut self) {
        self.ticker.shutdown();
    }
}
