//! The per-tick dispatch algorithm.
//!
//! One tick: pull a batch from the source, drop candidates the ledger says
//! are in flight or recently completed, admit what fits in the budget,
//! mark each admitted task forwarded and hand it to the pool, then forget
//! completed tasks the source stopped returning.
//!
//! Ticks run one at a time on the ticker task. Nothing here waits for a
//! task to finish.

use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;
use tracing::{Instrument, debug, error, info, warn};
use uuid::Uuid;

use crate::event::{Emitter, EventKind, EventSink};
use crate::ledger::{Admission, DedupLedger};
use crate::pool::WorkerPool;
use crate::source::TaskSource;
use crate::task::{TaskHandle, panic_message};
use crate::telemetry::dispatch::{record_tick_outcome, start_tick_span};

/// What a single tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Items the source returned.
    pub obtained: usize,
    /// Items submitted to the pool.
    pub admitted: usize,
    pub rejected_in_flight: usize,
    pub rejected_completed: usize,
    /// New items left out because the admission budget was used up.
    pub deferred: usize,
    /// Items the pool refused; they were released again.
    pub submit_rejected: usize,
    /// Completed identities still remembered after pruning.
    pub completed_remaining: usize,
}

pub struct DispatchCycle<S: TaskSource, P> {
    id: Uuid,
    source: S,
    pool: P,
    ledger: Arc<DedupLedger<S::Item>>,
    /// Maximum forwarded tasks; 0 means unbounded.
    admission_budget: usize,
    emitter: Arc<Emitter<S::Item>>,
    ticks: AtomicU64,
}

impl<S: TaskSource, P: WorkerPool> DispatchCycle<S, P> {
    pub fn new(
        source: S,
        pool: P,
        admission_budget: usize,
        sink: Arc<dyn EventSink<S::Item>>,
    ) -> Self {
        Self::with_id(Uuid::new_v4(), source, pool, admission_budget, sink)
    }

    pub(crate) fn with_id(
        id: Uuid,
        source: S,
        pool: P,
        admission_budget: usize,
        sink: Arc<dyn EventSink<S::Item>>,
    ) -> Self {
        Self {
            id,
            source,
            pool,
            ledger: Arc::new(DedupLedger::new()),
            admission_budget,
            emitter: Arc::new(Emitter::new(sink)),
            ticks: AtomicU64::new(0),
        }
    }

    pub fn ledger(&self) -> &Arc<DedupLedger<S::Item>> {
        &self.ledger
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    /// Ticks started so far.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    /// How many more tasks may be forwarded right now, or `None` when
    /// unbounded.
    fn remaining_budget(&self) -> Option<usize> {
        (self.admission_budget > 0)
            .then(|| self.admission_budget.saturating_sub(self.ledger.forwarded_len()))
    }

    /// Run one tick to completion.
    pub async fn tick(&self) -> TickReport {
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        let span = start_tick_span(&self.id, tick);
        let started = Instant::now();

        let report = self.run_tick(tick).instrument(span.clone()).await;

        record_tick_outcome(&span, &report);
        let duration_ms = started.elapsed().as_millis() as u64;
        span.in_scope(|| {
            info!(
                obtained = report.obtained,
                admitted = report.admitted,
                deferred = report.deferred,
                duration_ms,
                "tick finished"
            );
        });
        self.emitter.emit(EventKind::TickFinished {
            tick,
            duration_ms,
            report,
        });
        report
    }

    async fn run_tick(&self, tick: u64) -> TickReport {
        let mut report = TickReport::default();
        self.emitter.emit(EventKind::TickStarted { tick });
        debug!("pulling next tasks from the source");

        let batch = match self.source.pull().await {
            Ok(Some(batch)) if !batch.is_empty() => batch,
            Ok(_) => {
                info!("no tasks obtained from the source");
                self.emitter.emit(EventKind::SourceEmpty { tick });
                report.completed_remaining = self.ledger.completed_len();
                return report;
            }
            Err(e) => {
                error!(error = %e, "task source failed");
                self.emitter.emit(EventKind::SourceFailed {
                    tick,
                    error: e.to_string(),
                });
                report.completed_remaining = self.ledger.completed_len();
                return report;
            }
        };
        report.obtained = batch.len();

        let mut returned = HashSet::with_capacity(batch.len());
        let limit = self.remaining_budget();
        if limit == Some(0) {
            debug!(
                budget = self.admission_budget,
                "admission budget exhausted, admitting nothing this tick"
            );
        }

        for item in batch {
            let handle = self.wrap(Arc::new(item));
            let task = Arc::clone(handle.item());
            debug!(task = ?task, "task obtained");
            self.emitter.emit(EventKind::TaskObtained {
                task: Arc::clone(&task),
            });
            returned.insert(Arc::clone(&task));

            let has_room = limit.is_none_or(|limit| report.admitted < limit);
            let admission = if has_room {
                self.ledger.try_forward(Arc::clone(&task))
            } else {
                self.ledger.check(&task)
            };

            match admission {
                Admission::New if has_room => self.forward(handle, &mut report),
                Admission::New => {
                    debug!(task = ?task, "admission budget reached, deferring task");
                    report.deferred += 1;
                    self.emitter.emit(EventKind::TaskDeferred { task });
                }
                reason => {
                    reason.log_rejection(&*task);
                    if reason == Admission::InFlight {
                        report.rejected_in_flight += 1;
                    } else {
                        report.rejected_completed += 1;
                    }
                    self.emitter.emit(EventKind::TaskRejected { task, reason });
                }
            }
        }

        debug!("cleaning completed tasks");
        match catch_unwind(AssertUnwindSafe(|| self.ledger.prune_completed(&returned))) {
            Ok(remaining) => {
                report.completed_remaining = remaining;
                debug!(remaining, "cleaning finished");
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref()).to_string();
                error!(error = %message, "pruning completed tasks failed");
                self.emitter.emit(EventKind::PruneFailed {
                    tick,
                    error: message,
                });
                report.completed_remaining = self.ledger.completed_len();
            }
        }

        report
    }

    /// Wrap a candidate with hooks that resolve it in the ledger.
    fn wrap(&self, item: Arc<S::Item>) -> TaskHandle<S::Item> {
        let (ledger, emitter) = (Arc::clone(&self.ledger), Arc::clone(&self.emitter));
        let (ledger_err, emitter_err) = (Arc::clone(&self.ledger), Arc::clone(&self.emitter));
        let ledger_abandon = Arc::clone(&self.ledger);

        TaskHandle::from_arc(item)
            .on_success(move |task| {
                ledger.mark_completed(Arc::clone(task));
                info!(task = ?task, "task completed");
                emitter.emit(EventKind::TaskCompleted {
                    task: Arc::clone(task),
                });
            })
            .on_failure(move |task| {
                ledger_err.mark_failed(task);
                warn!(task = ?task, "task failed, it may be admitted again");
                emitter_err.emit(EventKind::TaskFailed {
                    task: Arc::clone(task),
                });
            })
            .on_abandon(move |task| ledger_abandon.mark_failed(task))
    }

    /// Submit a handle whose identity is already marked forwarded.
    fn forward(&self, handle: TaskHandle<S::Item>, report: &mut TickReport) {
        let task = Arc::clone(handle.item());
        self.emitter.emit(EventKind::TaskForwarded {
            task: Arc::clone(&task),
        });

        match self.pool.submit(Box::new(move || {
            handle.execute();
        })) {
            Ok(()) => {
                info!(task = ?task, "task waiting/executing");
                report.admitted += 1;
            }
            Err(e) => {
                warn!(task = ?task, error = %e, "worker pool refused task, releasing it");
                self.ledger.mark_failed(&task);
                report.submit_rejected += 1;
                self.emitter.emit(EventKind::SubmitRejected {
                    task,
                    error: e.to_string(),
                });
            }
        }
    }
}
