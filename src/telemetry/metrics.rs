//! Metric instruments for pollq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! [`MetricsSink`] turns dispatcher events into measurements.

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram, Meter};

use crate::event::{Event, EventKind, EventSink};

fn meter() -> Meter {
    opentelemetry::global::meter("pollq")
}

/// Counter: tasks submitted to the worker pool.
pub fn tasks_admitted() -> Counter<u64> {
    meter()
        .u64_counter("pollq.tasks.admitted")
        .with_description("Number of tasks forwarded to the worker pool")
        .build()
}

/// Counter: candidates not admitted.
/// Labels: `reason` ("in_flight" | "recently_completed" | "deferred" | "pool_shutdown").
pub fn tasks_rejected() -> Counter<u64> {
    meter()
        .u64_counter("pollq.tasks.rejected")
        .with_description("Number of candidate tasks not admitted")
        .build()
}

/// Counter: finished execution attempts.
/// Labels: `result` ("success" | "failure").
pub fn task_outcomes() -> Counter<u64> {
    meter()
        .u64_counter("pollq.tasks.outcomes")
        .with_description("Number of finished task execution attempts")
        .build()
}

/// Histogram: tick duration in milliseconds.
pub fn tick_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("pollq.tick.duration_ms")
        .with_description("Dispatch tick duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// What a single event contributes to the instruments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Measurement {
    /// Tasks the pool accepted during a tick.
    Admitted(u64),
    Rejected(&'static str),
    Outcome(&'static str),
    TickDuration(f64),
}

/// Map an event to the measurement it records, if any.
///
/// Admissions are taken from the finished tick's report. A forwarded task
/// the pool then refuses never counts as admitted.
pub fn measure<T>(kind: &EventKind<T>) -> Vec<Measurement> {
    match kind {
        EventKind::TaskRejected { reason, .. } => reason
            .rejection_label()
            .map(Measurement::Rejected)
            .into_iter()
            .collect(),
        EventKind::TaskDeferred { .. } => vec![Measurement::Rejected("deferred")],
        EventKind::SubmitRejected { .. } => vec![Measurement::Rejected("pool_shutdown")],
        EventKind::TaskCompleted { .. } => vec![Measurement::Outcome("success")],
        EventKind::TaskFailed { .. } => vec![Measurement::Outcome("failure")],
        EventKind::TickFinished {
            duration_ms,
            report,
            ..
        } => vec![
            Measurement::Admitted(report.admitted as u64),
            Measurement::TickDuration(*duration_ms as f64),
        ],
        _ => Vec::new(),
    }
}

/// Records dispatcher events as OTel metrics.
pub struct MetricsSink {
    admitted: Counter<u64>,
    rejected: Counter<u64>,
    outcomes: Counter<u64>,
    tick_duration: Histogram<f64>,
}

impl Default for MetricsSink {
    fn default() -> Self {
        Self {
            admitted: tasks_admitted(),
            rejected: tasks_rejected(),
            outcomes: task_outcomes(),
            tick_duration: tick_duration_ms(),
        }
    }
}

impl MetricsSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T> EventSink<T> for MetricsSink {
    fn emit(&self, event: &Event<T>) {
        for measurement in measure(&event.kind) {
            match measurement {
                Measurement::Admitted(0) => {}
                Measurement::Admitted(n) => self.admitted.add(n, &[]),
                Measurement::Rejected(reason) => {
                    self.rejected.add(1, &[KeyValue::new("reason", reason)])
                }
                Measurement::Outcome(result) => {
                    self.outcomes.add(1, &[KeyValue::new("result", result)])
                }
                Measurement::TickDuration(ms) => self.tick_duration.record(ms, &[]),
            }
        }
    }
}
