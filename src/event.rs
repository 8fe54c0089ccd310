//! Structured events emitted by the dispatcher.
//!
//! Every admission decision and every task resolution is reported to an
//! [`EventSink`]. Sinks are injected into the dispatcher, so tests and
//! embedders can observe a tick without capturing process-wide logs.
//! Tracing output is emitted independently of the sink.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cycle::TickReport;
use crate::ledger::Admission;

/// A structured event emitted by the dispatcher.
#[derive(Debug, Clone, Serialize)]
pub struct Event<T> {
    /// Monotonic sequence number, shared by the tick task and the workers.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind<T>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind<T> {
    TickStarted {
        tick: u64,
    },
    /// The source had nothing this tick.
    SourceEmpty {
        tick: u64,
    },
    SourceFailed {
        tick: u64,
        error: String,
    },
    TaskObtained {
        task: Arc<T>,
    },
    TaskRejected {
        task: Arc<T>,
        reason: Admission,
    },
    /// Passed dedup but did not fit in the admission budget.
    TaskDeferred {
        task: Arc<T>,
    },
    TaskForwarded {
        task: Arc<T>,
    },
    SubmitRejected {
        task: Arc<T>,
        error: String,
    },
    TaskCompleted {
        task: Arc<T>,
    },
    TaskFailed {
        task: Arc<T>,
    },
    PruneFailed {
        tick: u64,
        error: String,
    },
    TickFinished {
        tick: u64,
        duration_ms: u64,
        report: TickReport,
    },
}

/// Receives every event the dispatcher emits.
pub trait EventSink<T>: Send + Sync {
    fn emit(&self, event: &Event<T>);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl<T> EventSink<T> for NoopSink {
    fn emit(&self, _event: &Event<T>) {}
}

/// Keeps every event in memory.
pub struct MemorySink<T> {
    events: Mutex<Vec<Event<T>>>,
}

impl<T> Default for MemorySink<T> {
    fn default() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }
}

impl<T: Clone> MemorySink<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event<T>> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn kinds(&self) -> Vec<EventKind<T>> {
        self.events().into_iter().map(|e| e.kind).collect()
    }
}

impl<T: Clone + Send + Sync> EventSink<T> for MemorySink<T> {
    fn emit(&self, event: &Event<T>) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

impl<T, A: EventSink<T>, B: EventSink<T>> EventSink<T> for (A, B) {
    fn emit(&self, event: &Event<T>) {
        self.0.emit(event);
        self.1.emit(event);
    }
}

impl<T, S: EventSink<T> + ?Sized> EventSink<T> for Arc<S> {
    fn emit(&self, event: &Event<T>) {
        (**self).emit(event);
    }
}

/// Stamps events with a sequence number and hands them to the sink.
pub(crate) struct Emitter<T> {
    sink: Arc<dyn EventSink<T>>,
    seq: AtomicU64,
}

impl<T> Emitter<T> {
    pub(crate) fn new(sink: Arc<dyn EventSink<T>>) -> Self {
        Self {
            sink,
            seq: AtomicU64::new(0),
        }
    }

    pub(crate) fn emit(&self, kind: EventKind<T>) {
        let event = Event {
            seq: self.seq.fetch_add(1, Ordering::Relaxed) + 1,
            timestamp: Utc::now(),
            kind,
        };
        self.sink.emit(&event);
    }
}
