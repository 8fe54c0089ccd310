//! # pollq
//!
//! Periodic task-polling dispatcher.
//!
//! A [`Dispatcher`] pulls batches of tasks from a [`TaskSource`] on a fixed
//! delay, drops candidates that are still running or recently finished,
//! caps how many tasks are in flight, and hands the rest to a
//! [`WorkerPool`]. The source may repeat itself freely; each task identity
//! executes at most once at a time.

pub mod config;
pub mod cycle;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod ledger;
pub mod plan;
pub mod pool;
pub mod source;
pub mod task;
pub mod telemetry;
pub mod ticker;

pub use cycle::{DispatchCycle, TickReport};
pub use dispatcher::{Dispatcher, DispatcherConfig, DispatcherState};
pub use error::{Error, Result};
pub use event::{Event, EventKind, EventSink, MemorySink, NoopSink};
pub use ledger::{Admission, DedupLedger};
pub use pool::{BlockingPool, Job, WorkerPool};
pub use source::{FnSource, ScriptedSource, TaskSource};
pub use task::{Outcome, Task, TaskError, TaskHandle};
