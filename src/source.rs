//! Task sources: where each tick pulls its candidates from.
//!
//! A source may return the same task (by identity) on every pull, inside
//! one batch, or long after the task has finished. Filtering that is the
//! dispatcher's job, not the source's.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::Result;
use crate::task::Task;

pub trait TaskSource: Send + Sync + 'static {
    type Item: Task;

    /// Next batch of candidates. `Ok(None)` and an empty batch both mean
    /// there is nothing to do this tick.
    fn pull(&self) -> impl Future<Output = Result<Option<Vec<Self::Item>>>> + Send;
}

impl<S: TaskSource> TaskSource for Arc<S> {
    type Item = S::Item;

    fn pull(&self) -> impl Future<Output = Result<Option<Vec<Self::Item>>>> + Send {
        (**self).pull()
    }
}

/// Source backed by a synchronous closure.
///
/// A producer that only ever yields one task at a time fits as
/// `FnSource::new(move || next().map(|t| vec![t]))`.
pub struct FnSource<F> {
    f: F,
}

impl<F> FnSource<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<T, F> TaskSource for FnSource<F>
where
    T: Task,
    F: Fn() -> Option<Vec<T>> + Send + Sync + 'static,
{
    type Item = T;

    async fn pull(&self) -> Result<Option<Vec<T>>> {
        Ok((self.f)())
    }
}

/// Source that plays back fixed batches, then repeats a fallback batch.
///
/// Without a fallback it returns `None` once the script runs out.
pub struct ScriptedSource<T> {
    script: Mutex<VecDeque<Vec<T>>>,
    fallback: Option<Vec<T>>,
    pulls: AtomicU64,
}

impl<T: Task + Clone> ScriptedSource<T> {
    pub fn new(batches: impl IntoIterator<Item = Vec<T>>) -> Self {
        Self {
            script: Mutex::new(batches.into_iter().collect()),
            fallback: None,
            pulls: AtomicU64::new(0),
        }
    }

    /// Batch returned on every pull after the script is exhausted.
    pub fn then_repeat(mut self, batch: Vec<T>) -> Self {
        self.fallback = Some(batch);
        self
    }

    /// Number of pulls served so far.
    pub fn pulls(&self) -> u64 {
        self.pulls.load(Ordering::SeqCst)
    }

    fn next_batch(&self) -> Option<Vec<T>> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        scripted.or_else(|| self.fallback.clone())
    }
}

impl<T: Task + Clone> TaskSource for ScriptedSource<T> {
    type Item = T;

    async fn pull(&self) -> Result<Option<Vec<T>>> {
        Ok(self.next_batch())
    }
}
