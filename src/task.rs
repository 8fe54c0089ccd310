//! Work items and the handle that wraps one execution attempt.
//!
//! A [`Task`] carries its own identity through `Eq + Hash`: two tasks that
//! compare equal are the same unit of work, no matter how many times the
//! source hands them back. The dispatcher never looks inside a task.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::{debug, error, warn};

/// Error a task reports when its execution fails.
pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

/// A unit of work produced by a task source.
pub trait Task: Eq + Hash + fmt::Debug + Send + Sync + 'static {
    /// Execute the task on the calling thread.
    fn run(&self) -> std::result::Result<(), TaskError>;
}

type Hook<T> = Box<dyn FnOnce(&Arc<T>) + Send + 'static>;

/// How an execution attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    /// The task returned an error or panicked.
    Failed(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded)
    }
}

/// One task plus the hooks that run after it.
///
/// Equality and hashing delegate to the wrapped task. A fresh handle is
/// created for every item a poll returns. A handle dropped without being
/// executed (its job discarded by a pool) fires the abandon hook instead.
pub struct TaskHandle<T: Task> {
    item: Arc<T>,
    on_success: Option<Hook<T>>,
    on_failure: Option<Hook<T>>,
    on_abandon: Option<Hook<T>>,
}

impl<T: Task> TaskHandle<T> {
    /// Wrap a task with no hooks attached.
    pub fn wrap(item: T) -> Self {
        Self::from_arc(Arc::new(item))
    }

    pub fn from_arc(item: Arc<T>) -> Self {
        Self {
            item,
            on_success: None,
            on_failure: None,
            on_abandon: None,
        }
    }

    /// Hook fired after the task ran to completion.
    pub fn on_success(mut self, hook: impl FnOnce(&Arc<T>) + Send + 'static) -> Self {
        self.on_success = Some(Box::new(hook));
        self
    }

    /// Hook fired after the task returned an error or panicked.
    pub fn on_failure(mut self, hook: impl FnOnce(&Arc<T>) + Send + 'static) -> Self {
        self.on_failure = Some(Box::new(hook));
        self
    }

    /// Hook fired if the handle is dropped before [`execute`](Self::execute).
    pub fn on_abandon(mut self, hook: impl FnOnce(&Arc<T>) + Send + 'static) -> Self {
        self.on_abandon = Some(Box::new(hook));
        self
    }

    pub fn item(&self) -> &Arc<T> {
        &self.item
    }

    /// Run the task, then fire exactly one hook.
    ///
    /// Consumes the handle, so a handle can only ever be executed once.
    pub fn execute(mut self) -> Outcome {
        self.on_abandon = None;
        let item = Arc::clone(&self.item);

        let failure = match catch_unwind(AssertUnwindSafe(|| item.run())) {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(panic) => Some(format!("panicked: {}", panic_message(panic.as_ref()))),
        };

        match failure {
            None => {
                debug!(task = ?item, "task finished");
                if let Some(hook) = self.on_success.take() {
                    hook(&item);
                }
                Outcome::Succeeded
            }
            Some(message) => {
                error!(task = ?item, error = %message, "task execution failed");
                if let Some(hook) = self.on_failure.take() {
                    hook(&item);
                }
                Outcome::Failed(message)
            }
        }
    }
}

impl<T: Task> Drop for TaskHandle<T> {
    fn drop(&mut self) {
        if let Some(hook) = self.on_abandon.take() {
            warn!(task = ?self.item, "task dropped before it ran");
            hook(&self.item);
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}

impl<T: Task> PartialEq for TaskHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.item == other.item
    }
}

impl<T: Task> Eq for TaskHandle<T> {}

impl<T: Task> Hash for TaskHandle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.item.hash(state);
    }
}

impl<T: Task> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle").field("item", &self.item).finish()
    }
}
