//! Simulated workloads described in TOML.
//!
//! A plan lists tasks (identity, simulated duration, whether they fail)
//! and the batches a scripted source returns on successive polls:
//!
//! ```toml
//! admission_budget = 1
//! polls = [[1, 2, 3], [2, 3]]
//! then_repeat = [3]
//!
//! [[tasks]]
//! id = 1
//! duration_ms = 200
//!
//! [[tasks]]
//! id = 3
//! fail = true
//! ```
//!
//! Tasks named in `polls` but not declared under `[[tasks]]` succeed
//! instantly.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::source::ScriptedSource;
use crate::task::{Task, TaskError};

#[derive(Debug, Clone, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
    /// Batch returned by each poll, in order.
    pub polls: Vec<Vec<u32>>,
    /// Batch returned by every poll after `polls` runs out.
    pub then_repeat: Option<Vec<u32>>,
    pub interval_ms: Option<u64>,
    pub admission_budget: Option<usize>,
    pub workers: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskSpec {
    pub id: u32,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub fail: bool,
}

/// Ids of simulated tasks in the order their executions finished.
#[derive(Debug, Default)]
pub struct RunLog {
    runs: Mutex<Vec<u32>>,
}

impl RunLog {
    fn record(&self, id: u32) {
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id);
    }

    pub fn runs(&self) -> Vec<u32> {
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of executions of `id`, successful or not.
    pub fn count(&self, id: u32) -> usize {
        self.runs().iter().filter(|run| **run == id).count()
    }
}

/// A task that sleeps, logs its run, then succeeds or fails.
///
/// Identity is the id alone.
#[derive(Clone, Serialize)]
pub struct SimTask {
    pub id: u32,
    pub duration_ms: u64,
    pub fail: bool,
    #[serde(skip)]
    log: Arc<RunLog>,
}

impl SimTask {
    pub fn new(spec: &TaskSpec, log: Arc<RunLog>) -> Self {
        Self {
            id: spec.id,
            duration_ms: spec.duration_ms,
            fail: spec.fail,
            log,
        }
    }
}

impl Task for SimTask {
    fn run(&self) -> std::result::Result<(), TaskError> {
        if self.duration_ms > 0 {
            std::thread::sleep(Duration::from_millis(self.duration_ms));
        }
        self.log.record(self.id);
        if self.fail {
            return Err(format!("simulated failure in task {}", self.id).into());
        }
        Ok(())
    }
}

impl PartialEq for SimTask {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SimTask {}

impl Hash for SimTask {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for SimTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SimTask#{}", self.id)
    }
}

impl Plan {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("bad plan: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Build the scripted source for this plan; executions land in `log`.
    pub fn source(&self, log: &Arc<RunLog>) -> Result<ScriptedSource<SimTask>> {
        let mut specs: HashMap<u32, &TaskSpec> = HashMap::new();
        for spec in &self.tasks {
            if specs.insert(spec.id, spec).is_some() {
                return Err(Error::Config(format!("task {} declared twice", spec.id)));
            }
        }

        let batch = |ids: &[u32]| -> Vec<SimTask> {
            ids.iter()
                .map(|id| match specs.get(id) {
                    Some(spec) => SimTask::new(spec, Arc::clone(log)),
                    None => SimTask::new(
                        &TaskSpec {
                            id: *id,
                            duration_ms: 0,
                            fail: false,
                        },
                        Arc::clone(log),
                    ),
                })
                .collect()
        };

        let source = ScriptedSource::new(self.polls.iter().map(|ids| batch(ids.as_slice())));
        Ok(match &self.then_repeat {
            Some(ids) => source.then_repeat(batch(ids.as_slice())),
            None => source,
        })
    }
}
