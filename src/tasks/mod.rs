//! Bounded pool for the long per-file jobs of a build.
//!
//! Jobs write media artifacts only. Anything a job would need to report back
//! into the index is captured before it is submitted.

pub mod pool;

use std::fmt;
use std::time::Duration;

pub use pool::TaskPool;

/// Unique identifier for a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

impl JobId {
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        JobId(COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

pub type Callback = Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'static>;

/// A unit of work: a shell command or an in-process callback.
pub enum Job {
    Shell(String),
    Callback(Callback),
}

impl Job {
    pub fn callback<F>(f: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        Job::Callback(Box::new(f))
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Job::Shell(command) => f.debug_tuple("Shell").field(command).finish(),
            Job::Callback(_) => f.write_str("Callback"),
        }
    }
}

/// Final state of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Completed,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub id: JobId,
    pub label: String,
    pub state: JobState,
    pub elapsed: Duration,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        self.state == JobState::Completed
    }
}
