use anyhow::{Context, Result};
use std::panic::{self, AssertUnwindSafe};
use std::process::{Command, Stdio};
use std::sync::{mpsc, Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, warn};

use super::{Job, JobId, JobOutcome, JobState};

/// Counts running jobs and wakes blocked submitters when one finishes.
struct Slots {
    running: Mutex<usize>,
    freed: Condvar,
}

impl Slots {
    fn acquire(&self, capacity: usize) {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        while *running >= capacity {
            running = self
                .freed
                .wait(running)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *running += 1;
    }

    fn release(&self) {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        *running = running.saturating_sub(1);
        self.freed.notify_one();
    }
}

/// Frees the slot even if the job thread unwinds.
struct SlotGuard(Arc<Slots>);

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// Runs at most `capacity` jobs at once, one OS thread per job.
///
/// `submit` blocks while the pool is full. A failing or panicking job is
/// reported in its outcome and never affects its siblings.
pub struct TaskPool {
    capacity: usize,
    slots: Arc<Slots>,
    tx: mpsc::Sender<JobOutcome>,
    rx: mpsc::Receiver<JobOutcome>,
    handles: Vec<JoinHandle<()>>,
}

impl TaskPool {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            capacity: capacity.max(1),
            slots: Arc::new(Slots {
                running: Mutex::new(0),
                freed: Condvar::new(),
            }),
            tx,
            rx,
            handles: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Start `job` as soon as a slot is free.
    pub fn submit(&mut self, label: impl Into<String>, job: Job) -> Result<JobId> {
        let id = JobId::new();
        let label = label.into();

        self.slots.acquire(self.capacity);
        let guard = SlotGuard(self.slots.clone());
        let tx = self.tx.clone();
        let thread_label = label.clone();

        debug!("Starting job {:?} {}", id, label);
        let handle = thread::Builder::new()
            .name(format!("job-{}", id.0))
            .spawn(move || {
                let started = Instant::now();
                let state = run_job(job);
                let _ = tx.send(JobOutcome {
                    id,
                    label: thread_label,
                    state,
                    elapsed: started.elapsed(),
                });
                drop(guard);
            })
            .with_context(|| format!("Failed to start job {}", label))?;

        self.handles.push(handle);
        Ok(id)
    }

    /// Block until every job submitted so far has finished and return their
    /// outcomes in completion order.
    pub fn wait_all(&mut self) -> Vec<JobOutcome> {
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                warn!("Job thread exited abnormally");
            }
        }
        self.rx.try_iter().collect()
    }
}

fn run_job(job: Job) -> JobState {
    match job {
        Job::Shell(command) => run_shell(&command),
        Job::Callback(callback) => match panic::catch_unwind(AssertUnwindSafe(callback)) {
            Ok(Ok(())) => JobState::Completed,
            Ok(Err(e)) => JobState::Failed(format!("{:#}", e)),
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "job panicked".to_string());
                JobState::Failed(message)
            }
        },
    }
}

fn run_shell(command: &str) -> JobState {
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .output();

    match output {
        Ok(output) if output.status.success() => JobState::Completed,
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail = stderr.lines().last().unwrap_or_default();
            JobState::Failed(format!("{}: {}", output.status, tail))
        }
        Err(e) => JobState::Failed(format!("Failed to run shell: {}", e)),
    }
}
