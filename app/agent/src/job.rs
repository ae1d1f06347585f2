//! Active job registry.
//!
//! The registry exclusively owns every [`Job`]. Creation is an atomic
//! insert-if-absent keyed by task id, so concurrent arrivals of the same
//! task observe a single job.

use crate::cancel::CancelHandle;
use compact_str::CompactString;
use parking_lot::Mutex;
use protocol::{JobStatus, JobSummary, Task};
use std::{
    collections::{BTreeMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

/// Number of retired task ids remembered for idempotent kills.
const RETIRED_HISTORY: usize = 1024;

/// Agent-side execution record of a task.
#[derive(Debug)]
pub struct Job {
    /// The originating task (immutable).
    pub task: Task,
    started: AtomicBool,
    complete: AtomicBool,
    cancel: CancelHandle,
}

impl Job {
    /// Create a job for `task` with its own cancellation handle.
    pub fn new(task: Task, cancel: CancelHandle) -> Self {
        Self {
            task,
            started: AtomicBool::new(false),
            complete: AtomicBool::new(false),
            cancel,
        }
    }

    /// Task id.
    pub fn id(&self) -> &str {
        &self.task.id
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn mark_started(&self) {
        self.started.store(true, Ordering::Release);
    }

    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    pub fn mark_complete(&self) {
        self.complete.store(true, Ordering::Release);
    }

    /// Cancellation handle of this job.
    pub fn cancel_handle(&self) -> &CancelHandle {
        &self.cancel
    }

    /// Derived listing status.
    pub fn status(&self) -> JobStatus {
        if self.is_started() && !self.is_complete() {
            JobStatus::Started
        } else {
            JobStatus::Queued
        }
    }
}

#[derive(Default)]
struct Entries {
    active: BTreeMap<CompactString, Arc<Job>>,
    retired: VecDeque<CompactString>,
}

/// Thread-safe map of active jobs keyed by task id.
pub struct JobRegistry {
    entries: Mutex<Entries>,
    root: CancelHandle,
}

impl JobRegistry {
    /// Create an empty registry whose jobs are children of `root`.
    pub fn new(root: CancelHandle) -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            root,
        }
    }

    /// Return the job for `task.id`, creating it if absent.
    ///
    /// The flag is `true` when this call created the job.
    pub fn get_or_add(&self, task: Task) -> (Arc<Job>, bool) {
        let mut entries = self.entries.lock();
        if let Some(job) = entries.active.get(&task.id) {
            return (Arc::clone(job), false);
        }
        let job = Arc::new(Job::new(task, self.root.child()));
        entries
            .active
            .insert(job.task.id.clone(), Arc::clone(&job));
        (job, true)
    }

    /// Get an active job by id.
    pub fn get(&self, id: &str) -> Option<Arc<Job>> {
        self.entries.lock().active.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.lock().active.contains_key(id)
    }

    /// Remove a job from the active set, remembering its id.
    pub fn retire(&self, id: &str) -> Option<Arc<Job>> {
        let mut entries = self.entries.lock();
        let job = entries.active.remove(id)?;
        job.mark_complete();
        if entries.retired.len() == RETIRED_HISTORY {
            entries.retired.pop_front();
        }
        entries.retired.push_back(job.task.id.clone());
        Some(job)
    }

    /// Whether `id` belonged to a job that has already been retired.
    pub fn was_retired(&self, id: &str) -> bool {
        self.entries.lock().retired.iter().any(|r| r == id)
    }

    /// Active jobs running `command`.
    pub fn by_command(&self, command: &str) -> Vec<Arc<Job>> {
        self.entries
            .lock()
            .active
            .values()
            .filter(|job| job.task.command == command)
            .cloned()
            .collect()
    }

    /// Listing of active jobs, excluding `exclude`.
    pub fn snapshot(&self, exclude: &str) -> Vec<JobSummary> {
        self.entries
            .lock()
            .active
            .values()
            .filter(|job| job.id() != exclude)
            .map(|job| JobSummary {
                id: job.task.id.clone(),
                command: job.task.command.clone(),
                status: job.status(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().active.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> JobRegistry {
        JobRegistry::new(CancelHandle::new())
    }

    #[test]
    fn get_or_add_is_idempotent() {
        let reg = registry();
        let (a, created_a) = reg.get_or_add(Task::new("t1", "shell", "ls"));
        let (b, created_b) = reg.get_or_add(Task::new("t1", "shell", "whoami"));
        assert!(created_a);
        assert!(!created_b);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.task.parameters, "ls");
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn status_derivation() {
        let job = Job::new(Task::new("t", "shell", ""), CancelHandle::new());
        assert_eq!(job.status(), JobStatus::Queued);
        job.mark_started();
        assert_eq!(job.status(), JobStatus::Started);
        job.mark_complete();
        assert_eq!(job.status(), JobStatus::Queued);
    }

    #[test]
    fn retire_remembers_id() {
        let reg = registry();
        reg.get_or_add(Task::new("t1", "shell", ""));
        assert!(reg.retire("t1").is_some());
        assert!(!reg.contains("t1"));
        assert!(reg.was_retired("t1"));
        assert!(!reg.was_retired("t2"));
        assert!(reg.retire("t1").is_none());
    }

    #[test]
    fn retired_history_is_bounded() {
        let reg = registry();
        for i in 0..=RETIRED_HISTORY {
            let id = format!("t{i}");
            reg.get_or_add(Task::new(id.as_str(), "shell", ""));
            reg.retire(&id);
        }
        assert!(!reg.was_retired("t0"));
        assert!(reg.was_retired(&format!("t{RETIRED_HISTORY}")));
    }

    #[test]
    fn jobs_observe_root_cancellation() {
        let root = CancelHandle::new();
        let reg = JobRegistry::new(root.clone());
        let (job, _) = reg.get_or_add(Task::new("t1", "download", "/tmp/x"));
        root.cancel();
        assert!(job.cancel_handle().is_cancelled());
    }

    #[test]
    fn snapshot_excludes_caller() {
        let reg = registry();
        reg.get_or_add(Task::new("t1", "jobs", ""));
        let (t2, _) = reg.get_or_add(Task::new("t2", "shell", ""));
        t2.mark_started();

        let listing = reg.snapshot("t1");
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].id, "t2");
        assert_eq!(listing[0].status, JobStatus::Started);
    }
}
