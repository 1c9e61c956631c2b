//! In-memory registry of running encoder processes.
//!
//! An entry is created when a job is dispatched (pending) and upgraded with
//! the encoder's pid once the process is spawned. Whoever removes the entry
//! first, the runner on exit or a cancel request, owns the outcome; the
//! other path sees nothing and no-ops.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;

use jclip_models::JobId;

use crate::error::{JobError, JobResult};

#[derive(Debug)]
enum Entry {
    Pending { stop: watch::Sender<bool> },
    Running { pid: Option<u32>, stop: watch::Sender<bool> },
}

impl Entry {
    fn into_stop(self) -> watch::Sender<bool> {
        match self {
            Entry::Pending { stop } | Entry::Running { stop, .. } => stop,
        }
    }
}

/// What `terminate` found for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// A spawned process was asked to stop
    Signalled { pid: Option<u32> },
    /// Job was dispatched but had no process yet; it will never spawn one
    NotStarted,
    /// Nothing registered: the job already finished or never existed
    NotFound,
}

impl Termination {
    /// Whether a process was found.
    pub fn found_process(&self) -> bool {
        matches!(self, Termination::Signalled { .. })
    }
}

#[derive(Debug, Default)]
pub struct ProcessRegistry {
    entries: Mutex<HashMap<JobId, Entry>>,
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `job_id` before its runner is dispatched.
    ///
    /// The returned receiver flips (or closes) when the job is terminated.
    pub fn reserve(&self, job_id: &JobId) -> JobResult<watch::Receiver<bool>> {
        let mut entries = lock_unpoisoned(&self.entries);
        if entries.contains_key(job_id) {
            return Err(JobError::AlreadyRegistered(job_id.to_string()));
        }
        let (stop, stop_rx) = watch::channel(false);
        entries.insert(job_id.clone(), Entry::Pending { stop });
        Ok(stop_rx)
    }

    /// Attach the spawned process to its reservation.
    ///
    /// Returns `false` if the reservation is gone, meaning the job was
    /// cancelled and the caller must kill the process itself.
    pub fn register(&self, job_id: &JobId, pid: Option<u32>) -> JobResult<bool> {
        let mut entries = lock_unpoisoned(&self.entries);
        match entries.remove(job_id) {
            None => Ok(false),
            Some(Entry::Pending { stop }) => {
                entries.insert(job_id.clone(), Entry::Running { pid, stop });
                Ok(true)
            }
            Some(running @ Entry::Running { .. }) => {
                entries.insert(job_id.clone(), running);
                Err(JobError::AlreadyRegistered(job_id.to_string()))
            }
        }
    }

    /// Remove the entry for `job_id` and signal its runner to stop.
    pub fn terminate(&self, job_id: &JobId) -> Termination {
        let entry = lock_unpoisoned(&self.entries).remove(job_id);
        match entry {
            None => Termination::NotFound,
            Some(entry) => {
                let outcome = match &entry {
                    Entry::Pending { .. } => Termination::NotStarted,
                    Entry::Running { pid, .. } => Termination::Signalled { pid: *pid },
                };
                let _ = entry.into_stop().send(true);
                outcome
            }
        }
    }

    /// Terminate every registered job. Returns how many were found.
    pub fn terminate_all(&self) -> usize {
        let drained: Vec<(JobId, Entry)> = lock_unpoisoned(&self.entries).drain().collect();
        let count = drained.len();
        for (_, entry) in drained {
            let _ = entry.into_stop().send(true);
        }
        count
    }

    /// Remove the entry after the process exited.
    ///
    /// Returns `false` if it was already removed by `terminate`.
    pub fn clear(&self, job_id: &JobId) -> bool {
        lock_unpoisoned(&self.entries).remove(job_id).is_some()
    }

    pub fn is_reserved(&self, job_id: &JobId) -> bool {
        lock_unpoisoned(&self.entries).contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_register_clear() {
        let registry = ProcessRegistry::new();
        let id = JobId::new();

        let stop = registry.reserve(&id).unwrap();
        assert!(registry.register(&id, Some(42)).unwrap());
        assert!(registry.clear(&id));
        assert!(!registry.clear(&id));
        assert!(registry.is_empty());
        assert!(!*stop.borrow());
    }

    #[test]
    fn test_double_reserve_and_register_rejected() {
        let registry = ProcessRegistry::new();
        let id = JobId::new();

        registry.reserve(&id).unwrap();
        assert!(registry.reserve(&id).is_err());

        registry.register(&id, Some(1)).unwrap();
        assert!(registry.register(&id, Some(2)).is_err());
        assert_eq!(registry.terminate(&id), Termination::Signalled { pid: Some(1) });
    }

    #[test]
    fn test_terminate_signals_once() {
        let registry = ProcessRegistry::new();
        let id = JobId::new();

        let stop = registry.reserve(&id).unwrap();
        registry.register(&id, Some(7)).unwrap();

        let first = registry.terminate(&id);
        assert!(first.found_process());
        assert!(*stop.borrow());

        assert_eq!(registry.terminate(&id), Termination::NotFound);
        assert!(!registry.clear(&id));
    }

    #[test]
    fn test_terminate_before_spawn() {
        let registry = ProcessRegistry::new();
        let id = JobId::new();

        let _stop = registry.reserve(&id).unwrap();
        assert_eq!(registry.terminate(&id), Termination::NotStarted);
        assert!(!registry.terminate(&id).found_process());
        assert!(!registry.register(&id, Some(9)).unwrap());
    }

    #[test]
    fn test_terminate_all() {
        let registry = ProcessRegistry::new();
        let a = registry.reserve(&JobId::new()).unwrap();
        let b = registry.reserve(&JobId::new()).unwrap();

        assert_eq!(registry.terminate_all(), 2);
        assert!(*a.borrow());
        assert!(*b.borrow());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_terminate_and_clear_remove_exactly_once() {
        use std::sync::Arc;

        for _ in 0..100 {
            let registry = Arc::new(ProcessRegistry::new());
            let id = JobId::new();
            let _stop = registry.reserve(&id).unwrap();
            registry.register(&id, Some(1)).unwrap();

            let r1 = Arc::clone(&registry);
            let id1 = id.clone();
            let canceller = std::thread::spawn(move || r1.terminate(&id1).found_process());
            let r2 = Arc::clone(&registry);
            let id2 = id.clone();
            let runner = std::thread::spawn(move || r2.clear(&id2));

            let terminated = canceller.join().unwrap();
            let cleared = runner.join().unwrap();
            assert!(terminated ^ cleared);
        }
    }
}
