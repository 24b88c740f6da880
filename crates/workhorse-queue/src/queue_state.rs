//! Per-state job collections owned by the queue.
//!
//! All jobs live in `jobs`; each state has an ordered index of IDs. A job
//! ID is in exactly one index at a time, the one matching `job.state`.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use crate::job::{Job, JobId, JobState};

/// Dispatch key for the waiting collection.
///
/// Sorts by priority descending, then by admission sequence. LIFO jobs use a
/// negated sequence so they sort ahead of FIFO jobs of equal priority, newest
/// first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct WaitKey(Reverse<i32>, i64);

impl WaitKey {
    fn new(priority: i32, seq: u64, lifo: bool) -> Self {
        let seq = seq as i64;
        WaitKey(Reverse(priority), if lifo { -seq } else { seq })
    }
}

/// Ordered set of job IDs with O(log n) removal by ID.
#[derive(Debug)]
pub(crate) struct OrderedIndex<K: Ord + Copy> {
    by_key: BTreeMap<K, JobId>,
    keys: HashMap<JobId, K>,
}

impl<K: Ord + Copy> Default for OrderedIndex<K> {
    fn default() -> Self {
        Self {
            by_key: BTreeMap::new(),
            keys: HashMap::new(),
        }
    }
}

impl<K: Ord + Copy> OrderedIndex<K> {
    pub fn insert(&mut self, key: K, id: JobId) {
        if let Some(old) = self.keys.insert(id.clone(), key) {
            self.by_key.remove(&old);
        }
        self.by_key.insert(key, id);
    }

    pub fn remove(&mut self, id: &JobId) -> bool {
        match self.keys.remove(id) {
            Some(key) => {
                self.by_key.remove(&key);
                true
            }
            None => false,
        }
    }

    pub fn pop_first(&mut self) -> Option<JobId> {
        let (_, id) = self.by_key.pop_first()?;
        self.keys.remove(&id);
        Some(id)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &JobId> {
        self.by_key.values()
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn clear(&mut self) -> Vec<JobId> {
        self.keys.clear();
        std::mem::take(&mut self.by_key).into_values().collect()
    }
}

/// Job counts per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct JobCounts {
    pub waiting: usize,
    pub delayed: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Queue collections. Guarded by the queue's mutex.
#[derive(Debug, Default)]
pub(crate) struct QueueState {
    pub jobs: HashMap<JobId, Job>,
    waiting: OrderedIndex<WaitKey>,
    delayed: OrderedIndex<(DateTime<Utc>, u64)>,
    active: OrderedIndex<u64>,
    completed: OrderedIndex<u64>,
    failed: OrderedIndex<u64>,
    seq: u64,
    next_id: u64,
    pub paused: bool,
    pub closed: bool,
}

impl QueueState {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    /// Allocate the next counter-based job ID.
    pub fn next_job_id(&mut self) -> JobId {
        loop {
            self.next_id += 1;
            let id = JobId::new(self.next_id.to_string());
            // Skip IDs taken by caller-chosen job_id values.
            if !self.jobs.contains_key(&id) {
                return id;
            }
        }
    }

    /// Put a job into the index matching `job.state` and store it.
    pub fn place(&mut self, job: Job) {
        let seq = self.next_seq();
        let id = job.id.clone();
        match job.state {
            JobState::Waiting => {
                self.waiting
                    .insert(WaitKey::new(job.options.priority, seq, job.options.lifo), id.clone());
            }
            JobState::Delayed => {
                let until = job.delay_until.unwrap_or(job.created_at);
                self.delayed.insert((until, seq), id.clone());
            }
            JobState::Active => self.active.insert(seq, id.clone()),
            JobState::Completed => self.completed.insert(seq, id.clone()),
            JobState::Failed => self.failed.insert(seq, id.clone()),
        }
        self.jobs.insert(id, job);
    }

    /// Take a job out of its state index and the job table.
    pub fn take(&mut self, id: &JobId) -> Option<Job> {
        let job = self.jobs.remove(id)?;
        self.index_remove(id, job.state);
        Some(job)
    }

    fn index_remove(&mut self, id: &JobId, state: JobState) -> bool {
        match state {
            JobState::Waiting => self.waiting.remove(id),
            JobState::Delayed => self.delayed.remove(id),
            JobState::Active => self.active.remove(id),
            JobState::Completed => self.completed.remove(id),
            JobState::Failed => self.failed.remove(id),
        }
    }

    /// Pop the first waiting job whose name matches `filter`.
    pub fn pop_waiting(&mut self, filter: Option<&str>) -> Option<Job> {
        let id = match filter {
            None => self.waiting.pop_first()?,
            Some(name) => {
                let id = self
                    .waiting
                    .iter()
                    .find(|id| self.jobs.get(*id).is_some_and(|job| job.name == name))?
                    .clone();
                self.waiting.remove(&id);
                id
            }
        };
        self.jobs.remove(&id)
    }

    /// IDs in a state. Finished states are newest first unless `asc`.
    pub fn ids(&self, state: JobState, asc: bool) -> Vec<JobId> {
        let index: Box<dyn DoubleEndedIterator<Item = &JobId>> = match state {
            JobState::Waiting => Box::new(self.waiting.iter()),
            JobState::Delayed => Box::new(self.delayed.iter()),
            JobState::Active => Box::new(self.active.iter()),
            JobState::Completed => Box::new(self.completed.iter()),
            JobState::Failed => Box::new(self.failed.iter()),
        };
        if state.is_finished() && !asc {
            index.rev().cloned().collect()
        } else {
            index.cloned().collect()
        }
    }

    /// Oldest finished job IDs beyond the newest `keep`.
    pub fn overflow(&self, state: JobState, keep: usize) -> Vec<JobId> {
        let index = match state {
            JobState::Completed => &self.completed,
            JobState::Failed => &self.failed,
            _ => return Vec::new(),
        };
        let excess = index.len().saturating_sub(keep);
        index.iter().take(excess).cloned().collect()
    }

    /// Remove every waiting and delayed job.
    pub fn drain_pending(&mut self) -> Vec<Job> {
        let mut ids = self.waiting.clear();
        ids.extend(self.delayed.clear());
        ids.iter().filter_map(|id| self.jobs.remove(id)).collect()
    }

    pub fn count(&self, state: JobState) -> usize {
        match state {
            JobState::Waiting => self.waiting.len(),
            JobState::Delayed => self.delayed.len(),
            JobState::Active => self.active.len(),
            JobState::Completed => self.completed.len(),
            JobState::Failed => self.failed.len(),
        }
    }

    pub fn counts(&self) -> JobCounts {
        JobCounts {
            waiting: self.waiting.len(),
            delayed: self.delayed.len(),
            active: self.active.len(),
            completed: self.completed.len(),
            failed: self.failed.len(),
        }
    }

    pub fn waiting_is_empty(&self) -> bool {
        self.waiting.is_empty()
    }
}
