//! In-memory job store.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::domain::{Job, JobId, JobOptions, JobStatus};

/// Used when `now + delay` does not fit in an `Instant` (about 30 years).
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + delay`, saturating at a far-future instant instead of overflowing.
pub(crate) fn deadline_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Filter for `JobStore::list`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub job_type: Option<String>,
    pub status: Option<JobStatus>,
    pub limit: Option<usize>,
}

impl JobFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_type(mut self, job_type: impl Into<String>) -> Self {
        self.job_type = Some(job_type.into());
        self
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, job: &Job) -> bool {
        self.job_type.as_deref().is_none_or(|t| t == job.job_type)
            && self.status.is_none_or(|s| s == job.status())
    }
}

/// Per-status counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub waiting: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Store entry: the job plus scheduling bookkeeping that is not part of the job shape.
#[derive(Debug, Clone)]
struct Entry {
    job: Job,
    /// Insertion sequence; breaks ties between equal priority and equal `created_at`.
    seq: u64,
    /// Not eligible for dispatch before this instant (initial delay or retry delay).
    not_before: Option<Instant>,
}

impl Entry {
    fn sort_key(&self) -> (Reverse<i32>, DateTime<Utc>, u64) {
        (Reverse(self.job.priority), self.job.created_at, self.seq)
    }

    fn is_eligible(&self, now: Instant) -> bool {
        self.job.status() == JobStatus::Waiting && self.not_before.is_none_or(|at| at <= now)
    }
}

/// All known jobs plus the set of in-flight job IDs.
///
/// Design:
/// - Single source of truth for job state.
/// - Not synchronized itself; the dispatcher owns it behind one mutex so that a
///   state transition and the in-flight set change together.
/// - Scheduling order of record: priority descending, then `created_at`
///   ascending, then insertion order.
#[derive(Debug, Default)]
pub struct JobStore {
    entries: HashMap<JobId, Entry>,
    in_flight: HashSet<JobId>,
    next_seq: u64,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new job in `waiting` state.
    pub fn create(
        &mut self,
        id: JobId,
        job_type: impl Into<String>,
        payload: serde_json::Value,
        options: JobOptions,
        created_at: DateTime<Utc>,
    ) -> JobId {
        let not_before =
            (options.delay_ms > 0).then(|| deadline_after(Instant::now(), options.delay()));
        let job = Job::new(id, job_type, payload, options, created_at);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            id,
            Entry {
                job,
                seq,
                not_before,
            },
        );
        id
    }

    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.entries.get(&id).map(|entry| &entry.job)
    }

    pub(crate) fn get_mut(&mut self, id: JobId) -> Option<&mut Job> {
        self.entries.get_mut(&id).map(|entry| &mut entry.job)
    }

    /// Jobs matching `filter`, in scheduling order.
    pub fn list(&self, filter: &JobFilter) -> Vec<Job> {
        let mut matching: Vec<&Entry> = self
            .entries
            .values()
            .filter(|entry| filter.matches(&entry.job))
            .collect();
        matching.sort_by_key(|entry| entry.sort_key());
        matching
            .into_iter()
            .take(filter.limit.unwrap_or(usize::MAX))
            .map(|entry| entry.job.clone())
            .collect()
    }

    /// Hard delete.
    pub fn remove(&mut self, id: JobId) -> Option<Job> {
        self.entries.remove(&id).map(|entry| entry.job)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for entry in self.entries.values() {
            match entry.job.status() {
                JobStatus::Waiting => counts.waiting += 1,
                JobStatus::Processing => counts.processing += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Pick the next eligible waiting job, mark it processing and record it as in flight.
    ///
    /// Capacity is the caller's concern: check `in_flight_len` under the same lock.
    pub fn claim_next(&mut self, now: Instant, started_at: DateTime<Utc>) -> Option<Job> {
        let id = self
            .entries
            .values()
            .filter(|entry| entry.is_eligible(now))
            .min_by_key(|entry| entry.sort_key())
            .map(|entry| entry.job.id)?;

        let entry = self.entries.get_mut(&id)?;
        entry.not_before = None;
        entry.job.begin_attempt(started_at);
        self.in_flight.insert(id);
        Some(entry.job.clone())
    }

    /// Drop `id` from the in-flight set. Returns false if it wasn't there.
    pub fn release(&mut self, id: JobId) -> bool {
        self.in_flight.remove(&id)
    }

    /// Make a waiting job ineligible until `until`.
    pub fn defer(&mut self, id: JobId, until: Instant) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.not_before = Some(until);
        }
    }

    /// Earliest future instant at which a waiting job becomes eligible.
    pub fn next_eligible_at(&self, now: Instant) -> Option<Instant> {
        self.entries
            .values()
            .filter(|entry| entry.job.status() == JobStatus::Waiting)
            .filter_map(|entry| entry.not_before)
            .filter(|at| *at > now)
            .min()
    }

    /// Remove terminal jobs whose terminal timestamp is older than `retention`.
    ///
    /// Non-terminal jobs are never touched, regardless of age.
    pub fn reap(&mut self, now: DateTime<Utc>, retention: chrono::Duration) -> Vec<Job> {
        let expired: Vec<JobId> = self
            .entries
            .values()
            .filter(|entry| {
                entry
                    .job
                    .terminal_at()
                    .is_some_and(|at| now.signed_duration_since(at) > retention)
            })
            .map(|entry| entry.job.id)
            .collect();

        expired
            .into_iter()
            .filter_map(|id| self.remove(id))
            .collect()
    }
}
