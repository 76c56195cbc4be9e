//! Job store: the single owner of job records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::domain::{Job, JobId, JobState, JobTransition, NewJob};
use crate::{Error, Result};

/// Filter for listing jobs.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub state: Option<JobState>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl JobFilter {
    pub fn with_state(mut self, state: JobState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

/// Per-state job totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStats {
    pub queued: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

impl JobStats {
    pub fn total(&self) -> u64 {
        self.queued + self.active + self.completed + self.failed
    }
}

/// Job store trait.
///
/// Every mutation is atomic per job. Terminal records are never modified.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new `Queued` record and return its id.
    async fn create(&self, new_job: NewJob) -> Result<JobId>;

    /// Snapshot of a job, if it exists.
    async fn get(&self, id: JobId) -> Result<Option<Job>>;

    /// Apply a state transition and return the updated snapshot.
    async fn transition(&self, id: JobId, transition: JobTransition) -> Result<Job>;

    /// Record progress for an active job.
    async fn set_progress(&self, id: JobId, percent: u8) -> Result<Job>;

    /// Jobs matching the filter, newest first.
    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>>;

    async fn counts(&self) -> Result<JobStats>;

    /// Remove a record, returning it if it existed.
    async fn remove(&self, id: JobId) -> Result<Option<Job>>;

    /// Terminal jobs that finished before `cutoff`.
    async fn terminal_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>>;
}

/// In-memory job store.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: DashMap<JobId, Job>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, new_job: NewJob) -> Result<JobId> {
        let id = JobId::new();
        self.jobs.insert(id, Job::new(id, new_job));
        Ok(id)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.jobs.get(&id).map(|job| job.clone()))
    }

    async fn transition(&self, id: JobId, transition: JobTransition) -> Result<Job> {
        let mut job = self
            .jobs
            .get_mut(&id)
            .ok_or_else(|| Error::job_not_found(id))?;
        job.apply(transition)?;
        Ok(job.clone())
    }

    async fn set_progress(&self, id: JobId, percent: u8) -> Result<Job> {
        let mut job = self
            .jobs
            .get_mut(&id)
            .ok_or_else(|| Error::job_not_found(id))?;
        job.set_progress(percent)?;
        Ok(job.clone())
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .jobs
            .iter()
            .filter(|entry| filter.state.is_none_or(|s| entry.state == s))
            .map(|entry| entry.value().clone())
            .collect();

        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let iter = jobs.into_iter().skip(filter.offset);
        Ok(match filter.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        })
    }

    async fn counts(&self) -> Result<JobStats> {
        let mut stats = JobStats::default();
        for entry in self.jobs.iter() {
            match entry.state {
                JobState::Queued => stats.queued += 1,
                JobState::Active => stats.active += 1,
                JobState::Completed => stats.completed += 1,
                JobState::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    async fn remove(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.jobs.remove(&id).map(|(_, job)| job))
    }

    async fn terminal_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>> {
        Ok(self
            .jobs
            .iter()
            .filter(|entry| entry.is_terminal() && entry.finished_at.is_some_and(|t| t < cutoff))
            .map(|entry| entry.value().clone())
            .collect())
    }
}
