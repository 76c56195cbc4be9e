//! Job queue: FIFO dispatch of queued jobs on top of a [`JobStore`].
//!
//! Every state change of a job goes through the queue so that it can be
//! broadcast as a [`PipelineEvent`].

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Notify, broadcast};
use tracing::{debug, info, warn};

use super::job_store::JobStore;
use super::manager::PipelineEvent;
use crate::domain::{Job, JobId, JobTransition, NewJob};
use crate::Result;

/// Configuration for the job queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobQueueConfig {
    /// Warning threshold for queue depth.
    pub warning_threshold: usize,
    /// Critical threshold for queue depth.
    pub critical_threshold: usize,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            warning_threshold: 100,
            critical_threshold: 500,
        }
    }
}

/// Status of queue depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueDepthStatus {
    /// Queue depth is normal.
    Normal,
    /// Queue depth is at warning level.
    Warning,
    /// Queue depth is at critical level.
    Critical,
}

/// The job queue service.
pub struct JobQueue {
    config: JobQueueConfig,
    store: Arc<dyn JobStore>,
    /// Ids waiting for a worker, oldest first.
    pending: Mutex<VecDeque<JobId>>,
    /// Notify when new jobs are added.
    notify: Arc<Notify>,
    event_tx: broadcast::Sender<PipelineEvent>,
}

impl JobQueue {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self::with_config(store, JobQueueConfig::default())
    }

    pub fn with_config(store: Arc<dyn JobStore>, config: JobQueueConfig) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            config,
            store,
            pending: Mutex::new(VecDeque::new()),
            notify: Arc::new(Notify::new()),
            event_tx,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Subscribe to job events.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: PipelineEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }

    /// Create a queued job and wake one worker.
    pub async fn enqueue(&self, new_job: NewJob) -> Result<JobId> {
        let steps = new_job.steps.len();
        let job_id = self.store.create(new_job).await?;

        let depth = {
            let mut pending = self.pending.lock();
            pending.push_back(job_id);
            pending.len()
        };

        info!(job_id = %job_id, steps, depth, "Enqueued job");
        self.emit(PipelineEvent::JobEnqueued { job_id });

        if depth == self.config.critical_threshold {
            warn!(depth, "Job queue depth is critical");
            self.emit(PipelineEvent::QueueCritical { depth });
        } else if depth == self.config.warning_threshold {
            warn!(depth, "Job queue depth reached warning level");
            self.emit(PipelineEvent::QueueWarning { depth });
        }

        self.notify.notify_one();
        Ok(job_id)
    }

    /// Pop the oldest queued job and mark it active.
    pub async fn dequeue(&self) -> Result<Option<Job>> {
        loop {
            let Some(job_id) = self.pending.lock().pop_front() else {
                return Ok(None);
            };

            match self.store.transition(job_id, JobTransition::Start).await {
                Ok(job) => {
                    debug!(job_id = %job_id, "Dequeued job");
                    self.emit(PipelineEvent::JobStarted { job_id });
                    return Ok(Some(job));
                }
                Err(crate::Error::NotFound { .. }) => {
                    debug!(job_id = %job_id, "Skipping removed job");
                }
                Err(crate::Error::InvalidStateTransition { from, .. }) => {
                    warn!(job_id = %job_id, state = %from, "Skipping job that is no longer queued");
                }
                Err(e) => {
                    // Keep the job at the head so the next dequeue retries it.
                    self.pending.lock().push_front(job_id);
                    return Err(e);
                }
            }
        }
    }

    /// Record progress for an active job.
    pub async fn report_progress(&self, job_id: JobId, percent: u8) -> Result<()> {
        let job = self.store.set_progress(job_id, percent).await?;
        self.emit(PipelineEvent::JobProgress {
            job_id,
            progress: job.progress,
        });
        Ok(())
    }

    /// Mark a job as completed.
    pub async fn complete(&self, job_id: JobId, output_ref: PathBuf) -> Result<Job> {
        let job = self
            .store
            .transition(job_id, JobTransition::Complete { output_ref })
            .await?;

        let duration_secs = run_duration_secs(&job);
        info!(job_id = %job_id, "Job completed in {:.2}s", duration_secs);
        self.emit(PipelineEvent::JobCompleted {
            job_id,
            duration_secs,
        });
        Ok(job)
    }

    /// Mark a job as failed.
    pub async fn fail(&self, job_id: JobId, reason: &str) -> Result<Job> {
        let job = self
            .store
            .transition(
                job_id,
                JobTransition::Fail {
                    reason: reason.to_string(),
                },
            )
            .await?;

        warn!(job_id = %job_id, progress = job.progress, "Job failed: {}", reason);
        self.emit(PipelineEvent::JobFailed {
            job_id,
            error: reason.to_string(),
        });
        Ok(job)
    }

    pub async fn get_job(&self, job_id: JobId) -> Result<Option<Job>> {
        self.store.get(job_id).await
    }

    /// Get the current queue depth.
    pub fn depth(&self) -> usize {
        self.pending.lock().len()
    }

    /// Get the queue depth status.
    pub fn depth_status(&self) -> QueueDepthStatus {
        let depth = self.depth();
        if depth >= self.config.critical_threshold {
            QueueDepthStatus::Critical
        } else if depth >= self.config.warning_threshold {
            QueueDepthStatus::Warning
        } else {
            QueueDepthStatus::Normal
        }
    }

    /// Get a notifier for new jobs.
    pub fn notifier(&self) -> Arc<Notify> {
        self.notify.clone()
    }
}

fn run_duration_secs(job: &Job) -> f64 {
    match (job.started_at, job.finished_at) {
        (Some(started), Some(finished)) => {
            ((finished - started).num_milliseconds() as f64 / 1000.0).max(0.0)
        }
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FilterKind, FilterStep, JobState, OutputFormat};
    use crate::pipeline::InMemoryJobStore;

    fn new_job() -> NewJob {
        NewJob {
            steps: vec![FilterStep::simple(FilterKind::Sepia).unwrap()],
            input_ref: PathBuf::from("/scratch/input.png"),
            scratch_dir: PathBuf::from("/scratch"),
            output_format: OutputFormat::Png,
            original_filename: None,
        }
    }

    fn queue(config: JobQueueConfig) -> JobQueue {
        JobQueue::with_config(Arc::new(InMemoryJobStore::new()), config)
    }

    #[tokio::test]
    async fn test_fifo_dequeue() {
        let queue = queue(JobQueueConfig::default());
        let first = queue.enqueue(new_job()).await.unwrap();
        let second = queue.enqueue(new_job()).await.unwrap();
        assert_eq!(queue.depth(), 2);

        let job = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(job.id, first);
        assert_eq!(job.state, JobState::Active);
        assert!(job.started_at.is_some());

        let job = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(job.id, second);
        assert!(queue.dequeue().await.unwrap().is_none());
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn test_dequeue_skips_removed_job() {
        let queue = queue(JobQueueConfig::default());
        let gone = queue.enqueue(new_job()).await.unwrap();
        let kept = queue.enqueue(new_job()).await.unwrap();
        queue.store().remove(gone).await.unwrap();

        let job = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(job.id, kept);
    }

    /// Store whose first `Start` transition fails.
    #[derive(Default)]
    struct FlakyStore {
        inner: InMemoryJobStore,
        failed_once: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl JobStore for FlakyStore {
        async fn create(&self, new_job: NewJob) -> Result<JobId> {
            self.inner.create(new_job).await
        }

        async fn get(&self, id: JobId) -> Result<Option<Job>> {
            self.inner.get(id).await
        }

        async fn transition(&self, id: JobId, transition: JobTransition) -> Result<Job> {
            if matches!(transition, JobTransition::Start)
                && !self
                    .failed_once
                    .swap(true, std::sync::atomic::Ordering::SeqCst)
            {
                return Err(crate::Error::Other("store unavailable".to_string()));
            }
            self.inner.transition(id, transition).await
        }

        async fn set_progress(&self, id: JobId, percent: u8) -> Result<Job> {
            self.inner.set_progress(id, percent).await
        }

        async fn list(&self, filter: &crate::pipeline::JobFilter) -> Result<Vec<Job>> {
            self.inner.list(filter).await
        }

        async fn counts(&self) -> Result<crate::pipeline::JobStats> {
            self.inner.counts().await
        }

        async fn remove(&self, id: JobId) -> Result<Option<Job>> {
            self.inner.remove(id).await
        }

        async fn terminal_before(
            &self,
            cutoff: chrono::DateTime<chrono::Utc>,
        ) -> Result<Vec<Job>> {
            self.inner.terminal_before(cutoff).await
        }
    }

    #[tokio::test]
    async fn test_store_error_keeps_job_queued() {
        let queue = JobQueue::new(Arc::new(FlakyStore::default()));
        let first = queue.enqueue(new_job()).await.unwrap();
        let second = queue.enqueue(new_job()).await.unwrap();

        assert!(queue.dequeue().await.is_err());
        assert_eq!(queue.depth(), 2);
        let stored = queue.get_job(first).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Queued);

        // The retry picks the same job up, still ahead of the later one.
        let job = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(job.id, first);
        assert_eq!(job.state, JobState::Active);
        let job = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(job.id, second);
    }

    #[tokio::test]
    async fn test_dequeue_skips_job_no_longer_queued() {
        let queue = queue(JobQueueConfig::default());
        let id = queue.enqueue(new_job()).await.unwrap();
        queue
            .store()
            .transition(id, JobTransition::Start)
            .await
            .unwrap();

        assert!(queue.dequeue().await.unwrap().is_none());
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn test_depth_status() {
        let queue = queue(JobQueueConfig {
            warning_threshold: 2,
            critical_threshold: 3,
        });
        let mut events = queue.subscribe();

        queue.enqueue(new_job()).await.unwrap();
        assert_eq!(queue.depth_status(), QueueDepthStatus::Normal);
        queue.enqueue(new_job()).await.unwrap();
        assert_eq!(queue.depth_status(), QueueDepthStatus::Warning);
        queue.enqueue(new_job()).await.unwrap();
        assert_eq!(queue.depth_status(), QueueDepthStatus::Critical);

        let mut saw_warning = false;
        let mut saw_critical = false;
        while let Ok(event) = events.try_recv() {
            match event {
                PipelineEvent::QueueWarning { depth } => saw_warning = depth == 2,
                PipelineEvent::QueueCritical { depth } => saw_critical = depth == 3,
                _ => {}
            }
        }
        assert!(saw_warning && saw_critical);
    }

    #[tokio::test]
    async fn test_lifecycle_events() {
        let queue = queue(JobQueueConfig::default());
        let mut events = queue.subscribe();

        let id = queue.enqueue(new_job()).await.unwrap();
        queue.dequeue().await.unwrap().unwrap();
        queue.report_progress(id, 100).await.unwrap();
        queue.complete(id, "/scratch/output.png".into()).await.unwrap();

        assert!(matches!(events.try_recv().unwrap(), PipelineEvent::JobEnqueued { job_id } if job_id == id));
        assert!(matches!(events.try_recv().unwrap(), PipelineEvent::JobStarted { .. }));
        assert!(matches!(
            events.try_recv().unwrap(),
            PipelineEvent::JobProgress { progress: 100, .. }
        ));
        assert!(matches!(events.try_recv().unwrap(), PipelineEvent::JobCompleted { .. }));

        // Terminal jobs reject further changes.
        assert!(queue.fail(id, "late").await.is_err());
        assert!(queue.report_progress(id, 50).await.is_err());
    }
}
