//! Pipeline Manager implementation.
//!
//! Owns the job queue, the worker pool, the executor and the purge service,
//! and is the single entry point the API layer talks to.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::executor::PipelineExecutor;
use super::job_queue::{JobQueue, JobQueueConfig, QueueDepthStatus};
use super::job_store::{InMemoryJobStore, JobFilter, JobStore};
use super::processors::FilterRegistry;
use super::purge::{JobPurgeService, PurgeConfig};
use super::worker_pool::{WorkerPool, WorkerPoolConfig};
use crate::Result;
use crate::domain::{Job, JobId, NewJob};
use crate::scratch::ScratchSpace;

/// Configuration for the Pipeline Manager.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineManagerConfig {
    #[serde(default)]
    pub job_queue: JobQueueConfig,
    #[serde(default)]
    pub worker_pool: WorkerPoolConfig,
    #[serde(default)]
    pub purge: PurgeConfig,
}

/// Events emitted as jobs move through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// Job enqueued.
    JobEnqueued { job_id: JobId },
    /// Job started processing.
    JobStarted { job_id: JobId },
    /// Job progress advanced.
    JobProgress { job_id: JobId, progress: u8 },
    /// Job completed successfully.
    JobCompleted { job_id: JobId, duration_secs: f64 },
    /// Job failed.
    JobFailed { job_id: JobId, error: String },
    /// Queue depth warning.
    QueueWarning { depth: usize },
    /// Queue depth critical.
    QueueCritical { depth: usize },
}

impl PipelineEvent {
    /// The job this event concerns, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            Self::JobEnqueued { job_id }
            | Self::JobStarted { job_id }
            | Self::JobProgress { job_id, .. }
            | Self::JobCompleted { job_id, .. }
            | Self::JobFailed { job_id, .. } => Some(*job_id),
            Self::QueueWarning { .. } | Self::QueueCritical { .. } => None,
        }
    }
}

/// Pipeline statistics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStats {
    pub queued: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    /// Jobs waiting for a worker.
    pub queue_depth: usize,
    pub queue_status: QueueDepthStatus,
    /// Jobs currently executing.
    pub active_workers: usize,
    pub max_workers: usize,
}

/// The Pipeline Manager service.
pub struct PipelineManager {
    config: PipelineManagerConfig,
    job_queue: Arc<JobQueue>,
    worker_pool: WorkerPool,
    executor: Arc<PipelineExecutor>,
    scratch: ScratchSpace,
    purge_service: JobPurgeService,
    cancellation_token: CancellationToken,
    purge_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl PipelineManager {
    /// Create a manager backed by an in-memory store and the built-in filters.
    pub fn new(config: PipelineManagerConfig, scratch: ScratchSpace) -> Result<Self> {
        Self::with_parts(
            config,
            Arc::new(InMemoryJobStore::new()),
            FilterRegistry::with_defaults(),
            scratch,
        )
    }

    /// Create a manager from explicit parts.
    ///
    /// Fails if the registry does not cover every filter kind.
    pub fn with_parts(
        config: PipelineManagerConfig,
        store: Arc<dyn JobStore>,
        registry: FilterRegistry,
        scratch: ScratchSpace,
    ) -> Result<Self> {
        let executor = Arc::new(PipelineExecutor::new(registry)?);
        let job_queue = Arc::new(JobQueue::with_config(
            store.clone(),
            config.job_queue.clone(),
        ));
        let purge_service = JobPurgeService::new(config.purge.clone(), store, scratch.clone());

        Ok(Self {
            worker_pool: WorkerPool::with_config(config.worker_pool.clone()),
            config,
            job_queue,
            executor,
            scratch,
            purge_service,
            cancellation_token: CancellationToken::new(),
            purge_task: parking_lot::Mutex::new(None),
        })
    }

    /// Start workers and the purge task.
    pub fn start(&self) {
        info!("Starting Pipeline Manager");
        self.worker_pool
            .start(self.job_queue.clone(), self.executor.clone());

        let mut purge_task = self.purge_task.lock();
        if purge_task.is_none() && !self.cancellation_token.is_cancelled() {
            *purge_task = Some(
                self.purge_service
                    .start_background_task(self.cancellation_token.child_token()),
            );
        }
    }

    /// Stop workers and the purge task. Jobs still running are failed.
    pub async fn stop(&self) {
        info!("Stopping Pipeline Manager");
        self.worker_pool.stop().await;

        self.cancellation_token.cancel();
        let purge_task = self.purge_task.lock().take();
        if let Some(handle) = purge_task
            && let Err(e) = handle.await
        {
            error!("Purge task ended abnormally: {}", e);
        }

        info!("Pipeline Manager stopped");
    }

    /// Subscribe to pipeline events.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.job_queue.subscribe()
    }

    /// Queue a job for execution.
    pub async fn submit(&self, new_job: NewJob) -> Result<JobId> {
        self.job_queue.enqueue(new_job).await
    }

    pub async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        self.job_queue.get_job(id).await
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        self.job_queue.store().list(filter).await
    }

    pub async fn get_stats(&self) -> Result<PipelineStats> {
        let counts = self.job_queue.store().counts().await?;
        Ok(PipelineStats {
            queued: counts.queued,
            active: counts.active,
            completed: counts.completed,
            failed: counts.failed,
            queue_depth: self.job_queue.depth(),
            queue_status: self.job_queue.depth_status(),
            active_workers: self.worker_pool.active_count(),
            max_workers: self.worker_pool.max_workers(),
        })
    }

    pub fn job_queue(&self) -> &Arc<JobQueue> {
        &self.job_queue
    }

    pub fn scratch(&self) -> &ScratchSpace {
        &self.scratch
    }

    pub fn purge_service(&self) -> &JobPurgeService {
        &self.purge_service
    }

    pub fn registry(&self) -> &FilterRegistry {
        self.executor.registry()
    }

    pub fn config(&self) -> &PipelineManagerConfig {
        &self.config
    }

    /// Whether workers are accepting jobs.
    pub fn is_running(&self) -> bool {
        self.worker_pool.is_running()
    }
}
