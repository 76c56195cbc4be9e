//! Worker pool implementation for filter jobs.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::executor::{ExecutionRequest, PipelineExecutor};
use super::job_queue::JobQueue;
use crate::domain::{Job, JobId};

/// Failure reason recorded for jobs interrupted by shutdown.
pub const SHUTDOWN_REASON: &str = "service shutting down";

/// Configuration for a worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Maximum concurrent workers.
    pub max_workers: usize,
    /// Job timeout in seconds.
    ///
    /// A job exceeding this duration is failed and its slot freed. The
    /// running filter step is cancelled at the next step boundary.
    pub job_timeout_secs: u64,
    /// Poll interval in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_workers: 10,
            job_timeout_secs: 300,
            poll_interval_ms: 100,
        }
    }
}

/// How a single job run ended, from the worker's point of view.
enum RunOutcome {
    Finished(crate::Result<PathBuf>),
    Panicked(String),
    TimedOut,
    Shutdown,
}

/// A worker pool for processing jobs.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    /// Semaphore for concurrency control.
    semaphore: Arc<Semaphore>,
    /// Jobs currently executing.
    active_workers: Arc<AtomicUsize>,
    cancellation_token: CancellationToken,
    started: AtomicBool,
    tasks: parking_lot::Mutex<Option<JoinSet<()>>>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::with_config(WorkerPoolConfig::default())
    }

    pub fn with_config(config: WorkerPoolConfig) -> Self {
        let max_workers = config.max_workers.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_workers)),
            config: WorkerPoolConfig {
                max_workers,
                ..config
            },
            active_workers: Arc::new(AtomicUsize::new(0)),
            cancellation_token: CancellationToken::new(),
            started: AtomicBool::new(false),
            tasks: parking_lot::Mutex::new(Some(JoinSet::new())),
        }
    }

    /// Start the worker pool. Calls after the first are ignored.
    pub fn start(&self, job_queue: Arc<JobQueue>, executor: Arc<PipelineExecutor>) {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Worker pool already started");
            return;
        }

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let job_timeout = Duration::from_secs(self.config.job_timeout_secs);

        info!(
            "Starting worker pool with {} max workers (job timeout {}s)",
            self.config.max_workers, self.config.job_timeout_secs
        );

        let mut tasks = self.tasks.lock();
        let Some(join_set) = tasks.as_mut() else {
            warn!("Worker pool already stopped, not starting");
            return;
        };

        for i in 0..self.config.max_workers {
            let worker = Worker {
                index: i,
                semaphore: self.semaphore.clone(),
                active_workers: self.active_workers.clone(),
                cancellation_token: self.cancellation_token.clone(),
                job_queue: job_queue.clone(),
                executor: executor.clone(),
                poll_interval,
                job_timeout,
            };
            join_set.spawn(worker.run());
        }
    }

    /// Stop the worker pool, failing any job still running.
    pub async fn stop(&self) {
        info!("Stopping worker pool");
        self.cancellation_token.cancel();

        // Take the join set out of the mutex before awaiting
        let join_set = {
            let mut tasks = self.tasks.lock();
            tasks.take()
        };

        if let Some(mut join_set) = join_set {
            while let Some(res) = join_set.join_next().await {
                if let Err(e) = res {
                    error!("Worker task ended abnormally: {}", e);
                }
            }
        }

        info!("Worker pool stopped");
    }

    /// Number of worker tasks spawned and not yet joined.
    pub fn worker_count(&self) -> usize {
        self.tasks.lock().as_ref().map_or(0, |set| set.len())
    }

    /// Get the number of jobs currently executing.
    pub fn active_count(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    pub fn max_workers(&self) -> usize {
        self.config.max_workers
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    /// Check if the pool is running.
    pub fn is_running(&self) -> bool {
        !self.cancellation_token.is_cancelled()
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

struct Worker {
    index: usize,
    semaphore: Arc<Semaphore>,
    active_workers: Arc<AtomicUsize>,
    cancellation_token: CancellationToken,
    job_queue: Arc<JobQueue>,
    executor: Arc<PipelineExecutor>,
    poll_interval: Duration,
    job_timeout: Duration,
}

impl Worker {
    async fn run(self) {
        let notifier = self.job_queue.notifier();
        debug!("Worker {} started", self.index);

        loop {
            tokio::select! {
                _ = self.cancellation_token.cancelled() => break,
                _ = notifier.notified() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            // Drain the queue before waiting again.
            while !self.cancellation_token.is_cancelled() {
                let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
                    break;
                };

                let job = match self.job_queue.dequeue().await {
                    Ok(Some(job)) => job,
                    Ok(None) => break,
                    Err(e) => {
                        error!("Error dequeuing job: {}", e);
                        break;
                    }
                };

                self.active_workers.fetch_add(1, Ordering::SeqCst);
                self.process(job).await;
                self.active_workers.fetch_sub(1, Ordering::SeqCst);
                drop(permit);
            }
        }

        debug!("Worker {} shutting down", self.index);
    }

    async fn process(&self, job: Job) {
        let job_id = job.id;
        debug!(job_id = %job_id, worker = self.index, steps = job.steps.len(), "Processing job");

        let token = self.cancellation_token.child_token();
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let mut handle =
            self.executor
                .spawn(ExecutionRequest::for_job(&job), token.clone(), progress_tx);

        let run = async {
            loop {
                tokio::select! {
                    Some(percent) = progress_rx.recv() => {
                        self.report_progress(&job, percent).await;
                    }
                    res = &mut handle => {
                        return match res {
                            Ok(result) => RunOutcome::Finished(result),
                            Err(e) => RunOutcome::Panicked(e.to_string()),
                        };
                    }
                }
            }
        };

        let outcome = tokio::select! {
            res = tokio::time::timeout(self.job_timeout, run) => {
                res.unwrap_or(RunOutcome::TimedOut)
            }
            _ = self.cancellation_token.cancelled() => RunOutcome::Shutdown,
        };

        // Every update sent before the executor finished is already queued.
        while let Ok(percent) = progress_rx.try_recv() {
            self.report_progress(&job, percent).await;
        }

        let recorded = match outcome {
            RunOutcome::Finished(Ok(output)) => {
                self.job_queue.complete(job_id, output).await.map(|_| ())
            }
            RunOutcome::Finished(Err(e)) => {
                let reason = match &e {
                    crate::Error::Pipeline(p)
                        if p.is_cancelled() && self.cancellation_token.is_cancelled() =>
                    {
                        SHUTDOWN_REASON.to_string()
                    }
                    _ => e.to_string(),
                };
                self.job_queue.fail(job_id, &reason).await.map(|_| ())
            }
            RunOutcome::Panicked(msg) => {
                error!(job_id = %job_id, "Filter task panicked: {}", msg);
                self.job_queue
                    .fail(job_id, "filter execution panicked")
                    .await
                    .map(|_| ())
            }
            RunOutcome::TimedOut => {
                token.cancel();
                discard_late_output(job_id, handle);
                let reason = format!("job timed out after {}s", self.job_timeout.as_secs());
                self.job_queue.fail(job_id, &reason).await.map(|_| ())
            }
            RunOutcome::Shutdown => {
                token.cancel();
                discard_late_output(job_id, handle);
                self.job_queue.fail(job_id, SHUTDOWN_REASON).await.map(|_| ())
            }
        };

        if let Err(e) = recorded {
            error!(job_id = %job_id, "Failed to record job outcome: {}", e);
        }
    }

    async fn report_progress(&self, job: &Job, percent: u8) {
        if let Err(e) = self.job_queue.report_progress(job.id, percent).await {
            debug!(job_id = %job.id, "Dropping progress update: {}", e);
        }
    }
}

/// Wait for an abandoned execution and delete any artifact it still publishes.
fn discard_late_output(job_id: JobId, handle: JoinHandle<crate::Result<PathBuf>>) {
    tokio::spawn(async move {
        if let Ok(Ok(output)) = handle.await {
            match tokio::fs::remove_file(&output).await {
                Ok(()) => debug!(job_id = %job_id, "Removed output of abandoned job"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(job_id = %job_id, "Failed to remove abandoned output: {}", e),
            }
        }
    });
}
