//! Job pipeline for image filter jobs.
//!
//! The pipeline is responsible for:
//! - Keeping job records and enforcing the job state machine
//! - Dispatching queued jobs to a bounded worker pool
//! - Running each job's filter chain off the async runtime
//! - Purging finished jobs after their retention period

mod executor;
mod job_queue;
mod job_store;
mod manager;
mod processors;
mod purge;
mod worker_pool;

pub use executor::{ExecutionRequest, PipelineExecutor};
pub use job_queue::{JobQueue, JobQueueConfig, QueueDepthStatus};
pub use job_store::{InMemoryJobStore, JobFilter, JobStats, JobStore};
pub use manager::{PipelineEvent, PipelineManager, PipelineManagerConfig, PipelineStats};
pub use processors::{FilterFn, FilterRegistry, FnFilter};
pub(crate) use purge::TimeWindow;
pub use purge::{JobPurgeService, PurgeConfig, PurgeReport};
pub use worker_pool::{SHUTDOWN_REASON, WorkerPool, WorkerPoolConfig};
