//! Service configuration.
//!
//! Everything is read from environment variables (after `.env` is loaded) and
//! every value has a default. A variable that is set but cannot be parsed is
//! a startup error.

mod env;

use std::path::PathBuf;

use crate::api::server::ApiServerConfig;
use crate::pipeline::{
    JobQueueConfig, PipelineManagerConfig, PurgeConfig, TimeWindow, WorkerPoolConfig,
};
use crate::{Error, Result};

pub use env::EnvSource;

/// Default upload limit: 10 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Top-level service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub api: ApiServerConfig,
    pub pipeline: PipelineManagerConfig,
    /// Root of all per-job scratch directories.
    pub scratch_dir: PathBuf,
    /// Directory for rotated log files. Console only when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            api: ApiServerConfig::default(),
            pipeline: PipelineManagerConfig::default(),
            scratch_dir: default_scratch_dir(),
            log_dir: None,
        }
    }
}

fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("filter-service")
}

impl ServiceConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_source(&EnvSource::process())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_source(env: &EnvSource) -> Result<Self> {
        let defaults = Self::default();

        let api = ApiServerConfig {
            bind_address: env
                .string("API_BIND_ADDRESS")
                .unwrap_or(defaults.api.bind_address),
            port: env.parse("API_PORT", defaults.api.port)?,
            enable_cors: env.flag("API_ENABLE_CORS", defaults.api.enable_cors)?,
            body_limit: env.parse("MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
        };

        let worker_pool = WorkerPoolConfig {
            max_workers: env.parse("WORKER_CONCURRENCY", defaults.pipeline.worker_pool.max_workers)?,
            job_timeout_secs: env.parse(
                "JOB_TIMEOUT_SECS",
                defaults.pipeline.worker_pool.job_timeout_secs,
            )?,
            ..defaults.pipeline.worker_pool
        };

        let purge = PurgeConfig {
            artifact_retention_secs: env.parse(
                "ARTIFACT_RETENTION_SECS",
                defaults.pipeline.purge.artifact_retention_secs,
            )?,
            record_retention_secs: env.parse(
                "RECORD_RETENTION_SECS",
                defaults.pipeline.purge.record_retention_secs,
            )?,
            check_interval_secs: env.parse(
                "PURGE_INTERVAL_SECS",
                defaults.pipeline.purge.check_interval_secs,
            )?,
            time_window: env.string("PURGE_TIME_WINDOW"),
        };

        let job_queue = JobQueueConfig {
            warning_threshold: env.parse(
                "QUEUE_WARNING_THRESHOLD",
                defaults.pipeline.job_queue.warning_threshold,
            )?,
            critical_threshold: env.parse(
                "QUEUE_CRITICAL_THRESHOLD",
                defaults.pipeline.job_queue.critical_threshold,
            )?,
        };

        let config = Self {
            api,
            pipeline: PipelineManagerConfig {
                job_queue,
                worker_pool,
                purge,
            },
            scratch_dir: env
                .string("SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.scratch_dir),
            log_dir: env.string("LOG_DIR").map(PathBuf::from),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject combinations that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.worker_pool.max_workers == 0 {
            return Err(Error::config("WORKER_CONCURRENCY must be at least 1"));
        }
        if self.pipeline.worker_pool.job_timeout_secs == 0 {
            return Err(Error::config("JOB_TIMEOUT_SECS must be at least 1"));
        }
        if self.api.body_limit == 0 {
            return Err(Error::config("MAX_UPLOAD_BYTES must be at least 1"));
        }
        if self.pipeline.purge.check_interval_secs == 0 {
            return Err(Error::config("PURGE_INTERVAL_SECS must be at least 1"));
        }
        if let Some(window) = &self.pipeline.purge.time_window
            && TimeWindow::parse(window).is_none()
        {
            return Err(Error::config(format!(
                "PURGE_TIME_WINDOW must look like HH:MM-HH:MM, got '{window}'"
            )));
        }
        if self.pipeline.job_queue.warning_threshold > self.pipeline.job_queue.critical_threshold {
            return Err(Error::config(
                "QUEUE_WARNING_THRESHOLD must not exceed QUEUE_CRITICAL_THRESHOLD",
            ));
        }
        Ok(())
    }
}
