//! Job Purge Service for reclaiming finished jobs.
//!
//! Two independent retention periods apply to terminal jobs: one for the
//! scratch directory holding the input and output artifacts, one for the job
//! record itself. Queued and active jobs are never touched.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::job_store::JobStore;
use crate::Result;
use crate::scratch::ScratchSpace;

/// Configuration for job purging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurgeConfig {
    /// Seconds to keep the artifacts of a finished job.
    /// Set to 0 to keep them until shutdown.
    #[serde(default = "default_artifact_retention_secs")]
    pub artifact_retention_secs: u64,

    /// Seconds to keep the record of a finished job.
    /// Set to 0 to retain all records indefinitely.
    #[serde(default = "default_record_retention_secs")]
    pub record_retention_secs: u64,

    /// Time window for purging (e.g., "02:00-05:00").
    /// If None, purging can run at any time.
    #[serde(default)]
    pub time_window: Option<String>,

    /// Interval between purge checks in seconds.
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
}

fn default_artifact_retention_secs() -> u64 {
    3600 // 1 hour
}

fn default_record_retention_secs() -> u64 {
    86400 // 1 day
}

fn default_check_interval_secs() -> u64 {
    300
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            artifact_retention_secs: default_artifact_retention_secs(),
            record_retention_secs: default_record_retention_secs(),
            time_window: None,
            check_interval_secs: default_check_interval_secs(),
        }
    }
}

impl PurgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_artifact_retention_secs(mut self, secs: u64) -> Self {
        self.artifact_retention_secs = secs;
        self
    }

    pub fn with_record_retention_secs(mut self, secs: u64) -> Self {
        self.record_retention_secs = secs;
        self
    }

    pub fn with_time_window(mut self, window: Option<String>) -> Self {
        self.time_window = window;
        self
    }

    pub fn with_check_interval_secs(mut self, secs: u64) -> Self {
        self.check_interval_secs = secs;
        self
    }
}

/// Parsed time window for purging.
#[derive(Debug, Clone)]
pub(crate) struct TimeWindow {
    start: NaiveTime,
    end: NaiveTime,
}

impl TimeWindow {
    /// Parse a time window string like "02:00-05:00".
    pub(crate) fn parse(window: &str) -> Option<Self> {
        let (start, end) = window.split_once('-')?;
        let start = NaiveTime::parse_from_str(start.trim(), "%H:%M").ok()?;
        let end = NaiveTime::parse_from_str(end.trim(), "%H:%M").ok()?;
        Some(Self { start, end })
    }

    fn is_within(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            time >= self.start && time < self.end
        } else {
            // Overnight, e.g. 23:00-02:00
            time >= self.start || time < self.end
        }
    }
}

/// Result of one purge pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    /// Scratch directories removed.
    pub artifacts_released: usize,
    /// Job records removed.
    pub records_removed: usize,
}

impl PurgeReport {
    pub fn is_empty(&self) -> bool {
        self.artifacts_released == 0 && self.records_removed == 0
    }
}

/// Job Purge Service for automatic cleanup of finished jobs.
#[derive(Clone)]
pub struct JobPurgeService {
    config: PurgeConfig,
    store: Arc<dyn JobStore>,
    scratch: ScratchSpace,
    time_window: Option<TimeWindow>,
}

impl JobPurgeService {
    pub fn new(config: PurgeConfig, store: Arc<dyn JobStore>, scratch: ScratchSpace) -> Self {
        let time_window = config.time_window.as_deref().and_then(TimeWindow::parse);

        if config.time_window.is_some() && time_window.is_none() {
            warn!(
                "Invalid time window format: {:?}. Expected format: HH:MM-HH:MM",
                config.time_window
            );
        }

        Self {
            config,
            store,
            scratch,
            time_window,
        }
    }

    /// Check if purging is allowed at `now` based on the time window.
    pub fn is_purge_allowed(&self, now: DateTime<Utc>) -> bool {
        self.time_window
            .as_ref()
            .is_none_or(|window| window.is_within(now.time()))
    }

    /// Run a single purge pass against the current time.
    pub async fn run_purge(&self) -> Result<PurgeReport> {
        self.run_purge_at(Utc::now()).await
    }

    /// Run a single purge pass as if the current time were `now`.
    pub async fn run_purge_at(&self, now: DateTime<Utc>) -> Result<PurgeReport> {
        let mut report = PurgeReport::default();

        if !self.is_purge_allowed(now) {
            debug!("Purge not allowed outside time window");
            return Ok(report);
        }

        if self.config.artifact_retention_secs > 0 {
            let cutoff = now - secs(self.config.artifact_retention_secs);
            for job in self.store.terminal_before(cutoff).await? {
                match self.scratch.release(&job.scratch_dir).await {
                    Ok(true) => {
                        debug!(job_id = %job.id, "Released artifacts");
                        report.artifacts_released += 1;
                    }
                    Ok(false) => {}
                    Err(e) => warn!(job_id = %job.id, "Failed to release artifacts: {}", e),
                }
            }
        }

        if self.config.record_retention_secs > 0 {
            let cutoff = now - secs(self.config.record_retention_secs);
            for job in self.store.terminal_before(cutoff).await? {
                if let Err(e) = self.scratch.release(&job.scratch_dir).await {
                    warn!(job_id = %job.id, "Failed to release artifacts: {}", e);
                }
                if self.store.remove(job.id).await?.is_some() {
                    report.records_removed += 1;
                }
            }
        }

        if report.is_empty() {
            debug!("No jobs to purge");
        } else {
            info!(
                "Purged {} artifact directories and {} job records",
                report.artifacts_released, report.records_removed
            );
        }

        Ok(report)
    }

    /// Start the background purge task.
    pub fn start_background_task(&self, cancellation_token: CancellationToken) -> JoinHandle<()> {
        let service = self.clone();

        tokio::spawn(async move {
            let period = Duration::from_secs(service.config.check_interval_secs.max(1));
            let mut check_interval = interval(period);

            info!(
                "Job purge service started (artifacts: {}s, records: {}s, interval: {}s)",
                service.config.artifact_retention_secs,
                service.config.record_retention_secs,
                period.as_secs()
            );

            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        info!("Job purge service shutting down");
                        break;
                    }
                    _ = check_interval.tick() => {
                        if let Err(e) = service.run_purge().await {
                            error!("Purge cycle failed: {}", e);
                        }
                    }
                }
            }
        })
    }

    pub fn config(&self) -> &PurgeConfig {
        &self.config
    }
}

/// Retention periods are capped at 100 years.
fn secs(n: u64) -> chrono::Duration {
    const MAX_SECS: u64 = 100 * 365 * 86400;
    chrono::Duration::seconds(n.min(MAX_SECS) as i64)
}
