//! API request and response models (DTOs).
//!
//! These models handle serialization between the API layer and the domain
//! models. Field names are camelCase on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{FilterKind, Job, JobId, JobState};
use crate::pipeline::PipelineStats;
use crate::scratch::ScratchUsage;

/// Base path of the filter job API.
pub const FILTER_API_BASE: &str = "/api/filter";

pub fn status_url(id: JobId) -> String {
    format!("{}/status/{}", FILTER_API_BASE, id)
}

pub fn download_url(id: JobId) -> String {
    format!("{}/download/{}", FILTER_API_BASE, id)
}

// ============================================================================
// Pagination
// ============================================================================

/// Pagination parameters for list endpoints.
///
/// - `limit` - Maximum number of items to return (default: 20, max: 100)
/// - `offset` - Number of items to skip (default: 0)
#[derive(Debug, Clone, Deserialize)]
pub struct PaginationParams {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    20
}

/// Upper bound for `limit`.
pub const MAX_PAGE_LIMIT: u32 = 100;

impl PaginationParams {
    pub fn effective_limit(&self) -> u32 {
        self.limit.clamp(1, MAX_PAGE_LIMIT)
    }
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            offset: 0,
        }
    }
}

/// Paginated response wrapper for list endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    /// Total number of items matching the query
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
}

impl<T> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, total: u64, limit: u32, offset: u32) -> Self {
        Self {
            items,
            total,
            limit,
            offset,
        }
    }
}

// ============================================================================
// Filter jobs
// ============================================================================

/// Returned by `POST /api/filter` with `202 Accepted`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobResponse {
    pub job_id: JobId,
    pub status_url: String,
    pub download_url: String,
}

impl SubmitJobResponse {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            status_url: status_url(job_id),
            download_url: download_url(job_id),
        }
    }
}

/// Job status snapshot.
///
/// `result` is the download URL once the job completed; `error` is the
/// failure reason once it failed. Both are `null` otherwise.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub job_id: JobId,
    pub status: JobState,
    pub progress: u8,
    pub result: Option<String>,
    pub error: Option<String>,
    pub steps: Vec<String>,
    pub output_format: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&Job> for JobStatusResponse {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.state,
            progress: job.progress,
            result: (job.state == JobState::Completed).then(|| download_url(job.id)),
            error: job.failure_reason.clone(),
            steps: job.steps.iter().map(|s| s.label()).collect(),
            output_format: job.output_format.to_string(),
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
        }
    }
}

/// Query parameters for `GET /api/filter/jobs`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobListParams {
    pub status: Option<JobState>,
}

/// One entry of `GET /api/filter/kinds`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterKindInfo {
    pub kind: FilterKind,
    pub requires_value: bool,
}

/// `GET /api/filter/stats`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    #[serde(flatten)]
    pub pipeline: PipelineStats,
    pub scratch: ScratchUsage,
}

// ============================================================================
// Health
// ============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub components: Vec<ComponentHealth>,
}

/// Component health status.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: String,
    pub message: Option<String>,
}
