//! Filter job routes.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | POST | `/api/filter` | Upload an image with a filter chain, returns `202` |
//! | GET | `/api/filter/status/{id}` | Job state, progress, result or error |
//! | GET | `/api/filter/download/{id}` | Stream the produced image |
//! | GET | `/api/filter/jobs` | List jobs, newest first |
//! | GET | `/api/filter/stats` | Queue, worker and scratch statistics |
//! | GET | `/api/filter/kinds` | Supported filter kinds |

use axum::{
    Json, Router,
    body::Body,
    extract::{
        DefaultBodyLimit, Multipart, Path, Query, Request, State,
        multipart::{Field, MultipartError, MultipartRejection},
        rejection::QueryRejection,
    },
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use image::ImageFormat;
use strum::IntoEnumIterator;
use tokio::io::AsyncWriteExt;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{debug, info, warn};

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{
    FilterKindInfo, JobListParams, JobStatusResponse, PaginatedResponse, PaginationParams,
    StatsResponse, SubmitJobResponse,
};
use crate::api::server::AppState;
use crate::domain::{
    FilterKind, FilterStep, Job, JobId, JobState, NewJob, OutputFormat, parse_filter_steps,
};
use crate::pipeline::JobFilter;
use crate::scratch::ScratchDir;
use crate::utils::filename::{attachment_disposition, extension_of, sanitize_upload_name};

/// Room for the multipart framing and the text fields on top of the file.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Leading bytes kept for format sniffing.
const SNIFF_BYTES: usize = 64;

/// Create the filter job router.
pub fn router(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route(
            "/",
            post(submit_job).layer(DefaultBodyLimit::max(
                max_upload_bytes.saturating_add(MULTIPART_OVERHEAD_BYTES),
            )),
        )
        .route("/status/{id}", get(get_status))
        .route("/download/{id}", get(download))
        .route("/jobs", get(list_jobs))
        .route("/stats", get(get_stats))
        .route("/kinds", get(list_kinds))
}

fn parse_job_id(raw: &str) -> ApiResult<JobId> {
    raw.parse()
        .map_err(|_| ApiError::bad_request(format!("'{}' is not a valid job id", raw)))
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::payload_too_large("Upload exceeds the size limit")
    } else {
        ApiError::bad_request(err.body_text())
    }
}

/// The uploaded file as written to scratch.
struct Upload {
    path: std::path::PathBuf,
    original_filename: Option<String>,
    sniffed: Option<OutputFormat>,
}

/// Everything read from the multipart body.
#[derive(Default)]
struct Submission {
    upload: Option<Upload>,
    steps: Option<Vec<FilterStep>>,
    format: Option<OutputFormat>,
}

fn output_format_of(format: ImageFormat) -> Option<OutputFormat> {
    match format {
        ImageFormat::Png => Some(OutputFormat::Png),
        ImageFormat::Jpeg => Some(OutputFormat::Jpeg),
        ImageFormat::Bmp => Some(OutputFormat::Bmp),
        _ => None,
    }
}

/// Stream a file field into the scratch directory, enforcing the size cap.
async fn receive_file(
    mut field: Field<'_>,
    scratch: &ScratchDir,
    max_bytes: usize,
) -> ApiResult<Upload> {
    let original_filename = field.file_name().and_then(sanitize_upload_name);
    let ext = original_filename
        .as_deref()
        .and_then(extension_of)
        .unwrap_or_else(|| "bin".to_string());
    let path = scratch.join(format!("input.{}", ext));

    let mut file = tokio::fs::File::create(&path)
        .await
        .map_err(|e| crate::Error::io_path("creating upload file", &path, e))?;

    let mut written = 0usize;
    let mut head = Vec::with_capacity(SNIFF_BYTES);
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        written = written.saturating_add(chunk.len());
        if written > max_bytes {
            return Err(ApiError::payload_too_large(format!(
                "Upload exceeds the {} byte limit",
                max_bytes
            )));
        }
        if head.len() < SNIFF_BYTES {
            let take = (SNIFF_BYTES - head.len()).min(chunk.len());
            head.extend_from_slice(&chunk[..take]);
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| crate::Error::io_path("writing upload file", &path, e))?;
    }
    file.flush()
        .await
        .map_err(|e| crate::Error::io_path("writing upload file", &path, e))?;

    if written == 0 {
        return Err(ApiError::bad_request("Uploaded file is empty"));
    }

    let sniffed = image::guess_format(&head)
        .ok()
        .and_then(output_format_of)
        .or_else(|| {
            original_filename
                .as_deref()
                .and_then(extension_of)
                .and_then(|e| OutputFormat::from_extension(&e))
        });

    debug!(path = %path.display(), bytes = written, "Upload stored");
    Ok(Upload {
        path,
        original_filename,
        sniffed,
    })
}

async fn read_submission(
    mut multipart: Multipart,
    scratch: &ScratchDir,
    max_bytes: usize,
) -> ApiResult<Submission> {
    let mut submission = Submission::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        match field.name() {
            Some("file") => {
                if submission.upload.is_some() {
                    return Err(ApiError::bad_request("Only one 'file' field is accepted"));
                }
                submission.upload = Some(receive_file(field, scratch, max_bytes).await?);
            }
            Some("filters") => {
                let text = field.text().await.map_err(multipart_error)?;
                submission.steps = Some(parse_filter_steps(&text)?);
            }
            Some("format") => {
                let text = field.text().await.map_err(multipart_error)?;
                let text = text.trim();
                if !text.is_empty() {
                    submission.format = Some(text.parse()?);
                }
            }
            other => {
                debug!(field = ?other, "Ignoring unknown multipart field");
            }
        }
    }

    Ok(submission)
}

/// Submit a filter job.
///
/// # Endpoint
///
/// `POST /api/filter`
///
/// # Request Body
///
/// `multipart/form-data` with:
///
/// - `file` (required) - the image
/// - `filters` (required) - JSON array, e.g. `[{"type":"blur","value":2},"grayscale"]`
/// - `format` (optional) - `png`, `jpeg` or `bmp`; defaults to the input's format
///
/// # Errors
///
/// - `400 Bad Request` - missing `file` or `filters`, or a malformed body
/// - `413 Payload Too Large` - the file exceeds the upload limit
/// - `422 Unprocessable Entity` - invalid filter chain or format
///
/// No job is created when the request is rejected, and the scratch directory
/// allocated for it is released.
async fn submit_job(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<impl IntoResponse> {
    let multipart = multipart.map_err(|e| ApiError::bad_request(e.body_text()))?;

    let manager = &state.pipeline_manager;
    let scratch = manager.scratch().allocate().await?;

    match accept_submission(&state, multipart, &scratch).await {
        Ok(job_id) => {
            info!(job_id = %job_id, "Filter job accepted");
            Ok((StatusCode::ACCEPTED, Json(SubmitJobResponse::new(job_id))))
        }
        Err(err) => {
            if let Err(e) = manager.scratch().release(scratch.path()).await {
                warn!(path = %scratch.path().display(), error = %e, "Failed to release scratch directory");
            }
            Err(err)
        }
    }
}

async fn accept_submission(
    state: &AppState,
    multipart: Multipart,
    scratch: &ScratchDir,
) -> ApiResult<JobId> {
    let submission = read_submission(multipart, scratch, state.max_upload_bytes).await?;

    let upload = submission
        .upload
        .ok_or_else(|| ApiError::bad_request("Missing 'file' field"))?;
    let steps = submission
        .steps
        .ok_or_else(|| ApiError::bad_request("Missing 'filters' field"))?;
    let output_format = submission
        .format
        .or(upload.sniffed)
        .unwrap_or(OutputFormat::Png);

    let job_id = state
        .pipeline_manager
        .submit(NewJob {
            steps,
            input_ref: upload.path,
            scratch_dir: scratch.path().to_path_buf(),
            output_format,
            original_filename: upload.original_filename,
        })
        .await?;

    Ok(job_id)
}

async fn find_job(state: &AppState, raw_id: &str) -> ApiResult<Job> {
    let id = parse_job_id(raw_id)?;
    state
        .pipeline_manager
        .get_job(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Job with id '{}' not found", id)))
}

/// Get a job's status.
///
/// # Endpoint
///
/// `GET /api/filter/status/{id}`
///
/// # Errors
///
/// - `400 Bad Request` - `id` is not a job id
/// - `404 Not Found` - no such job
async fn get_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobStatusResponse>> {
    let job = find_job(&state, &id).await?;
    Ok(Json(JobStatusResponse::from(&job)))
}

/// Download a completed job's artifact.
///
/// # Endpoint
///
/// `GET /api/filter/download/{id}`
///
/// # Errors
///
/// - `404 Not Found` - no such job
/// - `409 Conflict` (`NOT_READY`) - the job is queued or active
/// - `409 Conflict` (`JOB_FAILED`) - the job failed
/// - `410 Gone` (`ARTIFACT_EXPIRED`) - the artifact was purged
async fn download(
    State(state): State<AppState>,
    Path(id): Path<String>,
    request: Request,
) -> ApiResult<Response> {
    let job = find_job(&state, &id).await?;

    let output = match job.state {
        JobState::Queued | JobState::Active => {
            return Err(ApiError::not_ready(format!(
                "Job {} is {} ({}%)",
                job.id, job.state, job.progress
            ))
            .with_details(serde_json::json!({
                "status": job.state,
                "progress": job.progress,
            })));
        }
        JobState::Failed => {
            return Err(ApiError::job_failed(format!(
                "Job {} failed: {}",
                job.id,
                job.failure_reason.as_deref().unwrap_or("unknown error")
            )));
        }
        JobState::Completed => job
            .output_ref
            .clone()
            .ok_or_else(|| ApiError::internal("Completed job has no output"))?,
    };

    let expired = || ApiError::artifact_expired(format!("Output of job {} has expired", job.id));

    if !tokio::fs::try_exists(&output).await.unwrap_or(false) {
        return Err(expired());
    }

    let response = ServeFile::new(&output)
        .oneshot(request)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to serve file: {}", e)))?;

    if response.status() == StatusCode::NOT_FOUND {
        return Err(expired());
    }

    let mut response = response.map(Body::new);
    if response.status().is_success()
        && let Ok(value) = HeaderValue::from_str(&attachment_disposition(&job.download_filename()))
    {
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

/// List jobs, newest first.
///
/// # Endpoint
///
/// `GET /api/filter/jobs?status=&limit=&offset=`
async fn list_jobs(
    State(state): State<AppState>,
    pagination: Result<Query<PaginationParams>, QueryRejection>,
    params: Result<Query<JobListParams>, QueryRejection>,
) -> ApiResult<Json<PaginatedResponse<JobStatusResponse>>> {
    let Query(pagination) = pagination?;
    let Query(params) = params?;
    let limit = pagination.effective_limit();
    let mut filter = JobFilter::default()
        .with_limit(limit as usize)
        .with_offset(pagination.offset as usize);
    if let Some(status) = params.status {
        filter = filter.with_state(status);
    }

    let manager = &state.pipeline_manager;
    let jobs = manager.list_jobs(&filter).await?;
    let counts = manager.job_queue().store().counts().await?;
    let total = match params.status {
        Some(JobState::Queued) => counts.queued,
        Some(JobState::Active) => counts.active,
        Some(JobState::Completed) => counts.completed,
        Some(JobState::Failed) => counts.failed,
        None => counts.total(),
    };

    let items = jobs.iter().map(JobStatusResponse::from).collect();
    Ok(Json(PaginatedResponse::new(
        items,
        total,
        limit,
        pagination.offset,
    )))
}

/// Pipeline statistics.
///
/// # Endpoint
///
/// `GET /api/filter/stats`
async fn get_stats(State(state): State<AppState>) -> ApiResult<Json<StatsResponse>> {
    let manager = &state.pipeline_manager;
    let pipeline = manager.get_stats().await?;
    let scratch = manager.scratch().usage().await?;
    Ok(Json(StatsResponse { pipeline, scratch }))
}

/// Supported filter kinds.
///
/// # Endpoint
///
/// `GET /api/filter/kinds`
async fn list_kinds() -> Json<Vec<FilterKindInfo>> {
    Json(
        FilterKind::iter()
            .map(|kind| FilterKindInfo {
                kind,
                requires_value: kind.requires_value(),
            })
            .collect(),
    )
}
