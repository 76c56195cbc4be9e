//! Filter pipeline executor.
//!
//! Decodes the input artifact, runs it through the job's filter chain with
//! [`filter_pipeline::Pipeline`], and writes the encoded result next to it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use filter_pipeline::{
    BoxError, CancellationToken, Pipeline, PipelineContext, PipelineError, Processor,
};
use image::{DynamicImage, ImageFormat, ImageReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::processors::{FilterFn, FilterRegistry};
use crate::domain::{FilterStep, Job, JobId, OutputFormat};
use crate::{Error, Result};

/// Everything the executor needs to run one job.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub job_id: JobId,
    pub input_ref: PathBuf,
    pub steps: Vec<FilterStep>,
    pub output_path: PathBuf,
    pub output_format: OutputFormat,
}

impl ExecutionRequest {
    pub fn for_job(job: &Job) -> Self {
        Self {
            job_id: job.id,
            input_ref: job.input_ref.clone(),
            steps: job.steps.clone(),
            output_path: job.output_path(),
            output_format: job.output_format,
        }
    }
}

/// One filter step adapted to the generic pipeline.
struct FilterProcessor {
    label: String,
    value: Option<f64>,
    filter: Arc<dyn FilterFn>,
}

impl Processor<DynamicImage> for FilterProcessor {
    fn process(&mut self, input: DynamicImage) -> std::result::Result<DynamicImage, BoxError> {
        self.filter.apply(input, self.value)
    }

    fn name(&self) -> &str {
        &self.label
    }
}

/// Runs filter chains on the blocking thread pool.
#[derive(Debug, Clone)]
pub struct PipelineExecutor {
    registry: Arc<FilterRegistry>,
}

impl PipelineExecutor {
    /// Create an executor. Fails if any filter kind lacks an implementation.
    pub fn new(registry: FilterRegistry) -> Result<Self> {
        registry.validate()?;
        Ok(Self {
            registry: Arc::new(registry),
        })
    }

    pub fn registry(&self) -> &FilterRegistry {
        &self.registry
    }

    /// Run a job on the blocking pool.
    ///
    /// Progress percentages are sent over `progress` in step order. The
    /// sender is dropped when the task finishes, so a receiver drained after
    /// the handle resolves has seen every update.
    pub fn spawn(
        &self,
        request: ExecutionRequest,
        token: CancellationToken,
        progress: mpsc::UnboundedSender<u8>,
    ) -> JoinHandle<Result<PathBuf>> {
        let executor = self.clone();
        tokio::task::spawn_blocking(move || {
            executor.execute(&request, token, |percent| {
                let _ = progress.send(percent);
            })
        })
    }

    /// Run a job on the current thread.
    pub fn execute<F>(
        &self,
        request: &ExecutionRequest,
        token: CancellationToken,
        mut on_progress: F,
    ) -> Result<PathBuf>
    where
        F: FnMut(u8),
    {
        let context = Arc::new(PipelineContext::with_name(
            request.job_id.to_string(),
            token,
        ));
        let pipeline = self.build_pipeline(&request.steps, context.clone())?;

        let image = decode(&request.input_ref)?;
        let output = pipeline.process(image, |step| {
            debug!(
                job_id = %request.job_id,
                step = step.completed,
                total = step.total,
                "Filter step finished"
            );
            on_progress(step.percent());
        })?;

        let part_path = part_path(&request.output_path);
        if let Err(e) = encode(&output, request.output_format, &part_path) {
            discard(&part_path);
            return Err(e);
        }

        // A cancelled job must not leave an artifact behind. Cancellation that
        // lands after this check is cleaned up by the worker once the rename
        // returns.
        if context.is_cancelled() {
            discard(&part_path);
            return Err(PipelineError::Cancelled.into());
        }

        std::fs::rename(&part_path, &request.output_path).map_err(|e| {
            discard(&part_path);
            Error::io_path("renaming output", &part_path, e)
        })?;

        Ok(request.output_path.clone())
    }

    fn build_pipeline(
        &self,
        steps: &[FilterStep],
        context: Arc<PipelineContext>,
    ) -> Result<Pipeline<DynamicImage>> {
        let mut pipeline = Pipeline::new(context);
        for step in steps {
            let filter = self.registry.get(step.kind()).ok_or_else(|| {
                Error::config(format!("no implementation for filter {}", step.kind()))
            })?;
            pipeline.push(Box::new(FilterProcessor {
                label: step.label(),
                value: step.value(),
                filter,
            }));
        }
        Ok(pipeline)
    }
}

fn decode(path: &Path) -> Result<DynamicImage> {
    let reader = ImageReader::open(path)
        .map_err(|e| Error::io_path("opening input", path, e))?
        .with_guessed_format()
        .map_err(|e| Error::io_path("reading input", path, e))?;
    Ok(reader.decode()?)
}

fn encode(image: &DynamicImage, format: OutputFormat, path: &Path) -> Result<()> {
    match format {
        OutputFormat::Png => image.save_with_format(path, ImageFormat::Png)?,
        // JPEG has no alpha channel.
        OutputFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8())
            .save_with_format(path, ImageFormat::Jpeg)?,
        OutputFormat::Bmp => image.save_with_format(path, ImageFormat::Bmp)?,
    }
    Ok(())
}

fn part_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

fn discard(path: &Path) {
    if let Err(e) = std::fs::remove_file(path)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!("Failed to remove partial output {}: {}", path.display(), e);
    }
}
