//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use filter_service::domain::{FilterStep, Job, JobId, NewJob, OutputFormat};
use filter_service::pipeline::{
    FilterRegistry, InMemoryJobStore, JobStats, PipelineManager, PipelineManagerConfig,
};
use filter_service::scratch::ScratchSpace;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use parking_lot::{Condvar, Mutex};

/// A `w`×`h` RGBA gradient. Pixel (0,0) has a red channel of 0.
pub fn test_image(w: u32, h: u32) -> DynamicImage {
    let img = RgbaImage::from_fn(w, h, |x, y| {
        Rgba([(x * 20 % 256) as u8, (y * 20 % 256) as u8, 128, 255])
    });
    DynamicImage::ImageRgba8(img)
}

/// PNG-encoded [`test_image`].
pub fn png_bytes(w: u32, h: u32) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    test_image(w, h)
        .write_to(&mut buf, ImageFormat::Png)
        .expect("Failed to encode test image");
    buf.into_inner()
}

/// Build a manager rooted at `root`, without starting it.
pub fn build_manager(
    root: &Path,
    config: PipelineManagerConfig,
    registry: FilterRegistry,
) -> Arc<PipelineManager> {
    let manager = PipelineManager::with_parts(
        config,
        Arc::new(InMemoryJobStore::new()),
        registry,
        ScratchSpace::new(root),
    )
    .expect("Failed to build pipeline manager");
    Arc::new(manager)
}

/// Write a 10×10 PNG into a fresh scratch directory and submit it.
pub async fn submit_png(manager: &PipelineManager, steps: Vec<FilterStep>) -> JobId {
    let scratch = manager
        .scratch()
        .allocate()
        .await
        .expect("Failed to allocate scratch");
    let input = scratch.join("input.png");
    tokio::fs::write(&input, png_bytes(10, 10))
        .await
        .expect("Failed to write input");

    manager
        .submit(NewJob {
            steps,
            input_ref: input,
            scratch_dir: scratch.into_path(),
            output_format: OutputFormat::Png,
            original_filename: Some("photo.png".to_string()),
        })
        .await
        .expect("Failed to submit job")
}

/// Poll until the job is terminal.
pub async fn wait_for_terminal(manager: &PipelineManager, id: JobId) -> Job {
    wait_until(Duration::from_secs(10), || async move {
        manager
            .get_job(id)
            .await
            .expect("Failed to get job")
            .filter(Job::is_terminal)
    })
    .await
    .expect("Job did not finish in time")
}

pub async fn counts(manager: &PipelineManager) -> JobStats {
    manager
        .job_queue()
        .store()
        .counts()
        .await
        .expect("Failed to count jobs")
}

/// Poll `check` every 5ms until it yields `Some` or `timeout` elapses.
pub async fn wait_until<T, F, Fut>(timeout: Duration, mut check: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(value) = check().await {
            return Some(value);
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// A gate filters can block on until the test opens it.
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    cond: Condvar,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Block the calling (blocking-pool) thread until the gate opens.
    pub fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.cond.wait(&mut open);
        }
    }

    pub fn open(&self) {
        *self.open.lock() = true;
        self.cond.notify_all();
    }
}

/// A `multipart/form-data` body.
pub struct Multipart {
    boundary: &'static str,
    body: Vec<u8>,
}

impl Multipart {
    pub fn new() -> Self {
        Self {
            boundary: "filter-service-test-boundary",
            body: Vec::new(),
        }
    }

    pub fn file(mut self, name: &str, filename: &str, bytes: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                self.boundary, name, filename
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(bytes);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                self.boundary, name, value
            )
            .as_bytes(),
        );
        self
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub fn finish(mut self) -> (String, Vec<u8>) {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        (self.content_type(), self.body)
    }
}
