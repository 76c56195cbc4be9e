//! # Filter Pipeline
//!
//! This crate provides the step-chaining core used by the filter service.
//! It is deliberately unaware of jobs, HTTP or image formats: a pipeline is an
//! ordered list of opaque processors over some artifact type `T`.
//!
//! ## Features
//!
//! - Generic `Processor<T>` trait for a single, swappable transformation step
//! - Generic `Pipeline<T>` that applies processors strictly in order
//! - Cooperative cancellation between steps via `PipelineContext`
//! - Coarse, step-indexed progress reporting
//!
//! ## License
//!
//! MIT License
//!

use thiserror::Error;

mod context;
pub mod pipeline;
pub mod processor;
pub mod progress;

#[cfg(test)]
mod test_utils;

/// Re-export key traits and types
pub use context::PipelineContext;
pub use pipeline::Pipeline;
pub use processor::{BoxError, FnProcessor, Processor};
pub use progress::{StepProgress, step_percent};

pub use tokio_util::sync::CancellationToken;

/// Common error type for pipeline operations
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Step {step} ({stage}) failed: {source}")]
    Step {
        /// 1-indexed position of the failing step.
        step: usize,
        stage: String,
        #[source]
        source: BoxError,
    },
}

impl PipelineError {
    /// Whether this error came from cancellation rather than a failing step.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }
}
