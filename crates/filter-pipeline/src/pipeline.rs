//! # Generic Pipeline Implementation
//!
//! This module provides a generic pipeline implementation that chains together
//! processors to form a complete artifact transformation.
//!
//! ## Usage
//!
//! Create a new `Pipeline<T>` and add processors that implement the `Processor<T>`
//! trait. Then run an artifact through the pipeline. Each processor receives the
//! output of the previous one; the first receives the original input.
//!

use crate::{PipelineContext, PipelineError, Processor, StepProgress};
use std::sync::Arc;
use tracing::{debug, trace};

/// A generic pipeline for transforming an artifact through a series of processors.
///
/// Steps never run in parallel and are never reordered. The first failing step
/// aborts the run; its partial output is dropped.
pub struct Pipeline<T> {
    processors: Vec<Box<dyn Processor<T>>>,
    context: Arc<PipelineContext>,
}

impl<T> Pipeline<T> {
    /// Create a new empty pipeline with the given processing context.
    pub fn new(context: Arc<PipelineContext>) -> Self {
        Self {
            processors: Vec::new(),
            context,
        }
    }

    /// Add a processor to the end of the pipeline.
    ///
    /// Returns self for method chaining.
    pub fn add_processor<P: Processor<T> + 'static>(mut self, processor: P) -> Self {
        self.processors.push(Box::new(processor));
        self
    }

    /// Add an already boxed processor to the end of the pipeline.
    pub fn push(&mut self, processor: Box<dyn Processor<T>>) {
        self.processors.push(processor);
    }

    /// Number of steps in the pipeline.
    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.context
    }

    /// Run `input` through every processor in order.
    ///
    /// `on_step` is invoked after each successful step. Cancellation is checked
    /// before every step, so a cancelled run stops at the next step boundary.
    pub fn process<F>(self, input: T, mut on_step: F) -> Result<T, PipelineError>
    where
        F: FnMut(StepProgress),
    {
        let Self {
            processors,
            context,
        } = self;
        let total = processors.len();
        let mut current = input;

        for (index, mut processor) in processors.into_iter().enumerate() {
            if context.is_cancelled() {
                debug!(
                    pipeline = %context.name,
                    step = index + 1,
                    total,
                    "Pipeline cancelled before step"
                );
                return Err(PipelineError::Cancelled);
            }

            trace!(pipeline = %context.name, step = index + 1, total, stage = processor.name(), "Running step");

            current = processor
                .process(current)
                .map_err(|source| PipelineError::Step {
                    step: index + 1,
                    stage: processor.name().to_string(),
                    source,
                })?;

            on_step(StepProgress::new(index + 1, total));
        }

        Ok(current)
    }
}
