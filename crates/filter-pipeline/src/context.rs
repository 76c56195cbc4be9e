//! Pipeline execution context
//!
//! Shared between the caller that owns a pipeline run and the pipeline itself.
//! The caller cancels the token (deadline, shutdown); the pipeline observes it
//! before each step.

use crate::CancellationToken;

/// Shared context for a single pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    /// Name of the run, used in logs (usually the job id)
    pub name: String,
    /// The cancellation token
    pub token: CancellationToken,
}

impl PipelineContext {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            name: "pipeline".to_string(),
            token,
        }
    }

    pub fn arc_new(token: CancellationToken) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::new(token))
    }

    pub fn with_name(name: impl Into<String>, token: CancellationToken) -> Self {
        Self {
            name: name.into(),
            ..Self::new(token)
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Default for PipelineContext {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}
