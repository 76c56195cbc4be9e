//! Step-indexed progress.
//!
//! Progress is a function of how many steps have finished, not of any work
//! done inside a step.

/// Percentage after `completed` of `total` steps, rounded half up.
///
/// An empty pipeline is complete by definition.
pub fn step_percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let completed = completed.min(total);
    ((200 * completed + total) / (2 * total)) as u8
}

/// Emitted by a pipeline after each finished step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepProgress {
    /// Number of steps finished so far (1-indexed position of the last one).
    pub completed: usize,
    /// Total number of steps in the pipeline.
    pub total: usize,
}

impl StepProgress {
    pub fn new(completed: usize, total: usize) -> Self {
        Self { completed, total }
    }

    pub fn percent(&self) -> u8 {
        step_percent(self.completed, self.total)
    }

    pub fn is_last(&self) -> bool {
        self.completed >= self.total
    }
}
