//! Job entity and its state machine.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::filter::{FilterStep, OutputFormat};
use crate::{Error, Result};

/// Opaque job identifier, assigned at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Job lifecycle states.
///
/// `Queued -> Active -> {Completed, Failed}`; the last two are terminal.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum JobState {
    #[default]
    Queued,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        (*self).into()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Validate a state transition.
    pub fn can_transition_to(&self, target: JobState) -> bool {
        use JobState::*;
        matches!(
            (*self, target),
            (Queued, Active) | (Active, Completed) | (Active, Failed)
        )
    }

    /// Attempt to transition to a new state.
    pub fn transition_to(&self, target: JobState) -> Result<JobState> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(Error::InvalidStateTransition {
                from: *self,
                to: target,
            })
        }
    }
}

/// A requested state change together with the fields it carries.
#[derive(Debug, Clone, PartialEq)]
pub enum JobTransition {
    Start,
    Complete { output_ref: PathBuf },
    Fail { reason: String },
}

impl JobTransition {
    pub fn target(&self) -> JobState {
        match self {
            Self::Start => JobState::Active,
            Self::Complete { .. } => JobState::Completed,
            Self::Fail { .. } => JobState::Failed,
        }
    }
}

/// Everything needed to create a job record.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub steps: Vec<FilterStep>,
    pub input_ref: PathBuf,
    pub scratch_dir: PathBuf,
    pub output_format: OutputFormat,
    pub original_filename: Option<String>,
}

/// A unit of submitted work.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: JobId,
    pub state: JobState,
    /// 0-100, never decreases.
    pub progress: u8,
    pub input_ref: PathBuf,
    pub scratch_dir: PathBuf,
    pub steps: Vec<FilterStep>,
    pub output_format: OutputFormat,
    /// Present only when completed.
    pub output_ref: Option<PathBuf>,
    /// Present only when failed.
    pub failure_reason: Option<String>,
    pub original_filename: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: JobId, new_job: NewJob) -> Self {
        Self {
            id,
            state: JobState::Queued,
            progress: 0,
            input_ref: new_job.input_ref,
            scratch_dir: new_job.scratch_dir,
            steps: new_job.steps,
            output_format: new_job.output_format,
            output_ref: None,
            failure_reason: None,
            original_filename: new_job.original_filename,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Apply a transition, rejecting anything the state machine forbids.
    pub fn apply(&mut self, transition: JobTransition) -> Result<()> {
        self.state = self.state.transition_to(transition.target())?;
        let now = Utc::now();
        match transition {
            JobTransition::Start => {
                self.started_at = Some(now);
            }
            JobTransition::Complete { output_ref } => {
                self.progress = 100;
                self.output_ref = Some(output_ref);
                self.finished_at = Some(now);
            }
            JobTransition::Fail { reason } => {
                self.failure_reason = Some(reason);
                self.finished_at = Some(now);
            }
        }
        Ok(())
    }

    /// Record progress. Clamped to 100 and never lowered.
    pub fn set_progress(&mut self, percent: u8) -> Result<()> {
        if self.state != JobState::Active {
            return Err(Error::JobNotActive {
                id: self.id,
                state: self.state,
            });
        }
        self.progress = self.progress.max(percent.min(100));
        Ok(())
    }

    /// Where the executor writes the final artifact.
    pub fn output_path(&self) -> PathBuf {
        self.scratch_dir
            .join(format!("output.{}", self.output_format.extension()))
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Name offered to clients downloading the artifact.
    pub fn download_filename(&self) -> String {
        let stem = self
            .original_filename
            .as_deref()
            .and_then(|name| Path::new(name).file_stem())
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("image");
        format!("{}-filtered.{}", stem, self.output_format.extension())
    }
}
