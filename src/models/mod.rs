use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use utoipa::ToSchema;

/// Lifecycle stage of a job.
///
/// `Unknown` is never persisted: it is what the job store reports for an
/// identifier it has no record of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Unknown,
    Receiving,
    Queued,
    Transcribing,
    Summarizing,
    Rendering,
    Done,
    Failed,
}

impl JobStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStage::Done | JobStage::Failed)
    }

    /// Handed to the pipeline and not yet finished.
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            JobStage::Queued | JobStage::Transcribing | JobStage::Summarizing | JobStage::Rendering
        )
    }

    fn rank(self) -> u8 {
        match self {
            JobStage::Unknown => 0,
            JobStage::Receiving => 1,
            JobStage::Queued => 2,
            JobStage::Transcribing => 3,
            JobStage::Summarizing => 4,
            JobStage::Rendering => 5,
            JobStage::Done | JobStage::Failed => 6,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStage::Unknown => "unknown",
            JobStage::Receiving => "receiving",
            JobStage::Queued => "queued",
            JobStage::Transcribing => "transcribing",
            JobStage::Summarizing => "summarizing",
            JobStage::Rendering => "rendering",
            JobStage::Done => "done",
            JobStage::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Location of a rendered document on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    pub stage: JobStage,
    pub percent: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl JobState {
    pub fn new(stage: JobStage, percent: u8) -> Self {
        Self {
            stage,
            percent: percent.min(100),
            artifact: None,
            error: None,
            updated_at: Utc::now(),
        }
    }

    pub fn unknown() -> Self {
        Self::new(JobStage::Unknown, 0)
    }

    /// Moves the job forward.
    ///
    /// Returns `false` and leaves the state untouched when the job is already
    /// terminal, or when the transition would move the stage backwards or
    /// lower the recorded percent.
    pub fn advance(&mut self, stage: JobStage, percent: u8) -> bool {
        let percent = percent.min(100);
        if self.stage.is_terminal() || stage.rank() < self.stage.rank() || percent < self.percent {
            return false;
        }
        self.stage = stage;
        self.percent = percent;
        self.updated_at = Utc::now();
        true
    }

    pub fn complete(&mut self, artifact: ArtifactRef) -> bool {
        if !self.advance(JobStage::Done, 100) {
            return false;
        }
        self.artifact = Some(artifact);
        true
    }

    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        if self.stage.is_terminal() {
            return false;
        }
        self.stage = JobStage::Failed;
        self.error = Some(message.into());
        self.updated_at = Utc::now();
        true
    }
}
