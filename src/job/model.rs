use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StageErrorKind;
use crate::pipeline::StageResult;

/// Tracks the lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// How one stage ended, as shown in the job status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSummary {
    /// `ok`, `degraded` or `failed`.
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<StageErrorKind>,
    /// Failure reason or degradation warning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<&StageResult> for StageSummary {
    fn from(result: &StageResult) -> Self {
        let (kind, message) = match result {
            StageResult::Ok { .. } => (None, None),
            StageResult::Degraded { warning, .. } => (None, Some(warning.clone())),
            StageResult::Failed { kind, message } => (Some(*kind), Some(message.clone())),
        };
        Self {
            outcome: result.label().to_string(),
            kind,
            message,
        }
    }
}

impl StageSummary {
    pub fn is_failed(&self) -> bool {
        self.kind.is_some()
    }

    pub fn is_degraded(&self) -> bool {
        self.outcome == "degraded"
    }
}

/// One end-to-end analysis run over one input media source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// URL or local path of the recorded session.
    pub source: String,
    /// Base directory for the job's workspace, when overridden by the caller.
    pub output_dir: Option<PathBuf>,
    /// Set once the workspace has been prepared.
    pub workspace: Option<PathBuf>,
    pub status: JobStatus,
    /// Overall progress, 0-100, never decreasing.
    pub progress: u8,
    /// Latest human-readable status line.
    pub message: Option<String>,
    /// Final report text, present only when completed.
    pub report: Option<String>,
    /// Failure reason, present only when failed.
    pub error: Option<String>,
    /// Per-stage outcome, filled in when the job completes.
    #[serde(default)]
    pub stages: BTreeMap<String, StageSummary>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(source: String, output_dir: Option<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            source,
            output_dir,
            workspace: None,
            status: JobStatus::Pending,
            progress: 0,
            message: None,
            report: None,
            error: None,
            stages: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Stages that ended `Failed`, in name order.
    pub fn failed_stages(&self) -> Vec<&str> {
        self.stages
            .iter()
            .filter(|(_, s)| s.is_failed())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn elapsed_ms(&self) -> i64 {
        (self.updated_at - self.created_at).num_milliseconds()
    }
}
