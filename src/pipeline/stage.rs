use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::progress::{ProgressRange, ProgressReporter};
use crate::engines::AcquiredMedia;
use crate::error::{OverwatchError, StageErrorKind};
use crate::transcription::TranscriptSegment;
use crate::workspace::Workspace;

/// Terminal result held in a stage's result slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageResult {
    Ok {
        lines: Vec<String>,
    },
    /// Usable output produced through a secondary path.
    Degraded {
        lines: Vec<String>,
        warning: String,
    },
    Failed {
        kind: StageErrorKind,
        message: String,
    },
}

impl StageResult {
    pub fn ok(lines: Vec<String>) -> Self {
        Self::Ok { lines }
    }

    pub fn degraded(lines: Vec<String>, warning: impl Into<String>) -> Self {
        Self::Degraded {
            lines,
            warning: warning.into(),
        }
    }

    pub fn failed(kind: StageErrorKind, message: impl Into<String>) -> Self {
        Self::Failed {
            kind,
            message: message.into(),
        }
    }

    pub fn from_error(err: &OverwatchError) -> Self {
        Self::failed(err.stage_kind(), err.to_string())
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Ok { .. } => "ok",
            Self::Degraded { .. } => "degraded",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Typed data a stage hands to the stages that depend on it.
#[derive(Debug, Clone)]
pub enum StagePayload {
    Media(AcquiredMedia),
    Transcript(Vec<TranscriptSegment>),
}

/// What a stage runner returns: its result slot plus an optional payload.
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub result: StageResult,
    pub payload: Option<StagePayload>,
}

impl StageOutcome {
    pub fn new(result: StageResult) -> Self {
        Self {
            result,
            payload: None,
        }
    }

    pub fn with_payload(result: StageResult, payload: StagePayload) -> Self {
        Self {
            result,
            payload: Some(payload),
        }
    }

    pub fn failed(kind: StageErrorKind, message: impl Into<String>) -> Self {
        Self::new(StageResult::failed(kind, message))
    }
}

impl From<StageResult> for StageOutcome {
    fn from(result: StageResult) -> Self {
        Self::new(result)
    }
}

/// Everything a running stage may touch.
pub struct StageContext {
    pub job_id: Uuid,
    pub stage: String,
    pub workspace: Arc<Workspace>,
    pub progress: ProgressReporter,
    pub cancel: CancellationToken,
    pub(crate) upstream: HashMap<String, Arc<StageOutcome>>,
}

impl StageContext {
    pub fn new(
        job_id: Uuid,
        stage: impl Into<String>,
        workspace: Arc<Workspace>,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            job_id,
            stage: stage.into(),
            workspace,
            progress,
            cancel,
            upstream: HashMap::new(),
        }
    }

    /// Attaches the outcome of a finished dependency.
    pub fn with_upstream(mut self, stage: impl Into<String>, outcome: StageOutcome) -> Self {
        self.upstream.insert(stage.into(), Arc::new(outcome));
        self
    }

    pub fn upstream(&self, stage: &str) -> Option<&StageOutcome> {
        self.upstream.get(stage).map(Arc::as_ref)
    }

    /// The acquired media, if any dependency produced it.
    pub fn media(&self) -> Option<&AcquiredMedia> {
        self.upstream.values().find_map(|o| match &o.payload {
            Some(StagePayload::Media(media)) => Some(media),
            _ => None,
        })
    }

    /// The normalized transcript, if any dependency produced it.
    pub fn transcript(&self) -> Option<&[TranscriptSegment]> {
        self.upstream.values().find_map(|o| match &o.payload {
            Some(StagePayload::Transcript(segments)) => Some(segments.as_slice()),
            _ => None,
        })
    }
}

/// The execution function of a stage. Implementations call into one external
/// collaborator and never return errors past the stage boundary.
#[async_trait]
pub trait StageRunner: Send + Sync {
    async fn run(&self, ctx: &StageContext) -> StageOutcome;
}

/// Static definition of one stage in a graph.
#[derive(Clone)]
pub struct StageDef {
    pub name: String,
    pub deps: Vec<String>,
    pub range: ProgressRange,
    /// A failure here aborts the whole job.
    pub fatal: bool,
    pub runner: Arc<dyn StageRunner>,
}

impl StageDef {
    pub fn new(name: impl Into<String>, runner: Arc<dyn StageRunner>) -> Self {
        Self {
            name: name.into(),
            deps: Vec::new(),
            range: ProgressRange::FULL,
            fatal: false,
            runner,
        }
    }

    pub fn depends_on(mut self, stage: impl Into<String>) -> Self {
        self.deps.push(stage.into());
        self
    }

    pub fn with_range(mut self, range: ProgressRange) -> Self {
        self.range = range;
        self
    }

    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }
}

impl std::fmt::Debug for StageDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageDef")
            .field("name", &self.name)
            .field("deps", &self.deps)
            .field("range", &self.range)
            .field("fatal", &self.fatal)
            .finish_non_exhaustive()
    }
}
