use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, OverwatchError>;

#[derive(Debug, Error)]
pub enum OverwatchError {
    #[error("Acquisition failed: {0}")]
    Acquisition(String),

    #[error("External tool `{tool}` failed: {message}")]
    ExternalTool { tool: String, message: String },

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Job {0} has not reached a terminal state")]
    JobNotTerminal(Uuid),

    #[error("Job cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl OverwatchError {
    pub fn external(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalTool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Whether this error ends the whole job instead of a single stage.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Acquisition(_) | Self::Graph(_))
    }

    /// Classifies a stage-local error for the stage's result slot.
    pub fn stage_kind(&self) -> StageErrorKind {
        match self {
            Self::ExternalTool { .. } | Self::Json(_) | Self::Http(_) => StageErrorKind::ExternalTool,
            Self::ServiceUnavailable(_) => StageErrorKind::ServiceUnavailable,
            Self::Io(_) => StageErrorKind::Io,
            Self::Cancelled => StageErrorKind::Cancelled,
            Self::Config(_) | Self::Toml(_) => StageErrorKind::NotConfigured,
            Self::Acquisition(_)
            | Self::InvalidInput(_)
            | Self::Graph(_)
            | Self::JobNotFound(_)
            | Self::JobNotTerminal(_) => StageErrorKind::Internal,
        }
    }
}

/// Configuration-time problems with a stage graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("cycle detected involving stage `{stage}`")]
    CycleDetected { stage: String },

    #[error("stage `{stage}` depends on unknown stage `{dependency}`")]
    MissingDependency { stage: String, dependency: String },

    #[error("stage `{0}` is defined more than once")]
    DuplicateStage(String),

    #[error("stage `{stage}` has an invalid progress range {lo}..{hi}")]
    InvalidRange { stage: String, lo: u8, hi: u8 },
}

/// Why a stage ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageErrorKind {
    /// The acquired media has no audio stream.
    NoAudio,
    /// The acquired media has no video stream.
    NoVideo,
    /// An external process crashed, timed out, or produced malformed output.
    ExternalTool,
    /// A remote service could not be reached and no fallback succeeded.
    ServiceUnavailable,
    /// A required engine or credential is not configured.
    NotConfigured,
    /// A dependency of this stage failed, so it never ran.
    UpstreamFailed,
    Io,
    Cancelled,
    Internal,
}

impl std::fmt::Display for StageErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            StageErrorKind::NoAudio => "no audio",
            StageErrorKind::NoVideo => "no video",
            StageErrorKind::ExternalTool => "external tool error",
            StageErrorKind::ServiceUnavailable => "service unavailable",
            StageErrorKind::NotConfigured => "not configured",
            StageErrorKind::UpstreamFailed => "upstream failed",
            StageErrorKind::Io => "io error",
            StageErrorKind::Cancelled => "cancelled",
            StageErrorKind::Internal => "internal error",
        };
        f.write_str(label)
    }
}
