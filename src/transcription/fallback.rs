use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use super::error::TranscribeError;
use super::segment::TranscriptSegment;
use super::TranscriptionEngine;
use crate::error::StageErrorKind;
use crate::pipeline::StageContext;

/// Tag attached to a transcript produced by the secondary engine.
pub const FALLBACK_WARNING: &str = "FALLBACK: secondary engine transcript (no speaker labels)";

/// States of the two-engine transcription fallback.
///
/// TRY_PRIMARY → DONE(Ok), or → TRY_SECONDARY when the primary service is
/// unavailable. TRY_SECONDARY → DONE(Degraded) or DONE(Failed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackState {
    TryPrimary,
    TrySecondary { reason: String },
    Done(FallbackOutcome),
}

impl fmt::Display for FallbackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackState::TryPrimary => write!(f, "TRY_PRIMARY"),
            FallbackState::TrySecondary { .. } => write!(f, "TRY_SECONDARY"),
            FallbackState::Done(FallbackOutcome::Primary) => write!(f, "DONE(ok)"),
            FallbackState::Done(FallbackOutcome::Degraded) => write!(f, "DONE(degraded)"),
            FallbackState::Done(FallbackOutcome::Failed { .. }) => write!(f, "DONE(failed)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackOutcome {
    Primary,
    Degraded,
    Failed { kind: StageErrorKind, message: String },
}

/// What one engine attempt produced, as far as the state machine cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    Succeeded,
    Unavailable(String),
    Failed { kind: StageErrorKind, message: String },
}

impl Attempt {
    pub fn from_result<T>(result: &Result<T, TranscribeError>) -> Self {
        match result {
            Ok(_) => Attempt::Succeeded,
            Err(TranscribeError::Unavailable(reason)) => Attempt::Unavailable(reason.clone()),
            Err(err) => Attempt::Failed {
                kind: err.kind(),
                message: err.to_string(),
            },
        }
    }
}

impl FallbackState {
    /// Pure transition function. Terminal states absorb every attempt.
    pub fn next(self, attempt: Attempt) -> FallbackState {
        match (self, attempt) {
            (FallbackState::TryPrimary, Attempt::Succeeded) => {
                FallbackState::Done(FallbackOutcome::Primary)
            }
            (FallbackState::TryPrimary, Attempt::Unavailable(reason)) => {
                FallbackState::TrySecondary { reason }
            }
            (FallbackState::TryPrimary, Attempt::Failed { kind, message }) => {
                FallbackState::Done(FallbackOutcome::Failed { kind, message })
            }
            (FallbackState::TrySecondary { .. }, Attempt::Succeeded) => {
                FallbackState::Done(FallbackOutcome::Degraded)
            }
            (FallbackState::TrySecondary { reason }, Attempt::Unavailable(secondary)) => {
                FallbackState::Done(FallbackOutcome::Failed {
                    kind: StageErrorKind::ServiceUnavailable,
                    message: format!(
                        "primary unavailable ({reason}); secondary unavailable ({secondary})"
                    ),
                })
            }
            (FallbackState::TrySecondary { reason }, Attempt::Failed { kind, message }) => {
                FallbackState::Done(FallbackOutcome::Failed {
                    kind,
                    message: format!("primary unavailable ({reason}); secondary failed: {message}"),
                })
            }
            (done @ FallbackState::Done(_), _) => done,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, FallbackState::Done(_))
    }
}

/// Result of a full fallback run.
#[derive(Debug, Clone)]
pub struct TranscriptionRun {
    pub outcome: FallbackOutcome,
    pub segments: Vec<TranscriptSegment>,
    pub history: Vec<FallbackState>,
}

/// Drives the primary and secondary engines through [`FallbackState`].
pub struct FallbackController {
    primary: Arc<dyn TranscriptionEngine>,
    secondary: Arc<dyn TranscriptionEngine>,
}

impl FallbackController {
    pub fn new(primary: Arc<dyn TranscriptionEngine>, secondary: Arc<dyn TranscriptionEngine>) -> Self {
        Self { primary, secondary }
    }

    pub async fn run(&self, audio: &Path, ctx: &StageContext) -> TranscriptionRun {
        let mut state = FallbackState::TryPrimary;
        let mut history = vec![state.clone()];
        let mut segments = Vec::new();

        while !state.is_done() {
            let result = match &state {
                FallbackState::TryPrimary => {
                    ctx.progress
                        .status(5, format!("Transcribing with {}", self.primary.name()));
                    self.primary.transcribe(audio, ctx).await
                }
                FallbackState::TrySecondary { reason } => {
                    warn!(
                        primary = self.primary.name(),
                        secondary = self.secondary.name(),
                        %reason,
                        "primary transcription unavailable, falling back"
                    );
                    ctx.progress.status(
                        50,
                        format!("Primary unavailable, transcribing with {}", self.secondary.name()),
                    );
                    self.secondary.transcribe(audio, ctx).await
                }
                FallbackState::Done(_) => break,
            };

            let attempt = Attempt::from_result(&result);
            if let Ok(found) = result {
                segments = found;
            }
            state = state.next(attempt);
            history.push(state.clone());
        }

        let trail: Vec<String> = history.iter().map(ToString::to_string).collect();
        info!(transitions = %trail.join(" -> "), "transcription finished");

        let outcome = match state {
            FallbackState::Done(outcome) => outcome,
            _ => FallbackOutcome::Failed {
                kind: StageErrorKind::Internal,
                message: "transcription ended without a result".to_string(),
            },
        };
        TranscriptionRun {
            outcome,
            segments,
            history,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    use super::*;
    use crate::error::OverwatchError;
    use crate::pipeline::ProgressReporter;
    use crate::workspace::Workspace;

    enum Script {
        Segments,
        Unavailable,
        Broken,
    }

    struct FakeEngine {
        name: &'static str,
        script: Script,
        calls: AtomicUsize,
    }

    impl FakeEngine {
        fn new(name: &'static str, script: Script) -> Arc<Self> {
            Arc::new(Self {
                name,
                script,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TranscriptionEngine for FakeEngine {
        fn name(&self) -> &str {
            self.name
        }

        async fn transcribe(
            &self,
            _audio: &Path,
            _ctx: &StageContext,
        ) -> Result<Vec<TranscriptSegment>, TranscribeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.script {
                Script::Segments => Ok(vec![TranscriptSegment::new(0.0, 1.0, "Speaker 1", "Hi.")]),
                Script::Unavailable => Err(TranscribeError::Unavailable("HTTP 503".into())),
                Script::Broken => Err(OverwatchError::external(self.name, "crashed").into()),
            }
        }
    }

    fn context() -> (tempfile::TempDir, StageContext) {
        let base = tempfile::tempdir().unwrap();
        let ws = Arc::new(Workspace::prepare(base.path(), "job").unwrap());
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let ctx = StageContext::new(
            Uuid::new_v4(),
            "transcription",
            ws,
            ProgressReporter::new("transcription", tx),
            CancellationToken::new(),
        );
        (base, ctx)
    }

    #[test]
    fn transition_table() {
        use FallbackState::*;
        assert_eq!(TryPrimary.next(Attempt::Succeeded), Done(FallbackOutcome::Primary));
        assert_eq!(
            TryPrimary.next(Attempt::Unavailable("503".into())),
            TrySecondary { reason: "503".into() }
        );
        assert!(matches!(
            TryPrimary.next(Attempt::Failed {
                kind: StageErrorKind::ExternalTool,
                message: "400".into()
            }),
            Done(FallbackOutcome::Failed { kind: StageErrorKind::ExternalTool, .. })
        ));
        assert_eq!(
            TrySecondary { reason: "503".into() }.next(Attempt::Succeeded),
            Done(FallbackOutcome::Degraded)
        );
        assert!(matches!(
            TrySecondary { reason: "503".into() }.next(Attempt::Unavailable("x".into())),
            Done(FallbackOutcome::Failed { kind: StageErrorKind::ServiceUnavailable, .. })
        ));
        assert_eq!(
            Done(FallbackOutcome::Primary).next(Attempt::Unavailable("late".into())),
            Done(FallbackOutcome::Primary)
        );
    }

    #[tokio::test]
    async fn primary_success_never_touches_secondary() {
        let primary = FakeEngine::new("primary", Script::Segments);
        let secondary = FakeEngine::new("secondary", Script::Segments);
        let (_base, ctx) = context();

        let run = FallbackController::new(primary.clone(), secondary.clone())
            .run(Path::new("audio.wav"), &ctx)
            .await;
        assert_eq!(run.outcome, FallbackOutcome::Primary);
        assert_eq!(run.segments.len(), 1);
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            run.history,
            vec![FallbackState::TryPrimary, FallbackState::Done(FallbackOutcome::Primary)]
        );
    }

    #[tokio::test]
    async fn unavailable_primary_falls_back_to_degraded() {
        let primary = FakeEngine::new("primary", Script::Unavailable);
        let secondary = FakeEngine::new("secondary", Script::Segments);
        let (_base, ctx) = context();

        let run = FallbackController::new(primary.clone(), secondary.clone())
            .run(Path::new("audio.wav"), &ctx)
            .await;
        assert_eq!(run.outcome, FallbackOutcome::Degraded);
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 1);
        let trail: Vec<String> = run.history.iter().map(ToString::to_string).collect();
        assert_eq!(trail, vec!["TRY_PRIMARY", "TRY_SECONDARY", "DONE(degraded)"]);
    }

    #[tokio::test]
    async fn other_primary_errors_do_not_fall_back() {
        let primary = FakeEngine::new("primary", Script::Broken);
        let secondary = FakeEngine::new("secondary", Script::Segments);
        let (_base, ctx) = context();

        let run = FallbackController::new(primary, secondary.clone())
            .run(Path::new("audio.wav"), &ctx)
            .await;
        assert!(matches!(run.outcome, FallbackOutcome::Failed { .. }));
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 0);
        assert!(run.segments.is_empty());
    }

    #[tokio::test]
    async fn both_engines_failing_is_failed() {
        let primary = FakeEngine::new("primary", Script::Unavailable);
        let secondary = FakeEngine::new("secondary", Script::Broken);
        let (_base, ctx) = context();

        let run = FallbackController::new(primary, secondary)
            .run(Path::new("audio.wav"), &ctx)
            .await;
        match run.outcome {
            FallbackOutcome::Failed { kind, message } => {
                assert_eq!(kind, StageErrorKind::ExternalTool);
                assert!(message.contains("HTTP 503"));
                assert!(message.contains("crashed"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
