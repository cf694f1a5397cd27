//! Stage runners of the standard interview graph.
//!
//! Each runner calls exactly one engine and turns whatever happens into a
//! [`StageOutcome`]; nothing escapes as an error.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::engines::{
    AcousticAnalyzer, AudioEventClassifier, FacialTracker, MediaAcquirer, WordFlagger,
};
use crate::error::{OverwatchError, StageErrorKind};
use crate::pipeline::{StageContext, StageOutcome, StagePayload, StageResult, StageRunner};
use crate::transcription::{
    FALLBACK_WARNING, FallbackController, FallbackOutcome, render_transcript, speech_events,
};

fn missing_media() -> StageOutcome {
    StageOutcome::failed(StageErrorKind::Internal, "acquired media is not available")
}

/// The extracted audio track, or the outcome to record when there is none.
fn require_audio(ctx: &StageContext) -> Result<&Path, StageOutcome> {
    let media = ctx.media().ok_or_else(missing_media)?;
    media
        .audio
        .as_deref()
        .ok_or_else(|| StageOutcome::failed(StageErrorKind::NoAudio, "no audio stream"))
}

fn lines_or_failure(result: crate::error::Result<Vec<String>>) -> StageOutcome {
    match result {
        Ok(lines) => StageResult::ok(lines).into(),
        Err(err) => StageResult::from_error(&err).into(),
    }
}

pub struct AcquisitionStage {
    pub source: String,
    pub acquirer: Arc<dyn MediaAcquirer>,
}

#[async_trait]
impl StageRunner for AcquisitionStage {
    async fn run(&self, ctx: &StageContext) -> StageOutcome {
        match self.acquirer.acquire(&self.source, ctx).await {
            Ok(media) => {
                let mut lines = vec![format!("Analyzed duration: {:.1}s", media.duration_s)];
                if !media.has_audio() {
                    lines.push("Source has no audio stream.".to_string());
                }
                if !media.has_video() {
                    lines.push("Source has no video stream.".to_string());
                }
                StageOutcome::with_payload(StageResult::ok(lines), StagePayload::Media(media))
            }
            // The message becomes the job error as is.
            Err(OverwatchError::Acquisition(message)) => {
                StageOutcome::failed(StageErrorKind::ExternalTool, message)
            }
            Err(err) => StageResult::from_error(&err).into(),
        }
    }
}

pub struct FacialMotionStage {
    pub tracker: Arc<dyn FacialTracker>,
}

#[async_trait]
impl StageRunner for FacialMotionStage {
    async fn run(&self, ctx: &StageContext) -> StageOutcome {
        let Some(media) = ctx.media() else {
            return missing_media();
        };
        let Some(video) = media.video.as_deref() else {
            return StageOutcome::failed(StageErrorKind::NoVideo, "no video stream");
        };
        lines_or_failure(self.tracker.track(video, media, ctx).await)
    }
}

pub struct TranscriptionStage {
    pub controller: FallbackController,
}

#[async_trait]
impl StageRunner for TranscriptionStage {
    async fn run(&self, ctx: &StageContext) -> StageOutcome {
        let audio = match require_audio(ctx) {
            Ok(audio) => audio,
            Err(outcome) => return outcome,
        };
        let run = self.controller.run(audio, ctx).await;

        let mut lines = render_transcript(&run.segments);
        if lines.is_empty() {
            lines.push("No speech recognized.".to_string());
        }
        lines.extend(speech_events(&run.segments));

        let result = match run.outcome {
            FallbackOutcome::Primary => StageResult::ok(lines),
            FallbackOutcome::Degraded => StageResult::degraded(lines, FALLBACK_WARNING),
            FallbackOutcome::Failed { kind, message } => return StageOutcome::failed(kind, message),
        };
        StageOutcome::with_payload(result, StagePayload::Transcript(run.segments))
    }
}

pub struct AcousticSummaryStage {
    pub analyzer: Arc<dyn AcousticAnalyzer>,
}

#[async_trait]
impl StageRunner for AcousticSummaryStage {
    async fn run(&self, ctx: &StageContext) -> StageOutcome {
        match require_audio(ctx) {
            Ok(audio) => lines_or_failure(self.analyzer.summarize(audio, ctx).await),
            Err(outcome) => outcome,
        }
    }
}

pub struct AudioEventsStage {
    pub classifier: Arc<dyn AudioEventClassifier>,
}

#[async_trait]
impl StageRunner for AudioEventsStage {
    async fn run(&self, ctx: &StageContext) -> StageOutcome {
        match require_audio(ctx) {
            Ok(audio) => lines_or_failure(self.classifier.classify(audio, ctx).await),
            Err(outcome) => outcome,
        }
    }
}

pub struct WordFlaggingStage {
    pub flagger: Arc<dyn WordFlagger>,
}

#[async_trait]
impl StageRunner for WordFlaggingStage {
    async fn run(&self, ctx: &StageContext) -> StageOutcome {
        let Some(transcript) = ctx.transcript() else {
            return StageOutcome::failed(StageErrorKind::Internal, "transcript is not available");
        };
        debug!(segments = transcript.len(), "scanning transcript");
        ctx.progress.status(10, "Checking transcript wording");

        let flagger = self.flagger.clone();
        let segments = transcript.to_vec();
        match tokio::task::spawn_blocking(move || flagger.flag(&segments)).await {
            Ok(lines) => StageResult::ok(lines).into(),
            Err(err) => StageOutcome::failed(StageErrorKind::Internal, format!("flagging task failed: {err}")),
        }
    }
}
