//! The interview analysis: which engines run, how the stages depend on each
//! other, and the job service that drives them.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{OverwatchConfig, ProgressPlan};
use crate::engines::{
    AcousticAnalyzer, AudioEventClassifier, CommandAudioClassifier, FacialTracker, FfmpegAcquirer,
    MediaAcquirer, OpenFaceTracker, PhraseFlagger, WavAcousticAnalyzer, WordFlagger,
};
use crate::error::{GraphError, Result};
use crate::pipeline::{StageDef, StageGraph};
use crate::transcription::types::RecognizeParams;
use crate::transcription::{DiarizationClient, FallbackController, TranscriptionEngine, WhisperCli};

mod service;
mod stages;

pub use service::{ASSEMBLY_STAGE, JobService, REPORT_FILE, run_job};
pub use stages::{
    AcousticSummaryStage, AcquisitionStage, AudioEventsStage, FacialMotionStage,
    TranscriptionStage, WordFlaggingStage,
};

pub const ACQUISITION: &str = "acquisition";
pub const FACIAL_MOTION: &str = "facial_motion";
pub const TRANSCRIPTION: &str = "transcription";
pub const ACOUSTIC_SUMMARY: &str = "acoustic_summary";
pub const AUDIO_EVENTS: &str = "audio_events";
pub const WORD_FLAGGING: &str = "word_flagging";

/// One implementation per external collaborator.
///
/// Tests swap any of these for fakes; [`AnalysisEngines::from_config`] wires
/// the real tools.
#[derive(Clone)]
pub struct AnalysisEngines {
    pub acquirer: Arc<dyn MediaAcquirer>,
    pub tracker: Arc<dyn FacialTracker>,
    pub primary: Arc<dyn TranscriptionEngine>,
    pub secondary: Arc<dyn TranscriptionEngine>,
    pub acoustic: Arc<dyn AcousticAnalyzer>,
    pub audio_events: Arc<dyn AudioEventClassifier>,
    pub flagger: Arc<dyn WordFlagger>,
}

impl AnalysisEngines {
    pub fn from_config(config: &OverwatchConfig) -> Result<Self> {
        let tools = &config.tools;
        let transcription = &config.transcription;

        let primary = DiarizationClient::with_timeouts(
            transcription.endpoint.clone(),
            transcription.api_key.clone(),
            Duration::from_secs(transcription.connect_timeout_secs),
            Duration::from_secs(transcription.request_timeout_secs),
        )
        .with_params(RecognizeParams {
            language: transcription.language.clone(),
            min_speakers: transcription.min_speakers,
            max_speakers: transcription.max_speakers,
        });

        let flagger = match &config.flagging.reference_file {
            Some(path) => PhraseFlagger::from_file(path)?,
            None => PhraseFlagger::builtin(),
        }
        .with_threshold(config.flagging.threshold)
        .with_window(config.flagging.window);

        Ok(Self {
            acquirer: Arc::new(
                FfmpegAcquirer::new(&tools.ffmpeg, &tools.ffprobe)
                    .with_capture_percent(config.capture_percent)
                    .with_limits(tools.tool_limits()),
            ),
            tracker: Arc::new(OpenFaceTracker::new(&tools.face_tracker).with_limits(tools.tracker_limits())),
            primary: Arc::new(primary),
            secondary: Arc::new(
                WhisperCli::new(&tools.whisper)
                    .with_model(&tools.whisper_model)
                    .with_limits(tools.tool_limits()),
            ),
            acoustic: Arc::new(WavAcousticAnalyzer::new()),
            audio_events: Arc::new(
                CommandAudioClassifier::new(&tools.audio_classifier, tools.audio_classifier_args.clone())
                    .with_limits(tools.tool_limits()),
            ),
            flagger: Arc::new(flagger),
        })
    }
}

/// Acquisition feeds everything; word flagging waits on the transcript.
///
/// ```text
/// acquisition ─┬─ facial_motion
///              ├─ transcription ── word_flagging
///              ├─ acoustic_summary
///              └─ audio_events
/// ```
pub fn build_interview_graph(
    source: &str,
    engines: &AnalysisEngines,
    plan: &ProgressPlan,
) -> std::result::Result<StageGraph, GraphError> {
    StageGraph::new(vec![
        StageDef::new(
            ACQUISITION,
            Arc::new(AcquisitionStage {
                source: source.to_string(),
                acquirer: engines.acquirer.clone(),
            }),
        )
        .with_range(plan.acquisition)
        .fatal(),
        StageDef::new(
            FACIAL_MOTION,
            Arc::new(FacialMotionStage {
                tracker: engines.tracker.clone(),
            }),
        )
        .depends_on(ACQUISITION)
        .with_range(plan.facial_motion),
        StageDef::new(
            TRANSCRIPTION,
            Arc::new(TranscriptionStage {
                controller: FallbackController::new(engines.primary.clone(), engines.secondary.clone()),
            }),
        )
        .depends_on(ACQUISITION)
        .with_range(plan.transcription),
        StageDef::new(
            ACOUSTIC_SUMMARY,
            Arc::new(AcousticSummaryStage {
                analyzer: engines.acoustic.clone(),
            }),
        )
        .depends_on(ACQUISITION)
        .with_range(plan.acoustic_summary),
        StageDef::new(
            AUDIO_EVENTS,
            Arc::new(AudioEventsStage {
                classifier: engines.audio_events.clone(),
            }),
        )
        .depends_on(ACQUISITION)
        .with_range(plan.audio_events),
        StageDef::new(
            WORD_FLAGGING,
            Arc::new(WordFlaggingStage {
                flagger: engines.flagger.clone(),
            }),
        )
        .depends_on(TRANSCRIPTION)
        .with_range(plan.word_flagging),
    ])
}
