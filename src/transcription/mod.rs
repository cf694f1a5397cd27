//! Speech-to-text with a diarizing primary service and a local fallback.

use std::path::Path;

use async_trait::async_trait;

use crate::pipeline::StageContext;

pub mod client;
pub mod error;
pub mod fallback;
pub mod segment;
pub mod types;
pub mod whisper;

pub use client::DiarizationClient;
pub use error::TranscribeError;
pub use fallback::{
    Attempt, FALLBACK_WARNING, FallbackController, FallbackOutcome, FallbackState, TranscriptionRun,
};
pub use segment::{
    TimedWord, TranscriptSegment, UNKNOWN_SPEAKER, format_timestamp, render_transcript,
    segments_from_words, speech_events,
};
pub use whisper::WhisperCli;

/// A speech-to-text engine producing normalized segments.
#[async_trait]
pub trait TranscriptionEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn transcribe(
        &self,
        audio: &Path,
        ctx: &StageContext,
    ) -> Result<Vec<TranscriptSegment>, TranscribeError>;
}
