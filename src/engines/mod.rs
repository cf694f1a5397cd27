//! Capability interfaces for the external collaborators, plus the default
//! implementation of each.
//!
//! Stages only see the traits; which implementation runs is decided when the
//! [`AnalysisEngines`](crate::analysis::AnalysisEngines) bundle is built.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::pipeline::StageContext;
use crate::transcription::TranscriptSegment;

pub mod acoustic;
pub mod audio_events;
pub mod facial;
pub mod flagging;
pub mod media;
pub mod process;

pub use acoustic::WavAcousticAnalyzer;
pub use audio_events::CommandAudioClassifier;
pub use facial::OpenFaceTracker;
pub use flagging::PhraseFlagger;
pub use media::FfmpegAcquirer;
pub use process::{ProcessLimits, ToolProcess};

/// Description of the media produced by acquisition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcquiredMedia {
    pub video: Option<PathBuf>,
    pub audio: Option<PathBuf>,
    pub duration_s: f64,
    pub fps: Option<f64>,
}

impl AcquiredMedia {
    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }
}

#[async_trait]
pub trait MediaAcquirer: Send + Sync {
    /// Fetches `source` into the stage workspace. A source without an audio
    /// stream is not an error; only a source with nothing usable is.
    async fn acquire(&self, source: &str, ctx: &StageContext) -> Result<AcquiredMedia>;
}

#[async_trait]
pub trait FacialTracker: Send + Sync {
    async fn track(&self, video: &Path, media: &AcquiredMedia, ctx: &StageContext) -> Result<Vec<String>>;
}

#[async_trait]
pub trait AcousticAnalyzer: Send + Sync {
    async fn summarize(&self, audio: &Path, ctx: &StageContext) -> Result<Vec<String>>;
}

#[async_trait]
pub trait AudioEventClassifier: Send + Sync {
    async fn classify(&self, audio: &Path, ctx: &StageContext) -> Result<Vec<String>>;
}

/// Scans a transcript for suspicious wording. Pure computation.
pub trait WordFlagger: Send + Sync {
    fn flag(&self, transcript: &[TranscriptSegment]) -> Vec<String>;
}
