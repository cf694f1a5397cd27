use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use super::error::TranscribeError;
use super::segment::{TranscriptSegment, UNKNOWN_SPEAKER};
use super::TranscriptionEngine;
use crate::engines::process::{ProcessLimits, ToolProcess};
use crate::error::OverwatchError;
use crate::pipeline::StageContext;

/// Secondary engine: the local `whisper` CLI. Produces no speaker labels.
pub struct WhisperCli {
    binary: String,
    model: String,
    language: String,
    limits: ProcessLimits,
}

impl WhisperCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            model: "base".to_string(),
            language: "en".to_string(),
            limits: ProcessLimits::new(Some(Duration::from_secs(1800)), Duration::from_secs(3)),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_limits(mut self, limits: ProcessLimits) -> Self {
        self.limits = limits;
        self
    }
}

#[derive(Debug, Deserialize)]
struct WhisperOutput {
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    start: f64,
    end: f64,
    text: String,
}

/// Parses whisper's JSON output into unlabelled segments.
pub fn parse_whisper_json(json: &str) -> Result<Vec<TranscriptSegment>, TranscribeError> {
    let output: WhisperOutput =
        serde_json::from_str(json).map_err(|err| TranscribeError::Malformed(err.to_string()))?;
    Ok(output
        .segments
        .into_iter()
        .filter(|s| !s.text.trim().is_empty())
        .map(|s| TranscriptSegment::new(s.start, s.end, UNKNOWN_SPEAKER, s.text.trim()))
        .collect())
}

#[async_trait]
impl TranscriptionEngine for WhisperCli {
    fn name(&self) -> &str {
        "whisper"
    }

    async fn transcribe(
        &self,
        audio: &Path,
        ctx: &StageContext,
    ) -> Result<Vec<TranscriptSegment>, TranscribeError> {
        let stem = audio.file_stem().and_then(|s| s.to_str()).unwrap_or("audio");
        // Whisper names its output after the input; claim it so it is removed.
        let output = ctx.workspace.scoped_temp(&format!("{stem}.json"))?;

        let args = vec![
            audio.display().to_string(),
            "--model".to_string(),
            self.model.clone(),
            "--output_format".to_string(),
            "json".to_string(),
            "--output_dir".to_string(),
            ctx.workspace.dir().display().to_string(),
            "--language".to_string(),
            self.language.clone(),
            "--verbose".to_string(),
            "False".to_string(),
        ];
        debug!(model = %self.model, "running whisper");
        let process = ToolProcess::spawn(&self.binary, &args)?;
        process.wait(&ctx.cancel, self.limits).await?;

        let json = tokio::fs::read_to_string(output.path()).await.map_err(|err| {
            TranscribeError::Engine(OverwatchError::external(
                &self.binary,
                format!("no JSON output at {}: {err}", output.path().display()),
            ))
        })?;
        let segments = parse_whisper_json(&json)?;
        info!(segments = segments.len(), "whisper transcription finished");
        Ok(segments)
    }
}
