//! Audio-event classification through an external classifier command.
//!
//! The command receives the WAV path as its last argument and prints one
//! class label per line, strongest first. An optional score may follow the
//! label after a tab or a comma; it is ignored.

use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use super::AudioEventClassifier;
use super::process::{ProcessLimits, run_captured};
use crate::error::{OverwatchError, Result};
use crate::pipeline::StageContext;

const TOP_CLASSES: usize = 10;

pub struct CommandAudioClassifier {
    program: String,
    args: Vec<String>,
    limits: ProcessLimits,
}

impl CommandAudioClassifier {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            limits: ProcessLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: ProcessLimits) -> Self {
        self.limits = limits;
        self
    }
}

#[async_trait]
impl AudioEventClassifier for CommandAudioClassifier {
    async fn classify(&self, audio: &Path, ctx: &StageContext) -> Result<Vec<String>> {
        ctx.progress.status(10, "Classifying background sounds");
        let mut args = self.args.clone();
        args.push(audio.display().to_string());
        let stdout = run_captured(&self.program, &args, &ctx.cancel, self.limits).await?;

        let labels = parse_labels(&stdout);
        debug!(count = labels.len(), "audio classes received");
        if labels.is_empty() {
            return Err(OverwatchError::external(&self.program, "printed no class labels"));
        }
        Ok(interpret_audio_events(&labels))
    }
}

pub fn parse_labels(output: &str) -> Vec<String> {
    output
        .lines()
        .map(|line| line.split(['\t', ',']).next().unwrap_or("").trim())
        .filter(|label| !label.is_empty())
        .take(TOP_CLASSES)
        .map(str::to_string)
        .collect()
}

/// Renders the ranked classes and the keyboard-activity verdict.
pub fn interpret_audio_events(labels: &[String]) -> Vec<String> {
    let has = |name: &str| labels.iter().any(|l| l.eq_ignore_ascii_case(name));

    let mut lines = vec!["Top detected sounds:".to_string()];
    lines.extend(labels.iter().take(TOP_CLASSES).map(|l| format!("  - {l}")));

    if has("Typing") && has("Clicking") {
        lines.push("Warning: keyboard typing detected.".to_string());
    } else if has("Clock") || has("Tick") {
        lines.push("Warning: possible keyboard sounds (clock/tick pattern).".to_string());
    } else {
        lines.push("No keyboard sounds detected.".to_string());
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn typing_and_clicking_is_a_warning() {
        let lines = interpret_audio_events(&labels(&["Speech", "Typing", "Clicking"]));
        assert_eq!(lines[0], "Top detected sounds:");
        assert_eq!(lines[1], "  - Speech");
        assert_eq!(lines.last().unwrap(), "Warning: keyboard typing detected.");
    }

    #[test]
    fn clock_is_a_possible_keyboard() {
        let lines = interpret_audio_events(&labels(&["Speech", "Tick"]));
        assert!(lines.last().unwrap().contains("possible keyboard"));
    }

    #[test]
    fn plain_speech_is_clean() {
        let lines = interpret_audio_events(&labels(&["Speech", "Typing"]));
        assert_eq!(lines.last().unwrap(), "No keyboard sounds detected.");
    }

    #[test]
    fn parses_labels_with_scores() {
        let parsed = parse_labels("Speech\t0.91\nTyping, 0.40\n\n  Clicking  \n");
        assert_eq!(parsed, labels(&["Speech", "Typing", "Clicking"]));
    }

    #[test]
    fn keeps_only_top_classes() {
        let output: String = (0..20).map(|i| format!("class{i}\n")).collect();
        assert_eq!(parse_labels(&output).len(), TOP_CLASSES);
    }
}
