//! In-process acoustic summary of the extracted WAV track.

use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use super::AcousticAnalyzer;
use crate::error::{OverwatchError, Result};
use crate::pipeline::StageContext;

const FRAME_LEN: usize = 1024;
const FRAME_HOP: usize = 512;
/// Envelope window and hop in seconds (25 ms / 10 ms).
const ENVELOPE_WINDOW_S: f64 = 0.025;
const ENVELOPE_HOP_S: f64 = 0.010;
const PEAK_THRESHOLD: f32 = 0.3;

#[derive(Debug, Clone, Copy, Default)]
pub struct WavAcousticAnalyzer;

impl WavAcousticAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AcousticAnalyzer for WavAcousticAnalyzer {
    async fn summarize(&self, audio: &Path, ctx: &StageContext) -> Result<Vec<String>> {
        ctx.progress.status(10, "Analyzing speech rhythm");
        let path = audio.to_path_buf();
        let features = tokio::task::spawn_blocking(move || -> Result<AcousticFeatures> {
            let (samples, rate) = read_mono(&path)?;
            Ok(AcousticFeatures::from_samples(&samples, rate))
        })
        .await
        .map_err(|err| OverwatchError::external("acoustic analysis", err.to_string()))??;
        debug!(?features, "acoustic features computed");
        Ok(features.interpret())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcousticFeatures {
    pub duration_s: f64,
    pub rms: f32,
    pub volume_std: f32,
    /// Energy onsets per minute, a proxy for syllable rate.
    pub speech_rate: f64,
}

impl AcousticFeatures {
    pub fn from_samples(samples: &[f32], sample_rate: u32) -> Self {
        let duration_s = if sample_rate == 0 {
            0.0
        } else {
            samples.len() as f64 / f64::from(sample_rate)
        };
        let frame_rms: Vec<f32> = frames(samples, FRAME_LEN, FRAME_HOP).map(rms).collect();

        let window = ((f64::from(sample_rate) * ENVELOPE_WINDOW_S) as usize).max(1);
        let hop = ((f64::from(sample_rate) * ENVELOPE_HOP_S) as usize).max(1);
        let envelope: Vec<f32> = frames(samples, window, hop).map(rms).collect();
        let onsets = count_peaks(&envelope);

        Self {
            duration_s,
            rms: rms(samples),
            volume_std: std_dev(&frame_rms),
            speech_rate: if duration_s > 0.0 {
                onsets as f64 / duration_s * 60.0
            } else {
                0.0
            },
        }
    }

    pub fn level_db(&self) -> f32 {
        20.0 * self.rms.max(f32::MIN_POSITIVE).log10()
    }

    pub fn interpret(&self) -> Vec<String> {
        if self.rms <= 0.0 {
            return vec!["No audible speech detected.".to_string()];
        }
        let mut lines = vec![
            format!("Speech rate: {:.1} syllables/min", self.speech_rate),
            format!("Volume variation (std): {:.4}", self.volume_std),
            format!("Average level: {:.1} dBFS", self.level_db()),
        ];
        if self.speech_rate > 250.0 || (self.speech_rate > 0.0 && self.speech_rate < 80.0) {
            lines.push("Warning: unusual speaking rate (too fast or too slow).".to_string());
        }
        if self.volume_std < 0.01 {
            lines.push("Warning: voice sounds flat or monotone.".to_string());
        } else {
            lines.push("Voice shows natural variation.".to_string());
        }
        if self.level_db() < -30.0 {
            lines.push("Warning: low vocal energy.".to_string());
        }
        lines
    }
}

/// Reads a WAV file and downmixes it to mono `f32` in `[-1, 1]`.
pub fn read_mono(path: &Path) -> Result<(Vec<f32>, u32)> {
    let wav_err = |err: hound::Error| OverwatchError::external("wav reader", err.to_string());
    let mut reader = hound::WavReader::open(path).map_err(wav_err)?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(wav_err)?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(wav_err)?
        }
    };

    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();
    Ok((mono, spec.sample_rate))
}

fn frames(samples: &[f32], len: usize, hop: usize) -> impl Iterator<Item = &[f32]> {
    let count = if len > 0 && hop > 0 && samples.len() >= len {
        (samples.len() - len) / hop + 1
    } else {
        0
    };
    (0..count).map(move |i| &samples[i * hop..i * hop + len])
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    (sum / samples.len() as f64).sqrt() as f32
}

fn std_dev(values: &[f32]) -> f32 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().map(|&v| f64::from(v)).sum::<f64>() / n;
    let var = values
        .iter()
        .map(|&v| (f64::from(v) - mean).powi(2))
        .sum::<f64>()
        / (n - 1.0);
    var.sqrt() as f32
}

/// Strict local maxima above a share of the envelope maximum.
fn count_peaks(envelope: &[f32]) -> usize {
    if envelope.len() < 3 {
        return 0;
    }
    let max = envelope.iter().copied().fold(0.0_f32, f32::max);
    let threshold = max * PEAK_THRESHOLD;
    envelope
        .windows(3)
        .filter(|w| w[1] > w[0] && w[1] > w[2] && w[1] > threshold)
        .count()
}
