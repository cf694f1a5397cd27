//! Media acquisition through `ffprobe` and `ffmpeg`.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use super::process::{ProcessLimits, ToolProcess, run_captured};
use super::{AcquiredMedia, MediaAcquirer};
use crate::error::{OverwatchError, Result};
use crate::pipeline::StageContext;

pub struct FfmpegAcquirer {
    ffmpeg: String,
    ffprobe: String,
    capture_percent: u8,
    limits: ProcessLimits,
}

impl FfmpegAcquirer {
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            capture_percent: 100,
            limits: ProcessLimits::default(),
        }
    }

    /// Share of the source duration to keep, from the start.
    pub fn with_capture_percent(mut self, percent: u8) -> Self {
        self.capture_percent = percent.clamp(1, 100);
        self
    }

    pub fn with_limits(mut self, limits: ProcessLimits) -> Self {
        self.limits = limits;
        self
    }

    async fn probe(&self, source: &str, ctx: &StageContext) -> Result<ProbeInfo> {
        let args = vec![
            "-v".to_string(),
            "error".to_string(),
            "-print_format".to_string(),
            "json".to_string(),
            "-show_streams".to_string(),
            "-show_format".to_string(),
            source.to_string(),
        ];
        let json = run_captured(&self.ffprobe, &args, &ctx.cancel, self.limits).await?;
        parse_probe(&json)
    }

    async fn copy_video(&self, source: &str, dest: &Path, capture_s: f64, ctx: &StageContext) -> Result<()> {
        let args = vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            source.to_string(),
            "-t".to_string(),
            format!("{capture_s:.3}"),
            "-c".to_string(),
            "copy".to_string(),
            "-progress".to_string(),
            "pipe:1".to_string(),
            "-nostats".to_string(),
            dest.display().to_string(),
        ];
        let mut process = ToolProcess::spawn(&self.ffmpeg, &args)?;
        let stdout = process.take_stdout();
        let reporter = ctx.progress.clone();

        let watch = async move {
            let Some(stdout) = stdout else { return };
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(us) = parse_out_time_us(&line)
                    && capture_s > 0.0
                {
                    let done = (us as f64 / 1_000_000.0 / capture_s).clamp(0.0, 1.0);
                    reporter.report(10 + (done * 60.0) as u8);
                }
            }
        };

        let (_, waited) = tokio::join!(watch, process.wait(&ctx.cancel, self.limits));
        waited.map(|_| ())
    }

    async fn extract_audio(&self, source: &str, dest: &Path, capture_s: f64, ctx: &StageContext) -> Result<()> {
        let args = vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            source.to_string(),
            "-t".to_string(),
            format!("{capture_s:.3}"),
            "-vn".to_string(),
            "-acodec".to_string(),
            "pcm_s16le".to_string(),
            "-ar".to_string(),
            "16000".to_string(),
            "-ac".to_string(),
            "1".to_string(),
            dest.display().to_string(),
        ];
        let process = ToolProcess::spawn(&self.ffmpeg, &args)?;
        process.wait(&ctx.cancel, self.limits).await?;
        ctx.progress.status(95, "Audio extracted");
        Ok(())
    }
}

#[async_trait]
impl MediaAcquirer for FfmpegAcquirer {
    async fn acquire(&self, source: &str, ctx: &StageContext) -> Result<AcquiredMedia> {
        ctx.progress.status(0, "Probing media");
        let probe = self.probe(source, ctx).await.map_err(|err| match err {
            OverwatchError::Cancelled => err,
            other => OverwatchError::Acquisition(format!("could not probe `{source}`: {other}")),
        })?;
        if !probe.has_video && !probe.has_audio {
            return Err(OverwatchError::Acquisition(format!(
                "`{source}` has no audio or video stream"
            )));
        }
        let capture_s = probe.duration_s * f64::from(self.capture_percent) / 100.0;
        info!(
            duration_s = probe.duration_s,
            capture_s,
            has_audio = probe.has_audio,
            has_video = probe.has_video,
            "media probed"
        );
        ctx.progress.status(10, "Copying media");

        let video = if probe.has_video {
            Some(ctx.workspace.allocate(&format!("video.{}", video_extension(source)))?)
        } else {
            None
        };
        let audio = if probe.has_audio {
            Some(ctx.workspace.allocate("audio.wav")?)
        } else {
            None
        };

        let video_job = async {
            match &video {
                Some(dest) => self.copy_video(source, dest, capture_s, ctx).await,
                None => Ok(()),
            }
        };
        let audio_job = async {
            match &audio {
                Some(dest) => self.extract_audio(source, dest, capture_s, ctx).await,
                None => {
                    debug!("source has no audio stream");
                    Ok(())
                }
            }
        };
        tokio::try_join!(video_job, audio_job).map_err(|err| match err {
            OverwatchError::Cancelled => err,
            other => OverwatchError::Acquisition(other.to_string()),
        })?;

        Ok(AcquiredMedia {
            video,
            audio,
            duration_s: capture_s,
            fps: probe.fps,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeInfo {
    pub has_video: bool,
    pub has_audio: bool,
    pub duration_s: f64,
    pub fps: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    r_frame_rate: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

pub fn parse_probe(json: &str) -> Result<ProbeInfo> {
    let probe: ProbeOutput = serde_json::from_str(json)?;
    let kind = |s: &ProbeStream, want: &str| s.codec_type.as_deref() == Some(want);

    let video = probe.streams.iter().find(|s| kind(s, "video"));
    let has_audio = probe.streams.iter().any(|s| kind(s, "audio"));
    let duration_s = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or_else(|| probe.streams.iter().find_map(|s| s.duration.as_deref()))
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
        .ok_or_else(|| OverwatchError::Acquisition("media duration is unknown".into()))?;

    Ok(ProbeInfo {
        has_video: video.is_some(),
        has_audio,
        duration_s,
        fps: video
            .and_then(|s| s.r_frame_rate.as_deref())
            .and_then(parse_frame_rate),
    })
}

/// Parses ffprobe rates such as `30000/1001` or `25`.
pub fn parse_frame_rate(rate: &str) -> Option<f64> {
    let fps = match rate.split_once('/') {
        Some((num, den)) => {
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num.trim().parse::<f64>().ok()? / den
        }
        None => rate.trim().parse().ok()?,
    };
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

fn parse_out_time_us(line: &str) -> Option<u64> {
    line.strip_prefix("out_time_us=")?.trim().parse().ok()
}

fn video_extension(source: &str) -> String {
    let path = source.split(['?', '#']).next().unwrap_or(source);
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| "mp4".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_with_both_streams() {
        let json = r#"{
            "streams": [
                {"codec_type": "video", "r_frame_rate": "30000/1001"},
                {"codec_type": "audio", "r_frame_rate": "0/0"}
            ],
            "format": {"duration": "125.480000"}
        }"#;
        let info = parse_probe(json).unwrap();
        assert!(info.has_video && info.has_audio);
        assert!((info.duration_s - 125.48).abs() < 1e-9);
        assert!((info.fps.unwrap() - 29.97).abs() < 0.01);
    }

    #[test]
    fn probe_without_audio_is_not_an_error() {
        let json = r#"{"streams": [{"codec_type": "video", "r_frame_rate": "25/1"}], "format": {"duration": "10"}}"#;
        let info = parse_probe(json).unwrap();
        assert!(info.has_video);
        assert!(!info.has_audio);
        assert_eq!(info.fps, Some(25.0));
    }

    #[test]
    fn probe_falls_back_to_stream_duration() {
        let json = r#"{"streams": [{"codec_type": "audio", "duration": "4.5"}]}"#;
        let info = parse_probe(json).unwrap();
        assert_eq!(info.duration_s, 4.5);
        assert_eq!(info.fps, None);
    }

    #[test]
    fn probe_without_duration_fails_acquisition() {
        let err = parse_probe(r#"{"streams": []}"#).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn frame_rates() {
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("24"), Some(24.0));
        assert_eq!(parse_frame_rate("junk"), None);
    }

    #[test]
    fn progress_lines() {
        assert_eq!(parse_out_time_us("out_time_us=1500000"), Some(1_500_000));
        assert_eq!(parse_out_time_us("out_time_us=N/A"), None);
        assert_eq!(parse_out_time_us("frame=10"), None);
    }

    #[test]
    fn extensions() {
        assert_eq!(video_extension("/tmp/interview.MOV"), "mov");
        assert_eq!(video_extension("https://cdn.example.com/a/b.webm?token=1"), "webm");
        assert_eq!(video_extension("https://example.com/stream"), "mp4");
    }
}
