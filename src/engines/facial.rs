//! Facial and head-motion tracking through OpenFace `FeatureExtraction`.
//!
//! The tracker writes one CSV row per processed frame next to the video.
//! Progress is estimated from the number of rows written so far, and the
//! finished CSV is summarized into concerns plus narrative notes.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::process::{ProcessLimits, ToolProcess};
use super::{AcquiredMedia, FacialTracker};
use crate::error::{OverwatchError, Result};
use crate::pipeline::StageContext;

const POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Upper bound on frames handed to the tracker.
const MAX_TRACKED_FRAMES: f64 = 10_000.0;

pub struct OpenFaceTracker {
    binary: String,
    limits: ProcessLimits,
}

impl OpenFaceTracker {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            limits: ProcessLimits::new(Some(Duration::from_secs(300)), Duration::from_secs(3)),
        }
    }

    pub fn with_limits(mut self, limits: ProcessLimits) -> Self {
        self.limits = limits;
        self
    }
}

#[async_trait]
impl FacialTracker for OpenFaceTracker {
    async fn track(&self, video: &Path, media: &AcquiredMedia, ctx: &StageContext) -> Result<Vec<String>> {
        let plan = FramePlan::new(media.fps.unwrap_or(30.0), media.duration_s);
        let csv_path = tracker_csv_path(video, ctx.workspace.dir());
        info!(skip = plan.skip, expected_rows = plan.expected_rows, "starting facial tracker");

        let args = vec![
            "-f".to_string(),
            video.display().to_string(),
            "-out_dir".to_string(),
            ctx.workspace.dir().display().to_string(),
            "-2Dfp".to_string(),
            "-3Dfp".to_string(),
            "-pose".to_string(),
            "-gaze".to_string(),
            "-aus".to_string(),
            "-frame_skip".to_string(),
            plan.skip.to_string(),
        ];
        let process = ToolProcess::spawn(&self.binary, &args)?;
        let wait = process.wait(&ctx.cancel, self.limits);
        tokio::pin!(wait);

        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut counter = RowCounter::default();
        let waited = loop {
            tokio::select! {
                waited = &mut wait => break waited,
                _ = ticker.tick() => {
                    let rows = counter.poll(&csv_path).await;
                    ctx.progress.report(plan.local_percent(rows));
                }
            }
        };
        waited?;

        if !tokio::fs::try_exists(&csv_path).await? {
            return Err(OverwatchError::external(&self.binary, "finished without writing a CSV"));
        }
        let summary = tokio::task::spawn_blocking(move || summarize_tracking(&csv_path))
            .await
            .map_err(|err| OverwatchError::external("facial summary", err.to_string()))??;
        Ok(summary)
    }
}

/// Where the tracker writes its CSV for `video`.
pub fn tracker_csv_path(video: &Path, out_dir: &Path) -> PathBuf {
    let stem = video.file_stem().and_then(|s| s.to_str()).unwrap_or("video");
    out_dir.join(format!("{stem}.csv"))
}

/// Frame sampling: roughly three frames a second, capped in total.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FramePlan {
    pub skip: u64,
    pub expected_rows: u64,
}

impl FramePlan {
    pub fn new(fps: f64, duration_s: f64) -> Self {
        let total = (fps * duration_s).max(0.0).round();
        let mut skip = (fps / 3.0).round().max(1.0);
        if total / skip > MAX_TRACKED_FRAMES {
            skip = (total / MAX_TRACKED_FRAMES).ceil();
        }
        let expected = ((total / skip).ceil() * 1.05).min(MAX_TRACKED_FRAMES * 1.05).max(1.0);
        Self {
            skip: skip as u64,
            expected_rows: expected as u64,
        }
    }

    /// Local stage progress for `rows` written, held below 100 until exit.
    pub fn local_percent(&self, rows: u64) -> u8 {
        let ratio = rows as f64 / self.expected_rows.max(1) as f64;
        (ratio * 100.0).clamp(0.0, 99.0) as u8
    }
}

/// Counts CSV data rows as the tracker appends them, reading only the bytes
/// written since the previous poll.
#[derive(Debug, Default)]
struct RowCounter {
    offset: u64,
    newlines: u64,
}

impl RowCounter {
    async fn poll(&mut self, path: &Path) -> u64 {
        if let Err(err) = self.read_new(path).await {
            debug!(error = %err, "tracker csv not readable yet");
        }
        // The header line is not a frame.
        self.newlines.saturating_sub(1)
    }

    async fn read_new(&mut self, path: &Path) -> std::io::Result<()> {
        let mut file = tokio::fs::File::open(path).await?;
        if file.metadata().await?.len() < self.offset {
            // Rewritten from scratch.
            *self = Self::default();
        }
        file.seek(SeekFrom::Start(self.offset)).await?;
        let mut fresh = Vec::new();
        file.read_to_end(&mut fresh).await?;
        self.offset += fresh.len() as u64;
        self.newlines += bytecount_lines(&fresh);
        Ok(())
    }
}

fn bytecount_lines(bytes: &[u8]) -> u64 {
    bytes.iter().filter(|&&b| b == b'\n').count() as u64
}

#[derive(Debug, Default)]
struct Columns {
    pitch: Option<usize>,
    yaw: Option<usize>,
    roll: Option<usize>,
    blink: Option<usize>,
    gaze_x: Option<usize>,
    gaze_y: Option<usize>,
}

#[derive(Debug, Default)]
struct Counts {
    rows: usize,
    down: usize,
    turned: usize,
    tilted: usize,
    blinks: usize,
    off_screen: usize,
}

/// Summarizes a tracker CSV into report lines.
pub fn summarize_tracking(path: &Path) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(|err| OverwatchError::external("facial summary", err.to_string()))?;

    let headers = reader
        .headers()
        .map_err(|err| OverwatchError::external("facial summary", err.to_string()))?
        .clone();
    let find = |name: &str| headers.iter().position(|h| h == name);
    let cols = Columns {
        pitch: find("pose_Rx"),
        yaw: find("pose_Ry"),
        roll: find("pose_Rz"),
        blink: find("AU45_r"),
        gaze_x: find("gaze_angle_x"),
        gaze_y: find("gaze_angle_y"),
    };

    let mut counts = Counts::default();
    for record in reader.records() {
        let record = record.map_err(|err| OverwatchError::external("facial summary", err.to_string()))?;
        let value = |idx: Option<usize>| -> f64 {
            idx.and_then(|i| record.get(i))
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(0.0)
        };
        counts.rows += 1;
        if value(cols.pitch) < -0.2 {
            counts.down += 1;
        }
        if value(cols.yaw).abs() > 0.3 {
            counts.turned += 1;
        }
        if value(cols.roll).abs() > 0.3 {
            counts.tilted += 1;
        }
        if value(cols.blink) > 0.5 {
            counts.blinks += 1;
        }
        if value(cols.gaze_x).abs() > 0.4 || value(cols.gaze_y).abs() > 0.4 {
            counts.off_screen += 1;
        }
    }
    debug!(rows = counts.rows, "tracker csv summarized");

    if counts.rows == 0 {
        return Ok(vec!["No face was tracked in the video.".to_string()]);
    }
    Ok(render_summary(&cols, &counts))
}

fn render_summary(cols: &Columns, counts: &Counts) -> Vec<String> {
    let ratio = |n: usize| n as f64 / counts.rows as f64;
    let mut concerns = Vec::new();
    let mut notes = Vec::new();

    match cols.pitch {
        Some(_) if ratio(counts.down) > 0.2 => concerns.push(
            "Looked downward often; may have been reading notes or avoiding eye contact.",
        ),
        Some(_) => notes.push("Head stayed mostly upright and engaged with the screen."),
        None => notes.push("Head pitch was not available."),
    }
    match cols.yaw {
        Some(_) if ratio(counts.turned) > 0.2 => {
            concerns.push("Turned the head away from the screen often; possible outside reference.")
        }
        Some(_) => notes.push("Face generally stayed oriented toward the screen."),
        None => notes.push("Head yaw was not available."),
    }
    match cols.roll {
        Some(_) if ratio(counts.tilted) > 0.2 => concerns.push("Tilted the head sideways often."),
        Some(_) => notes.push("Head stayed level without excessive tilting."),
        None => notes.push("Head roll was not available."),
    }
    match cols.blink {
        Some(_) if ratio(counts.blinks) < 0.01 => {
            concerns.push("Barely blinked; consistent with staring at a fixed point such as a script.")
        }
        Some(_) => notes.push("Blink rate looked normal."),
        None => notes.push("Blinking could not be measured."),
    }
    match (cols.gaze_x, cols.gaze_y) {
        (Some(_), Some(_)) if ratio(counts.off_screen) > 0.2 => {
            concerns.push("Gaze left the screen often; possible off-camera reference material.")
        }
        (Some(_), Some(_)) => notes.push("Gaze stayed on the screen for most of the session."),
        _ => notes.push("Gaze direction could not be assessed."),
    }

    let mut lines = Vec::new();
    if concerns.is_empty() {
        lines.push("No unusual behavior observed.".to_string());
    } else {
        lines.push("Areas of concern:".to_string());
        lines.extend(concerns.iter().map(|c| format!("- {c}")));
    }
    lines.push(format!("Frames analyzed: {}", counts.rows));
    lines.push("Notes:".to_string());
    lines.extend(notes.iter().map(|n| format!("- {n}")));
    lines
}
