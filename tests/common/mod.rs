#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use overwatch::analysis::AnalysisEngines;
use overwatch::engines::{
    AcousticAnalyzer, AcquiredMedia, AudioEventClassifier, FacialTracker, MediaAcquirer,
    ProcessLimits, ToolProcess, WordFlagger,
};
use overwatch::error::{OverwatchError, Result};
use overwatch::pipeline::StageContext;
use overwatch::transcription::{TranscribeError, TranscriptSegment, TranscriptionEngine};

/// Writes placeholder media files into the stage workspace.
pub struct FakeAcquirer {
    pub video: bool,
    pub audio: bool,
    pub fail: Option<&'static str>,
}

impl FakeAcquirer {
    pub fn full() -> Self {
        Self {
            video: true,
            audio: true,
            fail: None,
        }
    }
}

#[async_trait]
impl MediaAcquirer for FakeAcquirer {
    async fn acquire(&self, _source: &str, ctx: &StageContext) -> Result<AcquiredMedia> {
        if let Some(message) = self.fail {
            return Err(OverwatchError::Acquisition(message.to_string()));
        }
        ctx.progress.report(50);
        let video = if self.video {
            let path = ctx.workspace.allocate("video.mp4")?;
            std::fs::write(&path, b"video")?;
            Some(path)
        } else {
            None
        };
        let audio = if self.audio {
            let path = ctx.workspace.allocate("audio.wav")?;
            std::fs::write(&path, b"audio")?;
            Some(path)
        } else {
            None
        };
        Ok(AcquiredMedia {
            video,
            audio,
            duration_s: 42.0,
            fps: Some(30.0),
        })
    }
}

/// Starts `sleep 30` and waits on it like a real acquisition tool would.
pub struct SleepingAcquirer;

#[async_trait]
impl MediaAcquirer for SleepingAcquirer {
    async fn acquire(&self, _source: &str, ctx: &StageContext) -> Result<AcquiredMedia> {
        std::fs::write(ctx.workspace.allocate("video.partial.mp4")?, b"partial")?;
        let process = ToolProcess::spawn("sleep", &["30".to_string()])?;
        process
            .wait(&ctx.cancel, ProcessLimits::new(None, Duration::from_millis(500)))
            .await?;
        Err(OverwatchError::Acquisition("sleep finished unexpectedly".into()))
    }
}

pub struct FakeTracker {
    pub delay: Duration,
}

#[async_trait]
impl FacialTracker for FakeTracker {
    async fn track(&self, video: &Path, _media: &AcquiredMedia, ctx: &StageContext) -> Result<Vec<String>> {
        assert!(video.exists());
        tokio::time::sleep(self.delay).await;
        ctx.progress.report(100);
        Ok(vec!["No unusual behavior observed.".into(), "Frames analyzed: 1260".into()])
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Script {
    Segments,
    Unavailable,
    Broken,
}

pub struct FakeTranscriber {
    pub name: &'static str,
    pub script: Script,
    pub speaker: &'static str,
    pub delay: Duration,
    pub calls: AtomicUsize,
}

impl FakeTranscriber {
    pub fn new(name: &'static str, script: Script, speaker: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            script,
            speaker,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn with_delay(name: &'static str, script: Script, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name,
            script,
            speaker: "Speaker 1",
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranscriptionEngine for FakeTranscriber {
    fn name(&self) -> &str {
        self.name
    }

    async fn transcribe(
        &self,
        audio: &Path,
        _ctx: &StageContext,
    ) -> std::result::Result<Vec<TranscriptSegment>, TranscribeError> {
        assert!(audio.exists());
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        match self.script {
            Script::Segments => Ok(vec![
                TranscriptSegment::new(0.0, 2.5, self.speaker, "Tell me about your last project."),
                TranscriptSegment::new(3.0, 6.0, self.speaker, "Great question, it is worth noting the scale."),
            ]),
            Script::Unavailable => Err(TranscribeError::Unavailable("HTTP 503".into())),
            Script::Broken => Err(OverwatchError::external(self.name, "exit status 2").into()),
        }
    }
}

pub struct FakeAcoustic {
    pub delay: Duration,
}

#[async_trait]
impl AcousticAnalyzer for FakeAcoustic {
    async fn summarize(&self, _audio: &Path, _ctx: &StageContext) -> Result<Vec<String>> {
        tokio::time::sleep(self.delay).await;
        Ok(vec!["Speech rate: 180 syllables/min".into()])
    }
}

pub struct FakeClassifier {
    pub delay: Duration,
}

#[async_trait]
impl AudioEventClassifier for FakeClassifier {
    async fn classify(&self, _audio: &Path, _ctx: &StageContext) -> Result<Vec<String>> {
        tokio::time::sleep(self.delay).await;
        Ok(vec!["Top detected sounds:".into(), "  - Speech".into(), "No keyboard sounds detected.".into()])
    }
}

/// Echoes the transcript it was given so tests can see what reached it.
#[derive(Default)]
pub struct EchoFlagger {
    pub calls: AtomicUsize,
}

impl WordFlagger for EchoFlagger {
    fn flag(&self, transcript: &[TranscriptSegment]) -> Vec<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        vec![format!("scanned {} segment(s)", transcript.len())]
    }
}

pub struct Engines {
    pub bundle: AnalysisEngines,
    pub primary: Arc<FakeTranscriber>,
    pub secondary: Arc<FakeTranscriber>,
    pub flagger: Arc<EchoFlagger>,
}

pub fn engines(acquirer: impl MediaAcquirer + 'static, primary: Script) -> Engines {
    let primary = FakeTranscriber::new("primary", primary, "Speaker 1");
    let secondary = FakeTranscriber::new("secondary", Script::Segments, "UNKNOWN");
    let flagger = Arc::new(EchoFlagger::default());
    let bundle = AnalysisEngines {
        acquirer: Arc::new(acquirer),
        tracker: Arc::new(FakeTracker { delay: Duration::ZERO }),
        primary: primary.clone(),
        secondary: secondary.clone(),
        acoustic: Arc::new(FakeAcoustic { delay: Duration::ZERO }),
        audio_events: Arc::new(FakeClassifier { delay: Duration::ZERO }),
        flagger: flagger.clone(),
    };
    Engines {
        bundle,
        primary,
        secondary,
        flagger,
    }
}

/// Lines of one `### Title` section of a rendered report.
pub fn section<'a>(report: &'a str, title: &str) -> Vec<&'a str> {
    let header = format!("### {title}");
    report
        .lines()
        .skip_while(|line| *line != header)
        .skip(1)
        .take_while(|line| !line.starts_with("### "))
        .filter(|line| !line.is_empty())
        .collect()
}
