//! Job-level progress from per-stage reports.
//!
//! Stages push [`ProgressEvent`]s into an unbounded channel through their
//! [`ProgressReporter`]. A single consumer (the orchestrator loop) owns the
//! [`ProgressAggregator`] and the job's [`ProgressSink`], so the published
//! percentage has exactly one updater.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

/// Sub-range `[lo, hi)` of the 0-100 job scale assigned to one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRange {
    pub lo: u8,
    pub hi: u8,
}

impl ProgressRange {
    pub const FULL: ProgressRange = ProgressRange { lo: 0, hi: 100 };

    pub const fn new(lo: u8, hi: u8) -> Self {
        Self { lo, hi }
    }

    pub fn is_valid(&self) -> bool {
        self.lo <= self.hi && self.hi <= 100
    }

    /// Maps a local 0-100 percentage into this range.
    pub fn map(&self, local: u8) -> u8 {
        let local = u32::from(local.min(100));
        let span = u32::from(self.hi.saturating_sub(self.lo));
        let mapped = u32::from(self.lo) + span * local / 100;
        mapped.min(100) as u8
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub stage: String,
    pub percent: u8,
    pub message: Option<String>,
}

impl ProgressEvent {
    pub fn new(stage: impl Into<String>, percent: u8) -> Self {
        Self {
            stage: stage.into(),
            percent,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Per-stage handle for emitting progress events.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    stage: String,
    tx: UnboundedSender<ProgressEvent>,
}

impl ProgressReporter {
    pub fn new(stage: impl Into<String>, tx: UnboundedSender<ProgressEvent>) -> Self {
        Self {
            stage: stage.into(),
            tx,
        }
    }

    pub fn report(&self, percent: u8) {
        let _ = self.tx.send(ProgressEvent::new(self.stage.clone(), percent));
    }

    pub fn status(&self, percent: u8, message: impl Into<String>) {
        let event = ProgressEvent::new(self.stage.clone(), percent).with_message(message);
        let _ = self.tx.send(event);
    }
}

/// Receives the aggregated job percentage.
#[async_trait]
pub trait ProgressSink: Send {
    async fn publish(&mut self, percent: u8, message: Option<&str>);
}

/// Maps stage-local progress onto the job scale and never goes backwards.
#[derive(Debug, Clone, Default)]
pub struct ProgressAggregator {
    ranges: HashMap<String, ProgressRange>,
    local: HashMap<String, u8>,
    published: u8,
}

impl ProgressAggregator {
    pub fn new<I, S>(ranges: I) -> Self
    where
        I: IntoIterator<Item = (S, ProgressRange)>,
        S: Into<String>,
    {
        Self {
            ranges: ranges.into_iter().map(|(s, r)| (s.into(), r)).collect(),
            local: HashMap::new(),
            published: 0,
        }
    }

    /// Registers an extra range, e.g. for work done after the stage graph.
    pub fn with_range(mut self, stage: impl Into<String>, range: ProgressRange) -> Self {
        self.ranges.insert(stage.into(), range);
        self
    }

    pub fn published(&self) -> u8 {
        self.published
    }

    /// Folds one event in and returns the job-level percentage to publish.
    pub fn on_event(&mut self, event: &ProgressEvent) -> u8 {
        let Some(range) = self.ranges.get(&event.stage) else {
            return self.published;
        };
        let local = self.local.entry(event.stage.clone()).or_insert(0);
        *local = (*local).max(event.percent.min(100));
        self.published = self.published.max(range.map(*local));
        self.published
    }

    /// Marks a stage as finished, whatever it last reported.
    pub fn complete(&mut self, stage: &str) -> u8 {
        self.on_event(&ProgressEvent::new(stage, 100))
    }
}
