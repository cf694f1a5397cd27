//! Overwatch: concurrent analysis of recorded interview sessions.
//!
//! A job acquires the session media, runs facial tracking, transcription
//! (with a local fallback engine), acoustic and audio-event analysis and
//! transcript phrase flagging as a dependency graph of stages, then writes a
//! single consolidated report.

pub mod analysis;
pub mod api;
pub mod cli;
pub mod config;
pub mod engines;
pub mod error;
pub mod job;
pub mod logging;
pub mod pipeline;
pub mod transcription;
pub mod ui;
pub mod workspace;

pub use analysis::{AnalysisEngines, JobService};
pub use config::OverwatchConfig;
pub use error::{OverwatchError, Result};
