//! Stage graph execution: validation, concurrent scheduling, progress
//! aggregation and report assembly.

mod graph;
mod orchestrator;
mod progress;
mod report;
mod stage;

pub use graph::StageGraph;
pub use orchestrator::{CollectedResults, Orchestrator};
pub use progress::{ProgressAggregator, ProgressEvent, ProgressRange, ProgressReporter, ProgressSink};
pub use report::{Report, ReportAssembler, ReportSection, Section};
pub use stage::{StageContext, StageDef, StageOutcome, StagePayload, StageResult, StageRunner};
