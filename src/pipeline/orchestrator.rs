use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use super::graph::StageGraph;
use super::progress::{ProgressAggregator, ProgressEvent, ProgressReporter, ProgressSink};
use super::stage::{StageContext, StageOutcome, StageResult};
use crate::error::{OverwatchError, Result, StageErrorKind};
use crate::workspace::Workspace;

/// Terminal results of every stage in a run, keyed by stage name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectedResults {
    results: BTreeMap<String, StageResult>,
}

impl CollectedResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, stage: impl Into<String>, result: StageResult) {
        self.results.insert(stage.into(), result);
    }

    pub fn get(&self, stage: &str) -> Option<&StageResult> {
        self.results.get(stage)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StageResult)> {
        self.results.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, StageResult)> for CollectedResults {
    fn from_iter<I: IntoIterator<Item = (String, StageResult)>>(iter: I) -> Self {
        Self {
            results: iter.into_iter().collect(),
        }
    }
}

/// Runs a validated [`StageGraph`] for one job.
///
/// Every stage starts as soon as all of its dependencies are terminal, so
/// independent branches overlap. A failed stage never stops its siblings;
/// its dependents are resolved as `Failed(UpstreamFailed)` without running.
/// Only a failure in a stage marked `fatal` aborts the run, and even then the
/// stages already in flight are cancelled and awaited before returning.
pub struct Orchestrator {
    job_id: Uuid,
    workspace: Arc<Workspace>,
}

impl Orchestrator {
    pub fn new(job_id: Uuid, workspace: Arc<Workspace>) -> Self {
        Self { job_id, workspace }
    }

    pub async fn run(
        &self,
        graph: &StageGraph,
        aggregator: &mut ProgressAggregator,
        sink: &mut dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<CollectedResults> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = Scheduler {
            graph,
            job_id: self.job_id,
            workspace: self.workspace.clone(),
            cancel: cancel.child_token(),
            tx,
            outcomes: vec![None; graph.len()],
            pending: (0..graph.len()).map(|i| graph.deps_of(i).len()).collect(),
            tasks: JoinSet::new(),
        };

        let roots: VecDeque<usize> = graph
            .topological_order()
            .iter()
            .copied()
            .filter(|&i| graph.deps_of(i).is_empty())
            .collect();
        let skipped = scheduler.schedule(roots);
        publish_completed(&skipped, aggregator, sink).await;

        let mut cancelled = false;
        let mut abort: Option<OverwatchError> = None;

        while !scheduler.tasks.is_empty() {
            tokio::select! {
                biased;
                _ = cancel.cancelled(), if !cancelled => {
                    info!(job_id = %self.job_id, "cancellation requested, stopping stages");
                    cancelled = true;
                    scheduler.cancel.cancel();
                }
                Some(event) = rx.recv() => {
                    let percent = aggregator.on_event(&event);
                    sink.publish(percent, event.message.as_deref()).await;
                }
                joined = scheduler.tasks.join_next() => {
                    let Some(joined) = joined else { break };
                    let (index, outcome) = match joined {
                        Ok(pair) => pair,
                        Err(err) => {
                            warn!(job_id = %self.job_id, error = %err, "stage supervisor task failed");
                            continue;
                        }
                    };
                    let stage = graph.stage(index);
                    info!(
                        job_id = %self.job_id,
                        stage = %stage.name,
                        outcome = outcome.result.label(),
                        "stage finished"
                    );
                    drain_events(&mut rx, aggregator, sink).await;
                    let percent = aggregator.complete(&stage.name);
                    sink.publish(percent, None).await;

                    if stage.fatal
                        && let StageResult::Failed { message, .. } = &outcome.result
                        && abort.is_none()
                    {
                        warn!(job_id = %self.job_id, stage = %stage.name, "fatal stage failed, aborting job");
                        abort = Some(OverwatchError::Acquisition(message.clone()));
                        scheduler.cancel.cancel();
                    }

                    let ready = scheduler.record(index, outcome);
                    if !cancelled && abort.is_none() {
                        let skipped = scheduler.schedule(ready.into());
                        publish_completed(&skipped, aggregator, sink).await;
                    }
                }
            }
        }

        drain_events(&mut rx, aggregator, sink).await;

        if cancelled || cancel.is_cancelled() {
            return Err(OverwatchError::Cancelled);
        }
        if let Some(err) = abort {
            return Err(err);
        }

        Ok(scheduler.into_results())
    }
}

async fn drain_events(
    rx: &mut UnboundedReceiver<ProgressEvent>,
    aggregator: &mut ProgressAggregator,
    sink: &mut dyn ProgressSink,
) {
    while let Ok(event) = rx.try_recv() {
        let percent = aggregator.on_event(&event);
        sink.publish(percent, event.message.as_deref()).await;
    }
}

async fn publish_completed(
    stages: &[String],
    aggregator: &mut ProgressAggregator,
    sink: &mut dyn ProgressSink,
) {
    for stage in stages {
        let percent = aggregator.complete(stage);
        sink.publish(percent, None).await;
    }
}

struct Scheduler<'g> {
    graph: &'g StageGraph,
    job_id: Uuid,
    workspace: Arc<Workspace>,
    cancel: CancellationToken,
    tx: UnboundedSender<ProgressEvent>,
    outcomes: Vec<Option<Arc<StageOutcome>>>,
    pending: Vec<usize>,
    tasks: JoinSet<(usize, StageOutcome)>,
}

impl Scheduler<'_> {
    /// Starts every stage in `ready`. Stages with a failed dependency are
    /// resolved on the spot; their names are returned so the caller can
    /// account for their progress.
    fn schedule(&mut self, mut ready: VecDeque<usize>) -> Vec<String> {
        let graph = self.graph;
        let mut skipped = Vec::new();
        while let Some(index) = ready.pop_front() {
            let stage = graph.stage(index);
            let failed_dep = graph.deps_of(index).iter().find_map(|&d| {
                let outcome = self.outcomes[d].as_deref()?;
                match &outcome.result {
                    StageResult::Failed { message, .. } => {
                        Some((graph.stage(d).name.clone(), message.clone()))
                    }
                    _ => None,
                }
            });

            if let Some((dep, message)) = failed_dep {
                debug!(job_id = %self.job_id, stage = %stage.name, upstream = %dep, "skipping stage");
                let outcome = StageOutcome::failed(
                    StageErrorKind::UpstreamFailed,
                    format!("upstream stage `{dep}` failed: {message}"),
                );
                skipped.push(stage.name.clone());
                ready.extend(self.record(index, outcome));
                continue;
            }

            self.spawn(index);
        }
        skipped
    }

    fn spawn(&mut self, index: usize) {
        let graph = self.graph;
        let stage = graph.stage(index);
        let upstream: HashMap<String, Arc<StageOutcome>> = graph
            .deps_of(index)
            .iter()
            .filter_map(|&d| {
                let outcome = self.outcomes[d].clone()?;
                Some((graph.stage(d).name.clone(), outcome))
            })
            .collect();
        let ctx = StageContext {
            job_id: self.job_id,
            stage: stage.name.clone(),
            workspace: self.workspace.clone(),
            progress: ProgressReporter::new(stage.name.clone(), self.tx.clone()),
            cancel: self.cancel.clone(),
            upstream,
        };
        let runner = stage.runner.clone();
        let span = info_span!("stage", job_id = %self.job_id, stage = %stage.name);

        debug!(job_id = %self.job_id, stage = %stage.name, "starting stage");
        self.tasks.spawn(async move {
            let handle = tokio::spawn(async move { runner.run(&ctx).await }.instrument(span));
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(err) => StageOutcome::failed(
                    StageErrorKind::Internal,
                    format!("stage task panicked: {err}"),
                ),
            };
            (index, outcome)
        });
    }

    /// Stores a terminal outcome and returns dependents that became ready.
    fn record(&mut self, index: usize, outcome: StageOutcome) -> Vec<usize> {
        self.outcomes[index] = Some(Arc::new(outcome));
        let mut ready = Vec::new();
        for &d in self.graph.dependents_of(index) {
            self.pending[d] -= 1;
            if self.pending[d] == 0 {
                ready.push(d);
            }
        }
        ready
    }

    fn into_results(self) -> CollectedResults {
        self.outcomes
            .into_iter()
            .enumerate()
            .map(|(i, outcome)| {
                let result = match outcome {
                    Some(outcome) => outcome.result.clone(),
                    None => StageResult::failed(
                        StageErrorKind::Internal,
                        "stage did not report a result",
                    ),
                };
                (self.graph.stage(i).name.clone(), result)
            })
            .collect()
    }
}
