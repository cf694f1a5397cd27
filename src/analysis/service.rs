use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use super::{AnalysisEngines, build_interview_graph};
use crate::config::{OverwatchConfig, ProgressPlan};
use crate::error::{OverwatchError, Result};
use crate::job::{Job, JobRegistry, JobWriter, StageSummary};
use crate::pipeline::{Orchestrator, ProgressAggregator, ProgressEvent, ReportAssembler};
use crate::workspace::{TeardownGuard, Workspace};

/// Progress slot for the work done after every stage has finished.
pub const ASSEMBLY_STAGE: &str = "assembly";

/// The only file left in the workspace after a successful job.
pub const REPORT_FILE: &str = "report.txt";

/// Runs one job end to end and records its terminal state through `writer`.
///
/// The graph is validated before the workspace exists, so a bad graph leaves
/// nothing on disk. Any exit other than success removes the workspace.
pub async fn run_job(
    writer: &mut JobWriter,
    source: &str,
    base: &Path,
    engines: &AnalysisEngines,
    plan: &ProgressPlan,
    cancel: CancellationToken,
) -> Result<String> {
    match drive(writer, source, base, engines, plan, &cancel).await {
        Ok((report, stages)) => {
            writer.complete(report.clone(), stages).await;
            Ok(report)
        }
        Err(err) => {
            match &err {
                OverwatchError::Cancelled => writer.cancel().await,
                err => writer.fail(err).await,
            }
            Err(err)
        }
    }
}

async fn drive(
    writer: &mut JobWriter,
    source: &str,
    base: &Path,
    engines: &AnalysisEngines,
    plan: &ProgressPlan,
    cancel: &CancellationToken,
) -> Result<(String, BTreeMap<String, StageSummary>)> {
    let job_id = writer.id();
    let graph = build_interview_graph(source, engines, plan)?;
    if cancel.is_cancelled() {
        return Err(OverwatchError::Cancelled);
    }

    let workspace = Arc::new(Workspace::prepare(base, &job_id.to_string())?);
    let guard = TeardownGuard::new(workspace.clone());
    writer.start(workspace.dir().to_path_buf()).await;
    info!(workspace = %workspace.dir().display(), stages = graph.len(), "job started");

    let mut aggregator =
        ProgressAggregator::new(graph.ranges()).with_range(ASSEMBLY_STAGE, plan.assembly);
    let results = Orchestrator::new(job_id, workspace.clone())
        .run(&graph, &mut aggregator, &mut *writer, cancel)
        .await?;

    if cancel.is_cancelled() {
        return Err(OverwatchError::Cancelled);
    }

    let percent = aggregator.on_event(&ProgressEvent::new(ASSEMBLY_STAGE, 0));
    writer.publish(percent, Some("Assembling report")).await;

    let report = ReportAssembler::interview().assemble(job_id, &results).render();
    workspace.write_atomic(REPORT_FILE, report.as_bytes())?;
    guard.keep(&[REPORT_FILE])?;

    let percent = aggregator.complete(ASSEMBLY_STAGE);
    writer.publish(percent, None).await;
    info!(results = results.len(), "job completed");
    let stages = results
        .iter()
        .map(|(stage, result)| (stage.to_string(), StageSummary::from(result)))
        .collect();
    Ok((report, stages))
}

/// Submits jobs onto the runtime and answers status queries.
#[derive(Clone)]
pub struct JobService {
    registry: JobRegistry,
    config: Arc<OverwatchConfig>,
    engines: AnalysisEngines,
    running: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    shutdown: CancellationToken,
}

impl JobService {
    pub fn new(config: OverwatchConfig, engines: AnalysisEngines) -> Self {
        Self {
            registry: JobRegistry::new(),
            config: Arc::new(config),
            engines,
            running: Arc::new(RwLock::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn from_config(config: OverwatchConfig) -> Result<Self> {
        let engines = AnalysisEngines::from_config(&config)?;
        Ok(Self::new(config, engines))
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn config(&self) -> &OverwatchConfig {
        &self.config
    }

    /// Registers a job and starts it in the background. Returns at once.
    pub async fn submit(&self, source: &str, output_dir: Option<PathBuf>) -> Result<Uuid> {
        let source = source.trim();
        if source.is_empty() {
            return Err(OverwatchError::InvalidInput("source must not be empty".into()));
        }

        let job = Job::new(source.to_string(), output_dir.clone());
        let id = job.id;
        let mut writer = self.registry.register(job).await;
        let cancel = self.shutdown.child_token();
        self.running.write().await.insert(id, cancel.clone());

        let base = output_dir.unwrap_or_else(|| self.config.workspace_root.clone());
        let source = source.to_string();
        let engines = self.engines.clone();
        let config = self.config.clone();
        let running = self.running.clone();

        tokio::spawn(
            async move {
                match run_job(&mut writer, &source, &base, &engines, &config.progress, cancel).await {
                    Ok(_) => {}
                    Err(OverwatchError::Cancelled) => info!("job cancelled"),
                    Err(err) => warn!(error = %err, "job failed"),
                }
                running.write().await.remove(&id);
            }
            .instrument(info_span!("job", job_id = %id)),
        );

        Ok(id)
    }

    pub async fn status(&self, id: Uuid) -> Result<Job> {
        self.registry.snapshot(id).await
    }

    pub async fn list(&self) -> Vec<Job> {
        self.registry.list().await
    }

    /// Requests cancellation. Cancelling a finished job is a no-op.
    pub async fn cancel(&self, id: Uuid) -> Result<Job> {
        if let Some(token) = self.running.read().await.get(&id) {
            info!(job_id = %id, "cancellation requested");
            token.cancel();
        }
        self.registry.snapshot(id).await
    }

    pub async fn evict(&self, id: Uuid) -> Result<Job> {
        self.registry.evict(id).await
    }

    /// Polls until the job reaches a terminal state.
    pub async fn wait(&self, id: Uuid, poll: Duration) -> Result<Job> {
        loop {
            let job = self.registry.snapshot(id).await?;
            if job.status.is_terminal() {
                return Ok(job);
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Cancels every running job.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
