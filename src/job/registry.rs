//! In-memory job table.
//!
//! Readers get cloned snapshots at any time. Writes go through the
//! [`JobWriter`] returned by [`JobRegistry::register`]; it is not `Clone`, so
//! the task that holds it is the only one able to mutate that job.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::model::{Job, JobStatus, StageSummary};
use crate::error::{OverwatchError, Result};
use crate::pipeline::ProgressSink;

#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<Uuid, Job>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `job` and hands back its single writer.
    pub async fn register(&self, job: Job) -> JobWriter {
        let id = job.id;
        self.jobs.write().await.insert(id, job);
        JobWriter {
            jobs: self.jobs.clone(),
            id,
        }
    }

    pub async fn snapshot(&self, id: Uuid) -> Result<Job> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(OverwatchError::JobNotFound(id))
    }

    /// All jobs, oldest first.
    pub async fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }

    /// Removes a job that has reached a terminal state.
    pub async fn evict(&self, id: Uuid) -> Result<Job> {
        let mut jobs = self.jobs.write().await;
        match jobs.get(&id) {
            None => Err(OverwatchError::JobNotFound(id)),
            Some(job) if !job.status.is_terminal() => Err(OverwatchError::JobNotTerminal(id)),
            Some(_) => jobs.remove(&id).ok_or(OverwatchError::JobNotFound(id)),
        }
    }
}

/// Exclusive write access to one job's registry entry.
#[derive(Debug)]
pub struct JobWriter {
    jobs: Arc<RwLock<HashMap<Uuid, Job>>>,
    id: Uuid,
}

impl JobWriter {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn start(&mut self, workspace: PathBuf) {
        self.update(|job| {
            job.status = JobStatus::Running;
            job.workspace = Some(workspace);
        })
        .await;
    }

    pub async fn publish(&mut self, percent: u8, message: Option<&str>) {
        self.update(|job| {
            job.progress = job.progress.max(percent.min(100));
            if let Some(message) = message {
                job.message = Some(message.to_string());
            }
        })
        .await;
    }

    /// Marks the job completed. The message names any stage that failed or
    /// degraded so callers see it without parsing the report.
    pub async fn complete(&mut self, report: String, stages: BTreeMap<String, StageSummary>) {
        let message = completion_message(&stages);
        self.update(|job| {
            job.status = JobStatus::Completed;
            job.progress = 100;
            job.message = Some(message);
            job.report = Some(report);
            job.stages = stages;
        })
        .await;
    }

    pub async fn fail(&mut self, error: &OverwatchError) {
        let error = error.to_string();
        self.update(|job| {
            job.status = JobStatus::Failed;
            job.message = Some("Analysis failed".into());
            job.error = Some(error);
        })
        .await;
    }

    pub async fn cancel(&mut self) {
        self.update(|job| {
            job.status = JobStatus::Cancelled;
            job.message = Some("Analysis cancelled".into());
        })
        .await;
    }

    async fn update(&mut self, apply: impl FnOnce(&mut Job)) {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(&self.id) else {
            debug!(job_id = %self.id, "job evicted before update");
            return;
        };
        if job.status.is_terminal() {
            debug!(job_id = %self.id, status = %job.status, "ignoring update to terminal job");
            return;
        }
        apply(job);
        job.updated_at = Utc::now();
    }
}

fn completion_message(stages: &BTreeMap<String, StageSummary>) -> String {
    let failed: Vec<&str> = stages
        .iter()
        .filter(|(_, s)| s.is_failed())
        .map(|(name, _)| name.as_str())
        .collect();
    let degraded: Vec<&str> = stages
        .iter()
        .filter(|(_, s)| s.is_degraded())
        .map(|(name, _)| name.as_str())
        .collect();

    let mut notes = Vec::new();
    if !failed.is_empty() {
        notes.push(format!("failed: {}", failed.join(", ")));
    }
    if !degraded.is_empty() {
        notes.push(format!("degraded: {}", degraded.join(", ")));
    }
    if notes.is_empty() {
        "Analysis complete".to_string()
    } else {
        format!("Analysis complete ({})", notes.join("; "))
    }
}

#[async_trait]
impl ProgressSink for JobWriter {
    async fn publish(&mut self, percent: u8, message: Option<&str>) {
        JobWriter::publish(self, percent, message).await;
    }
}
