//! Interface de terminal do Overwatch: barra de progresso e saída colorida.
//!
//! Usa `indicatif` para a barra e `console` para as cores. O [`JobProgress`]
//! só lê snapshots do registro; os estágios nunca falam com o terminal.

use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};
use uuid::Uuid;

use crate::analysis::JobService;
use crate::error::Result;
use crate::job::{Job, JobStatus};

/// Intervalo entre leituras do snapshot do job.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Indicador visual de progresso de um job no terminal.
pub struct JobProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl JobProgress {
    /// Cria a barra (0 a 100) com a origem do job como prefixo.
    pub fn start(source: &str) -> Self {
        let pb = ProgressBar::new(100);
        let style = ProgressStyle::with_template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        pb.set_style(style);
        pb.set_message(format!("Queued: {source}"));
        pb.enable_steady_tick(Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Atualiza a barra a partir de um snapshot.
    pub fn update(&self, job: &Job) {
        self.pb.set_position(u64::from(job.progress));
        if let Some(message) = &job.message {
            self.pb.set_message(message.clone());
        }
    }

    /// Acompanha o job até um estado terminal e devolve o snapshot final.
    pub async fn follow(&self, service: &JobService, id: Uuid) -> Result<Job> {
        loop {
            let job = service.status(id).await?;
            self.update(&job);
            if job.status.is_terminal() {
                return Ok(job);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Finaliza a barra e mostra o resultado: verde para sucesso, vermelho
    /// para falha e amarelo para cancelamento.
    pub fn complete(&self, job: &Job) {
        self.pb.finish_and_clear();
        match job.status {
            JobStatus::Completed => {
                eprintln!("  {} Analysis completed in {} ms", self.green.apply_to("✓"), job.elapsed_ms());
                for (stage, summary) in job.stages.iter().filter(|(_, s)| s.outcome != "ok") {
                    let detail = summary.message.as_deref().unwrap_or("");
                    eprintln!("    {} {stage} {}: {detail}", self.yellow.apply_to("!"), summary.outcome);
                }
            }
            JobStatus::Failed => {
                let reason = job.error.as_deref().unwrap_or("unknown error");
                eprintln!("  {} Analysis failed: {reason}", self.red.apply_to("✗"));
            }
            JobStatus::Cancelled => {
                eprintln!("  {} Analysis cancelled", self.yellow.apply_to("■"));
            }
            JobStatus::Pending | JobStatus::Running => {}
        }
    }
}
