use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;

use overwatch::analysis::JobService;
use overwatch::cli::{Cli, Command};
use overwatch::config::OverwatchConfig;
use overwatch::job::JobStatus;
use overwatch::ui::JobProgress;
use overwatch::{api, logging};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config = OverwatchConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Command::Analyze { source, output_dir } => analyze(config, &source, output_dir).await,
        Command::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            let service = JobService::from_config(config)?;
            api::serve(service, &bind, async {
                let _ = tokio::signal::ctrl_c().await;
                info!("shutdown requested");
            })
            .await?;
            Ok(())
        }
    }
}

async fn analyze(config: OverwatchConfig, source: &str, output_dir: Option<std::path::PathBuf>) -> Result<()> {
    let service = JobService::from_config(config)?;
    let id = service.submit(source, output_dir).await?;
    let progress = JobProgress::start(source);

    let follow = progress.follow(&service, id);
    tokio::pin!(follow);
    let mut interrupted = false;
    let job = loop {
        tokio::select! {
            job = &mut follow => break job?,
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                service.cancel(id).await?;
            }
        }
    };
    progress.complete(&job);

    match job.status {
        JobStatus::Completed => {
            print!("{}", job.report.unwrap_or_default());
            Ok(())
        }
        JobStatus::Cancelled => bail!("analysis of {source} was cancelled"),
        _ => bail!(
            "analysis of {source} failed: {}",
            job.error.unwrap_or_else(|| "unknown error".into())
        ),
    }
}
