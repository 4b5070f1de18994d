use std::{path::PathBuf, process::ExitCode, sync::Arc};

use anyhow::Context;
use chrono::Utc;
use tracing::{info, warn};

use tf_core::{
    bulk::runner::{BulkRunner, RunState},
    config::Config,
    sinks::{DirMediaStore, JsonReportSink, LogProgressSink},
};
use tf_telegram::TelegramClient;

mod job;

use job::Job;

const PROGRESS_EVERY: usize = 10;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tf_core::logging::init("teleforge")?;

    let job_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .context("usage: teleforge <job.json>")?;

    let cfg = Config::load()?;
    let job = Job::load(&job_path).await?;
    let targets = job.targets(Utc::now())?;
    if targets.is_empty() {
        info!("no candidates match the job's filters; nothing to do");
        return Ok(ExitCode::SUCCESS);
    }
    let plan = cfg.execution_plan(targets);

    let runner = BulkRunner::new(
        Arc::new(TelegramClient::from_token(&cfg.telegram_bot_token)),
        Arc::new(DirMediaStore::new(&cfg.download_dir, job.media_folder())),
        cfg.rate_limits(),
    )
    .with_progress(Arc::new(LogProgressSink::new(PROGRESS_EVERY)))
    .with_report_sink(Arc::new(JsonReportSink::new(&cfg.report_dir)));

    let cancel = runner.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping after in-flight targets");
            cancel.cancel();
        }
    });

    let report = runner.start(plan).await?;
    Ok(match report.state {
        RunState::Aborted { .. } => ExitCode::from(2),
        _ => ExitCode::SUCCESS,
    })
}
