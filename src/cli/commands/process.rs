//! Process and resume command implementations.

use crate::cli::preflight;
use crate::cli::{start_scheduler, Output};
use crate::config::Settings;
use crate::executor::validate_video_url;
use crate::pipeline::{JobId, JobSnapshot, JobStatus};
use crate::scheduler::Scheduler;
use anyhow::Result;
use futures::stream::{FuturesUnordered, StreamExt};

/// Run the process command.
pub async fn run_process(urls: &[String], settings: Settings) -> Result<()> {
    // Reject bad references before anything is persisted
    for url in urls {
        if let Err(e) = validate_video_url(url) {
            Output::error(&format!("{}", e));
            return Err(e.into());
        }
    }

    if let Err(e) = preflight::check(&settings) {
        Output::error(&format!("{}", e));
        Output::info("Run 'tubeflow doctor' for detailed diagnostics.");
        return Err(e.into());
    }

    let (scheduler, _) = start_scheduler(&settings, false)?;

    let mut job_ids = Vec::with_capacity(urls.len());
    for url in urls {
        let job_id = scheduler.submit(url)?;
        Output::info(&format!("Submitted {} as job {}", url, job_id));
        job_ids.push(job_id);
    }

    finish(&scheduler, job_ids).await
}

/// Run the resume command.
pub async fn run_resume(settings: Settings) -> Result<()> {
    if let Err(e) = preflight::check(&settings) {
        Output::error(&format!("{}", e));
        Output::info("Run 'tubeflow doctor' for detailed diagnostics.");
        return Err(e.into());
    }

    let (scheduler, resumed) = start_scheduler(&settings, true)?;
    if resumed.is_empty() {
        Output::info("No unfinished jobs to resume.");
        return Ok(());
    }

    Output::info(&format!("Resuming {} job(s)", resumed.len()));
    finish(&scheduler, resumed).await
}

/// Wait for every job to settle, print the outcomes, and fail if any job did.
async fn finish(scheduler: &Scheduler, job_ids: Vec<JobId>) -> Result<()> {
    let pb = Output::progress_bar(job_ids.len() as u64, "Running pipeline...");

    let mut pending: FuturesUnordered<_> = job_ids
        .iter()
        .map(|job_id| scheduler.wait_settled(*job_id))
        .collect();

    let mut settled: Vec<JobSnapshot> = Vec::with_capacity(job_ids.len());
    while let Some(result) = pending.next().await {
        let snapshot = result?;
        pb.set_message(format!("{} {}", snapshot.id, snapshot.status));
        pb.inc(1);
        settled.push(snapshot);
    }
    pb.finish_and_clear();

    settled.sort_by_key(|s| s.created_at);
    for snapshot in &settled {
        Output::job_detail(snapshot);
    }

    let failed = settled
        .iter()
        .filter(|s| s.status != JobStatus::Completed)
        .count();

    println!();
    if failed == 0 {
        Output::success(&format!("{} job(s) completed", settled.len()));
        Ok(())
    } else {
        Output::error(&format!(
            "{} of {} job(s) did not complete",
            failed,
            settled.len()
        ));
        Err(anyhow::anyhow!("{} job(s) did not complete", failed))
    }
}
