//! List command implementation.

use crate::cli::{open_orchestrator, Output};
use crate::config::Settings;
use crate::pipeline::JobStatus;
use anyhow::Result;

/// Run the list command.
pub fn run_list(settings: Settings) -> Result<()> {
    let orchestrator = open_orchestrator(&settings)?;
    let jobs = orchestrator.list()?;

    if jobs.is_empty() {
        Output::info("No jobs yet. Use 'tubeflow process <url>' to start one.");
        return Ok(());
    }

    Output::header(&format!("Jobs ({})", jobs.len()));
    println!();

    for job in jobs.iter().rev() {
        Output::job_line(job);
    }

    let completed = jobs
        .iter()
        .filter(|j| j.status == JobStatus::Completed)
        .count();
    let unfinished = jobs.iter().filter(|j| !j.status.is_terminal()).count();

    println!();
    Output::kv("Completed", &completed.to_string());
    Output::kv("Unfinished", &unfinished.to_string());
    if unfinished > 0 {
        Output::info("Run 'tubeflow resume' to continue unfinished jobs.");
    }

    Ok(())
}
