//! Cancel command implementation.

use crate::cli::{open_orchestrator, parse_job_id, Output};
use crate::config::Settings;
use crate::pipeline::JobStatus;
use anyhow::Result;

/// Run the cancel command.
///
/// Works on the stored record only. Jobs running inside `tubeflow serve` are
/// cancelled through its HTTP API.
pub fn run_cancel(job_id: &str, settings: Settings) -> Result<()> {
    let job_id = parse_job_id(job_id)?;
    let orchestrator = open_orchestrator(&settings)?;

    let before = orchestrator.snapshot(job_id)?.status;
    let snapshot = orchestrator.cancel(job_id)?;

    if before.is_terminal() {
        Output::warning(&format!("Job {} already finished as {}", job_id, before));
    } else if snapshot.status == JobStatus::Cancelled {
        Output::success(&format!("Cancelled job {}", job_id));
    }

    Ok(())
}
