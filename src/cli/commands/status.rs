//! Status command implementation.

use crate::cli::{open_orchestrator, parse_job_id, Output};
use crate::config::Settings;
use anyhow::Result;

/// Run the status command.
pub fn run_status(job_id: &str, json: bool, settings: Settings) -> Result<()> {
    let job_id = parse_job_id(job_id)?;
    let orchestrator = open_orchestrator(&settings)?;

    let snapshot = match orchestrator.snapshot(job_id) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            Output::error(&format!("{}", e));
            return Err(e.into());
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        Output::job_detail(&snapshot);
    }

    Ok(())
}
