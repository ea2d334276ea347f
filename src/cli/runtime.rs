//! Wiring of settings into the orchestrator and scheduler.

use crate::config::{Prompts, Settings};
use crate::error::Result;
use crate::executor::ExecutorRegistry;
use crate::orchestrator::Orchestrator;
use crate::pipeline::{DagDefinition, JobId};
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::store::SqliteJobStore;
use std::sync::Arc;
use tracing::debug;

/// Orchestrator over the configured job database, with every stored job loaded.
pub fn open_orchestrator(settings: &Settings) -> Result<Arc<Orchestrator>> {
    let dag = Arc::new(DagDefinition::from_settings(&settings.pipeline)?);
    let store = Arc::new(SqliteJobStore::new(&settings.sqlite_path())?);
    let orchestrator = Arc::new(Orchestrator::new(dag, store, settings.output_dir()));
    orchestrator.restore()?;
    Ok(orchestrator)
}

/// Start a scheduler with the production executors.
///
/// Unfinished jobs from earlier runs are loaded but only queued when
/// `resume` is set.
pub fn start_scheduler(settings: &Settings, resume: bool) -> Result<(Scheduler, Vec<JobId>)> {
    let prompts = Prompts::load(
        settings.prompts.custom_dir.as_deref(),
        Some(&settings.prompts.variables),
    )?;
    let registry = ExecutorRegistry::from_settings(settings, &prompts)?;

    let dag = Arc::new(DagDefinition::from_settings(&settings.pipeline)?);
    let store = Arc::new(SqliteJobStore::new(&settings.sqlite_path())?);
    let orchestrator = Arc::new(Orchestrator::new(dag, store, settings.output_dir()));

    let scheduler = Scheduler::start(
        orchestrator.clone(),
        registry,
        SchedulerConfig::from_settings(&settings.pipeline),
    )?;

    let resumed = if resume {
        scheduler.resume()?
    } else {
        orchestrator.restore()?;
        Vec::new()
    };
    debug!("Scheduler ready, {} job(s) resumed", resumed.len());
    Ok((scheduler, resumed))
}
