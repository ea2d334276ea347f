//! Pipeline orchestrator for tubeflow.
//!
//! Owns every job record and drives it through the stage DAG. The orchestrator
//! never runs executors itself: `advance` and `record_result` return the stage
//! attempts that should be started next, and the scheduler runs them.

use crate::error::{Result, TubeflowError};
use crate::executor::{ExecutorError, StageInput, StageOutput};
use crate::pipeline::{DagDefinition, Job, JobId, JobSnapshot, JobStatus, Stage, StageResult, StageStatus};
use crate::store::JobStore;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// One stage attempt ready to be handed to an executor.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub job_id: JobId,
    pub stage: Stage,
    /// 1-based attempt number.
    pub attempt: u32,
    pub input: StageInput,
    /// Wait this long before starting (retry backoff).
    pub delay: Duration,
    /// Maximum execution time of the attempt.
    pub timeout: Duration,
}

/// Result of driving a job: its new state and the attempts to start.
#[derive(Debug, Clone)]
pub struct Advance {
    pub snapshot: JobSnapshot,
    pub dispatches: Vec<Dispatch>,
}

impl Advance {
    pub fn settled(&self) -> bool {
        self.snapshot.settled
    }
}

/// Drives jobs through the DAG and persists every transition.
pub struct Orchestrator {
    dag: Arc<DagDefinition>,
    store: Arc<dyn JobStore>,
    work_root: PathBuf,
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl Orchestrator {
    pub fn new(dag: Arc<DagDefinition>, store: Arc<dyn JobStore>, work_root: PathBuf) -> Self {
        Self {
            dag,
            store,
            work_root,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn dag(&self) -> &Arc<DagDefinition> {
        &self.dag
    }

    /// Per-job working directory.
    pub fn work_dir(&self, job_id: JobId) -> PathBuf {
        self.work_root.join(job_id.to_string())
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<JobId, Job>>> {
        self.jobs
            .lock()
            .map_err(|e| TubeflowError::Internal(format!("Job table lock poisoned: {}", e)))
    }

    /// Create and persist a new pending job.
    #[instrument(skip(self))]
    pub fn create_job(&self, source: &str) -> Result<JobSnapshot> {
        let job = Job::new(source);
        self.store.save_job(&job, JobStatus::Pending)?;

        let snapshot = job.snapshot(&self.dag);
        self.lock()?.insert(job.id, job);
        info!(job_id = %snapshot.id, "Created job");
        Ok(snapshot)
    }

    /// Load persisted jobs and return the ids of those that have not finished,
    /// oldest first.
    #[instrument(skip(self))]
    pub fn restore(&self) -> Result<Vec<JobId>> {
        let stored = self.store.load_jobs()?;
        let mut jobs = self.lock()?;

        let mut resumable = Vec::new();
        for job in stored {
            if jobs.contains_key(&job.id) {
                continue;
            }
            let status = job.status(&self.dag);
            if !status.is_terminal() {
                resumable.push(job.id);
            }
            jobs.insert(job.id, job);
        }

        info!("Restored {} job(s), {} to resume", jobs.len(), resumable.len());
        Ok(resumable)
    }

    /// Dispatch every stage whose dependencies have succeeded.
    ///
    /// A no-op for terminal jobs and for stages already in flight.
    #[instrument(skip(self))]
    pub fn advance(&self, job_id: JobId) -> Result<Advance> {
        let mut jobs = self.lock()?;
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| TubeflowError::NotFound(job_id.to_string()))?;

        let before = job.status(&self.dag);
        let dispatches = if before.is_terminal() {
            Vec::new()
        } else {
            self.dispatch_ready(job)
        };
        self.persist_status(job, before);

        Ok(Advance {
            snapshot: job.snapshot(&self.dag),
            dispatches,
        })
    }

    /// Record the outcome of a dispatched attempt and compute what runs next.
    #[instrument(skip(self, dispatch, outcome), fields(job_id = %dispatch.job_id, stage = %dispatch.stage, attempt = dispatch.attempt))]
    pub fn record_result(
        &self,
        dispatch: &Dispatch,
        outcome: std::result::Result<StageOutput, ExecutorError>,
        started_at: DateTime<Utc>,
    ) -> Result<Advance> {
        let mut jobs = self.lock()?;
        let job = jobs
            .get_mut(&dispatch.job_id)
            .ok_or_else(|| TubeflowError::NotFound(dispatch.job_id.to_string()))?;

        if !job.is_in_flight(dispatch.stage) {
            warn!("Ignoring result for a stage that is not in flight");
            return Ok(Advance {
                snapshot: job.snapshot(&self.dag),
                dispatches: Vec::new(),
            });
        }

        let before = job.status(&self.dag);
        let policy = self.dag.policy(dispatch.stage);
        let mut dispatches = Vec::new();

        let (status, output, error) = match outcome {
            Ok(output) => {
                info!("Stage succeeded");
                (StageStatus::Success, Some(output), None)
            }
            Err(err) if !job.is_cancelled() && policy.can_retry(dispatch.attempt) => {
                let delay = policy.delay_for_attempt(dispatch.attempt);
                warn!(error = %err, "Stage failed, retrying in {:?}", delay);
                dispatches.push(self.build_dispatch(job, dispatch.stage, dispatch.attempt + 1, delay));
                job.not_started.insert(dispatch.stage);
                (StageStatus::Retrying, None, Some(err))
            }
            Err(err) => {
                warn!(error = %err, "Stage failed");
                (StageStatus::Failed, None, Some(err))
            }
        };

        let result = StageResult {
            id: Uuid::new_v4(),
            job_id: job.id,
            stage: dispatch.stage,
            attempt: dispatch.attempt,
            status,
            output,
            error,
            started_at,
            finished_at: Utc::now(),
        };
        if let Err(e) = self.store.append_result(&result) {
            warn!("Failed to persist stage result: {}", e);
        }
        job.results.push(result);

        if status != StageStatus::Retrying {
            job.in_flight.remove(&dispatch.stage);
            job.not_started.remove(&dispatch.stage);
        }

        if job.is_cancelled() {
            debug!("Job is cancelled, nothing further is dispatched");
        } else {
            dispatches.extend(self.dispatch_ready(job));
        }
        self.persist_status(job, before);

        let snapshot = job.snapshot(&self.dag);
        if snapshot.settled {
            info!(status = %snapshot.status, "Job settled");
        }
        Ok(Advance {
            snapshot,
            dispatches,
        })
    }

    /// Mark a dispatched attempt as started.
    ///
    /// Returns `None` when the attempt should run, or the job's state when the
    /// dispatch was dropped because the job was cancelled in the meantime.
    pub fn begin_attempt(&self, dispatch: &Dispatch) -> Result<Option<Advance>> {
        let mut jobs = self.lock()?;
        let job = jobs
            .get_mut(&dispatch.job_id)
            .ok_or_else(|| TubeflowError::NotFound(dispatch.job_id.to_string()))?;

        if !job.is_cancelled() {
            job.not_started.remove(&dispatch.stage);
            return Ok(None);
        }

        // Cancel already took the stage out of flight.
        debug!(job_id = %job.id, stage = %dispatch.stage, "Discarding dispatch for cancelled job");
        Ok(Some(Advance {
            snapshot: job.snapshot(&self.dag),
            dispatches: Vec::new(),
        }))
    }

    /// Mark a job cancelled. Running attempts finish on their own; attempts
    /// that were dispatched but not started, such as a retry waiting out its
    /// backoff, are dropped. Nothing new is dispatched. Cancelling a finished job changes nothing.
    #[instrument(skip(self))]
    pub fn cancel(&self, job_id: JobId) -> Result<JobSnapshot> {
        let mut jobs = self.lock()?;
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| TubeflowError::NotFound(job_id.to_string()))?;

        if !job.status(&self.dag).is_terminal() {
            job.cancelled_at = Some(Utc::now());
            // Attempts that have not started never will
            for stage in std::mem::take(&mut job.not_started) {
                job.in_flight.remove(&stage);
            }
            if let Err(e) = self.store.save_job(job, JobStatus::Cancelled) {
                warn!("Failed to persist cancellation: {}", e);
            }
            info!(in_flight = job.in_flight.len(), "Job cancelled");
        }

        Ok(job.snapshot(&self.dag))
    }

    pub fn snapshot(&self, job_id: JobId) -> Result<JobSnapshot> {
        self.lock()?
            .get(&job_id)
            .map(|job| job.snapshot(&self.dag))
            .ok_or_else(|| TubeflowError::NotFound(job_id.to_string()))
    }

    /// Snapshots of every known job, oldest first.
    pub fn list(&self) -> Result<Vec<JobSnapshot>> {
        let jobs = self.lock()?;
        let mut snapshots: Vec<JobSnapshot> = jobs.values().map(|j| j.snapshot(&self.dag)).collect();
        snapshots.sort_by_key(|s| s.created_at);
        Ok(snapshots)
    }

    fn dispatch_ready(&self, job: &mut Job) -> Vec<Dispatch> {
        let ready = job.ready_stages(&self.dag);
        let mut dispatches = Vec::with_capacity(ready.len());
        for stage in ready {
            let attempt = job.attempts(stage) + 1;
            dispatches.push(self.build_dispatch(job, stage, attempt, Duration::ZERO));
            job.in_flight.insert(stage);
            job.not_started.insert(stage);
            debug!(job_id = %job.id, %stage, attempt, "Dispatching stage");
        }
        dispatches
    }

    fn build_dispatch(&self, job: &Job, stage: Stage, attempt: u32, delay: Duration) -> Dispatch {
        let input = StageInput {
            job_id: job.id,
            source: job.source.clone(),
            stage,
            attempt,
            work_dir: self.work_dir(job.id),
            upstream: job.upstream_outputs(&self.dag, stage),
        };
        Dispatch {
            job_id: job.id,
            stage,
            attempt,
            input,
            delay,
            timeout: self.dag.policy(stage).timeout,
        }
    }

    fn persist_status(&self, job: &Job, before: JobStatus) {
        let after = job.status(&self.dag);
        if after != before {
            debug!(job_id = %job.id, from = %before, to = %after, "Job status changed");
            if let Err(e) = self.store.update_status(job.id, after) {
                warn!("Failed to persist job status: {}", e);
            }
        }
    }
}
