//! In-memory job store.
//!
//! Useful for testing and for one-shot runs that do not need to resume.

use super::JobStore;
use crate::error::{Result, TubeflowError};
use crate::pipeline::{Job, JobId, JobStatus, StageResult};
use std::collections::HashMap;
use std::sync::RwLock;

struct Entry {
    job: Job,
    status: JobStatus,
}

/// In-memory job store.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, Entry>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached status of a job, as last written by the orchestrator.
    pub fn stored_status(&self, job_id: JobId) -> Option<JobStatus> {
        self.jobs.read().ok()?.get(&job_id).map(|e| e.status)
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<JobId, Entry>>> {
        self.jobs
            .write()
            .map_err(|e| TubeflowError::Store(format!("Failed to acquire lock: {}", e)))
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<JobId, Entry>>> {
        self.jobs
            .read()
            .map_err(|e| TubeflowError::Store(format!("Failed to acquire lock: {}", e)))
    }
}

impl JobStore for MemoryJobStore {
    fn save_job(&self, job: &Job, status: JobStatus) -> Result<()> {
        let mut jobs = self.write()?;
        match jobs.get_mut(&job.id) {
            Some(entry) => {
                entry.job.cancelled_at = job.cancelled_at;
                entry.status = status;
            }
            None => {
                let mut stored = job.clone();
                stored.in_flight.clear();
                jobs.insert(job.id, Entry { job: stored, status });
            }
        }
        Ok(())
    }

    fn update_status(&self, job_id: JobId, status: JobStatus) -> Result<()> {
        let mut jobs = self.write()?;
        let entry = jobs
            .get_mut(&job_id)
            .ok_or_else(|| TubeflowError::NotFound(job_id.to_string()))?;
        entry.status = status;
        Ok(())
    }

    fn append_result(&self, result: &StageResult) -> Result<()> {
        let mut jobs = self.write()?;
        let entry = jobs
            .get_mut(&result.job_id)
            .ok_or_else(|| TubeflowError::NotFound(result.job_id.to_string()))?;
        entry.job.results.push(result.clone());
        Ok(())
    }

    fn load_job(&self, job_id: JobId) -> Result<Option<Job>> {
        Ok(self.read()?.get(&job_id).map(|e| e.job.clone()))
    }

    fn load_jobs(&self) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self.read()?.values().map(|e| e.job.clone()).collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }
}
