//! Durable job storage.
//!
//! The orchestrator writes every job creation, cancellation and stage result
//! through a [`JobStore`] so that non-terminal jobs can be resumed after a
//! restart. Job status is always re-derived from the stored results; the
//! persisted status column is only a cache for listing.

mod memory;
mod sqlite;

pub use memory::MemoryJobStore;
pub use sqlite::SqliteJobStore;

use crate::error::Result;
use crate::pipeline::{Job, JobId, JobStatus, StageResult};

/// Trait for job store implementations.
///
/// Calls are synchronous and short; the orchestrator makes them while it holds
/// its own lock so writes for one job are never reordered.
pub trait JobStore: Send + Sync {
    /// Insert or replace the job row (results are stored separately).
    fn save_job(&self, job: &Job, status: JobStatus) -> Result<()>;

    /// Update the cached status of a job.
    fn update_status(&self, job_id: JobId, status: JobStatus) -> Result<()>;

    /// Append one attempt record.
    fn append_result(&self, result: &StageResult) -> Result<()>;

    /// Load a job with its full result history.
    fn load_job(&self, job_id: JobId) -> Result<Option<Job>>;

    /// Load every stored job, oldest first.
    fn load_jobs(&self) -> Result<Vec<Job>>;
}
