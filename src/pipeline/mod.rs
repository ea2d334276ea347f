//! Pipeline model: stage names, the DAG definition and job records.

mod dag;
mod job;
mod stage;

pub use dag::{standard_topology, DagDefinition, RetryPolicy, StageSpec};
pub use job::{
    Job, JobId, JobSnapshot, JobStatus, StageFailure, StageResult, StageState, StageStatus,
    StageSummary,
};
pub use stage::Stage;
