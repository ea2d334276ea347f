//! Job records, stage results and status derivation.

use super::{DagDefinition, Stage};
use crate::executor::{ExecutorError, StageOutput};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

pub type JobId = Uuid;

/// Overall status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    /// Created, no stage started yet.
    Pending,
    Running,
    /// A stage failed for good but an independent branch can still finish.
    PartialFailure,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::PartialFailure => "partial-failure",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "partial-failure" => Ok(JobStatus::PartialFailure),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome recorded for a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Success,
    /// Failed with no attempts left.
    Failed,
    /// Failed, another attempt is scheduled.
    Retrying,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Success => "success",
            StageStatus::Failed => "failed",
            StageStatus::Retrying => "retrying",
        }
    }
}

impl std::str::FromStr for StageStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "success" => Ok(StageStatus::Success),
            "failed" => Ok(StageStatus::Failed),
            "retrying" => Ok(StageStatus::Retrying),
            _ => Err(format!("Unknown stage status: {}", s)),
        }
    }
}

/// Immutable record of one execution attempt of a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub id: Uuid,
    pub job_id: JobId,
    pub stage: Stage,
    /// 1-based attempt number.
    pub attempt: u32,
    pub status: StageStatus,
    pub output: Option<StageOutput>,
    pub error: Option<ExecutorError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Where a stage currently stands for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    NotStarted,
    Running,
    /// Waiting for (or re-running after) a failed attempt.
    Retrying,
    Succeeded,
    Failed,
}

/// Per-video state container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Append-only attempt history.
    pub results: Vec<StageResult>,
    /// Stages with an attempt executing or waiting out a retry backoff.
    #[serde(skip)]
    pub(crate) in_flight: BTreeSet<Stage>,
    /// In-flight stages whose attempt has been dispatched but not started,
    /// including retries waiting out their backoff.
    #[serde(skip)]
    pub(crate) not_started: BTreeSet<Stage>,
}

impl Job {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            created_at: Utc::now(),
            cancelled_at: None,
            results: Vec::new(),
            in_flight: BTreeSet::new(),
            not_started: BTreeSet::new(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled_at.is_some()
    }

    pub fn is_in_flight(&self, stage: Stage) -> bool {
        self.in_flight.contains(&stage)
    }

    pub fn in_flight(&self) -> impl Iterator<Item = Stage> + '_ {
        self.in_flight.iter().copied()
    }

    /// Number of attempts recorded for a stage.
    pub fn attempts(&self, stage: Stage) -> u32 {
        self.results.iter().filter(|r| r.stage == stage).count() as u32
    }

    pub fn latest(&self, stage: Stage) -> Option<&StageResult> {
        self.results.iter().rev().find(|r| r.stage == stage)
    }

    pub fn succeeded(&self, stage: Stage) -> bool {
        self.results
            .iter()
            .any(|r| r.stage == stage && r.status == StageStatus::Success)
    }

    pub fn exhausted(&self, stage: Stage) -> bool {
        !self.succeeded(stage)
            && self
                .latest(stage)
                .is_some_and(|r| r.status == StageStatus::Failed)
    }

    /// Output of the successful attempt of a stage.
    pub fn output(&self, stage: Stage) -> Option<&StageOutput> {
        self.results
            .iter()
            .find(|r| r.stage == stage && r.status == StageStatus::Success)
            .and_then(|r| r.output.as_ref())
    }

    pub fn stage_state(&self, stage: Stage) -> StageState {
        if self.succeeded(stage) {
            return StageState::Succeeded;
        }
        match self.latest(stage).map(|r| r.status) {
            Some(StageStatus::Failed) => StageState::Failed,
            Some(StageStatus::Retrying) => StageState::Retrying,
            _ if self.is_in_flight(stage) => StageState::Running,
            _ => StageState::NotStarted,
        }
    }

    /// Derive the overall status from the recorded results.
    pub fn status(&self, dag: &DagDefinition) -> JobStatus {
        if self.is_cancelled() {
            return JobStatus::Cancelled;
        }

        if dag.terminal_stages().iter().all(|s| self.succeeded(*s)) {
            return JobStatus::Completed;
        }

        let failed: Vec<Stage> = dag
            .stages()
            .iter()
            .copied()
            .filter(|s| self.exhausted(*s))
            .collect();

        if !failed.is_empty() {
            let blocked: BTreeSet<Stage> = failed
                .iter()
                .flat_map(|s| dag.descendants(*s))
                .collect();
            let live = dag.stages().iter().any(|s| {
                !blocked.contains(s) && !self.succeeded(*s) && !self.exhausted(*s)
            });
            return if live {
                JobStatus::PartialFailure
            } else {
                JobStatus::Failed
            };
        }

        if self.results.is_empty() && self.in_flight.is_empty() {
            JobStatus::Pending
        } else {
            JobStatus::Running
        }
    }

    /// Terminal with no attempt still executing.
    pub fn is_settled(&self, dag: &DagDefinition) -> bool {
        self.status(dag).is_terminal() && self.in_flight.is_empty()
    }

    /// Stages whose dependencies all succeeded and which may be dispatched now.
    pub fn ready_stages(&self, dag: &DagDefinition) -> Vec<Stage> {
        if self.status(dag).is_terminal() {
            return Vec::new();
        }
        dag.stages()
            .iter()
            .copied()
            .filter(|s| {
                !self.succeeded(*s)
                    && !self.exhausted(*s)
                    && !self.is_in_flight(*s)
                    && dag.dependencies(*s).iter().all(|d| self.succeeded(*d))
            })
            .collect()
    }

    /// Successful outputs of every ancestor of `stage`.
    pub fn upstream_outputs(&self, dag: &DagDefinition, stage: Stage) -> BTreeMap<Stage, StageOutput> {
        dag.ancestors(stage)
            .into_iter()
            .filter_map(|s| self.output(s).map(|o| (s, o.clone())))
            .collect()
    }

    /// The first stage (in DAG order) that failed for good, with its last error.
    pub fn failure(&self, dag: &DagDefinition) -> Option<StageFailure> {
        dag.stages()
            .iter()
            .copied()
            .find(|s| self.exhausted(*s))
            .and_then(|s| self.latest(s))
            .map(|r| StageFailure {
                stage: r.stage,
                attempts: r.attempt,
                code: r.error.as_ref().map(|e| e.code.clone()).unwrap_or_default(),
                message: r.error.as_ref().map(|e| e.message.clone()).unwrap_or_default(),
            })
    }

    pub fn snapshot(&self, dag: &DagDefinition) -> JobSnapshot {
        let stages = dag
            .stages()
            .iter()
            .map(|s| StageSummary {
                stage: *s,
                state: self.stage_state(*s),
                attempts: self.attempts(*s),
                output: self.output(*s).cloned(),
                last_error: self.latest(*s).and_then(|r| r.error.clone()),
            })
            .collect();

        JobSnapshot {
            id: self.id,
            source: self.source.clone(),
            created_at: self.created_at,
            cancelled_at: self.cancelled_at,
            status: self.status(dag),
            settled: self.is_settled(dag),
            in_flight: self.in_flight().collect(),
            stages,
            failure: self.failure(dag),
            results: self.results.clone(),
        }
    }
}

/// Failing stage and its last error, for diagnosis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: Stage,
    pub attempts: u32,
    pub code: String,
    pub message: String,
}

/// Per-stage view inside a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSummary {
    pub stage: Stage,
    pub state: StageState,
    pub attempts: u32,
    pub output: Option<StageOutput>,
    pub last_error: Option<ExecutorError>,
}

/// Read-only copy of a job handed out by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    /// Terminal and no attempt still executing.
    pub settled: bool,
    pub in_flight: Vec<Stage>,
    pub stages: Vec<StageSummary>,
    pub failure: Option<StageFailure>,
    pub results: Vec<StageResult>,
}

impl JobSnapshot {
    pub fn stage(&self, stage: Stage) -> Option<&StageSummary> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    pub fn results_for(&self, stage: Stage) -> Vec<&StageResult> {
        self.results.iter().filter(|r| r.stage == stage).collect()
    }
}
