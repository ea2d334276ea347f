//! Job admission and the stage worker pool.
//!
//! The scheduler admits at most `max_concurrent_jobs` jobs at a time; later
//! submissions wait in a FIFO queue. Admitted jobs are advanced by the
//! orchestrator, and the stage attempts it hands back run on a bounded pool of
//! tokio tasks. Each finished attempt is fed back into the orchestrator, which
//! decides what runs next.

use crate::config::PipelineSettings;
use crate::error::{Result, TubeflowError};
use crate::executor::{ExecutorError, ExecutorRegistry};
use crate::orchestrator::{Advance, Dispatch, Orchestrator};
use crate::pipeline::{JobId, JobSnapshot};
use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{mpsc, Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, instrument, warn};

/// Admission and worker pool limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Maximum number of jobs admitted at once.
    pub max_concurrent_jobs: usize,
    /// Maximum number of stage attempts executing at once.
    pub workers: usize,
    /// Maximum number of jobs waiting for admission. Unbounded if `None`.
    pub max_queued_jobs: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from_settings(&PipelineSettings::default())
    }
}

impl SchedulerConfig {
    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self {
            max_concurrent_jobs: settings.max_concurrent_jobs,
            workers: settings.workers,
            max_queued_jobs: settings.max_queued_jobs,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_jobs == 0 {
            return Err(TubeflowError::Config(
                "max_concurrent_jobs must be at least 1".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(TubeflowError::Config("workers must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Number of admitted and waiting jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchedulerCounts {
    pub running: usize,
    pub queued: usize,
}

#[derive(Default)]
struct Admission {
    queue: VecDeque<JobId>,
    running: HashSet<JobId>,
}

struct Inner {
    orchestrator: Arc<Orchestrator>,
    registry: ExecutorRegistry,
    config: SchedulerConfig,
    admission: Mutex<Admission>,
    workers: Arc<Semaphore>,
    dispatch_tx: mpsc::UnboundedSender<Dispatch>,
    released: Notify,
}

/// Handle to the running scheduler. Cheap to clone.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Validate the setup and start the dispatch loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        orchestrator: Arc<Orchestrator>,
        registry: ExecutorRegistry,
        config: SchedulerConfig,
    ) -> Result<Self> {
        config.validate()?;
        registry.validate_against(orchestrator.dag())?;

        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            orchestrator,
            registry,
            config,
            admission: Mutex::new(Admission::default()),
            workers: Arc::new(Semaphore::new(config.workers)),
            dispatch_tx,
            released: Notify::new(),
        });

        tokio::spawn(dispatch_loop(Arc::downgrade(&inner), dispatch_rx));

        info!(
            "Scheduler started: {} concurrent job(s), {} worker(s)",
            config.max_concurrent_jobs, config.workers
        );
        Ok(Self { inner })
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.inner.orchestrator
    }

    /// Create a job and queue it for admission. Returns without waiting for
    /// any stage to run.
    #[instrument(skip(self))]
    pub fn submit(&self, source: &str) -> Result<JobId> {
        let source = source.trim();
        if source.is_empty() {
            return Err(TubeflowError::InvalidInput("empty source reference".to_string()));
        }

        let job_id = {
            let mut admission = self.inner.lock_admission()?;
            if let Some(max_queued) = self.inner.config.max_queued_jobs {
                let slots_full = admission.running.len() >= self.inner.config.max_concurrent_jobs;
                if slots_full && admission.queue.len() >= max_queued {
                    return Err(TubeflowError::CapacityExceeded(format!(
                        "{} job(s) already waiting",
                        admission.queue.len()
                    )));
                }
            }
            let snapshot = self.inner.orchestrator.create_job(source)?;
            admission.queue.push_back(snapshot.id);
            snapshot.id
        };

        self.inner.admit_waiting();
        Ok(job_id)
    }

    /// Load unfinished jobs from the store and queue them for admission.
    pub fn resume(&self) -> Result<Vec<JobId>> {
        let resumable = self.inner.orchestrator.restore()?;
        {
            let mut admission = self.inner.lock_admission()?;
            for job_id in &resumable {
                if !admission.running.contains(job_id) && !admission.queue.contains(job_id) {
                    admission.queue.push_back(*job_id);
                }
            }
        }
        self.inner.admit_waiting();
        Ok(resumable)
    }

    pub fn status(&self, job_id: JobId) -> Result<JobSnapshot> {
        self.inner.orchestrator.snapshot(job_id)
    }

    pub fn list(&self) -> Result<Vec<JobSnapshot>> {
        self.inner.orchestrator.list()
    }

    /// Cancel a job. A queued job settles immediately; an admitted one settles
    /// once its running attempts have reported back.
    #[instrument(skip(self))]
    pub fn cancel(&self, job_id: JobId) -> Result<JobSnapshot> {
        let snapshot = self.inner.orchestrator.cancel(job_id)?;
        {
            let mut admission = self.inner.lock_admission()?;
            admission.queue.retain(|id| *id != job_id);
        }
        if snapshot.settled {
            self.inner.release(job_id);
        }
        Ok(snapshot)
    }

    pub fn counts(&self) -> Result<SchedulerCounts> {
        let admission = self.inner.lock_admission()?;
        Ok(SchedulerCounts {
            running: admission.running.len(),
            queued: admission.queue.len(),
        })
    }

    /// Wait until the job has settled and released its slot.
    pub async fn wait_settled(&self, job_id: JobId) -> Result<JobSnapshot> {
        loop {
            let notified = self.inner.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let snapshot = self.status(job_id)?;
            if snapshot.settled && !self.inner.is_tracked(job_id)? {
                return Ok(snapshot);
            }
            notified.await;
        }
    }

    /// Wait until no job is queued or running.
    pub async fn wait_idle(&self) -> Result<()> {
        loop {
            let notified = self.inner.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let counts = self.counts()?;
            if counts.running == 0 && counts.queued == 0 {
                return Ok(());
            }
            notified.await;
        }
    }
}

impl Inner {
    fn lock_admission(&self) -> Result<MutexGuard<'_, Admission>> {
        self.admission
            .lock()
            .map_err(|e| TubeflowError::Internal(format!("Admission lock poisoned: {}", e)))
    }

    fn is_tracked(&self, job_id: JobId) -> Result<bool> {
        let admission = self.lock_admission()?;
        Ok(admission.running.contains(&job_id) || admission.queue.contains(&job_id))
    }

    /// Admit queued jobs while slots are free.
    fn admit_waiting(&self) {
        loop {
            let next = match self.lock_admission() {
                Ok(mut admission) => {
                    if admission.running.len() >= self.config.max_concurrent_jobs {
                        None
                    } else {
                        let next = admission.queue.pop_front();
                        if let Some(job_id) = next {
                            admission.running.insert(job_id);
                        }
                        next
                    }
                }
                Err(e) => {
                    error!("{}", e);
                    None
                }
            };

            let Some(job_id) = next else {
                break;
            };

            info!(%job_id, "Admitting job");
            match self.orchestrator.advance(job_id) {
                Ok(advance) => self.handle(advance),
                Err(e) => {
                    error!(%job_id, "Failed to advance admitted job: {}", e);
                    self.release(job_id);
                }
            }
        }
    }

    /// Queue follow-up dispatches and free the slot of a settled job.
    fn handle(&self, advance: Advance) {
        let settled = advance.settled();
        let job_id = advance.snapshot.id;
        for dispatch in advance.dispatches {
            self.enqueue(dispatch);
        }
        if settled {
            self.release(job_id);
        }
    }

    fn enqueue(&self, dispatch: Dispatch) {
        if dispatch.delay.is_zero() {
            if self.dispatch_tx.send(dispatch).is_err() {
                warn!("Dispatch loop has stopped");
            }
            return;
        }

        debug!(job_id = %dispatch.job_id, stage = %dispatch.stage, "Retrying in {:?}", dispatch.delay);
        let tx = self.dispatch_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(dispatch.delay).await;
            let _ = tx.send(dispatch);
        });
    }

    fn release(&self, job_id: JobId) {
        let was_running = match self.lock_admission() {
            Ok(mut admission) => admission.running.remove(&job_id),
            Err(e) => {
                error!("{}", e);
                false
            }
        };
        if was_running {
            debug!(%job_id, "Released job slot");
            self.admit_waiting();
        }
        self.released.notify_waiters();
    }
}

async fn dispatch_loop(inner: Weak<Inner>, mut rx: mpsc::UnboundedReceiver<Dispatch>) {
    while let Some(dispatch) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let permit = match inner.workers.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        tokio::spawn(run_unit(inner, dispatch, permit));
    }
    debug!("Dispatch loop stopped");
}

/// Run one stage attempt and report its outcome.
async fn run_unit(inner: Arc<Inner>, dispatch: Dispatch, permit: OwnedSemaphorePermit) {
    match inner.orchestrator.begin_attempt(&dispatch) {
        Ok(Some(advance)) => {
            drop(permit);
            inner.handle(advance);
            return;
        }
        Ok(None) => {}
        Err(e) => {
            error!(job_id = %dispatch.job_id, "Cannot start stage: {}", e);
            return;
        }
    }

    let started_at = Utc::now();
    let outcome = match inner.registry.get(dispatch.stage) {
        Some(executor) => {
            let attempt = AssertUnwindSafe(executor.execute(&dispatch.input)).catch_unwind();
            match tokio::time::timeout(dispatch.timeout, attempt).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(ExecutorError::new("panic", "stage executor panicked")),
                Err(_) => Err(ExecutorError::timeout(dispatch.timeout)),
            }
        }
        None => Err(ExecutorError::new(
            "configuration",
            format!("no executor registered for {}", dispatch.stage),
        )),
    };
    drop(permit);

    match inner.orchestrator.record_result(&dispatch, outcome, started_at) {
        Ok(advance) => inner.handle(advance),
        Err(e) => error!(job_id = %dispatch.job_id, "Failed to record stage result: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{StageExecutor, StageInput, StageOutput};
    use crate::pipeline::{
        standard_topology, DagDefinition, JobStatus, RetryPolicy, Stage, StageStatus,
    };
    use crate::store::{JobStore, MemoryJobStore, SqliteJobStore};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    /// Executor whose behaviour is scripted per test.
    struct Scripted {
        stage: Stage,
        /// Attempts numbered up to this fail.
        fail_through: u32,
        sleep: Duration,
        gate: Option<Arc<Semaphore>>,
        started: Option<mpsc::UnboundedSender<JobId>>,
        panics: bool,
        calls: AtomicU32,
        active: Mutex<HashSet<JobId>>,
        overlaps: AtomicU32,
    }

    impl Scripted {
        fn new(stage: Stage) -> Self {
            Self {
                stage,
                fail_through: 0,
                sleep: Duration::ZERO,
                gate: None,
                started: None,
                panics: false,
                calls: AtomicU32::new(0),
                active: Mutex::new(HashSet::new()),
                overlaps: AtomicU32::new(0),
            }
        }

        fn failing(mut self, attempts: u32) -> Self {
            self.fail_through = attempts;
            self
        }

        fn sleeping(mut self, d: Duration) -> Self {
            self.sleep = d;
            self
        }

        fn gated(mut self, gate: Arc<Semaphore>) -> Self {
            self.gate = Some(gate);
            self
        }

        fn reporting(mut self, tx: mpsc::UnboundedSender<JobId>) -> Self {
            self.started = Some(tx);
            self
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StageExecutor for Scripted {
        fn stage(&self) -> Stage {
            self.stage
        }

        async fn execute(&self, input: &StageInput) -> std::result::Result<StageOutput, ExecutorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.active.lock().unwrap().insert(input.job_id) {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            if let Some(tx) = &self.started {
                let _ = tx.send(input.job_id);
            }
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            if !self.sleep.is_zero() {
                tokio::time::sleep(self.sleep).await;
            }
            self.active.lock().unwrap().remove(&input.job_id);

            if self.panics {
                panic!("scripted panic");
            }
            if input.attempt <= self.fail_through {
                return Err(ExecutorError::new("executor", format!("{} attempt {} failed", self.stage, input.attempt)));
            }
            Ok(StageOutput::text(format!("{} output", self.stage)))
        }
    }

    struct Harness {
        scheduler: Scheduler,
        executors: HashMap<Stage, Arc<Scripted>>,
    }

    impl Harness {
        fn calls(&self, stage: Stage) -> u32 {
            self.executors[&stage].calls()
        }
    }

    fn policy(max_attempts: u32, timeout: Duration) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
            timeout,
        }
    }

    fn dag_with(max_attempts: u32, timeout: Duration) -> Arc<DagDefinition> {
        let specs = standard_topology()
            .into_iter()
            .map(|s| s.with_policy(policy(max_attempts, timeout)))
            .collect();
        Arc::new(DagDefinition::new(specs).unwrap())
    }

    fn harness_with(
        dag: Arc<DagDefinition>,
        store: Arc<dyn JobStore>,
        config: SchedulerConfig,
        overrides: Vec<Scripted>,
    ) -> Harness {
        let mut executors: HashMap<Stage, Arc<Scripted>> = Stage::ALL
            .iter()
            .map(|s| (*s, Arc::new(Scripted::new(*s))))
            .collect();
        for executor in overrides {
            executors.insert(executor.stage, Arc::new(executor));
        }

        let mut registry = ExecutorRegistry::new();
        for executor in executors.values() {
            registry.register(executor.clone());
        }

        let orchestrator = Arc::new(Orchestrator::new(dag, store, PathBuf::from("/tmp/tubeflow-test")));
        let scheduler = Scheduler::start(orchestrator, registry, config).unwrap();
        Harness { scheduler, executors }
    }

    fn harness(max_concurrent_jobs: usize, overrides: Vec<Scripted>) -> Harness {
        harness_with(
            dag_with(3, Duration::from_secs(5)),
            Arc::new(MemoryJobStore::new()),
            SchedulerConfig {
                max_concurrent_jobs,
                workers: 4,
                max_queued_jobs: None,
            },
            overrides,
        )
    }

    async fn settle(h: &Harness, job_id: JobId) -> JobSnapshot {
        tokio::time::timeout(WAIT, h.scheduler.wait_settled(job_id))
            .await
            .expect("job did not settle in time")
            .unwrap()
    }

    async fn next_start(rx: &mut mpsc::UnboundedReceiver<JobId>) -> JobId {
        tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("no stage started in time")
            .unwrap()
    }

    #[tokio::test]
    async fn test_happy_path_completes() {
        let h = harness(2, vec![]);
        let job_id = h.scheduler.submit("https://youtu.be/dQw4w9WgXcQ").unwrap();

        let snapshot = settle(&h, job_id).await;
        assert_eq!(snapshot.status, JobStatus::Completed);
        for stage in Stage::ALL {
            assert_eq!(h.calls(stage), 1, "{} ran more than once", stage);
        }
        assert_eq!(h.scheduler.counts().unwrap(), SchedulerCounts { running: 0, queued: 0 });
    }

    #[tokio::test]
    async fn test_transcribe_recovers_on_third_attempt() {
        let h = harness(2, vec![Scripted::new(Stage::Transcribe).failing(2)]);
        let job_id = h.scheduler.submit("job-a").unwrap();

        let snapshot = settle(&h, job_id).await;
        assert_eq!(snapshot.status, JobStatus::Completed);

        let attempts = snapshot.results_for(Stage::Transcribe);
        assert_eq!(attempts.len(), 3);
        assert_eq!(
            attempts.iter().map(|r| r.status).collect::<Vec<_>>(),
            vec![StageStatus::Retrying, StageStatus::Retrying, StageStatus::Success]
        );
        assert_eq!(attempts[2].attempt, 3);
        assert_eq!(snapshot.stage(Stage::Transcribe).unwrap().attempts, 3);
    }

    #[tokio::test]
    async fn test_podcast_exhaustion_fails_job_but_keeps_blog() {
        let h = harness(2, vec![Scripted::new(Stage::PodcastSynthesize).failing(u32::MAX)]);
        let job_id = h.scheduler.submit("job-b").unwrap();

        let snapshot = settle(&h, job_id).await;
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!(h.calls(Stage::PodcastSynthesize), 3);
        assert_eq!(h.calls(Stage::Publish), 0);
        assert!(snapshot.results_for(Stage::Publish).is_empty());

        let blog = snapshot.stage(Stage::BlogRender).unwrap();
        assert_eq!(
            blog.output.as_ref().and_then(|o| o.as_text()),
            Some("blog_render output")
        );

        let failure = snapshot.failure.unwrap();
        assert_eq!(failure.stage, Stage::PodcastSynthesize);
        assert!(failure.message.contains("attempt 3"));

        // Never dispatched again once exhausted.
        let again = h.scheduler.orchestrator().advance(job_id).unwrap();
        assert!(again.dispatches.is_empty());
        assert_eq!(again.snapshot.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_third_job_waits_for_a_free_slot() {
        let gate = Arc::new(Semaphore::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let h = harness(
            2,
            vec![Scripted::new(Stage::Download).gated(gate.clone()).reporting(tx)],
        );

        let ids: Vec<JobId> = (0..3)
            .map(|i| h.scheduler.submit(&format!("video-{}", i)).unwrap())
            .collect();

        let first = next_start(&mut rx).await;
        let second = next_start(&mut rx).await;
        assert!(ids[..2].contains(&first) && ids[..2].contains(&second));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(h.scheduler.status(ids[2]).unwrap().status, JobStatus::Pending);
        assert_eq!(h.scheduler.counts().unwrap(), SchedulerCounts { running: 2, queued: 1 });

        gate.add_permits(1);
        assert_eq!(next_start(&mut rx).await, ids[2]);

        gate.add_permits(2);
        tokio::time::timeout(WAIT, h.scheduler.wait_idle())
            .await
            .unwrap()
            .unwrap();
        for id in ids {
            assert_eq!(h.scheduler.status(id).unwrap().status, JobStatus::Completed);
        }
    }

    #[tokio::test]
    async fn test_cancel_during_transcribe() {
        let gate = Arc::new(Semaphore::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let h = harness(
            2,
            vec![Scripted::new(Stage::Transcribe).gated(gate.clone()).reporting(tx)],
        );

        let job_id = h.scheduler.submit("job-d").unwrap();
        assert_eq!(next_start(&mut rx).await, job_id);

        let cancelled = h.scheduler.cancel(job_id).unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert!(!cancelled.settled);

        gate.add_permits(1);
        let snapshot = settle(&h, job_id).await;
        assert_eq!(snapshot.status, JobStatus::Cancelled);

        let transcribe = snapshot.results_for(Stage::Transcribe);
        assert_eq!(transcribe.len(), 1);
        assert_eq!(transcribe[0].status, StageStatus::Success);
        assert_eq!(h.calls(Stage::Summarize), 0);
    }

    #[tokio::test]
    async fn test_cancel_queued_job_settles_immediately() {
        let gate = Arc::new(Semaphore::new(0));
        let h = harness(1, vec![Scripted::new(Stage::Download).gated(gate.clone())]);

        let running = h.scheduler.submit("first").unwrap();
        let queued = h.scheduler.submit("second").unwrap();

        let snapshot = h.scheduler.cancel(queued).unwrap();
        assert!(snapshot.settled);
        assert_eq!(h.scheduler.counts().unwrap(), SchedulerCounts { running: 1, queued: 0 });

        gate.add_permits(1);
        assert_eq!(settle(&h, running).await.status, JobStatus::Completed);
        assert_eq!(h.calls(Stage::Download), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_frees_slot() {
        let specs = standard_topology()
            .into_iter()
            .map(|s| {
                s.with_policy(RetryPolicy {
                    max_attempts: 3,
                    backoff: Duration::from_secs(30),
                    max_backoff: Duration::from_secs(60),
                    timeout: Duration::from_secs(5),
                })
            })
            .collect();
        let dag = Arc::new(DagDefinition::new(specs).unwrap());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let h = harness_with(
            dag,
            Arc::new(MemoryJobStore::new()),
            SchedulerConfig {
                max_concurrent_jobs: 1,
                workers: 4,
                max_queued_jobs: None,
            },
            vec![Scripted::new(Stage::Download).failing(1).reporting(tx)],
        );

        let first = h.scheduler.submit("first").unwrap();
        let second = h.scheduler.submit("second").unwrap();
        assert_eq!(next_start(&mut rx).await, first);

        // Wait until the first attempt failed and the retry is backing off.
        tokio::time::timeout(WAIT, async {
            while h.scheduler.status(first).unwrap().results.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("first attempt did not fail in time");

        let cancelled = h.scheduler.cancel(first).unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert!(cancelled.settled);
        assert_eq!(settle(&h, first).await.results.len(), 1);

        // The slot goes to the queued job well before the backoff ends.
        assert_eq!(next_start(&mut rx).await, second);
        h.scheduler.cancel(second).unwrap();
        assert_eq!(settle(&h, second).await.status, JobStatus::Cancelled);
        assert_eq!(h.calls(Stage::Download), 2);
    }

    #[tokio::test]
    async fn test_no_duplicate_in_flight_attempts() {
        let h = harness(
            4,
            vec![
                Scripted::new(Stage::Transcribe).failing(1).sleeping(Duration::from_millis(5)),
                Scripted::new(Stage::BlogRender).sleeping(Duration::from_millis(5)),
                Scripted::new(Stage::PodcastSynthesize).sleeping(Duration::from_millis(5)),
            ],
        );

        let ids: Vec<JobId> = (0..6)
            .map(|i| h.scheduler.submit(&format!("video-{}", i)).unwrap())
            .collect();
        tokio::time::timeout(WAIT, h.scheduler.wait_idle())
            .await
            .unwrap()
            .unwrap();

        for executor in h.executors.values() {
            assert_eq!(executor.overlaps.load(Ordering::SeqCst), 0, "{}", executor.stage);
        }
        for id in ids {
            let snapshot = h.scheduler.status(id).unwrap();
            assert_eq!(snapshot.status, JobStatus::Completed);
            assert_eq!(snapshot.results_for(Stage::Publish).len(), 1);
        }
        assert_eq!(h.calls(Stage::Transcribe), 12);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let h = harness_with(
            dag_with(2, Duration::from_millis(30)),
            Arc::new(MemoryJobStore::new()),
            SchedulerConfig::default(),
            vec![Scripted::new(Stage::Transcribe).sleeping(Duration::from_secs(2))],
        );
        let job_id = h.scheduler.submit("slow").unwrap();

        let snapshot = settle(&h, job_id).await;
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!(h.calls(Stage::Transcribe), 2);

        let failure = snapshot.failure.unwrap();
        assert_eq!(failure.stage, Stage::Transcribe);
        assert_eq!(failure.code, ExecutorError::TIMEOUT);
    }

    #[tokio::test]
    async fn test_panicking_executor_fails_only_its_job() {
        let mut panicking = Scripted::new(Stage::Summarize);
        panicking.panics = true;
        let h = harness_with(
            dag_with(1, Duration::from_secs(5)),
            Arc::new(MemoryJobStore::new()),
            SchedulerConfig::default(),
            vec![panicking],
        );

        let job_id = h.scheduler.submit("x").unwrap();
        let snapshot = settle(&h, job_id).await;
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!(snapshot.failure.unwrap().code, "panic");
    }

    #[tokio::test]
    async fn test_unknown_job_and_bad_input() {
        let h = harness(1, vec![]);
        let unknown = uuid::Uuid::new_v4();
        assert_eq!(h.scheduler.status(unknown).unwrap_err().code(), "not_found");
        assert_eq!(h.scheduler.cancel(unknown).unwrap_err().code(), "not_found");
        assert_eq!(h.scheduler.submit("  ").unwrap_err().code(), "invalid_input");
    }

    #[tokio::test]
    async fn test_queue_bound_rejects_submissions() {
        let gate = Arc::new(Semaphore::new(0));
        let h = harness_with(
            dag_with(3, Duration::from_secs(5)),
            Arc::new(MemoryJobStore::new()),
            SchedulerConfig {
                max_concurrent_jobs: 1,
                workers: 2,
                max_queued_jobs: Some(1),
            },
            vec![Scripted::new(Stage::Download).gated(gate.clone())],
        );

        h.scheduler.submit("one").unwrap();
        h.scheduler.submit("two").unwrap();
        let err = h.scheduler.submit("three").unwrap_err();
        assert_eq!(err.code(), "capacity_exceeded");

        gate.add_permits(2);
        tokio::time::timeout(WAIT, h.scheduler.wait_idle())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(h.scheduler.list().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_setup_is_rejected() {
        let orchestrator = Arc::new(Orchestrator::new(
            dag_with(3, Duration::from_secs(5)),
            Arc::new(MemoryJobStore::new()),
            PathBuf::from("/tmp/tubeflow-test"),
        ));

        let mut registry = ExecutorRegistry::new();
        for stage in Stage::ALL {
            registry.register(Arc::new(Scripted::new(stage)));
        }
        let zero = SchedulerConfig {
            max_concurrent_jobs: 0,
            workers: 1,
            max_queued_jobs: None,
        };
        let err = Scheduler::start(orchestrator.clone(), registry, zero).err().unwrap();
        assert_eq!(err.code(), "configuration");

        let partial = ExecutorRegistry::new().with(Arc::new(Scripted::new(Stage::Download)));
        let err = Scheduler::start(orchestrator, partial, SchedulerConfig::default())
            .err()
            .unwrap();
        assert_eq!(err.code(), "configuration");
    }

    #[tokio::test]
    async fn test_resume_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("jobs.db");
        let dag = dag_with(3, Duration::from_secs(5));

        let job_id = {
            let store = Arc::new(SqliteJobStore::new(&db).unwrap());
            let orchestrator = Orchestrator::new(dag.clone(), store, dir.path().to_path_buf());
            let job = orchestrator.create_job("interrupted").unwrap();
            let download = orchestrator.advance(job.id).unwrap().dispatches.remove(0);
            orchestrator
                .record_result(&download, Ok(StageOutput::text("audio")), Utc::now())
                .unwrap();
            job.id
        };

        let h = harness_with(
            dag,
            Arc::new(SqliteJobStore::new(&db).unwrap()),
            SchedulerConfig::default(),
            vec![],
        );
        assert_eq!(h.scheduler.resume().unwrap(), vec![job_id]);

        let snapshot = settle(&h, job_id).await;
        assert_eq!(snapshot.status, JobStatus::Completed);
        assert_eq!(h.calls(Stage::Download), 0);
        assert_eq!(h.calls(Stage::Transcribe), 1);
        assert_eq!(snapshot.results_for(Stage::Download).len(), 1);
    }
}
