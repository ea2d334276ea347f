//! Static DAG definition: stage dependencies and per-stage retry policy.

use super::Stage;
use crate::config::PipelineSettings;
use crate::error::{Result, TubeflowError};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Duration;

/// Retry and timeout policy for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry. Doubles for each further retry.
    pub backoff: Duration,
    /// Cap on the retry delay.
    pub max_backoff: Duration,
    /// Maximum execution time of a single attempt.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(300),
            timeout: Duration::from_secs(1800),
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `attempts_made` attempts.
    pub fn can_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Delay before re-running a stage whose attempt number `failed_attempt` failed.
    pub fn delay_for_attempt(&self, failed_attempt: u32) -> Duration {
        if failed_attempt == 0 || self.backoff.is_zero() {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(failed_attempt - 1).unwrap_or(u32::MAX);
        self.backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Declaration of one stage in the DAG.
#[derive(Debug, Clone)]
pub struct StageSpec {
    pub stage: Stage,
    pub depends_on: Vec<Stage>,
    pub policy: RetryPolicy,
}

impl StageSpec {
    pub fn new(stage: Stage, depends_on: &[Stage]) -> Self {
        Self {
            stage,
            depends_on: depends_on.to_vec(),
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Validated, read-only DAG shared by every job.
#[derive(Debug, Clone)]
pub struct DagDefinition {
    specs: BTreeMap<Stage, StageSpec>,
    order: Vec<Stage>,
}

/// `download → transcribe → summarize → {blog_render, podcast_synthesize} → publish`.
pub fn standard_topology() -> Vec<StageSpec> {
    vec![
        StageSpec::new(Stage::Download, &[]),
        StageSpec::new(Stage::Transcribe, &[Stage::Download]),
        StageSpec::new(Stage::Summarize, &[Stage::Transcribe]),
        StageSpec::new(Stage::BlogRender, &[Stage::Summarize]),
        StageSpec::new(Stage::PodcastSynthesize, &[Stage::Summarize]),
        StageSpec::new(Stage::Publish, &[Stage::BlogRender, Stage::PodcastSynthesize]),
    ]
}

impl DagDefinition {
    /// Validate a set of stage declarations.
    ///
    /// Fails on duplicate stages, dependencies on undeclared stages, cycles
    /// and zero-attempt policies.
    pub fn new(specs: Vec<StageSpec>) -> Result<Self> {
        let mut by_stage = BTreeMap::new();
        for spec in specs {
            if spec.policy.max_attempts == 0 {
                return Err(TubeflowError::Config(format!(
                    "Stage '{}' must allow at least one attempt",
                    spec.stage
                )));
            }
            if spec.policy.timeout.is_zero() {
                return Err(TubeflowError::Config(format!(
                    "Stage '{}' has a zero timeout",
                    spec.stage
                )));
            }
            let stage = spec.stage;
            if by_stage.insert(stage, spec).is_some() {
                return Err(TubeflowError::Config(format!(
                    "Stage '{}' is declared more than once",
                    stage
                )));
            }
        }

        for spec in by_stage.values() {
            for dep in &spec.depends_on {
                if !by_stage.contains_key(dep) {
                    return Err(TubeflowError::Config(format!(
                        "Stage '{}' depends on undefined stage '{}'",
                        spec.stage, dep
                    )));
                }
            }
        }

        let order = topological_order(&by_stage)?;

        Ok(Self {
            specs: by_stage,
            order,
        })
    }

    /// The standard topology with policies taken from pipeline settings.
    pub fn from_settings(settings: &PipelineSettings) -> Result<Self> {
        let timeouts = parse_stage_map(&settings.stage_timeout_seconds, "stage_timeout_seconds")?;
        let attempts = parse_stage_map(&settings.retry_max_attempts, "retry_max_attempts")?;
        let backoffs = parse_stage_map(&settings.retry_backoff_seconds, "retry_backoff_seconds")?;

        let specs = standard_topology()
            .into_iter()
            .map(|spec| {
                let stage = spec.stage;
                let policy = RetryPolicy {
                    max_attempts: attempts
                        .get(&stage)
                        .copied()
                        .unwrap_or(settings.default_retry_max_attempts),
                    backoff: Duration::from_secs(
                        backoffs
                            .get(&stage)
                            .copied()
                            .unwrap_or(settings.default_retry_backoff_seconds),
                    ),
                    max_backoff: Duration::from_secs(settings.max_backoff_seconds),
                    timeout: Duration::from_secs(
                        timeouts
                            .get(&stage)
                            .copied()
                            .unwrap_or(settings.default_timeout_seconds),
                    ),
                };
                spec.with_policy(policy)
            })
            .collect();

        Self::new(specs)
    }

    /// Stages in a dependency-respecting order.
    pub fn stages(&self) -> &[Stage] {
        &self.order
    }

    pub fn contains(&self, stage: Stage) -> bool {
        self.specs.contains_key(&stage)
    }

    pub fn dependencies(&self, stage: Stage) -> &[Stage] {
        self.specs
            .get(&stage)
            .map(|s| s.depends_on.as_slice())
            .unwrap_or(&[])
    }

    pub fn dependents(&self, stage: Stage) -> Vec<Stage> {
        self.order
            .iter()
            .copied()
            .filter(|s| self.dependencies(*s).contains(&stage))
            .collect()
    }

    /// All stages `stage` transitively depends on.
    pub fn ancestors(&self, stage: Stage) -> BTreeSet<Stage> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<Stage> = self.dependencies(stage).to_vec();
        while let Some(s) = stack.pop() {
            if seen.insert(s) {
                stack.extend_from_slice(self.dependencies(s));
            }
        }
        seen
    }

    /// All stages that transitively depend on `stage`.
    pub fn descendants(&self, stage: Stage) -> BTreeSet<Stage> {
        let mut seen = BTreeSet::new();
        let mut stack = self.dependents(stage);
        while let Some(s) = stack.pop() {
            if seen.insert(s) {
                stack.extend(self.dependents(s));
            }
        }
        seen
    }

    /// Stages nothing depends on. A job completes when all of them succeed.
    pub fn terminal_stages(&self) -> Vec<Stage> {
        self.order
            .iter()
            .copied()
            .filter(|s| self.dependents(*s).is_empty())
            .collect()
    }

    pub fn policy(&self, stage: Stage) -> RetryPolicy {
        self.specs
            .get(&stage)
            .map(|s| s.policy)
            .unwrap_or_default()
    }
}

/// Kahn's algorithm; any stage left unvisited sits on a cycle.
fn topological_order(specs: &BTreeMap<Stage, StageSpec>) -> Result<Vec<Stage>> {
    let mut in_degree: BTreeMap<Stage, usize> = specs
        .values()
        .map(|s| (s.stage, s.depends_on.len()))
        .collect();

    let mut ready: VecDeque<Stage> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(s, _)| *s)
        .collect();

    let mut order = Vec::with_capacity(specs.len());
    while let Some(stage) = ready.pop_front() {
        order.push(stage);
        for spec in specs.values() {
            if spec.depends_on.contains(&stage) {
                if let Some(d) = in_degree.get_mut(&spec.stage) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push_back(spec.stage);
                    }
                }
            }
        }
    }

    if order.len() != specs.len() {
        let cyclic: Vec<String> = specs
            .keys()
            .filter(|s| !order.contains(s))
            .map(|s| s.to_string())
            .collect();
        return Err(TubeflowError::Config(format!(
            "Pipeline contains a cycle through: {}",
            cyclic.join(", ")
        )));
    }

    Ok(order)
}

fn parse_stage_map<V: Copy>(map: &BTreeMap<String, V>, name: &str) -> Result<BTreeMap<Stage, V>> {
    map.iter()
        .map(|(key, value)| {
            key.parse::<Stage>()
                .map(|stage| (stage, *value))
                .map_err(|_| {
                    TubeflowError::Config(format!("{} references undefined stage '{}'", name, key))
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_topology_order() {
        let dag = DagDefinition::new(standard_topology()).unwrap();
        let order = dag.stages();
        let pos = |s: Stage| order.iter().position(|x| *x == s).unwrap();

        assert_eq!(order.len(), 6);
        assert!(pos(Stage::Download) < pos(Stage::Transcribe));
        assert!(pos(Stage::Summarize) < pos(Stage::BlogRender));
        assert!(pos(Stage::Summarize) < pos(Stage::PodcastSynthesize));
        assert!(pos(Stage::BlogRender) < pos(Stage::Publish));
        assert!(pos(Stage::PodcastSynthesize) < pos(Stage::Publish));
        assert_eq!(dag.terminal_stages(), vec![Stage::Publish]);
    }

    #[test]
    fn test_fan_out_and_join() {
        let dag = DagDefinition::new(standard_topology()).unwrap();
        assert_eq!(
            dag.dependents(Stage::Summarize),
            vec![Stage::BlogRender, Stage::PodcastSynthesize]
        );
        assert_eq!(
            dag.dependencies(Stage::Publish),
            &[Stage::BlogRender, Stage::PodcastSynthesize]
        );
        assert!(dag.ancestors(Stage::Publish).contains(&Stage::Download));
        assert!(!dag.descendants(Stage::BlogRender).contains(&Stage::PodcastSynthesize));
    }

    #[test]
    fn test_cycle_is_rejected() {
        let specs = vec![
            StageSpec::new(Stage::Download, &[Stage::Publish]),
            StageSpec::new(Stage::Transcribe, &[Stage::Download]),
            StageSpec::new(Stage::Publish, &[Stage::Transcribe]),
        ];
        let err = DagDefinition::new(specs).unwrap_err();
        assert!(matches!(err, TubeflowError::Config(msg) if msg.contains("cycle")));
    }

    #[test]
    fn test_undefined_dependency_is_rejected() {
        let specs = vec![
            StageSpec::new(Stage::Transcribe, &[Stage::Download]),
            StageSpec::new(Stage::Summarize, &[Stage::Transcribe]),
        ];
        let err = DagDefinition::new(specs).unwrap_err();
        assert!(matches!(err, TubeflowError::Config(msg) if msg.contains("undefined stage 'download'")));
    }

    #[test]
    fn test_duplicate_stage_is_rejected() {
        let specs = vec![
            StageSpec::new(Stage::Download, &[]),
            StageSpec::new(Stage::Download, &[]),
        ];
        assert!(DagDefinition::new(specs).is_err());
    }

    #[test]
    fn test_from_settings_applies_overrides() {
        let mut settings = PipelineSettings::default();
        settings.retry_max_attempts.insert("transcribe".to_string(), 5);
        settings.retry_backoff_seconds.insert("publish".to_string(), 1);
        settings.stage_timeout_seconds.insert("download".to_string(), 60);

        let dag = DagDefinition::from_settings(&settings).unwrap();
        assert_eq!(dag.policy(Stage::Transcribe).max_attempts, 5);
        assert_eq!(dag.policy(Stage::Summarize).max_attempts, 3);
        assert_eq!(dag.policy(Stage::Publish).backoff, Duration::from_secs(1));
        assert_eq!(dag.policy(Stage::Download).timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_from_settings_rejects_unknown_stage() {
        let mut settings = PipelineSettings::default();
        settings.retry_max_attempts.insert("upload".to_string(), 2);
        let err = DagDefinition::from_settings(&settings).unwrap_err();
        assert!(matches!(err, TubeflowError::Config(_)));
    }

    #[test]
    fn test_from_settings_rejects_zero_attempts() {
        let mut settings = PipelineSettings::default();
        settings.retry_max_attempts.insert("summarize".to_string(), 0);
        assert!(DagDefinition::from_settings(&settings).is_err());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(10),
            timeout: Duration::from_secs(60),
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(10));
        assert!(policy.can_retry(9));
        assert!(!policy.can_retry(10));
    }
}
