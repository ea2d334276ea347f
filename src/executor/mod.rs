//! Stage executor abstraction for tubeflow.
//!
//! Every stage (download, transcribe, summarize, blog, podcast, publish) is run
//! through the same [`StageExecutor`] contract, so concrete tools can be swapped
//! without touching the orchestrator.

mod blog;
mod download;
mod podcast;
mod publish;
mod summarize;
mod transcribe;

pub use blog::{render_blog_template, slugify, BlogExecutor};
pub use download::{validate_video_url, DownloadExecutor};
pub use podcast::{split_for_speech, EpisodeMetadata, PodcastExecutor};
pub use publish::{FeedEntry, PublishExecutor, SiteIndex};
pub use summarize::SummarizeExecutor;
pub use transcribe::{format_segments, TranscribeExecutor};

use crate::config::{Prompts, Settings};
use crate::error::{Result, TubeflowError};
use crate::pipeline::{DagDefinition, JobId, Stage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Opaque reference to what a stage produced.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Artifact {
    #[default]
    None,
    File(PathBuf),
    Text(String),
}

/// Output payload of a successful stage execution.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StageOutput {
    pub artifact: Artifact,
    /// Structured metadata (title, video_id, ...), passed on to later stages.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl StageOutput {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            artifact: Artifact::File(path.into()),
            metadata: BTreeMap::new(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            artifact: Artifact::Text(text.into()),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.artifact {
            Artifact::File(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.artifact {
            Artifact::Text(t) => Some(t),
            _ => None,
        }
    }

    /// One-line description for CLI output.
    pub fn describe(&self) -> String {
        match &self.artifact {
            Artifact::None => "(no artifact)".to_string(),
            Artifact::File(p) => p.display().to_string(),
            Artifact::Text(t) => format!("{} chars of text", t.chars().count()),
        }
    }
}

/// Failure reported by a stage executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ExecutorError {
    pub code: String,
    pub message: String,
}

impl ExecutorError {
    pub const TIMEOUT: &'static str = "timeout";

    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn timeout(limit: Duration) -> Self {
        Self::new(
            Self::TIMEOUT,
            format!("stage did not finish within {}s", limit.as_secs_f64()),
        )
    }

    pub fn is_timeout(&self) -> bool {
        self.code == Self::TIMEOUT
    }
}

impl From<TubeflowError> for ExecutorError {
    fn from(err: TubeflowError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

/// Everything a stage needs to run one attempt.
#[derive(Debug, Clone)]
pub struct StageInput {
    pub job_id: JobId,
    /// Source reference the job was submitted with (URL or video id).
    pub source: String,
    pub stage: Stage,
    pub attempt: u32,
    /// Per-job directory for working files.
    pub work_dir: PathBuf,
    /// Successful outputs of every ancestor stage.
    pub upstream: BTreeMap<Stage, StageOutput>,
}

impl StageInput {
    /// Output of an upstream stage, or an error if it is missing.
    pub fn require(&self, stage: Stage) -> Result<&StageOutput> {
        self.upstream.get(&stage).ok_or_else(|| {
            TubeflowError::InvalidInput(format!(
                "{} needs the output of {}, which is not available",
                self.stage, stage
            ))
        })
    }

    /// First value for `key` across upstream metadata, in pipeline order.
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.upstream.values().find_map(|o| o.meta(key))
    }

    /// Title of the source video, falling back to the source reference.
    pub fn title(&self) -> String {
        self.metadata("title")
            .map(str::to_string)
            .unwrap_or_else(|| self.source.clone())
    }
}

/// A pluggable unit of work for one stage.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// The stage this executor implements.
    fn stage(&self) -> Stage;

    /// Run one attempt. Timeouts are enforced by the caller.
    async fn execute(&self, input: &StageInput) -> std::result::Result<StageOutput, ExecutorError>;
}

/// Stage → executor bindings.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<Stage, Arc<dyn StageExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Production executors built from settings.
    pub fn from_settings(settings: &Settings, prompts: &Prompts) -> Result<Self> {
        let registry = Self::new()
            .with(Arc::new(DownloadExecutor::new(settings.download.clone())))
            .with(Arc::new(TranscribeExecutor::new(settings.transcription.clone())?))
            .with(Arc::new(SummarizeExecutor::new(
                settings.summarization.clone(),
                prompts.clone(),
            )?))
            .with(Arc::new(BlogExecutor::new(settings.blog.clone(), prompts.clone())?))
            .with(Arc::new(PodcastExecutor::new(settings.podcast.clone())?))
            .with(Arc::new(PublishExecutor::new(
                settings.site_dir(),
                settings.publish.clone(),
            )));
        Ok(registry)
    }

    /// Bind an executor to the stage it declares, replacing any previous binding.
    pub fn register(&mut self, executor: Arc<dyn StageExecutor>) {
        self.executors.insert(executor.stage(), executor);
    }

    pub fn with(mut self, executor: Arc<dyn StageExecutor>) -> Self {
        self.register(executor);
        self
    }

    pub fn get(&self, stage: Stage) -> Option<Arc<dyn StageExecutor>> {
        self.executors.get(&stage).cloned()
    }

    /// Every DAG stage must have an executor.
    pub fn validate_against(&self, dag: &DagDefinition) -> Result<()> {
        let missing: Vec<String> = dag
            .stages()
            .iter()
            .filter(|s| !self.executors.contains_key(*s))
            .map(|s| s.to_string())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(TubeflowError::Config(format!(
                "No executor registered for stage(s): {}",
                missing.join(", ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::standard_topology;

    struct Noop(Stage);

    #[async_trait]
    impl StageExecutor for Noop {
        fn stage(&self) -> Stage {
            self.0
        }

        async fn execute(&self, _input: &StageInput) -> std::result::Result<StageOutput, ExecutorError> {
            Ok(StageOutput::default())
        }
    }

    #[test]
    fn test_registry_reports_unbound_stages() {
        let dag = DagDefinition::new(standard_topology()).unwrap();
        let registry = ExecutorRegistry::new()
            .with(Arc::new(Noop(Stage::Download)))
            .with(Arc::new(Noop(Stage::Transcribe)));

        let err = registry.validate_against(&dag).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("summarize"));
        assert!(msg.contains("publish"));
        assert!(!msg.contains("download"));
    }

    #[test]
    fn test_registry_complete() {
        let dag = DagDefinition::new(standard_topology()).unwrap();
        let mut registry = ExecutorRegistry::new();
        for stage in Stage::ALL {
            registry.register(Arc::new(Noop(stage)));
        }
        assert!(registry.validate_against(&dag).is_ok());
        assert_eq!(registry.get(Stage::Publish).unwrap().stage(), Stage::Publish);
    }

    #[test]
    fn test_executor_error_from_library_error() {
        let err: ExecutorError = TubeflowError::ToolNotFound("yt-dlp".into()).into();
        assert_eq!(err.code, "tool_not_found");
        assert!(err.message.contains("yt-dlp"));
        assert!(ExecutorError::timeout(Duration::from_secs(3)).is_timeout());
    }

    #[test]
    fn test_output_serialization_is_tagged() {
        let output = StageOutput::file("/tmp/a.mp3").with_meta("title", "A");
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["artifact"]["kind"], "file");
        assert_eq!(json["metadata"]["title"], "A");

        let back: StageOutput = serde_json::from_value(json).unwrap();
        assert_eq!(back, output);
    }

    #[test]
    fn test_input_metadata_lookup() {
        let mut upstream = BTreeMap::new();
        upstream.insert(
            Stage::Download,
            StageOutput::file("/tmp/a.mp3").with_meta("title", "Ownership in Rust"),
        );
        upstream.insert(Stage::Summarize, StageOutput::text("summary"));

        let input = StageInput {
            job_id: uuid::Uuid::new_v4(),
            source: "dQw4w9WgXcQ".to_string(),
            stage: Stage::BlogRender,
            attempt: 1,
            work_dir: PathBuf::from("/tmp"),
            upstream,
        };

        assert_eq!(input.title(), "Ownership in Rust");
        assert!(input.require(Stage::Summarize).is_ok());
        assert!(input.require(Stage::PodcastSynthesize).is_err());
    }
}
