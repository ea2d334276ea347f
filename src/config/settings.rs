//! Configuration settings for tubeflow.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub pipeline: PipelineSettings,
    pub download: DownloadSettings,
    pub transcription: TranscriptionSettings,
    pub summarization: SummarizationSettings,
    pub blog: BlogSettings,
    pub podcast: PodcastSettings,
    pub publish: PublishSettings,
    pub store: StoreSettings,
    pub prompts: PromptSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory for storing application data.
    pub data_dir: String,
    /// Directory where per-job working files are written.
    pub output_dir: String,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.tubeflow".to_string(),
            output_dir: "~/.tubeflow/output".to_string(),
            log_level: "warn".to_string(),
        }
    }
}

/// Scheduling, timeout and retry settings for the stage pipeline.
///
/// The per-stage maps are keyed by stage name (`download`, `transcribe`,
/// `summarize`, `blog_render`, `podcast_synthesize`, `publish`). Stages
/// missing from a map fall back to the matching `default_*` value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Maximum number of jobs admitted at once.
    pub max_concurrent_jobs: usize,
    /// Number of stage executions that may run in parallel.
    pub workers: usize,
    /// Maximum number of jobs waiting for admission. Unbounded if unset.
    pub max_queued_jobs: Option<usize>,
    pub default_timeout_seconds: u64,
    pub default_retry_max_attempts: u32,
    pub default_retry_backoff_seconds: u64,
    /// Upper bound for the exponential retry backoff.
    pub max_backoff_seconds: u64,
    pub stage_timeout_seconds: BTreeMap<String, u64>,
    pub retry_max_attempts: BTreeMap<String, u32>,
    pub retry_backoff_seconds: BTreeMap<String, u64>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            workers: 4,
            max_queued_jobs: None,
            default_timeout_seconds: 1800,
            default_retry_max_attempts: 3,
            default_retry_backoff_seconds: 5,
            max_backoff_seconds: 300,
            stage_timeout_seconds: BTreeMap::new(),
            retry_max_attempts: BTreeMap::new(),
            retry_backoff_seconds: BTreeMap::new(),
        }
    }
}

/// Video download settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    /// Download the audio track only (required for transcription).
    pub audio_only: bool,
    /// Audio container produced when `audio_only` is set.
    pub audio_format: String,
    /// Maximum video height when downloading full video.
    pub max_height: u32,
    /// Maximum media duration to process (in seconds).
    pub max_duration_seconds: u32,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            audio_only: true,
            audio_format: "mp3".to_string(),
            max_height: 720,
            max_duration_seconds: 7200, // 2 hours
        }
    }
}

/// Transcription service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionSettings {
    /// Whisper model to use.
    pub model: String,
    /// Optional language hint (ISO-639-1).
    pub language: Option<String>,
    /// Length of the pieces long audio is split into before upload.
    pub chunk_duration_seconds: u32,
    /// Maximum concurrent chunk uploads.
    pub max_concurrent_chunks: usize,
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            model: "whisper-1".to_string(),
            language: None,
            chunk_duration_seconds: 600,
            max_concurrent_chunks: 3,
        }
    }
}

/// Summarization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizationSettings {
    pub model: String,
    /// Maximum tokens in the generated summary.
    pub max_tokens: u32,
}

impl Default for SummarizationSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_tokens: 400,
        }
    }
}

/// How blog posts are produced.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum BlogMethod {
    /// Fixed Markdown template around the summary.
    #[default]
    Template,
    /// LLM-written post.
    OpenAI,
}

impl std::str::FromStr for BlogMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "template" => Ok(BlogMethod::Template),
            "openai" => Ok(BlogMethod::OpenAI),
            _ => Err(format!("Unknown blog method: {}", s)),
        }
    }
}

impl std::fmt::Display for BlogMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlogMethod::Template => write!(f, "template"),
            BlogMethod::OpenAI => write!(f, "openai"),
        }
    }
}

/// Blog rendering settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlogSettings {
    pub method: BlogMethod,
    /// Model used when `method = "openai"`.
    pub model: String,
    pub max_tokens: u32,
    pub author: String,
}

impl Default for BlogSettings {
    fn default() -> Self {
        Self {
            method: BlogMethod::Template,
            model: "gpt-4o-mini".to_string(),
            max_tokens: 1000,
            author: "AI Content Generator".to_string(),
        }
    }
}

/// Podcast synthesis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PodcastSettings {
    /// Text-to-speech model (tts-1, tts-1-hd).
    pub model: String,
    /// Voice name (alloy, echo, fable, onyx, nova, shimmer).
    pub voice: String,
    pub author: String,
}

impl Default for PodcastSettings {
    fn default() -> Self {
        Self {
            model: "tts-1".to_string(),
            voice: "alloy".to_string(),
            author: "AI Content Creator".to_string(),
        }
    }
}

/// Publishing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishSettings {
    /// Directory of the generated site.
    pub site_dir: String,
    pub site_title: String,
    /// Public URL the site is served from, used for absolute links.
    pub base_url: Option<String>,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            site_dir: "~/.tubeflow/site".to_string(),
            site_title: "Video Notes".to_string(),
            base_url: None,
        }
    }
}

/// Job store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Path to the SQLite job database.
    pub sqlite_path: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            sqlite_path: "~/.tubeflow/jobs.db".to_string(),
        }
    }
}

/// Prompt customization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct PromptSettings {
    /// Directory for custom prompts (overrides defaults).
    pub custom_dir: Option<String>,
    /// Custom variables available in all prompts as {{variable_name}}.
    pub variables: std::collections::HashMap<String, String>,
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> crate::error::Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> crate::error::Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let settings: Settings = toml::from_str(&content)?;
            Ok(settings)
        } else {
            Ok(Settings::default())
        }
    }

    /// Save settings to the default configuration file.
    pub fn save(&self) -> crate::error::Result<()> {
        self.save_to(&Self::default_config_path())
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::TubeflowError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tubeflow")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    pub fn data_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.data_dir)
    }

    pub fn output_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.output_dir)
    }

    pub fn site_dir(&self) -> PathBuf {
        Self::expand_path(&self.publish.site_dir)
    }

    pub fn sqlite_path(&self) -> PathBuf {
        Self::expand_path(&self.store.sqlite_path)
    }
}
