//! Error types for tubeflow.

use thiserror::Error;

/// Library-level error type for tubeflow operations.
#[derive(Error, Debug)]
pub enum TubeflowError {
    /// Invalid pipeline definition or settings. Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("Stage executor failed: {0}")]
    Executor(String),

    #[error("Media source error: {0}")]
    VideoSource(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Job store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("OpenAI API error: {0}")]
    OpenAI(String),

    #[error("External tool not found: {0}. Please install it and ensure it's in your PATH.")]
    ToolNotFound(String),

    #[error("External tool failed: {0}")]
    ToolFailed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Shared state became unusable, e.g. a lock poisoned by a panic.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TubeflowError {
    /// Stable, machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            TubeflowError::Config(_) => "configuration",
            TubeflowError::NotFound(_) => "not_found",
            TubeflowError::CapacityExceeded(_) => "capacity_exceeded",
            TubeflowError::Executor(_) => "executor",
            TubeflowError::VideoSource(_) => "video_source",
            TubeflowError::Download(_) => "download",
            TubeflowError::Store(_) => "store",
            TubeflowError::Io(_) => "io",
            TubeflowError::Json(_) => "json",
            TubeflowError::TomlParse(_) => "toml",
            TubeflowError::Http(_) => "http",
            TubeflowError::Database(_) => "database",
            TubeflowError::OpenAI(_) => "openai",
            TubeflowError::ToolNotFound(_) => "tool_not_found",
            TubeflowError::ToolFailed(_) => "tool_failed",
            TubeflowError::InvalidInput(_) => "invalid_input",
            TubeflowError::Internal(_) => "internal",
        }
    }
}

/// Result type alias for tubeflow operations.
pub type Result<T> = std::result::Result<T, TubeflowError>;
