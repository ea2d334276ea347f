//! Configuration module for tubeflow.
//!
//! Handles loading and managing application settings and prompt templates.

mod prompts;
mod settings;

pub use prompts::{BlogPrompts, Prompts, SummaryPrompts};
pub use settings::{
    BlogMethod, BlogSettings, DownloadSettings, GeneralSettings, PipelineSettings,
    PodcastSettings, PromptSettings, PublishSettings, Settings, StoreSettings,
    SummarizationSettings, TranscriptionSettings,
};
