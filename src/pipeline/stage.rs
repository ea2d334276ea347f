//! Stage names of the content pipeline.

use serde::{Deserialize, Serialize};

/// One named unit of work in the processing DAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Download,
    Transcribe,
    Summarize,
    BlogRender,
    PodcastSynthesize,
    Publish,
}

impl Stage {
    /// Every stage, in pipeline order.
    pub const ALL: [Stage; 6] = [
        Stage::Download,
        Stage::Transcribe,
        Stage::Summarize,
        Stage::BlogRender,
        Stage::PodcastSynthesize,
        Stage::Publish,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Download => "download",
            Stage::Transcribe => "transcribe",
            Stage::Summarize => "summarize",
            Stage::BlogRender => "blog_render",
            Stage::PodcastSynthesize => "podcast_synthesize",
            Stage::Publish => "publish",
        }
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "download" => Ok(Stage::Download),
            "transcribe" => Ok(Stage::Transcribe),
            "summarize" => Ok(Stage::Summarize),
            "blog_render" | "blog" => Ok(Stage::BlogRender),
            "podcast_synthesize" | "podcast" => Ok(Stage::PodcastSynthesize),
            "publish" => Ok(Stage::Publish),
            _ => Err(format!("Unknown stage: {}", s)),
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
