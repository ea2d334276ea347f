//! Pre-flight checks before expensive operations.
//!
//! Works out which external tools and credentials the configured stages will
//! call, and verifies them before any job is created.

use crate::config::{BlogMethod, Settings};
use crate::error::{Result, TubeflowError};
use crate::pipeline::Stage;
use std::process::Command;

/// Something a stage needs from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// An executable on `PATH`, checked by running it with `version_arg`.
    Tool {
        name: &'static str,
        version_arg: &'static str,
        needed_by: Vec<Stage>,
    },
    /// `OPENAI_API_KEY` in the environment.
    OpenAiKey { needed_by: Vec<Stage> },
}

impl Requirement {
    pub fn needed_by(&self) -> &[Stage] {
        match self {
            Requirement::Tool { needed_by, .. } | Requirement::OpenAiKey { needed_by } => needed_by,
        }
    }
}

/// What the configured pipeline will call while running a job.
pub fn requirements(settings: &Settings) -> Vec<Requirement> {
    let mut openai = vec![Stage::Transcribe, Stage::Summarize];
    if settings.blog.method == BlogMethod::OpenAI {
        openai.push(Stage::BlogRender);
    }
    openai.push(Stage::PodcastSynthesize);

    let mut requirements = vec![
        Requirement::OpenAiKey { needed_by: openai },
        Requirement::Tool {
            name: "yt-dlp",
            version_arg: "--version",
            needed_by: vec![Stage::Download],
        },
    ];

    // Transcription splits large files with ffmpeg; audio extraction also
    // re-encodes with it, and yt-dlp inspects the stream with ffprobe.
    let mut ffmpeg = vec![Stage::Transcribe];
    if settings.download.audio_only {
        ffmpeg.insert(0, Stage::Download);
        requirements.push(Requirement::Tool {
            name: "ffprobe",
            version_arg: "-version",
            needed_by: vec![Stage::Download],
        });
    }
    requirements.push(Requirement::Tool {
        name: "ffmpeg",
        version_arg: "-version",
        needed_by: ffmpeg,
    });

    requirements
}

/// Run pre-flight checks before jobs are submitted.
///
/// Returns Ok(()) if all checks pass, or an error naming what's missing and
/// which stages need it.
pub fn check(settings: &Settings) -> Result<()> {
    for requirement in requirements(settings) {
        let outcome = match &requirement {
            Requirement::OpenAiKey { .. } => check_api_key(),
            Requirement::Tool {
                name, version_arg, ..
            } => check_tool(name, version_arg),
        };
        outcome.map_err(|e| with_stages(e, requirement.needed_by()))?;
    }
    Ok(())
}

fn with_stages(err: TubeflowError, stages: &[Stage]) -> TubeflowError {
    let names: Vec<&str> = stages.iter().map(|s| s.as_str()).collect();
    let needed = format!("needed by {}", names.join(", "));
    match err {
        TubeflowError::Config(msg) => TubeflowError::Config(format!("{} ({})", msg, needed)),
        TubeflowError::ToolNotFound(name) => {
            TubeflowError::ToolNotFound(format!("{} ({})", name, needed))
        }
        TubeflowError::ToolFailed(msg) => TubeflowError::ToolFailed(format!("{} ({})", msg, needed)),
        other => other,
    }
}

/// Check if OpenAI API key is configured.
fn check_api_key() -> Result<()> {
    match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.trim().is_empty() => Ok(()),
        _ => Err(TubeflowError::Config(
            "OPENAI_API_KEY is not set. Set it with: export OPENAI_API_KEY='sk-...'".to_string(),
        )),
    }
}

/// Check that an external tool starts and reports a version.
pub(crate) fn check_tool(name: &str, version_arg: &str) -> Result<()> {
    match Command::new(name).arg(version_arg).output() {
        Ok(output) if output.status.success() => Ok(()),
        Ok(_) => Err(TubeflowError::ToolFailed(format!(
            "{} is installed but not working correctly",
            name
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(TubeflowError::ToolNotFound(name.to_string()))
        }
        Err(e) => Err(TubeflowError::ToolFailed(format!("{}: {}", name, e))),
    }
}
