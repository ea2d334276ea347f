//! CLI module for tubeflow.

pub mod commands;
mod output;
pub mod preflight;
mod runtime;

pub use output::Output;
pub use runtime::{open_orchestrator, start_scheduler};

use clap::{Parser, Subcommand};

/// tubeflow - YouTube to blog and podcast pipeline
///
/// Downloads a video, transcribes and summarizes it, renders a blog post and
/// a podcast episode in parallel, then publishes both.
#[derive(Parser, Debug)]
#[command(name = "tubeflow")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check system requirements and configuration
    Doctor,

    /// Run the pipeline for one or more videos and wait for them to finish
    Process {
        /// YouTube URLs or 11-character video ids
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Continue unfinished jobs from earlier runs
    Resume,

    /// Show the state of a job
    Status {
        /// Job id
        job_id: String,

        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// List known jobs
    List,

    /// Mark a stored job as cancelled
    Cancel {
        /// Job id
        job_id: String,
    },

    /// Start HTTP API server for submitting and inspecting jobs
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Open configuration file in editor
    Edit,

    /// Show configuration file path
    Path,
}

/// Parse a job id given on the command line.
pub fn parse_job_id(raw: &str) -> crate::error::Result<crate::pipeline::JobId> {
    uuid::Uuid::parse_str(raw.trim())
        .map_err(|_| crate::error::TubeflowError::InvalidInput(format!("not a job id: {}", raw)))
}
