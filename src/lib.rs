//! tubeflow - YouTube to blog and podcast pipeline
//!
//! Turns a video into a transcript, a summary, a blog post and a podcast
//! episode, then publishes the last two together.
//!
//! # Overview
//!
//! Every video becomes a job that walks a fixed stage graph:
//!
//! ```text
//! download → transcribe → summarize ─┬→ blog_render ────────┬→ publish
//!                                    └→ podcast_synthesize ─┘
//! ```
//!
//! Stages retry with backoff, time out, and are recorded per attempt in a
//! SQLite job store so unfinished jobs can be resumed after a restart.
//!
//! # Architecture
//!
//! - `pipeline` - Stage names, the DAG definition and job records
//! - `orchestrator` - Decides which stages run next for a job
//! - `scheduler` - Job admission and the stage worker pool
//! - `executor` - Stage implementations (yt-dlp, Whisper, chat, TTS, publishing)
//! - `store` - Job persistence
//! - `config` - Configuration management
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tubeflow::config::{Prompts, Settings};
//! use tubeflow::executor::ExecutorRegistry;
//! use tubeflow::orchestrator::Orchestrator;
//! use tubeflow::pipeline::DagDefinition;
//! use tubeflow::scheduler::{Scheduler, SchedulerConfig};
//! use tubeflow::store::SqliteJobStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let dag = Arc::new(DagDefinition::from_settings(&settings.pipeline)?);
//!     let store = Arc::new(SqliteJobStore::new(&settings.sqlite_path())?);
//!     let orchestrator = Arc::new(Orchestrator::new(dag, store, settings.output_dir()));
//!     let registry = ExecutorRegistry::from_settings(&settings, &Prompts::default())?;
//!
//!     let scheduler = Scheduler::start(
//!         orchestrator,
//!         registry,
//!         SchedulerConfig::from_settings(&settings.pipeline),
//!     )?;
//!     let job_id = scheduler.submit("https://www.youtube.com/watch?v=dQw4w9WgXcQ")?;
//!     let snapshot = scheduler.wait_settled(job_id).await?;
//!     println!("Job finished as {}", snapshot.status);
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod openai;
pub mod orchestrator;
pub mod pipeline;
pub mod scheduler;
pub mod store;

pub use error::{Result, TubeflowError};
