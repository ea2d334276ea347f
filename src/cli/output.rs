//! CLI output formatting utilities.

use crate::pipeline::{JobSnapshot, JobStatus, StageState, StageSummary};
use chrono::Utc;
use console::{style, StyledObject};
use indicatif::{ProgressBar, ProgressStyle};

/// Output helper for CLI formatting.
pub struct Output;

impl Output {
    /// Print an info message.
    pub fn info(msg: &str) {
        println!("{} {}", style(">>").cyan().bold(), msg);
    }

    /// Print a success message.
    pub fn success(msg: &str) {
        println!("{} {}", style(">>").green().bold(), msg);
    }

    /// Print a warning message.
    pub fn warning(msg: &str) {
        eprintln!("{} {}", style(">>").yellow().bold(), msg);
    }

    /// Print an error message.
    pub fn error(msg: &str) {
        eprintln!("{} {}", style(">>").red().bold(), msg);
    }

    /// Print a header.
    pub fn header(msg: &str) {
        println!("\n{}", style(msg).bold().underlined());
    }

    /// Print a key-value pair.
    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", style(key).dim(), value);
    }

    /// One-line job summary for listings.
    pub fn job_line(job: &JobSnapshot) {
        let age = (Utc::now() - job.created_at).num_seconds().max(0) as f64;
        println!(
            "  {} {} {} ({} ago)",
            style("*").cyan(),
            styled_status(job.status),
            style(&job.source).bold(),
            format_duration(age),
        );
        println!("    {}", style(job.id).dim());
    }

    /// Full job detail with one line per stage.
    pub fn job_detail(job: &JobSnapshot) {
        Output::header(&format!("Job {}", job.id));
        Output::kv("Source", &job.source);
        Output::kv("Status", &styled_status(job.status).to_string());
        Output::kv("Created", &job.created_at.to_rfc3339());
        if let Some(at) = job.cancelled_at {
            Output::kv("Cancelled", &at.to_rfc3339());
        }
        println!();
        for stage in &job.stages {
            Output::stage_line(stage);
        }
        if let Some(failure) = &job.failure {
            println!();
            Output::error(&format!(
                "{} failed after {} attempt(s): [{}] {}",
                failure.stage,
                failure.attempts,
                failure.code,
                content_preview(&failure.message, 300)
            ));
        }
    }

    fn stage_line(stage: &StageSummary) {
        let (icon, state) = match stage.state {
            StageState::Succeeded => (style("✓").green(), "done"),
            StageState::Running => (style("~").cyan(), "running"),
            StageState::Retrying => (style("!").yellow(), "retrying"),
            StageState::Failed => (style("✗").red(), "failed"),
            StageState::NotStarted => (style("-").dim(), "waiting"),
        };
        let detail = match (&stage.output, &stage.last_error) {
            (Some(output), _) => output.describe(),
            (None, Some(err)) => content_preview(&err.to_string(), 120),
            (None, None) => String::new(),
        };
        println!(
            "  {} {:<20} {:<9} {:>2} attempt(s)  {}",
            icon,
            stage.stage.as_str(),
            state,
            stage.attempts,
            style(detail).dim()
        );
    }

    /// Create a progress bar.
    pub fn progress_bar(len: u64, msg: &str) -> ProgressBar {
        let pb = ProgressBar::new(len);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb
    }
}

fn styled_status(status: JobStatus) -> StyledObject<&'static str> {
    let s = style(status.as_str());
    match status {
        JobStatus::Completed => s.green(),
        JobStatus::Failed => s.red(),
        JobStatus::PartialFailure => s.yellow(),
        JobStatus::Cancelled => s.dim(),
        JobStatus::Running => s.cyan(),
        JobStatus::Pending => s,
    }
}

/// Format duration in seconds to a human-readable string.
fn format_duration(seconds: f64) -> String {
    let total_seconds = seconds as u32;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Truncate content with ellipsis.
fn content_preview(content: &str, max_chars: usize) -> String {
    let content = content.replace('\n', " ");
    if content.chars().count() <= max_chars {
        content
    } else {
        let cut: String = content.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}
