//! Doctor command - verify system requirements and configuration.

use crate::cli::preflight::{self, Requirement};
use crate::cli::Output;
use crate::config::Settings;
use crate::pipeline::DagDefinition;
use crate::scheduler::SchedulerConfig;
use console::style;
use std::path::Path;
use std::process::Command;

/// Check result for a single item.
#[derive(Debug)]
struct CheckResult {
    name: String,
    status: CheckStatus,
    message: String,
    hint: Option<String>,
}

#[derive(Debug, PartialEq)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}

impl CheckResult {
    fn ok(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Ok,
            message: message.to_string(),
            hint: None,
        }
    }

    fn warning(name: &str, message: &str, hint: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Warning,
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    fn error(name: &str, message: &str, hint: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Error,
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    fn print(&self) {
        let icon = match self.status {
            CheckStatus::Ok => style("✓").green(),
            CheckStatus::Warning => style("!").yellow(),
            CheckStatus::Error => style("✗").red(),
        };

        println!("  {} {} - {}", icon, style(&self.name).bold(), self.message);

        if let Some(hint) = &self.hint {
            println!("    {} {}", style("→").dim(), style(hint).dim());
        }
    }
}

/// Run all diagnostic checks.
pub fn run_doctor(settings: &Settings) -> anyhow::Result<()> {
    Output::header("tubeflow doctor");
    println!();
    println!("Checking system requirements and configuration...\n");

    let sections = [
        (
            "External Tools",
            check_tools(settings),
        ),
        ("API Configuration", vec![check_openai_api_key()]),
        ("Pipeline", check_pipeline(settings)),
        ("Directories", check_directories(settings)),
        ("Configuration", vec![check_config_file()]),
    ];

    let mut errors = 0;
    let mut warnings = 0;
    for (title, checks) in &sections {
        println!("{}", style(title).bold());
        for check in checks {
            check.print();
            match check.status {
                CheckStatus::Error => errors += 1,
                CheckStatus::Warning => warnings += 1,
                CheckStatus::Ok => {}
            }
        }
        println!();
    }

    if errors > 0 {
        Output::error(&format!(
            "{} error(s) found. Please fix them before running jobs.",
            errors
        ));
        return Err(anyhow::anyhow!("{} doctor check(s) failed", errors));
    } else if warnings > 0 {
        Output::warning(&format!("All checks passed with {} warning(s).", warnings));
    } else {
        Output::success("All checks passed! tubeflow is ready to use.");
    }

    Ok(())
}

/// Check the tools the configured stages will call.
fn check_tools(settings: &Settings) -> Vec<CheckResult> {
    preflight::requirements(settings)
        .into_iter()
        .filter_map(|requirement| match requirement {
            Requirement::Tool {
                name, version_arg, ..
            } => {
                let hint = if name == "yt-dlp" {
                    install_hint_ytdlp()
                } else {
                    install_hint_ffmpeg()
                };
                Some(check_tool(name, version_arg, hint))
            }
            Requirement::OpenAiKey { .. } => None,
        })
        .collect()
}

/// Check if an external tool is available.
fn check_tool(name: &str, version_arg: &str, hint: &str) -> CheckResult {
    match Command::new(name).arg(version_arg).output() {
        Ok(output) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .unwrap_or("installed")
                .trim()
                .to_string();
            CheckResult::ok(name, &truncate(&version, 50))
        }
        Ok(_) => CheckResult::error(name, "installed but not working", hint),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            CheckResult::error(name, "not found", hint)
        }
        Err(e) => CheckResult::error(name, &format!("error: {}", e), hint),
    }
}

/// Check if OpenAI API key is configured.
fn check_openai_api_key() -> CheckResult {
    match std::env::var("OPENAI_API_KEY") {
        Ok(key) if key.starts_with("sk-") && key.len() > 20 => {
            CheckResult::ok("OPENAI_API_KEY", &format!("configured ({})", mask_key(&key)))
        }
        Ok(key) if key.is_empty() => CheckResult::error(
            "OPENAI_API_KEY",
            "empty",
            "Set with: export OPENAI_API_KEY='sk-...'",
        ),
        Ok(_) => CheckResult::warning(
            "OPENAI_API_KEY",
            "set but format looks unusual",
            "Expected format: sk-... (OpenAI API key)",
        ),
        Err(_) => CheckResult::error(
            "OPENAI_API_KEY",
            "not set",
            "Set with: export OPENAI_API_KEY='sk-...'",
        ),
    }
}

/// Validate the stage graph and scheduler limits the settings produce.
fn check_pipeline(settings: &Settings) -> Vec<CheckResult> {
    let mut results = Vec::new();

    match DagDefinition::from_settings(&settings.pipeline) {
        Ok(dag) => {
            let terminal: Vec<&str> = dag.terminal_stages().iter().map(|s| s.as_str()).collect();
            results.push(CheckResult::ok(
                "Stage graph",
                &format!("{} stages, ends at {}", dag.stages().len(), terminal.join(", ")),
            ));
        }
        Err(e) => results.push(CheckResult::error(
            "Stage graph",
            &e.to_string(),
            "Check the [pipeline] stage maps in your config",
        )),
    }

    let config = SchedulerConfig::from_settings(&settings.pipeline);
    match config.validate() {
        Ok(()) => {
            let queue = config
                .max_queued_jobs
                .map(|n| n.to_string())
                .unwrap_or_else(|| "unbounded".to_string());
            results.push(CheckResult::ok(
                "Scheduler",
                &format!(
                    "{} concurrent job(s), {} worker(s), queue {}",
                    config.max_concurrent_jobs, config.workers, queue
                ),
            ));
        }
        Err(e) => results.push(CheckResult::error(
            "Scheduler",
            &e.to_string(),
            "max_concurrent_jobs and workers must be at least 1",
        )),
    }

    results
}

/// Check data directories.
fn check_directories(settings: &Settings) -> Vec<CheckResult> {
    let mut results = vec![
        check_dir("Data directory", &settings.data_dir()),
        check_dir("Output directory", &settings.output_dir()),
        check_dir("Site directory", &settings.site_dir()),
    ];

    let db_path = settings.sqlite_path();
    if db_path.exists() {
        let size = std::fs::metadata(&db_path)
            .map(|m| format_size(m.len()))
            .unwrap_or_else(|_| "unknown size".to_string());
        results.push(CheckResult::ok(
            "Job database",
            &format!("{} ({})", db_path.display(), size),
        ));
    } else {
        results.push(CheckResult::warning(
            "Job database",
            &format!("{} (not created yet)", db_path.display()),
            "Database will be created by the first job",
        ));
    }

    results
}

fn check_dir(name: &str, dir: &Path) -> CheckResult {
    if dir.is_dir() {
        CheckResult::ok(name, &dir.display().to_string())
    } else if dir.exists() {
        CheckResult::error(
            name,
            &format!("{} is not a directory", dir.display()),
            "Point the setting at a directory",
        )
    } else {
        CheckResult::warning(
            name,
            &format!("{} (will be created)", dir.display()),
            "Directory will be created on first use",
        )
    }
}

/// Check if config file exists.
fn check_config_file() -> CheckResult {
    let config_path = Settings::default_config_path();
    if config_path.exists() {
        CheckResult::ok("Config file", &format!("{}", config_path.display()))
    } else {
        CheckResult::warning(
            "Config file",
            "using defaults",
            "Create with: tubeflow config edit",
        )
    }
}

fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 11 {
        return "***".to_string();
    }
    let head: String = chars[..7].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        format!("{}...", s.chars().take(max_chars).collect::<String>())
    } else {
        s.to_string()
    }
}

/// Format file size in human-readable format.
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Platform-specific install hint for yt-dlp.
fn install_hint_ytdlp() -> &'static str {
    if cfg!(target_os = "macos") {
        "Install with: brew install yt-dlp"
    } else if cfg!(target_os = "linux") {
        "Install with: pip install yt-dlp (or your package manager)"
    } else {
        "Install from: https://github.com/yt-dlp/yt-dlp"
    }
}

/// Platform-specific install hint for ffmpeg.
fn install_hint_ffmpeg() -> &'static str {
    if cfg!(target_os = "macos") {
        "Install with: brew install ffmpeg"
    } else if cfg!(target_os = "linux") {
        "Install with: sudo apt install ffmpeg (or your package manager)"
    } else {
        "Install from: https://ffmpeg.org/download.html"
    }
}
