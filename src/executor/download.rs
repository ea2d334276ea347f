//! Download stage: fetch video metadata and media with yt-dlp.

use super::{ExecutorError, StageExecutor, StageInput, StageOutput};
use crate::config::DownloadSettings;
use crate::error::{Result, TubeflowError};
use crate::pipeline::Stage;
use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use tokio::process::Command;
use tracing::{debug, info, instrument};

fn video_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Matches various YouTube URL formats and bare video IDs
        Regex::new(
            r"(?x)
            (?:
                (?:https?://)?
                (?:www\.|m\.)?
                (?:youtube\.com/watch\?(?:.*&)?v=|youtu\.be/|youtube\.com/embed/|youtube\.com/v/|youtube\.com/shorts/)
                ([a-zA-Z0-9_-]{11})
                (?:[&\#?]|$)
            )
            |
            ^([a-zA-Z0-9_-]{11})$
        ",
        )
        .expect("Invalid regex")
    })
}

/// Validate a YouTube URL or bare video id and return the video id.
pub fn validate_video_url(input: &str) -> Result<String> {
    let input = input.trim();

    if input.contains("://") {
        let parsed = url::Url::parse(input)
            .map_err(|e| TubeflowError::InvalidInput(format!("Invalid URL '{}': {}", input, e)))?;
        let host = parsed.host_str().unwrap_or_default();
        let known_host = matches!(
            host,
            "youtube.com" | "www.youtube.com" | "m.youtube.com" | "youtu.be"
        );
        if !known_host {
            return Err(TubeflowError::InvalidInput(format!(
                "Not a YouTube URL: {}",
                input
            )));
        }
    }

    let caps = video_id_regex().captures(input).ok_or_else(|| {
        TubeflowError::InvalidInput(format!("Invalid YouTube video ID or URL: {}", input))
    })?;

    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| {
            TubeflowError::InvalidInput(format!("Invalid YouTube video ID or URL: {}", input))
        })
}

/// Metadata reported by `yt-dlp --dump-json`.
#[derive(Debug, Clone)]
struct VideoMetadata {
    title: String,
    duration_seconds: Option<u32>,
    channel: Option<String>,
    upload_date: Option<String>,
}

/// Downloads the source video (or its audio track) into the job directory.
pub struct DownloadExecutor {
    settings: DownloadSettings,
}

impl DownloadExecutor {
    pub fn new(settings: DownloadSettings) -> Self {
        Self { settings }
    }

    #[instrument(skip(self, input), fields(job_id = %input.job_id, attempt = input.attempt))]
    async fn run(&self, input: &StageInput) -> Result<StageOutput> {
        let video_id = validate_video_url(&input.source)?;
        let url = format!("https://www.youtube.com/watch?v={}", video_id);

        let metadata = fetch_metadata(&url, &video_id).await?;
        info!("Fetched metadata: {}", metadata.title);

        if let Some(duration) = metadata.duration_seconds {
            if duration > self.settings.max_duration_seconds {
                return Err(TubeflowError::InvalidInput(format!(
                    "Media duration ({} seconds) exceeds maximum ({} seconds)",
                    duration, self.settings.max_duration_seconds
                )));
            }
        }

        let path = if self.settings.audio_only {
            download_audio(&url, &video_id, &input.work_dir, &self.settings.audio_format).await?
        } else {
            download_video(&url, &video_id, &input.work_dir, self.settings.max_height).await?
        };

        let mut output = StageOutput::file(path)
            .with_meta("title", metadata.title)
            .with_meta("video_id", video_id)
            .with_meta("video_url", url);
        if let Some(d) = metadata.duration_seconds {
            output = output.with_meta("duration_seconds", d.to_string());
        }
        if let Some(c) = metadata.channel {
            output = output.with_meta("channel", c);
        }
        if let Some(d) = metadata.upload_date {
            output = output.with_meta("upload_date", d);
        }
        Ok(output)
    }
}

#[async_trait]
impl StageExecutor for DownloadExecutor {
    fn stage(&self) -> Stage {
        Stage::Download
    }

    async fn execute(&self, input: &StageInput) -> std::result::Result<StageOutput, ExecutorError> {
        self.run(input).await.map_err(Into::into)
    }
}

async fn fetch_metadata(url: &str, video_id: &str) -> Result<VideoMetadata> {
    let output = Command::new("yt-dlp")
        .args(["--dump-json", "--no-download", "--no-warnings", "--no-playlist", url])
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TubeflowError::ToolNotFound("yt-dlp".to_string())
            } else {
                TubeflowError::VideoSource(format!("Failed to run yt-dlp: {}", e))
            }
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TubeflowError::VideoSource(format!(
            "Video {} not found or unavailable: {}",
            video_id, stderr
        )));
    }

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).map_err(|e| {
        TubeflowError::VideoSource(format!("Failed to parse yt-dlp output: {}", e))
    })?;

    Ok(VideoMetadata {
        title: json["title"].as_str().unwrap_or("Unknown Title").to_string(),
        duration_seconds: json["duration"].as_f64().map(|d| d as u32),
        channel: json["channel"]
            .as_str()
            .or_else(|| json["uploader"].as_str())
            .map(|s| s.to_string()),
        upload_date: json["upload_date"].as_str().map(|s| s.to_string()),
    })
}

/// Downloads the audio track and normalizes it to `format`.
///
/// An existing file from an earlier attempt is reused.
async fn download_audio(url: &str, video_id: &str, output_dir: &Path, format: &str) -> Result<PathBuf> {
    tokio::fs::create_dir_all(output_dir).await?;

    let target_path = output_dir.join(format!("{}.{}", video_id, format));
    if target_path.exists() {
        info!("Using cached audio file");
        return Ok(target_path);
    }

    info!("Downloading audio from {}", url);
    let template = output_dir.join(format!("{}.%(ext)s", video_id));

    run_ytdlp(
        Command::new("yt-dlp")
            .arg("--extract-audio")
            .arg("--audio-format")
            .arg(format)
            .arg("--audio-quality")
            .arg("0")
            .arg("--output")
            .arg(&template)
            .arg("--no-playlist")
            .arg("--quiet")
            .arg("--no-warnings")
            .arg(url),
    )
    .await?;

    let downloaded = find_media_file(output_dir, video_id)?;
    if downloaded != target_path {
        normalize_audio(&downloaded, &target_path).await?;
        let _ = tokio::fs::remove_file(&downloaded).await;
    }

    Ok(target_path)
}

/// Downloads the video capped at `max_height`.
async fn download_video(url: &str, video_id: &str, output_dir: &Path, max_height: u32) -> Result<PathBuf> {
    tokio::fs::create_dir_all(output_dir).await?;

    if let Ok(existing) = find_media_file(output_dir, video_id) {
        info!("Using cached video file");
        return Ok(existing);
    }

    info!("Downloading video from {}", url);
    let template = output_dir.join(format!("{}.%(ext)s", video_id));

    run_ytdlp(
        Command::new("yt-dlp")
            .arg("--format")
            .arg(format!("best[height<={}]", max_height))
            .arg("--output")
            .arg(&template)
            .arg("--no-playlist")
            .arg("--quiet")
            .arg("--no-warnings")
            .arg(url),
    )
    .await?;

    find_media_file(output_dir, video_id)
}

async fn run_ytdlp(cmd: &mut Command) -> Result<()> {
    let result = cmd.stdout(Stdio::null()).stderr(Stdio::piped()).output().await;

    let output = match result {
        Ok(o) => o,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(TubeflowError::ToolNotFound("yt-dlp".into()));
        }
        Err(e) => {
            return Err(TubeflowError::Download(format!("yt-dlp execution failed: {e}")));
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TubeflowError::Download(format!("yt-dlp failed: {stderr}")));
    }
    Ok(())
}

/// Locates a downloaded media file by video ID.
fn find_media_file(dir: &Path, video_id: &str) -> Result<PathBuf> {
    for ext in &["mp3", "wav", "opus", "m4a", "webm", "ogg", "mp4", "mkv"] {
        let candidate = dir.join(format!("{}.{}", video_id, ext));
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    let entries = std::fs::read_dir(dir)
        .map_err(|e| TubeflowError::Download(format!("Cannot read directory: {e}")))?;

    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(video_id) && !name.ends_with(".part") {
            return Ok(entry.path());
        }
    }

    Err(TubeflowError::Download("Media file not found after download".into()))
}

/// Re-encodes an audio file with ffmpeg; the codec follows the target extension.
async fn normalize_audio(source: &Path, dest: &Path) -> Result<()> {
    debug!("Converting {:?} to {:?}", source, dest);

    let result = Command::new("ffmpeg")
        .arg("-i")
        .arg(source)
        .arg("-vn")
        .arg("-y")
        .arg("-loglevel")
        .arg("error")
        .arg(dest)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await;

    match result {
        Ok(out) if out.status.success() => Ok(()),
        Ok(out) => {
            let err = String::from_utf8_lossy(&out.stderr);
            Err(TubeflowError::Download(format!("ffmpeg conversion failed: {err}")))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(TubeflowError::ToolNotFound("ffmpeg".into()))
        }
        Err(e) => Err(TubeflowError::Download(format!("ffmpeg error: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_video_url() {
        assert_eq!(
            validate_video_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ").unwrap(),
            "dQw4w9WgXcQ"
        );
        assert_eq!(
            validate_video_url("https://youtu.be/dQw4w9WgXcQ").unwrap(),
            "dQw4w9WgXcQ"
        );
        assert_eq!(
            validate_video_url("https://www.youtube.com/watch?list=PL1&v=dQw4w9WgXcQ").unwrap(),
            "dQw4w9WgXcQ"
        );
        assert_eq!(
            validate_video_url("https://youtube.com/shorts/dQw4w9WgXcQ").unwrap(),
            "dQw4w9WgXcQ"
        );
        assert_eq!(validate_video_url(" dQw4w9WgXcQ ").unwrap(), "dQw4w9WgXcQ");
    }

    #[test]
    fn test_validate_rejects_other_inputs() {
        assert!(validate_video_url("").is_err());
        assert!(validate_video_url("not-a-video-id").is_err());
        assert!(validate_video_url("https://vimeo.com/watch?v=dQw4w9WgXcQ").is_err());
        assert!(validate_video_url("https://www.youtube.com/playlist?list=PLtest").is_err());
        assert!(validate_video_url("https://youtube.com/watch?v=abcdefghijkl").is_err());
        assert!(validate_video_url("https://youtu.be/dQw4w9WgXcQx").is_err());
    }

    #[test]
    fn test_validate_accepts_trailing_parameters() {
        assert_eq!(
            validate_video_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=42s").unwrap(),
            "dQw4w9WgXcQ"
        );
        assert_eq!(
            validate_video_url("https://youtu.be/dQw4w9WgXcQ?si=abc").unwrap(),
            "dQw4w9WgXcQ"
        );
        assert_eq!(
            validate_video_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ#comments").unwrap(),
            "dQw4w9WgXcQ"
        );
    }

    #[test]
    fn test_find_media_file_skips_partial_downloads() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("abc.f137.mp4.part"), b"").unwrap();
        assert!(find_media_file(dir.path(), "abc").is_err());

        std::fs::write(dir.path().join("abc.m4a"), b"").unwrap();
        assert_eq!(find_media_file(dir.path(), "abc").unwrap(), dir.path().join("abc.m4a"));
    }
}
