//! Transcribe stage: OpenAI Whisper speech-to-text.

use super::{ExecutorError, StageExecutor, StageInput, StageOutput};
use crate::config::TranscriptionSettings;
use crate::error::{Result, TubeflowError};
use crate::openai::create_client;
use crate::pipeline::Stage;
use async_openai::types::{AudioInput, AudioResponseFormat, CreateTranscriptionRequestArgs};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, instrument};

/// Whisper rejects uploads above 25 MB.
const MAX_UPLOAD_BYTES: u64 = 25 * 1024 * 1024;

/// A timed piece of transcript text.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Render segments as `[start - end]: text` lines.
pub fn format_segments(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|s| format!("[{:.2} - {:.2}]: {}\n", s.start, s.end, s.text))
        .collect()
}

/// Transcribes the downloaded audio with Whisper.
pub struct TranscribeExecutor {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    settings: TranscriptionSettings,
}

impl TranscribeExecutor {
    pub fn new(settings: TranscriptionSettings) -> Result<Self> {
        Ok(Self {
            client: create_client()?,
            settings,
        })
    }

    #[instrument(skip(self, input), fields(job_id = %input.job_id, attempt = input.attempt))]
    async fn run(&self, input: &StageInput) -> Result<StageOutput> {
        let audio_path = input
            .require(Stage::Download)?
            .path()
            .ok_or_else(|| TubeflowError::InvalidInput("download produced no file".to_string()))?
            .to_path_buf();

        let segments = self.transcribe(&audio_path).await?;
        let text = segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        tokio::fs::create_dir_all(&input.work_dir).await?;
        let transcript_path = input.work_dir.join("transcript.txt");
        let segments_path = input.work_dir.join("segments.txt");
        tokio::fs::write(&transcript_path, &text).await?;
        tokio::fs::write(&segments_path, format_segments(&segments)).await?;

        info!("Transcribed {} segments", segments.len());

        let duration = segments.last().map(|s| s.end).unwrap_or_default();
        Ok(StageOutput::text(text)
            .with_meta("transcript_path", transcript_path.display().to_string())
            .with_meta("segments_path", segments_path.display().to_string())
            .with_meta("segment_count", segments.len().to_string())
            .with_meta("transcript_seconds", format!("{:.1}", duration)))
    }

    /// Transcribe a file, splitting it first when it is over the upload limit.
    async fn transcribe(&self, audio_path: &Path) -> Result<Vec<Segment>> {
        let size = tokio::fs::metadata(audio_path).await?.len();
        if size <= MAX_UPLOAD_BYTES {
            return self.transcribe_single(audio_path).await;
        }

        let temp_dir = tempfile::tempdir()?;
        let pieces = split_audio(audio_path, temp_dir.path(), self.settings.chunk_duration_seconds).await?;
        info!("Transcribing {} audio pieces with {}", pieces.len(), self.settings.model);

        let chunk_len = self.settings.chunk_duration_seconds as f64;
        let mut results: Vec<(usize, Vec<Segment>)> = stream::iter(pieces.into_iter().enumerate())
            .map(|(idx, path)| async move { (idx, self.transcribe_single(&path).await) })
            .buffer_unordered(self.settings.max_concurrent_chunks.max(1))
            .map(|(idx, result)| result.map(|segments| (idx, segments)))
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<Vec<_>>>()?;

        results.sort_by_key(|(idx, _)| *idx);

        let mut all = Vec::new();
        for (idx, mut segments) in results {
            let offset = idx as f64 * chunk_len;
            for segment in &mut segments {
                segment.start += offset;
                segment.end += offset;
            }
            all.extend(segments);
        }
        Ok(all)
    }

    #[instrument(skip(self), fields(audio_path = %audio_path.display()))]
    async fn transcribe_single(&self, audio_path: &Path) -> Result<Vec<Segment>> {
        debug!("Transcribing audio file");

        let file_bytes = tokio::fs::read(audio_path).await?;

        let mut request_builder = CreateTranscriptionRequestArgs::default();
        request_builder
            .file(AudioInput::from_vec_u8(
                audio_path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("audio.mp3")
                    .to_string(),
                file_bytes,
            ))
            .model(&self.settings.model)
            .response_format(AudioResponseFormat::VerboseJson);

        if let Some(lang) = &self.settings.language {
            request_builder.language(lang);
        }

        let request = request_builder
            .build()
            .map_err(|e| TubeflowError::OpenAI(format!("Failed to build request: {}", e)))?;

        let response = self
            .client
            .audio()
            .transcribe_verbose_json(request)
            .await
            .map_err(|e| TubeflowError::OpenAI(format!("Whisper API error: {}", e)))?;

        let segments = response
            .segments
            .map(|segs| {
                segs.iter()
                    .map(|s| Segment {
                        start: s.start as f64,
                        end: s.end as f64,
                        text: s.text.trim().to_string(),
                    })
                    .collect()
            })
            .unwrap_or_else(|| {
                vec![Segment {
                    start: 0.0,
                    end: response.duration as f64,
                    text: response.text.trim().to_string(),
                }]
            });

        Ok(segments)
    }
}

#[async_trait]
impl StageExecutor for TranscribeExecutor {
    fn stage(&self) -> Stage {
        Stage::Transcribe
    }

    async fn execute(&self, input: &StageInput) -> std::result::Result<StageOutput, ExecutorError> {
        self.run(input).await.map_err(Into::into)
    }
}

/// Cut audio into `chunk_seconds` pieces with the ffmpeg segment muxer.
async fn split_audio(source: &Path, output_dir: &Path, chunk_seconds: u32) -> Result<Vec<PathBuf>> {
    let ext = source
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("mp3");
    let pattern = output_dir.join(format!("piece_%04d.{}", ext));

    let result = Command::new("ffmpeg")
        .arg("-i")
        .arg(source)
        .arg("-f")
        .arg("segment")
        .arg("-segment_time")
        .arg(chunk_seconds.to_string())
        .arg("-c")
        .arg("copy")
        .arg("-y")
        .arg("-loglevel")
        .arg("error")
        .arg(&pattern)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await;

    match result {
        Ok(out) if out.status.success() => {}
        Ok(out) => {
            let err = String::from_utf8_lossy(&out.stderr);
            return Err(TubeflowError::ToolFailed(format!("ffmpeg split failed: {err}")));
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(TubeflowError::ToolNotFound("ffmpeg".into()));
        }
        Err(e) => return Err(TubeflowError::ToolFailed(format!("ffmpeg error: {e}"))),
    }

    let mut pieces: Vec<PathBuf> = std::fs::read_dir(output_dir)?
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("piece_"))
        })
        .collect();
    pieces.sort();

    if pieces.is_empty() {
        return Err(TubeflowError::ToolFailed("ffmpeg produced no audio pieces".into()));
    }
    Ok(pieces)
}
