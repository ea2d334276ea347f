//! Podcast stage: read the summary aloud with OpenAI text-to-speech.

use super::{ExecutorError, StageExecutor, StageInput, StageOutput};
use crate::config::PodcastSettings;
use crate::error::{Result, TubeflowError};
use crate::openai::create_client;
use crate::pipeline::Stage;
use async_openai::types::{CreateSpeechRequestArgs, SpeechModel, SpeechResponseFormat, Voice};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

/// Maximum input length accepted by the speech endpoint.
pub const MAX_SPEECH_CHARS: usize = 4096;

/// Metadata written next to each episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeMetadata {
    pub title: String,
    pub description: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub audio_file: String,
    pub voice: String,
    pub model: String,
}

/// Split text into pieces of at most `limit` characters, preferring
/// sentence boundaries, then word boundaries.
pub fn split_for_speech(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut pieces = Vec::new();
    let mut current = String::new();

    for sentence in sentences(text) {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }
        let needed = if current.is_empty() { 0 } else { 1 } + sentence.chars().count();
        if current.chars().count() + needed <= limit {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(sentence);
            continue;
        }

        if !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
        }
        if sentence.chars().count() <= limit {
            current.push_str(sentence);
        } else {
            for word_piece in split_long(sentence, limit) {
                pieces.push(word_piece);
            }
        }
    }

    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// Sentences end at `.`, `!` or `?` followed by whitespace, or at a newline.
fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut prev_terminal = false;

    for (idx, c) in text.char_indices() {
        if c == '\n' || (prev_terminal && c.is_whitespace()) {
            out.push(&text[start..idx]);
            start = idx + c.len_utf8();
        }
        prev_terminal = matches!(c, '.' | '!' | '?');
    }
    out.push(&text[start..]);
    out
}

fn split_long(sentence: &str, limit: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();

    for word in sentence.split_whitespace() {
        let chars: Vec<char> = word.chars().collect();
        if chars.len() > limit {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            pieces.extend(chars.chunks(limit).map(|c| c.iter().collect::<String>()));
            continue;
        }

        let needed = if current.is_empty() { 0 } else { 1 } + chars.len();
        if current.chars().count() + needed > limit {
            pieces.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }

    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

fn parse_voice(name: &str) -> Result<Voice> {
    match name.to_lowercase().as_str() {
        "alloy" => Ok(Voice::Alloy),
        "echo" => Ok(Voice::Echo),
        "fable" => Ok(Voice::Fable),
        "onyx" => Ok(Voice::Onyx),
        "nova" => Ok(Voice::Nova),
        "shimmer" => Ok(Voice::Shimmer),
        other => Err(TubeflowError::Config(format!("Unknown TTS voice: {}", other))),
    }
}

fn parse_model(name: &str) -> SpeechModel {
    match name {
        "tts-1" => SpeechModel::Tts1,
        "tts-1-hd" => SpeechModel::Tts1Hd,
        other => SpeechModel::Other(other.to_string()),
    }
}

pub struct PodcastExecutor {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    settings: PodcastSettings,
    voice: Voice,
}

impl PodcastExecutor {
    pub fn new(settings: PodcastSettings) -> Result<Self> {
        let voice = parse_voice(&settings.voice)?;
        Ok(Self {
            client: create_client()?,
            settings,
            voice,
        })
    }

    #[instrument(skip(self, input), fields(job_id = %input.job_id, attempt = input.attempt))]
    async fn run(&self, input: &StageInput) -> Result<StageOutput> {
        let summary = input
            .require(Stage::Summarize)?
            .as_text()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| TubeflowError::InvalidInput("nothing to narrate".to_string()))?;
        let title = input.title();

        let pieces = split_for_speech(summary, MAX_SPEECH_CHARS);
        info!("Synthesizing {} speech piece(s) with voice {}", pieces.len(), self.settings.voice);

        let mut audio = Vec::new();
        for (idx, piece) in pieces.into_iter().enumerate() {
            debug!("Synthesizing piece {}", idx + 1);
            let request = CreateSpeechRequestArgs::default()
                .input(piece)
                .voice(self.voice.clone())
                .model(parse_model(&self.settings.model))
                .response_format(SpeechResponseFormat::Mp3)
                .build()
                .map_err(|e| TubeflowError::OpenAI(format!("Failed to build request: {}", e)))?;

            let response = self
                .client
                .audio()
                .speech(request)
                .await
                .map_err(|e| TubeflowError::OpenAI(format!("Speech API error: {}", e)))?;
            audio.extend_from_slice(&response.bytes);
        }

        tokio::fs::create_dir_all(&input.work_dir).await?;
        let slug = super::slugify(&title);
        let audio_name = format!("{}_podcast.mp3", slug);
        let audio_path = input.work_dir.join(&audio_name);
        tokio::fs::write(&audio_path, &audio).await?;

        let metadata = EpisodeMetadata {
            title: title.clone(),
            description: summary.to_string(),
            author: self.settings.author.clone(),
            created_at: Utc::now(),
            audio_file: audio_name,
            voice: self.settings.voice.clone(),
            model: self.settings.model.clone(),
        };
        let metadata_path = input.work_dir.join(format!("{}_podcast.json", slug));
        tokio::fs::write(&metadata_path, serde_json::to_vec_pretty(&metadata)?).await?;

        info!("Episode written to {} ({} bytes)", audio_path.display(), audio.len());

        Ok(StageOutput::file(audio_path)
            .with_meta("slug", slug)
            .with_meta("episode_metadata_path", metadata_path.display().to_string())
            .with_meta("audio_bytes", audio.len().to_string()))
    }
}

#[async_trait]
impl StageExecutor for PodcastExecutor {
    fn stage(&self) -> Stage {
        Stage::PodcastSynthesize
    }

    async fn execute(&self, input: &StageInput) -> std::result::Result<StageOutput, ExecutorError> {
        self.run(input).await.map_err(Into::into)
    }
}
