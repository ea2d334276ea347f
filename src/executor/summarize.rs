//! Summarize stage: condense the transcript with a chat model.

use super::{ExecutorError, StageExecutor, StageInput, StageOutput};
use crate::config::{Prompts, SummarizationSettings};
use crate::error::{Result, TubeflowError};
use crate::openai::{complete_chat, create_client};
use crate::pipeline::Stage;
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{info, instrument};

pub struct SummarizeExecutor {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    settings: SummarizationSettings,
    prompts: Prompts,
}

impl SummarizeExecutor {
    pub fn new(settings: SummarizationSettings, prompts: Prompts) -> Result<Self> {
        Ok(Self {
            client: create_client()?,
            settings,
            prompts,
        })
    }

    #[instrument(skip(self, input), fields(job_id = %input.job_id, attempt = input.attempt))]
    async fn run(&self, input: &StageInput) -> Result<StageOutput> {
        let transcript = input
            .require(Stage::Transcribe)?
            .as_text()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| TubeflowError::InvalidInput("transcript is empty".to_string()))?;

        let mut vars = HashMap::new();
        vars.insert("title".to_string(), input.title());
        vars.insert("transcript".to_string(), transcript.to_string());
        let user_prompt = self
            .prompts
            .render_with_custom(&self.prompts.summary.user, &vars);

        let summary = complete_chat(
            &self.client,
            &self.settings.model,
            &self.prompts.summary.system,
            user_prompt,
            self.settings.max_tokens,
        )
        .await?;

        tokio::fs::create_dir_all(&input.work_dir).await?;
        let summary_path = input.work_dir.join("summary.txt");
        tokio::fs::write(&summary_path, &summary).await?;

        info!("Summary: {} chars from {} chars of transcript", summary.len(), transcript.len());

        Ok(StageOutput::text(summary)
            .with_meta("summary_path", summary_path.display().to_string())
            .with_meta("model", self.settings.model.clone()))
    }
}

#[async_trait]
impl StageExecutor for SummarizeExecutor {
    fn stage(&self) -> Stage {
        Stage::Summarize
    }

    async fn execute(&self, input: &StageInput) -> std::result::Result<StageOutput, ExecutorError> {
        self.run(input).await.map_err(Into::into)
    }
}
