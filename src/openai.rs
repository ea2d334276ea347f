//! OpenAI client configuration with sensible defaults.

use crate::error::{Result, TubeflowError};
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_openai::{config::OpenAIConfig, Client};
use std::time::Duration;

/// Default timeout for OpenAI API requests (5 minutes).
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Create an OpenAI client with the default request timeout.
///
/// Stage timeouts are enforced by the scheduler; this only guards against
/// a single hung HTTP request.
pub fn create_client() -> Result<Client<OpenAIConfig>> {
    create_client_with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
}

/// Create an OpenAI client with a custom timeout.
pub fn create_client_with_timeout(timeout: Duration) -> Result<Client<OpenAIConfig>> {
    let http_client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| TubeflowError::Config(format!("Failed to create HTTP client: {}", e)))?;

    Ok(Client::with_config(OpenAIConfig::default()).with_http_client(http_client))
}

/// Run a single system + user chat completion and return the reply text.
pub async fn complete_chat(
    client: &Client<OpenAIConfig>,
    model: &str,
    system: &str,
    user: String,
    max_tokens: u32,
) -> Result<String> {
    let messages: Vec<ChatCompletionRequestMessage> = vec![
        ChatCompletionRequestSystemMessageArgs::default()
            .content(system.to_string())
            .build()
            .map_err(|e| TubeflowError::OpenAI(e.to_string()))?
            .into(),
        ChatCompletionRequestUserMessageArgs::default()
            .content(user)
            .build()
            .map_err(|e| TubeflowError::OpenAI(e.to_string()))?
            .into(),
    ];

    let request = CreateChatCompletionRequestArgs::default()
        .model(model)
        .messages(messages)
        .max_completion_tokens(max_tokens)
        .build()
        .map_err(|e| TubeflowError::OpenAI(e.to_string()))?;

    let response = client
        .chat()
        .create(request)
        .await
        .map_err(|e| TubeflowError::OpenAI(format!("Chat completion failed: {}", e)))?;

    response
        .choices
        .first()
        .and_then(|c| c.message.content.as_ref())
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| TubeflowError::OpenAI("Empty response from LLM".to_string()))
}
