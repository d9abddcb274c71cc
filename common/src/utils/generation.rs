use std::sync::Arc;

use async_openai::{
    config::OpenAIConfig,
    types::{ChatCompletionRequestUserMessage, CreateChatCompletionRequestArgs},
    Client,
};
use async_trait::async_trait;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::{debug, warn};

use crate::{error::AppError, utils::config::AppConfig};

/// Prompt → completion backend. Fallible; the answer pipeline never retries.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str, max_output_tokens: u32) -> Result<String, AppError>;
}

/// Chat-completion backend for any OpenAI-compatible endpoint. Transient
/// failures are retried a few times with jittered exponential backoff.
pub struct OpenAiGenerator {
    client: Arc<Client<OpenAIConfig>>,
    model: String,
    max_attempts: usize,
}

impl OpenAiGenerator {
    pub fn new(client: Arc<Client<OpenAIConfig>>, model: String) -> Self {
        Self {
            client,
            model,
            max_attempts: 3,
        }
    }

    pub fn from_config(config: &AppConfig, client: Arc<Client<OpenAIConfig>>) -> Self {
        Self::new(client, config.generation_model.clone())
    }

    async fn complete_once(&self, prompt: &str, max_output_tokens: u32) -> Result<String, AppError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .max_completion_tokens(max_output_tokens)
            .messages([ChatCompletionRequestUserMessage::from(prompt).into()])
            .build()?;

        let response = self.client.chat().create(request).await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| AppError::Generation("No content found in LLM response".into()))
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(&self, prompt: &str, max_output_tokens: u32) -> Result<String, AppError> {
        let retry_strategy = ExponentialBackoff::from_millis(100)
            .map(jitter)
            .take(self.max_attempts.saturating_sub(1));

        let completion = Retry::spawn(retry_strategy, || async {
            self.complete_once(prompt, max_output_tokens)
                .await
                .inspect_err(|err| warn!(error = %err, model = %self.model, "completion attempt failed"))
        })
        .await?;

        debug!(
            model = %self.model,
            chars = completion.len(),
            "completion received"
        );
        Ok(completion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_backend_is_an_error() {
        let client = Arc::new(Client::with_config(
            OpenAIConfig::new()
                .with_api_key("test-key")
                .with_api_base("http://127.0.0.1:9/v1"),
        ));
        let generator = OpenAiGenerator::new(client, "test-model".into());

        let result = generator.generate("Question: ?\nAnswer:", 16).await;
        assert!(result.is_err());
    }
}
