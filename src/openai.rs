use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{BotError, Result};
use crate::prompt::ComposedPrompt;
use crate::types::MessageRole;

pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";

// Short answers fit comfortably in one Discord message
const MAX_TOKENS: u32 = 150;

// Factual content, keep sampling close to deterministic
const TEMPERATURE: f32 = 0.2;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Anything able to turn a composed prompt into generated text.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, prompt: &ComposedPrompt) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: MessageRole,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

pub struct OpenAiClient {
    api_key: String,
    api_url: String,
    client: reqwest::Client,
    model: String,
}

impl OpenAiClient {
    pub fn new(api_key: String, model: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            api_key,
            api_url: DEFAULT_API_URL.to_string(),
            client,
            model,
        })
    }

    /// Points the client at another OpenAI-compatible endpoint.
    #[must_use]
    pub fn with_api_url(mut self, api_url: String) -> Self {
        self.api_url = api_url;
        self
    }
}

#[async_trait]
impl CompletionBackend for OpenAiClient {
    async fn complete(&self, prompt: &ComposedPrompt) -> Result<String> {
        debug!("Sending request to completion API using model {}", self.model);

        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: MessageRole::System,
                    content: &prompt.system,
                },
                Message {
                    role: MessageRole::User,
                    content: &prompt.user,
                },
            ],
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
        };

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response
                .text()
                .await
                .unwrap_or_else(|e| format!("Failed to read error response: {e}"));
            return Err(BotError::CompletionApi { status, message });
        }

        let api_response: ChatCompletionResponse = response.json().await?;

        let reply = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| BotError::CompletionResponse("No choices in response".to_string()))?
            .message
            .content
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| BotError::CompletionResponse("Empty message content".to_string()))?;

        debug!("Received response from completion API");
        Ok(reply)
    }
}
