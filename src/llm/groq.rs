use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::llm::{truncate, TextModel};

const PROVIDER: &str = "groq";

/// OpenAI-compatible chat completions, as served by Groq.
pub struct GroqModel {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
}

impl GroqModel {
    pub fn new(api_key: &str, api_base: &str, model: &str, timeout: Duration) -> Result<Self, ModelError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| ModelError::Request { provider: PROVIDER, source })?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
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

fn parse_chat_response(raw_body: &str) -> Result<String, ModelError> {
    let response: ChatResponse = serde_json::from_str(raw_body).map_err(|e| ModelError::Decode {
        provider: PROVIDER,
        reason: format!("{}. Body: {}", e, truncate(raw_body, 500)),
    })?;

    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or(ModelError::Empty { provider: PROVIDER })
}

#[async_trait]
impl TextModel for GroqModel {
    async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        let url = format!("{}/chat/completions", self.api_base);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        debug!("Calling {} model {}", PROVIDER, self.model);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|source| ModelError::Request { provider: PROVIDER, source })?;

        let status = response.status();
        let raw_body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            error!("Groq API error {}: {}", status, truncate(&raw_body, 500));
            return Err(ModelError::Api {
                provider: PROVIDER,
                status: status.as_u16(),
                body: truncate(&raw_body, 500).to_string(),
            });
        }

        parse_chat_response(&raw_body)
    }
}
