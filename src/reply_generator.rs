use std::sync::Arc;

use async_trait::async_trait;
use log::{info, warn};

use crate::error::ModelError;
use crate::llm::TextModel;

/// Produces the text of a reply from the inbound body.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(&self, body: &str) -> Result<String, ModelError>;
}

/// Delegates to a language model with a fixed instruction.
pub struct LlmReplyGenerator {
    model: Arc<dyn TextModel>,
    instruction: String,
}

impl LlmReplyGenerator {
    pub fn new(model: Arc<dyn TextModel>, instruction: impl Into<String>) -> Self {
        Self {
            model,
            instruction: instruction.into(),
        }
    }

    pub fn prompt(&self, body: &str) -> String {
        format!("{} {}", self.instruction.trim_end(), body)
    }
}

#[async_trait]
impl ReplyGenerator for LlmReplyGenerator {
    fn name(&self) -> &'static str {
        "llm"
    }

    async fn generate(&self, body: &str) -> Result<String, ModelError> {
        self.model.complete(&self.prompt(body)).await
    }
}

/// Always answers with the same text, without calling any model.
pub struct CannedReplyGenerator {
    text: String,
}

impl CannedReplyGenerator {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[async_trait]
impl ReplyGenerator for CannedReplyGenerator {
    fn name(&self) -> &'static str {
        "canned"
    }

    async fn generate(&self, _body: &str) -> Result<String, ModelError> {
        Ok(self.text.clone())
    }
}

/// Runs `generator`, degrading to `fallback` when the model call fails.
pub async fn generate_or_fallback(
    generator: &dyn ReplyGenerator,
    body: &str,
    fallback: &str,
) -> String {
    match generator.generate(body).await {
        Ok(text) => {
            info!("Reply generated by {} strategy", generator.name());
            text
        }
        Err(e) => {
            warn!(
                "{} reply generation failed, using fallback reply: {}",
                generator.name(),
                e
            );
            fallback.to_string()
        }
    }
}
