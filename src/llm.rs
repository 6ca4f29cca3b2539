//! Hosted generation models.
//!
//! [`TextModel`] covers plain prompt-in, text-out calls. [`VisionModel`] adds
//! the upload / generate / delete cycle the document transform needs.

use async_trait::async_trait;

use crate::error::ModelError;

pub mod gemini;
pub mod groq;

#[async_trait]
pub trait TextModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, ModelError>;
}

/// A binary the provider keeps on its side until it is deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub name: String,
    pub uri: String,
    pub mime_type: String,
}

#[async_trait]
pub trait VisionModel: TextModel {
    async fn upload(
        &self,
        data: &[u8],
        mime_type: &str,
        display_name: &str,
    ) -> Result<UploadedFile, ModelError>;

    async fn generate_from_file(
        &self,
        prompt: &str,
        file: &UploadedFile,
    ) -> Result<String, ModelError>;

    async fn delete(&self, file: &UploadedFile) -> Result<(), ModelError>;
}

/// Strips a surrounding Markdown code fence, which models like to add
/// around generated HTML.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(inner) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the language tag line, if any.
    match inner.find('\n') {
        Some(pos) => inner[pos + 1..].trim(),
        None => inner.trim(),
    }
}

pub(crate) fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
