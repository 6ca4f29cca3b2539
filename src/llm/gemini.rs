use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ModelError;
use crate::llm::{truncate, TextModel, UploadedFile, VisionModel};

const PROVIDER: &str = "gemini";
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Gemini `generateContent` plus the Files API for image input.
pub struct GeminiModel {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
}

impl GeminiModel {
    pub fn new(api_key: &str, api_base: &str, model: &str, timeout: Duration) -> Result<Self, ModelError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| ModelError::Request { provider: PROVIDER, source })?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            model: normalize_model(model).to_string(),
        })
    }

    async fn generate(&self, parts: Value) -> Result<String, ModelError> {
        let url = format!("{}/v1beta/models/{}:generateContent", self.api_base, self.model);
        let request = json!({
            "contents": [{ "role": "user", "parts": parts }]
        });

        debug!("Calling {} model {}", PROVIDER, self.model);
        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(request_error)?;

        let raw_body = checked_body(response).await?;
        parse_generate_response(&raw_body)
    }
}

/// Config may carry a "models/" or "gemini/" prefix the REST path does not want.
fn normalize_model(model: &str) -> &str {
    model
        .strip_prefix("models/")
        .or_else(|| model.strip_prefix("gemini/"))
        .unwrap_or(model)
}

fn request_error(source: reqwest::Error) -> ModelError {
    ModelError::Request { provider: PROVIDER, source }
}

async fn checked_body(response: Response) -> Result<String, ModelError> {
    let status = response.status();
    let raw_body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        error!("Gemini API error {}: {}", status, truncate(&raw_body, 500));
        return Err(ModelError::Api {
            provider: PROVIDER,
            status: status.as_u16(),
            body: truncate(&raw_body, 500).to_string(),
        });
    }
    Ok(raw_body)
}

fn decode_error(e: serde_json::Error, raw_body: &str) -> ModelError {
    ModelError::Decode {
        provider: PROVIDER,
        reason: format!("{}. Body: {}", e, truncate(raw_body, 500)),
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

fn parse_generate_response(raw_body: &str) -> Result<String, ModelError> {
    let response: GenerateResponse =
        serde_json::from_str(raw_body).map_err(|e| decode_error(e, raw_body))?;

    let text: Vec<String> = response
        .candidates
        .and_then(|candidates| candidates.into_iter().next())
        .and_then(|candidate| candidate.content)
        .map(|content| content.parts.into_iter().filter_map(|part| part.text).collect())
        .unwrap_or_default();

    let joined = text.join("");
    if joined.trim().is_empty() {
        return Err(ModelError::Empty { provider: PROVIDER });
    }
    Ok(joined)
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: FileResource,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileResource {
    name: String,
    uri: String,
    mime_type: Option<String>,
}

fn parse_upload_response(raw_body: &str, fallback_mime: &str) -> Result<UploadedFile, ModelError> {
    let response: UploadResponse =
        serde_json::from_str(raw_body).map_err(|e| decode_error(e, raw_body))?;
    Ok(UploadedFile {
        name: response.file.name,
        uri: response.file.uri,
        mime_type: response.file.mime_type.unwrap_or_else(|| fallback_mime.to_string()),
    })
}

#[async_trait]
impl TextModel for GeminiModel {
    async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        self.generate(json!([{ "text": prompt }])).await
    }
}

#[async_trait]
impl VisionModel for GeminiModel {
    // Resumable upload protocol: a start request returns the session URL,
    // then the bytes are sent with "upload, finalize".
    async fn upload(
        &self,
        data: &[u8],
        mime_type: &str,
        display_name: &str,
    ) -> Result<UploadedFile, ModelError> {
        let start_url = format!("{}/upload/v1beta/files", self.api_base);
        let start = self
            .client
            .post(&start_url)
            .header(API_KEY_HEADER, &self.api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", data.len().to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&json!({ "file": { "display_name": display_name } }))
            .send()
            .await
            .map_err(request_error)?;

        let status = start.status();
        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let Some(upload_url) = upload_url else {
            let body = start.text().await.unwrap_or_default();
            return Err(ModelError::Api {
                provider: PROVIDER,
                status: status.as_u16(),
                body: format!("no upload URL returned: {}", truncate(&body, 500)),
            });
        };

        let response = self
            .client
            .post(&upload_url)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(data.to_vec())
            .send()
            .await
            .map_err(request_error)?;

        let raw_body = checked_body(response).await?;
        let file = parse_upload_response(&raw_body, mime_type)?;
        debug!("Uploaded {} as {}", display_name, file.name);
        Ok(file)
    }

    async fn generate_from_file(
        &self,
        prompt: &str,
        file: &UploadedFile,
    ) -> Result<String, ModelError> {
        self.generate(json!([
            { "fileData": { "mimeType": file.mime_type, "fileUri": file.uri } },
            { "text": prompt }
        ]))
        .await
    }

    async fn delete(&self, file: &UploadedFile) -> Result<(), ModelError> {
        let url = format!("{}/v1beta/{}", self.api_base, file.name);
        let response = self
            .client
            .delete(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(request_error)?;
        checked_body(response).await?;
        debug!("Deleted remote file {}", file.name);
        Ok(())
    }
}
