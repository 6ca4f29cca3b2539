//! Error types for each collaborator boundary of the pipeline.

use std::time::Duration;

/// Mail retrieval and submission errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to {host}:{port}: {reason}")]
    Connect { host: String, port: u16, reason: String },

    #[error("authentication failed for {user}: {reason}")]
    Auth { user: String, reason: String },

    #[error("IMAP command {command} failed: {reason}")]
    Imap { command: &'static str, reason: String },

    #[error("invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("failed to build message: {0}")]
    Compose(String),

    #[error("SMTP submission failed: {0}")]
    Smtp(String),

    #[error("mail session timed out after {0:?}")]
    Timeout(Duration),
}

/// Raw message decoding errors.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("malformed message: {0}")]
    Malformed(#[from] mailparse::MailParseError),

    #[error("message has no From header")]
    MissingSender,
}

/// Errors returned by the hosted generation models.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("{provider} request failed: {source}")]
    Request {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} API error {status}: {body}")]
    Api {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("failed to decode {provider} response: {reason}")]
    Decode { provider: &'static str, reason: String },

    #[error("{provider} returned no text")]
    Empty { provider: &'static str },
}

/// External renderer errors.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to launch renderer '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("renderer exited with {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    #[error("renderer produced no output at {0}")]
    MissingOutput(String),

    #[error("renderer timed out after {0:?}")]
    Timeout(Duration),
}

/// Document transform stage errors. None of these abort a request.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("scratch space error: {0}")]
    Io(#[from] std::io::Error),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("render error: {0}")]
    Render(#[from] RenderError),

    #[error("model returned empty markup")]
    EmptyMarkup,
}

/// Startup configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("cannot read settings file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot deserialize settings: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
