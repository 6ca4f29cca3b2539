use serde::Deserialize;

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

// Main configuration struct
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub imap: ImapConfig,
    pub smtp: SmtpConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub reply: ReplyConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub transform: Option<TransformConfig>,
    #[serde(default)]
    pub attachments: AttachmentConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub scheduler: Option<SchedulerConfig>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImapConfig {
    pub server: String,
    #[serde(default = "default_imap_port")]
    pub port: u16,
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SmtpConfig {
    pub server: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    // Port 465 style TLS from the first byte instead of STARTTLS.
    #[serde(default)]
    pub implicit_tls: bool,
}

// REST server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStrategy {
    #[default]
    Llm,
    Canned,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReplyConfig {
    pub strategy: ReplyStrategy,
    pub prompt: String,
    pub canned_text: String,
    pub fallback_text: String,
    pub quote_original: bool,
    pub forward_attachments: bool,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            strategy: ReplyStrategy::Llm,
            prompt: "Read the email and give a respectful reply:".to_string(),
            canned_text: "Hello,\n\nI've received your message and the attached files. \
                          I will review them and get back to you shortly.\n\nRegards"
                .to_string(),
            fallback_text: "Hello,\n\nThank you for your email. \
                            I have received it and will reply as soon as possible.\n\nRegards"
                .to_string(),
            quote_original: false,
            forward_attachments: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ModelsConfig {
    pub groq_api_base: String,
    pub groq_model: String,
    pub gemini_api_base: String,
    pub gemini_model: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            groq_api_base: "https://api.groq.com/openai/v1".to_string(),
            groq_model: "llama-3.3-70b-versatile".to_string(),
            gemini_api_base: "https://generativelanguage.googleapis.com".to_string(),
            gemini_model: "gemini-2.0-flash".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TransformConfig {
    pub enabled: bool,
    // Second model call turning the extracted structure into styled HTML.
    pub synthesize: bool,
    pub extraction_prompt: String,
    pub synthesis_prompt: String,
    pub renderer: RendererConfig,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            synthesize: true,
            extraction_prompt: "Describe this image in full detail for faithful reproduction: \
                                every piece of text verbatim, the page layout, tables, \
                                form fields with their labels and values, and the visual styling."
                .to_string(),
            synthesis_prompt: "Produce one self-contained HTML document with embedded CSS that \
                               reproduces the document described below. Do not use interactive \
                               form controls; draw static visual equivalents instead. \
                               Return only the HTML."
                .to_string(),
            renderer: RendererConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RendererConfig {
    pub program: String,
    // `{input}` and `{output}` are replaced with the markup and document paths.
    pub args: Vec<String>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            program: "wkhtmltopdf".to_string(),
            args: vec!["--quiet".to_string(), "{input}".to_string(), "{output}".to_string()],
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AttachmentConfig {
    pub capture_content_types: Vec<String>,
    pub save_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TimeoutConfig {
    pub mail_seconds: u64,
    pub model_seconds: u64,
    pub render_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            mail_seconds: 60,
            model_seconds: 120,
            render_seconds: 60,
        }
    }
}

impl TimeoutConfig {
    pub fn mail(&self) -> Duration {
        Duration::from_secs(self.mail_seconds)
    }

    pub fn model(&self) -> Duration {
        Duration::from_secs(self.model_seconds)
    }

    pub fn render(&self) -> Duration {
        Duration::from_secs(self.render_seconds)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(rename = "check_interval")]
    pub interval_seconds: u64,
}

fn default_imap_port() -> u16 {
    993
}

fn default_smtp_port() -> u16 {
    587
}

fn default_mailbox() -> String {
    "INBOX".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Secrets supplied by the environment, never by the settings file.
#[derive(Clone)]
pub struct Credentials {
    pub email_address: String,
    pub email_password: String,
    pub groq_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email_address", &self.email_address)
            .field("email_password", &"<redacted>")
            .field("groq_api_key", &self.groq_api_key.as_ref().map(|_| "<redacted>"))
            .field("gemini_api_key", &self.gemini_api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credentials {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|value| !value.is_empty())
                .ok_or(ConfigError::MissingEnvVar(key))
        };
        let optional = |key: &str| lookup(key).filter(|value| !value.is_empty());

        Ok(Self {
            email_address: required("EMAIL_ADDRESS")?,
            email_password: required("EMAIL_PASSWORD")?,
            groq_api_key: optional("GROQ_API_KEY"),
            gemini_api_key: optional("GEMINI_API_KEY"),
        })
    }

    /// Fails when a configured strategy or stage needs a key that is absent.
    pub fn check_against(&self, config: &Config) -> Result<(), ConfigError> {
        if config.reply.strategy == ReplyStrategy::Llm && self.groq_api_key.is_none() {
            return Err(ConfigError::MissingEnvVar("GROQ_API_KEY"));
        }
        let transform_enabled = config.transform.as_ref().is_some_and(|t| t.enabled);
        if transform_enabled && self.gemini_api_key.is_none() {
            return Err(ConfigError::MissingEnvVar("GEMINI_API_KEY"));
        }
        Ok(())
    }
}

impl Config {
    /// Rejects values that deserialize fine but cannot work at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero = |field: &'static str| -> Result<(), ConfigError> {
            Err(ConfigError::Invalid {
                field,
                reason: "must be greater than zero".to_string(),
            })
        };

        if self.timeouts.mail_seconds == 0 {
            return zero("timeouts.mail_seconds");
        }
        if self.timeouts.model_seconds == 0 {
            return zero("timeouts.model_seconds");
        }
        if self.timeouts.render_seconds == 0 {
            return zero("timeouts.render_seconds");
        }
        if self.scheduler.as_ref().is_some_and(|s| s.interval_seconds == 0) {
            return zero("scheduler.check_interval");
        }
        Ok(())
    }
}

pub fn parse_settings(yaml: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_yaml::from_str(yaml)?;
    config.validate()?;
    Ok(config)
}

/// Reads and validates the settings file. Errors are returned, not logged:
/// this runs before the logger is configured.
pub fn load_settings(path: &Path) -> Result<Config, ConfigError> {
    // Open the YAML file
    let file = File::open(path).map_err(|err| ConfigError::Io {
        path: path.display().to_string(),
        source: err,
    })?;

    let reader = BufReader::new(file);

    // Parse the YAML file into the Config struct
    let config: Config = serde_yaml::from_reader(reader)?;
    config.validate()?;
    Ok(config)
}
