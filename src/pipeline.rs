use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::llm::gemini::GeminiModel;
use crate::llm::groq::GroqModel;
use crate::mail_reader::display::display_message;
use crate::mail_reader::imap::ImapMailbox;
use crate::mail_reader::message::{parse_message, Attachment, InboundMessage};
use crate::mail_reader::MailSource;
use crate::mail_sender::compose::build_reply;
use crate::mail_sender::smtp::SmtpSender;
use crate::mail_sender::{MailSink, OutgoingAttachment};
use crate::reply_generator::{
    generate_or_fallback, CannedReplyGenerator, LlmReplyGenerator, ReplyGenerator,
};
use crate::settings::{AttachmentConfig, Config, Credentials, ReplyConfig, ReplyStrategy};
use crate::transform::render::CommandRenderer;
use crate::transform::{first_image, DocumentTransformer};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RequestStatus {
    Success,
    NoUnreadMessage,
    Failure,
}

/// Where a failed request stopped.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Fetch,
    Parse,
    Send,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MessageDetails {
    pub sender: String,
    pub subject: Option<String>,
    pub body: String,
    pub attachment_path: Option<String>,
    pub document_attached: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RequestResult {
    pub status: RequestStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub details: Option<MessageDetails>,
}

impl RequestResult {
    fn no_unread() -> Self {
        Self {
            status: RequestStatus::NoUnreadMessage,
            message: "No unread emails.".to_string(),
            stage: None,
            details: None,
        }
    }

    pub(crate) fn aborted(message: String) -> Self {
        Self {
            status: RequestStatus::Failure,
            message,
            stage: None,
            details: None,
        }
    }

    fn failure(stage: Stage, message: String) -> Self {
        Self {
            status: RequestStatus::Failure,
            message,
            stage: Some(stage),
            details: None,
        }
    }

    fn success(details: MessageDetails) -> Self {
        Self {
            status: RequestStatus::Success,
            message: "Email processed successfully.".to_string(),
            stage: None,
            details: Some(details),
        }
    }
}

/// Fetch, optionally transform, generate, send. One message per call.
pub struct Pipeline {
    source: Arc<dyn MailSource>,
    sink: Arc<dyn MailSink>,
    generator: Arc<dyn ReplyGenerator>,
    transformer: Option<DocumentTransformer>,
    reply: ReplyConfig,
    attachments: AttachmentConfig,
    // Serializes the fetch-mark-reply sequence across concurrent triggers.
    single_flight: Mutex<()>,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn MailSource>,
        sink: Arc<dyn MailSink>,
        generator: Arc<dyn ReplyGenerator>,
        reply: ReplyConfig,
    ) -> Self {
        Self {
            source,
            sink,
            generator,
            transformer: None,
            reply,
            attachments: AttachmentConfig::default(),
            single_flight: Mutex::new(()),
        }
    }

    pub fn with_transformer(mut self, transformer: DocumentTransformer) -> Self {
        self.transformer = Some(transformer);
        self
    }

    pub fn with_attachments(mut self, attachments: AttachmentConfig) -> Self {
        self.attachments = attachments;
        self
    }

    pub async fn process_next(&self) -> RequestResult {
        let _flight = self.single_flight.lock().await;

        // Idle: ask the mailbox for the newest unseen message.
        let fetched = match self.source.fetch_latest_unseen().await {
            Ok(Some(fetched)) => fetched,
            Ok(None) => {
                info!("No unread emails");
                return RequestResult::no_unread();
            }
            Err(e) => {
                error!("Error fetching email: {}", e);
                return RequestResult::failure(Stage::Fetch, e.to_string());
            }
        };

        let message = match parse_message(
            &fetched.raw,
            fetched.uid,
            &self.attachments.capture_content_types,
        ) {
            Ok(message) => message,
            Err(e) => {
                error!("Cannot parse message UID {}: {}", fetched.uid, e);
                return RequestResult::failure(Stage::Parse, e.to_string());
            }
        };
        // Fetched: the message is marked seen from here on.
        debug!("Fetched UID {}", message.uid);
        display_message(&message);

        let attachment_path = self.save_attachments(&message.attachments).await;

        // Transformed, when there is an image and the transform succeeds.
        let document = self.run_transform(&message).await;
        let document_attached = document.is_some();

        let reply_text =
            generate_or_fallback(self.generator.as_ref(), &message.body, &self.reply.fallback_text)
                .await;
        let reply = build_reply(&message, &reply_text, document, &self.reply);

        if let Err(e) = self.sink.send(&reply).await {
            error!("Error sending reply to {}: {}", reply.recipient, e);
            return RequestResult::failure(Stage::Send, e.to_string());
        }
        debug!("Replied to {}", reply.recipient);

        RequestResult::success(MessageDetails {
            sender: message.sender,
            subject: message.subject,
            body: message.body,
            attachment_path: attachment_path.map(|path| path.display().to_string()),
            document_attached,
        })
    }

    async fn run_transform(&self, message: &InboundMessage) -> Option<OutgoingAttachment> {
        let transformer = self.transformer.as_ref()?;
        let image = first_image(&message.attachments)?;

        match transformer.transform(image).await {
            Ok(result) => Some(OutgoingAttachment {
                filename: result.filename,
                data: result.document,
            }),
            Err(e) => {
                warn!("Document transform of {} failed, replying without it: {}", image.filename, e);
                None
            }
        }
    }

    /// Writes captured attachments to the save directory, if one is set,
    /// and returns the first path written.
    async fn save_attachments(&self, attachments: &[Attachment]) -> Option<PathBuf> {
        let dir = self.attachments.save_dir.as_ref()?;
        if attachments.is_empty() {
            return None;
        }
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!("Cannot create attachment directory {}: {}", dir.display(), e);
            return None;
        }

        let mut taken = HashSet::new();
        let mut first = None;
        for attachment in attachments {
            let filename = unique_filename(&attachment.filename, &mut taken);
            match save_attachment(dir, &filename, &attachment.data).await {
                Ok(path) => {
                    info!("Attachment saved to: {}", path.display());
                    first.get_or_insert(path);
                }
                Err(e) => warn!("Cannot save attachment {}: {}", attachment.filename, e),
            }
        }
        first
    }
}

/// Appends `_<n>` to the stem of a name already used within this message.
fn unique_filename(filename: &str, taken: &mut HashSet<String>) -> String {
    let (stem, extension) = match filename.rfind('.') {
        Some(dot) if dot > 0 => filename.split_at(dot),
        _ => (filename, ""),
    };
    let mut candidate = filename.to_string();
    let mut n = 1;
    while !taken.insert(candidate.clone()) {
        n += 1;
        candidate = format!("{}_{}{}", stem, n, extension);
    }
    candidate
}

async fn save_attachment(dir: &Path, filename: &str, data: &[u8]) -> std::io::Result<PathBuf> {
    let path = dir.join(filename);
    tokio::fs::write(&path, data).await?;
    Ok(path)
}

/// Wires the production collaborators described by `config`.
pub fn build_pipeline(config: &Config, credentials: &Credentials) -> anyhow::Result<Pipeline> {
    credentials.check_against(config)?;

    let source = Arc::new(ImapMailbox::new(
        config.imap.clone(),
        credentials.email_address.clone(),
        credentials.email_password.clone(),
        config.timeouts.mail(),
    ));
    let sink = Arc::new(SmtpSender::new(
        config.smtp.clone(),
        credentials.email_address.clone(),
        credentials.email_password.clone(),
        config.timeouts.mail(),
    ));

    let generator: Arc<dyn ReplyGenerator> = match config.reply.strategy {
        ReplyStrategy::Canned => Arc::new(CannedReplyGenerator::new(config.reply.canned_text.clone())),
        ReplyStrategy::Llm => {
            let api_key = credentials
                .groq_api_key
                .as_deref()
                .context("GROQ_API_KEY is required for the llm reply strategy")?;
            let model = GroqModel::new(
                api_key,
                &config.models.groq_api_base,
                &config.models.groq_model,
                config.timeouts.model(),
            )?;
            Arc::new(LlmReplyGenerator::new(Arc::new(model), config.reply.prompt.clone()))
        }
    };
    info!("Reply strategy: {}", generator.name());

    let mut pipeline = Pipeline::new(source, sink, generator, config.reply.clone())
        .with_attachments(config.attachments.clone());

    if let Some(transform) = config.transform.as_ref().filter(|t| t.enabled) {
        let api_key = credentials
            .gemini_api_key
            .as_deref()
            .context("GEMINI_API_KEY is required for the document transform")?;
        let model = GeminiModel::new(
            api_key,
            &config.models.gemini_api_base,
            &config.models.gemini_model,
            config.timeouts.model(),
        )?;
        let renderer = CommandRenderer::new(&transform.renderer, config.timeouts.render());
        pipeline = pipeline.with_transformer(DocumentTransformer::new(
            Arc::new(model),
            Arc::new(renderer),
            transform,
        ));
        info!(
            "Document transform enabled ({} call)",
            if transform.synthesize { "two" } else { "one" }
        );
    }

    Ok(pipeline)
}
