use async_trait::async_trait;

use crate::error::TransportError;

pub mod compose;
pub mod smtp;

/// A file attached to an outgoing reply.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingAttachment {
    pub filename: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplyMessage {
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<OutgoingAttachment>,
    pub in_reply_to: Option<String>,
}

/// Submission side of the mail transport.
#[async_trait]
pub trait MailSink: Send + Sync {
    async fn send(&self, reply: &ReplyMessage) -> Result<(), TransportError>;
}
