use async_trait::async_trait;

use crate::error::TransportError;

pub mod display;
pub mod imap;
pub mod message;

/// Raw bytes of one message pulled off the server.
#[derive(Debug, Clone)]
pub struct FetchedMail {
    pub uid: u32,
    pub raw: Vec<u8>,
}

/// Retrieval side of the mail transport.
#[async_trait]
pub trait MailSource: Send + Sync {
    /// Returns the most recently listed unseen message and marks it seen.
    /// Every other unseen message is left untouched.
    async fn fetch_latest_unseen(&self) -> Result<Option<FetchedMail>, TransportError>;
}
