use std::time::Duration;

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use log::info;

use crate::error::TransportError;
use crate::mail_sender::compose::to_email;
use crate::mail_sender::{MailSink, ReplyMessage};
use crate::settings::SmtpConfig;

/// SMTP submission. Every send opens its own connection and quits it
/// before returning, whether or not the transaction succeeded.
pub struct SmtpSender {
    config: SmtpConfig,
    from_address: String,
    password: String,
    timeout: Duration,
}

impl SmtpSender {
    pub fn new(config: SmtpConfig, from_address: String, password: String, timeout: Duration) -> Self {
        Self {
            config,
            from_address,
            password,
            timeout,
        }
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, TransportError> {
        let creds = Credentials::new(self.from_address.clone(), self.password.clone());
        let builder = if self.config.implicit_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&self.config.server)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.server)
        }
        .map_err(|e| TransportError::Connect {
            host: self.config.server.clone(),
            port: self.config.port,
            reason: e.to_string(),
        })?;

        Ok(builder
            .port(self.config.port)
            .credentials(creds)
            .timeout(Some(self.timeout))
            .build())
    }
}

#[async_trait]
impl MailSink for SmtpSender {
    async fn send(&self, reply: &ReplyMessage) -> Result<(), TransportError> {
        let email = to_email(&self.from_address, reply)?;
        let mailer = self.transport()?;

        tokio::time::timeout(self.timeout, mailer.send(email))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?
            .map_err(|e| TransportError::Smtp(e.to_string()))?;

        info!(
            "Reply sent to {} ({} attachment(s))",
            reply.recipient,
            reply.attachments.len()
        );
        Ok(())
    }
}
