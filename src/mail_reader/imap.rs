use async_imap::{Client, Session};
use async_trait::async_trait;
use futures::TryStreamExt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

use crate::error::TransportError;
use crate::mail_reader::{FetchedMail, MailSource};
use crate::settings::ImapConfig;
use log::{debug, info, warn};

type ImapSession = Session<Compat<tokio_native_tls::TlsStream<TcpStream>>>;

fn imap_error(command: &'static str) -> impl Fn(async_imap::error::Error) -> TransportError {
    move |e| TransportError::Imap {
        command,
        reason: e.to_string(),
    }
}

// Establish a TLS-encrypted connection to the IMAP server
async fn connect_to_server(
    server: &str,
    port: u16,
) -> Result<tokio_native_tls::TlsStream<TcpStream>, TransportError> {
    let connect_error = |reason: String| TransportError::Connect {
        host: server.to_string(),
        port,
        reason,
    };

    let tcp_stream = TcpStream::connect((server, port))
        .await
        .map_err(|e| connect_error(e.to_string()))?;
    let connector = native_tls::TlsConnector::new().map_err(|e| connect_error(e.to_string()))?;
    let tls = tokio_native_tls::TlsConnector::from(connector);
    let tls_stream = tls
        .connect(server, tcp_stream)
        .await
        .map_err(|e| connect_error(e.to_string()))?;

    debug!("-- connected to {}:{}", server, port);
    Ok(tls_stream)
}

// Login to the IMAP server and return an authenticated session
async fn login_to_server(
    client: Client<Compat<tokio_native_tls::TlsStream<TcpStream>>>,
    username: &str,
    password: &str,
) -> Result<ImapSession, TransportError> {
    let imap_session = client
        .login(username, password)
        .await
        .map_err(|(e, _client)| TransportError::Auth {
            user: username.to_string(),
            reason: e.to_string(),
        })?;

    debug!("-- logged in as {}", username);
    Ok(imap_session)
}

/// The highest UID is the one the server assigned last.
pub fn latest_uid(uids: impl IntoIterator<Item = u32>) -> Option<u32> {
    uids.into_iter().max()
}

async fn fetch_latest(
    session: &mut ImapSession,
    mailbox: &str,
) -> Result<Option<FetchedMail>, TransportError> {
    session.select(mailbox).await.map_err(imap_error("SELECT"))?;
    debug!("-- {} selected", mailbox);

    let unseen = session
        .uid_search("UNSEEN")
        .await
        .map_err(imap_error("UID SEARCH"))?;

    let Some(uid) = latest_uid(unseen.iter().copied()) else {
        return Ok(None);
    };
    info!("{} unseen message(s), fetching UID {}", unseen.len(), uid);

    let uid_set = uid.to_string();
    let fetched: Vec<_> = session
        .uid_fetch(&uid_set, "RFC822")
        .await
        .map_err(imap_error("UID FETCH"))?
        .try_collect()
        .await
        .map_err(imap_error("UID FETCH"))?;

    let raw = fetched
        .iter()
        .find_map(|message| message.body().map(<[u8]>::to_vec))
        .ok_or_else(|| TransportError::Imap {
            command: "UID FETCH",
            reason: format!("no body returned for UID {}", uid),
        })?;

    // RFC822 fetches set \Seen on most servers already; make it explicit.
    let _updates: Vec<_> = session
        .uid_store(&uid_set, "+FLAGS (\\Seen)")
        .await
        .map_err(imap_error("UID STORE"))?
        .try_collect()
        .await
        .map_err(imap_error("UID STORE"))?;

    Ok(Some(FetchedMail { uid, raw }))
}

/// IMAP-over-TLS retrieval. Opens a fresh session per call.
pub struct ImapMailbox {
    config: ImapConfig,
    username: String,
    password: String,
    timeout: Duration,
}

impl ImapMailbox {
    pub fn new(config: ImapConfig, username: String, password: String, timeout: Duration) -> Self {
        Self {
            config,
            username,
            password,
            timeout,
        }
    }

    async fn run_session(&self) -> Result<Option<FetchedMail>, TransportError> {
        // Connect to server
        let tls_stream = connect_to_server(&self.config.server, self.config.port).await?;
        let client = Client::new(tls_stream.compat());

        // Log in
        let mut imap_session = login_to_server(client, &self.username, &self.password).await?;

        let result = fetch_latest(&mut imap_session, &self.config.mailbox).await;

        // Be nice to the server and log out, whatever happened
        if let Err(e) = imap_session.logout().await {
            warn!("IMAP logout failed: {}", e);
        }

        result
    }
}

#[async_trait]
impl MailSource for ImapMailbox {
    async fn fetch_latest_unseen(&self) -> Result<Option<FetchedMail>, TransportError> {
        tokio::time::timeout(self.timeout, self.run_session())
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_uid_is_the_highest() {
        assert_eq!(latest_uid([4, 19, 7]), Some(19));
        assert_eq!(latest_uid(Vec::<u32>::new()), None);
    }
}
