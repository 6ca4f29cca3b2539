use crate::mail_reader::message::InboundMessage;
use log::{debug, info};

pub fn display_message(message: &InboundMessage) {
    let filenames: Vec<&str> = message
        .attachments
        .iter()
        .map(|attachment| attachment.filename.as_str())
        .collect();

    info!(
        "New email from: {} | Subject: {} | Attachments: {:?}",
        message.sender,
        message.subject.as_deref().unwrap_or("<none>"),
        filenames
    );
    debug!("Body:\n{}", message.body);
}
