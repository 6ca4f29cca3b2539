use std::sync::LazyLock;

use lettre::message::header::{ContentTransferEncoding, ContentType};
use lettre::message::{Attachment, Body, Mailbox, MultiPart, SinglePart};
use lettre::Message;
use regex::Regex;

use crate::error::TransportError;
use crate::mail_reader::message::{Attachment as InboundAttachment, InboundMessage};
use crate::mail_sender::{OutgoingAttachment, ReplyMessage};
use crate::settings::ReplyConfig;

static REPLY_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bre\s*:").expect("static regex"));

const NO_SUBJECT: &str = "No subject";
const QUOTE_SEPARATOR: &str = "----- Original Message -----";

/// `"Re: "` plus the original subject with every `Re:` removed, wherever it
/// appeared, and runs of whitespace collapsed.
pub fn reply_subject(original: Option<&str>) -> String {
    let original = original.map(str::trim).filter(|s| !s.is_empty()).unwrap_or(NO_SUBJECT);
    let stripped = REPLY_MARKER.replace_all(original, " ");
    let stripped = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    if stripped.is_empty() {
        format!("Re: {}", NO_SUBJECT)
    } else {
        format!("Re: {}", stripped)
    }
}

pub fn reply_body(reply_text: &str, original_body: &str, quote_original: bool) -> String {
    if quote_original {
        format!("{}\n\n{}\n{}", reply_text, QUOTE_SEPARATOR, original_body)
    } else {
        reply_text.to_string()
    }
}

fn forwarded(attachment: &InboundAttachment) -> OutgoingAttachment {
    OutgoingAttachment {
        filename: attachment.filename.clone(),
        data: attachment.data.clone(),
    }
}

/// Builds the reply for `original`. The rendered document, if any, comes
/// first; forwarded inbound attachments follow in their original order.
pub fn build_reply(
    original: &InboundMessage,
    reply_text: &str,
    document: Option<OutgoingAttachment>,
    config: &ReplyConfig,
) -> ReplyMessage {
    let mut attachments: Vec<OutgoingAttachment> = document.into_iter().collect();
    if config.forward_attachments {
        attachments.extend(original.attachments.iter().map(forwarded));
    }

    ReplyMessage {
        recipient: original.sender.clone(),
        subject: reply_subject(original.subject.as_deref()),
        body: reply_body(reply_text, &original.body, config.quote_original),
        attachments,
        in_reply_to: original.message_id.clone(),
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, TransportError> {
    address
        .parse::<Mailbox>()
        .map_err(|e| TransportError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })
}

fn binary_part(attachment: &OutgoingAttachment) -> Result<SinglePart, TransportError> {
    let body = Body::new_with_encoding(attachment.data.clone(), ContentTransferEncoding::Base64)
        .map_err(|_| TransportError::Compose(format!("cannot encode {}", attachment.filename)))?;
    let content_type = ContentType::parse("application/octet-stream")
        .map_err(|e| TransportError::Compose(e.to_string()))?;
    Ok(Attachment::new(attachment.filename.clone()).body(body, content_type))
}

/// Turns a reply into a wire-ready message sent from `from`.
pub fn to_email(from: &str, reply: &ReplyMessage) -> Result<Message, TransportError> {
    let mut builder = Message::builder()
        .from(parse_mailbox(from)?)
        .to(parse_mailbox(&reply.recipient)?)
        .subject(reply.subject.clone());

    // Thread the reply with In-Reply-To and References headers.
    if let Some(message_id) = reply.in_reply_to.as_deref().filter(|id| !id.is_empty()) {
        builder = builder
            .in_reply_to(message_id.to_string())
            .references(message_id.to_string());
    }

    let result = if reply.attachments.is_empty() {
        builder.singlepart(SinglePart::plain(reply.body.clone()))
    } else {
        let mut multipart = MultiPart::mixed().singlepart(SinglePart::plain(reply.body.clone()));
        for attachment in &reply.attachments {
            multipart = multipart.singlepart(binary_part(attachment)?);
        }
        builder.multipart(multipart)
    };

    result.map_err(|e| TransportError::Compose(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail_reader::message::parse_message;

    fn inbound() -> InboundMessage {
        InboundMessage {
            uid: 3,
            sender: "a@x.com".to_string(),
            subject: Some("Hello".to_string()),
            body: "Hi there".to_string(),
            attachments: vec![InboundAttachment {
                filename: "notes.txt".to_string(),
                content_type: "text/plain".to_string(),
                data: b"notes".to_vec(),
            }],
            message_id: Some("<orig-1@x.com>".to_string()),
        }
    }

    #[test]
    fn subject_gets_exactly_one_prefix() {
        assert_eq!(reply_subject(Some("Hello")), "Re: Hello");
        assert_eq!(reply_subject(Some("Re: Hello")), "Re: Hello");
        assert_eq!(reply_subject(Some("RE: re:Re:  Hello")), "Re: Hello");
        assert_eq!(reply_subject(Some("Reunion plans")), "Re: Reunion plans");
        assert_eq!(reply_subject(Some("Share: costs")), "Re: Share: costs");
    }

    #[test]
    fn inner_reply_markers_are_removed_too() {
        assert_eq!(reply_subject(Some("Fwd: Re: Hello")), "Re: Fwd: Hello");
        assert_eq!(reply_subject(Some("Hello Re: world")), "Re: Hello world");
        assert_eq!(reply_subject(Some("Fwd:RE:re: Hello")), "Re: Fwd: Hello");
        let subject = reply_subject(Some("Re: [team] Re:  Re: plan"));
        assert_eq!(subject.to_lowercase().matches("re:").count(), 1);
    }

    #[test]
    fn prefixing_is_idempotent() {
        let once = reply_subject(Some("Budget"));
        assert_eq!(reply_subject(Some(&once)), once);
    }

    #[test]
    fn missing_subject_becomes_no_subject() {
        assert_eq!(reply_subject(None), "Re: No subject");
        assert_eq!(reply_subject(Some("  ")), "Re: No subject");
        assert_eq!(reply_subject(Some("Re:")), "Re: No subject");
    }

    #[test]
    fn quoting_appends_original_body() {
        assert_eq!(
            reply_body("Thanks", "Hi there", true),
            "Thanks\n\n----- Original Message -----\nHi there"
        );
        assert_eq!(reply_body("Thanks", "Hi there", false), "Thanks");
    }

    #[test]
    fn build_reply_threads_and_orders_attachments() {
        let config = ReplyConfig {
            forward_attachments: true,
            ..ReplyConfig::default()
        };
        let document = OutgoingAttachment {
            filename: "rendered.pdf".to_string(),
            data: b"%PDF-1.4".to_vec(),
        };
        let reply = build_reply(&inbound(), "Thanks", Some(document), &config);
        assert_eq!(reply.recipient, "a@x.com");
        assert_eq!(reply.subject, "Re: Hello");
        assert_eq!(reply.in_reply_to.as_deref(), Some("<orig-1@x.com>"));
        let names: Vec<_> = reply.attachments.iter().map(|a| a.filename.as_str()).collect();
        assert_eq!(names, ["rendered.pdf", "notes.txt"]);
    }

    #[test]
    fn wire_message_carries_threading_headers() {
        let reply = build_reply(&inbound(), "Thanks", None, &ReplyConfig::default());
        let wire = to_email("bot@example.com", &reply).unwrap().formatted();
        let text = String::from_utf8_lossy(&wire);
        assert!(text.contains("In-Reply-To: <orig-1@x.com>"));
        assert!(text.contains("References: <orig-1@x.com>"));
        assert!(text.contains("Subject: Re: Hello"));
    }

    #[test]
    fn attachment_bytes_survive_the_wire() {
        let data: Vec<u8> = (0..=255u8).cycle().take(3000).collect();
        let reply = ReplyMessage {
            recipient: "a@x.com".to_string(),
            subject: "Re: Hello".to_string(),
            body: "See attached".to_string(),
            attachments: vec![OutgoingAttachment {
                filename: "blob.bin".to_string(),
                data: data.clone(),
            }],
            in_reply_to: None,
        };
        let wire = to_email("bot@example.com", &reply).unwrap().formatted();
        let text = String::from_utf8_lossy(&wire);
        assert!(text.contains("Content-Transfer-Encoding: base64"));
        assert!(text.contains("application/octet-stream"));

        let parsed = parse_message(&wire, 1, &[]).unwrap();
        assert_eq!(parsed.body.trim_end(), "See attached");
        assert_eq!(parsed.attachments.len(), 1);
        assert_eq!(parsed.attachments[0].filename, "blob.bin");
        assert_eq!(parsed.attachments[0].data, data);
    }

    #[test]
    fn invalid_recipient_is_reported() {
        let reply = ReplyMessage {
            recipient: "not an address".to_string(),
            subject: "Re: x".to_string(),
            body: String::new(),
            attachments: Vec::new(),
            in_reply_to: None,
        };
        assert!(matches!(
            to_email("bot@example.com", &reply),
            Err(TransportError::InvalidAddress { .. })
        ));
    }
}
