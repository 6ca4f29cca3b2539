use mailparse::{parse_mail, DispositionType, MailHeaderMap, ParsedMail};
use log::debug;

use crate::error::ParseError;

/// The newest unseen message, decoded into the fields the pipeline uses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundMessage {
    pub uid: u32,
    pub sender: String,
    pub subject: Option<String>,
    pub body: String,
    pub attachments: Vec<Attachment>,
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn is_image(&self) -> bool {
        self.content_type.to_ascii_lowercase().starts_with("image/")
    }
}

/// Replaces every character outside `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect()
}

fn attachment_filename(part: &ParsedMail, uid: u32, index: usize) -> String {
    let declared = part
        .get_content_disposition()
        .params
        .get("filename")
        .cloned()
        .or_else(|| part.ctype.params.get("name").cloned())
        .map(|name| sanitize_filename(name.trim()))
        // A name made only of dots would escape the save directory.
        .filter(|name| !name.is_empty() && !name.chars().all(|c| c == '.'));

    declared.unwrap_or_else(|| {
        let subtype = part.ctype.mimetype.split('/').nth(1).unwrap_or("bin");
        sanitize_filename(&format!("attachment_{}_{}.{}", uid, index + 1, subtype))
    })
}

fn is_captured_type(mimetype: &str, capture_types: &[String]) -> bool {
    capture_types.iter().any(|t| t.eq_ignore_ascii_case(mimetype))
}

// Walks the MIME tree depth first, in the order the parts appear on the wire.
fn collect_parts(
    parsed_mail: &ParsedMail,
    uid: u32,
    capture_types: &[String],
) -> Result<(String, Vec<Attachment>), ParseError> {
    let mut body: Option<String> = None;
    let mut attachments = Vec::new();

    fn process_part(
        part: &ParsedMail,
        uid: u32,
        capture_types: &[String],
        body: &mut Option<String>,
        attachments: &mut Vec<Attachment>,
    ) -> Result<(), ParseError> {
        let mimetype = part.ctype.mimetype.to_ascii_lowercase();
        let is_attachment = matches!(
            part.get_content_disposition().disposition,
            DispositionType::Attachment
        );

        if mimetype == "text/plain" && !is_attachment && body.is_none() {
            *body = Some(part.get_body()?);
        }

        if is_attachment || is_captured_type(&mimetype, capture_types) {
            let filename = attachment_filename(part, uid, attachments.len());
            debug!("Captured attachment {} ({})", filename, mimetype);
            attachments.push(Attachment {
                filename,
                content_type: mimetype,
                data: part.get_body_raw()?,
            });
        }

        for subpart in &part.subparts {
            process_part(subpart, uid, capture_types, body, attachments)?;
        }

        Ok(())
    }

    process_part(parsed_mail, uid, capture_types, &mut body, &mut attachments)?;
    Ok((body.unwrap_or_default(), attachments))
}

/// Decodes one raw RFC 5322 message.
pub fn parse_message(
    raw: &[u8],
    uid: u32,
    capture_types: &[String],
) -> Result<InboundMessage, ParseError> {
    let parsed_mail = parse_mail(raw)?;

    let sender = parsed_mail
        .headers
        .get_first_value("From")
        .map(|from| from.trim().to_string())
        .filter(|from| !from.is_empty())
        .ok_or(ParseError::MissingSender)?;
    let subject = parsed_mail.headers.get_first_value("Subject");
    let message_id = parsed_mail
        .headers
        .get_first_value("Message-ID")
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty());

    let (body, attachments) = if parsed_mail.subparts.is_empty() {
        (parsed_mail.get_body()?, Vec::new())
    } else {
        collect_parts(&parsed_mail, uid, capture_types)?
    };

    Ok(InboundMessage {
        uid,
        sender,
        subject,
        body,
        attachments,
        message_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MULTIPART: &str = "From: Alice <alice@example.com>\r\n\
Subject: Quarterly report\r\n\
Message-ID: <abc123@example.com>\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
\r\n\
--XYZ\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
First body\r\n\
--XYZ\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Second body\r\n\
--XYZ\r\n\
Content-Type: image/png\r\n\
Content-Disposition: attachment; filename=\"scan (1).png\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
iVBORw0KGgo=\r\n\
--XYZ\r\n\
Content-Type: application/pdf\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
JVBERi0=\r\n\
--XYZ--\r\n";

    #[test]
    fn picks_first_plain_text_part_as_body() {
        let message = parse_message(MULTIPART.as_bytes(), 7, &[]).unwrap();
        assert_eq!(message.sender, "Alice <alice@example.com>");
        assert_eq!(message.subject.as_deref(), Some("Quarterly report"));
        assert_eq!(message.message_id.as_deref(), Some("<abc123@example.com>"));
        assert_eq!(message.body.trim_end(), "First body");
    }

    #[test]
    fn captures_attachment_by_disposition_with_sanitized_name() {
        let message = parse_message(MULTIPART.as_bytes(), 7, &[]).unwrap();
        assert_eq!(message.attachments.len(), 1);
        let attachment = &message.attachments[0];
        assert_eq!(attachment.filename, "scan__1_.png");
        assert_eq!(attachment.content_type, "image/png");
        assert_eq!(attachment.data, b"\x89PNG\r\n\x1a\n");
        assert!(attachment.is_image());
    }

    #[test]
    fn captures_configured_type_without_disposition() {
        let capture = vec!["application/pdf".to_string()];
        let message = parse_message(MULTIPART.as_bytes(), 7, &capture).unwrap();
        assert_eq!(message.attachments.len(), 2);
        let pdf = &message.attachments[1];
        assert_eq!(pdf.filename, "attachment_7_2.pdf");
        assert_eq!(pdf.data, b"%PDF-");
    }

    #[test]
    fn single_part_payload_is_the_body() {
        let raw = "From: a@x.com\r\nSubject: Hello\r\n\r\nHi there";
        let message = parse_message(raw.as_bytes(), 1, &[]).unwrap();
        assert_eq!(message.body, "Hi there");
        assert!(message.attachments.is_empty());
        assert!(message.message_id.is_none());
    }

    #[test]
    fn missing_subject_and_plain_part_degrade_to_empty() {
        let raw = "From: a@x.com\r\n\
Content-Type: multipart/alternative; boundary=\"B\"\r\n\
\r\n\
--B\r\n\
Content-Type: text/html\r\n\
\r\n\
<p>hi</p>\r\n\
--B--\r\n";
        let message = parse_message(raw.as_bytes(), 1, &[]).unwrap();
        assert!(message.subject.is_none());
        assert_eq!(message.body, "");
    }

    #[test]
    fn missing_sender_is_an_error() {
        let raw = "Subject: orphan\r\n\r\nbody";
        assert!(matches!(
            parse_message(raw.as_bytes(), 1, &[]),
            Err(ParseError::MissingSender)
        ));
    }

    #[test]
    fn sanitize_replaces_unsafe_characters() {
        assert_eq!(sanitize_filename("../etc/passwd"), ".._etc_passwd");
        assert_eq!(sanitize_filename("résumé v2.pdf"), "r_sum__v2.pdf");
        assert_eq!(sanitize_filename("ok-name_1.txt"), "ok-name_1.txt");
    }
}
