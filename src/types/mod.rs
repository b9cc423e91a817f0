//! Core types for the alert mailer.
//!
//! This module provides:
//! - The caller-owned email request ([`EmailMessage`])
//! - References to rendered files on disk ([`AttachmentRef`])
//! - Validation report rows ([`ValidationError`])
//! - The outcome of a successful send ([`SendReceipt`])

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};

/// A file to embed or append, as exported by the alerting pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    /// Path to the exported file.
    pub image_path: PathBuf,
    /// Display filename requested by the alert author.
    #[serde(default)]
    pub override_name: Option<String>,
}

impl AttachmentRef {
    /// Creates a reference that uses the file's own name.
    pub fn new(image_path: impl Into<PathBuf>) -> Self {
        Self {
            image_path: image_path.into(),
            override_name: None,
        }
    }

    /// Sets the display filename.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.override_name = Some(name.into());
        self
    }

    /// Returns the path.
    pub fn path(&self) -> &Path {
        &self.image_path
    }
}

/// One alert email, as handed over by the caller.
///
/// Address fields hold raw delimited strings (`"a@x.com; b@y.com"`); they are
/// split when the message is composed.
#[derive(Debug, Clone, Default)]
pub struct EmailMessage {
    /// Sender address.
    pub from: String,
    /// Primary recipients.
    pub to: String,
    /// CC recipients.
    pub cc: Option<String>,
    /// BCC recipients. Delivered to, never written to a header.
    pub bcc: Option<String>,
    /// Subject line.
    pub subject: String,
    /// HTML body. Inline attachments are referenced as `cid:<filename>`.
    pub html_body: String,
    /// Files rendered inside the body.
    pub inline_attachments: Vec<AttachmentRef>,
    /// Files offered as downloads.
    pub appended_attachments: Vec<AttachmentRef>,
}

impl EmailMessage {
    /// Creates a new message builder.
    pub fn builder() -> EmailMessageBuilder {
        EmailMessageBuilder::default()
    }
}

/// Builder for [`EmailMessage`].
#[derive(Debug, Default)]
pub struct EmailMessageBuilder {
    message: EmailMessage,
}

impl EmailMessageBuilder {
    /// Sets the sender address.
    pub fn from(mut self, address: impl Into<String>) -> Self {
        self.message.from = address.into();
        self
    }

    /// Sets the primary recipients field.
    pub fn to(mut self, addresses: impl Into<String>) -> Self {
        self.message.to = addresses.into();
        self
    }

    /// Sets the CC field.
    pub fn cc(mut self, addresses: impl Into<String>) -> Self {
        self.message.cc = Some(addresses.into());
        self
    }

    /// Sets the BCC field.
    pub fn bcc(mut self, addresses: impl Into<String>) -> Self {
        self.message.bcc = Some(addresses.into());
        self
    }

    /// Sets the subject.
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.message.subject = subject.into();
        self
    }

    /// Sets the HTML body.
    pub fn html(mut self, html: impl Into<String>) -> Self {
        self.message.html_body = html.into();
        self
    }

    /// Adds an inline attachment.
    pub fn inline(mut self, attachment: AttachmentRef) -> Self {
        self.message.inline_attachments.push(attachment);
        self
    }

    /// Adds an appended attachment.
    pub fn append(mut self, attachment: AttachmentRef) -> Self {
        self.message.appended_attachments.push(attachment);
        self
    }

    /// Builds the message.
    pub fn build(self) -> EmailMessage {
        self.message
    }
}

/// A bad address found while validating a table of alert rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    /// Display row, counting the header as row 1.
    pub row: usize,
    /// Name of the column the address came from.
    pub field: String,
    /// The offending address, shortened for display.
    pub value: String,
    /// Why the address was rejected.
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}, {}: {} ({})", self.row, self.field, self.value, self.message)
    }
}

/// Outcome of a delivered message.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    /// Message-ID header value, without angle brackets.
    pub message_id: String,
    /// Envelope recipients the server accepted (all of them).
    pub recipients: Vec<String>,
    /// Final server reply to the message data.
    pub response: String,
    /// Time spent on the send: the SMTP session for `Transmitter::send`,
    /// composition plus the session for `AlertMailer::send`.
    pub duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_builder() {
        let message = EmailMessage::builder()
            .from("alerts@example.com")
            .to("ops@example.com; dba@example.com")
            .bcc("audit@example.com")
            .subject("Disk usage")
            .html("<p>See below</p>")
            .inline(AttachmentRef::new("/tmp/viz.png"))
            .append(AttachmentRef::new("/tmp/viz.pdf").with_name("report.pdf"))
            .build();

        assert_eq!(message.from, "alerts@example.com");
        assert!(message.cc.is_none());
        assert_eq!(message.bcc.as_deref(), Some("audit@example.com"));
        assert_eq!(message.inline_attachments.len(), 1);
        assert_eq!(
            message.appended_attachments[0].override_name.as_deref(),
            Some("report.pdf")
        );
    }

    #[test]
    fn test_attachment_ref_deserialize() {
        let refs: Vec<AttachmentRef> = serde_json::from_str(
            r#"[{"image_path": "a.png"}, {"image_path": "b.pdf", "override_name": "b2.pdf"}]"#,
        )
        .unwrap();
        assert_eq!(refs[0], AttachmentRef::new("a.png"));
        assert_eq!(refs[1], AttachmentRef::new("b.pdf").with_name("b2.pdf"));
    }

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError {
            row: 3,
            field: "Email To".to_string(),
            value: "".to_string(),
            message: "Address is empty".to_string(),
        };
        assert_eq!(err.to_string(), "row 3, Email To:  (Address is empty)");
    }
}
