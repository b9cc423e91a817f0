//! Building the MIME tree and envelope for one alert email.
//!
//! Layout of every composed message:
//!
//! ```text
//! multipart/mixed
//! ├── multipart/related
//! │   ├── text/html
//! │   └── inline parts, in order
//! └── appended parts, in order
//! ```

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::attachments::{AttachmentMerger, AttachmentResolver, PassthroughMerger};
use crate::errors::{DeliveryError, DeliveryResult};
use crate::mime::{MimeEntity, MimePart, Multipart, MultipartKind, TextPart};
use crate::types::EmailMessage;
use crate::validation::split_addresses;

/// SMTP envelope: who the message is from and every mailbox it goes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// MAIL FROM address.
    pub from: String,
    /// RCPT TO addresses: To, then CC, then BCC. Duplicates are kept.
    pub recipients: Vec<String>,
}

/// A message ready for serialization and sending.
#[derive(Debug, Clone)]
pub struct ComposedMessage {
    /// From header.
    pub from: String,
    /// To header addresses.
    pub to: Vec<String>,
    /// CC header addresses; the header is omitted when empty.
    pub cc: Vec<String>,
    /// Subject, unencoded.
    pub subject: String,
    /// Message-ID without angle brackets.
    pub message_id: String,
    /// Date header.
    pub date: DateTime<Utc>,
    /// Root `multipart/mixed` body.
    pub body: Multipart,
    /// Delivery envelope.
    pub envelope: Envelope,
}

impl ComposedMessage {
    /// Returns the `multipart/related` child holding the body and inline parts.
    pub fn related(&self) -> Option<&Multipart> {
        self.body.parts.iter().find_map(|entity| match entity {
            MimeEntity::Multipart(multipart) if multipart.kind == MultipartKind::Related => Some(multipart),
            _ => None,
        })
    }

    /// Returns the appended parts, in order.
    pub fn appended(&self) -> Vec<&MimePart> {
        self.body
            .parts
            .iter()
            .filter_map(|entity| match entity {
                MimeEntity::Part(part) => Some(part),
                _ => None,
            })
            .collect()
    }
}

/// Composes [`EmailMessage`]s into [`ComposedMessage`]s.
#[derive(Clone)]
pub struct MessageComposer {
    resolver: AttachmentResolver,
    merger: Arc<dyn AttachmentMerger>,
}

impl std::fmt::Debug for MessageComposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageComposer")
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

impl Default for MessageComposer {
    fn default() -> Self {
        Self::new(AttachmentResolver::new(), Arc::new(PassthroughMerger))
    }
}

impl MessageComposer {
    /// Creates a composer.
    pub fn new(resolver: AttachmentResolver, merger: Arc<dyn AttachmentMerger>) -> Self {
        Self { resolver, merger }
    }

    /// Reads every attachment and builds the message.
    ///
    /// Fails with an `Other` error if an attachment cannot be read, the
    /// merger fails, or the message has no To recipient.
    pub async fn compose(&self, message: &EmailMessage) -> DeliveryResult<ComposedMessage> {
        let inline = self.resolver.resolve_inline(&message.inline_attachments).await?;

        let appended = self.merger.merge(message.appended_attachments.clone())?;
        let appended = self.resolver.resolve_appended(&appended).await?;

        Self::assemble(message, inline, appended)
    }

    /// Builds the tree and envelope from already resolved parts.
    pub fn assemble(
        message: &EmailMessage,
        inline: Vec<MimePart>,
        appended: Vec<MimePart>,
    ) -> DeliveryResult<ComposedMessage> {
        let to = address_list(Some(&message.to));
        if to.is_empty() {
            return Err(DeliveryError::other("Message has no To recipient"));
        }
        let cc = address_list(message.cc.as_deref());
        let bcc = address_list(message.bcc.as_deref());

        let mut related = Multipart::new(MultipartKind::Related);
        related.push(TextPart::html(message.html_body.as_str()));
        for part in inline {
            related.push(part);
        }

        let mut body = Multipart::new(MultipartKind::Mixed);
        body.push(related);
        for part in appended {
            body.push(part);
        }

        let recipients = to.iter().chain(&cc).chain(&bcc).cloned().collect();

        Ok(ComposedMessage {
            from: message.from.clone(),
            message_id: generate_message_id(&message.from),
            date: Utc::now(),
            subject: message.subject.clone(),
            envelope: Envelope {
                from: message.from.clone(),
                recipients,
            },
            to,
            cc,
            body,
        })
    }
}

/// Splits a raw field, treating an absent or blank field as no addresses.
fn address_list(field: Option<&str>) -> Vec<String> {
    match field {
        Some(raw) if !raw.trim().is_empty() => split_addresses(raw)
            .into_iter()
            .filter(|address| !address.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn generate_message_id(from: &str) -> String {
    let domain = from
        .rsplit_once('@')
        .map(|(_, domain)| domain)
        .filter(|domain| !domain.is_empty() && domain.is_ascii())
        .unwrap_or("localhost");
    format!("{}.{}@{}", Uuid::new_v4().simple(), Utc::now().timestamp(), domain)
}
