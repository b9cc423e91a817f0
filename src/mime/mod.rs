//! MIME tree and wire encoding for alert emails.
//!
//! Provides:
//! - The part tree ([`MimeEntity`], [`Multipart`], [`MimePart`], [`TextPart`])
//! - Header encoding (RFC 2047), RFC 2231 filename parameters and folding
//! - Quoted-printable bodies and base64 binary parts
//! - DATA preparation (dot-stuffing)

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::fmt;
use uuid::Uuid;

use crate::compose::ComposedMessage;
use crate::errors::{DeliveryError, DeliveryResult};

/// Longest header line before folding.
const MAX_HEADER_LINE: usize = 78;

/// RFC 2231 attribute characters, left as is in extended parameter values.
const ATTR_CHAR_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

/// Bytes of UTF-8 per encoded word; keeps each word under 75 characters.
const ENCODED_WORD_CHUNK: usize = 45;

/// Base64 line length.
const BASE64_LINE: usize = 76;

/// How a binary part is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Rendered in the HTML body via `cid:`.
    Inline,
    /// Offered as a download.
    Attachment,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Inline => write!(f, "inline"),
            Disposition::Attachment => write!(f, "attachment"),
        }
    }
}

/// A file resolved into a MIME part. The payload is raw bytes; it is base64
/// encoded when written.
#[derive(Debug, Clone, PartialEq)]
pub struct MimePart {
    /// Content type (major/minor).
    pub content_type: mime::Mime,
    /// Inline or attachment.
    pub disposition: Disposition,
    /// Display filename.
    pub filename: String,
    /// Content-ID without angle brackets, for inline parts.
    pub content_id: Option<String>,
    /// File contents.
    pub payload: Vec<u8>,
}

impl MimePart {
    /// Creates an inline part referenced as `cid:<filename>`.
    pub fn inline(content_type: mime::Mime, filename: impl Into<String>, payload: Vec<u8>) -> Self {
        let filename = filename.into();
        Self {
            content_type,
            disposition: Disposition::Inline,
            content_id: Some(filename.clone()),
            filename,
            payload,
        }
    }

    /// Creates a downloadable part.
    pub fn attachment(content_type: mime::Mime, filename: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            content_type,
            disposition: Disposition::Attachment,
            filename: filename.into(),
            content_id: None,
            payload,
        }
    }

    /// Returns the reference usable from HTML, e.g. `cid:chart.png`.
    pub fn cid_reference(&self) -> Option<String> {
        self.content_id.as_ref().map(|id| format!("cid:{}", id))
    }
}

/// A UTF-8 text part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextPart {
    /// Text subtype, e.g. `html`.
    pub subtype: String,
    /// Body text.
    pub text: String,
}

impl TextPart {
    /// Creates an HTML part.
    pub fn html(text: impl Into<String>) -> Self {
        Self {
            subtype: "html".to_string(),
            text: text.into(),
        }
    }
}

/// Multipart subtypes used by alert emails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultipartKind {
    /// Body plus attachments.
    Mixed,
    /// HTML plus the images it references.
    Related,
}

impl MultipartKind {
    /// Returns the MIME subtype.
    pub fn subtype(&self) -> &'static str {
        match self {
            MultipartKind::Mixed => "mixed",
            MultipartKind::Related => "related",
        }
    }
}

/// A multipart container.
#[derive(Debug, Clone, PartialEq)]
pub struct Multipart {
    /// Subtype.
    pub kind: MultipartKind,
    /// Children, in wire order.
    pub parts: Vec<MimeEntity>,
}

impl Multipart {
    /// Creates an empty container.
    pub fn new(kind: MultipartKind) -> Self {
        Self { kind, parts: Vec::new() }
    }

    /// Appends a child.
    pub fn push(&mut self, entity: impl Into<MimeEntity>) {
        self.parts.push(entity.into());
    }
}

/// Node of the MIME tree.
#[derive(Debug, Clone, PartialEq)]
pub enum MimeEntity {
    /// Text body.
    Text(TextPart),
    /// Binary file.
    Part(MimePart),
    /// Nested container.
    Multipart(Multipart),
}

impl From<TextPart> for MimeEntity {
    fn from(part: TextPart) -> Self {
        MimeEntity::Text(part)
    }
}

impl From<MimePart> for MimeEntity {
    fn from(part: MimePart) -> Self {
        MimeEntity::Part(part)
    }
}

impl From<Multipart> for MimeEntity {
    fn from(multipart: Multipart) -> Self {
        MimeEntity::Multipart(multipart)
    }
}

/// Flattens a composed message to RFC 5322 bytes.
///
/// Address headers are written as given (no `>From` mangling or rewriting);
/// anything non-ASCII in a header becomes a UTF-8 encoded word.
#[derive(Debug, Default)]
pub struct MimeEncoder;

impl MimeEncoder {
    /// Creates a new encoder.
    pub fn new() -> Self {
        Self
    }

    /// Encodes a composed message to RFC 5322 format.
    pub fn encode(&self, message: &ComposedMessage) -> DeliveryResult<Vec<u8>> {
        let mut output = Vec::new();

        self.write_header(&mut output, "Date", &format_date(&message.date))?;
        self.write_header(&mut output, "From", &encode_header(&message.from))?;
        self.write_header(&mut output, "To", &encode_header(&message.to.join(", ")))?;

        if !message.cc.is_empty() {
            self.write_header(&mut output, "CC", &encode_header(&message.cc.join(", ")))?;
        }

        // BCC recipients live only in the envelope.

        self.write_header(&mut output, "Subject", &encode_header(&message.subject))?;
        self.write_header(&mut output, "Message-ID", &format!("<{}>", message.message_id))?;
        self.write_header(&mut output, "MIME-Version", "1.0")?;

        self.write_multipart(&mut output, &message.body)?;
        Ok(output)
    }

    fn write_entity(&self, output: &mut Vec<u8>, entity: &MimeEntity) -> DeliveryResult<()> {
        match entity {
            MimeEntity::Text(text) => self.write_text(output, text),
            MimeEntity::Part(part) => self.write_part(output, part),
            MimeEntity::Multipart(multipart) => self.write_multipart(output, multipart),
        }
    }

    fn write_multipart(&self, output: &mut Vec<u8>, multipart: &Multipart) -> DeliveryResult<()> {
        let boundary = generate_boundary();
        self.write_header(
            output,
            "Content-Type",
            &format!("multipart/{}; boundary=\"{}\"", multipart.kind.subtype(), boundary),
        )?;
        output.extend_from_slice(b"\r\n");

        for part in &multipart.parts {
            output.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
            self.write_entity(output, part)?;
        }

        output.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
        Ok(())
    }

    fn write_text(&self, output: &mut Vec<u8>, text: &TextPart) -> DeliveryResult<()> {
        self.write_header(output, "Content-Type", &format!("text/{}; charset=\"utf-8\"", text.subtype))?;
        self.write_header(output, "Content-Transfer-Encoding", "quoted-printable")?;
        output.extend_from_slice(b"\r\n");
        output.extend_from_slice(&quoted_printable::encode(text.text.as_bytes()));
        if !output.ends_with(b"\r\n") {
            output.extend_from_slice(b"\r\n");
        }
        Ok(())
    }

    fn write_part(&self, output: &mut Vec<u8>, part: &MimePart) -> DeliveryResult<()> {
        self.write_header(
            output,
            "Content-Type",
            &format!(
                "{}; {}",
                part.content_type.essence_str(),
                filename_parameter("name", &part.filename)
            ),
        )?;
        self.write_header(output, "Content-Transfer-Encoding", "base64")?;
        if let Some(content_id) = &part.content_id {
            self.write_header(output, "Content-ID", &format!("<{}>", sanitize(content_id)))?;
        }
        self.write_header(
            output,
            "Content-Disposition",
            &format!("{}; {}", part.disposition, filename_parameter("filename", &part.filename)),
        )?;
        output.extend_from_slice(b"\r\n");

        let encoded = BASE64.encode(&part.payload);
        for chunk in encoded.as_bytes().chunks(BASE64_LINE) {
            output.extend_from_slice(chunk);
            output.extend_from_slice(b"\r\n");
        }

        Ok(())
    }

    /// Writes a header line.
    fn write_header(&self, output: &mut Vec<u8>, name: &str, value: &str) -> DeliveryResult<()> {
        if name.chars().any(|c| c.is_control() || c == ':') {
            return Err(DeliveryError::other(format!("Invalid header name: {}", name)));
        }

        let header = format!("{}: {}", name, value);
        output.extend_from_slice(fold_header(&header).as_bytes());
        output.extend_from_slice(b"\r\n");
        Ok(())
    }

    /// Prepares the DATA content with dot-stuffing.
    pub fn prepare_data_content(encoded_email: &[u8]) -> Vec<u8> {
        let mut output = Vec::with_capacity(encoded_email.len() + 100);
        let mut at_line_start = true;

        for &byte in encoded_email {
            if at_line_start && byte == b'.' {
                output.push(b'.');
            }

            output.push(byte);
            at_line_start = byte == b'\n';
        }

        if !output.ends_with(b"\r\n") {
            if output.ends_with(b"\n") {
                output.pop();
            }
            output.extend_from_slice(b"\r\n");
        }

        output.extend_from_slice(b".\r\n");
        output
    }
}

/// Encodes a header value using RFC 2047 when it is not plain ASCII.
pub fn encode_header(value: &str) -> String {
    if value.chars().all(|c| c.is_ascii() && !c.is_control()) {
        return value.to_string();
    }

    let mut words = Vec::new();
    let mut start = 0;
    let mut end = 0;
    for (index, c) in value.char_indices() {
        let next = index + c.len_utf8();
        if next - start > ENCODED_WORD_CHUNK {
            words.push(&value[start..end]);
            start = end;
        }
        end = next;
    }
    words.push(&value[start..end]);

    words
        .iter()
        .map(|word| format!("=?UTF-8?B?{}?=", BASE64.encode(word.as_bytes())))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Folds a header line at spaces so no line exceeds 78 characters where
/// possible.
fn fold_header(header: &str) -> String {
    if header.len() <= MAX_HEADER_LINE {
        return header.to_string();
    }

    let mut result = String::new();
    let mut current_line = String::new();

    for word in header.split(' ') {
        if current_line.is_empty() {
            current_line = word.to_string();
        } else if current_line.len() + 1 + word.len() <= MAX_HEADER_LINE - 2 {
            current_line.push(' ');
            current_line.push_str(word);
        } else {
            result.push_str(&current_line);
            result.push_str("\r\n ");
            current_line = word.to_string();
        }
    }

    result.push_str(&current_line);
    result
}

/// Formats a filename parameter. ASCII names are quoted; anything else uses
/// the RFC 2231 `name*=utf-8''...` form, which never contains spaces and so is
/// never split by folding.
fn filename_parameter(name: &str, value: &str) -> String {
    let value = sanitize(value);
    if value.is_ascii() {
        format!("{}=\"{}\"", name, value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        format!("{}*=utf-8''{}", name, utf8_percent_encode(&value, ATTR_CHAR_SET))
    }
}

/// Removes characters that would break a header line.
fn sanitize(value: &str) -> String {
    value.chars().filter(|c| !c.is_control()).collect()
}

fn generate_boundary() -> String {
    format!("----=_Part_{}", Uuid::new_v4().simple())
}

fn format_date(date: &DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S %z").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encoding() {
        assert_eq!(encode_header("Hello"), "Hello");

        let encoded = encode_header("Héllo");
        assert_eq!(encoded, format!("=?UTF-8?B?{}?=", BASE64.encode("Héllo")));

        let injected = encode_header("Subject\r\nBcc: victim@example.com");
        assert!(!injected.contains('\n'));
    }

    #[test]
    fn test_long_header_splits_into_words() {
        let subject = "Über-Alarm: ".repeat(10);
        let encoded = encode_header(&subject);
        let words: Vec<&str> = encoded.split(' ').collect();
        assert!(words.len() > 1);

        let mut decoded = Vec::new();
        for word in &words {
            assert!(word.len() <= 75);
            let inner = word.trim_start_matches("=?UTF-8?B?").trim_end_matches("?=");
            decoded.extend(BASE64.decode(inner).unwrap());
        }
        assert_eq!(String::from_utf8(decoded).unwrap(), subject);
    }

    #[test]
    fn test_fold_header() {
        let recipients: Vec<String> = (0..10).map(|i| format!("person{}@example.com", i)).collect();
        let folded = fold_header(&format!("To: {}", recipients.join(", ")));
        assert!(folded.contains("\r\n "));
        for line in folded.split("\r\n") {
            assert!(line.len() <= MAX_HEADER_LINE);
        }
        assert_eq!(folded.replace("\r\n ", " "), format!("To: {}", recipients.join(", ")));
    }

    #[test]
    fn test_filename_parameter() {
        assert_eq!(filename_parameter("filename", "report.pdf"), "filename=\"report.pdf\"");
        assert_eq!(filename_parameter("filename", "a\"b.pdf"), "filename=\"a\\\"b.pdf\"");
        assert_eq!(
            filename_parameter("filename", "résumé.pdf"),
            "filename*=utf-8''r%C3%A9sum%C3%A9.pdf"
        );
        assert_eq!(
            filename_parameter("name", "Über Alarm.csv"),
            "name*=utf-8''%C3%9Cber%20Alarm.csv"
        );
    }

    #[test]
    fn test_non_ascii_attachment_name_is_not_an_encoded_word() {
        let name = format!("{}.pdf", "Überwachungsbericht-".repeat(4));
        let part = MimePart::attachment(mime::APPLICATION_PDF, name.as_str(), b"%PDF".to_vec());
        let mut output = Vec::new();
        MimeEncoder::new().write_part(&mut output, &part).unwrap();
        let text = String::from_utf8(output).unwrap();

        assert!(!text.contains("=?UTF-8?"));
        let expected = format!(
            "filename*=utf-8''{}",
            utf8_percent_encode(&name, ATTR_CHAR_SET)
        );
        let unfolded = text.replace("\r\n ", " ");
        assert!(unfolded.contains(&format!("Content-Disposition: attachment; {}\r\n", expected)));
        assert!(text.contains(&expected));
    }

    #[test]
    fn test_boundary_generation() {
        assert_ne!(generate_boundary(), generate_boundary());
    }

    #[test]
    fn test_dot_stuffing() {
        let input = b"Hello\r\n.World\r\n..Test\r\n";
        let output = MimeEncoder::prepare_data_content(input);
        let output_str = String::from_utf8_lossy(&output);
        assert!(output_str.contains("\r\n..World"));
        assert!(output_str.contains("\r\n...Test"));
        assert!(output_str.ends_with("\r\n.\r\n"));
    }

    #[test]
    fn test_inline_part_cid() {
        let part = MimePart::inline(mime::IMAGE_PNG, "chart.png", vec![1, 2, 3]);
        assert_eq!(part.disposition, Disposition::Inline);
        assert_eq!(part.cid_reference().as_deref(), Some("cid:chart.png"));

        let part = MimePart::attachment(mime::APPLICATION_PDF, "report.pdf", vec![]);
        assert!(part.cid_reference().is_none());
    }

    #[test]
    fn test_write_part_headers() {
        let encoder = MimeEncoder::new();
        let mut output = Vec::new();
        let part = MimePart::inline(mime::IMAGE_PNG, "chart.png", vec![0u8; 100]);
        encoder.write_part(&mut output, &part).unwrap();

        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("Content-Type: image/png; name=\"chart.png\"\r\n"));
        assert!(text.contains("Content-Transfer-Encoding: base64\r\n"));
        assert!(text.contains("Content-ID: <chart.png>\r\n"));
        assert!(text.contains("Content-Disposition: inline; filename=\"chart.png\"\r\n"));
        for line in text.split("\r\n") {
            assert!(line.len() <= BASE64_LINE.max(MAX_HEADER_LINE));
        }
    }

    #[test]
    fn test_write_text_is_quoted_printable() {
        let encoder = MimeEncoder::new();
        let mut output = Vec::new();
        encoder.write_text(&mut output, &TextPart::html("<p>Café</p>")).unwrap();

        let text = String::from_utf8(output).unwrap();
        assert!(text.starts_with("Content-Type: text/html; charset=\"utf-8\"\r\n"));
        assert!(text.contains("Content-Transfer-Encoding: quoted-printable\r\n"));
        assert!(text.contains("Caf=C3=A9"));
        assert!(text.ends_with("\r\n"));
    }

    #[test]
    fn test_invalid_header_name() {
        let encoder = MimeEncoder::new();
        let mut output = Vec::new();
        assert!(encoder.write_header(&mut output, "Bad:Name", "x").is_err());
    }
}
