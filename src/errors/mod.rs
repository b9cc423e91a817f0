//! Error types for alert delivery.
//!
//! Every failure between "compose this message" and "the server accepted it"
//! is reported as a [`DeliveryError`] tagged with the session stage that
//! failed. Address validation problems are not errors in this sense; they are
//! returned as data from the `validation` module.

use std::fmt;
use thiserror::Error;

/// Result type for delivery operations.
pub type DeliveryResult<T> = Result<T, DeliveryError>;

/// Category of a delivery failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryErrorKind {
    /// The SMTP server could not be reached or refused the session.
    Connect,
    /// The server rejected the EHLO/HELO greeting or the STARTTLS upgrade.
    Handshake,
    /// Authentication was rejected or could not be negotiated.
    Auth,
    /// A command in the mail transaction was refused (sender, recipient, data).
    Protocol,
    /// Anything else: unreadable attachments, bad configuration, timeouts.
    Other,
}

impl DeliveryErrorKind {
    /// Returns the log prefix used when a failure of this kind is reported.
    pub fn log_context(&self) -> &'static str {
        match self {
            DeliveryErrorKind::Connect => {
                "Email failed to send; there was an issue connecting to the SMTP server"
            }
            DeliveryErrorKind::Handshake => {
                "Email failed to send; the SMTP server refused our HELO message"
            }
            DeliveryErrorKind::Auth => {
                "Email failed to send; there was an issue authenticating to SMTP server"
            }
            DeliveryErrorKind::Protocol => {
                "Email failed to send; there was an issue sending mail via SMTP server"
            }
            DeliveryErrorKind::Other => "Email failed to send",
        }
    }
}

impl fmt::Display for DeliveryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryErrorKind::Connect => write!(f, "Connection failed"),
            DeliveryErrorKind::Handshake => write!(f, "Handshake rejected"),
            DeliveryErrorKind::Auth => write!(f, "Authentication failed"),
            DeliveryErrorKind::Protocol => write!(f, "SMTP protocol error"),
            DeliveryErrorKind::Other => write!(f, "Delivery failed"),
        }
    }
}

/// Enhanced SMTP status code (RFC 2034).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhancedStatusCode {
    /// Class (2=success, 4=temporary, 5=permanent).
    pub class: u8,
    /// Subject (e.g., 1=addressing, 2=mailbox, 3=mail system).
    pub subject: u16,
    /// Detail code.
    pub detail: u16,
}

impl EnhancedStatusCode {
    /// Parses an enhanced status code from a string (e.g., "5.1.1").
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split('.');
        let class = parts.next()?.parse().ok()?;
        let subject = parts.next()?.parse().ok()?;
        let detail = parts.next()?.parse().ok()?;
        if parts.next().is_some() || !(2..=5).contains(&class) {
            return None;
        }
        Some(Self { class, subject, detail })
    }
}

impl fmt::Display for EnhancedStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.class, self.subject, self.detail)
    }
}

/// A failed delivery attempt.
#[derive(Error, Debug)]
pub struct DeliveryError {
    kind: DeliveryErrorKind,
    message: String,
    smtp_code: Option<u16>,
    enhanced_code: Option<EnhancedStatusCode>,
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl DeliveryError {
    /// Creates a new delivery error.
    pub fn new(kind: DeliveryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            smtp_code: None,
            enhanced_code: None,
            cause: None,
        }
    }

    /// Sets the SMTP status code.
    pub fn with_smtp_code(mut self, code: u16) -> Self {
        self.smtp_code = Some(code);
        self
    }

    /// Sets the enhanced status code.
    pub fn with_enhanced_code(mut self, code: EnhancedStatusCode) -> Self {
        self.enhanced_code = Some(code);
        self
    }

    /// Sets the underlying cause.
    pub fn with_cause<E: std::error::Error + Send + Sync + 'static>(mut self, cause: E) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Returns the error kind.
    pub fn kind(&self) -> DeliveryErrorKind {
        self.kind
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the SMTP status code if the server supplied one.
    pub fn smtp_code(&self) -> Option<u16> {
        self.smtp_code
    }

    /// Returns the enhanced status code if the server supplied one.
    pub fn enhanced_code(&self) -> Option<&EnhancedStatusCode> {
        self.enhanced_code.as_ref()
    }

    /// Creates a connection error.
    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(DeliveryErrorKind::Connect, message)
    }

    /// Creates a greeting/STARTTLS error.
    pub fn handshake(message: impl Into<String>) -> Self {
        Self::new(DeliveryErrorKind::Handshake, message)
    }

    /// Creates an authentication error.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(DeliveryErrorKind::Auth, message)
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(DeliveryErrorKind::Protocol, message)
    }

    /// Creates an uncategorised error.
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(DeliveryErrorKind::Other, message)
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::other(format!("Invalid configuration: {}", message.into()))
    }

    /// Creates an error from a negative SMTP reply received at a given stage.
    pub fn from_smtp_response(kind: DeliveryErrorKind, code: u16, message: impl Into<String>) -> Self {
        Self::new(kind, message).with_smtp_code(code)
    }
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(code) = self.smtp_code {
            write!(f, " (SMTP {})", code)?;
        }
        if let Some(enhanced) = &self.enhanced_code {
            write!(f, " [{}]", enhanced)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_enhanced_status_code_parse() {
        let code = EnhancedStatusCode::parse("5.1.1").unwrap();
        assert_eq!(code.class, 5);
        assert_eq!(code.subject, 1);
        assert_eq!(code.detail, 1);

        assert!(EnhancedStatusCode::parse("5.1").is_none());
        assert!(EnhancedStatusCode::parse("5.1.1.1").is_none());
        assert!(EnhancedStatusCode::parse("9.1.1").is_none());
        assert!(EnhancedStatusCode::parse("mx.example.com").is_none());
    }

    #[test]
    fn test_display_includes_codes() {
        let err = DeliveryError::from_smtp_response(DeliveryErrorKind::Auth, 535, "bad credentials")
            .with_enhanced_code(EnhancedStatusCode::parse("5.7.8").unwrap());
        assert_eq!(
            err.to_string(),
            "Authentication failed: bad credentials (SMTP 535) [5.7.8]"
        );
        assert_eq!(err.kind(), DeliveryErrorKind::Auth);
        assert_eq!(err.smtp_code(), Some(535));
    }

    #[test]
    fn test_cause_is_exposed_as_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = DeliveryError::connect("cannot reach relay").with_cause(io);
        assert!(err.source().is_some());
        assert_eq!(err.kind(), DeliveryErrorKind::Connect);
    }

    #[test]
    fn test_configuration_is_other() {
        let err = DeliveryError::configuration("Host is required");
        assert_eq!(err.kind(), DeliveryErrorKind::Other);
        assert!(err.message().contains("Host is required"));
    }
}
