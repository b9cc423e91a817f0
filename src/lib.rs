//! # Alert Mail
//!
//! Email delivery for alert notifications:
//! - Recipient address validation for single fields and whole alert tables
//! - HTML bodies with inline images (`cid:` references) and appended files
//! - RFC 2045/2046 `multipart/mixed` > `multipart/related` composition
//! - SMTP delivery with optional STARTTLS and authentication
//! - Per-category failure reporting (connect, handshake, auth, protocol, other)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use alert_mail::{AlertMailer, AttachmentRef, SmtpConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SmtpConfig::builder()
//!         .host("smtp.example.com")
//!         .port(587)
//!         .use_tls(true)
//!         .credentials("alerts", "password")
//!         .build()?;
//!
//!     let mailer = AlertMailer::new(config);
//!     let receipt = mailer
//!         .send_email(
//!             "alerts@example.com",
//!             "ops@example.com; dba@example.com",
//!             "Disk usage above 90%",
//!             "<p>Current usage:</p><img src=\"cid:disk.png\">",
//!             None,
//!             Some("audit@example.com"),
//!             &[AttachmentRef::new("~/exports/disk.png")],
//!             &[AttachmentRef::new("~/exports/disk.csv").with_name("usage.csv")],
//!         )
//!         .await?;
//!
//!     println!("Message sent with ID: {}", receipt.message_id);
//!     Ok(())
//! }
//! ```
//!
//! ## Validating addresses
//!
//! ```rust
//! use alert_mail::{AddressValidator, AdminPattern};
//!
//! let pattern = AdminPattern::new(r".*@example\.com$").unwrap();
//! let bad = AddressValidator::validate_field("ops@example.com; x@elsewhere.org", false, Some(&pattern));
//! assert_eq!(bad.unwrap_err().address, "x@elsewhere.org");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod errors;
pub mod types;

// Address validation
pub mod validation;

// Message building
pub mod mime;
pub mod attachments;
pub mod compose;

// Protocol layer
pub mod protocol;

// Transport layer
pub mod transport;

// Authentication
pub mod auth;

// Observability
pub mod observability;

// Client
pub mod client;

// Mocks for testing
pub mod mocks;

// Re-exports for convenience
pub use attachments::{AttachmentMerger, AttachmentResolver, PassthroughMerger};
pub use auth::{AuthMethod, Credentials};
pub use client::{AlertMailer, Transmitter};
pub use compose::{ComposedMessage, Envelope, MessageComposer};
pub use config::{SmtpConfig, SmtpConfigBuilder, TlsConfig, TlsMode};
pub use errors::{DeliveryError, DeliveryErrorKind, DeliveryResult, EnhancedStatusCode};
pub use mime::{Disposition, MimeEncoder, MimeEntity, MimePart, Multipart, MultipartKind, TextPart};
pub use observability::{DeliveryMetrics, MetricsSnapshot};
pub use protocol::{EsmtpCapabilities, SmtpCommand, SmtpResponse};
pub use transport::{Connector, SmtpTransport, TcpConnector, TcpTransport};
pub use types::{AttachmentRef, EmailMessage, EmailMessageBuilder, SendReceipt, ValidationError};
pub use validation::{AddressProblem, AddressValidator, AdminPattern, FieldSource, InvalidAddress, TableFields};
