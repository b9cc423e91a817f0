//! SMTP protocol primitives.
//!
//! The subset of RFC 5321 an alert sender needs: the session commands,
//! reply parsing (with RFC 2034 enhanced codes) and EHLO capabilities.

use std::collections::HashSet;
use std::fmt;

use crate::auth::AuthMethod;
use crate::errors::{DeliveryError, DeliveryErrorKind, DeliveryResult, EnhancedStatusCode};

/// SMTP commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    /// Extended HELLO with client identity.
    Ehlo(String),
    /// Basic HELLO.
    Helo(String),
    /// Start TLS negotiation.
    StartTls,
    /// Authenticate.
    Auth {
        /// Authentication mechanism.
        mechanism: String,
        /// Initial response (optional).
        initial_response: Option<String>,
    },
    /// Continuation line of an AUTH exchange.
    AuthResponse(String),
    /// MAIL FROM command.
    MailFrom {
        /// Sender address.
        address: String,
        /// SIZE parameter (optional).
        size: Option<usize>,
        /// SMTPUTF8 parameter.
        smtputf8: bool,
    },
    /// RCPT TO command.
    RcptTo {
        /// Recipient address.
        address: String,
    },
    /// DATA command.
    Data,
    /// Quit connection.
    Quit,
}

impl SmtpCommand {
    /// Formats the command for sending.
    pub fn to_smtp_string(&self) -> String {
        match self {
            SmtpCommand::Ehlo(domain) => format!("EHLO {}", domain),
            SmtpCommand::Helo(domain) => format!("HELO {}", domain),
            SmtpCommand::StartTls => "STARTTLS".to_string(),
            SmtpCommand::Auth {
                mechanism,
                initial_response,
            } => {
                if let Some(response) = initial_response {
                    format!("AUTH {} {}", mechanism, response)
                } else {
                    format!("AUTH {}", mechanism)
                }
            }
            SmtpCommand::AuthResponse(response) => response.clone(),
            SmtpCommand::MailFrom {
                address,
                size,
                smtputf8,
            } => {
                let mut cmd = format!("MAIL FROM:<{}>", address);
                if let Some(s) = size {
                    cmd.push_str(&format!(" SIZE={}", s));
                }
                if *smtputf8 {
                    cmd.push_str(" SMTPUTF8");
                }
                cmd
            }
            SmtpCommand::RcptTo { address } => format!("RCPT TO:<{}>", address),
            SmtpCommand::Data => "DATA".to_string(),
            SmtpCommand::Quit => "QUIT".to_string(),
        }
    }

    /// Returns true if the command line carries credential material.
    pub fn is_sensitive(&self) -> bool {
        matches!(
            self,
            SmtpCommand::Auth { initial_response: Some(_), .. } | SmtpCommand::AuthResponse(_)
        )
    }
}

impl fmt::Display for SmtpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SmtpCommand::Auth { mechanism, .. } if self.is_sensitive() => {
                write!(f, "AUTH {} [redacted]", mechanism)
            }
            _ if self.is_sensitive() => write!(f, "[redacted]"),
            _ => write!(f, "{}", self.to_smtp_string()),
        }
    }
}

/// SMTP response from server.
#[derive(Debug, Clone)]
pub struct SmtpResponse {
    /// Status code (e.g., 250, 354, 550).
    pub code: u16,
    /// Enhanced status code (optional).
    pub enhanced_code: Option<EnhancedStatusCode>,
    /// Response message lines.
    pub message: Vec<String>,
}

impl SmtpResponse {
    /// Creates a new single-line response.
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            enhanced_code: None,
            message: vec![message.into()],
        }
    }

    /// Parses a response from raw lines.
    pub fn parse(lines: &[String]) -> DeliveryResult<Self> {
        if lines.is_empty() {
            return Err(DeliveryError::protocol("Empty response"));
        }

        let mut messages = Vec::new();
        let mut code = 0u16;
        let mut enhanced_code = None;

        for (i, line) in lines.iter().enumerate() {
            let parsed_code: u16 = line
                .get(..3)
                .and_then(|digits| digits.parse().ok())
                .ok_or_else(|| DeliveryError::protocol(format!("Invalid status line: {}", line)))?;

            if i == 0 {
                code = parsed_code;
            } else if parsed_code != code {
                return Err(DeliveryError::protocol("Inconsistent status codes in multiline response"));
            }

            let message = match line.get(4..) {
                Some(msg) if i == 0 => match Self::parse_enhanced_code(msg) {
                    Some((esc, rest)) => {
                        enhanced_code = Some(esc);
                        rest.trim().to_string()
                    }
                    None => msg.to_string(),
                },
                Some(msg) => msg.to_string(),
                None => String::new(),
            };

            messages.push(message);
        }

        Ok(Self {
            code,
            enhanced_code,
            message: messages,
        })
    }

    /// Parses enhanced status code from message start.
    fn parse_enhanced_code(msg: &str) -> Option<(EnhancedStatusCode, &str)> {
        let (first, rest) = msg.split_once(' ').unwrap_or((msg, ""));
        let code = EnhancedStatusCode::parse(first)?;
        Some((code, rest))
    }

    /// Returns true if this is a success response (2xx).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Returns the first message line.
    pub fn first_message(&self) -> &str {
        self.message.first().map(|s| s.as_str()).unwrap_or("")
    }

    /// Returns all message lines joined.
    pub fn full_message(&self) -> String {
        self.message.join("\n")
    }

    /// Converts to an error of the given kind.
    pub fn to_error(&self, kind: DeliveryErrorKind) -> DeliveryError {
        let mut err = DeliveryError::from_smtp_response(kind, self.code, self.full_message());
        if let Some(enhanced) = &self.enhanced_code {
            err = err.with_enhanced_code(enhanced.clone());
        }
        err
    }

    /// Returns the response if its code is `expected`, else an error of `kind`.
    pub fn expect_code(self, expected: u16, kind: DeliveryErrorKind) -> DeliveryResult<Self> {
        if self.code == expected {
            Ok(self)
        } else {
            Err(self.to_error(kind))
        }
    }

    /// Returns the response if it is 2xx, else an error of `kind`.
    pub fn expect_success(self, kind: DeliveryErrorKind) -> DeliveryResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(self.to_error(kind))
        }
    }
}

impl fmt::Display for SmtpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.first_message())
    }
}

/// ESMTP server capabilities.
#[derive(Debug, Clone, Default)]
pub struct EsmtpCapabilities {
    /// Maximum message size.
    pub size: Option<usize>,
    /// Supported authentication mechanisms.
    pub auth_mechanisms: HashSet<AuthMethod>,
    /// STARTTLS supported.
    pub starttls: bool,
    /// SMTPUTF8 supported.
    pub smtputf8: bool,
    /// Raw capability strings.
    pub raw: Vec<String>,
}

impl EsmtpCapabilities {
    /// Parses capabilities from EHLO response. The first line is the server's
    /// greeting and is not a capability.
    pub fn from_ehlo_response(response: &SmtpResponse) -> Self {
        let mut caps = Self::default();

        for line in response.message.iter().skip(1) {
            let line = line.trim().to_uppercase();
            caps.raw.push(line.clone());

            let (capability, params) = line.split_once(' ').unwrap_or((line.as_str(), ""));

            match capability {
                "SIZE" => {
                    caps.size = params.parse().ok().filter(|&size| size > 0);
                }
                "AUTH" => {
                    for mech in params.split_whitespace() {
                        if let Some(method) = AuthMethod::from_capability(mech) {
                            caps.auth_mechanisms.insert(method);
                        }
                    }
                }
                "STARTTLS" => {
                    caps.starttls = true;
                }
                "SMTPUTF8" => {
                    caps.smtputf8 = true;
                }
                _ => {}
            }
        }

        caps
    }

    /// Returns the strongest advertised mechanism we support.
    pub fn best_auth_method(&self) -> Option<AuthMethod> {
        self.auth_mechanisms
            .iter()
            .copied()
            .max_by_key(|method| method.priority())
    }
}

/// Response codes for common SMTP operations.
pub mod codes {
    /// Service ready.
    pub const SERVICE_READY: u16 = 220;
    /// Service closing.
    pub const SERVICE_CLOSING: u16 = 221;
    /// Authentication successful.
    pub const AUTH_SUCCESS: u16 = 235;
    /// OK.
    pub const OK: u16 = 250;
    /// Continue (AUTH).
    pub const AUTH_CONTINUE: u16 = 334;
    /// Start mail input.
    pub const START_MAIL_INPUT: u16 = 354;
}
