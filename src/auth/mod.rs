//! SMTP authentication.
//!
//! Supports the mechanisms a relay typically offers for a service account:
//! - CRAM-MD5 (RFC 2195)
//! - PLAIN (RFC 4616)
//! - LOGIN (obsolete but widely used)
//!
//! The strongest mechanism the server advertises is used.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use md5::Md5;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::config::SmtpConfig;
use crate::errors::{DeliveryError, DeliveryErrorKind, DeliveryResult};
use crate::protocol::{codes, EsmtpCapabilities, SmtpCommand, SmtpResponse};
use crate::transport::SmtpTransport;

/// Authentication methods supported by the SMTP client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// PLAIN authentication (RFC 4616).
    Plain,
    /// LOGIN authentication (obsolete).
    Login,
    /// CRAM-MD5 challenge-response.
    CramMd5,
}

impl AuthMethod {
    /// Returns the SMTP AUTH mechanism name.
    pub fn mechanism_name(&self) -> &'static str {
        match self {
            AuthMethod::Plain => "PLAIN",
            AuthMethod::Login => "LOGIN",
            AuthMethod::CramMd5 => "CRAM-MD5",
        }
    }

    /// Returns the priority for auto-selection (higher is better).
    pub fn priority(&self) -> u8 {
        match self {
            AuthMethod::CramMd5 => 3,
            AuthMethod::Plain => 2,
            AuthMethod::Login => 1,
        }
    }

    /// Parses from SMTP capability string.
    pub fn from_capability(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PLAIN" => Some(AuthMethod::Plain),
            "LOGIN" => Some(AuthMethod::Login),
            "CRAM-MD5" => Some(AuthMethod::CramMd5),
            _ => None,
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mechanism_name())
    }
}

/// Username and password for the relay.
#[derive(Clone)]
pub struct Credentials {
    /// Username.
    pub username: String,
    /// Password (protected).
    pub password: SecretString,
}

impl Credentials {
    /// Creates credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::new(password.into()),
        }
    }

    /// Reads credentials from the configuration, if authentication is on.
    /// A username without a password authenticates with an empty password.
    pub fn from_config(config: &SmtpConfig) -> Option<Self> {
        if !config.has_auth() {
            return None;
        }
        let username = config.username.clone()?;
        let password = config
            .password
            .clone()
            .unwrap_or_else(|| SecretString::new(String::new()));
        Some(Self { username, password })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Runs AUTH exchanges.
pub struct Authenticator;

impl Authenticator {
    /// Generates the initial response for PLAIN authentication.
    pub fn plain_initial_response(username: &str, password: &SecretString) -> String {
        // \0username\0password
        let response = format!("\0{}\0{}", username, password.expose_secret());
        BASE64.encode(response)
    }

    /// Generates LOGIN username response.
    pub fn login_username(username: &str) -> String {
        BASE64.encode(username)
    }

    /// Generates LOGIN password response.
    pub fn login_password(password: &SecretString) -> String {
        BASE64.encode(password.expose_secret())
    }

    /// Generates CRAM-MD5 response.
    pub fn cram_md5_response(
        challenge: &str,
        username: &str,
        password: &SecretString,
    ) -> DeliveryResult<String> {
        let challenge_bytes = BASE64
            .decode(challenge.trim())
            .map_err(|e| DeliveryError::auth(format!("Invalid CRAM-MD5 challenge: {}", e)))?;

        type HmacMd5 = Hmac<Md5>;
        let mut mac = HmacMd5::new_from_slice(password.expose_secret().as_bytes())
            .map_err(|e| DeliveryError::auth(format!("HMAC error: {}", e)))?;
        mac.update(&challenge_bytes);
        let digest = mac.finalize().into_bytes();

        // username SP hex-digest
        let hex_digest: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        let response = format!("{} {}", username, hex_digest);
        Ok(BASE64.encode(response))
    }

    /// Picks the strongest advertised mechanism.
    pub fn select_method(capabilities: &EsmtpCapabilities) -> DeliveryResult<AuthMethod> {
        capabilities.best_auth_method().ok_or_else(|| {
            DeliveryError::auth("SMTP AUTH extension not supported by server")
        })
    }

    /// Authenticates over an established session.
    pub async fn authenticate<T>(
        transport: &mut T,
        credentials: &Credentials,
        capabilities: &EsmtpCapabilities,
    ) -> DeliveryResult<AuthMethod>
    where
        T: SmtpTransport + ?Sized,
    {
        let method = Self::select_method(capabilities)?;
        debug!(mechanism = %method, username = %credentials.username, "Authenticating");

        let response = match method {
            AuthMethod::Plain => {
                let initial = Self::plain_initial_response(&credentials.username, &credentials.password);
                transport
                    .send_command(&SmtpCommand::Auth {
                        mechanism: method.mechanism_name().to_string(),
                        initial_response: Some(initial),
                    })
                    .await?
            }
            AuthMethod::Login => {
                let challenge = transport
                    .send_command(&SmtpCommand::Auth {
                        mechanism: method.mechanism_name().to_string(),
                        initial_response: None,
                    })
                    .await?;
                Self::expect_challenge(challenge)?;

                let challenge = transport
                    .send_command(&SmtpCommand::AuthResponse(Self::login_username(&credentials.username)))
                    .await?;
                Self::expect_challenge(challenge)?;

                transport
                    .send_command(&SmtpCommand::AuthResponse(Self::login_password(&credentials.password)))
                    .await?
            }
            AuthMethod::CramMd5 => {
                let challenge = transport
                    .send_command(&SmtpCommand::Auth {
                        mechanism: method.mechanism_name().to_string(),
                        initial_response: None,
                    })
                    .await?;
                let challenge = Self::expect_challenge(challenge)?;

                let answer = Self::cram_md5_response(
                    challenge.first_message(),
                    &credentials.username,
                    &credentials.password,
                )?;
                transport.send_command(&SmtpCommand::AuthResponse(answer)).await?
            }
        };

        response.expect_code(codes::AUTH_SUCCESS, DeliveryErrorKind::Auth)?;
        Ok(method)
    }

    fn expect_challenge(response: SmtpResponse) -> DeliveryResult<SmtpResponse> {
        response.expect_code(codes::AUTH_CONTINUE, DeliveryErrorKind::Auth)
    }
}
