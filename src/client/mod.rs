//! Sending alert emails.
//!
//! [`Transmitter`] runs one SMTP session per message:
//! greeting, EHLO (HELO fallback), optional STARTTLS, optional AUTH,
//! MAIL/RCPT/DATA, QUIT.
//!
//! [`AlertMailer`] is the entry point used by the alerting pipeline. It
//! composes the message from files on disk and hands it to the transmitter.

use std::sync::Arc;
use tracing::{debug, error, info};

use crate::attachments::{AttachmentMerger, AttachmentResolver, PassthroughMerger};
use crate::auth::{Authenticator, Credentials};
use crate::compose::{ComposedMessage, Envelope, MessageComposer};
use crate::config::SmtpConfig;
use crate::errors::{DeliveryError, DeliveryErrorKind, DeliveryResult};
use crate::mime::MimeEncoder;
use crate::observability::{DeliveryMetrics, Timer};
use crate::protocol::{codes, EsmtpCapabilities, SmtpCommand, SmtpResponse};
use crate::transport::{Connector, SmtpTransport, TcpConnector};
use crate::types::{AttachmentRef, EmailMessage, SendReceipt};

/// Delivers composed messages over SMTP.
pub struct Transmitter {
    config: Arc<SmtpConfig>,
    connector: Arc<dyn Connector>,
    metrics: Arc<DeliveryMetrics>,
    encoder: MimeEncoder,
}

impl std::fmt::Debug for Transmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transmitter")
            .field("server", &self.config.address())
            .field("connector", &self.connector)
            .finish_non_exhaustive()
    }
}

impl Transmitter {
    /// Creates a transmitter that connects over TCP.
    pub fn new(config: SmtpConfig) -> Self {
        Self::with_connector(config, Arc::new(TcpConnector))
    }

    /// Creates a transmitter with a custom connector.
    pub fn with_connector(config: SmtpConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config: Arc::new(config),
            connector,
            metrics: Arc::new(DeliveryMetrics::new()),
            encoder: MimeEncoder::new(),
        }
    }

    /// Shares a metrics collector with other components.
    pub fn with_metrics(mut self, metrics: Arc<DeliveryMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SmtpConfig {
        &self.config
    }

    /// Returns the metrics collector.
    pub fn metrics(&self) -> &Arc<DeliveryMetrics> {
        &self.metrics
    }

    /// Serializes and sends a message to its whole envelope.
    ///
    /// Every failure is logged with the stage that failed and returned; there
    /// are no retries. Any refused recipient fails the send before the
    /// message data is transmitted.
    pub async fn send(&self, message: &ComposedMessage) -> DeliveryResult<SendReceipt> {
        let timer = Timer::start("smtp_send");

        let result = match self.encoder.encode(message) {
            Ok(encoded) => {
                let data = MimeEncoder::prepare_data_content(&encoded);
                self.deliver(&data, &message.envelope).await
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(response) => {
                self.metrics.record_send_success(message.envelope.recipients.len());
                info!(
                    message_id = %message.message_id,
                    recipients = message.envelope.recipients.len(),
                    response = %response,
                    "Email sent"
                );
                Ok(SendReceipt {
                    message_id: message.message_id.clone(),
                    recipients: message.envelope.recipients.clone(),
                    response: response.full_message(),
                    duration: timer.stop(),
                })
            }
            Err(err) => {
                self.report_failure(&err);
                Err(err)
            }
        }
    }

    fn report_failure(&self, err: &DeliveryError) {
        self.metrics.record_send_failure(err.kind());
        error!(
            server = %self.config.address(),
            kind = ?err.kind(),
            smtp_code = ?err.smtp_code(),
            error = %err,
            "{}",
            err.kind().log_context()
        );
    }

    /// Opens a session, sends prepared DATA content and closes the session.
    /// `data` must already be dot-stuffed and terminated.
    pub async fn deliver(&self, data: &[u8], envelope: &Envelope) -> DeliveryResult<SmtpResponse> {
        if envelope.recipients.is_empty() {
            return Err(DeliveryError::other("No envelope recipients"));
        }

        let mut transport = self.connector.connect(&self.config).await?;
        let result = self.run_session(transport.as_mut(), data, envelope).await;

        // Best effort; the outcome is already decided.
        let _ = transport.send_command(&SmtpCommand::Quit).await;
        let _ = transport.close().await;

        result
    }

    async fn run_session(
        &self,
        transport: &mut dyn SmtpTransport,
        data: &[u8],
        envelope: &Envelope,
    ) -> DeliveryResult<SmtpResponse> {
        let greeting = transport
            .read_response()
            .await
            .map_err(|e| DeliveryError::connect("No greeting from SMTP server").with_cause(e))?;
        if greeting.code != codes::SERVICE_READY {
            return Err(greeting.to_error(DeliveryErrorKind::Connect));
        }

        let mut capabilities = self.hello(transport).await?;

        if self.config.tls.enabled() {
            self.start_tls(transport, &capabilities).await?;
            capabilities = self.hello(transport).await?;
        }

        if let Some(credentials) = Credentials::from_config(&self.config) {
            let method = Authenticator::authenticate(transport, &credentials, &capabilities).await?;
            debug!(mechanism = %method, "Authenticated");
        }

        self.transaction(transport, data, envelope, &capabilities).await
    }

    /// EHLO, falling back to HELO. HELO servers advertise nothing.
    async fn hello(&self, transport: &mut dyn SmtpTransport) -> DeliveryResult<EsmtpCapabilities> {
        let client_id = self.config.client_id().to_string();

        let response = transport.send_command(&SmtpCommand::Ehlo(client_id.clone())).await?;
        if response.is_success() {
            let capabilities = EsmtpCapabilities::from_ehlo_response(&response);
            debug!(extensions = ?capabilities.raw, "EHLO accepted");
            return Ok(capabilities);
        }

        debug!(code = response.code, "EHLO refused, trying HELO");
        transport
            .send_command(&SmtpCommand::Helo(client_id))
            .await?
            .expect_success(DeliveryErrorKind::Handshake)?;
        Ok(EsmtpCapabilities::default())
    }

    async fn start_tls(
        &self,
        transport: &mut dyn SmtpTransport,
        capabilities: &EsmtpCapabilities,
    ) -> DeliveryResult<()> {
        if !capabilities.starttls {
            return Err(DeliveryError::handshake("STARTTLS extension not supported by server"));
        }

        transport
            .send_command(&SmtpCommand::StartTls)
            .await?
            .expect_code(codes::SERVICE_READY, DeliveryErrorKind::Handshake)?;
        transport.upgrade_tls(&self.config.tls, &self.config.host).await?;
        self.metrics.record_tls_upgrade();
        Ok(())
    }

    async fn transaction(
        &self,
        transport: &mut dyn SmtpTransport,
        data: &[u8],
        envelope: &Envelope,
        capabilities: &EsmtpCapabilities,
    ) -> DeliveryResult<SmtpResponse> {
        let needs_utf8 = !envelope.from.is_ascii() || envelope.recipients.iter().any(|r| !r.is_ascii());

        transport
            .send_command(&SmtpCommand::MailFrom {
                address: envelope.from.clone(),
                size: capabilities.size.map(|_| data.len()),
                smtputf8: needs_utf8 && capabilities.smtputf8,
            })
            .await?
            .expect_success(DeliveryErrorKind::Protocol)?;

        for recipient in &envelope.recipients {
            let response = transport
                .send_command(&SmtpCommand::RcptTo { address: recipient.clone() })
                .await?;
            if !response.is_success() {
                let mut err = DeliveryError::from_smtp_response(
                    DeliveryErrorKind::Protocol,
                    response.code,
                    format!("Recipient {} refused: {}", recipient, response.full_message()),
                );
                if let Some(enhanced) = response.enhanced_code {
                    err = err.with_enhanced_code(enhanced);
                }
                return Err(err);
            }
        }

        transport
            .send_command(&SmtpCommand::Data)
            .await?
            .expect_code(codes::START_MAIL_INPUT, DeliveryErrorKind::Protocol)?;

        transport.send_data(data).await?;

        transport
            .read_response()
            .await?
            .expect_success(DeliveryErrorKind::Protocol)
    }
}

/// Composes and sends alert emails.
pub struct AlertMailer {
    composer: MessageComposer,
    transmitter: Transmitter,
}

impl std::fmt::Debug for AlertMailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertMailer")
            .field("composer", &self.composer)
            .field("transmitter", &self.transmitter)
            .finish()
    }
}

impl AlertMailer {
    /// Creates a mailer that connects over TCP.
    pub fn new(config: SmtpConfig) -> Self {
        Self::from_transmitter(Transmitter::new(config))
    }

    /// Creates a mailer around an existing transmitter.
    pub fn from_transmitter(transmitter: Transmitter) -> Self {
        Self {
            composer: MessageComposer::default(),
            transmitter,
        }
    }

    /// Creates a mailer with a custom connector.
    pub fn with_connector(config: SmtpConfig, connector: Arc<dyn Connector>) -> Self {
        Self::from_transmitter(Transmitter::with_connector(config, connector))
    }

    /// Replaces the attachment merger.
    pub fn with_merger(mut self, merger: Arc<dyn AttachmentMerger>) -> Self {
        self.composer = MessageComposer::new(AttachmentResolver::new(), merger);
        self
    }

    /// Replaces the attachment resolver.
    pub fn with_resolver(mut self, resolver: AttachmentResolver) -> Self {
        self.composer = MessageComposer::new(resolver, Arc::new(PassthroughMerger));
        self
    }

    /// Replaces the composer.
    pub fn with_composer(mut self, composer: MessageComposer) -> Self {
        self.composer = composer;
        self
    }

    /// Returns the transmitter.
    pub fn transmitter(&self) -> &Transmitter {
        &self.transmitter
    }

    /// Returns the delivery metrics.
    pub fn metrics(&self) -> &Arc<DeliveryMetrics> {
        self.transmitter.metrics()
    }

    /// Sends one alert email.
    ///
    /// Address fields are `;`, `,` or space delimited. `cc` and `bcc` are
    /// skipped when absent or blank. BCC recipients receive the message but
    /// never appear in its headers.
    #[allow(clippy::too_many_arguments)]
    pub async fn send_email(
        &self,
        from: &str,
        to: &str,
        subject: &str,
        html: &str,
        cc: Option<&str>,
        bcc: Option<&str>,
        inline_attachments: &[AttachmentRef],
        appended_attachments: &[AttachmentRef],
    ) -> DeliveryResult<SendReceipt> {
        let message = EmailMessage {
            from: from.to_string(),
            to: to.to_string(),
            cc: cc.map(str::to_string),
            bcc: bcc.map(str::to_string),
            subject: subject.to_string(),
            html_body: html.to_string(),
            inline_attachments: inline_attachments.to_vec(),
            appended_attachments: appended_attachments.to_vec(),
        };
        self.send(&message).await
    }

    /// Sends one alert email. The receipt's duration covers reading the
    /// attachments as well as the SMTP session.
    pub async fn send(&self, message: &EmailMessage) -> DeliveryResult<SendReceipt> {
        let timer = Timer::start("alert_send");
        info!(
            server = %self.transmitter.config().address(),
            from = %message.from,
            to = %message.to,
            cc = ?message.cc,
            bcc = ?message.bcc,
            subject = %message.subject,
            inline = ?message.inline_attachments,
            appended = ?message.appended_attachments,
            "Sending email"
        );
        debug!(body = %message.html_body, "Email body contents");

        let composed = match self.composer.compose(message).await {
            Ok(composed) => composed,
            Err(err) => {
                self.transmitter.report_failure(&err);
                return Err(err);
            }
        };

        let mut receipt = self.transmitter.send(&composed).await?;
        receipt.duration = timer.stop();
        Ok(receipt)
    }
}
