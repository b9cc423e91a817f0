//! Mock implementations for testing.
//!
//! [`MockTransport`] plays back scripted server replies and records what the
//! client sent. Clones share state, so a test can keep a handle while the
//! mailer owns the boxed transport handed out by [`MockConnector`].

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::{SmtpConfig, TlsConfig};
use crate::errors::{DeliveryError, DeliveryResult};
use crate::protocol::{codes, SmtpCommand, SmtpResponse};
use crate::transport::{Connector, SmtpTransport};

#[derive(Debug, Default)]
struct MockState {
    commands: Vec<SmtpCommand>,
    responses: VecDeque<DeliveryResult<SmtpResponse>>,
    data_received: Vec<Vec<u8>>,
    fail_next: Option<DeliveryError>,
    fail_tls: Option<DeliveryError>,
    tls_enabled: bool,
    closed: bool,
}

/// Mock SMTP transport for testing.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Creates a new mock transport. Unscripted commands get `250 OK`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response.
    pub fn queue_response(&self, response: SmtpResponse) -> &Self {
        self.state.lock().unwrap().responses.push_back(Ok(response));
        self
    }

    /// Queues an OK response.
    pub fn queue_ok(&self) -> &Self {
        self.queue_response(SmtpResponse::new(codes::OK, "OK"))
    }

    /// Queues an error response.
    pub fn queue_error(&self, code: u16, message: &str) -> &Self {
        self.queue_response(SmtpResponse::new(code, message))
    }

    /// Queues a transport failure in place of a reply.
    pub fn queue_failure(&self, error: DeliveryError) -> &Self {
        self.state.lock().unwrap().responses.push_back(Err(error));
        self
    }

    /// Sets the next call to fail.
    pub fn fail_next_with(&self, error: DeliveryError) -> &Self {
        self.state.lock().unwrap().fail_next = Some(error);
        self
    }

    /// Sets the TLS upgrade to fail.
    pub fn fail_tls_with(&self, error: DeliveryError) -> &Self {
        self.state.lock().unwrap().fail_tls = Some(error);
        self
    }

    /// Queues the replies for a complete plain session: greeting, EHLO, MAIL,
    /// one RCPT per recipient, DATA, end of data and QUIT.
    pub fn queue_session(&self, recipients: usize) -> &Self {
        self.queue_response(greeting_response());
        self.queue_response(ehlo_response());
        self.queue_ok();
        for _ in 0..recipients {
            self.queue_ok();
        }
        self.queue_response(data_ready_response());
        self.queue_response(SmtpResponse::new(codes::OK, "2.0.0 Ok: queued as 4F2A1"));
        self.queue_response(SmtpResponse::new(codes::SERVICE_CLOSING, "Bye"));
        self
    }

    /// Returns recorded commands.
    pub fn recorded_commands(&self) -> Vec<SmtpCommand> {
        self.state.lock().unwrap().commands.clone()
    }

    /// Returns recorded commands as wire lines.
    pub fn sent_commands(&self) -> Vec<String> {
        self.recorded_commands()
            .iter()
            .map(SmtpCommand::to_smtp_string)
            .collect()
    }

    /// Returns received data.
    pub fn received_data(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().data_received.clone()
    }

    /// Returns true once the client has closed the connection.
    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    fn next_response(&self) -> DeliveryResult<SmtpResponse> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.fail_next.take() {
            return Err(error);
        }
        state
            .responses
            .pop_front()
            .unwrap_or_else(|| Ok(SmtpResponse::new(codes::OK, "OK")))
    }
}

#[async_trait]
impl SmtpTransport for MockTransport {
    async fn send_command(&mut self, command: &SmtpCommand) -> DeliveryResult<SmtpResponse> {
        self.state.lock().unwrap().commands.push(command.clone());
        self.next_response()
    }

    async fn send_data(&mut self, data: &[u8]) -> DeliveryResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.fail_next.take() {
            return Err(error);
        }
        state.data_received.push(data.to_vec());
        Ok(())
    }

    async fn read_response(&mut self) -> DeliveryResult<SmtpResponse> {
        self.next_response()
    }

    async fn upgrade_tls(&mut self, _config: &TlsConfig, _host: &str) -> DeliveryResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.fail_tls.take() {
            return Err(error);
        }
        state.tls_enabled = true;
        Ok(())
    }

    fn is_tls(&self) -> bool {
        self.state.lock().unwrap().tls_enabled
    }

    async fn close(&mut self) -> DeliveryResult<()> {
        self.state.lock().unwrap().closed = true;
        Ok(())
    }
}

/// Connector handing out clones of one [`MockTransport`].
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    transport: MockTransport,
    fail_with: Arc<Mutex<Option<DeliveryError>>>,
    attempts: Arc<AtomicUsize>,
}

impl MockConnector {
    /// Creates a connector for the given transport.
    pub fn new(transport: MockTransport) -> Self {
        Self {
            transport,
            ..Default::default()
        }
    }

    /// Creates a connector whose next connect is refused.
    pub fn refusing() -> Self {
        let connector = Self::default();
        connector.fail_next_with(DeliveryError::connect("Connection refused to mock:25"));
        connector
    }

    /// Sets the next connect to fail.
    pub fn fail_next_with(&self, error: DeliveryError) -> &Self {
        *self.fail_with.lock().unwrap() = Some(error);
        self
    }

    /// Returns the shared transport.
    pub fn transport(&self) -> &MockTransport {
        &self.transport
    }

    /// Returns the number of connect attempts.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _config: &SmtpConfig) -> DeliveryResult<Box<dyn SmtpTransport>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.fail_with.lock().unwrap().take() {
            return Err(error);
        }
        Ok(Box::new(self.transport.clone()))
    }
}

/// Creates an EHLO response with standard capabilities.
pub fn ehlo_response() -> SmtpResponse {
    SmtpResponse {
        code: codes::OK,
        enhanced_code: None,
        message: vec![
            "smtp.example.com Hello".to_string(),
            "SIZE 10485760".to_string(),
            "AUTH PLAIN LOGIN".to_string(),
            "STARTTLS".to_string(),
            "ENHANCEDSTATUSCODES".to_string(),
        ],
    }
}

/// Creates a greeting response.
pub fn greeting_response() -> SmtpResponse {
    SmtpResponse::new(codes::SERVICE_READY, "smtp.example.com ESMTP ready")
}

/// Creates an authentication success response.
pub fn auth_success_response() -> SmtpResponse {
    SmtpResponse::new(codes::AUTH_SUCCESS, "Authentication successful")
}

/// Creates a DATA ready response.
pub fn data_ready_response() -> SmtpResponse {
    SmtpResponse::new(codes::START_MAIL_INPUT, "Start mail input")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_transport() {
        let mut transport = MockTransport::new();
        transport.queue_error(550, "no");

        let response = transport
            .send_command(&SmtpCommand::Ehlo("test".to_string()))
            .await
            .unwrap();
        assert_eq!(response.code, 550);

        let response = transport.send_command(&SmtpCommand::Data).await.unwrap();
        assert_eq!(response.code, 250);

        assert_eq!(transport.sent_commands(), vec!["EHLO test", "DATA"]);
    }

    #[tokio::test]
    async fn test_mock_transport_failure() {
        let mut transport = MockTransport::new();
        transport.fail_next_with(DeliveryError::protocol("Test failure"));

        assert!(transport.send_command(&SmtpCommand::Quit).await.is_err());
        assert!(transport.send_command(&SmtpCommand::Quit).await.is_ok());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let transport = MockTransport::new();
        let connector = MockConnector::new(transport.clone());
        let config = SmtpConfig::builder().host("mock").build().unwrap();

        let mut boxed = connector.connect(&config).await.unwrap();
        boxed.send_data(b"hello").await.unwrap();
        boxed.close().await.unwrap();

        assert_eq!(transport.received_data(), vec![b"hello".to_vec()]);
        assert!(transport.is_closed());
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test]
    async fn test_refusing_connector() {
        let connector = MockConnector::refusing();
        let config = SmtpConfig::builder().host("mock").build().unwrap();

        let err = connector.connect(&config).await.unwrap_err();
        assert_eq!(err.kind(), crate::errors::DeliveryErrorKind::Connect);
        assert!(connector.connect(&config).await.is_ok());
        assert_eq!(connector.attempts(), 2);
    }
}
