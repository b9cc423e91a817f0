//! Transport layer for SMTP connections.
//!
//! Provides the [`SmtpTransport`] abstraction over a TCP connection that can
//! be upgraded in place with STARTTLS, and the [`Connector`] seam that opens
//! one per send.

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::config::{SmtpConfig, TlsConfig};
use crate::errors::{DeliveryError, DeliveryResult};
use crate::protocol::{SmtpCommand, SmtpResponse};

/// Trait for SMTP transport abstraction.
#[async_trait]
pub trait SmtpTransport: Send + Sync + fmt::Debug {
    /// Sends a command and receives a response.
    async fn send_command(&mut self, command: &SmtpCommand) -> DeliveryResult<SmtpResponse>;

    /// Sends raw data (for DATA command body).
    async fn send_data(&mut self, data: &[u8]) -> DeliveryResult<()>;

    /// Reads a response from the server.
    async fn read_response(&mut self) -> DeliveryResult<SmtpResponse>;

    /// Upgrades the connection to TLS.
    async fn upgrade_tls(&mut self, config: &TlsConfig, host: &str) -> DeliveryResult<()>;

    /// Returns true if TLS is enabled.
    fn is_tls(&self) -> bool;

    /// Closes the connection. Safe to call more than once.
    async fn close(&mut self) -> DeliveryResult<()>;
}

/// Opens transports. One connection is opened per send.
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    /// Connects to the configured server. The greeting is left unread.
    async fn connect(&self, config: &SmtpConfig) -> DeliveryResult<Box<dyn SmtpTransport>>;
}

/// Connector for real TCP sockets.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, config: &SmtpConfig) -> DeliveryResult<Box<dyn SmtpTransport>> {
        Ok(Box::new(TcpTransport::connect(config).await?))
    }
}

/// TCP connection with optional TLS.
pub struct TcpTransport {
    /// Read/write stream. `None` once closed or after a failed upgrade.
    stream: Option<TransportStream>,
    /// Command timeout.
    command_timeout: Duration,
    /// Connect timeout, also used for the TLS handshake.
    connect_timeout: Duration,
    /// TLS enabled flag.
    tls_enabled: bool,
    /// Server host.
    host: String,
}

/// Stream type that can be plain TCP or TLS.
enum TransportStream {
    Plain(BufReader<TcpStream>),
    #[cfg(feature = "rustls-tls")]
    Tls(Box<BufReader<tokio_rustls::client::TlsStream<TcpStream>>>),
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTransport")
            .field("host", &self.host)
            .field("tls_enabled", &self.tls_enabled)
            .field("open", &self.stream.is_some())
            .finish()
    }
}

impl TcpTransport {
    /// Connects to an SMTP server.
    pub async fn connect(config: &SmtpConfig) -> DeliveryResult<Self> {
        let address = config.address();

        let stream = timeout(config.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| DeliveryError::connect(format!("Connect to {} timed out", address)))?
            .map_err(|e| Self::map_io_error(e, &address))?;

        stream.set_nodelay(true).ok();
        debug!(address = %address, "Connected to SMTP server");

        Ok(Self {
            stream: Some(TransportStream::Plain(BufReader::new(stream))),
            command_timeout: config.command_timeout,
            connect_timeout: config.connect_timeout,
            tls_enabled: false,
            host: config.host.clone(),
        })
    }

    /// Maps connect errors.
    fn map_io_error(error: io::Error, address: &str) -> DeliveryError {
        let message = match error.kind() {
            io::ErrorKind::ConnectionRefused => format!("Connection refused to {}", address),
            io::ErrorKind::TimedOut => format!("Connect to {} timed out", address),
            _ => format!("Unable to connect to {}", address),
        };
        DeliveryError::connect(message).with_cause(error)
    }

    fn stream_mut(&mut self) -> DeliveryResult<&mut TransportStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| DeliveryError::protocol("Connection is closed"))
    }

    /// Reads lines until we have a complete response.
    async fn read_response_inner<R: AsyncBufReadExt + Unpin>(
        reader: &mut R,
        timeout_duration: Duration,
    ) -> DeliveryResult<SmtpResponse> {
        let mut lines = Vec::new();

        loop {
            let mut line = String::new();

            let read = timeout(timeout_duration, reader.read_line(&mut line))
                .await
                .map_err(|_| DeliveryError::other("Timed out waiting for SMTP server"))?
                .map_err(|e| DeliveryError::protocol("Read error").with_cause(e))?;

            if read == 0 {
                return Err(DeliveryError::protocol("Server closed connection"));
            }

            let line = line.trim_end().to_string();

            // "250-" continues, "250 " ends
            let is_continuation = line.as_bytes().get(3) == Some(&b'-');
            lines.push(line);

            if !is_continuation {
                break;
            }
        }

        SmtpResponse::parse(&lines)
    }

    /// Writes data to the stream.
    async fn write_all<W: AsyncWrite + Unpin>(
        writer: &mut W,
        data: &[u8],
        timeout_duration: Duration,
    ) -> DeliveryResult<()> {
        timeout(timeout_duration, writer.write_all(data))
            .await
            .map_err(|_| DeliveryError::other("Timed out writing to SMTP server"))?
            .map_err(|e| DeliveryError::protocol("Write error").with_cause(e))?;

        timeout(timeout_duration, writer.flush())
            .await
            .map_err(|_| DeliveryError::other("Timed out writing to SMTP server"))?
            .map_err(|e| DeliveryError::protocol("Flush error").with_cause(e))?;

        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> DeliveryResult<()> {
        let command_timeout = self.command_timeout;
        match self.stream_mut()? {
            TransportStream::Plain(stream) => Self::write_all(stream.get_mut(), data, command_timeout).await,
            #[cfg(feature = "rustls-tls")]
            TransportStream::Tls(stream) => Self::write_all(stream.get_mut(), data, command_timeout).await,
        }
    }

    #[cfg(feature = "rustls-tls")]
    async fn tls_client_config(config: &TlsConfig) -> DeliveryResult<rustls::ClientConfig> {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        if let Some(path) = &config.ca_cert_path {
            let pem = tokio::fs::read(path).await.map_err(|e| {
                DeliveryError::configuration(format!("Unable to read CA bundle {}", path.display())).with_cause(e)
            })?;
            for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
                let cert = cert.map_err(|e| {
                    DeliveryError::configuration(format!("Malformed CA bundle {}", path.display())).with_cause(e)
                })?;
                root_store.add(cert).map_err(|e| {
                    DeliveryError::configuration(format!("Rejected CA certificate in {}", path.display()))
                        .with_cause(e)
                })?;
            }
        }

        Ok(rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth())
    }
}

#[async_trait]
impl SmtpTransport for TcpTransport {
    async fn send_command(&mut self, command: &SmtpCommand) -> DeliveryResult<SmtpResponse> {
        let cmd_str = format!("{}\r\n", command.to_smtp_string());
        debug!(command = %command, "Sending SMTP command");

        self.write(cmd_str.as_bytes()).await?;
        self.read_response().await
    }

    async fn send_data(&mut self, data: &[u8]) -> DeliveryResult<()> {
        self.write(data).await
    }

    async fn read_response(&mut self) -> DeliveryResult<SmtpResponse> {
        let command_timeout = self.command_timeout;
        let response = match self.stream_mut()? {
            TransportStream::Plain(stream) => Self::read_response_inner(stream, command_timeout).await?,
            #[cfg(feature = "rustls-tls")]
            TransportStream::Tls(stream) => Self::read_response_inner(&mut **stream, command_timeout).await?,
        };

        debug!(code = response.code, message = %response.first_message(), "Received SMTP response");
        Ok(response)
    }

    async fn upgrade_tls(&mut self, config: &TlsConfig, host: &str) -> DeliveryResult<()> {
        if self.tls_enabled {
            return Ok(());
        }

        #[cfg(feature = "rustls-tls")]
        {
            use rustls::pki_types::ServerName;
            use std::sync::Arc;

            let tls_config = Self::tls_client_config(config).await?;
            let connector = tokio_rustls::TlsConnector::from(Arc::new(tls_config));
            let server_name = ServerName::try_from(host.to_string())
                .map_err(|_| DeliveryError::handshake(format!("Invalid server name: {}", host)))?;

            let tcp_stream = match self.stream.take() {
                Some(TransportStream::Plain(reader)) => reader.into_inner(),
                Some(other) => {
                    self.stream = Some(other);
                    return Err(DeliveryError::handshake("Already using TLS"));
                }
                None => return Err(DeliveryError::protocol("Connection is closed")),
            };

            let tls_stream = timeout(self.connect_timeout, connector.connect(server_name, tcp_stream))
                .await
                .map_err(|_| DeliveryError::handshake("TLS handshake timed out"))?
                .map_err(|e| DeliveryError::handshake("TLS handshake failed").with_cause(e))?;

            self.stream = Some(TransportStream::Tls(Box::new(BufReader::new(tls_stream))));
            self.tls_enabled = true;
            debug!(host = %host, "TLS established");

            Ok(())
        }

        #[cfg(not(feature = "rustls-tls"))]
        {
            let _ = (config, host);
            Err(DeliveryError::handshake("No TLS implementation available"))
        }
    }

    fn is_tls(&self) -> bool {
        self.tls_enabled
    }

    async fn close(&mut self) -> DeliveryResult<()> {
        if let Some(stream) = self.stream.take() {
            match stream {
                TransportStream::Plain(mut reader) => {
                    let _ = reader.get_mut().shutdown().await;
                }
                #[cfg(feature = "rustls-tls")]
                TransportStream::Tls(mut reader) => {
                    let _ = reader.get_mut().shutdown().await;
                }
            }
        }
        Ok(())
    }
}
