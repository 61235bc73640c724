//! Transport layer for SMTP connections.
//!
//! A plain TCP connection that can be wrapped in TLS either right after
//! connecting (implicit TLS) or in place after `STARTTLS`.

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::config::{ConnectionConfig, SecurityMode};
use crate::errors::{MailError, MailErrorKind, MailResult};
use crate::protocol::{is_final_line, SmtpCommand, SmtpResponse};

/// Trait for SMTP transport abstraction.
#[async_trait]
pub trait SmtpTransport: Send + fmt::Debug {
    /// Sends a command line and reads the response.
    async fn send_command(&mut self, command: &SmtpCommand) -> MailResult<SmtpResponse>;

    /// Sends raw data (for DATA command body).
    async fn send_data(&mut self, data: &[u8]) -> MailResult<()>;

    /// Reads a complete, possibly multiline, response from the server.
    async fn read_response(&mut self) -> MailResult<SmtpResponse>;

    /// Upgrades the open connection to TLS.
    async fn upgrade_tls(&mut self) -> MailResult<()>;

    /// Returns true if TLS is enabled.
    fn is_tls(&self) -> bool;

    /// Shuts the connection down. Later calls fail with `ConnectionClosed`.
    async fn close(&mut self) -> MailResult<()>;
}

/// Stream type that can be plain TCP or TLS.
enum TransportStream {
    Plain(BufReader<TcpStream>),
    Tls(Box<BufReader<TlsStream<TcpStream>>>),
}

/// TCP connection with optional TLS.
pub struct TcpTransport {
    /// Read/write stream; `None` once closed or after a failed upgrade.
    stream: Option<TransportStream>,
    /// Timeout for every read, write and handshake.
    timeout: Duration,
    /// Server host, used as the TLS server name.
    host: String,
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTransport")
            .field("host", &self.host)
            .field("tls_enabled", &self.is_tls())
            .field("open", &self.stream.is_some())
            .finish()
    }
}

impl TcpTransport {
    /// Connects to an SMTP server.
    ///
    /// With [`SecurityMode::ImplicitTls`] the TLS handshake is done before
    /// returning, so the greeting is read over TLS.
    pub async fn connect(config: &ConnectionConfig) -> MailResult<Self> {
        let address = config.address();

        let stream = timeout(config.timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| {
                MailError::timeout(
                    MailErrorKind::ConnectTimeout,
                    format!("Connect to {} timed out", address),
                )
            })?
            .map_err(|e| Self::map_io_error(e, &address))?;

        stream.set_nodelay(true).ok();

        tracing::trace!(address = %address, "TCP connection established");

        let stream = if config.security == SecurityMode::ImplicitTls {
            let tls = Self::handshake(stream, &config.host, config.timeout).await?;
            TransportStream::Tls(Box::new(BufReader::new(tls)))
        } else {
            TransportStream::Plain(BufReader::new(stream))
        };

        Ok(Self {
            stream: Some(stream),
            timeout: config.timeout,
            host: config.host.clone(),
        })
    }

    /// Maps IO errors to mail errors.
    fn map_io_error(error: io::Error, address: &str) -> MailError {
        match error.kind() {
            io::ErrorKind::ConnectionRefused => MailError::new(
                MailErrorKind::ConnectionRefused,
                format!("Connection refused to {}", address),
            )
            .with_cause(error),
            io::ErrorKind::TimedOut => MailError::timeout(
                MailErrorKind::ConnectTimeout,
                format!("Connect to {} timed out", address),
            ),
            _ => MailError::connection(format!("Cannot connect to {}: {}", address, error))
                .with_cause(error),
        }
    }

    /// Builds a connector trusting the webpki root set.
    fn tls_connector() -> TlsConnector {
        let root_store = rustls::RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };

        let config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        TlsConnector::from(Arc::new(config))
    }

    /// Runs the client side of a TLS handshake.
    async fn handshake(
        stream: TcpStream,
        host: &str,
        timeout_duration: Duration,
    ) -> MailResult<TlsStream<TcpStream>> {
        let server_name = ServerName::try_from(host)
            .map(|name| name.to_owned())
            .map_err(|_| {
                MailError::new(
                    MailErrorKind::InvalidServerName,
                    format!("Invalid server name: {}", host),
                )
            })?;

        let tls = timeout(
            timeout_duration,
            Self::tls_connector().connect(server_name, stream),
        )
        .await
        .map_err(|_| MailError::timeout(MailErrorKind::ConnectTimeout, "TLS handshake timed out"))?
        .map_err(|e| MailError::tls(format!("TLS handshake failed: {}", e)).with_cause(e))?;

        tracing::trace!(host = %host, "TLS established");
        Ok(tls)
    }

    fn stream_mut(&mut self) -> MailResult<&mut TransportStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| MailError::new(MailErrorKind::ConnectionClosed, "Connection is closed"))
    }

    /// Reads lines until we have a complete response.
    async fn read_response_inner<R: AsyncBufRead + Unpin>(
        reader: &mut R,
        timeout_duration: Duration,
    ) -> MailResult<SmtpResponse> {
        let mut lines = Vec::new();

        loop {
            let mut buf = Vec::new();

            let read = timeout(timeout_duration, reader.read_until(b'\n', &mut buf))
                .await
                .map_err(|_| MailError::timeout(MailErrorKind::ReadTimeout, "Read timed out"))??;

            if read == 0 {
                return Err(MailError::new(
                    MailErrorKind::ConnectionClosed,
                    "Server closed connection",
                ));
            }

            let line = String::from_utf8_lossy(&buf)
                .trim_end_matches(['\r', '\n'])
                .to_string();
            let last = is_final_line(&line);
            lines.push(line);

            if last {
                break;
            }
        }

        Ok(SmtpResponse::parse(&lines))
    }

    /// Writes data to the stream.
    async fn write_all<W: AsyncWrite + Unpin>(
        writer: &mut W,
        data: &[u8],
        timeout_duration: Duration,
    ) -> MailResult<()> {
        timeout(timeout_duration, writer.write_all(data))
            .await
            .map_err(|_| MailError::timeout(MailErrorKind::WriteTimeout, "Write timed out"))??;

        timeout(timeout_duration, writer.flush())
            .await
            .map_err(|_| MailError::timeout(MailErrorKind::WriteTimeout, "Flush timed out"))??;

        Ok(())
    }
}

#[async_trait]
impl SmtpTransport for TcpTransport {
    async fn send_command(&mut self, command: &SmtpCommand) -> MailResult<SmtpResponse> {
        let line = format!("{}\r\n", command.to_smtp_string());
        self.send_data(line.as_bytes()).await?;
        self.read_response().await
    }

    async fn send_data(&mut self, data: &[u8]) -> MailResult<()> {
        let timeout_duration = self.timeout;
        match self.stream_mut()? {
            TransportStream::Plain(stream) => {
                Self::write_all(stream.get_mut(), data, timeout_duration).await
            }
            TransportStream::Tls(stream) => {
                Self::write_all(stream.get_mut(), data, timeout_duration).await
            }
        }
    }

    async fn read_response(&mut self) -> MailResult<SmtpResponse> {
        let timeout_duration = self.timeout;
        match self.stream_mut()? {
            TransportStream::Plain(stream) => {
                Self::read_response_inner(stream, timeout_duration).await
            }
            TransportStream::Tls(stream) => {
                Self::read_response_inner(&mut **stream, timeout_duration).await
            }
        }
    }

    async fn upgrade_tls(&mut self) -> MailResult<()> {
        let tcp = match self.stream.take() {
            Some(TransportStream::Plain(reader)) => reader.into_inner(),
            Some(tls @ TransportStream::Tls(_)) => {
                self.stream = Some(tls);
                return Ok(());
            }
            None => {
                return Err(MailError::new(
                    MailErrorKind::ConnectionClosed,
                    "Connection is closed",
                ))
            }
        };

        // On failure the socket is dropped with the handshake future.
        let tls = Self::handshake(tcp, &self.host, self.timeout).await?;
        self.stream = Some(TransportStream::Tls(Box::new(BufReader::new(tls))));
        Ok(())
    }

    fn is_tls(&self) -> bool {
        matches!(self.stream, Some(TransportStream::Tls(_)))
    }

    async fn close(&mut self) -> MailResult<()> {
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };

        let result = match stream {
            TransportStream::Plain(mut stream) => {
                timeout(self.timeout, stream.get_mut().shutdown()).await
            }
            TransportStream::Tls(mut stream) => {
                timeout(self.timeout, stream.get_mut().shutdown()).await
            }
        };

        tracing::trace!(host = %self.host, "Connection closed");

        result
            .map_err(|_| MailError::timeout(MailErrorKind::WriteTimeout, "Shutdown timed out"))?
            .map_err(MailError::from)
    }
}
