//! Fluent mailer.
//!
//! [`Mailer`] collects a message through chainable setters and sends it over
//! a single SMTP connection:
//!
//! ```rust,no_run
//! use integrations_mailer::{ConnectionConfig, Mailer};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConnectionConfig::builder()
//!     .host("smtp.example.com")
//!     .from("noreply@example.com", Some("Example"))
//!     .build()?;
//!
//! let sent = Mailer::new(config)
//!     .to(("jane@example.com", "Jane"))
//!     .subject("Hello")
//!     .text("Hi Jane")
//!     .send()
//!     .await;
//! # Ok(())
//! # }
//! ```

use tracing::Instrument;

use crate::config::{ConnectionConfig, MailerSettings};
use crate::errors::{MailError, MailErrorKind, MailResult};
use crate::mime::{encode_subject, strip_tags, wordwrap, MimeEncoder, TransferEncoding};
use crate::observability::{RequestContext, Timer, Transcript, WireLog};
use crate::session::SmtpSession;
use crate::transport::{SmtpTransport, TcpTransport};
use crate::types::{Address, IntoAddresses, IntoPaths, Message};

/// Builds and sends one message.
#[derive(Debug, Clone)]
pub struct Mailer {
    /// Connection used by the send.
    config: ConnectionConfig,
    /// Message being built.
    message: Message,
    /// Optional capture of the wire traffic.
    transcript: Option<Transcript>,
}

impl Mailer {
    /// Creates a mailer for a connection.
    ///
    /// The sender and reply-to addresses start from the connection's `from`,
    /// `reply` and `sender` settings.
    pub fn new(config: ConnectionConfig) -> Self {
        let sender = config.sender.clone().unwrap_or_default();
        let mut message = Message::new(Address::with_name(sender.clone(), config.from.clone()));
        message.reply_to = config
            .reply
            .as_ref()
            .filter(|reply| !reply.is_empty())
            .map(|reply| Address::with_name(sender, reply.clone()));

        Self {
            config,
            message,
            transcript: None,
        }
    }

    /// Creates a mailer for a named connection, or the default one.
    pub fn from_settings(settings: &MailerSettings, connection: Option<&str>) -> MailResult<Self> {
        Ok(Self::new(settings.connection(connection)?))
    }

    /// Sets the sender address.
    pub fn from(mut self, address: impl Into<Address>) -> Self {
        self.message.from = address.into();
        self
    }

    /// Sets the reply-to address.
    pub fn reply_to(mut self, address: impl Into<Address>) -> Self {
        self.message.reply_to = Some(address.into());
        self
    }

    /// Adds primary recipients.
    pub fn to(mut self, addresses: impl IntoAddresses) -> Self {
        self.message.to.extend(addresses.into_addresses());
        self
    }

    /// Adds CC recipients.
    pub fn cc(mut self, addresses: impl IntoAddresses) -> Self {
        self.message.cc.extend(addresses.into_addresses());
        self
    }

    /// Adds BCC recipients. They only appear in the envelope.
    pub fn bcc(mut self, addresses: impl IntoAddresses) -> Self {
        self.message.bcc.extend(addresses.into_addresses());
        self
    }

    /// Sets the HTML body. An empty body is treated as absent.
    pub fn html(mut self, body: impl Into<String>) -> Self {
        let body = body.into();
        self.message.html_body = if body.is_empty() { None } else { Some(body) };
        self
    }

    /// Sets the plain text body, stripped of markup and wrapped at the
    /// current [`wordwrap`](Self::wordwrap) width.
    pub fn text(mut self, body: impl AsRef<str>) -> Self {
        self.message.text_body = wordwrap(&strip_tags(body.as_ref()), self.message.wordwrap);
        self
    }

    /// Sets the subject, encoded with the current charset.
    pub fn subject(mut self, subject: impl AsRef<str>) -> Self {
        self.message.subject = encode_subject(&self.message.charset, subject.as_ref());
        self
    }

    /// Adds one attachment path or a list of them.
    pub fn attach(mut self, paths: impl IntoPaths) -> Self {
        self.message.attachments.extend(paths.into_paths());
        self
    }

    /// Sets the charset. Affects subjects and bodies set afterwards.
    pub fn charset(mut self, charset: impl Into<String>) -> Self {
        self.message.charset = charset.into();
        self
    }

    /// Sets the transfer encoding of the text parts.
    pub fn transfer_encoding(mut self, encoding: TransferEncoding) -> Self {
        self.message.transfer_encoding = encoding;
        self
    }

    /// Sets the wrap width for text bodies set afterwards.
    pub fn wordwrap(mut self, width: usize) -> Self {
        self.message.wordwrap = width;
        self
    }

    /// Records the wire traffic of the send in `transcript`.
    pub fn transcript(mut self, transcript: Transcript) -> Self {
        self.transcript = Some(transcript);
        self
    }

    /// Returns the message built so far.
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Returns the connection settings.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Renders the DATA payload, terminating line included.
    pub fn render(&self) -> Vec<u8> {
        MimeEncoder::new().encode_payload(&self.message)
    }

    /// Sends the message. Returns `true` when the server accepted it.
    ///
    /// Failures are logged at DEBUG; use [`try_send`](Self::try_send) to get
    /// the error itself.
    pub async fn send(self) -> bool {
        match self.try_send().await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, kind = ?e.kind(), "Mail send failed");
                false
            }
        }
    }

    /// Sends the message over a new connection.
    pub async fn try_send(self) -> MailResult<()> {
        let span = self.request_context().span();
        async move {
            self.ensure_recipients()?;
            let transport = TcpTransport::connect(&self.config).await?;
            self.deliver(transport).await
        }
        .instrument(span)
        .await
    }

    /// Sends the message over an already opened transport.
    pub async fn try_send_with<T: SmtpTransport>(self, transport: T) -> MailResult<()> {
        let span = self.request_context().span();
        async move {
            self.ensure_recipients()?;
            self.deliver(transport).await
        }
        .instrument(span)
        .await
    }

    /// Sends the message from synchronous code, blocking the calling thread.
    ///
    /// Returns `false` without sending when called from within an async
    /// runtime; use [`send`](Self::send) there.
    pub fn send_blocking(self) -> bool {
        if tokio::runtime::Handle::try_current().is_ok() {
            tracing::debug!("send_blocking called inside an async runtime");
            return false;
        }

        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::debug!(error = %e, "Cannot start runtime");
                return false;
            }
        };

        runtime.block_on(self.send())
    }

    fn request_context(&self) -> RequestContext {
        RequestContext::new(&self.config.host, self.config.port)
            .with_recipients(self.message.recipient_count())
            .with_attachments(self.message.has_attachments())
    }

    fn ensure_recipients(&self) -> MailResult<()> {
        if self.message.recipient_count() == 0 {
            return Err(MailError::new(
                MailErrorKind::NoRecipients,
                "Message has no to, cc or bcc recipient",
            ));
        }
        Ok(())
    }

    async fn deliver<T: SmtpTransport>(self, transport: T) -> MailResult<()> {
        let timer = Timer::start("smtp_send");
        let payload = self.render();
        let wire = WireLog::new(self.config.debug, self.transcript.clone());

        let mut session = SmtpSession::new(transport, &self.config, wire);
        let result = session.send(&self.message, &payload).await;

        let elapsed = timer.stop();
        if result.is_ok() {
            tracing::debug!(
                duration_ms = elapsed.as_millis() as u64,
                bytes = payload.len(),
                "Message accepted"
            );
        }
        result
    }
}
