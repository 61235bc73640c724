//! Error types for the mailer.
//!
//! Every failure that can end a send is a [`MailError`]. Errors carry a
//! [`MailErrorKind`], the SMTP reply code when one was received, and the
//! underlying cause (I/O, TLS, config parsing) when there is one.

use std::fmt;
use thiserror::Error;

/// Result type for mailer operations.
pub type MailResult<T> = Result<T, MailError>;

/// Mail error kinds, one per distinct failure mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MailErrorKind {
    // Connection errors
    /// Socket could not be opened.
    ConnectionRefused,
    /// Connect did not finish within the configured timeout.
    ConnectTimeout,
    /// Peer closed the connection while a response was expected.
    ConnectionClosed,
    /// No complete response within the configured timeout.
    ReadTimeout,
    /// Write did not finish within the configured timeout.
    WriteTimeout,
    /// Any other socket error.
    Io,
    /// Greeting was absent or not `220`.
    UnexpectedGreeting,
    /// `HELO`/`EHLO` was not answered with `250`.
    GreetingRejected,

    // TLS errors
    /// TLS handshake failed.
    TlsHandshakeFailed,
    /// `STARTTLS` was not answered with `220`.
    StartTlsRejected,
    /// Host is not usable as a TLS server name.
    InvalidServerName,

    // Authentication errors
    /// A step of `AUTH LOGIN` got an unexpected code.
    AuthenticationFailed,

    // Transaction errors
    /// `MAIL FROM` was rejected (strict policy only).
    SenderRejected,
    /// `RCPT TO` was rejected (strict policy only).
    RecipientRejected,
    /// `DATA` was not answered with `354` (strict policy only).
    DataRejected,
    /// Final reply to the payload was not `250`.
    MessageRejected,
    /// Message has no to, cc or bcc recipient.
    NoRecipients,

    // Message errors
    /// Attachment could not be read. Never fatal.
    AttachmentUnreadable,

    // Configuration errors
    /// Configuration is invalid.
    ConfigurationInvalid,
    /// Named connection does not exist in the settings.
    ConnectionNotFound,
}

impl MailErrorKind {
    /// Returns the category this kind belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            MailErrorKind::ConnectionRefused
            | MailErrorKind::ConnectTimeout
            | MailErrorKind::ConnectionClosed
            | MailErrorKind::ReadTimeout
            | MailErrorKind::WriteTimeout
            | MailErrorKind::Io
            | MailErrorKind::UnexpectedGreeting
            | MailErrorKind::GreetingRejected => ErrorCategory::Connect,

            MailErrorKind::TlsHandshakeFailed
            | MailErrorKind::StartTlsRejected
            | MailErrorKind::InvalidServerName => ErrorCategory::Tls,

            MailErrorKind::AuthenticationFailed => ErrorCategory::Auth,

            MailErrorKind::SenderRejected
            | MailErrorKind::RecipientRejected
            | MailErrorKind::DataRejected
            | MailErrorKind::MessageRejected
            | MailErrorKind::NoRecipients => ErrorCategory::Transaction,

            MailErrorKind::AttachmentUnreadable => ErrorCategory::Attachment,

            MailErrorKind::ConfigurationInvalid | MailErrorKind::ConnectionNotFound => {
                ErrorCategory::Configuration
            }
        }
    }

    /// Returns true if a failure of this kind ends the send.
    pub fn is_fatal(&self) -> bool {
        self.category() != ErrorCategory::Attachment
    }
}

impl fmt::Display for MailErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MailErrorKind::ConnectionRefused => write!(f, "Connection refused"),
            MailErrorKind::ConnectTimeout => write!(f, "Connect timeout"),
            MailErrorKind::ConnectionClosed => write!(f, "Connection closed"),
            MailErrorKind::ReadTimeout => write!(f, "Read timeout"),
            MailErrorKind::WriteTimeout => write!(f, "Write timeout"),
            MailErrorKind::Io => write!(f, "I/O error"),
            MailErrorKind::UnexpectedGreeting => write!(f, "Unexpected greeting"),
            MailErrorKind::GreetingRejected => write!(f, "HELO/EHLO rejected"),
            MailErrorKind::TlsHandshakeFailed => write!(f, "TLS handshake failed"),
            MailErrorKind::StartTlsRejected => write!(f, "STARTTLS rejected"),
            MailErrorKind::InvalidServerName => write!(f, "Invalid TLS server name"),
            MailErrorKind::AuthenticationFailed => write!(f, "Authentication failed"),
            MailErrorKind::SenderRejected => write!(f, "Sender rejected"),
            MailErrorKind::RecipientRejected => write!(f, "Recipient rejected"),
            MailErrorKind::DataRejected => write!(f, "DATA rejected"),
            MailErrorKind::MessageRejected => write!(f, "Message rejected"),
            MailErrorKind::NoRecipients => write!(f, "No recipients"),
            MailErrorKind::AttachmentUnreadable => write!(f, "Attachment unreadable"),
            MailErrorKind::ConfigurationInvalid => write!(f, "Invalid configuration"),
            MailErrorKind::ConnectionNotFound => write!(f, "Connection not found"),
        }
    }
}

/// Coarse failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Socket open, I/O, timeout or greeting failures.
    Connect,
    /// TLS upgrade failures.
    Tls,
    /// `AUTH LOGIN` failures.
    Auth,
    /// Envelope or payload rejected.
    Transaction,
    /// Unreadable attachment (skipped, not fatal).
    Attachment,
    /// Bad or missing configuration.
    Configuration,
}

/// Mailer error with detailed information.
#[derive(Error, Debug)]
pub struct MailError {
    kind: MailErrorKind,
    message: String,
    smtp_code: Option<u16>,
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl MailError {
    /// Creates a new error.
    pub fn new(kind: MailErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            smtp_code: None,
            cause: None,
        }
    }

    /// Sets the SMTP reply code.
    pub fn with_smtp_code(mut self, code: u16) -> Self {
        self.smtp_code = Some(code);
        self
    }

    /// Sets the underlying cause.
    pub fn with_cause<E: std::error::Error + Send + Sync + 'static>(mut self, cause: E) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Returns the error kind.
    pub fn kind(&self) -> MailErrorKind {
        self.kind
    }

    /// Returns the error category.
    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the SMTP reply code if one was received.
    pub fn smtp_code(&self) -> Option<u16> {
        self.smtp_code
    }

    // Convenience constructors

    /// Creates a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(MailErrorKind::ConnectionRefused, message)
    }

    /// Creates a timeout error.
    pub fn timeout(kind: MailErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message)
    }

    /// Creates a TLS error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::new(MailErrorKind::TlsHandshakeFailed, message)
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(MailErrorKind::ConfigurationInvalid, message)
    }

    /// Creates an error for a reply that did not carry the expected code.
    pub fn unexpected_reply(kind: MailErrorKind, expected: u16, code: u16, reply: &str) -> Self {
        Self::new(kind, format!("expected {}, got: {}", expected, reply)).with_smtp_code(code)
    }
}

impl fmt::Display for MailError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(code) = self.smtp_code {
            write!(f, " (SMTP {})", code)?;
        }
        Ok(())
    }
}

impl From<std::io::Error> for MailError {
    fn from(error: std::io::Error) -> Self {
        let kind = match error.kind() {
            std::io::ErrorKind::ConnectionRefused => MailErrorKind::ConnectionRefused,
            std::io::ErrorKind::TimedOut => MailErrorKind::ReadTimeout,
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => MailErrorKind::ConnectionClosed,
            _ => MailErrorKind::Io,
        };
        Self::new(kind, error.to_string()).with_cause(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(MailErrorKind::UnexpectedGreeting.category(), ErrorCategory::Connect);
        assert_eq!(MailErrorKind::StartTlsRejected.category(), ErrorCategory::Tls);
        assert_eq!(MailErrorKind::AuthenticationFailed.category(), ErrorCategory::Auth);
        assert_eq!(MailErrorKind::MessageRejected.category(), ErrorCategory::Transaction);
        assert_eq!(MailErrorKind::ConnectionNotFound.category(), ErrorCategory::Configuration);
    }

    #[test]
    fn test_attachment_errors_are_not_fatal() {
        assert!(!MailErrorKind::AttachmentUnreadable.is_fatal());
        assert!(MailErrorKind::ReadTimeout.is_fatal());
        assert!(MailErrorKind::MessageRejected.is_fatal());
    }

    #[test]
    fn test_unexpected_reply_display() {
        let err = MailError::unexpected_reply(
            MailErrorKind::AuthenticationFailed,
            235,
            535,
            "535 5.7.8 Authentication credentials invalid",
        );
        assert_eq!(err.smtp_code(), Some(535));
        let text = err.to_string();
        assert!(text.starts_with("Authentication failed"));
        assert!(text.ends_with("(SMTP 535)"));
    }

    #[test]
    fn test_io_error_mapping() {
        let err: MailError = std::io::Error::from(std::io::ErrorKind::ConnectionRefused).into();
        assert_eq!(err.kind(), MailErrorKind::ConnectionRefused);

        let err: MailError = std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into();
        assert_eq!(err.kind(), MailErrorKind::ConnectionClosed);
        assert!(std::error::Error::source(&err).is_some());
    }
}
