//! # Mailer
//!
//! A small SMTP mailer that sends one message per connection:
//! - Plain SMTP, STARTTLS or implicit TLS (rustls with webpki roots)
//! - AUTH LOGIN
//! - On-the-fly MIME construction: plain text, multipart/alternative and
//!   multipart/mixed with file attachments
//! - Named connections loaded from a TOML settings file
//! - Wire-level debug logging through `tracing` and an optional transcript
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use integrations_mailer::{Mailer, MailerSettings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = MailerSettings::load("mailer.toml")?;
//!
//!     let sent = Mailer::from_settings(&settings, None)?
//!         .to([("jane@example.com", "Jane"), ("john@example.com", "John")])
//!         .bcc("audit@example.com")
//!         .subject("Quarterly report")
//!         .text("Please find the report attached.")
//!         .html("<p>Please find the report attached.</p>")
//!         .attach("report.pdf")
//!         .send()
//!         .await;
//!
//!     println!("sent: {}", sent);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod errors;
pub mod types;

// Protocol layer
pub mod protocol;

// Transport layer
pub mod transport;

// Authentication
pub mod auth;

// MIME encoding
pub mod mime;

// Observability
pub mod observability;

// Session state machine
pub mod session;

// Client
pub mod client;

// Mocks for testing
pub mod mocks;

// Re-exports for convenience
pub use client::Mailer;
pub use config::{
    ConnectionConfig, ConnectionConfigBuilder, MailerSettings, ResponsePolicy, SecurityMode,
};
pub use errors::{ErrorCategory, MailError, MailErrorKind, MailResult};
pub use types::{Address, IntoAddresses, IntoPaths, Message};
pub use auth::Credentials;
pub use protocol::{SmtpCommand, SmtpResponse, TransactionState};
pub use transport::{SmtpTransport, TcpTransport};
pub use session::SmtpSession;
pub use mime::{MimeEncoder, TransferEncoding};
pub use observability::{Direction, Transcript, TranscriptEntry};
