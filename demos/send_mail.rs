//! Sending a message with the mailer.
//!
//! This example demonstrates how to:
//! - Load named connections from a TOML settings file, or build one inline
//! - Compose a message with text, HTML and an attachment
//! - Inspect the wire transcript after the send
//!
//! Run with `RUST_LOG=integrations_mailer=debug` to see the SMTP traffic.
//! An optional first argument names a settings file, e.g.:
//!
//! ```toml
//! default = "primary"
//! localhost = "client.example.com"
//!
//! [connections.primary]
//! host = "smtp.example.com"
//! port = 587
//! secure = "tls"
//! auth = true
//! user = "mailer@example.com"
//! pass = "your-password"
//! from = "mailer@example.com"
//! sender = "Example Mailer"
//! debug = true
//! ```

use std::time::Duration;

use integrations_mailer::{
    ConnectionConfig, MailError, Mailer, MailerSettings, SecurityMode, Transcript,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), MailError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mailer = match std::env::args().nth(1) {
        Some(path) => {
            let settings = MailerSettings::load(&path)?;
            Mailer::from_settings(&settings, None)?
        }
        None => {
            let config = ConnectionConfig::builder()
                .host("localhost")
                .port(2525)
                .security(SecurityMode::None)
                .from("sender@example.com", Some("Sender Name"))
                .timeout(Duration::from_secs(10))
                .debug(true)
                .build()?;
            Mailer::new(config)
        }
    };

    let transcript = Transcript::new();

    println!("Sending through {}...", mailer.config().address());
    let result = mailer
        .to([("recipient@example.com", "Recipient Name")])
        .cc("copy@example.com")
        .bcc("archive@example.com")
        .subject("Hello from Rust")
        .text("This is the plain text part.\n\nBest regards,\nThe Mailer")
        .html("<p>This is the <b>HTML</b> part.</p>")
        .attach("Cargo.toml")
        .transcript(transcript.clone())
        .try_send()
        .await;

    for entry in transcript.entries() {
        println!("  {:?}: {}", entry.direction, entry.line);
    }

    match result {
        Ok(()) => println!("Message accepted"),
        Err(e) => {
            eprintln!("Failed to send: {}", e);
            return Err(e);
        }
    }

    Ok(())
}
