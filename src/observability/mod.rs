//! Observability for mail sends.
//!
//! Wire traffic is emitted as `tracing` events on the
//! `integrations_mailer::wire` target when a connection has `debug` set,
//! and can also be captured in a [`Transcript`] for inspection.

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::protocol::SmtpCommand;

/// Direction of a wire line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Client to server.
    Sent,
    /// Server to client.
    Received,
}

/// One line of SMTP traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    /// Who wrote the line.
    pub direction: Direction,
    /// The line, without its terminator. Credentials are redacted.
    pub line: String,
}

/// In-memory record of the traffic of a send.
///
/// Clones share the same buffer, so a caller can keep one handle and pass
/// another to [`crate::Mailer::transcript`].
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Arc<Mutex<Vec<TranscriptEntry>>>,
}

impl Transcript {
    /// Creates an empty transcript.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TranscriptEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Appends a line.
    pub fn record(&self, direction: Direction, line: impl Into<String>) {
        self.lock().push(TranscriptEntry {
            direction,
            line: line.into(),
        });
    }

    /// Returns a copy of all entries.
    pub fn entries(&self) -> Vec<TranscriptEntry> {
        self.lock().clone()
    }

    /// Returns the lines the client sent.
    pub fn commands(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|e| e.direction == Direction::Sent)
            .map(|e| e.line.clone())
            .collect()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Formats the transcript as a JSON array.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&*self.lock()).unwrap_or_else(|_| "[]".to_string())
    }
}

/// Sink for the wire traffic of one session.
#[derive(Debug, Clone, Default)]
pub struct WireLog {
    debug: bool,
    transcript: Option<Transcript>,
}

impl WireLog {
    /// Creates a sink. `debug` enables the `tracing` events.
    pub fn new(debug: bool, transcript: Option<Transcript>) -> Self {
        Self { debug, transcript }
    }

    /// Records an outbound command.
    pub fn command(&self, command: &SmtpCommand) {
        let line = command.to_log_string();
        if self.debug {
            tracing::debug!(target: "integrations_mailer::wire", "C: {}", line);
        }
        if let Some(transcript) = &self.transcript {
            transcript.record(Direction::Sent, line);
        }
    }

    /// Records the DATA payload.
    ///
    /// The transcript and the DEBUG event get a one-line summary; each
    /// payload line is emitted at TRACE on the wire target.
    pub fn payload(&self, payload: &[u8]) {
        let line = format!("<{} bytes of message data>", payload.len());
        if self.debug {
            tracing::debug!(target: "integrations_mailer::wire", "C: {}", line);
            for data_line in String::from_utf8_lossy(payload).lines() {
                tracing::trace!(target: "integrations_mailer::wire", "C: {}", data_line);
            }
        }
        if let Some(transcript) = &self.transcript {
            transcript.record(Direction::Sent, line);
        }
    }

    /// Records the raw lines of a response.
    pub fn response(&self, lines: &[String]) {
        for line in lines {
            if self.debug {
                tracing::debug!(target: "integrations_mailer::wire", "S: {}", line);
            }
            if let Some(transcript) = &self.transcript {
                transcript.record(Direction::Received, line.clone());
            }
        }
    }
}

/// Fields attached to the `smtp_send` span.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique request ID.
    pub request_id: String,
    /// SMTP host.
    pub host: String,
    /// SMTP port.
    pub port: u16,
    /// Recipient count.
    pub recipient_count: usize,
    /// Has attachments.
    pub has_attachments: bool,
}

impl RequestContext {
    /// Creates a new request context.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            host: host.into(),
            port,
            recipient_count: 0,
            has_attachments: false,
        }
    }

    /// Sets the recipient count.
    pub fn with_recipients(mut self, count: usize) -> Self {
        self.recipient_count = count;
        self
    }

    /// Sets the attachments flag.
    pub fn with_attachments(mut self, has_attachments: bool) -> Self {
        self.has_attachments = has_attachments;
        self
    }

    /// Opens the `smtp_send` span for this request.
    pub fn span(&self) -> tracing::Span {
        tracing::debug_span!(
            "smtp_send",
            request_id = %self.request_id,
            host = %self.host,
            port = self.port,
            recipients = self.recipient_count,
            attachments = self.has_attachments,
        )
    }
}

/// Timer for measuring operation duration.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    name: String,
}

impl Timer {
    /// Creates and starts a new timer.
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stops the timer and returns the duration.
    pub fn stop(self) -> Duration {
        let elapsed = self.start.elapsed();
        tracing::debug!(
            timer = %self.name,
            duration_ms = elapsed.as_millis() as u64,
            "Timer stopped"
        );
        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcript_shared_between_clones() {
        let transcript = Transcript::new();
        let handle = transcript.clone();

        handle.record(Direction::Sent, "EHLO localhost");
        handle.record(Direction::Received, "250 OK");

        assert_eq!(transcript.entries().len(), 2);
        assert_eq!(transcript.commands(), vec!["EHLO localhost".to_string()]);
    }

    #[test]
    fn test_transcript_json() {
        let transcript = Transcript::new();
        transcript.record(Direction::Sent, "QUIT");

        let json = transcript.to_json();
        assert_eq!(json, r#"[{"direction":"sent","line":"QUIT"}]"#);
    }

    #[test]
    fn test_wire_log_redacts_password() {
        let transcript = Transcript::new();
        let wire = WireLog::new(false, Some(transcript.clone()));

        wire.command(&SmtpCommand::AuthResponse {
            encoded: "c2VjcmV0".to_string(),
            sensitive: true,
        });
        wire.response(&["235 2.7.0 Accepted".to_string()]);

        let entries = transcript.entries();
        assert_eq!(entries[0].line, crate::protocol::REDACTED);
        assert_eq!(entries[1].direction, Direction::Received);
        assert!(!transcript.to_json().contains("c2VjcmV0"));
    }

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn captured_payload_log(debug: bool) -> String {
        let capture = Capture::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let transcript = Transcript::new();
        let wire = WireLog::new(debug, Some(transcript.clone()));
        tracing::subscriber::with_default(subscriber, || {
            wire.payload(b"Subject: Hi\r\n\r\nfirst body line\r\n.\r\n");
        });

        assert_eq!(transcript.commands(), vec!["<35 bytes of message data>".to_string()]);
        let bytes = capture.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_payload_lines_traced_in_debug_mode() {
        let log = captured_payload_log(true);
        assert!(log.contains("C: <35 bytes of message data>"));
        assert!(log.contains("C: Subject: Hi"));
        assert!(log.contains("C: first body line"));
    }

    #[test]
    fn test_payload_silent_without_debug() {
        assert!(!captured_payload_log(false).contains("first body line"));
    }

    #[test]
    fn test_timer() {
        let timer = Timer::start("test");
        std::thread::sleep(Duration::from_millis(10));
        let duration = timer.stop();
        assert!(duration >= Duration::from_millis(10));
    }

    #[test]
    fn test_request_context() {
        let ctx = RequestContext::new("mail.example.com", 587)
            .with_recipients(3)
            .with_attachments(true);
        assert_eq!(ctx.recipient_count, 3);
        assert!(ctx.has_attachments);
        assert_eq!(ctx.request_id.len(), 36);
    }
}
