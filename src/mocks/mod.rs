//! Mock implementations for testing.
//!
//! Provides a scripted transport so sessions and mailers can be exercised
//! without a network.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::errors::{MailError, MailErrorKind, MailResult};
use crate::protocol::{codes, SmtpCommand, SmtpResponse};
use crate::transport::SmtpTransport;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Mock SMTP transport for testing.
///
/// Responses are served in queue order to both [`SmtpTransport::send_command`]
/// and [`SmtpTransport::read_response`]; once the queue is empty every read
/// answers `250 OK`. Clones share their queues and recordings.
#[derive(Debug, Clone)]
pub struct MockTransport {
    /// Recorded commands.
    commands: Arc<Mutex<Vec<SmtpCommand>>>,
    /// Queued responses.
    responses: Arc<Mutex<VecDeque<SmtpResponse>>>,
    /// Default response.
    default_response: SmtpResponse,
    /// Data received.
    data_received: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Simulate failure.
    fail_next: Arc<Mutex<Option<MailError>>>,
    /// TLS enabled.
    tls_enabled: Arc<Mutex<bool>>,
    /// Closed by the session.
    closed: Arc<Mutex<bool>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self {
            commands: Arc::new(Mutex::new(Vec::new())),
            responses: Arc::new(Mutex::new(VecDeque::new())),
            default_response: SmtpResponse::new(codes::OK, "OK"),
            data_received: Arc::new(Mutex::new(Vec::new())),
            fail_next: Arc::new(Mutex::new(None)),
            tls_enabled: Arc::new(Mutex::new(false)),
            closed: Arc::new(Mutex::new(false)),
        }
    }

    /// Creates a transport answering with the given codes in order.
    pub fn with_codes(codes: impl IntoIterator<Item = u16>) -> Self {
        let transport = Self::new();
        for code in codes {
            transport.queue_code(code);
        }
        transport
    }

    /// Queues a response.
    pub fn queue_response(&self, response: SmtpResponse) -> &Self {
        lock(&self.responses).push_back(response);
        self
    }

    /// Queues a single-line response with a generic message.
    pub fn queue_code(&self, code: u16) -> &Self {
        self.queue_response(SmtpResponse::new(code, "mock"))
    }

    /// Queues a multiline response built from raw lines.
    pub fn queue_lines(&self, lines: &[&str]) -> &Self {
        let lines: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
        self.queue_response(SmtpResponse::parse(&lines))
    }

    /// Sets the next call to fail.
    pub fn fail_next_with(&self, error: MailError) -> &Self {
        *lock(&self.fail_next) = Some(error);
        self
    }

    /// Returns recorded commands.
    pub fn recorded_commands(&self) -> Vec<SmtpCommand> {
        lock(&self.commands).clone()
    }

    /// Returns received data.
    pub fn received_data(&self) -> Vec<Vec<u8>> {
        lock(&self.data_received).clone()
    }

    /// Returns true once [`SmtpTransport::close`] was called.
    pub fn is_closed(&self) -> bool {
        *lock(&self.closed)
    }

    fn take_failure(&self) -> MailResult<()> {
        if let Some(error) = lock(&self.fail_next).take() {
            return Err(error);
        }
        if self.is_closed() {
            return Err(MailError::new(MailErrorKind::ConnectionClosed, "Connection is closed"));
        }
        Ok(())
    }

    fn get_next_response(&self) -> SmtpResponse {
        lock(&self.responses)
            .pop_front()
            .unwrap_or_else(|| self.default_response.clone())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SmtpTransport for MockTransport {
    async fn send_command(&mut self, command: &SmtpCommand) -> MailResult<SmtpResponse> {
        self.take_failure()?;
        lock(&self.commands).push(command.clone());
        Ok(self.get_next_response())
    }

    async fn send_data(&mut self, data: &[u8]) -> MailResult<()> {
        self.take_failure()?;
        lock(&self.data_received).push(data.to_vec());
        Ok(())
    }

    async fn read_response(&mut self) -> MailResult<SmtpResponse> {
        self.take_failure()?;
        Ok(self.get_next_response())
    }

    async fn upgrade_tls(&mut self) -> MailResult<()> {
        self.take_failure()?;
        *lock(&self.tls_enabled) = true;
        Ok(())
    }

    fn is_tls(&self) -> bool {
        *lock(&self.tls_enabled)
    }

    async fn close(&mut self) -> MailResult<()> {
        *lock(&self.closed) = true;
        Ok(())
    }
}

/// Creates a greeting response.
pub fn greeting_response() -> SmtpResponse {
    SmtpResponse::new(codes::SERVICE_READY, "smtp.example.com ESMTP ready")
}

/// Creates an EHLO response with a few capability lines.
pub fn ehlo_response() -> SmtpResponse {
    let lines: Vec<String> = [
        "250-smtp.example.com Hello",
        "250-SIZE 10485760",
        "250-AUTH LOGIN PLAIN",
        "250 STARTTLS",
    ]
    .iter()
    .map(|l| l.to_string())
    .collect();
    SmtpResponse::parse(&lines)
}
