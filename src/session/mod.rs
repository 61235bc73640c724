//! SMTP session state machine.
//!
//! One session drives one connection through greeting, optional STARTTLS,
//! HELO/EHLO, optional AUTH LOGIN, the envelope and the DATA payload, then
//! tears the connection down whatever the outcome.

use crate::auth::{Authenticator, Credentials};
use crate::config::{ConnectionConfig, ResponsePolicy, SecurityMode};
use crate::errors::{MailError, MailErrorKind, MailResult};
use crate::observability::WireLog;
use crate::protocol::{codes, SmtpCommand, SmtpResponse, TransactionState};
use crate::transport::SmtpTransport;
use crate::types::Message;

/// Drives a single message over an open transport.
#[derive(Debug)]
pub struct SmtpSession<T: SmtpTransport> {
    transport: T,
    state: TransactionState,
    security: SecurityMode,
    credentials: Option<Credentials>,
    local_hostname: String,
    policy: ResponsePolicy,
    wire: WireLog,
}

impl<T: SmtpTransport> SmtpSession<T> {
    /// Creates a session over a freshly opened transport.
    pub fn new(transport: T, config: &ConnectionConfig, wire: WireLog) -> Self {
        Self {
            transport,
            state: TransactionState::Initial,
            security: config.security,
            credentials: Credentials::from_config(config),
            local_hostname: config.local_hostname().to_string(),
            policy: config.response_policy,
            wire,
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Returns the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Runs the whole session: open, deliver, teardown.
    ///
    /// Teardown runs on every path, so the connection is closed whether the
    /// message was accepted or not.
    pub async fn send(&mut self, message: &Message, payload: &[u8]) -> MailResult<()> {
        let result = match self.open().await {
            Ok(()) => self.deliver(message, payload).await,
            Err(e) => Err(e),
        };
        self.teardown().await;
        result
    }

    /// Reads the greeting and negotiates TLS, HELO/EHLO and AUTH.
    pub async fn open(&mut self) -> MailResult<()> {
        let greeting = self.transport.read_response().await?;
        self.wire.response(&greeting.lines);
        Self::expect(
            &greeting,
            codes::SERVICE_READY,
            MailErrorKind::UnexpectedGreeting,
        )?;

        if self.transport.is_tls() {
            self.transition(TransactionState::TlsEstablished);
        } else {
            self.transition(TransactionState::Connected);
        }

        if self.security == SecurityMode::StartTls {
            debug_assert!(self.state.can_start_tls());
            let response = self.command(&SmtpCommand::StartTls).await?;
            Self::expect(&response, codes::SERVICE_READY, MailErrorKind::StartTlsRejected)?;
            self.transport.upgrade_tls().await?;
            self.transition(TransactionState::TlsEstablished);
        }

        let hostname = self.local_hostname.clone();
        match self.credentials.clone() {
            Some(credentials) => {
                let response = self.command(&SmtpCommand::Ehlo(hostname)).await?;
                Self::expect(&response, codes::OK, MailErrorKind::GreetingRejected)?;
                self.transition(TransactionState::Greeted);

                self.authenticate(&credentials).await?;
                self.transition(TransactionState::Authenticated);
            }
            None => {
                let response = self.command(&SmtpCommand::Helo(hostname)).await?;
                Self::expect(&response, codes::OK, MailErrorKind::GreetingRejected)?;
                self.transition(TransactionState::Greeted);
            }
        }

        Ok(())
    }

    async fn authenticate(&mut self, credentials: &Credentials) -> MailResult<()> {
        debug_assert!(self.state.can_authenticate());
        let [start, user, pass] = Authenticator::login_sequence(credentials);
        let steps = [
            (start, codes::AUTH_CONTINUE),
            (user, codes::AUTH_CONTINUE),
            (pass, codes::AUTH_SUCCESS),
        ];

        for (command, expected) in &steps {
            let response = self.command(command).await?;
            Self::expect(&response, *expected, MailErrorKind::AuthenticationFailed)?;
        }

        Ok(())
    }

    /// Sends the envelope and the payload.
    ///
    /// Under [`ResponsePolicy::Lenient`] the replies to `MAIL FROM`,
    /// `RCPT TO` and `DATA` are read but not checked; only the final reply
    /// to the payload decides the outcome.
    pub async fn deliver(&mut self, message: &Message, payload: &[u8]) -> MailResult<()> {
        debug_assert!(self.state.can_start_mail());

        let response = self
            .command(&SmtpCommand::MailFrom {
                address: message.from.to_smtp(),
            })
            .await?;
        self.check(&response, &[codes::OK], MailErrorKind::SenderRejected)?;
        self.transition(TransactionState::InTransaction);

        for recipient in message.all_recipients() {
            debug_assert!(self.state.can_add_recipient());
            let response = self
                .command(&SmtpCommand::RcptTo {
                    address: recipient.to_smtp(),
                })
                .await?;
            self.check(
                &response,
                &[codes::OK, codes::USER_NOT_LOCAL_WILL_FORWARD],
                MailErrorKind::RecipientRejected,
            )?;
            self.transition(TransactionState::RecipientsAdded);
        }

        if !self.state.can_send_data() {
            return Err(MailError::new(
                MailErrorKind::NoRecipients,
                "DATA needs at least one accepted RCPT TO",
            ));
        }

        let response = self.command(&SmtpCommand::Data).await?;
        self.check(&response, &[codes::START_MAIL_INPUT], MailErrorKind::DataRejected)?;
        self.transition(TransactionState::SendingData);

        self.wire.payload(payload);
        self.transport.send_data(payload).await?;
        let response = self.transport.read_response().await?;
        self.wire.response(&response.lines);
        Self::expect(&response, codes::OK, MailErrorKind::MessageRejected)?;
        self.transition(TransactionState::Complete);

        Ok(())
    }

    /// Sends `QUIT` and closes the connection. Errors are ignored.
    pub async fn teardown(&mut self) {
        if self.state == TransactionState::Closed {
            return;
        }

        if let Err(e) = self.command(&SmtpCommand::Quit).await {
            tracing::trace!(error = %e, "QUIT failed");
        }
        if let Err(e) = self.transport.close().await {
            tracing::trace!(error = %e, "Close failed");
        }
        self.transition(TransactionState::Closed);
    }

    async fn command(&mut self, command: &SmtpCommand) -> MailResult<SmtpResponse> {
        self.wire.command(command);
        let response = self.transport.send_command(command).await?;
        self.wire.response(&response.lines);
        Ok(response)
    }

    fn expect(response: &SmtpResponse, expected: u16, kind: MailErrorKind) -> MailResult<()> {
        if response.is(expected) {
            Ok(())
        } else {
            Err(MailError::unexpected_reply(
                kind,
                expected,
                response.code,
                &response.full_text(),
            ))
        }
    }

    fn check(
        &self,
        response: &SmtpResponse,
        accepted: &[u16],
        kind: MailErrorKind,
    ) -> MailResult<()> {
        match self.policy {
            ResponsePolicy::Lenient => Ok(()),
            ResponsePolicy::Strict if accepted.contains(&response.code) => Ok(()),
            ResponsePolicy::Strict => Err(MailError::unexpected_reply(
                kind,
                accepted[0],
                response.code,
                &response.full_text(),
            )),
        }
    }

    fn transition(&mut self, next: TransactionState) {
        tracing::trace!(from = %self.state, to = %next, "SMTP state transition");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockTransport;
    use crate::observability::Transcript;
    use crate::types::Address;

    fn config() -> ConnectionConfig {
        ConnectionConfig::builder()
            .host("mail.example.com")
            .from("sender@example.com", None)
            .local_hostname("client.example.com")
            .build()
            .unwrap()
    }

    fn auth_config() -> ConnectionConfig {
        ConnectionConfig::builder()
            .host("mail.example.com")
            .from("sender@example.com", None)
            .local_hostname("client.example.com")
            .credentials("user", "password")
            .security(SecurityMode::StartTls)
            .build()
            .unwrap()
    }

    fn message() -> Message {
        let mut message = Message::new(Address::new("sender@example.com"));
        message.to.push(Address::new("to@example.com"));
        message.cc.push(Address::new("cc@example.com"));
        message.bcc.push(Address::new("bcc@example.com"));
        message
    }

    fn commands(session: &SmtpSession<MockTransport>) -> Vec<String> {
        session
            .transport()
            .recorded_commands()
            .iter()
            .map(|c| c.to_smtp_string())
            .collect()
    }

    #[tokio::test]
    async fn test_plain_session() {
        let transport = MockTransport::new();
        transport
            .queue_code(220)
            .queue_code(250)
            .queue_code(250)
            .queue_code(250)
            .queue_code(250)
            .queue_code(250)
            .queue_code(354)
            .queue_code(250)
            .queue_code(221);

        let mut session = SmtpSession::new(transport, &config(), WireLog::default());
        session.send(&message(), b"payload\r\n.\r\n").await.unwrap();

        assert_eq!(
            commands(&session),
            vec![
                "HELO client.example.com",
                "MAIL FROM:<sender@example.com>",
                "RCPT TO:<to@example.com>",
                "RCPT TO:<cc@example.com>",
                "RCPT TO:<bcc@example.com>",
                "DATA",
                "QUIT",
            ]
        );
        assert_eq!(session.transport().received_data(), vec![b"payload\r\n.\r\n".to_vec()]);
        assert!(session.transport().is_closed());
        assert_eq!(session.state(), TransactionState::Closed);
    }

    #[tokio::test]
    async fn test_starttls_and_auth_session() {
        let transport = MockTransport::new();
        for code in [220, 220, 250, 334, 334, 235, 250, 250, 250, 250, 354, 250, 221] {
            transport.queue_code(code);
        }

        let transcript = Transcript::new();
        let wire = WireLog::new(true, Some(transcript.clone()));
        let mut session = SmtpSession::new(transport, &auth_config(), wire);
        session.send(&message(), b".\r\n").await.unwrap();

        let sent = commands(&session);
        assert_eq!(
            &sent[..5],
            &[
                "STARTTLS",
                "EHLO client.example.com",
                "AUTH LOGIN",
                "dXNlcg==",
                "cGFzc3dvcmQ=",
            ]
        );
        assert!(session.transport().is_tls());

        let logged = transcript.commands();
        assert!(logged.contains(&"dXNlcg==".to_string()));
        assert!(logged.contains(&crate::protocol::REDACTED.to_string()));
        assert!(!logged.contains(&"cGFzc3dvcmQ=".to_string()));
    }

    #[tokio::test]
    async fn test_wrong_greeting_still_closes() {
        let transport = MockTransport::new();
        transport.queue_code(554);

        let mut session = SmtpSession::new(transport, &config(), WireLog::default());
        let err = session.send(&message(), b".\r\n").await.unwrap_err();

        assert_eq!(err.kind(), MailErrorKind::UnexpectedGreeting);
        assert_eq!(err.smtp_code(), Some(554));
        assert_eq!(commands(&session), vec!["QUIT"]);
        assert!(session.transport().is_closed());
    }

    #[tokio::test]
    async fn test_multiline_ehlo_reply() {
        let transport = MockTransport::new();
        transport.queue_code(220).queue_code(220).queue_lines(&[
            "250-mail.example.com Hello",
            "250-SIZE 10485760",
            "250 AUTH LOGIN",
        ]);
        for code in [334, 334, 235, 250, 250, 250, 250, 354, 250, 221] {
            transport.queue_code(code);
        }

        let mut session = SmtpSession::new(transport, &auth_config(), WireLog::default());
        session.send(&message(), b".\r\n").await.unwrap();
        assert_eq!(session.state(), TransactionState::Closed);
    }

    #[tokio::test]
    async fn test_no_recipients_stops_before_data() {
        let transport = MockTransport::new();
        for code in [220, 250, 250, 221] {
            transport.queue_code(code);
        }

        let mut session = SmtpSession::new(transport, &config(), WireLog::default());
        let empty = Message::new(Address::new("sender@example.com"));
        let err = session.send(&empty, b".\r\n").await.unwrap_err();

        assert_eq!(err.kind(), MailErrorKind::NoRecipients);
        assert!(!commands(&session).contains(&"DATA".to_string()));
        assert!(session.transport().received_data().is_empty());
        assert!(session.transport().is_closed());
    }

    #[tokio::test]
    async fn test_auth_failure() {
        let transport = MockTransport::new();
        for code in [220, 220, 250, 334, 334, 535] {
            transport.queue_code(code);
        }

        let mut session = SmtpSession::new(transport, &auth_config(), WireLog::default());
        let err = session.send(&message(), b".\r\n").await.unwrap_err();

        assert_eq!(err.kind(), MailErrorKind::AuthenticationFailed);
        assert!(!commands(&session).iter().any(|c| c.starts_with("MAIL FROM")));
        assert!(session.transport().is_closed());
    }

    #[tokio::test]
    async fn test_starttls_rejected() {
        let transport = MockTransport::new();
        transport.queue_code(220).queue_code(454);

        let mut session = SmtpSession::new(transport, &auth_config(), WireLog::default());
        let err = session.send(&message(), b".\r\n").await.unwrap_err();

        assert_eq!(err.kind(), MailErrorKind::StartTlsRejected);
        assert!(!session.transport().is_tls());
    }

    #[tokio::test]
    async fn test_lenient_ignores_envelope_rejections() {
        let transport = MockTransport::new();
        for code in [220, 250, 550, 550, 550, 550, 500, 250, 221] {
            transport.queue_code(code);
        }

        let mut session = SmtpSession::new(transport, &config(), WireLog::default());
        assert!(session.send(&message(), b".\r\n").await.is_ok());
    }

    #[tokio::test]
    async fn test_strict_rejects_recipient() {
        let mut config = config();
        config.response_policy = ResponsePolicy::Strict;

        let transport = MockTransport::new();
        for code in [220, 250, 250, 251, 550] {
            transport.queue_code(code);
        }

        let mut session = SmtpSession::new(transport, &config, WireLog::default());
        let err = session.send(&message(), b".\r\n").await.unwrap_err();

        assert_eq!(err.kind(), MailErrorKind::RecipientRejected);
        assert_eq!(err.smtp_code(), Some(550));
        assert!(!commands(&session).contains(&"DATA".to_string()));
        assert_eq!(commands(&session).last().map(String::as_str), Some("QUIT"));
    }

    #[tokio::test]
    async fn test_message_rejected() {
        let transport = MockTransport::new();
        for code in [220, 250, 250, 250, 250, 250, 354, 554] {
            transport.queue_code(code);
        }

        let mut session = SmtpSession::new(transport, &config(), WireLog::default());
        let err = session.send(&message(), b".\r\n").await.unwrap_err();
        assert_eq!(err.kind(), MailErrorKind::MessageRejected);
        assert!(session.transport().is_closed());
    }

    #[tokio::test]
    async fn test_io_error_still_closes() {
        let transport = MockTransport::new();
        transport.queue_code(220);
        transport.fail_next_with(MailError::new(MailErrorKind::ConnectionClosed, "gone"));

        let mut session = SmtpSession::new(transport, &config(), WireLog::default());
        let err = session.send(&message(), b".\r\n").await.unwrap_err();

        assert_eq!(err.kind(), MailErrorKind::ConnectionClosed);
        assert!(session.transport().is_closed());
    }
}
