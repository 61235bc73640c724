//! SMTP protocol implementation.
//!
//! Commands the mailer issues, response parsing and the session states
//! a send walks through.

use std::fmt;

/// Placeholder written to logs instead of credential lines.
pub const REDACTED: &str = "<redacted>";

/// SMTP commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    /// Extended HELLO with client identity.
    Ehlo(String),
    /// Basic HELLO.
    Helo(String),
    /// Start TLS negotiation.
    StartTls,
    /// Start the LOGIN mechanism.
    AuthLogin,
    /// A base64 line answering an AUTH challenge.
    AuthResponse {
        /// Encoded payload.
        encoded: String,
        /// Hidden from logs and transcripts.
        sensitive: bool,
    },
    /// MAIL FROM command.
    MailFrom {
        /// Sender address, already wrapped in angle brackets.
        address: String,
    },
    /// RCPT TO command.
    RcptTo {
        /// Recipient address, already wrapped in angle brackets.
        address: String,
    },
    /// DATA command.
    Data,
    /// Quit connection.
    Quit,
}

impl SmtpCommand {
    /// Formats the command for sending.
    pub fn to_smtp_string(&self) -> String {
        match self {
            SmtpCommand::Ehlo(domain) => format!("EHLO {}", domain),
            SmtpCommand::Helo(domain) => format!("HELO {}", domain),
            SmtpCommand::StartTls => "STARTTLS".to_string(),
            SmtpCommand::AuthLogin => "AUTH LOGIN".to_string(),
            SmtpCommand::AuthResponse { encoded, .. } => encoded.clone(),
            SmtpCommand::MailFrom { address } => format!("MAIL FROM:{}", address),
            SmtpCommand::RcptTo { address } => format!("RCPT TO:{}", address),
            SmtpCommand::Data => "DATA".to_string(),
            SmtpCommand::Quit => "QUIT".to_string(),
        }
    }

    /// Formats the command for logs, hiding sensitive lines.
    pub fn to_log_string(&self) -> String {
        match self {
            SmtpCommand::AuthResponse { sensitive: true, .. } => REDACTED.to_string(),
            other => other.to_smtp_string(),
        }
    }
}

impl fmt::Display for SmtpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_log_string())
    }
}

/// Returns true if `line` (without its line terminator) ends a response.
///
/// A line ends the response when its 4th character is a space or when it
/// has no 4th character at all. Anything else, normally `-`, continues it.
pub fn is_final_line(line: &str) -> bool {
    match line.as_bytes().get(3) {
        None => true,
        Some(b) => *b == b' ',
    }
}

/// SMTP response from server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpResponse {
    /// Status code taken from the first line; `0` when it is not numeric.
    pub code: u16,
    /// Raw lines as received, without terminators.
    pub lines: Vec<String>,
}

impl SmtpResponse {
    /// Creates a single-line response.
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        let line = if message.is_empty() {
            format!("{:03}", code)
        } else {
            format!("{:03} {}", code, message)
        };
        Self { code, lines: vec![line] }
    }

    /// Parses a response from raw lines.
    ///
    /// Only the first three characters of the first line are interpreted.
    /// Continuation lines are kept but never checked.
    pub fn parse(lines: &[String]) -> Self {
        let code = lines
            .first()
            .and_then(|line| line.get(..3))
            .filter(|digits| digits.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|digits| digits.parse().ok())
            .unwrap_or(0);

        Self {
            code,
            lines: lines.to_vec(),
        }
    }

    /// Returns true if the code equals `expected`.
    pub fn is(&self, expected: u16) -> bool {
        self.code == expected
    }

    /// Returns true if this is a success response (2xx).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Returns true if the response spans more than one line.
    pub fn is_multiline(&self) -> bool {
        self.lines.len() > 1
    }

    /// Returns the text after the code on the first line.
    pub fn first_message(&self) -> &str {
        self.lines
            .first()
            .and_then(|line| line.get(4..))
            .unwrap_or("")
    }

    /// Returns all raw lines joined with spaces, for error messages.
    pub fn full_text(&self) -> String {
        self.lines.join(" ")
    }
}

impl fmt::Display for SmtpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.lines.first().map(String::as_str).unwrap_or(""))
    }
}

/// State of one SMTP session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Nothing opened yet.
    Initial,
    /// Connected, received server greeting.
    Connected,
    /// TLS established (implicit or after STARTTLS).
    TlsEstablished,
    /// HELO/EHLO accepted.
    Greeted,
    /// AUTH LOGIN completed.
    Authenticated,
    /// MAIL FROM sent.
    InTransaction,
    /// At least one RCPT TO sent.
    RecipientsAdded,
    /// DATA sent, payload pending.
    SendingData,
    /// Payload accepted.
    Complete,
    /// Connection closed.
    Closed,
}

impl TransactionState {
    /// Returns true if STARTTLS is allowed in this state.
    pub fn can_start_tls(&self) -> bool {
        matches!(self, TransactionState::Connected)
    }

    /// Returns true if authentication is allowed in this state.
    pub fn can_authenticate(&self) -> bool {
        matches!(self, TransactionState::Greeted)
    }

    /// Returns true if MAIL FROM is allowed in this state.
    pub fn can_start_mail(&self) -> bool {
        matches!(
            self,
            TransactionState::Greeted | TransactionState::Authenticated
        )
    }

    /// Returns true if RCPT TO is allowed in this state.
    pub fn can_add_recipient(&self) -> bool {
        matches!(
            self,
            TransactionState::InTransaction | TransactionState::RecipientsAdded
        )
    }

    /// Returns true if DATA is allowed in this state.
    pub fn can_send_data(&self) -> bool {
        matches!(self, TransactionState::RecipientsAdded)
    }

    /// Returns true while a socket is open.
    pub fn is_open(&self) -> bool {
        !matches!(self, TransactionState::Initial | TransactionState::Closed)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Response codes used by the session.
pub mod codes {
    /// Service ready.
    pub const SERVICE_READY: u16 = 220;
    /// Authentication successful.
    pub const AUTH_SUCCESS: u16 = 235;
    /// OK.
    pub const OK: u16 = 250;
    /// User not local; will forward.
    pub const USER_NOT_LOCAL_WILL_FORWARD: u16 = 251;
    /// Continue (AUTH).
    pub const AUTH_CONTINUE: u16 = 334;
    /// Start mail input.
    pub const START_MAIL_INPUT: u16 = 354;
}
