//! AUTH LOGIN support.
//!
//! The mailer authenticates with the LOGIN mechanism only: the server sends
//! two `334` challenges and the client answers with the base64 username and
//! then the base64 password.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;

use crate::config::ConnectionConfig;
use crate::protocol::SmtpCommand;

/// Username and password for AUTH LOGIN.
#[derive(Clone)]
pub struct Credentials {
    /// Username.
    pub username: String,
    /// Password (protected).
    pub password: SecretString,
}

impl Credentials {
    /// Creates credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::new(password.into()),
        }
    }

    /// Takes the credentials from a connection, if it requires auth.
    pub fn from_config(config: &ConnectionConfig) -> Option<Self> {
        config.auth_required.then(|| Self {
            username: config.user.clone(),
            password: config.pass.clone(),
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Builds the AUTH LOGIN exchange.
pub struct Authenticator;

impl Authenticator {
    /// Generates LOGIN username response.
    pub fn login_username(username: &str) -> String {
        BASE64.encode(username)
    }

    /// Generates LOGIN password response.
    pub fn login_password(password: &SecretString) -> String {
        BASE64.encode(password.expose_secret())
    }

    /// Returns the three commands of the exchange, in order.
    ///
    /// The password line is flagged sensitive so logs never carry it.
    pub fn login_sequence(credentials: &Credentials) -> [SmtpCommand; 3] {
        [
            SmtpCommand::AuthLogin,
            SmtpCommand::AuthResponse {
                encoded: Self::login_username(&credentials.username),
                sensitive: false,
            },
            SmtpCommand::AuthResponse {
                encoded: Self::login_password(&credentials.password),
                sensitive: true,
            },
        ]
    }
}
