//! Core types for the mailer.
//!
//! This module provides:
//! - [`Address`] with header/envelope formatting
//! - [`IntoAddresses`], the scalar-or-list input accepted by recipient setters
//! - [`Message`], the state a send serialises

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::mime::TransferEncoding;

/// Default message charset.
pub const DEFAULT_CHARSET: &str = "UTF-8";

/// Default text body wrap width.
pub const DEFAULT_WORDWRAP: usize = 70;

/// Email address with optional display name.
///
/// Addresses are not validated; whatever the caller supplies is sent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    /// Display name (e.g., "John Doe").
    pub name: Option<String>,
    /// Email address (e.g., "john@example.com").
    pub email: String,
}

impl Address {
    /// Creates a new address with just an email.
    pub fn new(email: impl Into<String>) -> Self {
        Self { name: None, email: email.into() }
    }

    /// Creates a new address with display name and email.
    pub fn with_name(name: impl Into<String>, email: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            name: if name.is_empty() { None } else { Some(name) },
            email: email.into(),
        }
    }

    /// Returns the email part only.
    pub fn email(&self) -> &str {
        &self.email
    }

    /// Returns the display name if present.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref().filter(|n| !n.is_empty())
    }

    /// Formats the address for `MAIL FROM`/`RCPT TO`.
    pub fn to_smtp(&self) -> String {
        format!("<{}>", self.email)
    }

    /// Formats the address for headers: `Name <email>` or `<email>`.
    pub fn to_header(&self) -> String {
        match self.name() {
            Some(name) => format!("{} <{}>", name, self.email),
            None => self.to_smtp(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_header())
    }
}

impl From<&str> for Address {
    fn from(email: &str) -> Self {
        Address::new(email)
    }
}

impl From<String> for Address {
    fn from(email: String) -> Self {
        Address::new(email)
    }
}

impl From<&String> for Address {
    fn from(email: &String) -> Self {
        Address::new(email.as_str())
    }
}

impl From<&Address> for Address {
    fn from(address: &Address) -> Self {
        address.clone()
    }
}

impl From<(&str, &str)> for Address {
    fn from((email, name): (&str, &str)) -> Self {
        Address::with_name(name, email)
    }
}

impl From<(String, String)> for Address {
    fn from((email, name): (String, String)) -> Self {
        Address::with_name(name, email)
    }
}

impl From<(&str, Option<&str>)> for Address {
    fn from((email, name): (&str, Option<&str>)) -> Self {
        Address::with_name(name.unwrap_or_default(), email)
    }
}

impl From<[&str; 1]> for Address {
    fn from([email]: [&str; 1]) -> Self {
        Address::new(email)
    }
}

impl From<[&str; 2]> for Address {
    fn from([email, name]: [&str; 2]) -> Self {
        Address::with_name(name, email)
    }
}

/// Input accepted by the recipient setters: one address or a list of them.
///
/// Scalars are a bare email (`&str`/`String`), an [`Address`] or an
/// `(email, name)` tuple. Lists are `Vec`, arrays and slices whose elements
/// are any scalar or an `[email]`/`[email, name]` array. A bare `[&str; 2]`
/// is therefore a list of two emails, not an email/name pair.
pub trait IntoAddresses {
    /// Normalises the input into an ordered list of addresses.
    fn into_addresses(self) -> Vec<Address>;
}

impl IntoAddresses for Address {
    fn into_addresses(self) -> Vec<Address> {
        vec![self]
    }
}

impl IntoAddresses for &str {
    fn into_addresses(self) -> Vec<Address> {
        vec![self.into()]
    }
}

impl IntoAddresses for String {
    fn into_addresses(self) -> Vec<Address> {
        vec![self.into()]
    }
}

impl IntoAddresses for (&str, &str) {
    fn into_addresses(self) -> Vec<Address> {
        vec![self.into()]
    }
}

impl IntoAddresses for (String, String) {
    fn into_addresses(self) -> Vec<Address> {
        vec![self.into()]
    }
}

impl<T: Into<Address>> IntoAddresses for Vec<T> {
    fn into_addresses(self) -> Vec<Address> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<T: Into<Address>, const N: usize> IntoAddresses for [T; N] {
    fn into_addresses(self) -> Vec<Address> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<T: Into<Address> + Clone> IntoAddresses for &[T] {
    fn into_addresses(self) -> Vec<Address> {
        self.iter().cloned().map(Into::into).collect()
    }
}

/// Input accepted by [`crate::Mailer::attach`]: one path or a list of them.
pub trait IntoPaths {
    /// Collects the input into paths, keeping order.
    fn into_paths(self) -> Vec<PathBuf>;
}

impl IntoPaths for &str {
    fn into_paths(self) -> Vec<PathBuf> {
        vec![PathBuf::from(self)]
    }
}

impl IntoPaths for String {
    fn into_paths(self) -> Vec<PathBuf> {
        vec![PathBuf::from(self)]
    }
}

impl IntoPaths for &std::path::Path {
    fn into_paths(self) -> Vec<PathBuf> {
        vec![self.to_path_buf()]
    }
}

impl IntoPaths for PathBuf {
    fn into_paths(self) -> Vec<PathBuf> {
        vec![self]
    }
}

impl<T: Into<PathBuf>> IntoPaths for Vec<T> {
    fn into_paths(self) -> Vec<PathBuf> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<T: Into<PathBuf>, const N: usize> IntoPaths for [T; N] {
    fn into_paths(self) -> Vec<PathBuf> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<T: Into<PathBuf> + Clone> IntoPaths for &[T] {
    fn into_paths(self) -> Vec<PathBuf> {
        self.iter().cloned().map(Into::into).collect()
    }
}

/// A message ready to be serialised.
///
/// `subject` is stored already encoded and `text_body` already stripped and
/// wrapped; [`crate::Mailer`] applies those transformations in its setters.
#[derive(Debug, Clone)]
pub struct Message {
    /// Sender address.
    pub from: Address,
    /// Reply-to address; `from` is used when unset.
    pub reply_to: Option<Address>,
    /// Primary recipients.
    pub to: Vec<Address>,
    /// CC recipients.
    pub cc: Vec<Address>,
    /// BCC recipients (envelope only).
    pub bcc: Vec<Address>,
    /// Encoded subject.
    pub subject: String,
    /// Plain text body.
    pub text_body: String,
    /// HTML body.
    pub html_body: Option<String>,
    /// Attachment paths in the order they were added.
    pub attachments: Vec<PathBuf>,
    /// Charset of the text parts and subject.
    pub charset: String,
    /// Transfer encoding of the text parts.
    pub transfer_encoding: TransferEncoding,
    /// Wrap width applied to the text body.
    pub wordwrap: usize,
}

impl Message {
    /// Creates an empty message from the given sender.
    pub fn new(from: Address) -> Self {
        Self {
            from,
            reply_to: None,
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: String::new(),
            text_body: String::new(),
            html_body: None,
            attachments: Vec::new(),
            charset: DEFAULT_CHARSET.to_string(),
            transfer_encoding: TransferEncoding::default(),
            wordwrap: DEFAULT_WORDWRAP,
        }
    }

    /// Returns the address written to `Reply-To`.
    pub fn reply_address(&self) -> &Address {
        self.reply_to.as_ref().unwrap_or(&self.from)
    }

    /// Returns all envelope recipients (to, then cc, then bcc).
    pub fn all_recipients(&self) -> impl Iterator<Item = &Address> {
        self.to.iter().chain(self.cc.iter()).chain(self.bcc.iter())
    }

    /// Returns the count of all recipients.
    pub fn recipient_count(&self) -> usize {
        self.to.len() + self.cc.len() + self.bcc.len()
    }

    /// Returns true if the message has any attachments.
    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }

    /// Returns true if the message has an HTML body.
    pub fn has_html(&self) -> bool {
        self.html_body.as_deref().is_some_and(|h| !h.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_formatting() {
        assert_eq!(Address::new("a@example.com").to_header(), "<a@example.com>");
        assert_eq!(
            Address::with_name("Jane Doe", "jane@example.com").to_header(),
            "Jane Doe <jane@example.com>"
        );
        assert_eq!(Address::with_name("", "a@example.com").to_header(), "<a@example.com>");
        assert_eq!(Address::new("a@example.com").to_smtp(), "<a@example.com>");
    }

    #[test]
    fn test_address_not_validated() {
        let addr = Address::new("not an address");
        assert_eq!(addr.email(), "not an address");
        assert_eq!(addr.to_smtp(), "<not an address>");
    }

    #[test]
    fn test_scalar_and_list_forms_normalise() {
        let expected = vec![Address::new("a@example.com")];
        assert_eq!("a@example.com".into_addresses(), expected);
        assert_eq!(String::from("a@example.com").into_addresses(), expected);
        assert_eq!(vec!["a@example.com"].into_addresses(), expected);
        assert_eq!([["a@example.com"]].into_addresses(), expected);

        let named = vec![Address::with_name("A", "a@example.com")];
        assert_eq!(("a@example.com", "A").into_addresses(), named);
        assert_eq!([["a@example.com", "A"]].into_addresses(), named);
        assert_eq!(vec![("a@example.com", "A")].into_addresses(), named);
        assert_eq!(
            (String::from("a@example.com"), String::from("A")).into_addresses(),
            named
        );
    }

    #[test]
    fn test_list_preserves_order() {
        let list = ["b@example.com", "a@example.com"];
        let addresses = (&list[..]).into_addresses();
        assert_eq!(addresses[0].email, "b@example.com");
        assert_eq!(addresses[1].email, "a@example.com");
    }

    #[test]
    fn test_paths_single_and_list() {
        assert_eq!("a.txt".into_paths(), vec![PathBuf::from("a.txt")]);
        assert_eq!(
            vec!["a.txt", "b.txt"].into_paths(),
            vec![PathBuf::from("a.txt"), PathBuf::from("b.txt")]
        );
        assert_eq!([PathBuf::from("c.pdf")].into_paths(), vec![PathBuf::from("c.pdf")]);
    }

    #[test]
    fn test_reply_falls_back_to_from() {
        let mut message = Message::new(Address::new("from@example.com"));
        assert_eq!(message.reply_address().email, "from@example.com");

        message.reply_to = Some(Address::new("reply@example.com"));
        assert_eq!(message.reply_address().email, "reply@example.com");
    }

    #[test]
    fn test_all_recipients_order() {
        let mut message = Message::new(Address::new("from@example.com"));
        message.bcc.push(Address::new("bcc@example.com"));
        message.cc.push(Address::new("cc@example.com"));
        message.to.push(Address::new("to@example.com"));

        let order: Vec<_> = message.all_recipients().map(|a| a.email.as_str()).collect();
        assert_eq!(order, ["to@example.com", "cc@example.com", "bcc@example.com"]);
        assert_eq!(message.recipient_count(), 3);
    }
}
