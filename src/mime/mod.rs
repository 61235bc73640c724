//! MIME encoding for email messages.
//!
//! Builds the DATA payload of a [`Message`]:
//! - plain text only: a single `text/plain` body
//! - text and HTML: `multipart/alternative`
//! - attachments: `multipart/mixed` with the text parts first
//!
//! Also holds the text helpers the mailer applies when a body or subject is
//! set (markup stripping, word wrapping, RFC 2047 subject encoding).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, FixedOffset, Local};
use std::fmt;
use std::path::Path;
use uuid::Uuid;

use crate::errors::{MailError, MailErrorKind, MailResult};
use crate::types::Message;

/// Line terminator used on the wire.
pub const CRLF: &str = "\r\n";

/// Preamble written before the first boundary of a multipart body.
pub const MULTIPART_PREAMBLE: &str = "This is a multi-part message in MIME format.";

/// Width of base64 lines in attachment parts.
const BASE64_LINE_LENGTH: usize = 76;

/// MIME content types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentType {
    /// Plain text in the given charset.
    TextPlain(String),
    /// HTML in the given charset.
    TextHtml(String),
    /// Multipart alternative (text + HTML).
    MultipartAlternative(String),
    /// Multipart mixed (body + attachments).
    MultipartMixed(String),
    /// Opaque attachment with its file name.
    OctetStream(String),
}

impl ContentType {
    /// Returns the header value.
    pub fn mime_type(&self) -> String {
        match self {
            ContentType::TextPlain(charset) => format!("text/plain; charset=\"{}\"", charset),
            ContentType::TextHtml(charset) => format!("text/html; charset=\"{}\"", charset),
            ContentType::MultipartAlternative(boundary) => {
                format!("multipart/alternative; boundary=\"{}\"", boundary)
            }
            ContentType::MultipartMixed(boundary) => {
                format!("multipart/mixed; boundary=\"{}\"", boundary)
            }
            ContentType::OctetStream(name) => {
                format!("application/octet-stream; name=\"{}\"", name)
            }
        }
    }
}

/// Transfer encoding types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferEncoding {
    /// 7-bit ASCII (no encoding).
    SevenBit,
    /// 8-bit data.
    #[default]
    EightBit,
    /// Quoted-printable encoding.
    QuotedPrintable,
    /// Base64 encoding.
    Base64,
}

impl TransferEncoding {
    /// Returns the header value.
    pub fn header_value(&self) -> &'static str {
        match self {
            TransferEncoding::SevenBit => "7bit",
            TransferEncoding::EightBit => "8bit",
            TransferEncoding::QuotedPrintable => "quoted-printable",
            TransferEncoding::Base64 => "base64",
        }
    }

    /// Encodes a text body. The result uses CRLF line endings and ends
    /// with a line break.
    pub fn encode_body(&self, body: &str) -> String {
        let normalized = normalize_line_endings(body);
        let mut encoded = match self {
            TransferEncoding::SevenBit | TransferEncoding::EightBit => normalized,
            TransferEncoding::QuotedPrintable => {
                quoted_printable::encode_to_str(normalized.as_bytes())
            }
            TransferEncoding::Base64 => wrap_base64(normalized.as_bytes()),
        };
        if !encoded.ends_with(CRLF) {
            encoded.push_str(CRLF);
        }
        encoded
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.header_value())
    }
}

/// An attachment read from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Base name of the file.
    pub filename: String,
    /// File contents.
    pub data: Vec<u8>,
}

impl Attachment {
    /// Reads an attachment.
    ///
    /// Missing, unreadable and empty files are reported as
    /// [`MailErrorKind::AttachmentUnreadable`].
    pub fn load(path: &Path) -> MailResult<Self> {
        let data = std::fs::read(path).map_err(|e| {
            MailError::new(
                MailErrorKind::AttachmentUnreadable,
                format!("cannot read {}", path.display()),
            )
            .with_cause(e)
        })?;

        if data.is_empty() {
            return Err(MailError::new(
                MailErrorKind::AttachmentUnreadable,
                format!("{} is empty", path.display()),
            ));
        }

        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self { filename, data })
    }
}

/// MIME encoder for email messages.
pub struct MimeEncoder {
    /// Date for the message.
    date: DateTime<FixedOffset>,
    /// Boundary override; a fresh one is generated when unset.
    boundary: Option<String>,
}

impl MimeEncoder {
    /// Creates a new encoder dated now, in local time.
    pub fn new() -> Self {
        Self {
            date: Local::now().fixed_offset(),
            boundary: None,
        }
    }

    /// Uses a fixed date.
    pub fn with_date(mut self, date: DateTime<FixedOffset>) -> Self {
        self.date = date;
        self
    }

    /// Uses a fixed boundary.
    pub fn with_boundary(mut self, boundary: impl Into<String>) -> Self {
        self.boundary = Some(boundary.into());
        self
    }

    /// Encodes a message to headers and body, without dot-stuffing or the
    /// terminating line.
    pub fn encode(&self, message: &Message) -> Vec<u8> {
        let mut output = String::new();

        self.write_header(&mut output, "From", &message.from.to_header());
        self.write_header(&mut output, "Reply-To", &message.reply_address().to_header());
        self.write_header(&mut output, "Subject", &message.subject);
        self.write_header(&mut output, "Date", &self.format_date());

        if !message.to.is_empty() {
            self.write_header(&mut output, "To", &Self::address_list(&message.to));
        }

        if !message.cc.is_empty() {
            self.write_header(&mut output, "CC", &Self::address_list(&message.cc));
        }

        // Note: BCC is not included in headers

        if message.has_attachments() {
            let boundary = self.generate_boundary();
            self.write_multipart_start(
                &mut output,
                &ContentType::MultipartMixed(boundary.clone()),
                &boundary,
            );

            self.write_text_part(
                &mut output,
                ContentType::TextPlain(message.charset.clone()),
                &message.text_body,
                message,
            );

            if let Some(html) = message.html_body.as_deref().filter(|h| !h.is_empty()) {
                self.write_boundary(&mut output, &boundary);
                self.write_text_part(
                    &mut output,
                    ContentType::TextHtml(message.charset.clone()),
                    html,
                    message,
                );
            }

            for path in &message.attachments {
                match Attachment::load(path) {
                    Ok(attachment) => {
                        self.write_boundary(&mut output, &boundary);
                        self.write_attachment(&mut output, &attachment);
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "Skipping attachment");
                    }
                }
            }

            self.write_closing_boundary(&mut output, &boundary);
        } else if message.has_html() {
            let boundary = self.generate_boundary();
            self.write_multipart_start(
                &mut output,
                &ContentType::MultipartAlternative(boundary.clone()),
                &boundary,
            );

            self.write_text_part(
                &mut output,
                ContentType::TextPlain(message.charset.clone()),
                &message.text_body,
                message,
            );
            self.write_boundary(&mut output, &boundary);
            self.write_text_part(
                &mut output,
                ContentType::TextHtml(message.charset.clone()),
                message.html_body.as_deref().unwrap_or_default(),
                message,
            );

            self.write_closing_boundary(&mut output, &boundary);
        } else {
            self.write_text_part(
                &mut output,
                ContentType::TextPlain(message.charset.clone()),
                &message.text_body,
                message,
            );
        }

        output.into_bytes()
    }

    /// Encodes a message into the complete DATA payload.
    pub fn encode_payload(&self, message: &Message) -> Vec<u8> {
        Self::prepare_data_content(&self.encode(message))
    }

    /// Writes a header line.
    fn write_header(&self, output: &mut String, name: &str, value: &str) {
        output.push_str(name);
        output.push_str(": ");
        output.push_str(value);
        output.push_str(CRLF);
    }

    fn write_multipart_start(
        &self,
        output: &mut String,
        content_type: &ContentType,
        boundary: &str,
    ) {
        self.write_header(output, "MIME-Version", "1.0");
        self.write_header(output, "Content-Type", &content_type.mime_type());
        output.push_str(CRLF);
        output.push_str(MULTIPART_PREAMBLE);
        output.push_str(CRLF);
        self.write_boundary(output, boundary);
    }

    fn write_boundary(&self, output: &mut String, boundary: &str) {
        output.push_str("--");
        output.push_str(boundary);
        output.push_str(CRLF);
    }

    fn write_closing_boundary(&self, output: &mut String, boundary: &str) {
        output.push_str("--");
        output.push_str(boundary);
        output.push_str("--");
        output.push_str(CRLF);
    }

    /// Writes a text or HTML part: headers, blank line, encoded body.
    fn write_text_part(
        &self,
        output: &mut String,
        content_type: ContentType,
        body: &str,
        message: &Message,
    ) {
        self.write_header(output, "Content-Type", &content_type.mime_type());
        self.write_header(
            output,
            "Content-Transfer-Encoding",
            message.transfer_encoding.header_value(),
        );
        output.push_str(CRLF);
        output.push_str(&message.transfer_encoding.encode_body(body));
    }

    /// Writes an attachment.
    fn write_attachment(&self, output: &mut String, attachment: &Attachment) {
        let filename = escape_param(&attachment.filename);
        self.write_header(
            output,
            "Content-Type",
            &ContentType::OctetStream(filename.clone()).mime_type(),
        );
        self.write_header(
            output,
            "Content-Transfer-Encoding",
            TransferEncoding::Base64.header_value(),
        );
        self.write_header(
            output,
            "Content-Disposition",
            &format!("attachment; filename=\"{}\"", filename),
        );
        output.push_str(CRLF);
        output.push_str(&wrap_base64(&attachment.data));
    }

    fn address_list(addresses: &[crate::types::Address]) -> String {
        addresses
            .iter()
            .map(|a| a.to_header())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Generates a unique boundary.
    fn generate_boundary(&self) -> String {
        self.boundary
            .clone()
            .unwrap_or_else(|| format!("----=_Part_{}", Uuid::new_v4().simple()))
    }

    /// Formats the date for the Date header.
    fn format_date(&self) -> String {
        self.date.to_rfc2822()
    }

    /// Prepares the DATA content with dot-stuffing.
    pub fn prepare_data_content(encoded_email: &[u8]) -> Vec<u8> {
        let mut output = Vec::with_capacity(encoded_email.len() + 100);
        let mut at_line_start = true;

        for &byte in encoded_email {
            if at_line_start && byte == b'.' {
                // Dot-stuffing: double dots at start of line
                output.push(b'.');
            }

            output.push(byte);
            at_line_start = byte == b'\n';
        }

        // Ensure CRLF at end
        if !output.is_empty() && !output.ends_with(b"\r\n") {
            if output.ends_with(b"\n") {
                output.pop();
            }
            output.extend_from_slice(b"\r\n");
        }

        // End with <CRLF>.<CRLF>
        output.extend_from_slice(b".\r\n");

        output
    }
}

impl Default for MimeEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Base64 encodes `data` in lines of 76 characters, each ending in CRLF.
fn wrap_base64(data: &[u8]) -> String {
    let encoded = BASE64.encode(data);
    let line_breaks = encoded.len() / BASE64_LINE_LENGTH + 1;
    let mut output = String::with_capacity(encoded.len() + line_breaks * CRLF.len());
    for chunk in encoded.as_bytes().chunks(BASE64_LINE_LENGTH) {
        // base64 output is ASCII
        output.push_str(&String::from_utf8_lossy(chunk));
        output.push_str(CRLF);
    }
    output
}

/// Makes `value` safe inside a quoted header parameter: control characters
/// are dropped, `\` and `"` are backslash-escaped.
fn escape_param(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars().filter(|c| !c.is_control()) {
        if matches!(c, '"' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Converts bare LF (and existing CRLF) line breaks to CRLF.
pub fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\n', CRLF)
}

/// Encodes a subject as an RFC 2047 base64 encoded-word.
pub fn encode_subject(charset: &str, subject: &str) -> String {
    format!("=?{}?B?{}?=", charset, BASE64.encode(subject.as_bytes()))
}

/// Decodes a subject produced by [`encode_subject`].
pub fn decode_subject(encoded: &str) -> Option<String> {
    let inner = encoded.strip_prefix("=?")?.strip_suffix("?=")?;
    let mut parts = inner.splitn(3, '?');
    let _charset = parts.next()?;
    let encoding = parts.next()?;
    let data = parts.next()?;

    if !encoding.eq_ignore_ascii_case("B") {
        return None;
    }

    let bytes = BASE64.decode(data).ok()?;
    String::from_utf8(bytes).ok()
}

/// Removes markup tags from `text`.
///
/// A tag starts at `<` followed by an ASCII letter, `/`, `!` or `?` and runs
/// to the matching `>`, so comments and doctypes go too. A `>` inside a
/// quoted attribute value does not close the tag. Any other `<` is text.
pub fn strip_tags(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    let mut in_tag = false;
    let mut quote: Option<char> = None;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if !in_tag {
            let opens_tag = c == '<'
                && chars
                    .peek()
                    .is_some_and(|n| n.is_ascii_alphabetic() || matches!(n, '/' | '!' | '?'));
            if opens_tag {
                in_tag = true;
            } else {
                output.push(c);
            }
            continue;
        }

        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"') | (None, '\'') => quote = Some(c),
            (None, '>') => in_tag = false,
            _ => {}
        }
    }

    output
}

/// Wraps `text` at `width` columns by turning spaces into line breaks.
///
/// Existing line breaks are kept. Words longer than `width` are left
/// intact on their own line. A width of zero disables wrapping.
pub fn wordwrap(text: &str, width: usize) -> String {
    if width == 0 {
        return text.to_string();
    }

    let mut output = String::with_capacity(text.len());
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            output.push('\n');
        }

        let mut column = 0;
        for (j, word) in line.split(' ').enumerate() {
            let len = word.chars().count();
            if j == 0 {
                column = len;
            } else if column + 1 + len <= width {
                output.push(' ');
                column += 1 + len;
            } else {
                output.push('\n');
                column = len;
            }
            output.push_str(word);
        }
    }

    output
}
