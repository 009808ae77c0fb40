//! Message model and wire serialization.
//!
//! A [`Message`] accumulates sender, recipients, subject, body, and named
//! binary attachments, then serializes to the byte stream handed to the
//! relay during the data phase. Attachments are carried as a
//! `multipart/mixed` body with a fixed boundary marker and base64-encoded
//! parts; a message without attachments serializes as a plain single-part
//! body.
//!
//! Address syntax is not validated here. Building a message never fails;
//! callers that need syntax checks should run addresses through an address
//! parser before adding them.

use std::collections::BTreeMap;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Local;

use crate::errors::{MailError, MailErrorKind, MailResult};

/// Boundary marker separating the parts of a multipart message.
///
/// Fixed for every message this library produces; part of the wire format
/// contract. A body that happens to contain this exact string on a line of
/// its own would corrupt the part structure.
pub const BOUNDARY: &str = "mnwKuycHoXCwn9S5UY6avz8ZGJPEeUdMPS";

/// Content type of the primary message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// `text/plain` body.
    Plain,
    /// `text/html` body.
    Html,
}

impl ContentKind {
    /// Returns the MIME type string.
    pub fn mime_type(&self) -> &'static str {
        match self {
            ContentKind::Plain => "text/plain",
            ContentKind::Html => "text/html",
        }
    }
}

/// An email message: headers, body, and attachments.
///
/// The `Date` header value is captured once at construction, so repeated
/// serialization of an unchanged message yields identical bytes.
#[derive(Debug, Clone)]
pub struct Message {
    from: String,
    sender_name: String,
    to: Vec<String>,
    cc: Vec<String>,
    bcc: Vec<String>,
    date: String,
    subject: String,
    body: String,
    content: ContentKind,
    attachments: BTreeMap<String, Vec<u8>>,
}

impl Message {
    /// Creates a new `text/plain` message.
    pub fn new(
        from: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self::with_content(from, subject, body, ContentKind::Plain)
    }

    /// Creates a new `text/html` message.
    pub fn new_html(
        from: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self::with_content(from, subject, body, ContentKind::Html)
    }

    fn with_content(
        from: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
        content: ContentKind,
    ) -> Self {
        Self {
            from: from.into(),
            sender_name: String::new(),
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            date: Local::now().format("%a, %d %b %Y %H:%M:%S %z").to_string(),
            subject: subject.into(),
            body: body.into(),
            content,
            attachments: BTreeMap::new(),
        }
    }

    /// Adds a primary recipient.
    pub fn add_to(&mut self, address: impl Into<String>) {
        self.to.push(address.into());
    }

    /// Adds a carbon-copy recipient.
    pub fn add_cc(&mut self, address: impl Into<String>) {
        self.cc.push(address.into());
    }

    /// Adds a blind-copy recipient.
    pub fn add_bcc(&mut self, address: impl Into<String>) {
        self.bcc.push(address.into());
    }

    /// Sets the sender's display name.
    pub fn set_sender_name(&mut self, name: impl Into<String>) {
        self.sender_name = name.into();
    }

    /// Adds an attachment under the given file name.
    ///
    /// Adding a second attachment with the same name replaces the first.
    pub fn add_attachment(&mut self, filename: impl Into<String>, content: Vec<u8>) {
        self.attachments.insert(filename.into(), content);
    }

    /// Reads a file and attaches its contents under the path as given.
    pub fn attach_file(&mut self, path: impl AsRef<Path>) -> MailResult<()> {
        let path = path.as_ref();
        let content = std::fs::read(path).map_err(|e| {
            MailError::new(
                MailErrorKind::Attachment,
                format!("failed to read {}", path.display()),
            )
            .with_cause(e)
        })?;
        self.attachments.insert(path.display().to_string(), content);
        Ok(())
    }

    /// Returns the sender address.
    pub fn sender(&self) -> &str {
        &self.from
    }

    /// Returns the sender's display name.
    pub fn sender_name(&self) -> &str {
        &self.sender_name
    }

    /// Returns the subject line.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Returns all envelope recipients: to, then cc, then bcc.
    pub fn recipients(&self) -> Vec<&str> {
        let mut rcpts = Vec::with_capacity(self.to.len() + self.cc.len() + self.bcc.len());
        rcpts.extend(self.to.iter().map(String::as_str));
        rcpts.extend(self.cc.iter().map(String::as_str));
        rcpts.extend(self.bcc.iter().map(String::as_str));
        rcpts
    }

    /// Serializes the message to its transmittable form.
    ///
    /// The output uses bare `\n` line endings; CRLF conversion and
    /// dot-stuffing happen when the payload is framed for the data phase.
    /// The primary body is emitted raw, with no content-transfer-encoding
    /// applied. Serialization never fails and does not mutate the message.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();

        out.extend_from_slice(
            format!("From: \"{}\" <{}>\n", self.sender_name, self.from).as_bytes(),
        );
        out.extend_from_slice(format!("Date: {}\n", self.date).as_bytes());
        out.extend_from_slice(format!("To: {}\n", self.to.join(",")).as_bytes());
        if !self.cc.is_empty() {
            out.extend_from_slice(format!("Cc: {}\n", self.cc.join(",")).as_bytes());
        }
        out.extend_from_slice(format!("Subject: {}\n", self.subject).as_bytes());
        out.extend_from_slice(b"MIME-Version: 1.0\n");

        if !self.attachments.is_empty() {
            out.extend_from_slice(
                format!("Content-Type: multipart/mixed; boundary={}\n\n", BOUNDARY).as_bytes(),
            );
            out.extend_from_slice(format!("--{}\n", BOUNDARY).as_bytes());
        }

        out.extend_from_slice(
            format!("Content-Type: {}; charset=utf-8\n\n", self.content.mime_type()).as_bytes(),
        );
        out.extend_from_slice(self.body.as_bytes());

        for (filename, content) in &self.attachments {
            out.extend_from_slice(format!("\n\n--{}\n", BOUNDARY).as_bytes());
            out.extend_from_slice(b"Content-Type: application/octet-stream\n");
            out.extend_from_slice(b"Content-Transfer-Encoding: base64\n");
            out.extend_from_slice(
                format!("Content-Disposition: attachment; filename=\"{}\"\n\n", filename)
                    .as_bytes(),
            );
            out.extend_from_slice(BASE64.encode(content).as_bytes());
        }

        if !self.attachments.is_empty() {
            out.extend_from_slice(format!("\n--{}--", BOUNDARY).as_bytes());
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain_message() -> Message {
        let mut msg = Message::new("a@x.com", "greetings", "hello there");
        msg.add_to("b@y.com");
        msg
    }

    #[test]
    fn test_no_attachments_has_no_boundary() {
        let out = plain_message().to_bytes();
        let text = String::from_utf8(out).unwrap();

        assert!(!text.contains(BOUNDARY));
        assert_eq!(text.matches("Content-Type").count(), 1);
    }

    #[test]
    fn test_serialization_is_idempotent() {
        let msg = plain_message();
        assert_eq!(msg.to_bytes(), msg.to_bytes());
    }

    #[test]
    fn test_cc_header_only_when_present() {
        let mut msg = plain_message();
        assert!(!String::from_utf8(msg.to_bytes()).unwrap().contains("Cc:"));

        msg.add_cc("c@z.com");
        msg.add_cc("d@z.com");
        let text = String::from_utf8(msg.to_bytes()).unwrap();
        assert!(text.contains("Cc: c@z.com,d@z.com\n"));
    }

    #[test]
    fn test_sender_name_is_always_quoted() {
        let text = String::from_utf8(plain_message().to_bytes()).unwrap();
        assert!(text.starts_with("From: \"\" <a@x.com>\n"));

        let mut msg = plain_message();
        msg.set_sender_name("Alice");
        let text = String::from_utf8(msg.to_bytes()).unwrap();
        assert!(text.starts_with("From: \"Alice\" <a@x.com>\n"));
    }

    #[test]
    fn test_raw_body_passes_through_unencoded() {
        // Known gap: newlines and 8-bit characters in the body are not
        // protected by any content-transfer-encoding.
        let mut msg = Message::new("a@x.com", "subject", "line one\nline two\nnaïve café");
        msg.add_to("b@y.com");
        let text = String::from_utf8(msg.to_bytes()).unwrap();
        assert!(text.ends_with("line one\nline two\nnaïve café"));
    }

    #[test]
    fn test_attachment_structure_and_roundtrip() {
        let first = b"\x00\x01\x02binary payload\xff".to_vec();
        let second = b"second file".to_vec();

        let mut msg = plain_message();
        msg.add_attachment("a.bin", first.clone());
        msg.add_attachment("b.txt", second.clone());

        let text = String::from_utf8(msg.to_bytes()).unwrap();

        // One delimiter opening the body part, one per attachment, one
        // closing marker.
        let delimiter_lines = text
            .lines()
            .filter(|l| l.starts_with(&format!("--{}", BOUNDARY)))
            .count();
        assert_eq!(delimiter_lines, 4);
        assert!(text.ends_with(&format!("--{}--", BOUNDARY)));

        // Each base64 segment decodes byte-for-byte. No 76-column wrapping
        // is applied, so every segment is a single run.
        let segments: Vec<&str> = text
            .split(&format!("\n\n--{}\n", BOUNDARY))
            .skip(1)
            .collect();
        assert_eq!(segments.len(), 2);
        for (segment, expected) in segments.iter().zip([&first, &second]) {
            let encoded = segment
                .split_once("\n\n")
                .map(|(_, rest)| rest)
                .unwrap()
                .trim_end_matches(&format!("\n--{}--", BOUNDARY));
            assert!(!encoded.contains('\n'));
            assert_eq!(&BASE64.decode(encoded).unwrap(), expected);
        }
    }

    #[test]
    fn test_attachment_replaces_same_name() {
        let mut msg = plain_message();
        msg.add_attachment("a.bin", vec![1, 2, 3]);
        msg.add_attachment("a.bin", vec![4, 5, 6]);
        let text = String::from_utf8(msg.to_bytes()).unwrap();
        assert_eq!(text.matches("filename=\"a.bin\"").count(), 1);
        assert!(text.contains(&BASE64.encode([4, 5, 6])));
    }

    #[test]
    fn test_attach_file_reads_contents() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"attached bytes").unwrap();

        let mut msg = plain_message();
        msg.attach_file(file.path()).unwrap();

        let text = String::from_utf8(msg.to_bytes()).unwrap();
        assert!(text.contains(&BASE64.encode(b"attached bytes")));
        assert!(text.contains(&format!("filename=\"{}\"", file.path().display())));
    }

    #[test]
    fn test_attach_file_missing_path_fails() {
        let mut msg = plain_message();
        let err = msg.attach_file("/nonexistent/definitely-missing").unwrap_err();
        assert_eq!(err.kind(), MailErrorKind::Attachment);
    }

    #[test]
    fn test_recipients_order_is_to_cc_bcc() {
        let mut msg = plain_message();
        msg.add_bcc("hidden@y.com");
        msg.add_cc("copy@y.com");
        msg.add_to("second@y.com");
        assert_eq!(
            msg.recipients(),
            vec!["b@y.com", "second@y.com", "copy@y.com", "hidden@y.com"]
        );
    }

    #[test]
    fn test_output_parses_with_standard_parser() {
        use mailparse::MailHeaderMap;

        let msg = plain_message();
        let out = msg.to_bytes();
        let parsed = mailparse::parse_mail(&out).unwrap();

        assert_eq!(parsed.headers.get_first_value("To").unwrap(), "b@y.com");
        assert_eq!(parsed.get_body().unwrap(), "hello there");
    }

    #[test]
    fn test_multipart_output_parses_with_standard_parser() {
        let mut msg = plain_message();
        msg.add_attachment("data.bin", vec![0u8, 159, 146, 150]);

        let out = msg.to_bytes();
        let parsed = mailparse::parse_mail(&out).unwrap();

        assert_eq!(parsed.subparts.len(), 2);
        assert_eq!(
            parsed.subparts[1].get_body_raw().unwrap(),
            vec![0u8, 159, 146, 150]
        );
    }
}
