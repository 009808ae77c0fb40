//! SMTP protocol primitives.
//!
//! Commands and reply parsing for the submission sequence (RFC 5321 with
//! the STARTTLS extension, RFC 3207), plus the framing applied to message
//! bytes during the data phase.

use std::fmt;

use crate::auth::Mechanism;
use crate::errors::{MailError, MailResult, SendStep};

/// Commands the client issues during a submission session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    /// Extended hello with the client identity.
    Ehlo(String),
    /// Basic hello, fallback for servers that reject EHLO.
    Helo(String),
    /// Start TLS negotiation on the open connection.
    StartTls,
    /// Begin an authentication exchange.
    Auth {
        /// Mechanism name (e.g. "PLAIN").
        mechanism: String,
        /// Optional base64 initial response.
        initial_response: Option<String>,
    },
    /// Declare the envelope sender.
    MailFrom {
        /// Sender address, already angle-bracketed.
        address: String,
    },
    /// Declare one envelope recipient.
    RcptTo {
        /// Recipient address, already angle-bracketed.
        address: String,
    },
    /// Open the data phase.
    Data,
    /// Terminate the session.
    Quit,
}

impl SmtpCommand {
    /// Formats the command for the wire, without the trailing CRLF.
    pub fn to_smtp_string(&self) -> String {
        match self {
            SmtpCommand::Ehlo(domain) => format!("EHLO {}", domain),
            SmtpCommand::Helo(domain) => format!("HELO {}", domain),
            SmtpCommand::StartTls => "STARTTLS".to_string(),
            SmtpCommand::Auth {
                mechanism,
                initial_response,
            } => match initial_response {
                Some(response) => format!("AUTH {} {}", mechanism, response),
                None => format!("AUTH {}", mechanism),
            },
            SmtpCommand::MailFrom { address } => format!("MAIL FROM:{}", address),
            SmtpCommand::RcptTo { address } => format!("RCPT TO:{}", address),
            SmtpCommand::Data => "DATA".to_string(),
            SmtpCommand::Quit => "QUIT".to_string(),
        }
    }
}

impl fmt::Display for SmtpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_smtp_string())
    }
}

/// Server reply to a command.
#[derive(Debug, Clone)]
pub struct SmtpResponse {
    /// Reply code (e.g. 250, 354, 550).
    pub code: u16,
    /// Reply text, one entry per line.
    pub message: Vec<String>,
}

impl SmtpResponse {
    /// Creates a single-line response.
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: vec![message.into()],
        }
    }

    /// Parses a reply from its raw lines.
    ///
    /// Multiline replies must repeat the same code on every line.
    pub fn parse(lines: &[String]) -> MailResult<Self> {
        if lines.is_empty() {
            return Err(MailError::protocol("empty reply"));
        }

        let mut code = 0u16;
        let mut messages = Vec::with_capacity(lines.len());

        for (i, line) in lines.iter().enumerate() {
            let parsed: u16 = line
                .get(..3)
                .and_then(|digits| digits.parse().ok())
                .ok_or_else(|| {
                    MailError::protocol(format!("invalid reply line: {:?}", line))
                })?;

            if i == 0 {
                code = parsed;
            } else if parsed != code {
                return Err(MailError::protocol("inconsistent codes in multiline reply"));
            }

            messages.push(line.get(4..).unwrap_or("").to_string());
        }

        Ok(Self {
            code,
            message: messages,
        })
    }

    /// Returns true for a positive completion reply (2xx).
    pub fn is_success(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    /// Returns the first reply line.
    pub fn first_message(&self) -> &str {
        self.message.first().map(String::as_str).unwrap_or("")
    }

    /// Returns all reply lines joined with newlines.
    pub fn full_message(&self) -> String {
        self.message.join("\n")
    }

    /// Converts a rejection into an error tagged with the failing step.
    pub fn to_error(&self, step: SendStep) -> MailError {
        MailError::from_reply(self.code, self.full_message()).at_step(step)
    }
}

impl fmt::Display for SmtpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.first_message())
    }
}

/// Capabilities announced in the EHLO reply.
///
/// Only the ones this client acts on are parsed out; the raw lines are kept
/// for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct EhloCapabilities {
    /// STARTTLS advertised.
    pub starttls: bool,
    /// Advertised AUTH mechanisms this client can drive.
    pub auth_mechanisms: Vec<Mechanism>,
    /// Raw capability lines, uppercased.
    pub raw: Vec<String>,
}

impl EhloCapabilities {
    /// Parses capabilities from an EHLO reply.
    pub fn from_ehlo_response(response: &SmtpResponse) -> Self {
        let mut caps = Self::default();

        for line in &response.message {
            let line = line.trim().to_uppercase();
            let mut parts = line.splitn(2, ' ');
            let capability = parts.next().unwrap_or("");
            let params = parts.next().unwrap_or("");

            match capability {
                "STARTTLS" => caps.starttls = true,
                "AUTH" => {
                    for token in params.split_whitespace() {
                        if let Some(mechanism) = Mechanism::from_capability(token) {
                            caps.auth_mechanisms.push(mechanism);
                        }
                    }
                }
                _ => {}
            }

            caps.raw.push(line);
        }

        caps
    }
}

/// Reply codes the submission sequence checks for.
pub mod codes {
    /// Service ready (greeting, STARTTLS go-ahead).
    pub const SERVICE_READY: u16 = 220;
    /// Service closing (QUIT).
    pub const SERVICE_CLOSING: u16 = 221;
    /// Authentication succeeded.
    pub const AUTH_SUCCESS: u16 = 235;
    /// Requested action completed.
    pub const OK: u16 = 250;
    /// Continue an authentication exchange.
    pub const AUTH_CONTINUE: u16 = 334;
    /// Start mail input.
    pub const START_MAIL_INPUT: u16 = 354;
    /// Authentication failed.
    pub const AUTH_FAILED: u16 = 535;
    /// Mailbox unavailable.
    pub const MAILBOX_UNAVAILABLE: u16 = 550;
}

/// Frames serialized message bytes for the data phase.
///
/// Normalizes bare `\n` to `\r\n`, doubles dots at the start of lines, and
/// appends the `.\r\n` end-of-data marker.
pub fn frame_data(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len() + raw.len() / 64 + 8);
    let mut at_line_start = true;
    let mut prev = 0u8;

    for &byte in raw {
        if byte == b'\n' && prev != b'\r' {
            out.push(b'\r');
        } else if at_line_start && byte == b'.' {
            out.push(b'.');
        }
        out.push(byte);
        at_line_start = byte == b'\n';
        prev = byte;
    }

    if !out.ends_with(b"\r\n") {
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b".\r\n");

    out
}
