//! Error types for the mail client.
//!
//! Every failure is a [`MailError`] carrying a [`MailErrorKind`], an
//! optional SMTP reply code, and the submission step it occurred at.
//! Errors are returned to the caller immediately; nothing is retried or
//! suppressed internally.

use std::fmt;
use thiserror::Error;

/// Result type for mail operations.
pub type MailResult<T> = Result<T, MailError>;

/// Failure categories for configuration and submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MailErrorKind {
    /// Transport URI scheme is not "smtp" or "smtps".
    InvalidScheme,
    /// Transport URI is malformed.
    InvalidUri,
    /// The local hostname could not be resolved.
    HostLookupFailed,
    /// The message has no envelope recipients.
    NoRecipients,
    /// TCP dial or socket-level failure.
    Connection,
    /// TLS handshake or upgrade failure.
    Tls,
    /// The server rejected a protocol step.
    Protocol,
    /// The server rejected the configured credentials.
    Auth,
    /// An attachment could not be read.
    Attachment,
}

impl fmt::Display for MailErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MailErrorKind::InvalidScheme => write!(f, "invalid scheme"),
            MailErrorKind::InvalidUri => write!(f, "invalid transport URI"),
            MailErrorKind::HostLookupFailed => write!(f, "host lookup failed"),
            MailErrorKind::NoRecipients => write!(f, "no recipients specified"),
            MailErrorKind::Connection => write!(f, "connection failed"),
            MailErrorKind::Tls => write!(f, "TLS failure"),
            MailErrorKind::Protocol => write!(f, "protocol failure"),
            MailErrorKind::Auth => write!(f, "authentication failed"),
            MailErrorKind::Attachment => write!(f, "attachment failure"),
        }
    }
}

/// Steps of the submission sequence, in execution order.
///
/// Each step either completes or aborts the whole send; the failing step is
/// recorded on the returned [`MailError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SendStep {
    /// TCP or TLS dial, including the server greeting banner.
    Connect,
    /// EHLO/HELO exchange.
    Hello,
    /// Opportunistic STARTTLS upgrade.
    StartTls,
    /// AUTH exchange.
    Auth,
    /// MAIL FROM envelope sender declaration.
    MailFrom,
    /// RCPT TO envelope recipient declarations.
    RcptTo,
    /// DATA phase, payload transfer included.
    Data,
    /// QUIT handshake.
    Quit,
}

impl fmt::Display for SendStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendStep::Connect => write!(f, "connect"),
            SendStep::Hello => write!(f, "hello"),
            SendStep::StartTls => write!(f, "starttls"),
            SendStep::Auth => write!(f, "auth"),
            SendStep::MailFrom => write!(f, "mail-from"),
            SendStep::RcptTo => write!(f, "rcpt-to"),
            SendStep::Data => write!(f, "data"),
            SendStep::Quit => write!(f, "quit"),
        }
    }
}

/// Error returned by configuration parsing and message submission.
#[derive(Error, Debug)]
pub struct MailError {
    kind: MailErrorKind,
    message: String,
    smtp_code: Option<u16>,
    step: Option<SendStep>,
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl MailError {
    /// Creates a new error.
    pub fn new(kind: MailErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            smtp_code: None,
            step: None,
            cause: None,
        }
    }

    /// Sets the SMTP reply code that produced this error.
    pub fn with_smtp_code(mut self, code: u16) -> Self {
        self.smtp_code = Some(code);
        self
    }

    /// Sets the submission step this error occurred at.
    pub fn at_step(mut self, step: SendStep) -> Self {
        self.step = Some(step);
        self
    }

    /// Sets the underlying cause.
    pub fn with_cause<E: std::error::Error + Send + Sync + 'static>(mut self, cause: E) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Returns the error kind.
    pub fn kind(&self) -> MailErrorKind {
        self.kind
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the SMTP reply code if the server produced one.
    pub fn smtp_code(&self) -> Option<u16> {
        self.smtp_code
    }

    /// Returns the submission step this error occurred at, if any.
    pub fn step(&self) -> Option<SendStep> {
        self.step
    }

    // Convenience constructors

    /// Creates a connection-level error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(MailErrorKind::Connection, message)
    }

    /// Creates a TLS error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::new(MailErrorKind::Tls, message)
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(MailErrorKind::Protocol, message)
    }

    /// Creates an authentication error.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(MailErrorKind::Auth, message)
    }

    /// Creates an error from a server reply.
    ///
    /// Authentication replies (530, 535) map to [`MailErrorKind::Auth`];
    /// everything else is a protocol failure.
    pub fn from_reply(code: u16, message: impl Into<String>) -> Self {
        let kind = match code {
            530 | 535 => MailErrorKind::Auth,
            _ => MailErrorKind::Protocol,
        };
        Self::new(kind, message).with_smtp_code(code)
    }
}

impl fmt::Display for MailError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(code) = self.smtp_code {
            write!(f, " (SMTP {})", code)?;
        }
        if let Some(step) = self.step {
            write!(f, " during {}", step)?;
        }
        Ok(())
    }
}
