//! Mock transport implementations for protocol-level tests.
//!
//! [`MockConnector`] counts dial attempts and hands out handles to a shared
//! [`MockTransport`], which replays scripted replies and records every
//! command and data-phase payload it sees. Unlike the real connector, the
//! mock does not consume a greeting banner, so scripts start at the EHLO
//! reply.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::TransportConfig;
use crate::errors::{MailError, MailResult};
use crate::protocol::{codes, SmtpCommand, SmtpResponse};
use crate::transport::{Connection, Connector};

/// Scripted in-memory transport.
///
/// Clones share state, so a test can keep one handle for scripting and
/// inspection while the connector hands another to the client.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    commands: Arc<Mutex<Vec<SmtpCommand>>>,
    responses: Arc<Mutex<VecDeque<SmtpResponse>>>,
    payloads: Arc<Mutex<Vec<Vec<u8>>>>,
    tls: Arc<AtomicBool>,
    fail_next: Arc<Mutex<Option<MailError>>>,
}

impl MockTransport {
    /// Creates a new mock transport with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a reply; replies are consumed in order by `send_command` and
    /// `read_response`. An exhausted script answers 250 OK.
    pub fn queue_response(&self, response: SmtpResponse) -> &Self {
        self.responses.lock().unwrap().push_back(response);
        self
    }

    /// Queues a single-line reply.
    pub fn queue(&self, code: u16, message: &str) -> &Self {
        self.queue_response(SmtpResponse::new(code, message))
    }

    /// Queues a 250 OK reply.
    pub fn queue_ok(&self) -> &Self {
        self.queue(codes::OK, "OK")
    }

    /// Makes the next transport call fail with the given error.
    pub fn fail_next_with(&self, error: MailError) -> &Self {
        *self.fail_next.lock().unwrap() = Some(error);
        self
    }

    /// Returns every command sent so far.
    pub fn recorded_commands(&self) -> Vec<SmtpCommand> {
        self.commands.lock().unwrap().clone()
    }

    /// Returns every data-phase payload written so far.
    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.payloads.lock().unwrap().clone()
    }

    /// Returns how many data-phase writes happened.
    pub fn payload_count(&self) -> usize {
        self.payloads.lock().unwrap().len()
    }

    fn next_response(&self) -> SmtpResponse {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| SmtpResponse::new(codes::OK, "OK"))
    }

    fn take_failure(&self) -> Option<MailError> {
        self.fail_next.lock().unwrap().take()
    }
}

#[async_trait]
impl Connection for MockTransport {
    async fn send_command(&mut self, command: &SmtpCommand) -> MailResult<SmtpResponse> {
        if let Some(error) = self.take_failure() {
            return Err(error);
        }
        self.commands.lock().unwrap().push(command.clone());
        Ok(self.next_response())
    }

    async fn send_payload(&mut self, data: &[u8]) -> MailResult<()> {
        if let Some(error) = self.take_failure() {
            return Err(error);
        }
        self.payloads.lock().unwrap().push(data.to_vec());
        Ok(())
    }

    async fn read_response(&mut self) -> MailResult<SmtpResponse> {
        if let Some(error) = self.take_failure() {
            return Err(error);
        }
        Ok(self.next_response())
    }

    async fn upgrade_tls(&mut self) -> MailResult<()> {
        if let Some(error) = self.take_failure() {
            return Err(error);
        }
        self.tls.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_tls(&self) -> bool {
        self.tls.load(Ordering::SeqCst)
    }
}

/// Connector handing out handles to one shared [`MockTransport`].
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    transport: MockTransport,
    dials: Arc<AtomicUsize>,
}

impl MockConnector {
    /// Creates a connector around the given transport.
    pub fn new(transport: MockTransport) -> Self {
        Self {
            transport,
            dials: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns how many connections were opened.
    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Conn = MockTransport;

    async fn connect(&self, _config: &TransportConfig) -> MailResult<MockTransport> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        Ok(self.transport.clone())
    }
}

/// EHLO reply advertising STARTTLS and the common AUTH mechanisms.
pub fn ehlo_response() -> SmtpResponse {
    SmtpResponse {
        code: codes::OK,
        message: vec![
            "relay.test greets you".to_string(),
            "STARTTLS".to_string(),
            "AUTH PLAIN LOGIN CRAM-MD5".to_string(),
        ],
    }
}

/// EHLO reply advertising nothing beyond the greeting.
pub fn bare_ehlo_response() -> SmtpResponse {
    SmtpResponse::new(codes::OK, "relay.test greets you")
}

/// EHLO reply advertising AUTH PLAIN only.
pub fn auth_only_ehlo_response() -> SmtpResponse {
    SmtpResponse {
        code: codes::OK,
        message: vec!["relay.test greets you".to_string(), "AUTH PLAIN".to_string()],
    }
}
