//! Network transport for submission sessions.
//!
//! [`Connector`] dials a relay and hands back a [`Connection`] with the
//! greeting banner already consumed; the client drives the rest of the
//! session through it. [`TcpConnector`] is the real implementation (TCP,
//! implicit TLS for "smtps", in-band upgrade via [`Connection::upgrade_tls`]);
//! tests substitute the mock connector from [`crate::mocks`].

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::{Scheme, TransportConfig};
use crate::errors::{MailError, MailResult, SendStep};
use crate::protocol::{SmtpCommand, SmtpResponse};

/// A live submission session.
#[async_trait]
pub trait Connection: Send {
    /// Sends a command and reads the reply.
    async fn send_command(&mut self, command: &SmtpCommand) -> MailResult<SmtpResponse>;

    /// Writes raw bytes without reading a reply (data phase, AUTH
    /// continuation lines).
    async fn send_payload(&mut self, data: &[u8]) -> MailResult<()>;

    /// Reads one reply from the server.
    async fn read_response(&mut self) -> MailResult<SmtpResponse>;

    /// Upgrades the open plaintext connection to TLS.
    async fn upgrade_tls(&mut self) -> MailResult<()>;

    /// Returns true once the connection is encrypted.
    fn is_tls(&self) -> bool;
}

/// Dials new submission sessions.
///
/// The seam that lets protocol-level tests run without a network: the
/// client is generic over its connector.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Session type produced by this connector.
    type Conn: Connection;

    /// Opens a connection to the configured relay and consumes the 220
    /// greeting banner.
    async fn connect(&self, config: &TransportConfig) -> MailResult<Self::Conn>;
}

/// TCP connection, plaintext or TLS.
pub struct TcpConnection {
    stream: SessionStream,
    host: String,
    connect_timeout: Duration,
    command_timeout: Duration,
    tls: bool,
}

enum SessionStream {
    Plain(BufReader<TcpStream>),
    #[cfg(feature = "rustls-tls")]
    Tls(BufReader<tokio_rustls::client::TlsStream<TcpStream>>),
    /// Placeholder while the stream is being wrapped for TLS. A connection
    /// left in this state after a failed upgrade is unusable and is dropped
    /// by the caller.
    #[cfg(feature = "rustls-tls")]
    Swapping,
}

impl fmt::Debug for TcpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpConnection")
            .field("host", &self.host)
            .field("tls", &self.tls)
            .finish()
    }
}

#[async_trait]
impl Connection for TcpConnection {
    async fn send_command(&mut self, command: &SmtpCommand) -> MailResult<SmtpResponse> {
        let line = format!("{}\r\n", command.to_smtp_string());

        #[cfg(feature = "tracing")]
        tracing::debug!(command = %command, "sending command");

        match &mut self.stream {
            SessionStream::Plain(stream) => {
                write_all_timed(stream.get_mut(), line.as_bytes(), self.command_timeout).await?
            }
            #[cfg(feature = "rustls-tls")]
            SessionStream::Tls(stream) => {
                write_all_timed(stream.get_mut(), line.as_bytes(), self.command_timeout).await?
            }
            #[cfg(feature = "rustls-tls")]
            SessionStream::Swapping => {
                return Err(MailError::connection("connection is unusable"))
            }
        }

        self.read_response().await
    }

    async fn send_payload(&mut self, data: &[u8]) -> MailResult<()> {
        match &mut self.stream {
            SessionStream::Plain(stream) => {
                write_all_timed(stream.get_mut(), data, self.command_timeout).await
            }
            #[cfg(feature = "rustls-tls")]
            SessionStream::Tls(stream) => {
                write_all_timed(stream.get_mut(), data, self.command_timeout).await
            }
            #[cfg(feature = "rustls-tls")]
            SessionStream::Swapping => Err(MailError::connection("connection is unusable")),
        }
    }

    async fn read_response(&mut self) -> MailResult<SmtpResponse> {
        let response = match &mut self.stream {
            SessionStream::Plain(stream) => read_reply(stream, self.command_timeout).await?,
            #[cfg(feature = "rustls-tls")]
            SessionStream::Tls(stream) => read_reply(stream, self.command_timeout).await?,
            #[cfg(feature = "rustls-tls")]
            SessionStream::Swapping => {
                return Err(MailError::connection("connection is unusable"))
            }
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(code = response.code, message = %response.first_message(), "received reply");

        Ok(response)
    }

    async fn upgrade_tls(&mut self) -> MailResult<()> {
        if self.tls {
            return Ok(());
        }

        #[cfg(feature = "rustls-tls")]
        {
            let stream = match std::mem::replace(&mut self.stream, SessionStream::Swapping) {
                SessionStream::Plain(reader) => reader.into_inner(),
                other => {
                    self.stream = other;
                    return Err(MailError::tls("connection is not upgradable"));
                }
            };

            let tls_stream = tls_handshake(stream, &self.host, self.connect_timeout).await?;
            self.stream = SessionStream::Tls(BufReader::new(tls_stream));
            self.tls = true;
            Ok(())
        }

        #[cfg(not(feature = "rustls-tls"))]
        {
            Err(MailError::tls("TLS support is not compiled in"))
        }
    }

    fn is_tls(&self) -> bool {
        self.tls
    }
}

/// Connector dialing real TCP/TLS connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    type Conn = TcpConnection;

    async fn connect(&self, config: &TransportConfig) -> MailResult<TcpConnection> {
        let stream = timeout(config.connect_timeout, TcpStream::connect(&config.server))
            .await
            .map_err(|_| {
                MailError::connection(format!("connect to {} timed out", config.server))
                    .at_step(SendStep::Connect)
            })?
            .map_err(|e| map_dial_error(e, &config.server))?;
        stream.set_nodelay(true).ok();

        if config.scheme == Scheme::Smtps {
            #[cfg(not(feature = "rustls-tls"))]
            {
                return Err(
                    MailError::tls("TLS support is not compiled in").at_step(SendStep::Connect)
                );
            }

            #[cfg(feature = "rustls-tls")]
            {
                let tls_stream =
                    tls_handshake(stream, &config.host, config.connect_timeout).await?;
                let mut conn = TcpConnection {
                    stream: SessionStream::Tls(BufReader::new(tls_stream)),
                    host: config.host.clone(),
                    connect_timeout: config.connect_timeout,
                    command_timeout: config.command_timeout,
                    tls: true,
                };
                conn.expect_greeting().await?;
                return Ok(conn);
            }
        }

        let mut conn = TcpConnection {
            stream: SessionStream::Plain(BufReader::new(stream)),
            host: config.host.clone(),
            connect_timeout: config.connect_timeout,
            command_timeout: config.command_timeout,
            tls: false,
        };
        conn.expect_greeting().await?;
        Ok(conn)
    }
}

impl TcpConnection {
    async fn expect_greeting(&mut self) -> MailResult<()> {
        let greeting = self.read_response().await?;
        if !greeting.is_success() {
            return Err(greeting.to_error(SendStep::Connect));
        }
        Ok(())
    }
}

async fn write_all_timed<W: AsyncWrite + Unpin>(
    writer: &mut W,
    data: &[u8],
    timeout_duration: Duration,
) -> MailResult<()> {
    timeout(timeout_duration, writer.write_all(data))
        .await
        .map_err(|_| MailError::connection("write timed out"))?
        .map_err(|e| MailError::connection(format!("write failed: {}", e)))?;

    timeout(timeout_duration, writer.flush())
        .await
        .map_err(|_| MailError::connection("flush timed out"))?
        .map_err(|e| MailError::connection(format!("flush failed: {}", e)))?;

    Ok(())
}

async fn read_reply<R: AsyncBufReadExt + Unpin>(
    reader: &mut R,
    timeout_duration: Duration,
) -> MailResult<SmtpResponse> {
    let mut lines = Vec::new();

    loop {
        let mut line = String::new();

        let read = timeout(timeout_duration, reader.read_line(&mut line))
            .await
            .map_err(|_| MailError::connection("read timed out"))?
            .map_err(|e| MailError::connection(format!("read failed: {}", e)))?;

        if read == 0 {
            return Err(MailError::connection("server closed the connection"));
        }

        let line = line.trim_end().to_string();
        // A hyphen after the code marks a continuation line.
        let is_continuation = line.len() >= 4 && line.as_bytes()[3] == b'-';
        lines.push(line);

        if !is_continuation {
            break;
        }
    }

    SmtpResponse::parse(&lines)
}

fn map_dial_error(error: io::Error, server: &str) -> MailError {
    let mapped = match error.kind() {
        io::ErrorKind::ConnectionRefused => {
            MailError::connection(format!("connection refused to {}", server))
        }
        io::ErrorKind::TimedOut => {
            MailError::connection(format!("connection to {} timed out", server))
        }
        _ => MailError::connection(format!("failed to dial {}: {}", server, error)),
    };
    mapped.at_step(SendStep::Connect).with_cause(error)
}

#[cfg(feature = "rustls-tls")]
async fn tls_handshake(
    stream: TcpStream,
    host: &str,
    timeout_duration: Duration,
) -> MailResult<tokio_rustls::client::TlsStream<TcpStream>> {
    use rustls::pki_types::ServerName;
    use std::sync::Arc;

    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    let connector = tokio_rustls::TlsConnector::from(Arc::new(tls_config));
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|_| MailError::tls(format!("invalid server name: {}", host)))?;

    timeout(timeout_duration, connector.connect(server_name, stream))
        .await
        .map_err(|_| MailError::tls("TLS handshake timed out"))?
        .map_err(|e| MailError::tls(format!("TLS handshake failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::MailErrorKind;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn config_for(addr: std::net::SocketAddr) -> TransportConfig {
        let mut config = TransportConfig::from_url("smtp://127.0.0.1").unwrap();
        config.server = addr.to_string();
        config
    }

    #[tokio::test]
    async fn test_connect_consumes_greeting_and_exchanges_commands() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"220 test ready\r\n").await.unwrap();

            let mut buf = vec![0u8; 1024];
            let read = socket.read(&mut buf).await.unwrap();
            assert!(String::from_utf8_lossy(&buf[..read]).starts_with("EHLO"));
            socket
                .write_all(b"250-test greets you\r\n250 STARTTLS\r\n")
                .await
                .unwrap();
        });

        let config = config_for(addr);
        let mut conn = TcpConnector.connect(&config).await.unwrap();
        assert!(!conn.is_tls());

        let response = conn
            .send_command(&SmtpCommand::Ehlo("client.test".to_string()))
            .await
            .unwrap();
        assert_eq!(response.code, 250);
        assert_eq!(response.message.len(), 2);

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_rejecting_greeting_fails() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"554 no service for you\r\n").await.unwrap();
        });

        let config = config_for(addr);
        let err = TcpConnector.connect(&config).await.unwrap_err();
        assert_eq!(err.kind(), MailErrorKind::Protocol);
        assert_eq!(err.step(), Some(SendStep::Connect));
        assert_eq!(err.smtp_code(), Some(554));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        // Bind then drop to get a port with nothing listening.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = config_for(addr);
        let err = TcpConnector.connect(&config).await.unwrap_err();
        assert_eq!(err.kind(), MailErrorKind::Connection);
        assert_eq!(err.step(), Some(SendStep::Connect));
    }

    #[tokio::test]
    async fn test_server_closing_mid_reply_fails() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            // Continuation line promises more, then the socket closes.
            socket.write_all(b"220-half a greeting\r\n").await.unwrap();
        });

        let config = config_for(addr);
        let err = TcpConnector.connect(&config).await.unwrap_err();
        assert_eq!(err.kind(), MailErrorKind::Connection);

        server.await.unwrap();
    }
}
