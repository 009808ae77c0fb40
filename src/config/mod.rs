//! Transport configuration.
//!
//! A [`TransportConfig`] is parsed once from a connection URI of the form
//! `scheme://[user[:secret]@]host[:port]` and is immutable afterwards, apart
//! from the builder-style setters meant to be applied before first use.
//! Credentials, when present in the URI, are bound here as an immutable
//! field and used later during the authentication step.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::auth::Credentials;
use crate::errors::{MailError, MailErrorKind, MailResult};

/// Port used when the URI does not carry one, for both schemes.
pub const DEFAULT_PORT: u16 = 25;

/// Default timeout for establishing the connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for each command/reply exchange.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection security posture, determined by the URI scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Plaintext connection with opportunistic STARTTLS upgrade.
    Smtp,
    /// TLS from the first byte.
    Smtps,
}

impl Scheme {
    /// Returns the URI scheme string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Smtp => "smtp",
            Scheme::Smtps => "smtps",
        }
    }
}

/// Relay connection settings, parsed once from a URI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Security posture.
    pub scheme: Scheme,
    /// Relay address as "host:port".
    pub server: String,
    /// Relay host alone, used for TLS server-name verification.
    pub host: String,
    /// Credentials bound at parse time, if the URI carried any.
    #[serde(skip)]
    pub credentials: Option<Credentials>,
    /// Local hostname announced in the EHLO/HELO greeting.
    pub hostname: String,
    /// Fail instead of continuing in plaintext when the server does not
    /// offer STARTTLS. Only meaningful for the "smtp" scheme.
    #[serde(default)]
    pub require_tls: bool,
    /// Timeout for establishing the connection.
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Timeout for each command/reply exchange.
    #[serde(default = "default_command_timeout", with = "humantime_serde")]
    pub command_timeout: Duration,
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

fn default_command_timeout() -> Duration {
    DEFAULT_COMMAND_TIMEOUT
}

impl TransportConfig {
    /// Parses a connection URI.
    ///
    /// The scheme must be "smtp" or "smtps"; a missing port defaults to
    /// [`DEFAULT_PORT`] for either scheme. The local hostname is resolved
    /// here so that a misconfigured host fails at configuration time, not
    /// mid-session.
    pub fn from_url(raw: &str) -> MailResult<Self> {
        let url = Url::parse(raw).map_err(|e| {
            MailError::new(
                MailErrorKind::InvalidUri,
                format!("invalid transport URI: {}", e),
            )
        })?;

        let scheme = match url.scheme() {
            "smtp" => Scheme::Smtp,
            "smtps" => Scheme::Smtps,
            other => {
                return Err(MailError::new(
                    MailErrorKind::InvalidScheme,
                    format!("unsupported scheme: {}", other),
                ))
            }
        };

        let host = url
            .host_str()
            .ok_or_else(|| MailError::new(MailErrorKind::InvalidUri, "URI has no host"))?
            .to_string();
        let port = url.port().unwrap_or(DEFAULT_PORT);

        let credentials = if url.username().is_empty() {
            None
        } else {
            Some(Credentials::plain(
                url.username(),
                url.password().unwrap_or(""),
            ))
        };

        Ok(Self {
            scheme,
            server: format!("{}:{}", host, port),
            host,
            credentials,
            hostname: local_hostname()?,
            require_tls: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        })
    }

    /// Requires an encrypted channel before submission.
    ///
    /// With the "smtp" scheme the upgrade is opportunistic by default: a
    /// relay that does not advertise STARTTLS is used in plaintext without
    /// any indication. Security-sensitive callers should set this instead
    /// of relying on the best-effort upgrade.
    pub fn require_encryption(mut self, require: bool) -> Self {
        self.require_tls = require;
        self
    }

    /// Overrides the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Overrides the per-command timeout.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Returns true if credentials were bound at parse time.
    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }
}

/// Resolves the local hostname announced in the greeting.
fn local_hostname() -> MailResult<String> {
    let name = hostname::get().map_err(|e| {
        MailError::new(MailErrorKind::HostLookupFailed, "local hostname unavailable").with_cause(e)
    })?;
    name.into_string().map_err(|_| {
        MailError::new(
            MailErrorKind::HostLookupFailed,
            "local hostname is not valid UTF-8",
        )
    })
}

// Duration fields serialize as humantime strings ("30s", "2m").
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_url_applies_default_port() {
        let config = TransportConfig::from_url("smtp://relay.example.com").unwrap();
        assert_eq!(config.scheme, Scheme::Smtp);
        assert_eq!(config.server, "relay.example.com:25");
        assert_eq!(config.host, "relay.example.com");
        assert!(config.credentials.is_none());
        assert!(!config.hostname.is_empty());
    }

    #[test]
    fn test_from_url_with_credentials_and_port() {
        let config = TransportConfig::from_url("smtps://user:pw@relay.example.com:465").unwrap();
        assert_eq!(config.scheme, Scheme::Smtps);
        assert_eq!(config.server, "relay.example.com:465");
        let creds = config.credentials.as_ref().unwrap();
        assert_eq!(creds.username(), "user");
    }

    #[test]
    fn test_from_url_username_without_password() {
        let config = TransportConfig::from_url("smtp://user@relay.example.com").unwrap();
        assert!(config.has_credentials());
    }

    #[test]
    fn test_from_url_rejects_unknown_scheme() {
        let err = TransportConfig::from_url("ftp://relay.example.com").unwrap_err();
        assert_eq!(err.kind(), MailErrorKind::InvalidScheme);
    }

    #[test]
    fn test_from_url_rejects_malformed_uri() {
        let err = TransportConfig::from_url("not a uri").unwrap_err();
        assert_eq!(err.kind(), MailErrorKind::InvalidUri);
    }

    #[test]
    fn test_setters() {
        let config = TransportConfig::from_url("smtp://relay.example.com")
            .unwrap()
            .require_encryption(true)
            .with_connect_timeout(Duration::from_secs(5))
            .with_command_timeout(Duration::from_secs(10));
        assert!(config.require_tls);
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.command_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_serde_skips_credentials() {
        let config = TransportConfig::from_url("smtps://user:pw@relay.example.com:465").unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("credentials"));
        assert!(!json.contains("\"pw\""));
        assert!(json.contains("\"smtps\""));
        assert!(json.contains("relay.example.com:465"));

        let restored: TransportConfig = serde_json::from_str(&json).unwrap();
        assert!(restored.credentials.is_none());
        assert_eq!(restored.server, config.server);
        assert_eq!(restored.command_timeout, config.command_timeout);
    }
}
