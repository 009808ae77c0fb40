//! Authentication for the submission session.
//!
//! Credentials are a username/secret pair bound once at configuration time.
//! The concrete mechanism is chosen later, against what the server
//! advertises: CRAM-MD5 (RFC 2195) is preferred over PLAIN (RFC 4616),
//! which is preferred over LOGIN.

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use md5::Md5;
use secrecy::{ExposeSecret, SecretString};

use crate::errors::{MailError, MailResult};

/// Authentication mechanisms the client can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mechanism {
    /// PLAIN initial-response authentication (RFC 4616).
    Plain,
    /// LOGIN username/password exchange (obsolete but widely deployed).
    Login,
    /// CRAM-MD5 challenge-response (RFC 2195).
    CramMd5,
}

impl Mechanism {
    /// Returns the SMTP AUTH mechanism name.
    pub fn mechanism_name(&self) -> &'static str {
        match self {
            Mechanism::Plain => "PLAIN",
            Mechanism::Login => "LOGIN",
            Mechanism::CramMd5 => "CRAM-MD5",
        }
    }

    /// Returns the priority for mechanism selection (higher wins).
    pub fn priority(&self) -> u8 {
        match self {
            Mechanism::CramMd5 => 3,
            Mechanism::Plain => 2,
            Mechanism::Login => 1,
        }
    }

    /// Parses a mechanism from an EHLO AUTH capability token.
    pub fn from_capability(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PLAIN" => Some(Mechanism::Plain),
            "LOGIN" => Some(Mechanism::Login),
            "CRAM-MD5" => Some(Mechanism::CramMd5),
            _ => None,
        }
    }
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mechanism_name())
    }
}

/// A username/secret pair for relay authentication.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    secret: SecretString,
}

impl Credentials {
    /// Creates credentials from a username and secret.
    pub fn plain(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: SecretString::new(secret.into()),
        }
    }

    /// Returns the username.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Returns the protected secret.
    pub fn secret(&self) -> &SecretString {
        &self.secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Builders for the base64 payloads of each AUTH exchange.
pub struct Authenticator;

impl Authenticator {
    /// Generates the initial response for PLAIN authentication.
    pub fn plain_initial_response(credentials: &Credentials) -> String {
        // \0username\0secret
        let response = format!(
            "\0{}\0{}",
            credentials.username(),
            credentials.secret().expose_secret()
        );
        BASE64.encode(response)
    }

    /// Generates the LOGIN username line.
    pub fn login_username(credentials: &Credentials) -> String {
        BASE64.encode(credentials.username())
    }

    /// Generates the LOGIN secret line.
    pub fn login_secret(credentials: &Credentials) -> String {
        BASE64.encode(credentials.secret().expose_secret())
    }

    /// Generates the CRAM-MD5 response for a server challenge.
    pub fn cram_md5_response(challenge: &str, credentials: &Credentials) -> MailResult<String> {
        let challenge_bytes = BASE64
            .decode(challenge)
            .map_err(|e| MailError::auth(format!("invalid CRAM-MD5 challenge: {}", e)))?;

        type HmacMd5 = Hmac<Md5>;
        let mut mac = HmacMd5::new_from_slice(credentials.secret().expose_secret().as_bytes())
            .map_err(|e| MailError::auth(format!("HMAC setup failed: {}", e)))?;
        mac.update(&challenge_bytes);
        let digest = mac.finalize().into_bytes();

        let hex_digest: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        Ok(BASE64.encode(format!("{} {}", credentials.username(), hex_digest)))
    }

    /// Picks the highest-priority mechanism among those the server
    /// advertises. Falls back to PLAIN when the server announces none.
    pub fn select_mechanism(advertised: &[Mechanism]) -> Mechanism {
        advertised
            .iter()
            .copied()
            .max_by_key(Mechanism::priority)
            .unwrap_or(Mechanism::Plain)
    }
}
