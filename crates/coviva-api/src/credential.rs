// Credential encoding for the token endpoint.
//
// The gateway expects `Basic base64(percent(username) ":" hex(sha512(password)))`.
// The percent-encoding set matches the web app's `encodeURIComponent` exactly;
// any drift shows up as a plain "wrong password" rejection.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::header::HeaderValue;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha512};

use crate::error::Error;

/// Characters left literal in the username; everything else is `%XX`.
const USERNAME_UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b'!')
    .remove(b'\'');

/// A user's login identity.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }

    /// Build credentials from raw bytes (e.g. an OS environment value).
    ///
    /// Fails with [`Error::Encoding`] if either part is not valid UTF-8.
    pub fn from_utf8(username: Vec<u8>, password: Vec<u8>) -> Result<Self, Error> {
        let username = String::from_utf8(username).map_err(|_| Error::Encoding {
            message: "username is not valid UTF-8".into(),
        })?;
        let password = String::from_utf8(password).map_err(|_| Error::Encoding {
            message: "password is not valid UTF-8".into(),
        })?;
        Ok(Self::new(username, SecretString::from(password)))
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &SecretString {
        &self.password
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

/// The ready-to-send `Authorization` value.
pub struct EncodedCredential(SecretString);

impl EncodedCredential {
    /// Encode credentials into `Basic <base64>`.
    pub fn encode(credentials: &Credentials) -> Result<Self, Error> {
        let plain = format!(
            "{}:{}",
            encode_username(&credentials.username),
            password_digest(credentials.password.expose_secret())
        );
        let value = format!("Basic {}", STANDARD.encode(plain.as_bytes()));

        // Always ASCII by construction; checked so a bad value never reaches the wire.
        HeaderValue::from_str(&value).map_err(|e| Error::Encoding {
            message: format!("not a valid header value: {e}"),
        })?;

        Ok(Self(SecretString::from(value)))
    }

    /// The header value, marked sensitive so it never shows up in debug logs.
    pub fn header_value(&self) -> Result<HeaderValue, Error> {
        let mut value =
            HeaderValue::from_str(self.0.expose_secret()).map_err(|e| Error::Encoding {
                message: format!("not a valid header value: {e}"),
            })?;
        value.set_sensitive(true);
        Ok(value)
    }

    /// The raw `Basic …` string.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for EncodedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncodedCredential([REDACTED])")
    }
}

/// Percent-encode a username the way the gateway's web client does.
pub fn encode_username(username: &str) -> String {
    utf8_percent_encode(username, USERNAME_UNRESERVED).to_string()
}

/// Lowercase hex SHA-512 of the password (128 characters).
pub fn password_digest(password: &str) -> String {
    hex::encode(Sha512::digest(password.as_bytes()))
}
