// Access token exchange: request body, device description and the
// `key=value&key=value` response format.
//
// The token endpoint does not speak JSON. Its body is a `&`-joined list of
// pairs whose values are taken literally, so the tokenizer below splits on
// the first `=` only and never percent-decodes.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::error::{Error, Stage};

/// Seconds shaved off the advertised lifetime before a token counts as expired.
pub const EXPIRY_MARGIN_SECS: u64 = 100;

// ── DeviceIdentity ──────────────────────────────────────────────────

/// Stable fingerprint of this client installation (`device_hardware_id`).
///
/// The gateway records one client device per distinct identity, so it must
/// stay the same across runs of the same install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    /// Wrap an identity string. Surrounding whitespace is trimmed; an empty
    /// identity is rejected.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_owned()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── DeviceProfile ───────────────────────────────────────────────────

/// How this client describes itself in the token request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
    pub name: String,
    pub device_type: u8,
    pub os: u8,
    pub app: u8,
}

impl Default for DeviceProfile {
    /// The values the Coviva web app sends. The name is already
    /// percent-encoded and gets form-encoded a second time, as the web app does.
    fn default() -> Self {
        Self {
            name: "Web%20App%20%7C%20Safari".into(),
            device_type: 4,
            os: 6,
            app: 4,
        }
    }
}

/// URL-form body of `POST /access_token`.
#[derive(Debug, Serialize)]
pub(crate) struct TokenRequest<'a> {
    device_hardware_id: &'a str,
    device_name: &'a str,
    device_type: u8,
    device_os: u8,
    device_app: u8,
}

impl<'a> TokenRequest<'a> {
    pub(crate) fn new(identity: &'a DeviceIdentity, profile: &'a DeviceProfile) -> Self {
        Self {
            device_hardware_id: identity.as_str(),
            device_name: &profile.name,
            device_type: profile.device_type,
            device_os: profile.os,
            device_app: profile.app,
        }
    }
}

// ── TokenResponse ───────────────────────────────────────────────────

/// A successful token exchange.
pub struct TokenResponse {
    access_token: SecretString,
    pub user_id: String,
    pub device_id: String,
    pub myhagerid: String,
    /// Raw `expires` value (token lifetime in seconds, as sent).
    pub expires: String,
    /// When the response was parsed; base for [`expires_at`](Self::expires_at).
    pub issued_at: DateTime<Utc>,
}

impl TokenResponse {
    /// Parse a response body received at `issued_at`.
    pub fn parse(body: &str, issued_at: DateTime<Utc>) -> Result<Self, Error> {
        let mut fields = tokenize(body)?;

        let mut take = |key: &str| -> Result<String, Error> {
            match fields.remove(key) {
                Some(value) if !value.is_empty() => Ok(value.to_owned()),
                Some(_) => Err(Error::response_format(
                    Stage::Token,
                    format!("key `{key}` has an empty value"),
                )),
                None => Err(Error::response_format(
                    Stage::Token,
                    format!("missing required key `{key}`"),
                )),
            }
        };

        Ok(Self {
            access_token: SecretString::from(take("access_token")?),
            myhagerid: take("myhagerid")?,
            user_id: take("user_id")?,
            device_id: take("device_id")?,
            expires: take("expires")?,
            issued_at,
        })
    }

    /// The bearer token. Only the channel URL builder should need this.
    pub fn access_token(&self) -> &str {
        self.access_token.expose_secret()
    }

    /// Advertised lifetime, if `expires` is a number of seconds.
    pub fn expires_in(&self) -> Option<Duration> {
        self.expires.trim().parse::<u64>().ok().map(Duration::from_secs)
    }

    /// Moment the token should be considered expired (lifetime minus a
    /// [`EXPIRY_MARGIN_SECS`] safety margin).
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let lifetime = self.expires_in()?.as_secs().saturating_sub(EXPIRY_MARGIN_SECS);
        let delta = TimeDelta::try_seconds(i64::try_from(lifetime).ok()?)?;
        self.issued_at.checked_add_signed(delta)
    }

    /// `true` once [`expires_at`](Self::expires_at) has passed.
    /// Tokens with an unreadable lifetime never report as expired.
    pub fn is_expired(&self) -> bool {
        self.expires_at().is_some_and(|at| at <= Utc::now())
    }
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("user_id", &self.user_id)
            .field("device_id", &self.device_id)
            .field("myhagerid", &self.myhagerid)
            .field("expires", &self.expires)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// Parse a token response body received just now.
pub fn parse_token_response(body: &str) -> Result<TokenResponse, Error> {
    TokenResponse::parse(body, Utc::now())
}

/// Split `k1=v1&k2=v2` into a map. Later duplicates win.
fn tokenize(body: &str) -> Result<HashMap<&str, &str>, Error> {
    let body = body.trim();
    if body.is_empty() {
        return Err(Error::response_format(Stage::Token, "empty response body"));
    }

    // Segments may be a bare token, so errors name only position and length.
    let mut fields = HashMap::new();
    for (index, segment) in body.split('&').filter(|s| !s.is_empty()).enumerate() {
        let Some((key, value)) = segment.split_once('=') else {
            return Err(Error::response_format(
                Stage::Token,
                format!("segment #{index} ({} bytes) has no `=`", segment.len()),
            ));
        };
        if key.is_empty() {
            return Err(Error::response_format(
                Stage::Token,
                "segment with an empty key",
            ));
        }
        fields.insert(key, value);
    }
    Ok(fields)
}
