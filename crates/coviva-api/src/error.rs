use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// The step of the authenticate → connect → command cycle an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Stage {
    /// Building the `Basic` credential.
    Encode,
    /// `POST /access_token`.
    Token,
    /// WebSocket upgrade on `/connection`.
    Connect,
    /// Sending the command frame and waiting for the reply.
    Exchange,
}

/// Coarse error classes, one per failure family the CLI reports distinctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Encoding,
    Network,
    Authentication,
    Connection,
    Timeout,
    ResponseFormat,
    Usage,
}

/// Top-level error type for the `coviva-api` crate.
///
/// Variants never carry the bearer token or the password. The channel URL
/// embeds the token, so connection errors only ever see its redacted form.
#[derive(Debug, Error)]
pub enum Error {
    // ── Encoding ────────────────────────────────────────────────────
    /// Credential could not be turned into an `Authorization` value.
    #[error("[encode] credential encoding failed: {message}")]
    Encoding { message: String },

    // ── Token endpoint ──────────────────────────────────────────────
    /// Transport failure before the gateway answered (DNS, TCP, TLS).
    #[error("[token] could not reach the gateway: {0}")]
    Network(#[source] reqwest::Error),

    /// Gateway answered the token request with a 4xx/5xx status.
    #[error("[token] authentication rejected (HTTP {status}): {message}")]
    Authentication { status: u16, message: String },

    // ── Channel ─────────────────────────────────────────────────────
    /// TLS handshake, HTTP upgrade or sub-protocol negotiation failed.
    #[error("[connect] WebSocket connection failed: {message}")]
    Connection { message: String },

    /// Channel closed before a reply, or used after it was closed.
    #[error("[exchange] channel closed: {reason}")]
    ChannelClosed { reason: String },

    // ── Shared ──────────────────────────────────────────────────────
    /// No answer within the configured bound.
    #[error("[{stage}] timed out after {}", humantime::format_duration(*timeout))]
    Timeout { stage: Stage, timeout: Duration },

    /// Gateway answered with something that does not have the expected shape.
    #[error("[{stage}] malformed response: {message}")]
    ResponseFormat { stage: Stage, message: String },

    // ── Input / setup ───────────────────────────────────────────────
    /// A command string that is not `VERB:path[?query]`.
    #[error("invalid command {input:?}: {reason}")]
    InvalidCommand { input: String, reason: String },

    /// URL parsing error.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// CA certificate loading or HTTP client construction failed.
    #[error("TLS error: {0}")]
    Tls(String),
}

impl Error {
    /// The cycle step this error belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Encoding { .. } => Stage::Encode,
            Self::Network(_) | Self::Authentication { .. } | Self::Tls(_) => Stage::Token,
            Self::Connection { .. } | Self::InvalidUrl(_) => Stage::Connect,
            Self::ChannelClosed { .. } | Self::InvalidCommand { .. } => Stage::Exchange,
            Self::Timeout { stage, .. } | Self::ResponseFormat { stage, .. } => *stage,
        }
    }

    /// The failure family, used for exit codes and diagnostics.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Encoding { .. } => ErrorKind::Encoding,
            Self::Network(_) | Self::Tls(_) => ErrorKind::Network,
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::Connection { .. } | Self::ChannelClosed { .. } => ErrorKind::Connection,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::ResponseFormat { .. } => ErrorKind::ResponseFormat,
            Self::InvalidCommand { .. } | Self::InvalidUrl(_) => ErrorKind::Usage,
        }
    }

    /// Map a reqwest failure on the token request into the taxonomy.
    pub(crate) fn from_token_transport(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                stage: Stage::Token,
                timeout,
            }
        } else {
            // Strip the URL; it carries no secret but keeps messages short.
            Self::Network(err.without_url())
        }
    }

    pub(crate) fn response_format(stage: Stage, message: impl fmt::Display) -> Self {
        Self::ResponseFormat {
            stage,
            message: message.to_string(),
        }
    }
}
