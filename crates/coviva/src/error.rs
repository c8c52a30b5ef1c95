//! CLI error types with miette diagnostics.
//!
//! Maps `coviva_api::Error` and `ConfigError` into user-facing errors with
//! actionable help text and one exit code per failure family.

use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

use coviva_api::{Error as ApiError, ErrorKind, Stage};
use coviva_config::ConfigError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
    pub const ENCODING: i32 = 9;
    pub const NETWORK: i32 = 10;
    pub const RESPONSE_FORMAT: i32 = 11;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Encoding ─────────────────────────────────────────────────────
    #[error("Could not encode credentials: {message}")]
    #[diagnostic(
        code(coviva::encoding),
        help("Username and password must be valid UTF-8.")
    )]
    Encoding { message: String },

    // ── Token endpoint ───────────────────────────────────────────────
    #[error("Could not reach the gateway")]
    #[diagnostic(
        code(coviva::network),
        help(
            "Check the gateway id and your network connection.\n\
             Try: coviva config show"
        )
    )]
    Network {
        #[source]
        source: ApiError,
    },

    #[error("Authentication failed (HTTP {status}): {message}")]
    #[diagnostic(
        code(coviva::auth_failed),
        help(
            "Verify the username and password for profile '{profile}'.\n\
             Run: coviva config set-password --profile {profile}"
        )
    )]
    AuthFailed {
        status: u16,
        message: String,
        profile: String,
    },

    #[error("No credentials configured for profile '{profile}'")]
    #[diagnostic(
        code(coviva::no_credentials),
        help(
            "Configure credentials with: coviva config init\n\
             Or set COVIVA_USERNAME and COVIVA_PASSWORD."
        )
    )]
    NoCredentials { profile: String },

    // ── Channel ──────────────────────────────────────────────────────
    #[error("Command channel failed: {message}")]
    #[diagnostic(
        code(coviva::connection_failed),
        help("The gateway accepted the login but the WebSocket channel did not complete.")
    )]
    ConnectionFailed { message: String },

    // ── Timeout ──────────────────────────────────────────────────────
    #[error("Timed out after {} during {stage}", humantime::format_duration(*timeout))]
    #[diagnostic(
        code(coviva::timeout),
        help("Increase timeout with --timeout or check the gateway's responsiveness.")
    )]
    Timeout { stage: Stage, timeout: Duration },

    // ── Response ─────────────────────────────────────────────────────
    #[error("Unexpected response during {stage}: {message}")]
    #[diagnostic(code(coviva::response_format))]
    ResponseFormat { stage: Stage, message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(coviva::validation))]
    Validation { field: String, reason: String },

    #[error("Invalid command {input:?}: {reason}")]
    #[diagnostic(
        code(coviva::invalid_command),
        help("Commands look like GET:nodes/1 or PUT:nodes/1/attributes/5?target_value=50")
    )]
    InvalidCommand { input: String, reason: String },

    #[error("No command given for profile '{profile}'")]
    #[diagnostic(
        code(coviva::no_command),
        help("Pass one, e.g. `coviva send GET:nodes/1`, or set COVIVA_COMMAND.")
    )]
    NoCommand { profile: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("No device identity for profile '{profile}'")]
    #[diagnostic(
        code(coviva::no_device_identity),
        help(
            "Run: coviva config init (generates one)\n\
             Or pass --device-id / set COVIVA_DEVICE_ID."
        )
    )]
    NoDeviceIdentity { profile: String },

    #[error("No gateway configured")]
    #[diagnostic(
        code(coviva::no_config),
        help(
            "Create a profile with: coviva config init\n\
             Or pass --gateway <ID>. Expected config at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error("Configuration error: {0}")]
    #[diagnostic(
        code(coviva::config),
        help("Fix or remove the file shown by: coviva config path")
    )]
    Config(String),

    #[error(transparent)]
    #[diagnostic(code(coviva::api))]
    Api(ApiError),

    // ── IO ───────────────────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Encoding { .. } => exit_code::ENCODING,
            Self::Network { .. } => exit_code::NETWORK,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::ResponseFormat { .. } => exit_code::RESPONSE_FORMAT,
            Self::Validation { .. }
            | Self::InvalidCommand { .. }
            | Self::NoCommand { .. }
            | Self::NoDeviceIdentity { .. }
            | Self::NoConfig { .. } => exit_code::USAGE,
            Self::Api(err) => match err.kind() {
                ErrorKind::Encoding => exit_code::ENCODING,
                ErrorKind::Network => exit_code::NETWORK,
                ErrorKind::Authentication => exit_code::AUTH,
                ErrorKind::Connection => exit_code::CONNECTION,
                ErrorKind::Timeout => exit_code::TIMEOUT,
                ErrorKind::ResponseFormat => exit_code::RESPONSE_FORMAT,
                ErrorKind::Usage => exit_code::USAGE,
            },
            Self::Config(_) | Self::Io(_) => exit_code::GENERAL,
        }
    }

    /// Attach the active profile name to an api error.
    pub fn from_api(err: ApiError, profile: &str) -> Self {
        match err {
            ApiError::Encoding { message } => Self::Encoding { message },
            ApiError::Network(_) => Self::Network { source: err },
            ApiError::Authentication { status, message } => Self::AuthFailed {
                status,
                message,
                profile: profile.into(),
            },
            ApiError::Connection { message } => Self::ConnectionFailed { message },
            ApiError::ChannelClosed { reason } => Self::ConnectionFailed { message: reason },
            ApiError::Timeout { stage, timeout } => Self::Timeout { stage, timeout },
            ApiError::ResponseFormat { stage, message } => Self::ResponseFormat { stage, message },
            ApiError::InvalidCommand { input, reason } => Self::InvalidCommand { input, reason },
            other => Self::Api(other),
        }
    }

    /// Map a config error that may wrap an api error for `profile`.
    pub fn from_config(err: ConfigError, profile: &str) -> Self {
        match err {
            ConfigError::Api(api) => Self::from_api(api, profile),
            other => Self::from(other),
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::NoCredentials { profile } => Self::NoCredentials { profile },
            ConfigError::NoDeviceIdentity { profile } => Self::NoDeviceIdentity { profile },
            ConfigError::NoCommand { profile } => Self::NoCommand { profile },
            // No profile is known here; callers that have one use `from_config`.
            ConfigError::Api(api) => Self::Api(api),
            ConfigError::Io(e) => Self::Io(e),
            other => Self::Config(other.to_string()),
        }
    }
}
