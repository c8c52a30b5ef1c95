//! Shared configuration for Coviva gateway tools.
//!
//! TOML profiles, credential resolution (env + keyring + plaintext), and
//! translation to `coviva_api::SessionConfig`. The CLI layers its own
//! flag overrides on top.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use coviva_api::{
    ChannelConfig, Command, Credentials, DeviceIdentity, DeviceProfile, Gateway, SessionConfig,
    TlsMode, TransportConfig,
};

/// Keyring service name; entries are keyed `<profile>/password`.
pub const KEYRING_SERVICE: &str = "coviva";

pub const ENV_USERNAME: &str = "COVIVA_USERNAME";
pub const ENV_PASSWORD: &str = "COVIVA_PASSWORD";
pub const ENV_DEVICE_ID: &str = "COVIVA_DEVICE_ID";
pub const ENV_COMMAND: &str = "COVIVA_COMMAND";
/// Overrides the config file location.
pub const ENV_CONFIG: &str = "COVIVA_CONFIG";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("no device identity configured for profile '{profile}'")]
    NoDeviceIdentity { profile: String },

    #[error("no command given and none configured for profile '{profile}'")]
    NoCommand { profile: String },

    #[error(transparent)]
    Api(#[from] coviva_api::Error),

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named gateway profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    /// `raw` or `json`.
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            timeout: default_timeout(),
        }
    }
}

fn default_output() -> String {
    "raw".into()
}
fn default_timeout() -> u64 {
    30
}

/// A named gateway profile.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Gateway id, the `<ID>` in `<ID>.koalabox.net`.
    #[serde(default)]
    pub gateway: String,

    /// Explicit HTTP(S) base URL; replaces the id-derived host.
    pub base_url: Option<String>,

    pub username: Option<String>,

    /// Password (plaintext; prefer keyring).
    pub password: Option<String>,

    /// Stable device fingerprint sent as `device_hardware_id`.
    pub device_id: Option<String>,

    /// Command sent when none is given on the command line.
    pub command: Option<String>,

    /// Path to an extra CA certificate (PEM).
    pub ca_cert: Option<PathBuf>,

    /// Override timeout in seconds.
    pub timeout: Option<u64>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path: `COVIVA_CONFIG`, then platform conventions.
pub fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(ENV_CONFIG) {
        return PathBuf::from(path);
    }
    ProjectDirs::from("net", "coviva", "coviva").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("coviva");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit file. Nested keys come from the environment
/// with `__` as separator, e.g. `COVIVA_DEFAULTS__TIMEOUT=10`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("COVIVA_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Lookup used for environment variables. Swappable so resolution can be
/// exercised without touching the process environment.
pub type EnvSource<'a> = &'a dyn Fn(&str) -> Option<OsString>;

fn process_env(name: &str) -> Option<OsString> {
    std::env::var_os(name)
}

/// Resolve username + password for `profile_name`.
///
/// Username: profile, then `COVIVA_USERNAME`. Password: `COVIVA_PASSWORD`,
/// then the system keyring, then plaintext in the profile.
pub fn resolve_credentials(profile: &Profile, profile_name: &str) -> Result<Credentials, ConfigError> {
    resolve_credentials_with(profile, profile_name, &process_env)
}

pub fn resolve_credentials_with(
    profile: &Profile,
    profile_name: &str,
    env: EnvSource<'_>,
) -> Result<Credentials, ConfigError> {
    let no_credentials = || ConfigError::NoCredentials {
        profile: profile_name.into(),
    };

    let username = match profile.username {
        Some(ref name) => name.clone().into_bytes(),
        None => env(ENV_USERNAME)
            .map(OsString::into_encoded_bytes)
            .ok_or_else(no_credentials)?,
    };

    // 1. Env var
    if let Some(pw) = env(ENV_PASSWORD) {
        return Ok(Credentials::from_utf8(username, pw.into_encoded_bytes())?);
    }

    // 2. Keyring
    if let Some(pw) = keyring_password(profile_name) {
        return Ok(Credentials::from_utf8(username, pw.into_bytes())?);
    }

    // 3. Plaintext in config
    if let Some(ref pw) = profile.password {
        return Ok(Credentials::from_utf8(username, pw.clone().into_bytes())?);
    }

    Err(no_credentials())
}

fn keyring_password(profile_name: &str) -> Option<String> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/password"))
        .ok()?
        .get_password()
        .ok()
}

/// Store a password in the system keyring for `profile_name`.
pub fn store_password(profile_name: &str, password: &str) -> Result<(), ConfigError> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/password"))?;
    entry.set_password(password)?;
    Ok(())
}

/// Device identity: `COVIVA_DEVICE_ID`, then the profile.
pub fn resolve_device_identity(
    profile: &Profile,
    profile_name: &str,
) -> Result<DeviceIdentity, ConfigError> {
    resolve_device_identity_with(profile, profile_name, &process_env)
}

pub fn resolve_device_identity_with(
    profile: &Profile,
    profile_name: &str,
    env: EnvSource<'_>,
) -> Result<DeviceIdentity, ConfigError> {
    env(ENV_DEVICE_ID)
        .and_then(|v| v.into_string().ok())
        .and_then(DeviceIdentity::new)
        .or_else(|| profile.device_id.clone().and_then(DeviceIdentity::new))
        .ok_or_else(|| ConfigError::NoDeviceIdentity {
            profile: profile_name.into(),
        })
}

/// A fresh identity: 32 lowercase hex chars. Generate once, then persist.
pub fn generate_device_identity() -> DeviceIdentity {
    let raw = uuid::Uuid::new_v4().simple().to_string();
    // A v4 uuid is never empty.
    DeviceIdentity::new(raw.clone()).unwrap_or_else(|| unreachable!("empty uuid {raw}"))
}

/// Command text: explicit argument, then `COVIVA_COMMAND`, then the profile.
pub fn resolve_command(
    explicit: Option<&str>,
    profile: &Profile,
    profile_name: &str,
) -> Result<Command, ConfigError> {
    resolve_command_with(explicit, profile, profile_name, &process_env)
}

pub fn resolve_command_with(
    explicit: Option<&str>,
    profile: &Profile,
    profile_name: &str,
    env: EnvSource<'_>,
) -> Result<Command, ConfigError> {
    let text = match explicit {
        Some(text) => text.to_owned(),
        None => env(ENV_COMMAND)
            .map(|v| v.to_string_lossy().into_owned())
            .or_else(|| profile.command.clone())
            .ok_or_else(|| ConfigError::NoCommand {
                profile: profile_name.into(),
            })?,
    };
    Ok(text.parse()?)
}

// ── Session settings ────────────────────────────────────────────────

/// Gateway endpoints from a profile: `base_url` wins over the id.
pub fn resolve_gateway(profile: &Profile) -> Result<Gateway, ConfigError> {
    if let Some(ref base) = profile.base_url {
        let url: url::Url = base.parse().map_err(|_| ConfigError::Validation {
            field: "base_url".into(),
            reason: format!("invalid URL: {base}"),
        })?;
        return Ok(Gateway::from_base_url(&url)?);
    }

    let id = profile.gateway.trim();
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(ConfigError::Validation {
            field: "gateway".into(),
            reason: format!("expected a gateway id like ABC123, got '{id}'"),
        });
    }
    Ok(Gateway::from_id(id)?)
}

/// Per-stage timeout from a number of seconds. Zero would expire every
/// stage immediately, so it is rejected.
pub fn resolve_timeout(secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::Validation {
            field: "timeout".into(),
            reason: "must be at least 1 second".into(),
        });
    }
    Ok(Duration::from_secs(secs))
}

/// Build a `SessionConfig` from a profile, no CLI overrides.
pub fn profile_to_session_config(
    profile: &Profile,
    profile_name: &str,
) -> Result<SessionConfig, ConfigError> {
    let gateway = resolve_gateway(profile)?;
    let device_identity = resolve_device_identity(profile, profile_name)?;
    let timeout = resolve_timeout(profile.timeout.unwrap_or_else(default_timeout))?;
    Ok(session_config(gateway, device_identity, profile.ca_cert.clone(), timeout))
}

/// Assemble a `SessionConfig`; one timeout bounds every stage.
pub fn session_config(
    gateway: Gateway,
    device_identity: DeviceIdentity,
    ca_cert: Option<PathBuf>,
    timeout: Duration,
) -> SessionConfig {
    let tls = ca_cert.map_or(TlsMode::System, TlsMode::CustomCa);
    SessionConfig {
        gateway,
        device_identity,
        device_profile: DeviceProfile::default(),
        transport: TransportConfig { tls, timeout },
        channel: ChannelConfig {
            read_timeout: timeout,
            ..ChannelConfig::default()
        },
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret as _;

    use super::*;

    fn env_of(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<OsString> {
        move |name| {
            pairs
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| OsString::from(v))
        }
    }

    fn profile() -> Profile {
        Profile {
            gateway: "abc123".into(),
            username: Some("alice@example.com".into()),
            password: Some("plain".into()),
            device_id: Some("dev-1".into()),
            ..Profile::default()
        }
    }

    #[test]
    fn env_password_beats_plaintext() {
        let env = env_of(&[(ENV_PASSWORD, "from-env")]);
        let creds = resolve_credentials_with(&profile(), "cfg-test", &env).unwrap();
        assert_eq!(creds.username(), "alice@example.com");
        assert_eq!(creds.password().expose_secret(), "from-env");
    }

    #[test]
    fn username_falls_back_to_env() {
        let env = env_of(&[(ENV_USERNAME, "bob"), (ENV_PASSWORD, "x")]);
        let p = Profile {
            username: None,
            ..profile()
        };
        assert_eq!(
            resolve_credentials_with(&p, "cfg-test", &env).unwrap().username(),
            "bob"
        );
    }

    #[test]
    fn missing_username_is_no_credentials() {
        let env = env_of(&[]);
        let p = Profile {
            username: None,
            ..profile()
        };
        assert!(matches!(
            resolve_credentials_with(&p, "cfg-test", &env),
            Err(ConfigError::NoCredentials { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_password_is_an_encoding_error() {
        use std::os::unix::ffi::OsStringExt as _;

        let env = |name: &str| (name == ENV_PASSWORD).then(|| OsString::from_vec(vec![0x66, 0xff]));
        let err = resolve_credentials_with(&profile(), "cfg-test", &env).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Api(coviva_api::Error::Encoding { .. })
        ));
    }

    #[test]
    fn device_identity_env_then_profile() {
        let env = env_of(&[(ENV_DEVICE_ID, "  env-dev ")]);
        assert_eq!(
            resolve_device_identity_with(&profile(), "p", &env).unwrap().as_str(),
            "env-dev"
        );

        let none = env_of(&[]);
        assert_eq!(
            resolve_device_identity_with(&profile(), "p", &none).unwrap().as_str(),
            "dev-1"
        );

        let p = Profile {
            device_id: None,
            ..profile()
        };
        assert!(matches!(
            resolve_device_identity_with(&p, "p", &none),
            Err(ConfigError::NoDeviceIdentity { .. })
        ));
    }

    #[test]
    fn generated_identity_is_32_hex_chars() {
        let id = generate_device_identity();
        assert_eq!(id.as_str().len(), 32);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, generate_device_identity());
    }

    #[test]
    fn command_precedence() {
        let p = Profile {
            command: Some("GET:all".into()),
            ..profile()
        };
        let env = env_of(&[(ENV_COMMAND, "GET:nodes/2")]);
        let none = env_of(&[]);

        let explicit = resolve_command_with(Some("GET:nodes/1"), &p, "p", &env).unwrap();
        assert_eq!(explicit.to_frame(), "GET:nodes/1");
        let from_env = resolve_command_with(None, &p, "p", &env).unwrap();
        assert_eq!(from_env.to_frame(), "GET:nodes/2");
        let from_profile = resolve_command_with(None, &p, "p", &none).unwrap();
        assert_eq!(from_profile.to_frame(), "GET:all");
        assert!(matches!(
            resolve_command_with(None, &profile(), "p", &none),
            Err(ConfigError::NoCommand { .. })
        ));
    }

    #[test]
    fn malformed_command_surfaces_as_api_error() {
        let none = env_of(&[]);
        assert!(matches!(
            resolve_command_with(Some("DELETE:x"), &profile(), "p", &none),
            Err(ConfigError::Api(coviva_api::Error::InvalidCommand { .. }))
        ));
    }

    #[test]
    fn gateway_from_id_or_base_url() {
        let gw = resolve_gateway(&profile()).unwrap();
        assert_eq!(gw.http_base().as_str(), "https://abc123.koalabox.net/");

        let p = Profile {
            base_url: Some("http://127.0.0.1:8080".into()),
            ..profile()
        };
        assert_eq!(resolve_gateway(&p).unwrap().ws_base().as_str(), "ws://127.0.0.1:8080/");
    }

    #[test]
    fn gateway_id_is_validated() {
        for bad in ["", "   ", "abc.evil.com", "a/b"] {
            let p = Profile {
                gateway: bad.into(),
                ..profile()
            };
            assert!(
                matches!(resolve_gateway(&p), Err(ConfigError::Validation { .. })),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn session_config_applies_timeout_everywhere() {
        let cfg = session_config(
            resolve_gateway(&profile()).unwrap(),
            DeviceIdentity::new("d").unwrap(),
            Some(PathBuf::from("/etc/ca.pem")),
            Duration::from_secs(7),
        );
        assert_eq!(cfg.transport.timeout, Duration::from_secs(7));
        assert_eq!(cfg.channel.read_timeout, Duration::from_secs(7));
        assert_eq!(cfg.channel.sub_protocol, "v2");
        assert!(matches!(cfg.transport.tls, TlsMode::CustomCa(_)));
    }

    #[test]
    fn save_then_load_round_trips_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut cfg = Config::default();
        cfg.profiles.insert("home".into(), profile());
        cfg.default_profile = Some("home".into());
        save_config_to(&cfg, &path).unwrap();

        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.default_profile.as_deref(), Some("home"));
        let home = &loaded.profiles["home"];
        assert_eq!(home.gateway, "abc123");
        assert_eq!(home.device_id.as_deref(), Some("dev-1"));
        assert_eq!(loaded.defaults.output, "raw");
        assert_eq!(loaded.defaults.timeout, 30);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        assert!(matches!(
            resolve_timeout(0),
            Err(ConfigError::Validation { ref field, .. }) if field == "timeout"
        ));
        assert_eq!(resolve_timeout(5).unwrap(), Duration::from_secs(5));

        let p = Profile {
            timeout: Some(0),
            ..profile()
        };
        assert!(matches!(
            profile_to_session_config(&p, "p"),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn malformed_file_is_an_error_not_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[profiles.home\ngateway = ").unwrap();

        assert!(matches!(
            load_config_from(&path),
            Err(ConfigError::Figment(_))
        ));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert!(loaded.profiles.is_empty());
        assert_eq!(loaded.default_profile.as_deref(), Some("default"));
    }
}
