//! CLI configuration: thin wrapper around `coviva_config` shared types.
//!
//! Re-exports the shared types and adds resolution that respects
//! `GlobalOpts` flag overrides (--gateway, --username, etc.).

use coviva_api::{DeviceIdentity, SessionConfig};

use crate::cli::{GlobalOpts, OutputFormat};
use crate::error::CliError;

// ── Re-exports from shared crate ────────────────────────────────────

pub use coviva_config::{
    Config, Defaults, Profile, config_path, generate_device_identity, load_config, save_config,
};

// ── CLI-specific helpers ────────────────────────────────────────────

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// The active profile with flag overrides applied.
///
/// Without a stored profile, `--gateway` or `--base-url` is enough to
/// build one on the fly.
pub fn effective_profile(global: &GlobalOpts, cfg: &Config) -> Result<(String, Profile), CliError> {
    let name = active_profile_name(global, cfg);

    let mut profile = match cfg.profiles.get(&name) {
        Some(p) => p.clone(),
        None if global.gateway.is_some() || global.base_url.is_some() => Profile::default(),
        None => {
            return Err(CliError::NoConfig {
                path: config_path().display().to_string(),
            });
        }
    };

    // Flag > env > profile for the endpoint; an explicit id drops the
    // profile's base URL.
    if let Some(ref id) = global.gateway {
        profile.gateway.clone_from(id);
        profile.base_url = None;
    }
    if let Some(ref url) = global.base_url {
        profile.base_url = Some(url.clone());
    }
    if let Some(ref user) = global.username {
        profile.username = Some(user.clone());
    }
    if let Some(secs) = global.timeout {
        profile.timeout = Some(secs);
    }

    Ok((name, profile))
}

/// Translate the effective profile + flags into a `SessionConfig`.
pub fn resolve_session(
    profile: &Profile,
    profile_name: &str,
    global: &GlobalOpts,
    defaults: &Defaults,
) -> Result<SessionConfig, CliError> {
    let scoped = |e: coviva_config::ConfigError| CliError::from_config(e, profile_name);
    let gateway = coviva_config::resolve_gateway(profile).map_err(scoped)?;

    let device_identity = match global.device_id.as_deref() {
        Some(raw) => DeviceIdentity::new(raw).ok_or_else(|| CliError::Validation {
            field: "device-id".into(),
            reason: "cannot be empty".into(),
        })?,
        None => coviva_config::resolve_device_identity(profile, profile_name).map_err(scoped)?,
    };

    let timeout = coviva_config::resolve_timeout(profile.timeout.unwrap_or(defaults.timeout))
        .map_err(scoped)?;

    Ok(coviva_config::session_config(
        gateway,
        device_identity,
        profile.ca_cert.clone(),
        timeout,
    ))
}

/// `--output`, else the config default, else raw.
pub fn output_format(global: &GlobalOpts, defaults: &Defaults) -> OutputFormat {
    global.output.unwrap_or_else(|| {
        if defaults.output.eq_ignore_ascii_case("json") {
            OutputFormat::Json
        } else {
            OutputFormat::Raw
        }
    })
}
