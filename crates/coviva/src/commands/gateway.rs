//! `send`, `get`, `put` and `set`: one authenticated command per run.

use coviva_api::{Command as GatewayCommand, GatewayClient};

use crate::cli::{Command, GlobalOpts};
use crate::config;
use crate::error::CliError;
use crate::output;

/// Build the wire command for a gateway subcommand.
fn build_command(
    cmd: &Command,
    profile: &config::Profile,
    profile_name: &str,
) -> Result<GatewayCommand, CliError> {
    let built = match cmd {
        Command::Send(args) => {
            coviva_config::resolve_command(args.command.as_deref(), profile, profile_name)
                .map_err(|e| CliError::from_config(e, profile_name))?
        }
        Command::Get(args) => parse(&format!("GET:{}", args.path), profile_name)?,
        Command::Put(args) => {
            let built = GatewayCommand::put(args.path.as_str(), &args.param, &args.value);
            // Flag input gets the same validation as raw command text.
            parse(&built.to_frame(), profile_name)?
        }
        Command::Set(args) => {
            let built = GatewayCommand::set_attribute(args.node, args.attribute, &args.value);
            parse(&built.to_frame(), profile_name)?
        }
        Command::Config(_) | Command::Completions(_) => {
            return Err(CliError::Validation {
                field: "command".into(),
                reason: "not a gateway command".into(),
            });
        }
    };
    Ok(built)
}

fn parse(text: &str, profile_name: &str) -> Result<GatewayCommand, CliError> {
    text.parse().map_err(|e| CliError::from_api(e, profile_name))
}

pub async fn handle(cmd: Command, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = config::load_config()?;
    let (profile_name, profile) = config::effective_profile(global, &cfg)?;
    let command = build_command(&cmd, &profile, &profile_name)?;

    let session = config::resolve_session(&profile, &profile_name, global, &cfg.defaults)?;
    let credentials = coviva_config::resolve_credentials(&profile, &profile_name)
        .map_err(|e| CliError::from_config(e, &profile_name))?;
    tracing::debug!(
        profile = %profile_name,
        gateway = %session.gateway.http_base(),
        username = credentials.username(),
        "resolved session"
    );

    let client =
        GatewayClient::new(session).map_err(|e| CliError::from_api(e, &profile_name))?;
    let reply = client
        .execute(&credentials, &command)
        .await
        .map_err(|e| CliError::from_api(e, &profile_name))?;

    let format = config::output_format(global, &cfg.defaults);
    output::print_output(&output::render_reply(format, &reply), global.quiet);
    Ok(())
}
