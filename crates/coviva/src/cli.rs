//! Clap derive structures for the `coviva` CLI.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// coviva -- send one command to a Coviva home-automation gateway
#[derive(Debug, Parser)]
#[command(
    name = "coviva",
    version,
    about = "Send commands to a Coviva home-automation gateway",
    long_about = "Authenticates against a Coviva gateway, opens its command channel,\n\
        sends exactly one command and prints the gateway's reply.\n\n\
        Every invocation fetches a fresh access token; nothing is cached.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Gateway profile to use
    #[arg(long, short = 'p', env = "COVIVA_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Gateway id, the <ID> in <ID>.koalabox.net (overrides profile)
    #[arg(long, short = 'g', env = "COVIVA_GATEWAY", global = true)]
    pub gateway: Option<String>,

    /// Explicit gateway base URL, e.g. a local proxy (overrides --gateway)
    #[arg(long, env = "COVIVA_BASE_URL", global = true)]
    pub base_url: Option<String>,

    /// Account username (overrides profile)
    #[arg(long, short = 'u', global = true)]
    pub username: Option<String>,

    /// Device identity sent as device_hardware_id (overrides profile)
    #[arg(long, global = true)]
    pub device_id: Option<String>,

    /// Timeout in seconds for each stage
    #[arg(long, env = "COVIVA_TIMEOUT", global = true)]
    pub timeout: Option<u64>,

    /// Output format
    #[arg(long, short = 'o', env = "COVIVA_OUTPUT", global = true)]
    pub output: Option<OutputFormat>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

// ── Output Enum ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// The reply exactly as received (default)
    Raw,
    /// Pretty-printed JSON when the reply is JSON
    Json,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Send a raw command such as GET:nodes/1
    Send(SendArgs),

    /// Read a resource path
    Get(GetArgs),

    /// Write a value to a resource path
    Put(PutArgs),

    /// Set a node attribute's target value
    Set(SetArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Gateway Commands ─────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct SendArgs {
    /// Command text, VERB:path[?query]. Falls back to COVIVA_COMMAND or the profile
    pub command: Option<String>,
}

#[derive(Debug, Args)]
pub struct GetArgs {
    /// Resource path, e.g. nodes/1
    pub path: String,
}

#[derive(Debug, Args)]
pub struct PutArgs {
    /// Resource path, e.g. nodes/1/attributes/5
    pub path: String,

    /// Value to write
    #[arg(long)]
    pub value: String,

    /// Query parameter carrying the value
    #[arg(long, default_value = "target_value")]
    pub param: String,
}

#[derive(Debug, Args)]
pub struct SetArgs {
    /// Node id
    #[arg(long)]
    pub node: u64,

    /// Attribute id
    #[arg(long)]
    pub attribute: u64,

    /// Target value
    #[arg(long)]
    pub value: String,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create a profile with guided setup
    Init,

    /// Display current configuration (secrets masked)
    Show,

    /// Print the config file location
    Path,

    /// Store the active profile's password in the system keyring
    SetPassword,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
