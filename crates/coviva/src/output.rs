//! Output formatting for gateway replies.
//!
//! stdout carries the reply and nothing else; diagnostics go to stderr.

use std::io::{self, Write};

use coviva_api::CommandReply;

use crate::cli::OutputFormat;

/// Render a reply in the chosen format.
///
/// `raw` is byte-for-byte what the gateway sent. `json` pretty-prints when
/// the reply parses as JSON and falls back to the raw text otherwise.
pub fn render_reply(format: OutputFormat, reply: &CommandReply) -> String {
    match format {
        OutputFormat::Raw => reply.as_str().to_owned(),
        OutputFormat::Json => reply
            .to_json()
            .ok()
            .and_then(|value| serde_json::to_string_pretty(&value).ok())
            .unwrap_or_else(|| reply.as_str().to_owned()),
    }
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}
