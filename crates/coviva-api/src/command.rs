//! Gateway commands and replies.
//!
//! A command is one line of text, `<VERB>:<path>[?<query>]`, sent as a single
//! WebSocket text frame. Paths and values are passed through untouched: the
//! caller is responsible for producing something the gateway accepts.
//!
//! ```
//! use coviva_api::Command;
//!
//! let cmd = Command::set_attribute(1, 5, 50);
//! assert_eq!(cmd.to_string(), "PUT:nodes/1/attributes/5?target_value=50");
//! ```

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Query parameter the gateway uses for attribute writes.
pub const TARGET_VALUE_PARAM: &str = "target_value";

/// Read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Verb {
    Get,
    Put,
}

/// One directive for the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    verb: Verb,
    path: String,
    query: Option<String>,
}

impl Command {
    /// `GET:<path>`
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            verb: Verb::Get,
            path: path.into(),
            query: None,
        }
    }

    /// `PUT:<path>?<param>=<value>`
    pub fn put(path: impl Into<String>, param: &str, value: impl fmt::Display) -> Self {
        Self {
            verb: Verb::Put,
            path: path.into(),
            query: Some(format!("{param}={value}")),
        }
    }

    /// `PUT:nodes/<node>/attributes/<attribute>?target_value=<value>`
    pub fn set_attribute(node: u64, attribute: u64, value: impl fmt::Display) -> Self {
        Self::put(attribute_path(node, attribute), TARGET_VALUE_PARAM, value)
    }

    pub fn verb(&self) -> Verb {
        self.verb
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// The exact text frame sent on the wire.
    pub fn to_frame(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.verb, self.path)?;
        if let Some(ref query) = self.query {
            write!(f, "?{query}")?;
        }
        Ok(())
    }
}

impl FromStr for Command {
    type Err = Error;

    /// Parse raw command text such as `GET:nodes/1` or
    /// `PUT:nodes/1/attributes/5?target_value=50`.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| Error::InvalidCommand {
            input: input.to_owned(),
            reason: reason.to_owned(),
        };

        if input.chars().any(char::is_whitespace) {
            return Err(invalid("whitespace is not allowed in a command"));
        }

        let (verb, rest) = input
            .split_once(':')
            .ok_or_else(|| invalid("expected `<VERB>:<path>`"))?;
        let verb = Verb::from_str(verb).map_err(|_| invalid("verb must be GET or PUT"))?;

        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (rest, None),
        };
        if path.is_empty() {
            return Err(invalid("path is empty"));
        }
        if query.is_some_and(str::is_empty) {
            return Err(invalid("query after `?` is empty"));
        }

        Ok(Self {
            verb,
            path: path.to_owned(),
            query: query.map(str::to_owned),
        })
    }
}

/// `nodes/<id>`
pub fn node_path(node: u64) -> String {
    format!("nodes/{node}")
}

/// `nodes/<node>/attributes/<attribute>`
pub fn attribute_path(node: u64, attribute: u64) -> String {
    format!("nodes/{node}/attributes/{attribute}")
}

// ── Reply ───────────────────────────────────────────────────────────

/// The gateway's reply, exactly as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply(String);

impl CommandReply {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// Interpret the reply as JSON, which is what the gateway normally sends.
    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.0)
    }
}

impl From<String> for CommandReply {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl From<&str> for CommandReply {
    fn from(raw: &str) -> Self {
        Self(raw.to_owned())
    }
}

impl fmt::Display for CommandReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
