// coviva-api: Async client for the Coviva home-automation gateway
//
// One command per session: encode credentials, fetch an access token, open
// the `v2` WebSocket channel, send one frame, read one reply.

pub mod channel;
pub mod client;
pub mod command;
pub mod credential;
pub mod error;
pub mod token;
pub mod transport;

pub use channel::{ChannelConfig, ChannelState, SessionChannel, channel_url, redact_token};
pub use client::{Gateway, GatewayClient, SessionConfig};
pub use command::{Command, CommandReply, Verb, attribute_path, node_path};
pub use credential::{Credentials, EncodedCredential};
pub use error::{Error, ErrorKind, Stage};
pub use token::{DeviceIdentity, DeviceProfile, TokenResponse, parse_token_response};
pub use transport::{TlsMode, TransportConfig};
