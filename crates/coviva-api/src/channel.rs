//! The authenticated WebSocket command channel.
//!
//! A [`SessionChannel`] lives for exactly one command: it is opened with a
//! fresh access token, carries one text frame each way, and is closed on
//! every outcome of [`SessionChannel::exchange`]. Replies are not tagged, so
//! the first text frame after the send is taken as the answer.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{ClientRequestBuilder, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace};
use url::Url;

use crate::command::{Command, CommandReply};
use crate::error::{Error, Stage};
use crate::token::TokenResponse;

/// Sub-protocol the gateway speaks on `/connection`.
pub const SUB_PROTOCOL: &str = "v2";

/// Upper bound on the closing handshake; the reply is already in hand by then.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Lifecycle of a [`SessionChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Open,
    Closed,
}

/// Channel settings.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Sub-protocol requested in the upgrade. Default: `v2`.
    pub sub_protocol: String,

    /// Bound on the handshake and on waiting for a reply. Default: 30s.
    pub read_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            sub_protocol: SUB_PROTOCOL.into(),
            read_timeout: Duration::from_secs(30),
        }
    }
}

/// Build `wss://<host>/connection?access_token=<token>` from the
/// gateway's WebSocket base URL. The token goes in verbatim.
pub fn channel_url(ws_base: &Url, token: &TokenResponse) -> Result<Url, Error> {
    let mut url = ws_base.join("/connection")?;
    url.set_query(Some(&format!("access_token={}", token.access_token())));
    Ok(url)
}

/// A URL safe to log: any query string is replaced.
pub fn redact_token(url: &Url) -> String {
    let mut redacted = url.clone();
    if redacted.query().is_some() {
        redacted.set_query(Some("access_token=[REDACTED]"));
    }
    redacted.to_string()
}

/// A live, authenticated duplex connection to the gateway.
pub struct SessionChannel {
    stream: Option<WsStream>,
    state: ChannelState,
    protocol: String,
    config: ChannelConfig,
}

impl SessionChannel {
    /// Open the channel, requesting `config.sub_protocol`.
    ///
    /// The whole handshake is bounded by `config.read_timeout`. A server that
    /// does not agree to the sub-protocol fails the connection.
    pub async fn connect(url: &Url, config: &ChannelConfig) -> Result<Self, Error> {
        let redacted = redact_token(url);
        debug!(state = %ChannelState::Disconnected, url = %redacted, "opening channel");

        let uri: Uri = url.as_str().parse().map_err(|e| Error::Connection {
            message: format!("invalid channel URI {redacted}: {e}"),
        })?;
        let request = ClientRequestBuilder::new(uri).with_sub_protocol(config.sub_protocol.clone());

        debug!(state = %ChannelState::Connecting, protocol = %config.sub_protocol, "upgrading");
        let (stream, response) =
            tokio::time::timeout(config.read_timeout, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| Error::Timeout {
                    stage: Stage::Connect,
                    timeout: config.read_timeout,
                })?
                .map_err(|e| Error::Connection {
                    message: e.to_string(),
                })?;

        let protocol = response
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        if protocol != config.sub_protocol {
            return Err(Error::Connection {
                message: format!(
                    "gateway negotiated sub-protocol {protocol:?}, expected {:?}",
                    config.sub_protocol
                ),
            });
        }

        info!(state = %ChannelState::Open, protocol = %protocol, "channel open");
        Ok(Self {
            stream: Some(stream),
            state: ChannelState::Open,
            protocol,
            config: config.clone(),
        })
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// The sub-protocol agreed during the upgrade.
    pub fn negotiated_protocol(&self) -> &str {
        &self.protocol
    }

    pub fn read_timeout(&self) -> Duration {
        self.config.read_timeout
    }

    /// Send `command` and wait for the first text frame in return.
    ///
    /// The channel is closed afterwards whatever the outcome; calling this
    /// again fails with [`Error::ChannelClosed`].
    pub async fn exchange(&mut self, command: &Command) -> Result<CommandReply, Error> {
        if self.state != ChannelState::Open {
            return Err(Error::ChannelClosed {
                reason: format!("channel is {}, not Open", self.state),
            });
        }

        let result = self.send_and_receive(command).await;
        self.close().await;
        result
    }

    /// Close the channel. Idempotent.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            match tokio::time::timeout(CLOSE_GRACE, stream.close(None)).await {
                Ok(Ok(())) => trace!("close frame sent"),
                Ok(Err(e)) => debug!(error = %e, "close handshake failed"),
                Err(_) => debug!("close handshake timed out"),
            }
        }
        if self.state != ChannelState::Closed {
            debug!(state = %ChannelState::Closed, "channel closed");
            self.state = ChannelState::Closed;
        }
    }

    async fn send_and_receive(&mut self, command: &Command) -> Result<CommandReply, Error> {
        let timeout = self.config.read_timeout;
        let stream = self.stream.as_mut().ok_or_else(|| Error::ChannelClosed {
            reason: "no underlying connection".into(),
        })?;

        let frame = command.to_frame();
        info!(command = %frame, "sending command");
        stream
            .send(Message::text(frame))
            .await
            .map_err(|e| Error::ChannelClosed {
                reason: format!("send failed: {e}"),
            })?;

        let reply = tokio::time::timeout(timeout, next_text_frame(stream))
            .await
            .map_err(|_| Error::Timeout {
                stage: Stage::Exchange,
                timeout,
            })??;

        debug!(bytes = reply.as_str().len(), "reply received");
        Ok(reply)
    }
}

/// Read until the first text frame. Control frames are skipped.
async fn next_text_frame(stream: &mut WsStream) -> Result<CommandReply, Error> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => return Ok(CommandReply::from(text.as_str())),
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {
                trace!("control frame while waiting for reply");
            }
            Some(Ok(Message::Binary(bytes))) => {
                return Err(Error::response_format(
                    Stage::Exchange,
                    format!("expected a text frame, got {} binary bytes", bytes.len()),
                ));
            }
            Some(Ok(Message::Close(frame))) => {
                return Err(Error::ChannelClosed {
                    reason: describe_close(frame.as_ref()),
                });
            }
            Some(Err(e)) => {
                return Err(Error::ChannelClosed {
                    reason: e.to_string(),
                });
            }
            None => {
                return Err(Error::ChannelClosed {
                    reason: "connection ended before a reply".into(),
                });
            }
        }
    }
}

fn describe_close(frame: Option<&CloseFrame>) -> String {
    match frame {
        Some(cf) if cf.reason.is_empty() => format!("gateway closed (code {})", cf.code),
        Some(cf) => format!("gateway closed (code {}): {}", cf.code, cf.reason),
        None => "gateway closed without a reason".into(),
    }
}
