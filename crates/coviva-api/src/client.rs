// One-shot gateway client
//
// Runs the whole cycle as a straight line of fallible steps: encode the
// credential, exchange it for a token, open the channel, send one command,
// take one reply. Nothing is cached between calls; every `execute` starts
// from a fresh token.

use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, AUTHORIZATION, HOST, HeaderMap, HeaderValue, ORIGIN, REFERER,
    USER_AGENT,
};
use tracing::{Instrument, debug, info, info_span};
use url::Url;

use crate::channel::{ChannelConfig, SessionChannel, channel_url};
use crate::command::{Command, CommandReply};
use crate::credential::{Credentials, EncodedCredential};
use crate::error::{Error, Stage};
use crate::token::{DeviceIdentity, DeviceProfile, TokenRequest, TokenResponse};
use crate::transport::{BROWSER_USER_AGENT, TransportConfig};

/// Domain under which every gateway gets a subdomain.
pub const GATEWAY_DOMAIN: &str = "koalabox.net";

/// Origin of the web app the gateway expects requests from.
pub const WEB_APP_ORIGIN: &str = "http://mycoviva.net";

// ── Gateway ─────────────────────────────────────────────────────────

/// Where the token endpoint and the command channel live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gateway {
    http_base: Url,
    ws_base: Url,
}

impl Gateway {
    /// `https://<ID>.koalabox.net` / `wss://<ID>.koalabox.net`.
    pub fn from_id(id: &str) -> Result<Self, Error> {
        let host = format!("{}.{GATEWAY_DOMAIN}", id.trim().to_uppercase());
        Ok(Self {
            http_base: Url::parse(&format!("https://{host}"))?,
            ws_base: Url::parse(&format!("wss://{host}"))?,
        })
    }

    /// Derive both endpoints from one HTTP(S) base URL (proxies, local test
    /// servers). `https` maps to `wss`, `http` to `ws`.
    pub fn from_base_url(base: &Url) -> Result<Self, Error> {
        let ws_scheme = match base.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => {
                return Err(Error::Connection {
                    message: format!("unsupported gateway URL scheme {other:?}"),
                });
            }
        };
        let mut ws_base = base.clone();
        ws_base.set_scheme(ws_scheme).map_err(|()| Error::Connection {
            message: format!("cannot derive a {ws_scheme} URL from {base}"),
        })?;
        Ok(Self {
            http_base: base.clone(),
            ws_base,
        })
    }

    /// Explicit endpoints, for setups where token and channel are served
    /// from different places.
    pub fn with_endpoints(http_base: Url, ws_base: Url) -> Self {
        Self { http_base, ws_base }
    }

    pub fn http_base(&self) -> &Url {
        &self.http_base
    }

    pub fn ws_base(&self) -> &Url {
        &self.ws_base
    }

    /// `host[:port]` for the `Host` header.
    fn host_header(&self) -> Result<HeaderValue, Error> {
        let host = self.http_base.host_str().ok_or_else(|| Error::Connection {
            message: format!("gateway URL {} has no host", self.http_base),
        })?;
        let value = match self.http_base.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        };
        HeaderValue::from_str(&value).map_err(|e| Error::Connection {
            message: format!("invalid gateway host {value:?}: {e}"),
        })
    }
}

// ── SessionConfig ───────────────────────────────────────────────────

/// Everything the cycle needs besides the user's credentials and command.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub gateway: Gateway,
    pub device_identity: DeviceIdentity,
    pub device_profile: DeviceProfile,
    pub transport: TransportConfig,
    pub channel: ChannelConfig,
}

impl SessionConfig {
    /// Defaults for everything except the gateway and identity.
    pub fn new(gateway: Gateway, device_identity: DeviceIdentity) -> Self {
        Self {
            gateway,
            device_identity,
            device_profile: DeviceProfile::default(),
            transport: TransportConfig::default(),
            channel: ChannelConfig::default(),
        }
    }
}

// ── GatewayClient ───────────────────────────────────────────────────

/// Client for one gateway. Cheap to keep around; holds no session state.
pub struct GatewayClient {
    http: reqwest::Client,
    config: SessionConfig,
}

impl GatewayClient {
    pub fn new(config: SessionConfig) -> Result<Self, Error> {
        let http = config.transport.build_client()?;
        Ok(Self { http, config })
    }

    /// Use a pre-built `reqwest::Client` (shared pools, tests). The user
    /// agent and timeout are still applied per request.
    pub fn with_client(http: reqwest::Client, config: SessionConfig) -> Self {
        Self { http, config }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// `POST /access_token`: trade the encoded credential for a bearer token.
    pub async fn request_token(&self, credential: &EncodedCredential) -> Result<TokenResponse, Error> {
        let url = self.config.gateway.http_base.join("/access_token")?;
        debug!("requesting access token at {}", url);

        let form = TokenRequest::new(&self.config.device_identity, &self.config.device_profile);
        let timeout = self.config.transport.timeout;

        let resp = self
            .http
            .post(url)
            .headers(self.token_headers(credential)?)
            .timeout(timeout)
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::from_token_transport(e, timeout))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::from_token_transport(e, timeout))?;

        if status.is_client_error() || status.is_server_error() {
            let preview: String = body.chars().take(200).collect();
            return Err(Error::Authentication {
                status: status.as_u16(),
                message: if preview.trim().is_empty() {
                    status.canonical_reason().unwrap_or("rejected").to_owned()
                } else {
                    preview.trim().to_owned()
                },
            });
        }

        let token = TokenResponse::parse(&body, chrono::Utc::now())?;
        debug!(
            user_id = %token.user_id,
            device_id = %token.device_id,
            "access token issued"
        );
        Ok(token)
    }

    /// Open the command channel authenticated by `token`.
    pub async fn open_channel(&self, token: &TokenResponse) -> Result<SessionChannel, Error> {
        let url = channel_url(&self.config.gateway.ws_base, token)?;
        SessionChannel::connect(&url, &self.config.channel).await
    }

    /// Run the full cycle for one command and return the gateway's reply.
    pub async fn execute(
        &self,
        credentials: &Credentials,
        command: &Command,
    ) -> Result<CommandReply, Error> {
        let encoded = {
            let _span = info_span!("stage", name = %Stage::Encode).entered();
            EncodedCredential::encode(credentials)?
        };

        let token = self
            .request_token(&encoded)
            .instrument(info_span!("stage", name = %Stage::Token))
            .await?;
        match token.expires_at() {
            Some(at) => debug!(expires_at = %at, "token validity"),
            None => debug!(expires = %token.expires, "token lifetime not numeric"),
        }

        let mut channel = self
            .open_channel(&token)
            .instrument(info_span!("stage", name = %Stage::Connect))
            .await?;

        let reply = channel
            .exchange(command)
            .instrument(info_span!("stage", name = %Stage::Exchange))
            .await?;

        info!(command = %command, "command acknowledged");
        Ok(reply)
    }

    fn token_headers(&self, credential: &EncodedCredential) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, credential.header_value()?);
        headers.insert(HOST, self.config.gateway.host_header()?);
        headers.insert(ORIGIN, HeaderValue::from_static(WEB_APP_ORIGIN));
        headers.insert(REFERER, HeaderValue::from_static(WEB_APP_ORIGIN));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-au"));
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        Ok(headers)
    }
}
