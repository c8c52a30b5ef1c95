// Integration tests for `GatewayClient`: wiremock serves the token endpoint,
// a local tokio-tungstenite listener plays the command channel.
#![allow(clippy::unwrap_used)]

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use secrecy::SecretString;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use url::Url;
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use coviva_api::transport::BROWSER_USER_AGENT;
use coviva_api::{
    ChannelConfig, ChannelState, Command, Credentials, DeviceIdentity, Error, Gateway,
    GatewayClient, SessionConfig, Stage,
};

// ── Helpers ─────────────────────────────────────────────────────────

const TOKEN_BODY: &str =
    "access_token=tok-123&user_id=U1&device_id=D1&expires=3600&myhagerid=H1";

/// `Basic base64("alice%40example.com:" + hex(sha512("pw")))`
const ALICE_BASIC: &str = "Basic YWxpY2UlNDBleGFtcGxlLmNvbTpiZTE5NjgzODczNmRkZmQwMDA3ZGQ4YjJlOGY0NmYyMmQ0NDBkNGM1OTU5OTI1Y2I0OTEzNWFiYzljZGIwMWU4NDk2MWFhNDNkZDBkZGI2ZWU1OTk3NWViNjQ5MjgwZDlmNDQwODg4NDBhZjM3NDUxODI4YTY0MTJiOWI1NzRmYw==";

const FORM_BODY: &str = "device_hardware_id=test-device\
    &device_name=Web%2520App%2520%257C%2520Safari\
    &device_type=4&device_os=6&device_app=4";

fn alice() -> Credentials {
    Credentials::new("alice@example.com", SecretString::from("pw".to_string()))
}

/// How the fake channel endpoint behaves once a client connects.
#[derive(Clone, Copy)]
enum Socket {
    /// Agree to `v2`, read one frame, answer with the given text.
    Reply(&'static str),
    /// Agree to `v2`, read one frame, never answer.
    Silent,
    /// Agree to `v2`, read one frame, close without answering.
    Hangup,
    /// Upgrade without choosing a sub-protocol.
    NoSubProtocol,
}

/// What the fake endpoint saw on one connection.
#[derive(Debug, Default)]
struct Seen {
    uri: String,
    requested_protocol: Option<String>,
    frames: Vec<String>,
}

/// Accept `connections` WebSocket clients, one after another.
async fn spawn_socket(behaviour: Socket, connections: usize) -> (SocketAddr, JoinHandle<Vec<Seen>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let mut all = Vec::new();
        for _ in 0..connections {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut seen = Seen::default();

            let callback = |req: &Request, mut resp: Response| -> Result<Response, ErrorResponse> {
                seen.uri = req.uri().to_string();
                seen.requested_protocol = req
                    .headers()
                    .get(SEC_WEBSOCKET_PROTOCOL)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned);
                if !matches!(behaviour, Socket::NoSubProtocol) {
                    resp.headers_mut()
                        .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static("v2"));
                }
                Ok(resp)
            };

            let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(tcp, callback).await else {
                all.push(seen);
                continue;
            };

            if let Some(Ok(Message::Text(frame))) = ws.next().await {
                seen.frames.push(frame.as_str().to_owned());
            }
            match behaviour {
                Socket::Reply(text) => {
                    ws.send(Message::text(text)).await.unwrap();
                }
                Socket::Hangup => {
                    let _ = ws.close(None).await;
                }
                Socket::Silent | Socket::NoSubProtocol => {}
            }
            // Drain until the client goes away.
            while let Some(Ok(_)) = ws.next().await {}
            all.push(seen);
        }
        all
    });

    (addr, handle)
}

async fn mount_token(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_string(TOKEN_BODY))
        .expect(expected_calls)
        .mount(server)
        .await;
}

/// Exact match on a single header value; these values contain commas,
/// which wiremock's `header` matcher would split.
fn header_is(name: &'static str, expected: String) -> impl Fn(&wiremock::Request) -> bool {
    move |req| {
        req.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == expected)
    }
}

fn client_for(server: &MockServer, socket: SocketAddr, read_timeout: Duration) -> GatewayClient {
    let gateway = Gateway::with_endpoints(
        Url::parse(&server.uri()).unwrap(),
        Url::parse(&format!("ws://{socket}")).unwrap(),
    );
    let mut config = SessionConfig::new(gateway, DeviceIdentity::new("test-device").unwrap());
    config.channel = ChannelConfig {
        read_timeout,
        ..ChannelConfig::default()
    };
    GatewayClient::with_client(reqwest::Client::new(), config)
}

// ── Token endpoint ──────────────────────────────────────────────────

#[tokio::test]
async fn test_token_request_shape() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/access_token"))
        .and(header("authorization", ALICE_BASIC))
        .and(header("origin", "http://mycoviva.net"))
        .and(header("referer", "http://mycoviva.net"))
        .and(header("accept-language", "en-au"))
        .and(header_is("accept", "application/json, text/plain, */*".into()))
        .and(header_is("user-agent", BROWSER_USER_AGENT.into()))
        .and(header_is("host", server.address().to_string()))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string(FORM_BODY))
        .respond_with(ResponseTemplate::new(200).set_body_string(TOKEN_BODY))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, "127.0.0.1:9".parse().unwrap(), Duration::from_secs(1));
    let encoded = coviva_api::EncodedCredential::encode(&alice()).unwrap();
    let token = client.request_token(&encoded).await.unwrap();

    assert_eq!(token.access_token(), "tok-123");
    assert_eq!(token.user_id, "U1");
    assert_eq!(token.device_id, "D1");
    assert_eq!(token.myhagerid, "H1");
    assert_eq!(token.expires_in(), Some(Duration::from_secs(3600)));
}

#[tokio::test]
async fn test_slow_token_endpoint_times_out_with_a_prebuilt_client() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/access_token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(TOKEN_BODY)
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let mut client_config = SessionConfig::new(
        Gateway::from_base_url(&Url::parse(&server.uri()).unwrap()).unwrap(),
        DeviceIdentity::new("test-device").unwrap(),
    );
    client_config.transport.timeout = Duration::from_millis(300);
    // A plain client has no timeout of its own.
    let client = GatewayClient::with_client(reqwest::Client::new(), client_config);

    let encoded = coviva_api::EncodedCredential::encode(&alice()).unwrap();
    let err = client.request_token(&encoded).await.unwrap_err();
    assert!(
        matches!(
            err,
            Error::Timeout {
                stage: Stage::Token,
                ..
            }
        ),
        "got {err:?}"
    );
}

#[tokio::test]
async fn test_token_rejection_is_authentication_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/access_token"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
        .mount(&server)
        .await;

    let client = client_for(&server, "127.0.0.1:9".parse().unwrap(), Duration::from_secs(1));
    let err = client
        .execute(&alice(), &Command::get("nodes/1"))
        .await
        .unwrap_err();

    match err {
        Error::Authentication { status, ref message } => {
            assert_eq!(status, 401);
            assert_eq!(message, "bad credentials");
        }
        other => panic!("expected Authentication, got {other:?}"),
    }
}

#[tokio::test]
async fn test_token_without_access_token_is_format_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/access_token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("user_id=U1&device_id=D1&expires=1&myhagerid=H"),
        )
        .mount(&server)
        .await;

    // Nothing listens on the channel port: the cycle must stop at the token.
    let client = client_for(&server, "127.0.0.1:9".parse().unwrap(), Duration::from_secs(1));
    let err = client
        .execute(&alice(), &Command::get("nodes/1"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::ResponseFormat {
            stage: Stage::Token,
            ..
        }
    ));
}

#[tokio::test]
async fn test_unreachable_gateway_is_network_error() {
    let gateway = Gateway::from_base_url(&Url::parse("http://127.0.0.1:9").unwrap()).unwrap();
    let config = SessionConfig::new(gateway, DeviceIdentity::new("test-device").unwrap());
    let client = GatewayClient::new(config).unwrap();

    let err = client
        .execute(&alice(), &Command::get("nodes/1"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Network(_)), "got {err:?}");
    assert_eq!(err.stage(), Stage::Token);
}

// ── Full cycle ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_get_returns_reply_verbatim() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;
    let (addr, socket) = spawn_socket(Socket::Reply(r#"{"id":1,"value":42}"#), 1).await;

    let client = client_for(&server, addr, Duration::from_secs(5));
    let reply = client
        .execute(&alice(), &Command::get("nodes/1"))
        .await
        .unwrap();

    assert_eq!(reply.as_str(), r#"{"id":1,"value":42}"#);

    let seen = socket.await.unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].uri, "/connection?access_token=tok-123");
    assert_eq!(seen[0].requested_protocol.as_deref(), Some("v2"));
    assert_eq!(seen[0].frames, vec!["GET:nodes/1".to_string()]);
}

#[tokio::test]
async fn test_put_sends_exact_frame() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;
    let (addr, socket) = spawn_socket(Socket::Reply(r#"{"status":"ok"}"#), 1).await;

    let client = client_for(&server, addr, Duration::from_secs(5));
    let reply = client
        .execute(&alice(), &Command::set_attribute(1, 5, 50))
        .await
        .unwrap();
    assert_eq!(reply.to_json().unwrap()["status"], "ok");

    let seen = socket.await.unwrap();
    assert_eq!(
        seen[0].frames,
        vec!["PUT:nodes/1/attributes/5?target_value=50".to_string()]
    );
}

#[tokio::test]
async fn test_every_cycle_fetches_a_fresh_token() {
    let server = MockServer::start().await;
    mount_token(&server, 2).await;
    let (addr, socket) = spawn_socket(Socket::Reply("{}"), 2).await;

    let client = client_for(&server, addr, Duration::from_secs(5));
    client.execute(&alice(), &Command::get("all")).await.unwrap();
    client.execute(&alice(), &Command::get("all")).await.unwrap();

    assert_eq!(socket.await.unwrap().len(), 2);
    // `expect(2)` is verified when the server drops.
}

// ── Channel failures ────────────────────────────────────────────────

#[tokio::test]
async fn test_missing_sub_protocol_fails_connect() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;
    let (addr, _socket) = spawn_socket(Socket::NoSubProtocol, 1).await;

    let client = client_for(&server, addr, Duration::from_secs(5));
    let err = client
        .execute(&alice(), &Command::get("nodes/1"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Connection { .. }), "got {err:?}");
    assert_eq!(err.stage(), Stage::Connect);
    assert!(!err.to_string().contains("tok-123"));
}

#[tokio::test]
async fn test_silent_gateway_times_out_then_channel_is_closed() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;
    let (addr, _socket) = spawn_socket(Socket::Silent, 1).await;

    let client = client_for(&server, addr, Duration::from_millis(300));
    let encoded = coviva_api::EncodedCredential::encode(&alice()).unwrap();
    let token = client.request_token(&encoded).await.unwrap();
    let mut channel = client.open_channel(&token).await.unwrap();
    assert_eq!(channel.state(), ChannelState::Open);
    assert_eq!(channel.negotiated_protocol(), "v2");

    let err = channel.exchange(&Command::get("nodes/1")).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Timeout {
            stage: Stage::Exchange,
            ..
        }
    ));
    assert!(err.to_string().ends_with("timed out after 300ms"), "{err}");
    assert_eq!(channel.state(), ChannelState::Closed);

    let again = channel.exchange(&Command::get("nodes/1")).await.unwrap_err();
    assert!(matches!(again, Error::ChannelClosed { .. }));
}

#[tokio::test]
async fn test_gateway_closing_before_reply() {
    let server = MockServer::start().await;
    mount_token(&server, 1).await;
    let (addr, _socket) = spawn_socket(Socket::Hangup, 1).await;

    let client = client_for(&server, addr, Duration::from_secs(5));
    let err = client
        .execute(&alice(), &Command::get("nodes/1"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ChannelClosed { .. }), "got {err:?}");
}
