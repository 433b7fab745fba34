#![allow(clippy::unwrap_used)]
// Integration tests for the appservice websocket channel, against an
// in-process tokio-tungstenite server standing in for hungryserv.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bbctl_api::protocol::STATUS_CONN_REPLACED;
use bbctl_api::websocket::CommandResult;
use bbctl_api::{
    AppserviceWebsocket, BridgeState, ChannelState, CommandError, CommandHandler, Error,
    InboundCommand, StopReason, WebsocketConfig,
};
use futures_util::{SinkExt, StreamExt};
use secrecy::SecretString;
use serde_json::value::RawValue;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use url::Url;

// ── Fake hungryserv ─────────────────────────────────────────────────

#[derive(Debug, Default, Clone)]
struct Handshake {
    path: String,
    authorization: Option<String>,
    websocket_version: Option<String>,
    process_id: Option<String>,
}

async fn bind() -> (TcpListener, Url) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let url = Url::parse(&format!("http://127.0.0.1:{port}/_hungryserv/alice")).unwrap();
    (listener, url)
}

async fn accept(listener: &TcpListener) -> (WebSocketStream<TcpStream>, Handshake) {
    let (stream, _) = listener.accept().await.unwrap();
    let seen = Arc::new(Mutex::new(Handshake::default()));
    let record = Arc::clone(&seen);
    let ws = tokio_tungstenite::accept_hdr_async(stream, move |req: &Request, resp: Response| {
        let header = |name: &str| {
            req.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        };
        *record.lock().unwrap() = Handshake {
            path: req.uri().path().to_owned(),
            authorization: header("Authorization"),
            websocket_version: header("X-Mautrix-Websocket-Version"),
            process_id: header("X-Mautrix-Process-ID"),
        };
        Ok::<Response, ErrorResponse>(resp)
    })
    .await
    .unwrap();
    let handshake = seen.lock().unwrap().clone();
    (ws, handshake)
}

async fn next_json(ws: &mut WebSocketStream<TcpStream>) -> Value {
    loop {
        match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected frame {other:?}"),
        }
    }
}

async fn send_json(ws: &mut WebSocketStream<TcpStream>, value: &Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

// ── Handler ─────────────────────────────────────────────────────────

/// Acks transactions and echoes everything else.
struct AckHandler;

impl CommandHandler for AckHandler {
    async fn handle(&self, command: InboundCommand, _ctx: CancellationToken) -> CommandResult {
        match command {
            InboundCommand::Transaction(txn) => {
                Ok(serde_json::value::to_raw_value(&json!({"txn_id": txn.txn_id})).unwrap())
            }
            InboundCommand::Ping(data) => Ok(data),
            InboundCommand::HttpProxy(req) => Err(CommandError::unknown(format!("no route for {}", req.path))),
            InboundCommand::Unknown { command } => Err(CommandError::new(
                bbctl_api::ErrorCode::Unrecognized,
                format!("unknown command {command}"),
            )),
        }
    }
}

fn config(url: Url) -> WebsocketConfig {
    WebsocketConfig::new(url, SecretString::from("as_secret".to_owned()))
}

fn send_unconfigured(channel: &bbctl_api::Channel) {
    channel.send("bridge_status", &BridgeState::unconfigured()).unwrap();
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn handshake_status_and_command_round_trip() {
    let (listener, url) = bind().await;
    let ws = Arc::new(AppserviceWebsocket::new(config(url)));
    let process_id = ws.config().process_id.to_string();

    let client = Arc::clone(&ws);
    let run = tokio::spawn(async move { client.run(Arc::new(AckHandler), send_unconfigured).await });

    let (mut server, handshake) = accept(&listener).await;
    assert_eq!(
        handshake.path,
        "/_hungryserv/alice/_matrix/client/unstable/fi.mau.as_sync"
    );
    assert_eq!(handshake.authorization.as_deref(), Some("Bearer as_secret"));
    assert_eq!(handshake.websocket_version.as_deref(), Some("3"));
    assert_eq!(handshake.process_id, Some(process_id));

    assert_eq!(
        next_json(&mut server).await,
        json!({"id": 0, "command": "bridge_status", "data": {"state_event": "UNCONFIGURED"}})
    );

    send_json(
        &mut server,
        &json!({"id": 11, "command": "transaction", "txn_id": "t1", "events": []}),
    )
    .await;
    assert_eq!(
        next_json(&mut server).await,
        json!({"id": 11, "command": "response", "data": {"txn_id": "t1"}})
    );

    send_json(&mut server, &json!({"id": 12, "command": "frobnicate"})).await;
    let reply = next_json(&mut server).await;
    assert_eq!(reply["id"], 12);
    assert_eq!(reply["command"], "error");
    assert_eq!(reply["data"]["code"], "M_UNRECOGNIZED");

    send_json(&mut server, &json!({"id": 13, "command": "transaction", "events": []})).await;
    let reply = next_json(&mut server).await;
    assert_eq!(reply["id"], 13);
    assert_eq!(reply["data"]["code"], "M_BAD_JSON");

    send_json(&mut server, &json!({"id": 14, "command": 5})).await;
    let reply = next_json(&mut server).await;
    assert_eq!(reply["id"], 14);
    assert_eq!(reply["command"], "error");
    assert_eq!(reply["data"]["code"], "M_BAD_JSON");

    assert!(ws.has_channel());
    server
        .close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: json!({"command": "disconnect", "status": STATUS_CONN_REPLACED})
                .to_string()
                .into(),
        }))
        .await
        .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), run).await.unwrap().unwrap();
    assert!(matches!(result, Err(Error::ConnectionReplaced)));
    assert!(!ws.has_channel());
    assert_eq!(*ws.subscribe_state().borrow(), ChannelState::Disconnected);
}

#[tokio::test]
async fn ping_request_is_correlated() {
    let (listener, url) = bind().await;
    let ws = Arc::new(AppserviceWebsocket::new(config(url)));
    let client = Arc::clone(&ws);
    let run = tokio::spawn(async move { client.run(Arc::new(AckHandler), |_| {}).await });

    let (mut server, _) = accept(&listener).await;
    let mut state = ws.subscribe_state();
    state
        .wait_for(|s| *s == ChannelState::Streaming)
        .await
        .unwrap();

    let channel = ws.current().unwrap();
    let pinger = tokio::spawn(async move { channel.ping().await });

    let request = next_json(&mut server).await;
    assert_eq!(request["command"], "ping");
    assert_eq!(request["id"], 1);
    assert!(request["data"]["timestamp"].is_i64());

    send_json(
        &mut server,
        &json!({"id": 1, "command": "response", "data": {"timestamp": 1_700_000_000_000_i64}}),
    )
    .await;
    let pong = pinger.await.unwrap().unwrap();
    assert_eq!(pong.timestamp, 1_700_000_000_000);

    assert!(ws.stop(StopReason::ManualStop));
    let result = tokio::time::timeout(Duration::from_secs(5), run).await.unwrap().unwrap();
    assert!(matches!(result, Err(Error::ManualStop)));
}

#[tokio::test]
async fn forced_stop_sends_close_and_fails_pending_requests() {
    let (listener, url) = bind().await;
    let ws = Arc::new(AppserviceWebsocket::new(config(url)));
    let client = Arc::clone(&ws);
    let run = tokio::spawn(async move { client.run(Arc::new(AckHandler), |_| {}).await });

    let (mut server, _) = accept(&listener).await;
    let mut state = ws.subscribe_state();
    state
        .wait_for(|s| *s == ChannelState::Streaming)
        .await
        .unwrap();

    let channel = ws.current().unwrap();
    let waiting = Arc::clone(&channel);
    let pinger = tokio::spawn(async move { waiting.ping().await });
    let _ = next_json(&mut server).await;

    assert!(channel.stop(StopReason::Forced("websocket ping returned error".into())));
    assert!(!channel.stop(StopReason::ManualStop));

    match server.next().await {
        Some(Ok(Message::Close(Some(frame)))) => assert_eq!(frame.code, CloseCode::Normal),
        other => panic!("expected close frame, got {other:?}"),
    }

    let result = tokio::time::timeout(Duration::from_secs(5), run).await.unwrap().unwrap();
    assert!(matches!(result, Err(Error::ForcedClose(m)) if m == "websocket ping returned error"));
    assert!(matches!(pinger.await.unwrap(), Err(Error::ChannelClosed)));
    assert!(channel.is_closed());
}

#[tokio::test]
async fn handshake_failure_is_a_connect_error() {
    let (listener, url) = bind().await;
    drop(listener);
    let ws = AppserviceWebsocket::new(config(url));

    let result = ws.run(Arc::new(AckHandler), |_| {}).await;
    assert!(matches!(result, Err(Error::WebSocketConnect(_))));
    assert!(ws.current().is_none());
}

#[tokio::test]
async fn ping_data_is_echoed_by_handler() {
    let data = RawValue::from_string(r#"{"timestamp":5}"#.to_owned()).unwrap();
    let reply = AckHandler
        .handle(InboundCommand::Ping(data), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(reply.get(), r#"{"timestamp":5}"#);
}
