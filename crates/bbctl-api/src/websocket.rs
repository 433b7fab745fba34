//! Appservice websocket channel.
//!
//! Opens the hungryserv `fi.mau.as_sync` websocket, dispatches the
//! commands the server pushes to a [`CommandHandler`], and correlates
//! replies to requests sent from this side (pings). A new [`Channel`] is
//! created for every connection; [`AppserviceWebsocket`] holds the one
//! that is currently live in an atomically swapped slot.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use bbctl_api::websocket::{AppserviceWebsocket, WebsocketConfig};
//!
//! let ws = AppserviceWebsocket::new(WebsocketConfig::new(hungry_url, as_token));
//! let result = ws.run(Arc::new(handler), |channel| {
//!     let _ = channel.send("bridge_status", &BridgeState::unconfigured());
//! }).await;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::value::RawValue;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::error::Error;
use crate::protocol::{
    self, CommandError, ErrorCode, Frame, FrameError, InboundCommand, OutgoingMessage, PingData,
    RemoteError, STATUS_CONN_REPLACED,
};
use crate::transport::USER_AGENT;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ── Timeouts ─────────────────────────────────────────────────────────

/// How long a request waits for its reply before failing.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a local stop waits for the close frame to be written.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Close code reported when the server's close frame had no payload.
const CLOSE_CODE_NO_STATUS: u16 = 1005;

// ── CommandHandler ───────────────────────────────────────────────────

/// Result of handling one inbound command: the reply data or an error
/// reply for the same correlation id.
pub type CommandResult = Result<Box<RawValue>, CommandError>;

/// Handles commands pushed by the server.
///
/// Each command runs on its own task. `ctx` is cancelled when the
/// channel the command arrived on ends.
pub trait CommandHandler: Send + Sync + 'static {
    fn handle(
        &self,
        command: InboundCommand,
        ctx: CancellationToken,
    ) -> impl Future<Output = CommandResult> + Send;
}

// ── Config & state ───────────────────────────────────────────────────

/// Connection settings for the appservice websocket.
#[derive(Debug, Clone)]
pub struct WebsocketConfig {
    /// Hungryserv base URL, e.g. `https://matrix.beeper.com/_hungryserv/alice`.
    pub homeserver_url: Url,
    pub as_token: SecretString,
    /// Sent as `X-Mautrix-Process-ID`; fixed for the life of the process.
    pub process_id: Uuid,
    pub user_agent: String,
    pub request_timeout: Duration,
}

impl WebsocketConfig {
    pub fn new(homeserver_url: Url, as_token: SecretString) -> Self {
        Self {
            homeserver_url,
            as_token,
            process_id: Uuid::new_v4(),
            user_agent: USER_AGENT.to_owned(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Lifecycle of the current channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Authenticated,
    Streaming,
    Closing,
}

/// Why a channel is being closed from this side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Operator-initiated shutdown; the reconnect loop exits.
    ManualStop,
    /// Forced close that should lead to a reconnect.
    Forced(String),
}

impl From<StopReason> for Error {
    fn from(reason: StopReason) -> Self {
        match reason {
            StopReason::ManualStop => Self::ManualStop,
            StopReason::Forced(message) => Self::ForcedClose(message),
        }
    }
}

/// Build the sync websocket URL from the hungryserv base URL.
pub fn sync_url(homeserver_url: &Url) -> Result<Url, Error> {
    let mut url = homeserver_url.clone();
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(Error::UnsupportedScheme(other.to_owned())),
    };
    url.set_scheme(scheme)
        .map_err(|()| Error::UnsupportedScheme(scheme.to_owned()))?;
    let path = format!(
        "{}/{}",
        url.path().trim_end_matches('/'),
        protocol::SYNC_PATH
    );
    url.set_path(&path);
    url.set_query(None);
    Ok(url)
}

// ── Channel ──────────────────────────────────────────────────────────

enum Outbound {
    Message(OutgoingMessage),
    Close(CloseFrame),
}

type Waiter = oneshot::Sender<Result<Box<RawValue>, Error>>;

/// One live websocket connection.
///
/// Cloned out of the [`AppserviceWebsocket`] slot as an `Arc`; any task
/// may send on it or force it closed.
pub struct Channel {
    next_id: AtomicU64,
    pending: DashMap<u64, Waiter>,
    in_flight: DashMap<u64, u32>,
    outbound: mpsc::UnboundedSender<Outbound>,
    stop_tx: mpsc::Sender<StopReason>,
    stopping: AtomicBool,
    cancel: CancellationToken,
    request_timeout: Duration,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("pending", &self.pending.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Channel {
    fn new(
        outbound: mpsc::UnboundedSender<Outbound>,
        stop_tx: mpsc::Sender<StopReason>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
            in_flight: DashMap::new(),
            outbound,
            stop_tx,
            stopping: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            request_timeout,
        }
    }

    /// Send a request and wait for the correlated reply.
    ///
    /// Bounded by the channel's request timeout; fails with
    /// [`Error::ChannelClosed`] if the channel ends first.
    pub async fn request<T: Serialize + ?Sized>(
        &self,
        command: &str,
        data: &T,
    ) -> Result<Box<RawValue>, Error> {
        let data = serde_json::value::to_raw_value(data)?;
        if self.is_closed() {
            return Err(Error::ChannelClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        if self
            .outbound
            .send(Outbound::Message(OutgoingMessage::request(id, command, data)))
            .is_err()
        {
            self.pending.remove(&id);
            return Err(Error::ChannelClosed);
        }

        let result = tokio::select! {
            biased;
            reply = rx => reply.unwrap_or(Err(Error::ChannelClosed)),
            () = self.cancel.cancelled() => Err(Error::ChannelClosed),
            () = tokio::time::sleep(self.request_timeout) => Err(Error::RequestTimeout {
                command: command.to_owned(),
                timeout_secs: self.request_timeout.as_secs(),
            }),
        };
        self.pending.remove(&id);
        result
    }

    /// Send a ping carrying the current time and decode the echo.
    pub async fn ping(&self) -> Result<PingData, Error> {
        let reply = self.request("ping", &PingData::now()).await?;
        Ok(serde_json::from_str(reply.get())?)
    }

    /// Fire-and-forget message (id 0, no reply expected).
    pub fn send<T: Serialize + ?Sized>(&self, command: &str, data: &T) -> Result<(), Error> {
        let data = serde_json::value::to_raw_value(data)?;
        self.outbound
            .send(Outbound::Message(OutgoingMessage::request(0, command, data)))
            .map_err(|_| Error::ChannelClosed)
    }

    /// Force the channel closed. The first reason wins; returns `false` if
    /// the channel was already stopping.
    pub fn stop(&self, reason: StopReason) -> bool {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.stop_tx.try_send(reason).is_ok()
    }

    /// `true` once the connection has ended.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn resolve(&self, id: u64, result: Result<Box<RawValue>, RemoteError>) {
        let Some((_, waiter)) = self.pending.remove(&id) else {
            tracing::debug!(id, "Dropping reply with no waiting request");
            return;
        };
        let result = result.map_err(|e| Error::Remote {
            code: e.code,
            message: e.message,
        });
        let _ = waiter.send(result);
    }

    fn reply(&self, id: u64, result: Result<Box<RawValue>, CommandError>) {
        let message = match result {
            Ok(data) => OutgoingMessage::response(id, data),
            Err(err) => match OutgoingMessage::error(id, &err) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(id, error = %e, "Failed to encode error reply");
                    return;
                }
            },
        };
        if self.outbound.send(Outbound::Message(message)).is_err() {
            tracing::debug!(id, "Channel closed before reply could be sent");
        }
    }

    /// Record an inbound id as in flight. Returns `false` if the id was
    /// already being handled.
    fn track(&self, id: u64) -> bool {
        let mut count = self.in_flight.entry(id).or_insert(0);
        *count += 1;
        *count == 1
    }

    fn untrack(&self, id: u64) {
        self.in_flight.remove_if_mut(&id, |_, count| {
            *count -= 1;
            *count == 0
        });
    }

    /// End the channel: cancel handler contexts and fail every request
    /// still waiting for a reply.
    fn shutdown(&self) {
        self.stopping.store(true, Ordering::Release);
        self.cancel.cancel();
        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, waiter)) = self.pending.remove(&id) {
                let _ = waiter.send(Err(Error::ChannelClosed));
            }
        }
    }
}

// ── AppserviceWebsocket ──────────────────────────────────────────────

/// Owner of the current-channel slot.
///
/// Only one [`run`](Self::run) should be active at a time; readers such
/// as the keepalive loop use [`current`](Self::current) and must cope
/// with the slot being empty.
pub struct AppserviceWebsocket {
    config: WebsocketConfig,
    current: ArcSwapOption<Channel>,
    state: watch::Sender<ChannelState>,
}

impl AppserviceWebsocket {
    pub fn new(config: WebsocketConfig) -> Self {
        let (state, _) = watch::channel(ChannelState::Disconnected);
        Self {
            config,
            current: ArcSwapOption::empty(),
            state,
        }
    }

    pub fn config(&self) -> &WebsocketConfig {
        &self.config
    }

    /// The live channel, if any.
    pub fn current(&self) -> Option<Arc<Channel>> {
        self.current.load_full()
    }

    pub fn has_channel(&self) -> bool {
        self.current.load().is_some()
    }

    /// Watch the lifecycle of the current channel.
    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    /// Force-close the current channel. Returns `false` if none is open.
    pub fn stop(&self, reason: StopReason) -> bool {
        self.current().is_some_and(|channel| channel.stop(reason))
    }

    /// Open one channel and serve it until it ends.
    ///
    /// `on_connect` runs once the handshake succeeds, before any inbound
    /// frame is read. Returns `Ok(())` only when the stream ends without
    /// a close frame.
    pub async fn run<H, F>(&self, handler: Arc<H>, on_connect: F) -> Result<(), Error>
    where
        H: CommandHandler,
        F: FnOnce(&Channel) + Send,
    {
        let _slot = SlotGuard(self);
        self.state.send_replace(ChannelState::Connecting);

        let ws_stream = self.connect().await?;
        self.state.send_replace(ChannelState::Authenticated);

        let (write, read) = ws_stream.split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (stop_tx, mut stop_rx) = mpsc::channel(1);
        let channel = Arc::new(Channel::new(out_tx, stop_tx, self.config.request_timeout));
        let mut writer = tokio::spawn(write_loop(write, out_rx, channel.cancel.clone()));

        self.current.store(Some(Arc::clone(&channel)));
        on_connect(channel.as_ref());
        self.state.send_replace(ChannelState::Streaming);

        let (result, stopped) = read_loop(read, &channel, &handler, &mut stop_rx).await;
        self.state.send_replace(ChannelState::Closing);

        if stopped {
            let _ = tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut writer).await;
        }
        channel.shutdown();
        writer.abort();

        match &result {
            Ok(()) => tracing::info!("Appservice websocket stream ended"),
            Err(e) => tracing::debug!(error = %e, "Appservice websocket channel ended"),
        }
        result
    }

    async fn connect(&self) -> Result<WsStream, Error> {
        let url = sync_url(&self.config.homeserver_url)?;
        tracing::info!(url = %url, "Connecting to appservice websocket");

        let uri: tungstenite::http::Uri = url
            .as_str()
            .parse()
            .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;

        let request = ClientRequestBuilder::new(uri)
            .with_header(
                "Authorization",
                format!("Bearer {}", self.config.as_token.expose_secret()),
            )
            .with_header("User-Agent", self.config.user_agent.as_str())
            .with_header("X-Mautrix-Process-ID", self.config.process_id.to_string())
            .with_header("X-Mautrix-Websocket-Version", protocol::WEBSOCKET_VERSION);

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

        tracing::info!("Appservice websocket connected");
        Ok(ws_stream)
    }
}

/// Clears the slot and reports `Disconnected` however `run` exits,
/// including when its future is dropped mid-connection.
struct SlotGuard<'a>(&'a AppserviceWebsocket);

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if let Some(channel) = self.0.current.swap(None) {
            channel.shutdown();
        }
        self.0.state.send_replace(ChannelState::Disconnected);
    }
}

// ── Read side ────────────────────────────────────────────────────────

/// Read frames until the connection ends. The flag is `true` when the
/// end was a local stop.
async fn read_loop<H: CommandHandler>(
    mut read: SplitStream<WsStream>,
    channel: &Arc<Channel>,
    handler: &Arc<H>,
    stop_rx: &mut mpsc::Receiver<StopReason>,
) -> (Result<(), Error>, bool) {
    loop {
        tokio::select! {
            biased;
            reason = stop_rx.recv() => {
                let reason = reason.unwrap_or(StopReason::ManualStop);
                tracing::info!(reason = ?reason, "Stopping appservice websocket");
                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: String::new().into(),
                };
                let _ = channel.outbound.send(Outbound::Close(frame));
                return (Err(reason.into()), true);
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(err) = handle_text(channel, handler, text.as_str()) {
                            return (Err(err), false);
                        }
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // tungstenite handles pong replies automatically
                        tracing::trace!("WebSocket ping");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return (Err(close_error(frame.as_ref())), false);
                    }
                    Some(Err(e)) => {
                        return (Err(Error::WebSocket(e.to_string())), false);
                    }
                    None => return (Ok(()), false),
                    _ => {
                        // Binary, Pong, Frame -- ignore
                    }
                }
            }
        }
    }
}

/// Map a server close frame to the error `run` returns.
fn close_error(frame: Option<&CloseFrame>) -> Error {
    let Some(cf) = frame else {
        tracing::info!("WebSocket close frame received (no payload)");
        return Error::WebSocketClosed {
            code: CLOSE_CODE_NO_STATUS,
            reason: String::new(),
        };
    };
    tracing::info!(code = %cf.code, reason = %cf.reason, "WebSocket close frame received");

    match protocol::parse_close_reason(cf.reason.as_str()) {
        Some(status) if status == STATUS_CONN_REPLACED => Error::ConnectionReplaced,
        Some(status) => Error::WebSocketClosed {
            code: u16::from(cf.code),
            reason: status,
        },
        None => Error::WebSocketClosed {
            code: u16::from(cf.code),
            reason: cf.reason.as_str().to_owned(),
        },
    }
}

/// Handle one text frame. Returns an error only when the frame ends the
/// connection.
fn handle_text<H: CommandHandler>(channel: &Arc<Channel>, handler: &Arc<H>, text: &str) -> Option<Error> {
    match protocol::parse_frame(text) {
        Ok(Frame::Command { id, command }) => {
            dispatch(channel, handler, id, command);
            None
        }
        Ok(Frame::Reply { id, result }) => {
            channel.resolve(id, result);
            None
        }
        Ok(Frame::Disconnect { status }) => {
            tracing::info!(status = %status, "Server sent disconnect command");
            if status == STATUS_CONN_REPLACED {
                Some(Error::ConnectionReplaced)
            } else {
                Some(Error::WebSocketClosed {
                    code: u16::from(CloseCode::Normal),
                    reason: status,
                })
            }
        }
        Err(FrameError { id, command, source }) => {
            tracing::warn!(id, command = %command, error = %source, "Failed to parse websocket frame");
            if let Some(id) = id.filter(|id| *id != 0) {
                channel.reply(
                    id,
                    Err(CommandError::new(
                        ErrorCode::BadJson,
                        if command.is_empty() {
                            format!("failed to parse command: {source}")
                        } else {
                            format!("failed to parse {command} data: {source}")
                        },
                    )),
                );
            }
            None
        }
    }
}

/// Spawn the handler for one command. Commands are dispatched in arrival
/// order but may complete in any order.
fn dispatch<H: CommandHandler>(channel: &Arc<Channel>, handler: &Arc<H>, id: u64, command: InboundCommand) {
    let name = command.name().to_owned();
    if id != 0 && !channel.track(id) {
        tracing::warn!(id, command = %name, "Command id already in flight, handling both");
    }
    tracing::debug!(id, command = %name, "Dispatching websocket command");

    let channel = Arc::clone(channel);
    let handler = Arc::clone(handler);
    let ctx = channel.cancel.child_token();
    tokio::spawn(async move {
        let result = handler.handle(command, ctx).await;
        if id == 0 {
            if let Err(e) = result {
                tracing::warn!(command = %name, error = %e, "Uncorrelated command failed");
            }
            return;
        }
        channel.untrack(id);
        channel.reply(id, result);
    });
}

// ── Write side ───────────────────────────────────────────────────────

/// Single writer: drains the outbound queue until the channel ends or a
/// close frame has been sent.
async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    cancel: CancellationToken,
) {
    loop {
        let outbound = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(outbound) => outbound,
                None => break,
            },
        };
        match outbound {
            Outbound::Message(message) => {
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(id = message.id, error = %e, "Failed to encode websocket message");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::text(text)).await {
                    tracing::warn!(error = %e, "Failed to write websocket message");
                    break;
                }
            }
            Outbound::Close(frame) => {
                if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                    tracing::debug!(error = %e, "Failed to write close frame");
                }
                break;
            }
        }
    }
    let _ = sink.close().await;
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn sync_url_from_https_base() {
        let base = Url::parse("https://matrix.beeper.com/_hungryserv/alice").unwrap();
        assert_eq!(
            sync_url(&base).unwrap().as_str(),
            "wss://matrix.beeper.com/_hungryserv/alice/_matrix/client/unstable/fi.mau.as_sync"
        );
    }

    #[test]
    fn sync_url_from_http_base_with_trailing_slash() {
        let base = Url::parse("http://127.0.0.1:8008/_hungryserv/bob/").unwrap();
        assert_eq!(
            sync_url(&base).unwrap().as_str(),
            "ws://127.0.0.1:8008/_hungryserv/bob/_matrix/client/unstable/fi.mau.as_sync"
        );
    }

    #[test]
    fn sync_url_rejects_other_schemes() {
        let base = Url::parse("ftp://example.com/").unwrap();
        assert!(matches!(sync_url(&base), Err(Error::UnsupportedScheme(_))));
    }

    #[test]
    fn conn_replaced_close_is_terminal() {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: r#"{"command":"disconnect","status":"conn_replaced"}"#.to_owned().into(),
        };
        assert!(matches!(close_error(Some(&frame)), Error::ConnectionReplaced));
    }

    #[test]
    fn other_close_carries_code_and_status() {
        let frame = CloseFrame {
            code: CloseCode::Away,
            reason: r#"{"command":"disconnect","status":"server_shutting_down"}"#.to_owned().into(),
        };
        match close_error(Some(&frame)) {
            Error::WebSocketClosed { code, reason } => {
                assert_eq!(code, 1001);
                assert_eq!(reason, "server_shutting_down");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            close_error(None),
            Error::WebSocketClosed { code: 1005, .. }
        ));
    }

    #[test]
    fn stop_reason_maps_to_error() {
        assert!(matches!(Error::from(StopReason::ManualStop), Error::ManualStop));
        assert!(matches!(
            Error::from(StopReason::Forced("x".into())),
            Error::ForcedClose(m) if m == "x"
        ));
    }

    #[tokio::test]
    async fn first_stop_reason_wins() {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (stop_tx, mut stop_rx) = mpsc::channel(1);
        let channel = Channel::new(out_tx, stop_tx, DEFAULT_REQUEST_TIMEOUT);

        assert!(channel.stop(StopReason::Forced("ping failed".into())));
        assert!(!channel.stop(StopReason::ManualStop));
        assert_eq!(
            stop_rx.recv().await,
            Some(StopReason::Forced("ping failed".into()))
        );
    }

    #[tokio::test]
    async fn pending_requests_fail_when_channel_shuts_down() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (stop_tx, _stop_rx) = mpsc::channel(1);
        let channel = Arc::new(Channel::new(out_tx, stop_tx, DEFAULT_REQUEST_TIMEOUT));

        let requester = Arc::clone(&channel);
        let task = tokio::spawn(async move { requester.request("ping", &PingData { timestamp: 1 }).await });

        // Wait until the request is queued before shutting down.
        let Some(Outbound::Message(sent)) = out_rx.recv().await else {
            panic!("expected outbound request");
        };
        assert_eq!(sent.id, 1);
        assert_eq!(sent.command, "ping");

        channel.shutdown();
        assert!(matches!(task.await.unwrap(), Err(Error::ChannelClosed)));
        assert!(channel.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn request_times_out_without_reply() {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (stop_tx, _stop_rx) = mpsc::channel(1);
        let channel = Channel::new(out_tx, stop_tx, Duration::from_secs(30));

        let err = channel.request("ping", &PingData { timestamp: 1 }).await.unwrap_err();
        assert!(matches!(err, Error::RequestTimeout { timeout_secs: 30, .. }));
        assert!(channel.pending.is_empty());
    }

    #[tokio::test]
    async fn replies_resolve_matching_request() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (stop_tx, _stop_rx) = mpsc::channel(1);
        let channel = Arc::new(Channel::new(out_tx, stop_tx, DEFAULT_REQUEST_TIMEOUT));

        let requester = Arc::clone(&channel);
        let task = tokio::spawn(async move { requester.ping().await });

        let Some(Outbound::Message(sent)) = out_rx.recv().await else {
            panic!("expected outbound request");
        };
        let echo = RawValue::from_string(r#"{"timestamp":42}"#.to_owned()).unwrap();
        channel.resolve(sent.id, Ok(echo));

        assert_eq!(task.await.unwrap().unwrap(), PingData { timestamp: 42 });
    }

    #[test]
    fn duplicate_ids_are_tracked() {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (stop_tx, _stop_rx) = mpsc::channel(1);
        let channel = Channel::new(out_tx, stop_tx, DEFAULT_REQUEST_TIMEOUT);

        assert!(channel.track(5));
        assert!(!channel.track(5));
        channel.untrack(5);
        assert!(channel.in_flight.contains_key(&5));
        channel.untrack(5);
        assert!(!channel.in_flight.contains_key(&5));
    }
}
