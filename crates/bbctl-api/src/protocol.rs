//! Wire format of the appservice websocket (mautrix websocket protocol v3).
//!
//! Every frame is a JSON text message of the shape
//! `{"id": u64, "command": string, "data": any}`. The server pushes
//! transactions and proxied HTTP requests; replies reuse the inbound id
//! with `command` set to `response` or `error`.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;
use serde_json::{Map, Value};

/// Version advertised in the `X-Mautrix-Websocket-Version` header.
pub const WEBSOCKET_VERSION: &str = "3";

/// Path of the sync websocket, relative to the hungryserv base URL.
pub const SYNC_PATH: &str = "_matrix/client/unstable/fi.mau.as_sync";

/// Close-frame status sent when another client claims the websocket.
pub const STATUS_CONN_REPLACED: &str = "conn_replaced";

/// Envelope keys that never belong to a forwarded transaction body.
const ENVELOPE_KEYS: [&str; 5] = ["id", "command", "data", "status", "txn_id"];

// ── Inbound ─────────────────────────────────────────────────────────

/// One parsed text frame.
#[derive(Debug)]
pub enum Frame {
    /// A command pushed by the server that expects handling.
    Command { id: u64, command: InboundCommand },
    /// The reply to a request this side sent.
    Reply {
        id: u64,
        result: Result<Box<RawValue>, RemoteError>,
    },
    /// The server is about to drop the connection.
    Disconnect { status: String },
}

/// A command pushed by the server, tagged by its `command` field.
#[derive(Debug)]
pub enum InboundCommand {
    Transaction(Transaction),
    HttpProxy(HttpProxyRequest),
    Ping(Box<RawValue>),
    Unknown { command: String },
}

impl InboundCommand {
    /// The command name as it appeared on the wire.
    pub fn name(&self) -> &str {
        match self {
            Self::Transaction(_) => "transaction",
            Self::HttpProxy(_) => "http_proxy",
            Self::Ping(_) => "ping",
            Self::Unknown { command } => command,
        }
    }
}

/// A batch of events to deliver to the local appservice.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub txn_id: String,
    /// The body to PUT: `events`, `ephemeral`, `to_device` and whatever
    /// else the server sent, minus the envelope fields.
    pub body: Map<String, Value>,
}

impl Transaction {
    pub fn event_count(&self) -> usize {
        self.body
            .get("events")
            .and_then(Value::as_array)
            .map_or(0, Vec::len)
    }
}

/// An HTTP request to execute against the local appservice.
#[derive(Debug, Deserialize)]
pub struct HttpProxyRequest {
    #[serde(default, deserialize_with = "null_as_default")]
    pub path: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub query: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub headers: BTreeMap<String, Vec<String>>,
    /// Raw JSON text, sent as the request body without re-encoding.
    /// An explicit `null` is kept as the text `null`; only a missing
    /// field means no body.
    #[serde(default, deserialize_with = "raw_or_null")]
    pub body: Option<Box<RawValue>>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

fn raw_or_null<'de, D>(deserializer: D) -> Result<Option<Box<RawValue>>, D::Error>
where
    D: Deserializer<'de>,
{
    Box::<RawValue>::deserialize(deserializer).map(Some)
}

/// Payload of an `error` reply.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// A text frame that could not be understood.
#[derive(Debug)]
pub struct FrameError {
    /// Correlation id, when the envelope itself was readable.
    pub id: Option<u64>,
    pub command: String,
    pub source: serde_json::Error,
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(default)]
    id: u64,
    #[serde(default)]
    command: String,
    #[serde(default)]
    data: Option<Box<RawValue>>,
    #[serde(default)]
    status: Option<String>,
}

/// Just the correlation id, for frames whose envelope is otherwise broken.
#[derive(Deserialize)]
struct FrameId {
    #[serde(default)]
    id: Option<u64>,
}

#[derive(Deserialize)]
struct CloseCommand {
    #[serde(default)]
    command: String,
    #[serde(default)]
    status: String,
}

/// Parse one text frame received on the websocket.
pub fn parse_frame(text: &str) -> Result<Frame, FrameError> {
    let raw: RawFrame = serde_json::from_str(text).map_err(|source| FrameError {
        id: serde_json::from_str::<FrameId>(text).ok().and_then(|f| f.id),
        command: String::new(),
        source,
    })?;
    let RawFrame {
        id,
        command,
        data,
        status,
    } = raw;
    let data_or_null = |data: Option<Box<RawValue>>| data.unwrap_or_else(|| RawValue::NULL.to_owned());

    let parsed = match command.as_str() {
        "response" => Frame::Reply {
            id,
            result: Ok(data_or_null(data)),
        },
        "error" => {
            let remote = match data {
                Some(data) => serde_json::from_str(data.get()),
                None => Ok(RemoteError {
                    code: String::new(),
                    message: String::new(),
                }),
            };
            let remote = remote.map_err(|source| FrameError {
                id: Some(id),
                command: command.clone(),
                source,
            })?;
            Frame::Reply {
                id,
                result: Err(remote),
            }
        }
        "disconnect" => Frame::Disconnect {
            status: status.unwrap_or_default(),
        },
        "" | "transaction" => {
            let txn = parse_transaction(text, data.as_deref()).map_err(|source| FrameError {
                id: Some(id),
                command: command.clone(),
                source,
            })?;
            Frame::Command {
                id,
                command: InboundCommand::Transaction(txn),
            }
        }
        "http_proxy" => {
            let body = data.as_deref().map_or("null", RawValue::get);
            let request = serde_json::from_str(body).map_err(|source| FrameError {
                id: Some(id),
                command: command.clone(),
                source,
            })?;
            Frame::Command {
                id,
                command: InboundCommand::HttpProxy(request),
            }
        }
        "ping" => Frame::Command {
            id,
            command: InboundCommand::Ping(data_or_null(data)),
        },
        other => Frame::Command {
            id,
            command: InboundCommand::Unknown {
                command: other.to_owned(),
            },
        },
    };
    Ok(parsed)
}

/// Transactions arrive either flattened into the envelope or nested in
/// `data`; both forms forward the same body.
fn parse_transaction(text: &str, data: Option<&RawValue>) -> Result<Transaction, serde_json::Error> {
    let nested = data
        .and_then(|d| serde_json::from_str::<Map<String, Value>>(d.get()).ok())
        .filter(|fields| fields.contains_key("txn_id"));
    let mut fields = match nested {
        Some(fields) => fields,
        None => serde_json::from_str::<Map<String, Value>>(text)?,
    };

    let txn_id = match fields.get("txn_id") {
        Some(Value::String(id)) if !id.is_empty() => id.clone(),
        _ => return Err(<serde_json::Error as serde::de::Error>::missing_field("txn_id")),
    };
    for key in ENVELOPE_KEYS {
        fields.remove(key);
    }
    if matches!(fields.get("events"), None | Some(Value::Null)) {
        fields.insert("events".to_owned(), Value::Array(Vec::new()));
    }

    Ok(Transaction {
        txn_id,
        body: fields,
    })
}

/// Extract the disconnect status from a close frame reason, which carries
/// JSON like `{"command": "disconnect", "status": "conn_replaced"}`.
pub fn parse_close_reason(reason: &str) -> Option<String> {
    serde_json::from_str::<CloseCommand>(reason)
        .ok()
        .filter(|cmd| cmd.command == "disconnect")
        .map(|cmd| cmd.status)
}

// ── Outbound ────────────────────────────────────────────────────────

/// A frame written to the websocket.
#[derive(Debug, Serialize)]
pub struct OutgoingMessage {
    pub id: u64,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Box<RawValue>>,
}

impl OutgoingMessage {
    pub fn request(id: u64, command: &str, data: Box<RawValue>) -> Self {
        Self {
            id,
            command: command.to_owned(),
            data: Some(data),
        }
    }

    pub fn response(id: u64, data: Box<RawValue>) -> Self {
        Self::request(id, "response", data)
    }

    pub fn error(id: u64, error: &CommandError) -> Result<Self, serde_json::Error> {
        Ok(Self::request(id, "error", serde_json::value::to_raw_value(error)?))
    }
}

/// Error codes sent back when an inbound command fails.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::AsRefStr,
)]
pub enum ErrorCode {
    /// The handler ran and failed.
    #[serde(rename = "M_UNKNOWN")]
    #[strum(serialize = "M_UNKNOWN")]
    Unknown,
    /// No handler exists for the command.
    #[serde(rename = "M_UNRECOGNIZED")]
    #[strum(serialize = "M_UNRECOGNIZED")]
    Unrecognized,
    /// The command data could not be parsed.
    #[serde(rename = "M_BAD_JSON")]
    #[strum(serialize = "M_BAD_JSON")]
    BadJson,
}

/// Per-command failure, answered as an `error` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct CommandError {
    pub code: ErrorCode,
    pub message: String,
}

impl CommandError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unknown, message)
    }
}

/// Acknowledgement for a delivered transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionAck {
    pub txn_id: String,
}

/// Response to an `http_proxy` command.
#[derive(Debug, Serialize)]
pub struct HttpProxyResponse {
    pub status: u16,
    pub headers: BTreeMap<String, Vec<String>>,
    pub body: Box<RawValue>,
}

/// Ping payload; the server echoes it back with its own timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingData {
    /// Unix milliseconds.
    pub timestamp: i64,
}

impl PingData {
    pub fn now() -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Bridge state pushed after every connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BridgeState {
    pub state_event: BridgeStateEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BridgeStateEvent {
    #[serde(rename = "UNCONFIGURED")]
    Unconfigured,
}

impl BridgeState {
    /// Placeholder state until real bridge state reporting exists.
    pub fn unconfigured() -> Self {
        Self {
            state_event: BridgeStateEvent::Unconfigured,
        }
    }
}

// ── Body & header encoding ──────────────────────────────────────────

/// Encode a local response body for the JSON-only channel.
///
/// Valid JSON passes through untouched. Anything else becomes a JSON
/// string holding its unpadded standard base64 encoding.
pub fn encode_proxy_body(body: &[u8]) -> Result<Box<RawValue>, serde_json::Error> {
    match serde_json::from_slice::<Box<RawValue>>(body) {
        Ok(raw) => Ok(raw),
        Err(_) => serde_json::value::to_raw_value(&STANDARD_NO_PAD.encode(body)),
    }
}

/// Canonical MIME form of a header name (`content-type` → `Content-Type`).
///
/// Names containing characters outside the HTTP token set are returned
/// unchanged.
pub fn canonical_header_name(name: &str) -> String {
    let is_token = |c: char| c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c);
    if name.is_empty() || !name.chars().all(is_token) {
        return name.to_owned();
    }

    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if upper {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c.to_ascii_lowercase());
        }
        upper = c == '-';
    }
    out
}
