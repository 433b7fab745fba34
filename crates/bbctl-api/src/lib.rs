// bbctl-api: Appservice websocket protocol, channel, and HTTP transport

pub mod error;
pub mod protocol;
pub mod transport;
pub mod websocket;

pub use error::Error;
pub use protocol::{
    BridgeState, CommandError, ErrorCode, HttpProxyRequest, HttpProxyResponse, InboundCommand,
    PingData, Transaction, TransactionAck,
};
pub use transport::{TlsMode, TransportConfig};
pub use websocket::{
    AppserviceWebsocket, Channel, ChannelState, CommandHandler, StopReason, WebsocketConfig,
};
