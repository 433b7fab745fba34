// ── Websocket link ──
//
// The seam between the supervision loops and the websocket client.
// `AppserviceLink` is the real thing; tests drive the supervisor and the
// keepalive loop through their own `Link` implementations.

use std::future::Future;
use std::sync::Arc;

use bbctl_api::{
    AppserviceWebsocket, BridgeState, Channel, PingData, StopReason, WebsocketConfig,
};
use tracing::{info, warn};

use crate::config::ProxyConfig;
use crate::error::CoreError;
use crate::forwarder::TransactionForwarder;
use crate::handler::ProxyHandler;
use crate::registration::Registration;
use crate::tunnel::HttpTunnel;

/// A connected channel, as seen by the keepalive loop.
pub trait LiveChannel: Send + Sync + 'static {
    fn ping(&self) -> impl Future<Output = Result<PingData, bbctl_api::Error>> + Send;

    /// Force the channel closed. Returns `false` if it was already stopping.
    fn close_with(&self, reason: StopReason) -> bool;
}

impl LiveChannel for Channel {
    fn ping(&self) -> impl Future<Output = Result<PingData, bbctl_api::Error>> + Send {
        Channel::ping(self)
    }

    fn close_with(&self, reason: StopReason) -> bool {
        self.stop(reason)
    }
}

/// Something that can open and serve websocket channels, one at a time.
pub trait Link: Send + Sync + 'static {
    type Channel: LiveChannel;

    /// Open a channel and serve it until it ends.
    fn open(&self) -> impl Future<Output = Result<(), bbctl_api::Error>> + Send;

    /// The channel currently being served, if any.
    fn current(&self) -> Option<Arc<Self::Channel>>;

    /// Stop the current channel. Returns `false` if none is open.
    fn stop(&self, reason: StopReason) -> bool;
}

/// Websocket client wired to the local appservice.
pub struct AppserviceLink {
    websocket: AppserviceWebsocket,
    handler: Arc<ProxyHandler>,
}

impl AppserviceLink {
    /// Validate the registration and build the client stack for one run.
    pub fn new(config: &ProxyConfig, registration: &Registration) -> Result<Self, CoreError> {
        let local_url = registration.local_url()?;
        let client = config.transport().build_client()?;

        let forwarder = TransactionForwarder::new(
            client.clone(),
            local_url.clone(),
            registration.hs_token.clone(),
        );
        let tunnel = HttpTunnel::new(client, local_url);

        let mut ws_config =
            WebsocketConfig::new(config.homeserver_url.clone(), registration.as_token.clone());
        ws_config.process_id = config.process_id;
        ws_config.request_timeout = config.request_timeout;

        Ok(Self {
            websocket: AppserviceWebsocket::new(ws_config),
            handler: Arc::new(ProxyHandler::new(forwarder, tunnel)),
        })
    }
}

impl Link for AppserviceLink {
    type Channel = Channel;

    fn open(&self) -> impl Future<Output = Result<(), bbctl_api::Error>> + Send {
        self.websocket
            .run(Arc::clone(&self.handler), |channel: &Channel| {
                info!("Connected to appservice websocket");
                if let Err(e) = channel.send("bridge_status", &BridgeState::unconfigured()) {
                    warn!(error = %e, "Failed to send initial bridge status");
                }
            })
    }

    fn current(&self) -> Option<Arc<Channel>> {
        self.websocket.current()
    }

    fn stop(&self, reason: StopReason) -> bool {
        self.websocket.stop(reason)
    }
}
