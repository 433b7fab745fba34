// ── Proxy command handler ──
//
// Routes commands from the appservice websocket to the transaction
// forwarder and the HTTP tunnel. Every failure here stays scoped to the
// command that caused it and becomes an error reply.

use bbctl_api::websocket::CommandResult;
use bbctl_api::{CommandError, CommandHandler, ErrorCode, InboundCommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::CoreError;
use crate::forwarder::TransactionForwarder;
use crate::tunnel::HttpTunnel;

pub struct ProxyHandler {
    forwarder: TransactionForwarder,
    tunnel: HttpTunnel,
}

impl ProxyHandler {
    pub fn new(forwarder: TransactionForwarder, tunnel: HttpTunnel) -> Self {
        Self { forwarder, tunnel }
    }
}

impl CommandHandler for ProxyHandler {
    async fn handle(&self, command: InboundCommand, ctx: CancellationToken) -> CommandResult {
        match command {
            InboundCommand::Transaction(txn) => {
                let result = tokio::select! {
                    biased;
                    () = ctx.cancelled() => Err(CoreError::Cancelled),
                    result = self.forwarder.forward(&txn) => result,
                };
                match result {
                    Ok(ack) => to_reply(&ack),
                    Err(e) => {
                        warn!(txn_id = %txn.txn_id, error = %e, "Failed to forward transaction");
                        Err(CommandError::unknown(e.to_string()))
                    }
                }
            }
            InboundCommand::HttpProxy(request) => {
                let path = request.path.clone();
                match self.tunnel.execute(request, &ctx).await {
                    Ok(response) => to_reply(&response),
                    Err(e) => {
                        warn!(path = %path, error = %e, "Failed to proxy HTTP request");
                        Err(CommandError::unknown(e.to_string()))
                    }
                }
            }
            InboundCommand::Ping(data) => Ok(data),
            InboundCommand::Unknown { command } => Err(CommandError::new(
                ErrorCode::Unrecognized,
                format!("unknown command {command}"),
            )),
        }
    }
}

fn to_reply<T: Serialize>(value: &T) -> CommandResult {
    serde_json::value::to_raw_value(value)
        .map_err(|e| CommandError::unknown(format!("failed to encode response: {e}")))
}
