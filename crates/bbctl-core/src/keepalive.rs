// ── Websocket keepalive ──
//
// Periodically pings the live channel. A ping that fails means the
// connection is dead even if the socket hasn't noticed yet, so the
// channel is force-closed and the supervisor reconnects.

use std::time::Duration;

use bbctl_api::{PingData, StopReason};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::link::{LiveChannel, Link};

#[tracing::instrument(skip_all, fields(component = "websocket pinger"))]
pub async fn run_keepalive<L: Link>(link: &L, interval: Duration, cancel: &CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let Some(channel) = link.current() else {
            debug!("Not pinging: websocket not connected");
            continue;
        };

        let started = Instant::now();
        let sent = PingData::now();
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            result = channel.ping() => result,
        };
        let duration = started.elapsed();

        match result {
            Ok(reply) => {
                let (req_ms, resp_ms) = ping_legs(sent, reply, PingData::now());
                debug!(
                    duration = ?duration,
                    req_duration_ms = req_ms,
                    resp_duration_ms = resp_ms,
                    "Websocket ping returned success"
                );
            }
            Err(e) => {
                warn!(duration = ?duration, error = %e, "Websocket ping returned error");
                channel.close_with(StopReason::Forced(format!(
                    "websocket ping returned error in {duration:?}: {e}"
                )));
            }
        }
    }
}

/// Request and response legs of a ping in milliseconds. The echoed
/// timestamp comes from the server, so the arithmetic saturates.
fn ping_legs(sent: PingData, reply: PingData, received: PingData) -> (i64, i64) {
    (
        reply.timestamp.saturating_sub(sent.timestamp),
        received.timestamp.saturating_sub(reply.timestamp),
    )
}
