// ── Connection supervisor ──
//
// Keeps the appservice websocket open for as long as the run lasts.
// Transient failures reconnect with backoff; a manual stop or a
// `conn_replaced` disconnect ends supervision for good.

use std::pin::pin;

use bbctl_api::StopReason;
use strum::Display;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::{Backoff, BackoffPolicy};
use crate::link::Link;

/// Why the supervisor stopped reconnecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SupervisorExit {
    /// The run was cancelled from outside.
    Cancelled,
    /// The channel was stopped deliberately.
    ManualStop,
    /// Another process took over the appservice connection.
    ConnectionReplaced,
}

pub async fn run_connection_supervisor<L: Link>(
    link: &L,
    policy: BackoffPolicy,
    cancel: &CancellationToken,
) -> SupervisorExit {
    let mut backoff = Backoff::new(policy);

    loop {
        if cancel.is_cancelled() {
            return SupervisorExit::Cancelled;
        }

        let mut open = pin!(link.open());
        let result = tokio::select! {
            biased;
            result = &mut open => result,
            () = cancel.cancelled() => {
                if link.current().is_none() {
                    debug!("Cancelled before the websocket connected");
                    return SupervisorExit::Cancelled;
                }
                // Let the channel send its close frame before returning.
                link.stop(StopReason::ManualStop);
                open.await
            }
        };

        let err = match result {
            Ok(()) => {
                if cancel.is_cancelled() {
                    return SupervisorExit::Cancelled;
                }
                info!("Appservice websocket stream ended");
                None
            }
            Err(bbctl_api::Error::ManualStop) => {
                info!("Appservice websocket stopped");
                return SupervisorExit::ManualStop;
            }
            Err(bbctl_api::Error::ConnectionReplaced) => {
                info!("Appservice websocket closed by another connection, shutting down...");
                return SupervisorExit::ConnectionReplaced;
            }
            Err(e) => Some(e),
        };

        if cancel.is_cancelled() {
            return SupervisorExit::Cancelled;
        }
        if let Some(e) = err {
            warn!(error = %e, "Error in appservice websocket");
        }

        let delay = backoff.next_delay(Instant::now());
        warn!(
            backoff_seconds = delay.as_secs(),
            "Websocket disconnected, reconnecting after a while..."
        );
        tokio::select! {
            biased;
            () = cancel.cancelled() => return SupervisorExit::Cancelled,
            () = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use bbctl_api::PingData;

    use crate::link::LiveChannel;

    struct NoChannel;

    impl LiveChannel for NoChannel {
        async fn ping(&self) -> Result<PingData, bbctl_api::Error> {
            Err(bbctl_api::Error::ChannelClosed)
        }

        fn close_with(&self, _reason: StopReason) -> bool {
            false
        }
    }

    /// Replays a scripted list of outcomes, recording when each attempt
    /// started.
    struct ScriptedLink {
        outcomes: Mutex<VecDeque<Result<(), bbctl_api::Error>>>,
        attempts: Mutex<Vec<Instant>>,
    }

    impl ScriptedLink {
        fn new(outcomes: Vec<Result<(), bbctl_api::Error>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                attempts: Mutex::new(Vec::new()),
            }
        }

        fn gaps(&self) -> Vec<u64> {
            let attempts = self.attempts.lock().unwrap();
            attempts
                .windows(2)
                .map(|w| (w[1] - w[0]).as_secs())
                .collect()
        }
    }

    impl Link for ScriptedLink {
        type Channel = NoChannel;

        async fn open(&self) -> Result<(), bbctl_api::Error> {
            self.attempts.lock().unwrap().push(Instant::now());
            let next = self.outcomes.lock().unwrap().pop_front();
            match next {
                Some(outcome) => outcome,
                None => std::future::pending().await,
            }
        }

        fn current(&self) -> Option<Arc<NoChannel>> {
            None
        }

        fn stop(&self, _reason: StopReason) -> bool {
            false
        }
    }

    fn refused() -> Result<(), bbctl_api::Error> {
        Err(bbctl_api::Error::WebSocketConnect("connection refused".into()))
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_with_growing_backoff() {
        let link = Arc::new(ScriptedLink::new(vec![
            refused(),
            refused(),
            refused(),
            Err(bbctl_api::Error::ConnectionReplaced),
        ]));
        let cancel = CancellationToken::new();

        let exit = run_connection_supervisor(link.as_ref(), BackoffPolicy::default(), &cancel).await;
        assert_eq!(exit, SupervisorExit::ConnectionReplaced);
        assert_eq!(link.gaps(), vec![2, 4, 8]);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_stop_is_terminal() {
        let link = ScriptedLink::new(vec![Err(bbctl_api::Error::ManualStop), refused()]);
        let cancel = CancellationToken::new();

        let exit = run_connection_supervisor(&link, BackoffPolicy::default(), &cancel).await;
        assert_eq!(exit, SupervisorExit::ManualStop);
        assert_eq!(link.attempts.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn clean_stream_end_reconnects() {
        let link = ScriptedLink::new(vec![Ok(()), Err(bbctl_api::Error::ManualStop)]);
        let cancel = CancellationToken::new();

        let exit = run_connection_supervisor(&link, BackoffPolicy::default(), &cancel).await;
        assert_eq!(exit, SupervisorExit::ManualStop);
        assert_eq!(link.gaps(), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_returns_promptly() {
        let link = Arc::new(ScriptedLink::new(vec![refused()]));
        let cancel = CancellationToken::new();

        let task = {
            let link = Arc::clone(&link);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                run_connection_supervisor(link.as_ref(), BackoffPolicy::default(), &cancel).await
            })
        };

        tokio::time::sleep(Duration::from_millis(500)).await;
        cancel.cancel();
        assert_eq!(task.await.unwrap(), SupervisorExit::Cancelled);
        assert_eq!(link.attempts.lock().unwrap().len(), 1);
    }

    /// A link whose channel stays up until stopped.
    struct LiveLink {
        stopped: tokio::sync::Notify,
        stops: AtomicUsize,
        connected: Mutex<bool>,
    }

    impl Link for LiveLink {
        type Channel = NoChannel;

        async fn open(&self) -> Result<(), bbctl_api::Error> {
            *self.connected.lock().unwrap() = true;
            self.stopped.notified().await;
            Err(bbctl_api::Error::ManualStop)
        }

        fn current(&self) -> Option<Arc<NoChannel>> {
            self.connected.lock().unwrap().then(|| Arc::new(NoChannel))
        }

        fn stop(&self, _reason: StopReason) -> bool {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.stopped.notify_one();
            true
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_with_live_channel_stops_it_first() {
        let link = Arc::new(LiveLink {
            stopped: tokio::sync::Notify::new(),
            stops: AtomicUsize::new(0),
            connected: Mutex::new(false),
        });
        let cancel = CancellationToken::new();

        let task = {
            let link = Arc::clone(&link);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                run_connection_supervisor(link.as_ref(), BackoffPolicy::default(), &cancel).await
            })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        assert_eq!(task.await.unwrap(), SupervisorExit::ManualStop);
        assert_eq!(link.stops.load(Ordering::SeqCst), 1);
    }
}
