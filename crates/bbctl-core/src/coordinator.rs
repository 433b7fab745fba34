// ── Run coordinator ──
//
// Owns one proxy run: the connection supervisor, the keepalive loop,
// and optionally the bridge child process. Whichever of an external
// signal, the supervisor ending, or the bridge exiting happens first
// triggers an orderly shutdown of everything else.

use std::future::Future;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use bbctl_api::StopReason;
use strum::Display;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::BackoffPolicy;
use crate::config::{DEFAULT_KEEPALIVE_INTERVAL, ProxyConfig};
use crate::keepalive::run_keepalive;
use crate::link::Link;
use crate::process::BridgeProcess;
use crate::supervisor::{SupervisorExit, run_connection_supervisor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum CoordinatorState {
    Idle,
    Running,
    ShuttingDown,
    Stopped,
}

/// What started the shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    Signal,
    ProxyExited(SupervisorExit),
    BridgeExited,
}

/// Outcome of a finished run.
#[derive(Debug)]
pub struct RunReport {
    pub trigger: ShutdownTrigger,
    /// Exit status of the bridge, if one was running and could be reaped.
    pub bridge_status: Option<ExitStatus>,
    /// How the connection supervisor ended, if it was running.
    pub proxy_exit: Option<SupervisorExit>,
}

pub struct Coordinator<L: Link> {
    link: Option<Arc<L>>,
    backoff: BackoffPolicy,
    keepalive_interval: Duration,
    grace: Duration,
    state: watch::Sender<CoordinatorState>,
}

impl<L: Link> Coordinator<L> {
    /// `link` is `None` when the bridge speaks the websocket itself and
    /// only the child process needs supervising.
    pub fn new(link: Option<L>, config: &ProxyConfig) -> Self {
        let (state, _) = watch::channel(CoordinatorState::Idle);
        Self {
            link: link.map(Arc::new),
            backoff: config.backoff,
            keepalive_interval: config.keepalive_interval,
            grace: config.shutdown_grace,
            state,
        }
    }

    /// A coordinator that only supervises the bridge process.
    pub fn bridge_only(grace: Duration) -> Self {
        let (state, _) = watch::channel(CoordinatorState::Idle);
        Self {
            link: None,
            backoff: BackoffPolicy::default(),
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            grace,
            state,
        }
    }

    pub fn state(&self) -> CoordinatorState {
        *self.state.borrow()
    }

    pub async fn run(
        &self,
        mut bridge: Option<BridgeProcess>,
        shutdown_signal: impl Future<Output = ()> + Send,
    ) -> RunReport {
        self.state.send_replace(CoordinatorState::Running);
        let cancel = CancellationToken::new();

        let mut supervisor = self.link.as_ref().map(|link| {
            let link = Arc::clone(link);
            let backoff = self.backoff;
            let cancel = cancel.clone();
            tokio::spawn(async move { run_connection_supervisor(link.as_ref(), backoff, &cancel).await })
        });
        let keepalive = self.link.as_ref().map(|link| {
            let link = Arc::clone(link);
            let interval = self.keepalive_interval;
            let cancel = cancel.clone();
            tokio::spawn(async move { run_keepalive(link.as_ref(), interval, &cancel).await })
        });

        let mut bridge_status = None;
        let mut proxy_exit = None;

        let trigger = tokio::select! {
            () = shutdown_signal => {
                info!("Received shutdown signal, stopping...");
                ShutdownTrigger::Signal
            }
            exit = join_optional(supervisor.as_mut()) => {
                supervisor = None;
                match exit {
                    Ok(exit) => {
                        info!(%exit, "Websocket proxy exited, shutting down");
                        proxy_exit = Some(exit);
                        ShutdownTrigger::ProxyExited(exit)
                    }
                    Err(e) => {
                        warn!(error = %e, "Connection supervisor panicked");
                        ShutdownTrigger::ProxyExited(SupervisorExit::Cancelled)
                    }
                }
            }
            status = wait_optional(bridge.as_mut()) => {
                match status {
                    Ok(status) => {
                        info!(%status, "Bridge process exited");
                        bridge_status = Some(status);
                    }
                    Err(e) => warn!(error = %e, "Failed to wait for bridge process"),
                }
                ShutdownTrigger::BridgeExited
            }
        };

        self.state.send_replace(CoordinatorState::ShuttingDown);
        debug!(?trigger, "Shutting down proxy run");

        cancel.cancel();
        if let Some(link) = &self.link {
            link.stop(StopReason::ManualStop);
        }

        if bridge_status.is_none() {
            if let Some(bridge) = bridge.as_mut() {
                match bridge.terminate(self.grace).await {
                    Ok(status) => bridge_status = Some(status),
                    Err(e) => warn!(error = %e, "Failed to stop bridge process"),
                }
            }
        }

        if let Some(handle) = supervisor {
            match handle.await {
                Ok(exit) => proxy_exit = Some(exit),
                Err(e) => warn!(error = %e, "Connection supervisor panicked"),
            }
        }
        if let Some(handle) = keepalive {
            if let Err(e) = handle.await {
                warn!(error = %e, "Websocket keepalive panicked");
            }
        }

        self.state.send_replace(CoordinatorState::Stopped);
        RunReport {
            trigger,
            bridge_status,
            proxy_exit,
        }
    }
}

async fn join_optional<T>(
    handle: Option<&mut JoinHandle<T>>,
) -> Result<T, tokio::task::JoinError> {
    match handle {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

async fn wait_optional(
    bridge: Option<&mut BridgeProcess>,
) -> Result<ExitStatus, crate::error::CoreError> {
    match bridge {
        Some(bridge) => bridge.wait().await,
        None => std::future::pending().await,
    }
}
