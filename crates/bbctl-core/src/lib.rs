// bbctl-core: Appservice websocket proxy, connection supervision, and bridge process lifecycle

pub mod backoff;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod forwarder;
pub mod handler;
pub mod keepalive;
pub mod link;
pub mod process;
pub mod registration;
pub mod supervisor;
pub mod tunnel;

pub use backoff::{Backoff, BackoffPolicy};
pub use config::{ProxyConfig, TlsVerification};
pub use coordinator::{Coordinator, CoordinatorState, RunReport, ShutdownTrigger};
pub use error::CoreError;
pub use forwarder::TransactionForwarder;
pub use handler::ProxyHandler;
pub use keepalive::run_keepalive;
pub use link::{AppserviceLink, LiveChannel, Link};
pub use process::{BridgeCommand, BridgeProcess};
pub use registration::Registration;
pub use supervisor::{SupervisorExit, run_connection_supervisor};
pub use tunnel::HttpTunnel;
