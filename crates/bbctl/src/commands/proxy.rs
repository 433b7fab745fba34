//! `bbctl proxy`: relay the appservice websocket to a local HTTP appservice.

use tracing::info;

use bbctl_core::{AppserviceLink, Coordinator, ShutdownTrigger, SupervisorExit};

use crate::cli::{GlobalOpts, ProxyArgs};
use crate::commands::util;
use crate::config;
use crate::error::{CliError, exit_code};

pub async fn handle(args: ProxyArgs, global: &GlobalOpts) -> Result<i32, CliError> {
    let registration = util::load_registration(&args.registration)?;
    let cfg = config::load(global)?;
    let proxy_config = config::proxy_config(global, &cfg)?;
    let link = AppserviceLink::new(&proxy_config, &registration)?;

    info!(
        registration = %registration.id,
        homeserver = %proxy_config.homeserver_url,
        appservice = %registration.url,
        "Starting appservice websocket proxy"
    );
    let coordinator = Coordinator::new(Some(link), &proxy_config);
    let report = coordinator.run(None, util::shutdown_signal()).await;

    match report.trigger {
        ShutdownTrigger::ProxyExited(SupervisorExit::ConnectionReplaced) => {
            Err(CliError::ConnectionReplaced)
        }
        _ => Ok(exit_code::SUCCESS),
    }
}
