//! `bbctl run`: start a bridge, with the websocket proxy when it needs one.

use std::path::Path;

use tracing::info;

use bbctl_core::config::DEFAULT_SHUTDOWN_GRACE;
use bbctl_core::{
    AppserviceLink, BridgeCommand, BridgeProcess, Coordinator, ShutdownTrigger, SupervisorExit,
};

use crate::cli::{GlobalOpts, RunArgs, Transport};
use crate::commands::util;
use crate::config;
use crate::error::{CliError, exit_code};

/// Bridges that connect to the appservice websocket on their own.
const WEBSOCKET_BRIDGES: &[&str] = &[
    "discord",
    "slack",
    "whatsapp",
    "gmessages",
    "gvoice",
    "heisenbridge",
    "imessage",
    "imessagego",
    "signal",
    "bridgev2",
    "meta",
    "twitter",
    "bluesky",
    "linkedin",
];

/// Whether the bridge needs the proxy in front of it.
///
/// Without a bridge type, `auto` falls back to whether a registration
/// was given at all.
pub fn needs_proxy(transport: Transport, bridge_type: Option<&str>, has_registration: bool) -> bool {
    match transport {
        Transport::Websocket => false,
        Transport::Http => true,
        Transport::Auto => bridge_type.map_or(has_registration, |t| {
            !WEBSOCKET_BRIDGES.contains(&t.to_ascii_lowercase().as_str())
        }),
    }
}

pub async fn handle(args: RunArgs, global: &GlobalOpts) -> Result<i32, CliError> {
    let Some((program, program_args)) = args.command.split_first() else {
        return Err(CliError::Validation {
            field: "command".into(),
            reason: "no bridge command given".into(),
        });
    };
    let bridge_name = args.bridge_type.clone().unwrap_or_else(|| {
        Path::new(program)
            .file_name()
            .map_or_else(|| program.clone(), |n| n.to_string_lossy().into_owned())
    });

    let with_proxy = needs_proxy(
        args.transport,
        args.bridge_type.as_deref(),
        args.registration.is_some(),
    );
    let coordinator = if with_proxy {
        let path = args
            .registration
            .as_deref()
            .ok_or_else(|| CliError::MissingRegistration {
                bridge: bridge_name.clone(),
            })?;
        let registration = util::load_registration(path)?;
        let cfg = config::load(global)?;
        let proxy_config = config::proxy_config(global, &cfg)?;
        let link = AppserviceLink::new(&proxy_config, &registration)?;
        info!(
            homeserver = %proxy_config.homeserver_url,
            appservice = %registration.url,
            "Starting websocket proxy"
        );
        Coordinator::new(Some(link), &proxy_config)
    } else {
        Coordinator::<AppserviceLink>::bridge_only(DEFAULT_SHUTDOWN_GRACE)
    };

    let mut command = BridgeCommand::new(program.clone()).args(program_args.iter().cloned());
    if let Some(dir) = &args.workdir {
        command = command.workdir(dir);
    }
    info!(bridge = %bridge_name, "Starting bridge");
    let bridge = BridgeProcess::spawn(&command)?;

    let report = coordinator.run(Some(bridge), util::shutdown_signal()).await;
    info!(bridge = %bridge_name, "Bridge stopped");

    match report.trigger {
        ShutdownTrigger::BridgeExited => match report.bridge_status {
            Some(status) if !status.success() => Err(CliError::BridgeFailed {
                status: status.to_string(),
                code: status.code(),
            }),
            _ => Ok(exit_code::SUCCESS),
        },
        ShutdownTrigger::ProxyExited(SupervisorExit::ConnectionReplaced) => {
            Err(CliError::ConnectionReplaced)
        }
        ShutdownTrigger::Signal | ShutdownTrigger::ProxyExited(_) => Ok(exit_code::GENERAL),
    }
}
