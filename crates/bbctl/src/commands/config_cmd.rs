//! Config subcommand handlers.

use secrecy::ExposeSecret;

use bbctl_core::config::{DEFAULT_KEEPALIVE_INTERVAL, DEFAULT_SHUTDOWN_GRACE};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config;
use crate::error::CliError;

pub fn handle(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            println!("{}", config::config_path(global).display());
            Ok(())
        }
        ConfigCommand::Show => {
            let cfg = config::load(global)?;
            let env = config::env(global);
            let settings = cfg.environment(env).cloned().unwrap_or_default();

            let homeserver = match config::homeserver_url(global, &cfg) {
                Ok(url) => url.to_string(),
                Err(CliError::NotLoggedIn { .. }) => "(not logged in)".into(),
                Err(e) => return Err(e),
            };
            let token = settings
                .access_token()
                .map_or("(none)", |t| {
                    if t.expose_secret().is_empty() {
                        "(none)"
                    } else {
                        "<redacted>"
                    }
                });

            println!("Config file:        {}", config::config_path(global).display());
            println!("Environment:        {env} ({})", env.domain());
            println!("Device ID:          {}", cfg.device_id.as_deref().unwrap_or("(none)"));
            println!("Username:           {}", settings.username.as_deref().unwrap_or("(none)"));
            println!("Access token:       {token}");
            println!("Homeserver URL:     {homeserver}");
            println!("Bridge data dir:    {}", cfg.bridge_data_dir(env).display());
            println!(
                "Local timeout:      {}",
                humantime::format_duration(std::time::Duration::from_secs(global.timeout))
            );
            println!(
                "Keepalive interval: {}",
                humantime::format_duration(DEFAULT_KEEPALIVE_INTERVAL)
            );
            println!(
                "Shutdown grace:     {}",
                humantime::format_duration(DEFAULT_SHUTDOWN_GRACE)
            );
            Ok(())
        }
    }
}
