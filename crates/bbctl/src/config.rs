//! Translation from config file + CLI flags to `bbctl_core::ProxyConfig`.
//!
//! Core never sees the on-disk types; it receives a pre-built
//! `ProxyConfig`.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use bbctl_config::{Config, Env};
use bbctl_core::{ProxyConfig, TlsVerification};

use crate::cli::{EnvArg, GlobalOpts};
use crate::error::CliError;

pub fn env(global: &GlobalOpts) -> Env {
    match global.env {
        EnvArg::Prod => Env::Prod,
        EnvArg::Staging => Env::Staging,
        EnvArg::Dev => Env::Dev,
        EnvArg::Local => Env::Local,
    }
}

/// `--config` if given, else the default location.
pub fn config_path(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(bbctl_config::config_path)
}

pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    let path = config_path(global);
    bbctl_config::load_config_from(&path).map_err(|e| CliError::from_config(e, &path))
}

/// Hungryserv URL: `--homeserver-url` wins over the config file.
pub fn homeserver_url(global: &GlobalOpts, cfg: &Config) -> Result<Url, CliError> {
    if let Some(raw) = &global.homeserver_url {
        return Url::parse(raw).map_err(|e| CliError::Validation {
            field: "homeserver-url".into(),
            reason: format!("invalid URL {raw:?}: {e}"),
        });
    }
    cfg.hungry_url(env(global))
        .map_err(|e| CliError::from_config(e, &config_path(global)))
}

pub fn proxy_config(global: &GlobalOpts, cfg: &Config) -> Result<ProxyConfig, CliError> {
    let mut config = ProxyConfig::new(homeserver_url(global, cfg)?);
    config.local_timeout = Duration::from_secs(global.timeout);
    if global.insecure {
        config.tls = TlsVerification::DangerAcceptInvalid;
    }
    Ok(config)
}
