//! On-disk configuration for bbctl.
//!
//! One TOML file holds per-environment login state (username, access
//! token, hungryserv address, bridge data directory). The CLI layers
//! its own flags on top and turns the result into a
//! `bbctl_core::ProxyConfig`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env as EnvProvider, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "BBCTL_CONFIG";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("not logged in to the {env} environment")]
    NotLoggedIn { env: Env },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── Environments ────────────────────────────────────────────────────

/// A Beeper deployment.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::VariantNames,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Env {
    #[default]
    Prod,
    Staging,
    Dev,
    Local,
}

impl Env {
    /// Base domain the environment's homeserver lives under.
    pub fn domain(self) -> &'static str {
        match self {
            Self::Prod => "beeper.com",
            Self::Staging => "beeper-staging.com",
            Self::Dev => "beeper-dev.com",
            Self::Local => "beeper.localtest.me",
        }
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    /// Per-environment settings, keyed by environment name.
    #[serde(default)]
    pub environments: BTreeMap<String, EnvConfig>,
}

/// Settings for one environment.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EnvConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Matrix access token (plaintext on disk).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    /// Full hungryserv URL; derived from `username` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hungry_address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bridge_data_dir: Option<PathBuf>,
}

impl EnvConfig {
    pub fn access_token(&self) -> Option<SecretString> {
        self.access_token.clone().map(SecretString::from)
    }
}

impl Config {
    pub fn environment(&self, env: Env) -> Option<&EnvConfig> {
        self.environments.get(&env.to_string())
    }

    /// Hungryserv base URL for `env`.
    ///
    /// An explicit `hungry_address` wins; otherwise the address is
    /// derived from the username.
    pub fn hungry_url(&self, env: Env) -> Result<Url, ConfigError> {
        let settings = self.environment(env);

        if let Some(address) = settings.and_then(|s| s.hungry_address.as_deref()) {
            return parse_url("hungry_address", address);
        }
        match settings.and_then(|s| s.username.as_deref()) {
            Some(username) if !username.is_empty() => parse_url(
                "username",
                &format!("https://matrix.{}/_hungryserv/{username}", env.domain()),
            ),
            _ => Err(ConfigError::NotLoggedIn { env }),
        }
    }

    /// Directory the bridge keeps its data in for `env`.
    pub fn bridge_data_dir(&self, env: Env) -> PathBuf {
        self.environment(env)
            .and_then(|s| s.bridge_data_dir.clone())
            .unwrap_or_else(|| default_data_dir().join(env.to_string()))
    }
}

fn parse_url(field: &str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid URL {raw:?}: {e}"),
    })
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path: `$BBCTL_CONFIG`, else the platform
/// config directory.
pub fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV).filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }
    ProjectDirs::from("com", "beeper", "bbctl").map_or_else(
        || fallback_dir(".config").join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn default_data_dir() -> PathBuf {
    ProjectDirs::from("com", "beeper", "bbctl").map_or_else(
        || fallback_dir(".local/share"),
        |dirs| dirs.data_dir().to_path_buf(),
    )
}

fn fallback_dir(base: &str) -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(base);
    p.push("bbctl");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the config from `path`, layered over defaults and under
/// `BBCTL_`-prefixed environment variables. A missing file is not an
/// error.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(EnvProvider::prefixed("BBCTL_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}
