//! Appservice registration file.
//!
//! Only the tokens and the local URL matter to the proxy; the rest is
//! parsed so that `config show`-style callers can display it.

use std::path::Path;

use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

use crate::error::CoreError;

const CHANGE_URL_MESSAGE: &str = "You must change the `url` field in the registration file to point at the local appservice HTTP server (e.g. `http://localhost:8080`)";
const URL_SCHEME_MESSAGE: &str = "`url` field in registration must start with http:// or https://";

/// A regex namespace claimed by the appservice.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Namespace {
    pub regex: String,
    #[serde(default)]
    pub exclusive: bool,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Namespaces {
    #[serde(default)]
    pub users: Vec<Namespace>,
    #[serde(default)]
    pub aliases: Vec<Namespace>,
    #[serde(default)]
    pub rooms: Vec<Namespace>,
}

/// Parsed appservice registration.
#[derive(Debug, Clone, Deserialize)]
pub struct Registration {
    pub id: String,
    /// Where the bridge's appservice HTTP server listens.
    #[serde(default)]
    pub url: String,
    pub as_token: SecretString,
    pub hs_token: SecretString,
    #[serde(default)]
    pub sender_localpart: String,
    #[serde(default)]
    pub rate_limited: Option<bool>,
    #[serde(default)]
    pub namespaces: Namespaces,
    #[serde(default)]
    pub protocols: Vec<String>,
    #[serde(default, rename = "de.sorunome.msc2409.push_ephemeral")]
    pub push_ephemeral: Option<bool>,
}

impl Registration {
    /// Read and parse a YAML registration file.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let display = path.display().to_string();
        let contents = std::fs::read_to_string(path).map_err(|e| CoreError::RegistrationLoad {
            path: display.clone(),
            reason: e.to_string(),
        })?;
        Self::from_yaml(&contents).map_err(|e| match e {
            CoreError::RegistrationLoad { reason, .. } => CoreError::RegistrationLoad {
                path: display,
                reason,
            },
            other => other,
        })
    }

    pub fn from_yaml(contents: &str) -> Result<Self, CoreError> {
        serde_yaml::from_str(contents).map_err(|e| CoreError::RegistrationLoad {
            path: String::new(),
            reason: e.to_string(),
        })
    }

    /// The validated local appservice URL.
    ///
    /// Rejects the `websocket` placeholder and anything that isn't plain
    /// HTTP(S), since the proxy has nowhere to forward to.
    pub fn local_url(&self) -> Result<Url, CoreError> {
        let raw = self.url.trim();
        if raw.is_empty() || raw == "websocket" {
            return Err(CoreError::InvalidRegistration {
                message: CHANGE_URL_MESSAGE.into(),
            });
        }
        if !raw.starts_with("http://") && !raw.starts_with("https://") {
            return Err(CoreError::InvalidRegistration {
                message: URL_SCHEME_MESSAGE.into(),
            });
        }
        Url::parse(raw).map_err(|e| CoreError::InvalidRegistration {
            message: format!("`url` field in registration is not a valid URL: {e}"),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::io::Write;

    const REGISTRATION: &str = r#"
id: sh-telegram
url: http://localhost:29317
as_token: as_secret
hs_token: hs_secret
sender_localpart: sh-telegrambot
rate_limited: false
namespaces:
  users:
    - regex: '@sh-telegram_.+:beeper\.local'
      exclusive: true
de.sorunome.msc2409.push_ephemeral: true
"#;

    fn with_url(url: &str) -> Registration {
        let mut reg = Registration::from_yaml(REGISTRATION).unwrap();
        reg.url = url.to_owned();
        reg
    }

    #[test]
    fn parses_registration_yaml() {
        let reg = Registration::from_yaml(REGISTRATION).unwrap();
        assert_eq!(reg.id, "sh-telegram");
        assert_eq!(reg.as_token.expose_secret(), "as_secret");
        assert_eq!(reg.hs_token.expose_secret(), "hs_secret");
        assert_eq!(reg.namespaces.users.len(), 1);
        assert!(reg.namespaces.users[0].exclusive);
        assert_eq!(reg.push_ephemeral, Some(true));
        assert_eq!(reg.local_url().unwrap().as_str(), "http://localhost:29317/");
    }

    #[test]
    fn load_reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(REGISTRATION.as_bytes()).unwrap();
        let reg = Registration::load(file.path()).unwrap();
        assert_eq!(reg.sender_localpart, "sh-telegrambot");
    }

    #[test]
    fn load_reports_path_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("registration.yaml");
        let err = Registration::load(&missing).unwrap_err();
        assert!(matches!(err, CoreError::RegistrationLoad { .. }));
        assert!(err.to_string().contains("registration.yaml"));
    }

    #[test]
    fn placeholder_url_is_rejected() {
        for url in ["", "websocket"] {
            let err = with_url(url).local_url().unwrap_err();
            assert!(err.to_string().starts_with("You must change the `url` field"));
            assert!(matches!(err, CoreError::InvalidRegistration { .. }));
        }
    }

    #[test]
    fn non_http_url_is_rejected() {
        let err = with_url("ws://localhost:29317").local_url().unwrap_err();
        assert_eq!(err.to_string(), URL_SCHEME_MESSAGE);
    }

    #[test]
    fn https_url_is_accepted() {
        let url = with_url("https://bridge.internal:8443/prefix").local_url().unwrap();
        assert_eq!(url.path(), "/prefix");
    }
}
