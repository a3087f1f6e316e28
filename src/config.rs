use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use tracing::debug;

use crate::{
    oauth::{GOOGLE_AUTH_URL, GOOGLE_TOKEN_URL},
    store::google_fit::FIT_API_BASE,
};

pub const DEFAULT_REDIRECT_PORT: u16 = 11132;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unable to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("The google_fit backend needs google_fit.client_id and google_fit.client_secret")]
    MissingGoogleCredentials,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Local,
    GoogleFit,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LocalConfig {
    /// Keep samples in the data directory between runs
    pub persist: bool,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self { persist: true }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct GoogleFitConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_port: u16,
    pub api_base_url: String,
    pub auth_url: String,
    pub token_url: String,
}

impl Default for GoogleFitConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            redirect_port: DEFAULT_REDIRECT_PORT,
            api_base_url: FIT_API_BASE.to_string(),
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
        }
    }
}

impl GoogleFitConfig {
    /// Returns `(client_id, client_secret)`.
    pub fn client_credentials(&self) -> Result<(&str, &str), ConfigError> {
        match (self.client_id.as_deref(), self.client_secret.as_deref()) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => Ok((id, secret)),
            _ => Err(ConfigError::MissingGoogleCredentials),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub backend: Backend,

    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub log_level: String,

    pub sentry_dsn: Option<String>,
    pub local: LocalConfig,
    pub google_fit: GoogleFitConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            log_level: "info".to_string(),
            sentry_dsn: None,
            local: LocalConfig::default(),
            google_fit: GoogleFitConfig::default(),
        }
    }
}

impl Config {
    /// Loads `path`, falling back to defaults when the file doesn't exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No config at {path:?}, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;

        if config.backend == Backend::GoogleFit {
            config.google_fit.client_credentials()?;
        }

        Ok(config)
    }
}
