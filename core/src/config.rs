//! Endpoint configuration.
//!
//! An endpoint is one Mainzelliste installation: where it lives, which API
//! version it speaks and which fields are loaded by default. The API key is
//! not part of the configuration; callers supply it separately.
//!
//! ```toml
//! name = "MuKo"
//! base_url = "https://ml.example.org/mainzelliste"
//! api_version = "3.0"
//! fields = ["vorname", "nachname", "geburtstag"]
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::transport::{TransportConfig, TransportError};
use crate::types::ApiVersion;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),

    #[error("failed to set up HTTP transport: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default)]
    pub name: String,

    pub base_url: String,

    pub api_version: ApiVersion,

    /// Fields requested when loading patients.
    #[serde(default)]
    pub fields: Vec<String>,

    #[serde(default)]
    pub accept_invalid_certs: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,

    /// Delete the session when a conversation fails after creating it.
    #[serde(default)]
    pub cleanup_abandoned_sessions: bool,
}

impl EndpointConfig {
    pub fn new(base_url: impl Into<String>, api_version: ApiVersion) -> Self {
        Self {
            name: String::new(),
            base_url: base_url.into(),
            api_version,
            fields: Vec::new(),
            accept_invalid_certs: false,
            request_timeout_secs: None,
            cleanup_abandoned_sessions: false,
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            accept_invalid_certs: self.accept_invalid_certs,
            request_timeout: self.request_timeout_secs.map(Duration::from_secs),
        }
    }
}
