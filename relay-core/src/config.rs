//! Configuration types and utilities

use crate::error::RelayError;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Well-known local port the embedded frame talks to.
pub const DEFAULT_LISTEN_PORT: u16 = 7654;

/// Remote service hosting the project-generation form.
pub const DEFAULT_REMOTE_ORIGIN: &str = "https://start.spring.io";

/// Settings key holding the base directory offered by the folder picker.
pub const PROJECTS_FOLDER_KEY: &str = "projects-folder";

/// Static relay configuration.
/// These settings are read at startup and do not change during runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Address to listen on
    pub listen_address: String,
    /// Port to listen on
    pub listen_port: u16,
    /// Origin every non-intercepted request is forwarded to
    pub remote_origin: String,
    /// Path prefix of the generated-archive download
    pub intercept_prefix: String,
    /// Query parameter carrying the project (and directory) name
    pub project_name_key: String,
    /// Response headers removed from forwarded responses
    pub stripped_headers: Vec<String>,
    /// Upper bound on a forwarded request body
    pub max_request_body_bytes: usize,
    /// Admin API port (health/metrics); disabled when unset
    pub admin_port: Option<u16>,
    /// Embedded panel configuration
    pub panel: PanelConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Host settings consulted by the extraction workflow
    pub settings: HashMap<String, String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1".to_string(),
            listen_port: DEFAULT_LISTEN_PORT,
            remote_origin: DEFAULT_REMOTE_ORIGIN.to_string(),
            intercept_prefix: "/starter.zip".to_string(),
            project_name_key: "baseDir".to_string(),
            stripped_headers: vec![
                "x-frame-options".to_string(),
                "content-security-policy".to_string(),
            ],
            max_request_body_bytes: 16 * 1024 * 1024,
            admin_port: None,
            panel: PanelConfig::default(),
            logging: LoggingConfig::default(),
            settings: HashMap::new(),
        }
    }
}

impl RelayConfig {
    /// Load a TOML configuration file. Missing keys fall back to defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self, RelayError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RelayError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, RelayError> {
        let config: RelayConfig = toml::from_str(raw)
            .map_err(|e| RelayError::Configuration(format!("Invalid relay config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        let origin = url::Url::parse(&self.remote_origin).map_err(|e| {
            RelayError::Configuration(format!("remote_origin {:?}: {}", self.remote_origin, e))
        })?;
        if !matches!(origin.scheme(), "http" | "https") {
            return Err(RelayError::Configuration(format!(
                "remote_origin must be http(s), got {}",
                origin.scheme()
            )));
        }
        if !self.intercept_prefix.starts_with('/') {
            return Err(RelayError::Configuration(format!(
                "intercept_prefix must start with '/', got {:?}",
                self.intercept_prefix
            )));
        }
        if self.project_name_key.is_empty() {
            return Err(RelayError::Configuration(
                "project_name_key must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// The remote origin without a trailing slash, ready for path concatenation.
    pub fn remote_origin_trimmed(&self) -> &str {
        self.remote_origin.trim_end_matches('/')
    }

    /// Origin the embedded frame uses to reach the relay.
    pub fn local_origin(&self) -> String {
        let host = match self.listen_address.as_str() {
            "127.0.0.1" | "0.0.0.0" | "::1" | "::" => "localhost",
            other => other,
        };
        format!("http://{}:{}", host, self.listen_port)
    }
}

/// How the panel's frame reaches the remote form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum EmbedMode {
    /// Frame points straight at the remote origin; no interception.
    DirectEmbed,
    /// Frame points at the local relay.
    #[default]
    Relayed,
}

impl std::str::FromStr for EmbedMode {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "directEmbed" | "direct-embed" | "direct" => Ok(EmbedMode::DirectEmbed),
            "relayed" | "relay" => Ok(EmbedMode::Relayed),
            other => Err(RelayError::Configuration(format!("unknown embed mode {:?}", other))),
        }
    }
}

/// Embedded panel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    pub mode: EmbedMode,
    /// Identity token of the view, used to match a serialised view on revive
    pub view_type: String,
    pub title: String,
    /// Root of the host extension's bundled assets
    pub asset_root: String,
    /// Stylesheet path relative to `asset_root`
    pub stylesheet: String,
    /// Icon path relative to the extension root
    pub icon: String,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            mode: EmbedMode::Relayed,
            view_type: "spring-initializr-iframe".to_string(),
            title: "Spring Initializr".to_string(),
            asset_root: "assets".to_string(),
            stylesheet: "css/vscode-spring-initializr.css".to_string(),
            icon: "images/icon.png".to_string(),
        }
    }
}
