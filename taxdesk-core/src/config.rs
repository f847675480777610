//! Client configuration

use crate::error::{ErrorContext, TaxdeskError, TaxdeskResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const API_URL_ENV: &str = "TAXDESK_API_URL";
pub const STATE_DIR_ENV: &str = "TAXDESK_STATE_DIR";

/// Top-level client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub api: ApiConfig,
    pub session: SessionConfig,
    pub storage: StorageConfig,
}

/// Remote API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL every request path is joined onto
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// User agent string
    pub user_agent: String,
}

/// Session handling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Application route users are sent to when a session ends
    pub login_route: String,
    /// Login route for the client portal
    pub portal_login_route: String,
}

/// Where persisted client state lives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the serialized store blobs ("~" is expanded)
    pub state_dir: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                base_url: "http://localhost:8000/api".to_string(),
                timeout_seconds: 30,
                user_agent: format!("taxdesk/{}", env!("CARGO_PKG_VERSION")),
            },
            session: SessionConfig {
                login_route: "/login".to_string(),
                portal_login_route: "/portal/login".to_string(),
            },
            storage: StorageConfig {
                state_dir: "~/.taxdesk/state".to_string(),
            },
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> TaxdeskResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| TaxdeskError::Config {
            message: format!("Failed to read config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("read_file")
                .with_suggestion("Check if the config file exists and is readable"),
        })?;

        toml::from_str(&content).map_err(|e| TaxdeskError::Config {
            message: format!("Failed to parse config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("parse_toml")
                .with_suggestion("Check TOML syntax in config file"),
        })
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> TaxdeskResult<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).map_err(|e| TaxdeskError::Config {
            message: format!("Failed to serialize config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config").with_operation("serialize_toml"),
        })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content).map_err(|e| TaxdeskError::Config {
            message: format!("Failed to write config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("write_file")
                .with_suggestion("Check if the directory exists and is writable"),
        })
    }

    /// Override file values with `TAXDESK_API_URL` / `TAXDESK_STATE_DIR`
    pub fn apply_env_overrides(&mut self) {
        if let Ok(base_url) = std::env::var(API_URL_ENV) {
            if !base_url.trim().is_empty() {
                self.api.base_url = base_url;
            }
        }
        if let Ok(state_dir) = std::env::var(STATE_DIR_ENV) {
            if !state_dir.trim().is_empty() {
                self.storage.state_dir = state_dir;
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> TaxdeskResult<()> {
        let base_url = url::Url::parse(&self.api.base_url).map_err(|e| TaxdeskError::Config {
            message: format!("Invalid api.base_url '{}': {}", self.api.base_url, e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("validate")
                .with_suggestion("Use an absolute URL such as https://crm.example.com/api"),
        })?;

        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(invalid("api.base_url must use http or https"));
        }

        if self.api.timeout_seconds == 0 {
            return Err(invalid("api.timeout_seconds must be greater than 0"));
        }

        for route in [&self.session.login_route, &self.session.portal_login_route] {
            if !route.starts_with('/') {
                return Err(invalid("session login routes must start with '/'"));
            }
        }

        if self.storage.state_dir.trim().is_empty() {
            return Err(invalid("storage.state_dir must not be empty"));
        }

        Ok(())
    }

    /// State directory with a leading "~" expanded to the home directory
    pub fn state_dir(&self) -> PathBuf {
        expand_home(&self.storage.state_dir)
    }

    /// Default config file locations, in lookup order
    pub fn default_locations() -> Vec<PathBuf> {
        [
            dirs::config_dir().map(|d| d.join("taxdesk").join("config.toml")),
            dirs::home_dir().map(|d| d.join(".taxdesk").join("config.toml")),
            Some(PathBuf::from("taxdesk.toml")),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

fn invalid(message: &str) -> TaxdeskError {
    TaxdeskError::Config {
        message: message.to_string(),
        source: None,
        context: ErrorContext::new("config").with_operation("validate"),
    }
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix('~'), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest.trim_start_matches(['/', '\\'])),
        _ => PathBuf::from(path),
    }
}
