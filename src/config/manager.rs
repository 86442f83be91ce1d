use crate::config::AppConfig;
use crate::utils::errors::{McpError, McpResult};
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use schemars::schema_for;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;
use validator::Validate;

/// Environment prefix for overrides, e.g. `SUPERMCP_SERVICE__SHUTDOWN_GRACE_SECONDS=2`
pub const ENV_PREFIX: &str = "SUPERMCP_";

/// Supported config file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
    Yaml,
}

impl ConfigFormat {
    /// Detect format from file extension, TOML when unknown
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => ConfigFormat::Json,
            Some("yml") | Some("yaml") => ConfigFormat::Yaml,
            _ => ConfigFormat::Toml,
        }
    }
}

/// Loads and checks the client configuration file
pub struct ConfigManager;

impl ConfigManager {
    /// Default config location under the platform config directory
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("supermcp")
            .join("clients.toml")
    }

    /// Layer defaults, the file and `SUPERMCP_*` environment overrides
    pub fn load(path: impl AsRef<str>) -> McpResult<AppConfig> {
        let expanded = shellexpand::tilde(path.as_ref()).to_string();
        let path = PathBuf::from(expanded);

        if !path.exists() {
            return Err(McpError::ConfigError(format!(
                "configuration file does not exist: {}",
                path.display()
            )));
        }

        let format = ConfigFormat::from_path(&path);
        debug!("Loading {:?} config from {}", format, path.display());

        let figment = Figment::from(Serialized::defaults(AppConfig::default()));
        let figment = match format {
            ConfigFormat::Toml => figment.merge(Toml::file(&path)),
            ConfigFormat::Json => figment.merge(Json::file(&path)),
            ConfigFormat::Yaml => figment.merge(Yaml::file(&path)),
        };

        let config: AppConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Reject duplicate ids and invalid client definitions
    pub fn validate(config: &AppConfig) -> McpResult<()> {
        let mut seen = HashSet::new();
        for entry in &config.clients {
            if entry.id.trim().is_empty() {
                return Err(McpError::InvalidConfig("client id must not be empty".to_string()));
            }
            if !seen.insert(entry.id.as_str()) {
                return Err(McpError::DuplicateId(entry.id.clone()));
            }
            entry.config.validate().map_err(|e| {
                McpError::InvalidConfig(format!("client '{}': {}", entry.id, e))
            })?;
        }
        Ok(())
    }

    /// JSON schema of the configuration file
    pub fn schema() -> McpResult<String> {
        let schema = schema_for!(AppConfig);
        Ok(serde_json::to_string_pretty(&schema)?)
    }

    /// Example configuration rendered as TOML
    pub fn example_toml() -> McpResult<String> {
        toml::to_string_pretty(&AppConfig::example())
            .map_err(|e| McpError::ConfigError(e.to_string()))
    }
}
