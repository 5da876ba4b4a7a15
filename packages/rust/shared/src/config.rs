//! Application configuration for textsift.
//!
//! User config lives at `~/.textsift/textsift.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TextsiftError};
use crate::types::Lang;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "textsift.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".textsift";

// ---------------------------------------------------------------------------
// Config structs (matching textsift.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Pipeline run defaults.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Search index connection.
    #[serde(default)]
    pub elastic: ElasticConfig,

    /// Dashboard service connection.
    #[serde(default)]
    pub kibana: KibanaConfig,
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Rows per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Render a progress bar while processing.
    #[serde(default = "default_true")]
    pub show_progress: bool,

    /// Language of the text columns (code or analyzer name).
    #[serde(default = "default_lang")]
    pub lang: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            show_progress: true,
            lang: default_lang(),
        }
    }
}

impl PipelineConfig {
    /// The configured language, parsed.
    pub fn lang(&self) -> Result<Lang> {
        self.lang.parse()
    }
}

fn default_batch_size() -> usize {
    1000
}
fn default_true() -> bool {
    true
}
fn default_lang() -> String {
    "english".into()
}

/// `[elastic]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_elastic_port")]
    pub port: u16,

    /// `http` or `https`.
    #[serde(default = "default_protocol")]
    pub protocol: String,

    /// Verify TLS certificates when `protocol` is `https`.
    #[serde(default = "default_true")]
    pub verify_certs: bool,

    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ElasticConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_elastic_port(),
            protocol: default_protocol(),
            verify_certs: true,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ElasticConfig {
    /// Base URL, e.g. `http://localhost:9200`.
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }
}

fn default_host() -> String {
    "localhost".into()
}
fn default_elastic_port() -> u16 {
    9200
}
fn default_protocol() -> String {
    "http".into()
}
fn default_timeout_secs() -> u64 {
    30
}

/// `[kibana]` section. Unset host/protocol fall back to the elastic ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KibanaConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default = "default_kibana_port")]
    pub port: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

impl Default for KibanaConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: default_kibana_port(),
            protocol: None,
        }
    }
}

fn default_kibana_port() -> u16 {
    5601
}

impl AppConfig {
    /// Base URL of the dashboard service after applying fallbacks.
    pub fn kibana_url(&self) -> String {
        let protocol = self
            .kibana
            .protocol
            .as_deref()
            .unwrap_or(&self.elastic.protocol);
        let host = self.kibana.host.as_deref().unwrap_or(&self.elastic.host);
        format!("{protocol}://{host}:{}", self.kibana.port)
    }

    /// Reject values no run could work with.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.batch_size == 0 {
            return Err(TextsiftError::config("pipeline.batch_size must be positive"));
        }
        if !matches!(self.elastic.protocol.as_str(), "http" | "https") {
            return Err(TextsiftError::config(format!(
                "elastic.protocol must be 'http' or 'https', got '{}'",
                self.elastic.protocol
            )));
        }
        self.pipeline.lang()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.textsift/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| TextsiftError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.textsift/textsift.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| TextsiftError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        TextsiftError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    config.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| TextsiftError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| TextsiftError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| TextsiftError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("batch_size"));
        assert!(toml_str.contains("9200"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.pipeline.batch_size, 1000);
        assert_eq!(parsed.kibana.port, 5601);
        assert!(parsed.kibana.host.is_none());
    }

    #[test]
    fn partial_config_uses_defaults() {
        let toml_str = r#"
[elastic]
host = "search.internal"
protocol = "https"

[kibana]
port = 8601
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.elastic.url(), "https://search.internal:9200");
        assert_eq!(config.kibana_url(), "https://search.internal:8601");
        assert!(config.pipeline.show_progress);
        config.validate().expect("valid");
    }

    #[test]
    fn validation_rejects_zero_batch() {
        let mut config = AppConfig::default();
        config.pipeline.batch_size = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn validation_rejects_unknown_language() {
        let mut config = AppConfig::default();
        config.pipeline.lang = "latin".into();
        assert!(config.validate().is_err());
        config.pipeline.lang = "fr".into();
        assert_eq!(config.pipeline.lang().unwrap(), Lang::Fr);
    }
}
