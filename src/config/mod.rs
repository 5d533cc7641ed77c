//! Configuration module for Tus Uploadr
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation. Every section is optional;
//! command line flags override what the file sets.
//!
//! ```yaml
//! endpoint: "${TUS_ENDPOINT:-http://localhost:1080/files/}"
//! headers:
//!   Authorization: "Bearer ${TUS_TOKEN}"
//! metadata:
//!   filetype: video/mp4
//! upload:
//!   chunk_size: 4194304
//!   retries: 3
//!   retry_delay_ms: 1000
//! transport:
//!   timeout_seconds: 300
//! storage:
//!   path: ".tus-uploadr/urls.json"
//! ```

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::transport::HttpTransportConfig;
use crate::upload::UploadOptions;

mod loader;

pub use loader::ConfigLoader;

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// ```ignore
/// std::env::set_var("MY_VAR", "value");
/// assert_eq!(expand_env_vars("prefix-${MY_VAR}-suffix"), "prefix-value-suffix");
/// assert_eq!(expand_env_vars("${MISSING:-default}"), "default");
/// ```
pub(crate) fn expand_env_vars(s: &str) -> String {
    let re = match regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}") {
        Ok(re) => re,
        Err(_) => return s.to_string(),
    };
    let mut last_match = 0;
    let mut result = String::with_capacity(s.len());

    for cap in re.captures_iter(s) {
        let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };

        result.push_str(&s[last_match..full_match.start()]);

        let value = match std::env::var(var_name.as_str()) {
            Ok(val) => val,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                // No env var and no default. Keep the original placeholder.
                None => full_match.as_str().to_string(),
            },
        };
        result.push_str(&value);

        last_match = full_match.end();
    }

    result.push_str(&s[last_match..]);
    result
}

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Creation endpoint
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Extra headers sent with every request
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Sent as `Upload-Metadata` on creation
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(endpoint) = &self.endpoint {
            self.parse_endpoint(endpoint)?;
        }

        if self.upload.chunk_size == 0 {
            return Err(ConfigError::ValidationError(
                "upload.chunk_size must be greater than zero".into(),
            ));
        }

        self.header_map()?;

        if self.upload.store_url && self.storage.path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "storage.path cannot be empty when upload.store_url is enabled".into(),
            ));
        }

        Ok(())
    }

    fn parse_endpoint(&self, endpoint: &str) -> Result<Url, ConfigError> {
        if !is_valid_http_url(endpoint) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid endpoint '{}': must start with http:// or https://",
                endpoint
            )));
        }
        Url::parse(endpoint).map_err(|e| {
            ConfigError::ValidationError(format!("Invalid endpoint '{}': {}", endpoint, e))
        })
    }

    /// Parsed creation endpoint, if one is configured
    pub fn endpoint_url(&self) -> Result<Option<Url>, ConfigError> {
        self.endpoint
            .as_deref()
            .map(|endpoint| self.parse_endpoint(endpoint))
            .transpose()
    }

    fn header_map(&self) -> Result<HeaderMap, ConfigError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                ConfigError::ValidationError(format!("Invalid header name '{}'", name))
            })?;
            let value = HeaderValue::from_str(value).map_err(|_| {
                ConfigError::ValidationError(format!("Invalid value for header '{}'", name))
            })?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    /// Session options described by this configuration
    pub fn upload_options(&self) -> Result<UploadOptions, ConfigError> {
        let mut options = UploadOptions::default()
            .chunk_size(self.upload.chunk_size)
            .retries(self.upload.retries)
            .retry_delay(Duration::from_millis(self.upload.retry_delay_ms))
            .upload_checksum(self.upload.upload_checksum)
            .headers(self.header_map()?);
        for (key, value) in &self.metadata {
            options = options.metadata(key, value);
        }
        Ok(options)
    }

    /// Settings for the HTTP transport
    pub fn transport_config(&self) -> HttpTransportConfig {
        HttpTransportConfig {
            timeout: self.transport.timeout_seconds.map(Duration::from_secs),
            connect_timeout: self.transport.connect_timeout_seconds.map(Duration::from_secs),
        }
    }
}

/// Chunking and retry behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub upload_checksum: bool,
    /// Remember upload URLs so interrupted uploads resume on the next run
    #[serde(default = "default_store_url")]
    pub store_url: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            retries: 0,
            retry_delay_ms: default_retry_delay_ms(),
            upload_checksum: false,
            store_url: default_store_url(),
        }
    }
}

fn default_chunk_size() -> usize {
    crate::upload::DEFAULT_CHUNK_SIZE
}

fn default_retry_delay_ms() -> u64 {
    crate::upload::DEFAULT_RETRY_DELAY.as_millis() as u64
}

fn default_store_url() -> bool {
    true
}

/// HTTP client timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: Option<u64>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: None,
            connect_timeout_seconds: default_connect_timeout(),
        }
    }
}

fn default_connect_timeout() -> Option<u64> {
    Some(10)
}

/// Where upload URLs are remembered between runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

fn default_storage_path() -> PathBuf {
    PathBuf::from(".tus-uploadr/urls.json")
}
