//! Configuration for publish runs.
//!
//! Settings are layered, lowest precedence first:
//!
//! 1. Built-in defaults ([`UploadConfig::default`], [`StorageConfig::default`])
//! 2. `~/.tileputty/config.ini` ([`ConfigFile::load`])
//! 3. Environment variables ([`ConfigFile::apply_env`])
//! 4. Command-line flags (applied by the CLI)
//!
//! # Config file format
//!
//! ```ini
//! [storage]
//! bucket = gfw-tiles
//! endpoint_url = http://localhost:9000
//! region = us-east-1
//! force_path_style = true
//!
//! [upload]
//! workers = 8
//! max_attempts = 10
//! ```

use std::path::{Path, PathBuf};

use ini::Ini;
use thiserror::Error;

use crate::key::KeyStyle;
use crate::upload::RetryPolicy;

/// Environment variable overriding the worker count.
pub const ENV_WORKERS: &str = "TILEPUTTY_WORKERS";

/// Environment variable overriding the storage endpoint.
pub const ENV_ENDPOINT_URL: &str = "TILEPUTTY_ENDPOINT_URL";

/// Environment variable overriding the destination bucket.
pub const ENV_BUCKET: &str = "TILEPUTTY_BUCKET";

/// Default attempts per upload, including the first one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Queue slots per worker between the walker and the pool.
pub const QUEUE_DEPTH_PER_WORKER: usize = 4;

/// Config directory under the home directory.
const CONFIG_DIR: &str = ".tileputty";

/// Config file name.
const CONFIG_FILENAME: &str = "config.ini";

/// Errors that can occur while building configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A setting has an unusable value.
    #[error("invalid {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// The config file exists but could not be read or parsed.
    #[error("failed to load config file {}: {reason}", path.display())]
    FileLoad { path: PathBuf, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Connection settings for the object store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageConfig {
    /// Alternate endpoint (MinIO, localstack, other S3-compatible stores).
    pub endpoint_url: Option<String>,

    /// Region override; the SDK default chain is used when unset.
    pub region: Option<String>,

    /// Use path-style addressing (`endpoint/bucket/key`).
    ///
    /// S3-compatible stores behind a custom endpoint usually need this.
    pub force_path_style: bool,
}

impl StorageConfig {
    /// Set the endpoint URL. Path-style addressing is enabled with it.
    pub fn with_endpoint_url(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = Some(url.into());
        self.force_path_style = true;
        self
    }

    /// Set the region.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Enable or disable path-style addressing.
    pub fn with_force_path_style(mut self, enabled: bool) -> Self {
        self.force_path_style = enabled;
        self
    }
}

/// Settings for the upload worker pool.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadConfig {
    /// Number of concurrent upload workers (minimum 1).
    pub workers: usize,

    /// Retry policy for transient storage failures.
    pub retry: RetryPolicy,

    /// How file names map to the last key segment.
    pub key_style: KeyStyle,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            retry: RetryPolicy::standard(DEFAULT_MAX_ATTEMPTS),
            key_style: KeyStyle::default(),
        }
    }
}

impl UploadConfig {
    /// Set the worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the key style.
    pub fn with_key_style(mut self, key_style: KeyStyle) -> Self {
        self.key_style = key_style;
        self
    }

    /// Capacity of the queue between the walker and the workers.
    pub fn queue_depth(&self) -> usize {
        self.workers.max(1) * QUEUE_DEPTH_PER_WORKER
    }
}

/// Number of workers when none is configured: one per hardware thread.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Settings read from the config file and the environment.
///
/// Every field is optional; unset fields fall back to the defaults of
/// [`UploadConfig`] and [`StorageConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    /// Destination bucket.
    pub bucket: Option<String>,

    /// Object store connection settings.
    pub storage: StorageConfig,

    /// Worker count.
    pub workers: Option<usize>,

    /// Attempts per upload.
    pub max_attempts: Option<u32>,
}

impl ConfigFile {
    /// Default config file location (`~/.tileputty/config.ini`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(CONFIG_DIR).join(CONFIG_FILENAME))
    }

    /// Load the config file from its default location.
    ///
    /// A missing file (or missing home directory) yields empty settings.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load a config file from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::parse(&content).map_err(|e| match e {
            ConfigError::InvalidValue { field, reason } => ConfigError::FileLoad {
                path: path.to_path_buf(),
                reason: format!("invalid {}: {}", field, reason),
            },
            other => other,
        })
    }

    /// Parse config file content.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(content)
            .map_err(|e| ConfigError::invalid("config file", e.to_string()))?;

        let mut config = Self::default();

        if let Some(storage) = ini.section(Some("storage")) {
            config.bucket = non_empty(storage.get("bucket"));
            config.storage.endpoint_url = non_empty(storage.get("endpoint_url"));
            config.storage.region = non_empty(storage.get("region"));
            config.storage.force_path_style = match storage.get("force_path_style") {
                Some(value) => parse_bool("storage.force_path_style", value)?,
                None => config.storage.endpoint_url.is_some(),
            };
        }

        if let Some(upload) = ini.section(Some("upload")) {
            if let Some(value) = upload.get("workers") {
                config.workers = Some(parse_workers("upload.workers", value)?);
            }
            if let Some(value) = upload.get("max_attempts") {
                config.max_attempts = Some(parse_max_attempts("upload.max_attempts", value)?);
            }
        }

        Ok(config)
    }

    /// Apply `TILEPUTTY_*` environment overrides.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Apply environment overrides from an arbitrary variable lookup.
    pub fn apply_env_from<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_WORKERS) {
            self.workers = Some(parse_workers(ENV_WORKERS, &value)?);
        }
        if let Some(url) = non_empty(lookup(ENV_ENDPOINT_URL).as_deref()) {
            self.storage = self.storage.with_endpoint_url(url);
        }
        if let Some(bucket) = non_empty(lookup(ENV_BUCKET).as_deref()) {
            self.bucket = Some(bucket);
        }
        Ok(self)
    }

    /// Upload settings with these values applied over the defaults.
    pub fn upload_config(&self) -> UploadConfig {
        let mut config = UploadConfig::default();
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        if let Some(max_attempts) = self.max_attempts {
            config = config.with_retry(RetryPolicy::standard(max_attempts));
        }
        config
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_workers(field: &str, value: &str) -> Result<usize, ConfigError> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::invalid(
            field,
            format!("'{}' is not a positive integer", value),
        )),
    }
}

fn parse_max_attempts(field: &str, value: &str) -> Result<u32, ConfigError> {
    match value.trim().parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::invalid(
            field,
            format!("'{}' is not a positive integer", value),
        )),
    }
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(
            field,
            format!("'{}' is not a boolean", value),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_upload_config_default() {
        let config = UploadConfig::default();
        assert_eq!(config.workers, default_workers());
        assert_eq!(config.retry.max_attempts(), DEFAULT_MAX_ATTEMPTS);
        assert_eq!(config.key_style, KeyStyle::Preserve);
    }

    #[test]
    fn test_upload_config_builder() {
        let config = UploadConfig::default()
            .with_workers(0)
            .with_retry(RetryPolicy::None)
            .with_key_style(KeyStyle::StripTileExtension);

        assert_eq!(config.workers, 1);
        assert_eq!(config.retry.max_attempts(), 1);
        assert_eq!(config.queue_depth(), QUEUE_DEPTH_PER_WORKER);
    }

    #[test]
    fn test_storage_config_endpoint_enables_path_style() {
        let config = StorageConfig::default().with_endpoint_url("http://localhost:9000");
        assert_eq!(config.endpoint_url.as_deref(), Some("http://localhost:9000"));
        assert!(config.force_path_style);

        let config = config.with_force_path_style(false).with_region("eu-west-1");
        assert!(!config.force_path_style);
        assert_eq!(config.region.as_deref(), Some("eu-west-1"));
    }

    #[test]
    fn test_parse_full_config_file() {
        let config = ConfigFile::parse(
            "[storage]\n\
             bucket = my-tiles\n\
             endpoint_url = http://localhost:9000\n\
             region = us-east-1\n\
             force_path_style = false\n\
             \n\
             [upload]\n\
             workers = 16\n\
             max_attempts = 3\n",
        )
        .unwrap();

        assert_eq!(config.bucket.as_deref(), Some("my-tiles"));
        assert_eq!(config.storage.endpoint_url.as_deref(), Some("http://localhost:9000"));
        assert_eq!(config.storage.region.as_deref(), Some("us-east-1"));
        assert!(!config.storage.force_path_style);
        assert_eq!(config.workers, Some(16));
        assert_eq!(config.max_attempts, Some(3));

        let upload = config.upload_config();
        assert_eq!(upload.workers, 16);
        assert_eq!(upload.retry.max_attempts(), 3);
    }

    #[test]
    fn test_parse_endpoint_defaults_to_path_style() {
        let config = ConfigFile::parse("[storage]\nendpoint_url = http://minio:9000\n").unwrap();
        assert!(config.storage.force_path_style);
    }

    #[test]
    fn test_parse_empty_config_file() {
        let config = ConfigFile::parse("").unwrap();
        assert_eq!(config, ConfigFile::default());
    }

    #[test]
    fn test_parse_rejects_bad_numbers() {
        assert!(ConfigFile::parse("[upload]\nworkers = zero\n").is_err());
        assert!(ConfigFile::parse("[upload]\nworkers = 0\n").is_err());
        assert!(ConfigFile::parse("[upload]\nmax_attempts = -1\n").is_err());
        assert!(ConfigFile::parse("[storage]\nforce_path_style = maybe\n").is_err());
    }

    #[test]
    fn test_load_from_missing_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let result = ConfigFile::load_from(&temp.path().join("config.ini"));
        assert!(matches!(result, Err(ConfigError::FileLoad { .. })));
    }

    #[test]
    fn test_load_from_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("config.ini");
        std::fs::write(&path, "[upload]\nworkers = 2\n").unwrap();
        assert_eq!(ConfigFile::load_from(&path).unwrap().workers, Some(2));

        std::fs::write(&path, "[upload]\nworkers = two\n").unwrap();
        let err = ConfigFile::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("config.ini"));
    }

    #[test]
    fn test_env_overrides_file() {
        let config = ConfigFile::parse("[storage]\nbucket = from-file\n[upload]\nworkers = 2\n")
            .unwrap()
            .apply_env_from(env(&[
                (ENV_WORKERS, "6"),
                (ENV_ENDPOINT_URL, "http://localhost:4566"),
                (ENV_BUCKET, "from-env"),
            ]))
            .unwrap();

        assert_eq!(config.workers, Some(6));
        assert_eq!(config.bucket.as_deref(), Some("from-env"));
        assert_eq!(config.storage.endpoint_url.as_deref(), Some("http://localhost:4566"));
        assert!(config.storage.force_path_style);
    }

    #[test]
    fn test_env_empty_values_are_ignored() {
        let config = ConfigFile::default()
            .apply_env_from(env(&[(ENV_ENDPOINT_URL, ""), (ENV_BUCKET, "  ")]))
            .unwrap();
        assert_eq!(config, ConfigFile::default());
    }

    #[test]
    fn test_env_invalid_workers() {
        let err = ConfigFile::default()
            .apply_env_from(env(&[(ENV_WORKERS, "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_WORKERS));
    }
}
