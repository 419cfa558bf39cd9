//! Configuration file parsing and management.
//!
//! This module handles loading configuration from TOML files and `GB_*`
//! environment variables, and merging configurations with proper precedence
//! rules. Applying the merged values to a `RunConfig` is the caller's job.

use crate::error::GeobatchError;
use crate::types::{PayloadFormat, MAX_CONCURRENCY};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Configuration loaded from TOML files.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FileConfig {
    /// Paths and run shape
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<RunSection>,

    /// Geocoding endpoint settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderSection>,
}

/// `[run]` table.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RunSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_in: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_out: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub corpus: Option<PathBuf>,

    /// Window width (1-100)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,

    /// Windows between checkpoints
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_every: Option<usize>,

    /// Per-request timeout (as string, e.g., "5s", "2m")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

/// `[provider]` table.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ProviderSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_param: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// "google" or "arcgis"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// Configuration discovery and loading functionality.
pub struct ConfigManager;

impl ConfigManager {
    pub fn new() -> Self {
        Self
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns `FileError` if the file is missing or unreadable, and
    /// `ConfigError` if it does not parse or fails validation.
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<FileConfig, GeobatchError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(GeobatchError::file_error(
                path.to_string_lossy(),
                "Configuration file not found",
            ));
        }

        let content = fs::read_to_string(path).map_err(|e| {
            GeobatchError::file_error(
                path.to_string_lossy(),
                format!("Failed to read configuration file: {}", e),
            )
        })?;

        let config: FileConfig = toml::from_str(&content).map_err(|e| {
            GeobatchError::config(format!("Failed to parse TOML configuration: {}", e))
        })?;

        self.validate_config(&config)?;

        Ok(config)
    }

    /// Discover and load configuration files in precedence order.
    ///
    /// XDG config < home config < local config; later files win per field.
    pub fn discover_and_load(&self) -> Result<FileConfig, GeobatchError> {
        let mut merged_config = FileConfig::default();
        let candidates = [
            self.get_xdg_config_path(),
            self.get_global_config_path(),
            self.get_local_config_path(),
        ];

        for path in candidates.into_iter().flatten() {
            match self.load_file(&path) {
                Ok(config) => {
                    info!(path = %path.display(), "loaded config file");
                    merged_config = self.merge_configs(merged_config, config);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "ignoring config file"),
            }
        }

        Ok(merged_config)
    }

    fn get_local_config_path(&self) -> Option<PathBuf> {
        ["./geobatch.toml", "./.geobatch.toml"]
            .iter()
            .map(Path::new)
            .find(|path| path.exists())
            .map(Path::to_path_buf)
    }

    fn get_global_config_path(&self) -> Option<PathBuf> {
        let home = env::var_os("HOME")?;
        [".geobatch.toml", "geobatch.toml"]
            .iter()
            .map(|candidate| Path::new(&home).join(candidate))
            .find(|path| path.exists())
    }

    /// Follows the XDG Base Directory Specification.
    fn get_xdg_config_path(&self) -> Option<PathBuf> {
        let config_dir = env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| env::var_os("HOME").map(|home| Path::new(&home).join(".config")))?;

        let path = config_dir.join("geobatch").join("config.toml");
        path.exists().then_some(path)
    }

    /// Merge two configurations; values from `higher` win field by field.
    pub fn merge_configs(&self, lower: FileConfig, higher: FileConfig) -> FileConfig {
        FileConfig {
            run: match (lower.run, higher.run) {
                (Some(lower_run), Some(higher_run)) => Some(RunSection {
                    store_in: higher_run.store_in.or(lower_run.store_in),
                    store_out: higher_run.store_out.or(lower_run.store_out),
                    corpus: higher_run.corpus.or(lower_run.corpus),
                    concurrency: higher_run.concurrency.or(lower_run.concurrency),
                    checkpoint_every: higher_run.checkpoint_every.or(lower_run.checkpoint_every),
                    timeout: higher_run.timeout.or(lower_run.timeout),
                }),
                (lower_run, higher_run) => higher_run.or(lower_run),
            },
            provider: match (lower.provider, higher.provider) {
                (Some(lower_provider), Some(higher_provider)) => Some(ProviderSection {
                    base_url: higher_provider.base_url.or(lower_provider.base_url),
                    query_param: higher_provider.query_param.or(lower_provider.query_param),
                    api_key: higher_provider.api_key.or(lower_provider.api_key),
                    format: higher_provider.format.or(lower_provider.format),
                }),
                (lower_provider, higher_provider) => higher_provider.or(lower_provider),
            },
        }
    }

    /// Validate a configuration for common issues.
    fn validate_config(&self, config: &FileConfig) -> Result<(), GeobatchError> {
        if let Some(run) = &config.run {
            if let Some(concurrency) = run.concurrency {
                if concurrency == 0 || concurrency > MAX_CONCURRENCY {
                    return Err(GeobatchError::config(format!(
                        "Concurrency must be between 1 and {}",
                        MAX_CONCURRENCY
                    )));
                }
            }

            if run.checkpoint_every == Some(0) {
                return Err(GeobatchError::config(
                    "checkpoint_every must be at least 1",
                ));
            }

            if let Some(timeout_str) = &run.timeout {
                if parse_timeout_string(timeout_str).is_none() {
                    return Err(GeobatchError::config(format!(
                        "Invalid timeout format '{}'. Use format like '5s', '30s', '2m'",
                        timeout_str
                    )));
                }
            }
        }

        if let Some(provider) = &config.provider {
            if let Some(base_url) = &provider.base_url {
                if !is_http_url(base_url) {
                    return Err(GeobatchError::config(format!(
                        "Provider base_url '{}' must start with http:// or https://",
                        base_url
                    )));
                }
            }

            if let Some(format) = &provider.format {
                if PayloadFormat::parse(format).is_none() {
                    return Err(GeobatchError::config(format!(
                        "Unknown provider format '{}'. Use 'google' or 'arcgis'",
                        format
                    )));
                }
            }

            if provider.query_param.as_deref().is_some_and(|p| p.trim().is_empty()) {
                return Err(GeobatchError::config("query_param cannot be empty"));
            }
        }

        Ok(())
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Environment variable configuration that mirrors CLI options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvConfig {
    pub store_in: Option<PathBuf>,
    pub store_out: Option<PathBuf>,
    pub corpus: Option<PathBuf>,
    pub base_url: Option<String>,
    pub query_param: Option<String>,
    pub api_key: Option<String>,
    pub format: Option<PayloadFormat>,
    pub concurrency: Option<usize>,
    pub checkpoint_every: Option<usize>,
    pub timeout: Option<String>,
    pub config: Option<PathBuf>,
}

/// Load configuration from `GB_*` environment variables.
///
/// Invalid values are logged as warnings and ignored.
pub fn load_env_config() -> EnvConfig {
    load_env_config_from(|name| env::var(name).ok())
}

/// Same as [`load_env_config`], reading variables through `lookup`.
pub fn load_env_config_from<F>(lookup: F) -> EnvConfig
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
    let mut env_config = EnvConfig {
        store_in: non_empty("GB_STORE_IN").map(PathBuf::from),
        store_out: non_empty("GB_STORE_OUT").map(PathBuf::from),
        corpus: non_empty("GB_CORPUS").map(PathBuf::from),
        api_key: non_empty("GB_API_KEY"),
        query_param: non_empty("GB_QUERY_PARAM"),
        config: non_empty("GB_CONFIG").map(PathBuf::from),
        ..Default::default()
    };

    if let Some(url) = non_empty("GB_URL") {
        if is_http_url(&url) {
            env_config.base_url = Some(url);
        } else {
            warn!("Invalid GB_URL='{}', must start with http:// or https://", url);
        }
    }

    if let Some(val) = non_empty("GB_FORMAT") {
        match PayloadFormat::parse(&val) {
            Some(format) => env_config.format = Some(format),
            None => warn!("Invalid GB_FORMAT='{}', use google or arcgis", val),
        }
    }

    if let Some(val) = non_empty("GB_CONCURRENCY") {
        match val.trim().parse::<usize>() {
            Ok(concurrency) if (1..=MAX_CONCURRENCY).contains(&concurrency) => {
                env_config.concurrency = Some(concurrency);
            }
            _ => warn!("Invalid GB_CONCURRENCY='{}', must be 1-{}", val, MAX_CONCURRENCY),
        }
    }

    if let Some(val) = non_empty("GB_CHECKPOINT_EVERY") {
        match val.trim().parse::<usize>() {
            Ok(every) if every > 0 => env_config.checkpoint_every = Some(every),
            _ => warn!("Invalid GB_CHECKPOINT_EVERY='{}', must be at least 1", val),
        }
    }

    if let Some(timeout_str) = non_empty("GB_TIMEOUT") {
        if parse_timeout_string(&timeout_str).is_some() {
            env_config.timeout = Some(timeout_str);
        } else {
            warn!(
                "Invalid GB_TIMEOUT='{}', use format like '5s', '30s', '2m'",
                timeout_str
            );
        }
    }

    env_config
}

/// Parse a timeout string like "5s", "30s", "2m", "500ms" into milliseconds.
///
/// A bare number is taken as seconds. Zero is rejected.
pub fn parse_timeout_string(timeout_str: &str) -> Option<u64> {
    let timeout_str = timeout_str.trim().to_lowercase();

    let millis = if let Some(ms) = timeout_str.strip_suffix("ms") {
        ms.parse::<u64>().ok()
    } else if let Some(s) = timeout_str.strip_suffix('s') {
        s.parse::<u64>().ok().map(|s| s * 1000)
    } else if let Some(m) = timeout_str.strip_suffix('m') {
        m.parse::<u64>().ok().map(|m| m * 60_000)
    } else {
        timeout_str.parse::<u64>().ok().map(|s| s * 1000)
    };

    millis.filter(|&ms| ms > 0)
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}
