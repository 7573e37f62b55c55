//! Configuration management for Mnemo.
//!
//! Configuration is merged from, in increasing precedence:
//! - Built-in defaults
//! - The YAML config file (`<data_root>/config.yaml` or `MNEMO_CONFIG`)
//! - Environment variables
//! - Programmatic overrides (`with_overrides`)
//!
//! Everything Mnemo persists lives under the data root, one folder per library.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};
use crate::logging::LogFormat;

/// Default Redis endpoint used by the remote vector backend.
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Root folder holding one sub-folder per library
    pub data_root: PathBuf,

    /// Optional config file path
    pub config_file: Option<PathBuf>,

    /// Log level / filter override
    pub log_level: Option<String>,

    /// Log output format
    pub log_format: LogFormat,

    /// Disable colored output
    pub no_color: bool,

    /// Redis connection URL for the remote vector backend
    pub redis_url: String,
}

/// Full configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ConfigFile {
    data: Option<DataConfig>,
    logging: Option<LoggingConfig>,
    redis: Option<RedisConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DataConfig {
    root: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LoggingConfig {
    level: Option<String>,
    color: Option<bool>,
    format: Option<LogFormat>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RedisConfig {
    url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_root: std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(".mnemo"),
            config_file: None,
            log_level: None,
            log_format: LogFormat::Pretty,
            no_color: false,
            redis_url: DEFAULT_REDIS_URL.to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, the YAML file and environment variables.
    ///
    /// Environment variables:
    /// - `MNEMO_DATA_DIR`: Override the data root
    /// - `MNEMO_CONFIG`: Path to config file
    /// - `MNEMO_REDIS_URL`: Redis connection URL
    /// - `MNEMO_LOG_FORMAT`: `pretty` or `json`
    /// - `RUST_LOG`: Log level
    /// - `NO_COLOR`: Disable colored output
    pub fn load() -> AppResult<Self> {
        let mut config = Self::default();

        if let Ok(root) = std::env::var("MNEMO_DATA_DIR") {
            config.data_root = PathBuf::from(root);
        }

        if let Ok(config_file) = std::env::var("MNEMO_CONFIG") {
            config.config_file = Some(PathBuf::from(config_file));
        }

        let config_path = config
            .config_file
            .clone()
            .unwrap_or_else(|| config.data_root.join("config.yaml"));

        if config_path.exists() {
            config = config.merge_yaml(&config_path)?;
        }

        // Environment variables override YAML config
        if let Ok(url) = std::env::var("MNEMO_REDIS_URL") {
            config.redis_url = url;
        }

        if let Ok(format) = std::env::var("MNEMO_LOG_FORMAT") {
            config.log_format = LogFormat::parse(&format)?;
        }

        if let Ok(level) = std::env::var("RUST_LOG") {
            config.log_level = Some(level);
        }

        if std::env::var("NO_COLOR").is_ok() {
            config.no_color = true;
        }

        Ok(config)
    }

    /// Merge a YAML configuration file into a copy of this config.
    fn merge_yaml(&self, path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config_file: ConfigFile = serde_yaml::from_str(&contents).map_err(|e| {
            AppError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })?;

        let mut result = self.clone();

        if let Some(root) = config_file.data.and_then(|d| d.root) {
            result.data_root = PathBuf::from(root);
        }

        if let Some(logging) = config_file.logging {
            if let Some(level) = logging.level {
                result.log_level = Some(level);
            }
            if let Some(color) = logging.color {
                result.no_color = !color;
            }
            if let Some(format) = logging.format {
                result.log_format = format;
            }
        }

        if let Some(url) = config_file.redis.and_then(|r| r.url) {
            result.redis_url = url;
        }

        Ok(result)
    }

    /// Apply programmatic overrides; `Some` values win over loaded settings.
    pub fn with_overrides(
        mut self,
        data_root: Option<PathBuf>,
        log_level: Option<String>,
        redis_url: Option<String>,
        no_color: bool,
    ) -> Self {
        if let Some(data_root) = data_root {
            self.data_root = data_root;
        }

        if let Some(log_level) = log_level {
            self.log_level = Some(log_level);
        }

        if let Some(redis_url) = redis_url {
            self.redis_url = redis_url;
        }

        if no_color {
            self.no_color = true;
        }

        self
    }

    /// Data folder of a single library.
    pub fn library_dir(&self, library: &str) -> PathBuf {
        self.data_root.join(library)
    }

    /// Ensure the data root exists.
    pub fn ensure_data_root(&self) -> AppResult<()> {
        if !self.data_root.exists() {
            std::fs::create_dir_all(&self.data_root).map_err(|e| {
                AppError::Config(format!(
                    "Failed to create data root {:?}: {}",
                    self.data_root, e
                ))
            })?;
        }
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> AppResult<()> {
        if self.data_root.as_os_str().is_empty() {
            return Err(AppError::Config("Data root must not be empty".to_string()));
        }

        if !self.redis_url.starts_with("redis://")
            && !self.redis_url.starts_with("rediss://")
            && !self.redis_url.starts_with("unix://")
        {
            return Err(AppError::Config(format!(
                "Unsupported Redis URL scheme: {}",
                self.redis_url
            )));
        }

        Ok(())
    }
}
