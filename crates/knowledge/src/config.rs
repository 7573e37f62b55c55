//! Per-library vector configuration.
//!
//! Stored as `vector.yaml` inside the library data folder. Missing keys fall
//! back to their defaults, so an absent file is the same as an empty one.

use crate::types::{CLUSTERING_THRESHOLD, DEFAULT_INDEX_FILENAME, DEFAULT_PROBE_COUNT};
use mnemo_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// File name of the library config inside its data folder.
pub const CONFIG_FILENAME: &str = "vector.yaml";

/// File name of the scan record database inside a library data folder.
pub const TRACKER_FILENAME: &str = "scan_records.sqlite";

/// File name of the scan lock inside a library data folder.
pub const LOCK_FILENAME: &str = ".scan.lock";

/// Default number of pending remote writes before a pipeline flushes.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Vector settings for one library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Index file name inside the data folder
    pub index_filename: String,

    /// Accept an identity map whose size disagrees with the index on load
    pub lenient_load: bool,

    /// Clusters scanned per query on a clustered index
    pub probe_count: usize,

    /// Corpus size above which ingestion trains a clustered index
    pub clustering_threshold: usize,

    /// Scale embeddings to unit length before indexing and querying
    pub normalize: bool,

    /// Remote backend settings; absent means the local index is used
    pub remote: Option<RemoteConfig>,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            index_filename: DEFAULT_INDEX_FILENAME.to_string(),
            lenient_load: false,
            probe_count: DEFAULT_PROBE_COUNT,
            clustering_threshold: CLUSTERING_THRESHOLD,
            normalize: true,
            remote: None,
        }
    }
}

/// Connection settings for the remote vector backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub url: String,

    /// Key prefix isolating this library inside the shared store
    pub namespace: String,

    pub index_name: String,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

impl LibraryConfig {
    /// Check value ranges.
    pub fn validate(&self) -> AppResult<()> {
        if self.index_filename.trim().is_empty() {
            return Err(AppError::Config("Index file name must not be empty".to_string()));
        }
        if self.probe_count == 0 {
            return Err(AppError::Config("Probe count must be at least 1".to_string()));
        }
        if let Some(remote) = &self.remote {
            if remote.namespace.is_empty() || remote.index_name.is_empty() {
                return Err(AppError::Config(
                    "Remote namespace and index name must not be empty".to_string(),
                ));
            }
            if remote.batch_size == 0 {
                return Err(AppError::Config("Remote batch size must be at least 1".to_string()));
            }
        }
        Ok(())
    }
}

/// Load a library's vector configuration, or defaults if none is saved.
pub fn load_config(data_folder: &Path) -> AppResult<LibraryConfig> {
    let config_path = get_config_path(data_folder);

    if !config_path.exists() {
        tracing::debug!("No vector config at {:?}, using defaults", config_path);
        return Ok(LibraryConfig::default());
    }

    let content = fs::read_to_string(&config_path).map_err(|e| {
        AppError::Config(format!("Failed to read config at {:?}: {}", config_path, e))
    })?;

    let config: LibraryConfig = serde_yaml::from_str(&content).map_err(|e| {
        AppError::Config(format!("Failed to parse config at {:?}: {}", config_path, e))
    })?;
    config.validate()?;

    tracing::debug!("Loaded vector config from {:?}", config_path);
    Ok(config)
}

/// Save a library's vector configuration.
pub fn save_config(data_folder: &Path, config: &LibraryConfig) -> AppResult<()> {
    config.validate()?;

    fs::create_dir_all(data_folder).map_err(|e| {
        AppError::Config(format!("Failed to create data folder {:?}: {}", data_folder, e))
    })?;

    let config_path = get_config_path(data_folder);
    let yaml = serde_yaml::to_string(config)?;
    fs::write(&config_path, yaml).map_err(|e| {
        AppError::Config(format!("Failed to write config to {:?}: {}", config_path, e))
    })?;

    tracing::debug!("Saved vector config to {:?}", config_path);
    Ok(())
}

pub fn get_config_path(data_folder: &Path) -> PathBuf {
    data_folder.join(CONFIG_FILENAME)
}

pub fn get_index_path(data_folder: &Path, config: &LibraryConfig) -> PathBuf {
    data_folder.join(&config.index_filename)
}

pub fn get_tracker_path(data_folder: &Path) -> PathBuf {
    data_folder.join(TRACKER_FILENAME)
}

pub fn get_lock_path(data_folder: &Path) -> PathBuf {
    data_folder.join(LOCK_FILENAME)
}
