//! Vector index management for Mnemo libraries.
//!
//! Each library owns one vector store: a flat or clustered index plus the
//! map from index handles to document UUIDs, persisted as a single file in
//! the library data folder. A Redis-backed store offers the same contract
//! through [`VectorIndex`]. Ingestion, scan bookkeeping and the per-library
//! scan lock sit on top.

pub mod codec;
pub mod config;
pub mod embeddings;
pub mod engine;
pub mod identity;
pub mod ingest;
pub mod lock;
pub mod progress;
pub mod remote;
pub mod store;
pub mod tracker;
pub mod types;
pub mod vector_index;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use config::{LibraryConfig, RemoteConfig};
pub use embeddings::{EmbeddingProvider, MockProvider};
pub use identity::IdentityMap;
pub use ingest::{ingest, ingest_tracked, CancelFlag, IngestContext, IngestItem, IngestOutcome};
pub use lock::ScanLock;
pub use progress::{ProgressEvent, ProgressReporter};
pub use remote::{RedisSearchClient, RemoteVectorStore, SearchClient};
pub use store::{StoreOptions, VectorStore};
pub use tracker::{RecordStatus, ScanRecordTracker, UnfinishedMarker};
pub use types::{InitOptions, LibraryStats, QueryHit, Topology, VectorHandle, NO_MATCH};
pub use vector_index::VectorIndex;

use mnemo_core::{AppConfig, AppResult};

/// Open the vector backend configured for `library`.
///
/// A library whose config has a `remote` section is served by Redis; an
/// empty remote URL falls back to the application-wide one. Otherwise the
/// local index file is opened (and loaded, if present).
pub fn open_backend(app: &AppConfig, library: &str) -> AppResult<Box<dyn VectorIndex>> {
    let data_folder = app.library_dir(library);
    let config = config::load_config(&data_folder)?;

    match &config.remote {
        Some(remote) => {
            let mut remote = remote.clone();
            if remote.url.is_empty() {
                remote.url = app.redis_url.clone();
            }
            tracing::info!("Library '{}' uses the remote vector backend", library);
            Ok(Box::new(RemoteVectorStore::from_config(&remote)?))
        }
        None => {
            tracing::info!("Library '{}' uses the local vector backend", library);
            Ok(Box::new(VectorStore::from_config(&data_folder, &config)?))
        }
    }
}

/// Open the scan record database of `library`.
pub fn open_tracker(app: &AppConfig, library: &str) -> AppResult<ScanRecordTracker> {
    ScanRecordTracker::open(&config::get_tracker_path(&app.library_dir(library)))
}

/// Get statistics for a library's local vector data.
pub fn stats(app: &AppConfig, library: &str) -> AppResult<LibraryStats> {
    tracing::info!("Getting vector stats for library '{}'", library);

    let data_folder = app.library_dir(library);
    let config = config::load_config(&data_folder)?;
    let store = VectorStore::from_config(&data_folder, &config)?;
    let tracker = ScanRecordTracker::open(&config::get_tracker_path(&data_folder))?;

    let index_size_bytes = std::fs::metadata(store.path()).map(|m| m.len()).unwrap_or(0);

    Ok(LibraryStats {
        library: library.to_string(),
        vectors: store.count(),
        tracked_identities: store.identity().len(),
        topology: store.topology(),
        dimension: store.dimension(),
        finished_scans: tracker.count(RecordStatus::Finished)?,
        unfinished_scans: tracker.count(RecordStatus::Unfinished)?,
        index_size_bytes,
    })
}
