//! Vector index type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Integer identifier of a vector inside the numeric index.
///
/// Handles are non-negative; `NO_MATCH` is reserved for search padding.
pub type VectorHandle = i64;

/// Sentinel handle returned by a search when fewer than `top_k` neighbours exist.
pub const NO_MATCH: VectorHandle = -1;

/// Offset between 0-based vector handles and 1-based relational record ids.
pub const RECORD_ID_OFFSET: i64 = 1;

/// Default index file name inside a library data folder.
pub const DEFAULT_INDEX_FILENAME: &str = "mem_db.idx";

/// Default number of clusters scanned per query on a clustered index.
pub const DEFAULT_PROBE_COUNT: usize = 5;

/// Corpus size at or below which clustering underperforms a flat index.
///
/// Derived from the IVF trainer's own advice ("please provide at least 7020
/// training points" when clustering 2081 points into 180 centroids).
pub const CLUSTERING_THRESHOLD: usize = 7020;

/// Map a vector handle to the id of the relational record it was built from.
pub fn handle_to_record_id(handle: VectorHandle) -> i64 {
    handle + RECORD_ID_OFFSET
}

/// Map a relational record id back to its vector handle.
pub fn record_id_to_handle(record_id: i64) -> VectorHandle {
    record_id - RECORD_ID_OFFSET
}

/// The index layout chosen at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Topology {
    /// Exact brute-force search
    Flat,
    /// Trained quantizer + inverted lists (IVF)
    Clustered,
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topology::Flat => write!(f, "flat"),
            Topology::Clustered => write!(f, "clustered"),
        }
    }
}

/// Training bookkeeping of a clustered index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingState {
    /// Vectors absorbed since the last training pass
    pub since_last_training: usize,
}

/// One search result as returned to library code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryHit {
    /// Identity-tracked entry
    Uuid(String),
    /// Positional entry (or a tracked index entry added without a UUID)
    Handle(VectorHandle),
}

impl QueryHit {
    /// The UUID of this hit, if it carries one.
    pub fn as_uuid(&self) -> Option<&str> {
        match self {
            QueryHit::Uuid(uuid) => Some(uuid),
            QueryHit::Handle(_) => None,
        }
    }

    /// The raw handle of this hit, if it carries one.
    pub fn as_handle(&self) -> Option<VectorHandle> {
        match self {
            QueryHit::Uuid(_) => None,
            QueryHit::Handle(handle) => Some(*handle),
        }
    }
}

/// Options for `VectorStore::initialize_index`.
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Vector length
    pub dimension: usize,

    /// Whether a flat index tracks explicit handles (required to add with UUIDs)
    pub track_identity: bool,

    /// Training vectors; presence selects the clustered topology
    pub training_set: Option<Vec<Vec<f32>>>,

    /// UUIDs parallel to `training_set`
    pub training_uuids: Option<Vec<String>>,

    /// Expected final corpus size, drives the cluster count
    pub expected_corpus_size: usize,

    /// Probe count override for the clustered topology
    pub probe_count: Option<usize>,
}

impl InitOptions {
    /// Flat topology of the given dimension.
    pub fn flat(dimension: usize) -> Self {
        Self {
            dimension,
            ..Default::default()
        }
    }

    /// Clustered topology trained on `training_set`.
    pub fn clustered(
        dimension: usize,
        training_set: Vec<Vec<f32>>,
        expected_corpus_size: usize,
    ) -> Self {
        Self {
            dimension,
            training_set: Some(training_set),
            expected_corpus_size,
            ..Default::default()
        }
    }

    /// Enable identity tracking.
    pub fn with_identity(mut self) -> Self {
        self.track_identity = true;
        self
    }

    /// Bind each training vector to the UUID at the same position.
    pub fn with_training_uuids(mut self, uuids: Vec<String>) -> Self {
        self.track_identity = true;
        self.training_uuids = Some(uuids);
        self
    }

    /// Override the default probe count.
    pub fn with_probe_count(mut self, probe_count: usize) -> Self {
        self.probe_count = Some(probe_count);
        self
    }

    /// The topology these options select.
    pub fn topology(&self) -> Topology {
        if self.training_set.is_some() {
            Topology::Clustered
        } else {
            Topology::Flat
        }
    }
}

/// Statistics about one library's local vector data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryStats {
    pub library: String,
    pub vectors: usize,
    pub tracked_identities: usize,
    pub topology: Option<Topology>,
    pub dimension: Option<usize>,
    pub finished_scans: usize,
    pub unfinished_scans: usize,
    pub index_size_bytes: u64,
}
