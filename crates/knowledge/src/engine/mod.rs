//! Numeric index engine.
//!
//! [`IndexEngine`] hides the flat/clustered distinction behind one
//! add/remove/search/reset surface. The topology is picked once in
//! [`IndexEngine::initialize`]; re-initializing replaces the previous index.
//! Both topologies are faiss indexes; this module only keeps the handle
//! bookkeeping faiss does not track.

pub mod distance;
pub mod flat;
pub mod ivf;
mod native;

pub use distance::normalize;
pub use flat::FlatIndex;
pub use ivf::IvfIndex;

use crate::types::{Topology, TrainingState, VectorHandle, CLUSTERING_THRESHOLD, DEFAULT_PROBE_COUNT};
use mnemo_core::{AppError, AppResult};
use std::collections::HashSet;

/// Training vectors per cluster recommended for stable centroids.
const TRAINING_POINTS_PER_CLUSTER: usize = 30;

/// Topology parameters for [`IndexEngine::initialize`].
#[derive(Debug, Clone, Copy)]
pub enum TopologyConfig<'a> {
    Flat {
        /// Use the ID-mapped adapter instead of positional handles
        track_ids: bool,
    },
    Clustered {
        training_set: &'a [Vec<f32>],
        expected_corpus_size: usize,
        probe_count: Option<usize>,
    },
}

/// The active index.
#[derive(Debug)]
pub enum EngineIndex {
    Flat(FlatIndex),
    Clustered(IvfIndex),
}

impl EngineIndex {
    pub fn topology(&self) -> Topology {
        match self {
            EngineIndex::Flat(_) => Topology::Flat,
            EngineIndex::Clustered(_) => Topology::Clustered,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            EngineIndex::Flat(index) => index.len(),
            EngineIndex::Clustered(index) => index.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cluster count for an expected corpus size: `4 * floor(sqrt(n))`, at least 1.
pub fn cluster_count(expected_corpus_size: usize) -> usize {
    let root = (expected_corpus_size as f64).sqrt().floor() as usize;
    (4 * root).max(1)
}

#[derive(Debug, Default)]
pub struct IndexEngine {
    index: Option<EngineIndex>,
    training: TrainingState,
}

impl IndexEngine {
    /// Create an engine with no topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an index restored from disk.
    pub fn from_index(index: EngineIndex, training: TrainingState) -> Self {
        Self {
            index: Some(index),
            training,
        }
    }

    /// Allocate (and for the clustered topology, train) a fresh index.
    pub fn initialize(&mut self, dimension: usize, config: TopologyConfig<'_>) -> AppResult<()> {
        if dimension == 0 {
            return Err(AppError::InvalidInput(
                "Vector dimension must be greater than zero".to_string(),
            ));
        }

        if self.index.is_some() {
            tracing::info!("Replacing existing index with a new one");
        }

        match config {
            TopologyConfig::Flat { track_ids } => {
                tracing::info!(
                    "Initializing flat index, dimension: {}, track ids: {}",
                    dimension,
                    track_ids
                );
                self.index = Some(EngineIndex::Flat(FlatIndex::new(dimension, track_ids)?));
                self.training = TrainingState::default();
            }
            TopologyConfig::Clustered {
                training_set,
                expected_corpus_size,
                probe_count,
            } => {
                if training_set.is_empty() {
                    return Err(AppError::InvalidInput(
                        "Clustered index requires a non-empty training set".to_string(),
                    ));
                }

                if expected_corpus_size <= CLUSTERING_THRESHOLD {
                    tracing::warn!(
                        "Dataset size {} is too small for a clustered index, a flat index is recommended",
                        expected_corpus_size
                    );
                }

                let clusters = cluster_count(expected_corpus_size);
                let recommended = TRAINING_POINTS_PER_CLUSTER * clusters;
                if training_set.len() < recommended {
                    tracing::warn!(
                        "Training set of {} vectors is too small for expected dataset size {}, accuracy will suffer (recommended: {})",
                        training_set.len(),
                        expected_corpus_size,
                        recommended
                    );
                }

                tracing::info!(
                    "Training clustered index, dimension: {}, clusters: {}, training vectors: {}",
                    dimension,
                    clusters,
                    training_set.len()
                );

                let mut index = IvfIndex::train(dimension, clusters, training_set)?;
                index.set_nprobe(probe_count.unwrap_or(DEFAULT_PROBE_COUNT))?;

                self.index = Some(EngineIndex::Clustered(index));
                self.training = TrainingState {
                    since_last_training: training_set.len(),
                };
                tracing::info!("Clustered index trained");
            }
        }

        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.index.is_some()
    }

    pub fn topology(&self) -> Option<Topology> {
        self.index.as_ref().map(EngineIndex::topology)
    }

    pub fn dimension(&self) -> Option<usize> {
        self.index.as_ref().map(|index| match index {
            EngineIndex::Flat(flat) => flat.dimension(),
            EngineIndex::Clustered(ivf) => ivf.dimension(),
        })
    }

    /// Whether the flat topology uses positional handles.
    pub fn is_positional(&self) -> bool {
        matches!(&self.index, Some(EngineIndex::Flat(flat)) if !flat.is_id_mapped())
    }

    pub fn training_state(&self) -> TrainingState {
        self.training
    }

    /// The active index, for persistence.
    pub fn index(&self) -> Option<&EngineIndex> {
        self.index.as_ref()
    }

    /// Number of stored vectors (0 when uninitialized).
    pub fn count(&self) -> usize {
        self.index.as_ref().map_or(0, EngineIndex::len)
    }

    pub fn contains(&self, handle: VectorHandle) -> bool {
        match &self.index {
            Some(EngineIndex::Flat(flat)) => flat.contains(handle),
            Some(EngineIndex::Clustered(ivf)) => ivf.contains(handle),
            None => false,
        }
    }

    /// Insert one vector; returns the handle it was stored under.
    pub fn add(&mut self, handle: Option<VectorHandle>, vector: &[f32]) -> AppResult<VectorHandle> {
        match self.index.as_mut() {
            Some(EngineIndex::Flat(flat)) => flat.add(handle, vector),
            Some(EngineIndex::Clustered(ivf)) => {
                let handle = ivf.add(handle, vector)?;
                self.training.since_last_training += 1;
                Ok(handle)
            }
            None => Err(AppError::IndexNotInitialized),
        }
    }

    /// Insert a member of the training set under its position handle.
    ///
    /// Training vectors are already counted in the training state.
    pub fn add_training_vector(&mut self, handle: VectorHandle, vector: &[f32]) -> AppResult<VectorHandle> {
        match self.index.as_mut() {
            Some(EngineIndex::Clustered(ivf)) => ivf.add(Some(handle), vector),
            Some(EngineIndex::Flat(_)) => Err(AppError::InvalidInput(
                "Only a clustered index has training vectors".to_string(),
            )),
            None => Err(AppError::IndexNotInitialized),
        }
    }

    /// Remove a batch of handles; returns how many were present.
    pub fn remove(&mut self, handles: &HashSet<VectorHandle>) -> AppResult<usize> {
        let index = self.index.as_mut().ok_or(AppError::IndexNotInitialized)?;
        if handles.is_empty() {
            return Ok(0);
        }

        let removed = match index {
            EngineIndex::Flat(flat) => flat.remove(handles)?,
            EngineIndex::Clustered(ivf) => ivf.remove(handles)?,
        };
        tracing::debug!("Removed {} of {} requested handles", removed, handles.len());
        Ok(removed)
    }

    /// Nearest-first `(handle, squared distance)` pairs, padded to `top_k`
    /// with the sentinel. `probe_override` only affects the clustered topology
    /// and only for this call.
    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
        probe_override: Option<usize>,
    ) -> AppResult<Vec<(VectorHandle, f32)>> {
        match &self.index {
            Some(EngineIndex::Flat(flat)) => flat.search(query, top_k),
            Some(EngineIndex::Clustered(ivf)) => {
                ivf.search(query, top_k, probe_override.filter(|&p| p > 0))
            }
            None => Err(AppError::IndexNotInitialized),
        }
    }

    /// Drop every vector, keep topology and dimension.
    pub fn reset(&mut self) -> AppResult<()> {
        match self.index.as_mut() {
            Some(EngineIndex::Flat(flat)) => flat.reset()?,
            Some(EngineIndex::Clustered(ivf)) => ivf.reset()?,
            None => {}
        }
        self.training = TrainingState::default();
        Ok(())
    }

    /// Forget the topology entirely.
    pub fn teardown(&mut self) {
        self.index = None;
        self.training = TrainingState::default();
    }
}
