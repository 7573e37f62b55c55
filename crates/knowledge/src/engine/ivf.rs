//! Clustered index backed by faiss `IndexIVFFlat`.
//!
//! A k-means quantizer partitions the space into `nlist` cells; each vector is
//! stored in the inverted list of its nearest centroid. A query scans only the
//! `nprobe` cells whose centroids are closest to it.

use super::flat::{check_dimension, check_handle};
use super::native::{engine_err, get_mut, hits, lock, read_native, to_idx, write_native};
use crate::types::{VectorHandle, DEFAULT_PROBE_COUNT};
use faiss::index::flat::FlatIndexImpl;
use faiss::index::ivf_flat::IVFFlatIndexImpl;
use faiss::selector::IdSelector;
use faiss::Index;
use mnemo_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Mutex;

#[derive(Serialize, Deserialize)]
struct IvfSnapshot {
    dimension: usize,
    nlist: usize,
    nprobe: usize,
    handles: Vec<VectorHandle>,
    next_handle: VectorHandle,
    native: Vec<u8>,
}

/// Trained inverted-file index with exact distances inside each cell.
pub struct IvfIndex {
    dimension: usize,
    nlist: usize,
    nprobe: usize,
    native: Mutex<IVFFlatIndexImpl>,
    members: HashSet<VectorHandle>,
    next_handle: VectorHandle,
}

impl fmt::Debug for IvfIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IvfIndex")
            .field("dimension", &self.dimension)
            .field("nlist", &self.nlist)
            .field("nprobe", &self.nprobe)
            .field("len", &self.members.len())
            .finish()
    }
}

impl IvfIndex {
    /// Train a quantizer with up to `nlist` cells in one pass over `training_set`.
    ///
    /// k-means cannot produce more cells than it has points, so a small
    /// training set lowers the cell count.
    pub fn train(dimension: usize, nlist: usize, training_set: &[Vec<f32>]) -> AppResult<Self> {
        if training_set.is_empty() {
            return Err(AppError::InvalidInput(
                "Clustered index requires a non-empty training set".to_string(),
            ));
        }
        for vector in training_set {
            check_dimension(dimension, vector)?;
        }

        let requested = nlist.max(1);
        let nlist = requested.min(training_set.len());
        if nlist < requested {
            tracing::warn!(
                "Training set of {} vectors cannot fill {} clusters, training {} clusters instead",
                training_set.len(),
                requested,
                nlist
            );
        }

        let quantizer = FlatIndexImpl::new_l2(dimension as u32)
            .map_err(|e| engine_err("Failed to create quantizer", e))?;
        let mut native = IVFFlatIndexImpl::new_l2(quantizer, dimension as u32, nlist as u32)
            .map_err(|e| engine_err("Failed to create clustered index", e))?;
        native
            .train(&training_set.concat())
            .map_err(|e| engine_err("Failed to train clustered index", e))?;
        native.set_nprobe(DEFAULT_PROBE_COUNT as u32);

        Ok(Self {
            dimension,
            nlist,
            nprobe: DEFAULT_PROBE_COUNT,
            native: Mutex::new(native),
            members: HashSet::new(),
            next_handle: 0,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of trained cells (may be below the requested count on small training sets).
    pub fn nlist(&self) -> usize {
        self.nlist
    }

    pub fn nprobe(&self) -> usize {
        self.nprobe
    }

    pub fn set_nprobe(&mut self, nprobe: usize) -> AppResult<()> {
        self.nprobe = nprobe.max(1);
        get_mut(&mut self.native)?.set_nprobe(self.nprobe as u32);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, handle: VectorHandle) -> bool {
        self.members.contains(&handle)
    }

    /// Insert one vector and return the handle it was stored under.
    pub fn add(&mut self, handle: Option<VectorHandle>, vector: &[f32]) -> AppResult<VectorHandle> {
        check_dimension(self.dimension, vector)?;

        let handle = match handle {
            Some(handle) => {
                check_handle(handle)?;
                if self.members.contains(&handle) {
                    return Err(AppError::IdentityConflict(format!(
                        "Handle {} is already present in the index",
                        handle
                    )));
                }
                handle
            }
            None => self.next_handle,
        };

        get_mut(&mut self.native)?
            .add_with_ids(vector, &[to_idx(handle)])
            .map_err(|e| engine_err("Failed to add vector", e))?;

        self.members.insert(handle);
        self.next_handle = self.next_handle.max(handle + 1);
        Ok(handle)
    }

    /// Remove every handle in `handles`; returns how many were present.
    pub fn remove(&mut self, handles: &HashSet<VectorHandle>) -> AppResult<usize> {
        let targets: Vec<_> = handles
            .iter()
            .copied()
            .filter(|handle| self.members.contains(handle))
            .map(to_idx)
            .collect();
        if targets.is_empty() {
            return Ok(0);
        }

        let selector = IdSelector::batch(&targets).map_err(|e| engine_err("Failed to select handles", e))?;
        let removed = get_mut(&mut self.native)?
            .remove_ids(&selector)
            .map_err(|e| engine_err("Failed to remove vectors", e))?;

        for handle in handles {
            self.members.remove(handle);
        }
        Ok(removed)
    }

    /// The `top_k` nearest entries among the scanned cells, padded with the
    /// sentinel handle. `nprobe` overrides the index setting for this call.
    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
        nprobe: Option<usize>,
    ) -> AppResult<Vec<(VectorHandle, f32)>> {
        check_dimension(self.dimension, query)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let k = top_k.min(self.members.len());
        if k == 0 {
            return Ok(hits(Vec::new(), Vec::new(), top_k));
        }

        let mut native = lock(&self.native)?;
        let scanned = nprobe.unwrap_or(self.nprobe).clamp(1, self.nlist);
        native.set_nprobe(scanned as u32);
        let result = native.search(query, k);
        native.set_nprobe(self.nprobe as u32);

        let result = result.map_err(|e| engine_err("Clustered search failed", e))?;
        Ok(hits(result.distances, result.labels, top_k))
    }

    /// Drop every vector, keep the trained quantizer.
    pub fn reset(&mut self) -> AppResult<()> {
        get_mut(&mut self.native)?
            .reset()
            .map_err(|e| engine_err("Failed to reset clustered index", e))?;
        self.members.clear();
        self.next_handle = 0;
        Ok(())
    }

    /// Serialize to bytes.
    pub fn to_bytes(&self) -> AppResult<Vec<u8>> {
        let native = write_native(&*lock(&self.native)?)?;
        let mut handles: Vec<_> = self.members.iter().copied().collect();
        handles.sort_unstable();

        let snapshot = IvfSnapshot {
            dimension: self.dimension,
            nlist: self.nlist,
            nprobe: self.nprobe,
            handles,
            next_handle: self.next_handle,
            native,
        };
        bincode::serialize(&snapshot)
            .map_err(|e| AppError::Serialization(format!("Failed to encode clustered index: {}", e)))
    }

    /// Deserialize from bytes produced by `to_bytes`.
    pub fn from_bytes(bytes: &[u8]) -> AppResult<Self> {
        let snapshot: IvfSnapshot = bincode::deserialize(bytes).map_err(|e| {
            AppError::CorruptedIndex(format!("Failed to decode clustered index: {}", e))
        })?;
        let mut native = read_native(&snapshot.native)?.into_ivf_flat().map_err(|e| {
            AppError::CorruptedIndex(format!("Stored index is not a clustered index: {}", e))
        })?;

        let stored = native.ntotal() as usize;
        let members: HashSet<_> = snapshot.handles.iter().copied().collect();
        if native.d() as usize != snapshot.dimension
            || native.nlist() as usize != snapshot.nlist
            || !native.is_trained()
            || members.len() != snapshot.handles.len()
            || members.len() != stored
            || members.iter().any(|&h| h < 0 || h >= snapshot.next_handle)
        {
            return Err(AppError::CorruptedIndex(format!(
                "Clustered index holds {} vectors in {} cells but records {} handles in {} cells",
                stored,
                native.nlist(),
                snapshot.handles.len(),
                snapshot.nlist
            )));
        }

        let nprobe = snapshot.nprobe.max(1);
        native.set_nprobe(nprobe as u32);
        Ok(Self {
            dimension: snapshot.dimension,
            nlist: snapshot.nlist,
            nprobe,
            native: Mutex::new(native),
            members,
            next_handle: snapshot.next_handle,
        })
    }
}
