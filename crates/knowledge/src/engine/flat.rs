//! Exact (brute-force) index backed by faiss `IndexFlatL2`.
//!
//! Two addressing modes:
//! - positional: the handle is the insertion position; removing entries
//!   compacts storage and shifts later handles down
//! - ID-mapped (`IndexIDMap2`): the caller (or the index) supplies stable
//!   handles that survive removals

use super::native::{engine_err, get_mut, hits, lock, read_native, to_idx, write_native};
use crate::types::VectorHandle;
use faiss::index::IndexImpl;
use faiss::selector::IdSelector;
use faiss::{index_factory, Index, MetricType};
use mnemo_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Mutex;

/// Serialized form: wrapper bookkeeping plus the native index bytes.
#[derive(Serialize, Deserialize)]
struct FlatSnapshot {
    dimension: usize,
    id_mapped: bool,
    handles: Vec<VectorHandle>,
    next_handle: VectorHandle,
    native: Vec<u8>,
}

/// Exact squared-L2 index.
pub struct FlatIndex {
    dimension: usize,
    id_mapped: bool,
    native: Mutex<IndexImpl>,
    len: usize,
    members: HashSet<VectorHandle>,
    next_handle: VectorHandle,
}

impl fmt::Debug for FlatIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlatIndex")
            .field("dimension", &self.dimension)
            .field("id_mapped", &self.id_mapped)
            .field("len", &self.len)
            .finish()
    }
}

impl FlatIndex {
    /// Create an empty index.
    pub fn new(dimension: usize, id_mapped: bool) -> AppResult<Self> {
        let description = if id_mapped { "IDMap2,Flat" } else { "Flat" };
        let native = index_factory(dimension as u32, description, MetricType::L2)
            .map_err(|e| engine_err("Failed to create flat index", e))?;

        Ok(Self {
            dimension,
            id_mapped,
            native: Mutex::new(native),
            len: 0,
            members: HashSet::new(),
            next_handle: 0,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn is_id_mapped(&self) -> bool {
        self.id_mapped
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, handle: VectorHandle) -> bool {
        if self.id_mapped {
            self.members.contains(&handle)
        } else {
            handle >= 0 && (handle as usize) < self.len
        }
    }

    /// Insert one vector and return the handle it was stored under.
    pub fn add(&mut self, handle: Option<VectorHandle>, vector: &[f32]) -> AppResult<VectorHandle> {
        check_dimension(self.dimension, vector)?;

        let handle = match (self.id_mapped, handle) {
            (false, Some(_)) => return Err(AppError::IdentityTrackingRequired),
            (false, None) => self.len as VectorHandle,
            (true, Some(handle)) => {
                check_handle(handle)?;
                if self.members.contains(&handle) {
                    return Err(AppError::IdentityConflict(format!(
                        "Handle {} is already present in the index",
                        handle
                    )));
                }
                handle
            }
            (true, None) => self.next_handle,
        };

        let native = get_mut(&mut self.native)?;
        if self.id_mapped {
            native.add_with_ids(vector, &[to_idx(handle)])
        } else {
            native.add(vector)
        }
        .map_err(|e| engine_err("Failed to add vector", e))?;

        if self.id_mapped {
            self.members.insert(handle);
        }
        self.len += 1;
        self.next_handle = self.next_handle.max(handle + 1);
        Ok(handle)
    }

    /// Remove every handle in `handles`; returns how many were present.
    pub fn remove(&mut self, handles: &HashSet<VectorHandle>) -> AppResult<usize> {
        let targets: Vec<_> = handles
            .iter()
            .copied()
            .filter(|&handle| self.contains(handle))
            .map(to_idx)
            .collect();
        if targets.is_empty() {
            return Ok(0);
        }

        let selector = IdSelector::batch(&targets).map_err(|e| engine_err("Failed to select handles", e))?;
        let removed = get_mut(&mut self.native)?
            .remove_ids(&selector)
            .map_err(|e| engine_err("Failed to remove vectors", e))?;

        if self.id_mapped {
            for handle in handles {
                self.members.remove(handle);
            }
        } else {
            // Positional handles follow storage order
            self.next_handle = (self.len - removed) as VectorHandle;
        }
        self.len -= removed;
        Ok(removed)
    }

    /// The `top_k` nearest entries, padded with the sentinel handle.
    pub fn search(&self, query: &[f32], top_k: usize) -> AppResult<Vec<(VectorHandle, f32)>> {
        check_dimension(self.dimension, query)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let k = top_k.min(self.len);
        if k == 0 {
            return Ok(hits(Vec::new(), Vec::new(), top_k));
        }

        let result = lock(&self.native)?
            .search(query, k)
            .map_err(|e| engine_err("Flat search failed", e))?;
        Ok(hits(result.distances, result.labels, top_k))
    }

    /// Drop every vector, keep dimension and addressing mode.
    pub fn reset(&mut self) -> AppResult<()> {
        get_mut(&mut self.native)?
            .reset()
            .map_err(|e| engine_err("Failed to reset flat index", e))?;
        self.len = 0;
        self.members.clear();
        self.next_handle = 0;
        Ok(())
    }

    /// Serialize to bytes.
    pub fn to_bytes(&self) -> AppResult<Vec<u8>> {
        let native = write_native(&*lock(&self.native)?)?;
        let mut handles: Vec<_> = self.members.iter().copied().collect();
        handles.sort_unstable();

        let snapshot = FlatSnapshot {
            dimension: self.dimension,
            id_mapped: self.id_mapped,
            handles,
            next_handle: self.next_handle,
            native,
        };
        bincode::serialize(&snapshot)
            .map_err(|e| AppError::Serialization(format!("Failed to encode flat index: {}", e)))
    }

    /// Deserialize from bytes produced by `to_bytes`.
    pub fn from_bytes(bytes: &[u8]) -> AppResult<Self> {
        let snapshot: FlatSnapshot = bincode::deserialize(bytes)
            .map_err(|e| AppError::CorruptedIndex(format!("Failed to decode flat index: {}", e)))?;
        let native = read_native(&snapshot.native)?;

        let stored = native.ntotal() as usize;
        let members: HashSet<_> = snapshot.handles.iter().copied().collect();
        let expected_handles = if snapshot.id_mapped { stored } else { 0 };
        if native.d() as usize != snapshot.dimension
            || members.len() != snapshot.handles.len()
            || members.len() != expected_handles
            || members.iter().any(|&h| h < 0 || h >= snapshot.next_handle)
        {
            return Err(AppError::CorruptedIndex(format!(
                "Flat index holds {} vectors of dimension {} but records {} handles for dimension {}",
                stored,
                native.d(),
                snapshot.handles.len(),
                snapshot.dimension
            )));
        }

        Ok(Self {
            dimension: snapshot.dimension,
            id_mapped: snapshot.id_mapped,
            native: Mutex::new(native),
            len: stored,
            members,
            next_handle: snapshot.next_handle,
        })
    }
}

pub(crate) fn check_dimension(expected: usize, vector: &[f32]) -> AppResult<()> {
    if vector.len() != expected {
        return Err(AppError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

pub(crate) fn check_handle(handle: VectorHandle) -> AppResult<()> {
    if handle < 0 {
        return Err(AppError::InvalidInput(format!(
            "Vector handles must be non-negative, got {}",
            handle
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NO_MATCH;

    #[test]
    fn test_positional_add_and_search() {
        let mut index = FlatIndex::new(2, false).unwrap();
        assert_eq!(index.add(None, &[0.0, 0.0]).unwrap(), 0);
        assert_eq!(index.add(None, &[5.0, 5.0]).unwrap(), 1);
        assert_eq!(index.add(None, &[1.0, 1.0]).unwrap(), 2);

        let results = index.search(&[0.9, 0.9], 2).unwrap();
        assert_eq!(results[0].0, 2);
        assert_eq!(results[1].0, 0);
    }

    #[test]
    fn test_positional_rejects_explicit_handle() {
        let mut index = FlatIndex::new(2, false).unwrap();
        let err = index.add(Some(4), &[0.0, 0.0]).unwrap_err();
        assert!(matches!(err, AppError::IdentityTrackingRequired));
        assert!(index.is_empty());
    }

    #[test]
    fn test_positional_remove_shifts_handles() {
        let mut index = FlatIndex::new(1, false).unwrap();
        for v in [0.0, 1.0, 2.0, 3.0] {
            index.add(None, &[v]).unwrap();
        }

        let removed = index.remove(&HashSet::from([1, 17])).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(index.len(), 3);
        assert!(!index.contains(3));

        // The vector [2.0] moved from handle 2 to handle 1
        let results = index.search(&[2.0], 1).unwrap();
        assert_eq!(results[0], (1, 0.0));
    }

    #[test]
    fn test_id_mapped_keeps_handles() {
        let mut index = FlatIndex::new(1, true).unwrap();
        index.add(Some(10), &[0.0]).unwrap();
        index.add(Some(20), &[2.0]).unwrap();
        index.add(Some(30), &[3.0]).unwrap();

        assert_eq!(index.remove(&HashSet::from([10])).unwrap(), 1);
        let results = index.search(&[2.1], 1).unwrap();
        assert_eq!(results[0].0, 20);
        assert!(!index.contains(10));
    }

    #[test]
    fn test_id_mapped_auto_handle_and_duplicates() {
        let mut index = FlatIndex::new(1, true).unwrap();
        index.add(Some(4), &[0.0]).unwrap();
        assert_eq!(index.add(None, &[1.0]).unwrap(), 5);

        let err = index.add(Some(4), &[2.0]).unwrap_err();
        assert!(matches!(err, AppError::IdentityConflict(_)));
        assert!(index.add(Some(-2), &[2.0]).is_err());
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut index = FlatIndex::new(3, false).unwrap();
        let err = index.add(None, &[1.0]).unwrap_err();
        assert!(matches!(
            err,
            AppError::DimensionMismatch {
                expected: 3,
                actual: 1
            }
        ));
        assert!(index.search(&[1.0, 2.0], 1).is_err());
    }

    #[test]
    fn test_search_pads_sentinel() {
        let mut index = FlatIndex::new(1, false).unwrap();
        assert_eq!(index.search(&[1.0], 2).unwrap()[0].0, NO_MATCH);

        index.add(None, &[1.0]).unwrap();
        let results = index.search(&[1.0], 3).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].0, 0);
        assert_eq!(results[1].0, NO_MATCH);
        assert_eq!(results[2].0, NO_MATCH);
    }

    #[test]
    fn test_bytes_round_trip_and_corruption() {
        let mut index = FlatIndex::new(2, true).unwrap();
        index.add(Some(1), &[1.0, 2.0]).unwrap();
        index.add(Some(7), &[4.0, 6.0]).unwrap();
        let bytes = index.to_bytes().unwrap();

        let mut decoded = FlatIndex::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.len(), 2);
        assert!(decoded.contains(7));
        assert_eq!(decoded.search(&[4.0, 6.0], 1).unwrap()[0], (7, 0.0));
        assert_eq!(decoded.add(None, &[0.0, 0.0]).unwrap(), 8);

        let err = FlatIndex::from_bytes(&bytes[..bytes.len() / 2]).unwrap_err();
        assert!(matches!(err, AppError::CorruptedIndex(_)));
    }

    #[test]
    fn test_reset() {
        let mut index = FlatIndex::new(1, false).unwrap();
        index.add(None, &[1.0]).unwrap();
        index.reset().unwrap();
        assert!(index.is_empty());
        assert_eq!(index.dimension(), 1);
        assert_eq!(index.add(None, &[2.0]).unwrap(), 0);
    }
}
