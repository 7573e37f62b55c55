//! Glue between the index wrappers and the faiss library.
//!
//! faiss only serializes through file paths, so index bytes pass through a
//! temporary file in both directions.

use super::distance::finish;
use crate::types::VectorHandle;
use faiss::index::{CpuIndex, IndexImpl, NativeIndex};
use faiss::{read_index, write_index, Idx};
use mnemo_core::{AppError, AppResult};
use std::fmt;
use std::io::Write;
use std::sync::{Mutex, MutexGuard};
use tempfile::NamedTempFile;

pub(crate) fn engine_err(context: &str, e: impl fmt::Display) -> AppError {
    AppError::Engine(format!("{}: {}", context, e))
}

pub(crate) fn to_idx(handle: VectorHandle) -> Idx {
    Idx::new(handle as u64)
}

/// Exclusive access for searches, which faiss runs through `&mut`.
pub(crate) fn lock<T>(native: &Mutex<T>) -> AppResult<MutexGuard<'_, T>> {
    native
        .lock()
        .map_err(|_| AppError::Engine("Native index lock poisoned".to_string()))
}

pub(crate) fn get_mut<T>(native: &mut Mutex<T>) -> AppResult<&mut T> {
    native
        .get_mut()
        .map_err(|_| AppError::Engine("Native index lock poisoned".to_string()))
}

/// Turn faiss labels and distances into padded `(handle, distance)` pairs.
pub(crate) fn hits(distances: Vec<f32>, labels: Vec<Idx>, top_k: usize) -> Vec<(VectorHandle, f32)> {
    let results = labels
        .into_iter()
        .zip(distances)
        .filter_map(|(label, distance)| label.get().map(|handle| (handle as VectorHandle, distance)))
        .collect();
    finish(results, top_k)
}

fn temp_path(file: &NamedTempFile) -> AppResult<&str> {
    file.path()
        .to_str()
        .ok_or_else(|| AppError::Engine(format!("Temporary index path {:?} is not UTF-8", file.path())))
}

/// Serialize a native index to bytes.
pub(crate) fn write_native<I: NativeIndex + CpuIndex>(index: &I) -> AppResult<Vec<u8>> {
    let file = NamedTempFile::new()?;
    write_index(index, temp_path(&file)?).map_err(|e| engine_err("Failed to write native index", e))?;
    Ok(std::fs::read(file.path())?)
}

/// Deserialize bytes produced by [`write_native`].
pub(crate) fn read_native(bytes: &[u8]) -> AppResult<IndexImpl> {
    let mut file = NamedTempFile::new()?;
    file.write_all(bytes)?;
    file.flush()?;

    read_index(temp_path(&file)?)
        .map_err(|e| AppError::CorruptedIndex(format!("Failed to read native index: {}", e)))
}
