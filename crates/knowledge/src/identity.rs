//! Bidirectional handle ↔ UUID map.
//!
//! The forward (`handle → uuid`) and reverse (`uuid → handle`) maps are always
//! mutated together, so every forward entry has exactly one mirror entry.

use crate::types::VectorHandle;
use mnemo_core::{AppError, AppResult};
use rand::Rng;
use std::collections::HashMap;

/// Upper bound (exclusive) of the jitter added to a colliding handle.
const MAX_JITTER: VectorHandle = 10;

/// Bidirectional mapping between vector handles and external UUIDs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityMap {
    forward: HashMap<VectorHandle, String>,
    reverse: HashMap<String, VectorHandle>,
}

impl IdentityMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a map from persisted halves.
    ///
    /// Fails with `CorruptedIndex` unless the two halves mirror each other.
    pub fn from_parts(
        forward: HashMap<VectorHandle, String>,
        reverse: HashMap<String, VectorHandle>,
    ) -> AppResult<Self> {
        if forward.len() != reverse.len() {
            return Err(AppError::CorruptedIndex(format!(
                "ID mapping halves differ in size: {} forward, {} reverse",
                forward.len(),
                reverse.len()
            )));
        }

        for (handle, uuid) in &forward {
            if reverse.get(uuid) != Some(handle) {
                return Err(AppError::CorruptedIndex(format!(
                    "ID mapping for handle {} ({}) has no matching reverse entry",
                    handle, uuid
                )));
            }
        }

        Ok(Self { forward, reverse })
    }

    /// Propose a free handle, starting at `proposed`.
    ///
    /// An occupied handle means earlier entries were deleted, so the proposal
    /// is bumped by a random step in `[1, 10)` until it lands on a free slot.
    pub fn assign_or_reuse(&self, proposed: VectorHandle) -> VectorHandle {
        self.assign_or_reuse_with(proposed, &mut rand::thread_rng())
    }

    /// `assign_or_reuse` with a caller-supplied random source.
    pub fn assign_or_reuse_with<R: Rng + ?Sized>(
        &self,
        proposed: VectorHandle,
        rng: &mut R,
    ) -> VectorHandle {
        let mut handle = proposed.max(0);
        while self.forward.contains_key(&handle) {
            handle += rng.gen_range(1..MAX_JITTER);
        }
        handle
    }

    /// Bind `handle` to `uuid` in both directions.
    ///
    /// Rebinding the same pair is a no-op. A UUID already bound to another
    /// handle, or a handle already bound to another UUID, is a conflict: the
    /// stale entry must be unbound first.
    pub fn bind(&mut self, handle: VectorHandle, uuid: &str) -> AppResult<()> {
        if let Some(&existing) = self.reverse.get(uuid) {
            if existing == handle {
                return Ok(());
            }
            tracing::error!(
                "UUID {} is already bound to handle {}, refusing to bind handle {}",
                uuid,
                existing,
                handle
            );
            return Err(AppError::IdentityConflict(format!(
                "UUID {} is already bound to handle {}",
                uuid, existing
            )));
        }

        if let Some(existing) = self.forward.get(&handle) {
            return Err(AppError::IdentityConflict(format!(
                "Handle {} is already bound to UUID {}",
                handle, existing
            )));
        }

        self.forward.insert(handle, uuid.to_string());
        self.reverse.insert(uuid.to_string(), handle);
        self.debug_check();
        Ok(())
    }

    /// Remove the entry for `handle`; returns its UUID if it was bound.
    pub fn unbind(&mut self, handle: VectorHandle) -> Option<String> {
        let uuid = self.forward.remove(&handle)?;
        self.reverse.remove(&uuid);
        self.debug_check();
        Some(uuid)
    }

    /// Remove the entry for `uuid`; returns its handle if it was bound.
    pub fn unbind_by_uuid(&mut self, uuid: &str) -> Option<VectorHandle> {
        let handle = self.reverse.remove(uuid)?;
        self.forward.remove(&handle);
        self.debug_check();
        Some(handle)
    }

    /// UUID bound to `handle`.
    pub fn resolve(&self, handle: VectorHandle) -> Option<&str> {
        self.forward.get(&handle).map(String::as_str)
    }

    /// Handle bound to `uuid`.
    pub fn resolve_reverse(&self, uuid: &str) -> Option<VectorHandle> {
        self.reverse.get(uuid).copied()
    }

    /// Whether `handle` is bound.
    pub fn contains_handle(&self, handle: VectorHandle) -> bool {
        self.forward.contains_key(&handle)
    }

    /// Number of bound pairs.
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    /// Whether no pair is bound.
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Drop every pair.
    pub fn clear(&mut self) {
        self.forward.clear();
        self.reverse.clear();
    }

    /// Sizes of the forward and reverse halves (equal unless corrupted).
    pub fn half_sizes(&self) -> (usize, usize) {
        (self.forward.len(), self.reverse.len())
    }

    /// Forward half, for persistence.
    pub fn forward(&self) -> &HashMap<VectorHandle, String> {
        &self.forward
    }

    /// Reverse half, for persistence.
    pub fn reverse(&self) -> &HashMap<String, VectorHandle> {
        &self.reverse
    }

    fn debug_check(&self) {
        debug_assert_eq!(self.forward.len(), self.reverse.len());
        debug_assert!(self
            .forward
            .iter()
            .all(|(handle, uuid)| self.reverse.get(uuid) == Some(handle)));
    }
}
