//! On-disk format of a vector store.
//!
//! A blob is a 4-byte magic, a little-endian `u16` format version, then the
//! bincode encoding of [`PersistedBlob`]. Nested index bytes are encoded
//! separately so either topology can be absent. Decoding validates the whole
//! structure and reports any failure as `CorruptedIndex`.

use crate::engine::{EngineIndex, FlatIndex, IndexEngine, IvfIndex};
use crate::identity::IdentityMap;
use crate::types::{TrainingState, VectorHandle};
use mnemo_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const MAGIC: &[u8; 4] = b"MNVX";
const FORMAT_VERSION: u16 = 1;
const HEADER_LEN: usize = MAGIC.len() + 2;

/// Serialized state of one store generation.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PersistedBlob {
    pub identity_forward: HashMap<VectorHandle, String>,
    pub identity_reverse: HashMap<String, VectorHandle>,
    pub flat: Option<Vec<u8>>,
    pub clustered: Option<Vec<u8>>,
    pub since_last_training: usize,
}

impl PersistedBlob {
    /// Capture the current identity map and engine.
    pub fn capture(identity: &IdentityMap, engine: &IndexEngine) -> AppResult<Self> {
        let index = engine.index().ok_or(AppError::IndexNotInitialized)?;
        let (flat, clustered) = match index {
            EngineIndex::Flat(flat) => (Some(flat.to_bytes()?), None),
            EngineIndex::Clustered(ivf) => (None, Some(ivf.to_bytes()?)),
        };

        Ok(Self {
            identity_forward: identity.forward().clone(),
            identity_reverse: identity.reverse().clone(),
            flat,
            clustered,
            since_last_training: engine.training_state().since_last_training,
        })
    }

    /// Write the header and body.
    pub fn to_bytes(&self) -> AppResult<Vec<u8>> {
        let body = bincode::serialize(self)
            .map_err(|e| AppError::Serialization(format!("Failed to encode index blob: {}", e)))?;

        let mut bytes = Vec::with_capacity(HEADER_LEN + body.len());
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    /// Check the header and parse the body.
    pub fn from_bytes(bytes: &[u8]) -> AppResult<Self> {
        if bytes.len() < HEADER_LEN || &bytes[..MAGIC.len()] != MAGIC {
            return Err(AppError::CorruptedIndex(
                "Index file does not start with a vector index header".to_string(),
            ));
        }

        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != FORMAT_VERSION {
            return Err(AppError::CorruptedIndex(format!(
                "Unsupported index format version {} (expected {})",
                version, FORMAT_VERSION
            )));
        }

        bincode::deserialize(&bytes[HEADER_LEN..])
            .map_err(|e| AppError::CorruptedIndex(format!("Failed to decode index blob: {}", e)))
    }
}

/// Serialize the identity map and the engine's active index.
pub fn encode(identity: &IdentityMap, engine: &IndexEngine) -> AppResult<Vec<u8>> {
    PersistedBlob::capture(identity, engine)?.to_bytes()
}

/// Rebuild the identity map and engine from `bytes`.
///
/// The flat index wins when a blob carries both topologies.
pub fn decode(bytes: &[u8]) -> AppResult<(IdentityMap, IndexEngine)> {
    let blob = PersistedBlob::from_bytes(bytes)?;

    let index = match (&blob.flat, &blob.clustered) {
        (Some(flat), other) => {
            if other.is_some() {
                tracing::warn!("Index blob carries both topologies, using the flat index");
            }
            EngineIndex::Flat(FlatIndex::from_bytes(flat)?)
        }
        (None, Some(clustered)) => EngineIndex::Clustered(IvfIndex::from_bytes(clustered)?),
        (None, None) => {
            tracing::error!("Corrupted index file: index not loaded");
            return Err(AppError::CorruptedIndex(
                "Index blob holds neither a flat nor a clustered index".to_string(),
            ));
        }
    };

    let identity = IdentityMap::from_parts(blob.identity_forward, blob.identity_reverse)?;
    let training = match index {
        EngineIndex::Clustered(_) => TrainingState {
            since_last_training: blob.since_last_training,
        },
        EngineIndex::Flat(_) => TrainingState::default(),
    };

    Ok((identity, IndexEngine::from_index(index, training)))
}
