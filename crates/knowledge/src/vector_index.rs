//! Backend-agnostic vector index abstraction.
//!
//! Library code that only needs UUID-addressed storage and search can hold a
//! `Box<dyn VectorIndex>` and stay unaware of whether vectors live in a local
//! file or a remote service.

use crate::remote::{RemoteVectorStore, SearchClient};
use crate::store::VectorStore;
use crate::types::QueryHit;
use mnemo_core::{AppError, AppResult};

/// Trait for vector index backends.
pub trait VectorIndex: Send + Sync {
    /// Store `vector` under `uuid`, replacing any previous vector for it.
    fn upsert(&mut self, uuid: &str, vector: &[f32]) -> AppResult<()>;

    /// Remove the vectors of `uuids`; unknown UUIDs are skipped.
    fn remove_uuids(&mut self, uuids: &[String]) -> AppResult<()>;

    /// The `top_k` nearest entries, nearest first.
    fn search(&self, vector: &[f32], top_k: usize) -> AppResult<Vec<QueryHit>>;

    /// Make pending state durable.
    fn persist(&mut self) -> AppResult<()>;

    /// Remove every vector, keep the index itself.
    fn clear(&mut self) -> AppResult<()>;

    /// Remove every vector and the index itself.
    fn destroy(&mut self) -> AppResult<()>;

    /// Whether stored data exists for this index.
    fn exists(&self) -> AppResult<bool>;
}

impl VectorIndex for VectorStore {
    fn upsert(&mut self, uuid: &str, vector: &[f32]) -> AppResult<()> {
        if self.identity().resolve_reverse(uuid).is_some() {
            self.remove(&[uuid.to_string()], &[])?;
        }
        self.add(Some(uuid), vector).map(|_| ())
    }

    fn remove_uuids(&mut self, uuids: &[String]) -> AppResult<()> {
        if uuids.is_empty() || self.identity().is_empty() {
            return Ok(());
        }
        self.remove(uuids, &[]).map(|_| ())
    }

    fn search(&self, vector: &[f32], top_k: usize) -> AppResult<Vec<QueryHit>> {
        self.query(vector, top_k, None)
    }

    fn persist(&mut self) -> AppResult<()> {
        VectorStore::persist(self)
    }

    fn clear(&mut self) -> AppResult<()> {
        VectorStore::clear(self)
    }

    fn destroy(&mut self) -> AppResult<()> {
        self.delete()
    }

    fn exists(&self) -> AppResult<bool> {
        Ok(VectorStore::exists(self))
    }
}

impl<C: SearchClient> VectorIndex for RemoteVectorStore<C> {
    fn upsert(&mut self, uuid: &str, vector: &[f32]) -> AppResult<()> {
        self.add(uuid, vector, None)
    }

    fn remove_uuids(&mut self, uuids: &[String]) -> AppResult<()> {
        if uuids.is_empty() {
            return Ok(());
        }
        let mut pipeline = self.default_pipeline();
        for uuid in uuids {
            self.remove(uuid, Some(&mut pipeline))?;
        }
        pipeline.finish().map(|_| ())
    }

    fn search(&self, vector: &[f32], top_k: usize) -> AppResult<Vec<QueryHit>> {
        Ok(self
            .query(vector, top_k)?
            .into_iter()
            .map(QueryHit::Uuid)
            .collect())
    }

    fn persist(&mut self) -> AppResult<()> {
        RemoteVectorStore::persist(self)
    }

    fn clear(&mut self) -> AppResult<()> {
        self.clean()
    }

    fn destroy(&mut self) -> AppResult<()> {
        self.delete()
    }

    fn exists(&self) -> AppResult<bool> {
        self.namespace_exists()
    }
}

/// Reject a search hit list that carries raw handles where UUIDs are required.
pub fn expect_uuids(hits: Vec<QueryHit>) -> AppResult<Vec<String>> {
    hits.into_iter()
        .map(|hit| match hit {
            QueryHit::Uuid(uuid) => Ok(uuid),
            QueryHit::Handle(handle) => {
                tracing::warn!("Search hit {} has no UUID", handle);
                Err(AppError::IdentityTrackingRequired)
            }
        })
        .collect()
}
