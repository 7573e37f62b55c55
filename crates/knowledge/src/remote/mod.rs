//! Remote vector store.
//!
//! Vectors live in a shared key-value service as JSON documents keyed
//! `namespace:uuid`; the key itself is the identity map. Search runs
//! server-side through the service's KNN query.

mod client;
mod pipeline;

#[cfg(test)]
pub(crate) mod memory;

pub use client::{IndexCreation, PendingOp, RedisSearchClient, SearchClient};
pub use pipeline::BatchedPipeline;

use crate::config::RemoteConfig;
use mnemo_core::{AppError, AppResult};

/// Vector store backed by a [`SearchClient`].
#[derive(Debug)]
pub struct RemoteVectorStore<C: SearchClient> {
    client: C,
    namespace: String,
    index_name: String,
    batch_size: usize,
    dimension: Option<usize>,
}

impl RemoteVectorStore<RedisSearchClient> {
    /// Connect to the Redis instance named in `config`.
    pub fn from_config(config: &RemoteConfig) -> AppResult<Self> {
        let client = RedisSearchClient::connect(&config.url)?;
        let mut store = Self::new(client, &config.namespace, &config.index_name)?;
        store.batch_size = config.batch_size.max(1);
        Ok(store)
    }
}

impl<C: SearchClient> RemoteVectorStore<C> {
    pub fn new(client: C, namespace: &str, index_name: &str) -> AppResult<Self> {
        if namespace.is_empty() || index_name.is_empty() {
            return Err(AppError::InvalidInput(
                "Namespace and index name are mandatory for the remote vector store".to_string(),
            ));
        }

        tracing::info!(
            "Using remote vector store, namespace: {}, index name: {}",
            namespace,
            index_name
        );

        Ok(Self {
            client,
            namespace: namespace.to_string(),
            index_name: index_name.to_string(),
            batch_size: crate::config::DEFAULT_BATCH_SIZE,
            dimension: None,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    fn prefix(&self) -> String {
        format!("{}:", self.namespace)
    }

    fn key(&self, uuid: &str) -> AppResult<String> {
        if uuid.is_empty() {
            return Err(AppError::InvalidInput(
                "A UUID is required to store a remote vector".to_string(),
            ));
        }
        Ok(format!("{}:{}", self.namespace, uuid))
    }

    /// Create the namespace's index. An existing index counts as success.
    pub fn initialize_index(&mut self, dimension: usize) -> AppResult<()> {
        if dimension == 0 {
            return Err(AppError::InvalidInput(
                "Vector dimension must be greater than zero".to_string(),
            ));
        }

        tracing::info!(
            "Initializing remote index, namespace: {}, index name: {}, dimension: {}",
            self.namespace,
            self.index_name,
            dimension
        );

        match self
            .client
            .create_index(&self.index_name, &self.prefix(), dimension)?
        {
            IndexCreation::Created => tracing::debug!("Remote index {} created", self.index_name),
            IndexCreation::AlreadyExists => {
                tracing::debug!("Remote index {} already exists", self.index_name)
            }
        }

        self.dimension = Some(dimension);
        Ok(())
    }

    /// A write pipeline flushing every `batch_size` operations.
    pub fn pipeline(&self, batch_size: usize) -> BatchedPipeline<'_, C> {
        BatchedPipeline::new(&self.client, batch_size)
    }

    /// A write pipeline using the configured batch size.
    pub fn default_pipeline(&self) -> BatchedPipeline<'_, C> {
        self.pipeline(self.batch_size)
    }

    /// Store `vector` under `uuid`, through `pipeline` when given.
    pub fn add(
        &self,
        uuid: &str,
        vector: &[f32],
        pipeline: Option<&mut BatchedPipeline<'_, C>>,
    ) -> AppResult<()> {
        if let Some(expected) = self.dimension {
            if vector.len() != expected {
                return Err(AppError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
        }

        let key = self.key(uuid)?;
        match pipeline {
            Some(pipeline) => pipeline.set_vector(key, vector.to_vec()),
            None => self.client.set_vector(&key, vector),
        }
    }

    /// Remove the vector stored under `uuid`, through `pipeline` when given.
    pub fn remove(&self, uuid: &str, pipeline: Option<&mut BatchedPipeline<'_, C>>) -> AppResult<()> {
        tracing::info!(
            "Removing remote vector entry, namespace: {}, uuid: {}",
            self.namespace,
            uuid
        );

        let key = self.key(uuid)?;
        match pipeline {
            Some(pipeline) => pipeline.delete(key),
            None => self.client.delete_key(&key),
        }
    }

    /// UUIDs of the `top_k` nearest vectors, nearest first.
    pub fn query(&self, vector: &[f32], top_k: usize) -> AppResult<Vec<String>> {
        let prefix = self.prefix();
        let keys = self.client.knn(&self.index_name, vector, top_k)?;
        Ok(keys
            .into_iter()
            .filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }

    /// Remove every vector in the namespace; the index definition stays.
    pub fn clean(&self) -> AppResult<()> {
        tracing::warn!("Cleaning remote vector store for namespace: {}", self.namespace);
        let removed = self.client.delete_by_prefix(&self.prefix())?;
        self.client.snapshot()?;
        tracing::debug!("Removed {} remote keys", removed);
        Ok(())
    }

    /// Remove every vector and drop the index. Safe to call twice.
    pub fn delete(&mut self) -> AppResult<()> {
        tracing::warn!("Deleting remote vector store for namespace: {}", self.namespace);
        self.clean()?;
        if !self.client.drop_index(&self.index_name)? {
            tracing::debug!("Remote index {} was already gone", self.index_name);
        }
        self.client.save()?;
        self.dimension = None;
        Ok(())
    }

    /// Ask the service to write its data to disk.
    pub fn persist(&self) -> AppResult<()> {
        tracing::info!("Persisting remote vector store for namespace: {}", self.namespace);
        self.client.save()
    }

    /// Whether any key exists under the namespace.
    pub fn namespace_exists(&self) -> AppResult<bool> {
        Ok(self.client.first_key_with_prefix(&self.prefix())?.is_some())
    }
}
