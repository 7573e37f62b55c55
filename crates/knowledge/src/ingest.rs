//! Bulk ingestion: embed a batch of items into a fresh vector store.
//!
//! Small batches go into a flat index initialized from the first embedding;
//! batches above the clustering threshold are embedded in full and then used
//! as the training set of a clustered index. The store is persisted once at
//! the end, so a failed or cancelled run never touches the file on disk.

use crate::config::LibraryConfig;
use crate::embeddings::EmbeddingProvider;
use crate::engine::normalize;
use crate::lock::ScanLock;
use crate::progress::ProgressReporter;
use crate::store::VectorStore;
use crate::tracker::{RecordStatus, ScanRecordTracker, UnfinishedMarker};
use crate::types::{InitOptions, Topology, CLUSTERING_THRESHOLD};
use mnemo_core::{AppError, AppResult};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One unit of content to embed.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestItem {
    pub uuid: Option<String>,
    pub text: String,
}

impl IngestItem {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            uuid: None,
            text: text.into(),
        }
    }

    pub fn with_uuid(uuid: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            uuid: Some(uuid.into()),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Item count above which a clustered index is trained
    pub clustering_threshold: usize,

    /// Scale embeddings to unit length
    pub normalize: bool,

    /// Track identities even when no item carries a UUID
    pub track_identity: bool,

    pub probe_count: Option<usize>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            clustering_threshold: CLUSTERING_THRESHOLD,
            normalize: true,
            track_identity: false,
            probe_count: None,
        }
    }
}

impl IngestOptions {
    pub fn from_config(config: &LibraryConfig) -> Self {
        Self {
            clustering_threshold: config.clustering_threshold,
            normalize: config.normalize,
            track_identity: false,
            probe_count: Some(config.probe_count),
        }
    }
}

/// Shared cancellation signal, checked between items.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Collaborators of an ingestion run.
pub struct IngestContext<'a, P: EmbeddingProvider + ?Sized> {
    pub provider: &'a P,
    pub cancel: CancelFlag,
    pub progress: ProgressReporter,
    pub options: IngestOptions,
}

impl<'a, P: EmbeddingProvider + ?Sized> IngestContext<'a, P> {
    pub fn new(provider: &'a P) -> Self {
        Self {
            provider,
            cancel: CancelFlag::new(),
            progress: ProgressReporter::noop(),
            options: IngestOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestStats {
    pub items: usize,
    pub topology: Option<Topology>,
    pub dimension: Option<usize>,
}

/// Result of a tracked ingestion.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// The source already has a finished record; nothing was done
    AlreadyIndexed { uuid: Option<String> },
    Ingested { uuid: String, stats: IngestStats },
}

/// Embed `items` into `store`, replacing whatever index it held.
pub async fn ingest<P: EmbeddingProvider + ?Sized>(
    store: &mut VectorStore,
    items: &[IngestItem],
    ctx: &IngestContext<'_, P>,
) -> AppResult<IngestStats> {
    if items.is_empty() {
        tracing::info!("Nothing to ingest into {:?}", store.path());
        return Ok(IngestStats::default());
    }

    let total = items.len();
    let clustered = total > ctx.options.clustering_threshold;
    // Identities are tracked for all items or for none
    let all_tracked = items.iter().all(|i| i.uuid.is_some());
    if !all_tracked && items.iter().any(|i| i.uuid.is_some()) {
        tracing::warn!("Only some items carry a UUID, the index will not track identities");
    }
    let track_identity = ctx.options.track_identity || all_tracked;
    let model = ctx.provider.model_name().to_string();

    tracing::info!(
        "Total records: {}, start embedding with {} ({}), topology: {}",
        total,
        ctx.provider.provider_name(),
        model,
        if clustered { Topology::Clustered } else { Topology::Flat }
    );

    ctx.progress.reset();
    let mut training_set: Vec<Vec<f32>> = Vec::new();
    let mut dimension: Option<usize> = None;

    for (i, item) in items.iter().enumerate() {
        if ctx.cancel.is_cancelled() {
            tracing::info!("Embedding cancelled after {} of {} items", i, total);
            return Err(AppError::Cancelled(
                "Library initialization cancelled".to_string(),
            ));
        }
        ctx.progress.embed(i as u64, total as u64, &model);

        let mut embedding = ctx.provider.embed(&item.text).await?;
        if ctx.options.normalize {
            normalize(&mut embedding);
        }

        if clustered {
            training_set.push(embedding);
        } else {
            if dimension.is_none() {
                dimension = Some(embedding.len());
                let options = InitOptions {
                    track_identity,
                    ..InitOptions::flat(embedding.len())
                };
                store.initialize_index(options)?;
            }
            let uuid = if all_tracked { item.uuid.as_deref() } else { None };
            store.add(uuid, &embedding)?;
        }

        tokio::task::yield_now().await;
    }

    if clustered {
        let dim = training_set.first().map_or(0, Vec::len);
        dimension = Some(dim);

        let uuids: Option<Vec<String>> = items.iter().map(|i| i.uuid.clone()).collect();

        ctx.progress.train(training_set.len() as u64);
        tracing::info!("Building clustered index with dimension {}", dim);

        let mut options = InitOptions::clustered(dim, training_set, total);
        if let Some(uuids) = uuids {
            options = options.with_training_uuids(uuids);
        }
        options.probe_count = ctx.options.probe_count;
        store.initialize_index(options)?;
        tracing::info!("Index built");
    }

    ctx.progress.reset();
    ctx.progress.index(total as u64, total as u64);

    ctx.progress.persist(&store.path().to_string_lossy());
    store.persist()?;

    Ok(IngestStats {
        items: total,
        topology: store.topology(),
        dimension,
    })
}

/// Ingest one source under scan-record bookkeeping.
///
/// A finished source is left alone. Leftovers of an unfinished one are
/// deleted first. While embedding, the source holds an unfinished record and
/// the library scan lock; on failure or cancellation the store is deleted and
/// the record dropped before the error is returned.
pub async fn ingest_tracked<P: EmbeddingProvider + ?Sized>(
    tracker: &ScanRecordTracker,
    relative_path: &str,
    uuid: Option<&str>,
    store: &mut VectorStore,
    items: &[IngestItem],
    ctx: &IngestContext<'_, P>,
) -> AppResult<IngestOutcome> {
    let relative_path = relative_path.trim();
    if relative_path.is_empty() {
        return Err(AppError::InvalidInput("Invalid relative path".to_string()));
    }

    if tracker.is_recorded(relative_path)? {
        tracing::info!("{} is already indexed, skipping", relative_path);
        return Ok(IngestOutcome::AlreadyIndexed {
            uuid: tracker.get_uuid(relative_path, RecordStatus::Finished)?,
        });
    }

    let data_folder = store
        .path()
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let _lock = ScanLock::acquire(&data_folder)?;

    if tracker.is_unfinished(relative_path)? {
        tracing::info!(
            "Cleaning up leftover embeddings of {} from an interrupted scan",
            relative_path
        );
        store.delete()?;
        tracker.remove_by_path(relative_path, Some(RecordStatus::Unfinished))?;
    }

    let uuid = uuid
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    tracing::info!("Initialization started for {} ({})", relative_path, uuid);
    let marker = UnfinishedMarker::begin(tracker, relative_path, &uuid)?;

    match ingest(store, items, ctx).await {
        Ok(stats) => {
            marker.finish()?;
            tracing::info!("Initialization finished for {}", relative_path);
            Ok(IngestOutcome::Ingested { uuid, stats })
        }
        Err(e) => {
            if e.is_cancellation() {
                tracing::warn!("Initialization of {} cancelled, progress abandoned", relative_path);
            } else {
                tracing::error!("Initialization of {} failed: {}", relative_path, e);
            }

            if let Err(cleanup) = store.delete() {
                tracing::error!("Failed to delete partial index of {}: {}", relative_path, cleanup);
            }
            if let Err(cleanup) = marker.discard() {
                tracing::error!(
                    "Failed to drop unfinished scan record of {}: {}",
                    relative_path,
                    cleanup
                );
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::MockProvider;
    use crate::types::QueryHit;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Provider that trips a cancel flag after a fixed number of embeddings.
    #[derive(Debug)]
    struct CancellingProvider {
        inner: MockProvider,
        cancel: CancelFlag,
        after: usize,
        calls: Mutex<usize>,
    }

    #[async_trait::async_trait]
    impl EmbeddingProvider for CancellingProvider {
        fn provider_name(&self) -> &str {
            "cancelling"
        }

        fn model_name(&self) -> &str {
            "test"
        }

        async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
            {
                let mut calls = self.calls.lock().unwrap();
                *calls += texts.len();
                if *calls >= self.after {
                    self.cancel.cancel();
                }
            }
            self.inner.embed_batch(texts).await
        }
    }

    fn items(n: usize) -> Vec<IngestItem> {
        (0..n)
            .map(|i| IngestItem::with_uuid(format!("uuid-{}", i), format!("word{} shared", i)))
            .collect()
    }

    #[tokio::test]
    async fn test_flat_ingest_persists() {
        let temp = TempDir::new().unwrap();
        let provider = MockProvider::new(32);
        let mut store = VectorStore::open(temp.path()).unwrap();

        let stats = ingest(&mut store, &items(5), &IngestContext::new(&provider))
            .await
            .unwrap();
        assert_eq!(stats.items, 5);
        assert_eq!(stats.topology, Some(Topology::Flat));
        assert_eq!(stats.dimension, Some(32));
        assert!(store.exists());

        let mut query = provider.embed("word3 shared").await.unwrap();
        normalize(&mut query);
        let hits = store.query(&query, 1, None).unwrap();
        assert_eq!(hits, vec![QueryHit::Uuid("uuid-3".to_string())]);
    }

    #[tokio::test]
    async fn test_clustered_ingest_above_threshold() {
        let temp = TempDir::new().unwrap();
        let provider = MockProvider::new(16);
        let mut store = VectorStore::open(temp.path()).unwrap();

        let mut ctx = IngestContext::new(&provider);
        ctx.options.clustering_threshold = 10;

        let stats = ingest(&mut store, &items(20), &ctx).await.unwrap();
        assert_eq!(stats.topology, Some(Topology::Clustered));
        assert_eq!(store.count(), 20);
        assert_eq!(store.identity().len(), 20);
    }

    #[tokio::test]
    async fn test_mixed_uuids_reload_strictly() {
        let temp = TempDir::new().unwrap();
        let provider = MockProvider::new(8);
        let items = vec![
            IngestItem::with_uuid("uuid-A", "alpha"),
            IngestItem::new("beta"),
        ];

        {
            let mut store = VectorStore::open(temp.path()).unwrap();
            let stats = ingest(&mut store, &items, &IngestContext::new(&provider))
                .await
                .unwrap();
            assert_eq!(stats.items, 2);
            assert!(store.identity().is_empty());
        }

        let store = VectorStore::open(temp.path()).unwrap();
        assert_eq!(store.count(), 2);
        assert!(store.identity().is_empty());
    }

    #[tokio::test]
    async fn test_empty_input_creates_nothing() {
        let temp = TempDir::new().unwrap();
        let provider = MockProvider::new(8);
        let mut store = VectorStore::open(temp.path()).unwrap();

        let stats = ingest(&mut store, &[], &IngestContext::new(&provider))
            .await
            .unwrap();
        assert_eq!(stats, IngestStats::default());
        assert!(!store.exists());
        assert!(!store.is_initialized());
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let temp = TempDir::new().unwrap();
        let provider = MockProvider::new(8);
        let mut store = VectorStore::open(temp.path()).unwrap();

        let ctx = IngestContext::new(&provider);
        ctx.cancel.cancel();

        let err = ingest(&mut store, &items(3), &ctx).await.unwrap_err();
        assert!(err.is_cancellation());
        assert!(!store.exists());
    }

    #[tokio::test]
    async fn test_tracked_ingest_records_finished() {
        let temp = TempDir::new().unwrap();
        let tracker = ScanRecordTracker::in_memory().unwrap();
        let provider = MockProvider::new(8);
        let mut store = VectorStore::open(temp.path()).unwrap();
        let ctx = IngestContext::new(&provider);

        let outcome = ingest_tracked(&tracker, "docs/a.txt", Some("doc-A"), &mut store, &items(3), &ctx)
            .await
            .unwrap();
        assert!(matches!(outcome, IngestOutcome::Ingested { ref uuid, .. } if uuid == "doc-A"));
        assert!(tracker.is_recorded("docs/a.txt").unwrap());

        let again = ingest_tracked(&tracker, "docs/a.txt", None, &mut store, &items(3), &ctx)
            .await
            .unwrap();
        assert_eq!(
            again,
            IngestOutcome::AlreadyIndexed {
                uuid: Some("doc-A".to_string())
            }
        );
    }

    #[tokio::test]
    async fn test_tracked_cancel_cleans_up() {
        let temp = TempDir::new().unwrap();
        let tracker = ScanRecordTracker::in_memory().unwrap();
        let cancel = CancelFlag::new();
        let provider = CancellingProvider {
            inner: MockProvider::new(8),
            cancel: cancel.clone(),
            after: 2,
            calls: Mutex::new(0),
        };
        let mut store = VectorStore::open(temp.path()).unwrap();
        let mut ctx = IngestContext::new(&provider);
        ctx.cancel = cancel;

        let err = ingest_tracked(&tracker, "big.txt", None, &mut store, &items(10), &ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Cancelled(_)));
        assert!(!store.is_initialized());
        assert!(!store.exists());
        assert!(!tracker.is_unfinished("big.txt").unwrap());
        assert!(!tracker.is_recorded("big.txt").unwrap());
        // The scan lock was released
        assert!(ScanLock::acquire(temp.path()).is_ok());
    }

    /// Provider that drops the scan record table, then fails.
    #[derive(Debug)]
    struct TableDroppingProvider {
        tracker_db: std::path::PathBuf,
    }

    #[async_trait::async_trait]
    impl EmbeddingProvider for TableDroppingProvider {
        fn provider_name(&self) -> &str {
            "table-dropping"
        }

        fn model_name(&self) -> &str {
            "test"
        }

        async fn embed_batch(&self, _texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
            let conn = rusqlite::Connection::open(&self.tracker_db).unwrap();
            conn.execute("DROP TABLE scan_records", []).unwrap();
            Err(AppError::Embedding("model offline".to_string()))
        }
    }

    #[tokio::test]
    async fn test_failed_record_cleanup_keeps_original_error() {
        let temp = TempDir::new().unwrap();
        let tracker_db = temp.path().join("scans.db");
        let tracker = ScanRecordTracker::open(&tracker_db).unwrap();
        let provider = TableDroppingProvider {
            tracker_db: tracker_db.clone(),
        };

        let store_dir = temp.path().join("library");
        std::fs::create_dir(&store_dir).unwrap();
        let mut store = VectorStore::open(&store_dir).unwrap();

        let err = ingest_tracked(
            &tracker,
            "doc.txt",
            None,
            &mut store,
            &items(3),
            &IngestContext::new(&provider),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::Embedding(_)));
        assert!(!store.is_initialized());
    }

    #[tokio::test]
    async fn test_tracked_cleans_leftover_unfinished() {
        let temp = TempDir::new().unwrap();
        let tracker = ScanRecordTracker::in_memory().unwrap();
        tracker
            .add("doc.txt", "stale-uuid", RecordStatus::Unfinished)
            .unwrap();

        let provider = MockProvider::new(8);
        let mut store = VectorStore::open(temp.path()).unwrap();
        let outcome = ingest_tracked(
            &tracker,
            "doc.txt",
            None,
            &mut store,
            &items(2),
            &IngestContext::new(&provider),
        )
        .await
        .unwrap();

        let IngestOutcome::Ingested { uuid, .. } = outcome else {
            panic!("expected ingestion");
        };
        assert_ne!(uuid, "stale-uuid");
        assert_eq!(tracker.get_uuid("doc.txt", RecordStatus::Finished).unwrap(), Some(uuid));
    }

    #[tokio::test]
    async fn test_tracked_rejects_empty_path() {
        let temp = TempDir::new().unwrap();
        let tracker = ScanRecordTracker::in_memory().unwrap();
        let provider = MockProvider::new(8);
        let mut store = VectorStore::open(temp.path()).unwrap();

        let err = ingest_tracked(&tracker, "  ", None, &mut store, &items(1), &IngestContext::new(&provider))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }
}
