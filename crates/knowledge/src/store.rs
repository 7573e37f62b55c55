//! Local vector store.
//!
//! A [`VectorStore`] is bound to one data folder and owns an [`IndexEngine`]
//! plus an [`IdentityMap`]. It starts uninitialized (unless a previous blob is
//! found on disk), becomes ready after [`VectorStore::initialize_index`], and
//! returns to uninitialized after [`VectorStore::delete`].
//!
//! Mutations take `&mut self` and queries take `&self`; callers that share a
//! store across tasks wrap it in a lock of their choosing.

use crate::codec;
use crate::config::{get_index_path, LibraryConfig};
use crate::engine::{IndexEngine, TopologyConfig};
use crate::identity::IdentityMap;
use crate::types::{
    InitOptions, QueryHit, Topology, TrainingState, VectorHandle, DEFAULT_INDEX_FILENAME,
    DEFAULT_PROBE_COUNT, NO_MATCH,
};
use mnemo_core::{AppError, AppResult};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// How to open a [`VectorStore`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub data_folder: PathBuf,
    pub index_filename: String,

    /// Accept an identity map whose size disagrees with the index count
    pub lenient: bool,

    /// Probe count used when initialization does not set one
    pub probe_count: usize,
}

impl StoreOptions {
    pub fn new(data_folder: impl Into<PathBuf>) -> Self {
        Self {
            data_folder: data_folder.into(),
            index_filename: DEFAULT_INDEX_FILENAME.to_string(),
            lenient: false,
            probe_count: DEFAULT_PROBE_COUNT,
        }
    }

    pub fn with_index_filename(mut self, index_filename: impl Into<String>) -> Self {
        self.index_filename = index_filename.into();
        self
    }

    pub fn lenient(mut self, lenient: bool) -> Self {
        self.lenient = lenient;
        self
    }
}

/// Per-library vector index with disk persistence.
#[derive(Debug)]
pub struct VectorStore {
    path: PathBuf,
    engine: IndexEngine,
    identity: IdentityMap,
    probe_count: usize,
}

impl VectorStore {
    /// Open the store in `data_folder` with default options.
    pub fn open(data_folder: impl Into<PathBuf>) -> AppResult<Self> {
        Self::open_with(StoreOptions::new(data_folder))
    }

    /// Open the store in `data_folder` using a library config.
    pub fn from_config(data_folder: &Path, config: &LibraryConfig) -> AppResult<Self> {
        let path = get_index_path(data_folder, config);
        let index_filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_INDEX_FILENAME.to_string());

        Self::open_with(StoreOptions {
            data_folder: data_folder.to_path_buf(),
            index_filename,
            lenient: config.lenient_load,
            probe_count: config.probe_count,
        })
    }

    /// Open (and if a blob exists, load) the store described by `options`.
    ///
    /// The data folder is created if missing. A loaded identity map must hold
    /// exactly one entry per indexed vector unless `options.lenient` is set.
    pub fn open_with(options: StoreOptions) -> AppResult<Self> {
        if options.data_folder.as_os_str().is_empty() {
            return Err(AppError::InvalidInput(
                "A data folder is required for the vector store, the index file is created in it"
                    .to_string(),
            ));
        }

        fs::create_dir_all(&options.data_folder)?;

        let index_filename = if options.index_filename.is_empty() {
            DEFAULT_INDEX_FILENAME
        } else {
            options.index_filename.as_str()
        };
        let path = options.data_folder.join(index_filename);

        tracing::info!(
            "Loading vector index from disk, path: {:?}, index file: {}",
            options.data_folder,
            index_filename
        );

        let mut store = Self {
            path,
            engine: IndexEngine::new(),
            identity: IdentityMap::new(),
            probe_count: options.probe_count.max(1),
        };

        if !store.path.is_file() {
            tracing::info!(
                "Index file {:?} not found, this is a new vector database",
                store.path
            );
            return Ok(store);
        }

        let bytes = fs::read(&store.path).map_err(|e| {
            tracing::error!("Failed to load index file {:?}: {}", store.path, e);
            AppError::CorruptedIndex(format!("Failed to load index file: {}", e))
        })?;
        let (identity, engine) = codec::decode(&bytes)?;

        let count = engine.count();
        if !identity.is_empty() && identity.len() != count {
            if options.lenient {
                tracing::warn!(
                    "ID mapping size {} does not match index size {}, continuing in lenient mode",
                    identity.len(),
                    count
                );
            } else {
                let msg = format!(
                    "ID mapping size {} does not match index size {}",
                    identity.len(),
                    count
                );
                tracing::error!("Corrupted index file: {}", msg);
                return Err(AppError::CorruptedIndex(msg));
            }
        }

        store.identity = identity;
        store.engine = engine;
        tracing::info!(
            "Index file {:?} loaded successfully ({} vectors, {})",
            store.path,
            count,
            store
                .engine
                .topology()
                .map_or_else(|| "uninitialized".to_string(), |t| t.to_string())
        );
        Ok(store)
    }

    /// Pick a topology and allocate a fresh index, replacing any previous one.
    ///
    /// No training set selects the flat topology. A training set selects the
    /// clustered topology; its vectors are inserted after training, and with a
    /// parallel UUID list vector `i` is bound to `uuids[i]`.
    pub fn initialize_index(&mut self, options: InitOptions) -> AppResult<()> {
        tracing::info!(
            "Initializing vector index, dimension: {}, track identity: {}, topology: {}",
            options.dimension,
            options.track_identity,
            options.topology()
        );

        let Some(training_set) = options.training_set.as_deref() else {
            self.engine.initialize(
                options.dimension,
                TopologyConfig::Flat {
                    track_ids: options.track_identity,
                },
            )?;
            self.identity.clear();
            return Ok(());
        };

        let uuids = options.training_uuids.as_deref().filter(|u| !u.is_empty());
        if let Some(uuids) = uuids {
            if uuids.len() != training_set.len() {
                tracing::error!("Training set and UUID list have different lengths");
                return Err(AppError::TrainingSetSizeMismatch {
                    vectors: training_set.len(),
                    uuids: uuids.len(),
                });
            }
            let distinct: HashSet<&str> = uuids.iter().map(String::as_str).collect();
            if distinct.len() != uuids.len() {
                return Err(AppError::InvalidInput(
                    "Training UUID list contains duplicates".to_string(),
                ));
            }
        }

        self.engine.initialize(
            options.dimension,
            TopologyConfig::Clustered {
                training_set,
                expected_corpus_size: options.expected_corpus_size,
                probe_count: Some(options.probe_count.unwrap_or(self.probe_count)),
            },
        )?;
        self.identity.clear();

        for (position, vector) in training_set.iter().enumerate() {
            let handle = self
                .engine
                .add_training_vector(position as VectorHandle, vector)?;
            if let Some(uuids) = uuids {
                self.identity.bind(handle, &uuids[position])?;
            }
        }

        tracing::info!("Clustered index training data added ({} vectors)", training_set.len());
        Ok(())
    }

    /// Insert one vector; returns its handle.
    ///
    /// With a UUID the handle is proposed from the current count and bumped
    /// past occupied handles, then bound before the insert. Without one the
    /// engine picks the handle (the insertion position on a positional index).
    ///
    /// An index holds either only tracked or only untracked vectors, so a
    /// UUID-less add into a tracked index fails, as does a UUID add into an
    /// index that already holds untracked vectors.
    pub fn add(&mut self, uuid: Option<&str>, vector: &[f32]) -> AppResult<VectorHandle> {
        self.ensure_initialized()?;

        let Some(uuid) = uuid.filter(|u| !u.is_empty()) else {
            if !self.identity.is_empty() {
                return Err(AppError::IdentityTrackingRequired);
            }
            return self.engine.add(None, vector);
        };

        if self.engine.is_positional() || self.engine.count() > self.identity.len() {
            return Err(AppError::IdentityTrackingRequired);
        }

        let mut handle = self.identity.assign_or_reuse(self.engine.count() as VectorHandle);
        while self.engine.contains(handle) {
            handle = self.identity.assign_or_reuse(handle + 1);
        }

        self.identity.bind(handle, uuid)?;
        if let Err(e) = self.engine.add(Some(handle), vector) {
            self.identity.unbind(handle);
            return Err(e);
        }

        Ok(handle)
    }

    /// Remove entries by handle or by UUID; returns how many were removed.
    ///
    /// When both lists are given, `handles` wins and `uuids` is ignored.
    /// Unknown UUIDs and handles are skipped.
    pub fn remove(&mut self, uuids: &[String], handles: &[VectorHandle]) -> AppResult<usize> {
        self.ensure_initialized()?;

        if uuids.is_empty() && handles.is_empty() {
            return Ok(0);
        }
        if handles.is_empty() && self.identity.is_empty() {
            return Err(AppError::IdentityTrackingRequired);
        }

        tracing::info!(
            "Removing vector entries, UUIDs: {:?}, handles: {:?}",
            uuids,
            handles
        );

        let targets: HashSet<VectorHandle> = if !handles.is_empty() {
            handles.iter().copied().collect()
        } else {
            uuids
                .iter()
                .filter_map(|uuid| self.identity.resolve_reverse(uuid))
                .collect()
        };
        if targets.is_empty() {
            return Ok(0);
        }

        let removed = self.engine.remove(&targets)?;
        for handle in &targets {
            self.identity.unbind(*handle);
        }
        Ok(removed)
    }

    /// Nearest-first hits for `vector`, sentinel entries dropped.
    ///
    /// `probe_override` changes the clustered probe count for this call only.
    pub fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        probe_override: Option<usize>,
    ) -> AppResult<Vec<QueryHit>> {
        self.ensure_initialized()?;

        let top_k = top_k.min(self.engine.count());
        let results = self.engine.search(vector, top_k, probe_override)?;
        let hits = results
            .into_iter()
            .filter(|(handle, _)| *handle != NO_MATCH)
            .map(|(handle, _)| match self.identity.resolve(handle) {
                Some(uuid) => QueryHit::Uuid(uuid.to_string()),
                None => QueryHit::Handle(handle),
            })
            .collect();
        Ok(hits)
    }

    /// Write the identity map and index to the bound file.
    ///
    /// The blob is written to a sibling temp file, synced, then renamed over
    /// the previous one.
    pub fn persist(&self) -> AppResult<()> {
        self.ensure_initialized()?;
        tracing::info!("Persisting vector index to disk, path: {:?}", self.path);

        let bytes = codec::encode(&self.identity, &self.engine)?;
        let tmp_path = self.tmp_path();
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        tracing::debug!("Persisted {} bytes to {:?}", bytes.len(), self.path);
        Ok(())
    }

    /// Drop every vector and identity, keep the topology. The file is untouched.
    pub fn clear(&mut self) -> AppResult<()> {
        self.ensure_initialized()?;
        tracing::warn!("Cleaning vector index, path: {:?}", self.path);
        self.engine.reset()?;
        self.identity.clear();
        Ok(())
    }

    /// Drop everything, remove the backing file and return to uninitialized.
    ///
    /// Calling this on an already deleted store is fine.
    pub fn delete(&mut self) -> AppResult<()> {
        tracing::warn!("Deleting vector index and index file, path: {:?}", self.path);
        self.engine.teardown();
        self.identity.clear();

        for path in [self.path.clone(), self.tmp_path()] {
            if path.is_file() {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    /// Whether the backing file exists. Does not load it.
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn is_initialized(&self) -> bool {
        self.engine.is_initialized()
    }

    /// Number of indexed vectors (0 when uninitialized).
    pub fn count(&self) -> usize {
        self.engine.count()
    }

    pub fn topology(&self) -> Option<Topology> {
        self.engine.topology()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.engine.dimension()
    }

    pub fn training_state(&self) -> TrainingState {
        self.engine.training_state()
    }

    pub fn identity(&self) -> &IdentityMap {
        &self.identity
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn ensure_initialized(&self) -> AppResult<()> {
        if self.engine.is_initialized() {
            Ok(())
        } else {
            Err(AppError::IndexNotInitialized)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn uuids(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn tracked_store(temp: &TempDir) -> VectorStore {
        let mut store = VectorStore::open(temp.path()).unwrap();
        store
            .initialize_index(InitOptions::flat(2).with_identity())
            .unwrap();
        store
    }

    #[test]
    fn test_open_creates_folder() {
        let temp = TempDir::new().unwrap();
        let folder = temp.path().join("nested").join("library");
        let store = VectorStore::open(&folder).unwrap();

        assert!(folder.is_dir());
        assert!(!store.exists());
        assert!(!store.is_initialized());
        assert_eq!(store.path(), folder.join("mem_db.idx"));
    }

    #[test]
    fn test_open_requires_folder() {
        let err = VectorStore::open("").unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[test]
    fn test_uninitialized_state_machine() {
        let temp = TempDir::new().unwrap();
        let mut store = VectorStore::open(temp.path()).unwrap();

        assert!(matches!(
            store.add(None, &[1.0]).unwrap_err(),
            AppError::IndexNotInitialized
        ));
        assert!(matches!(
            store.query(&[1.0], 1, None).unwrap_err(),
            AppError::IndexNotInitialized
        ));
        assert!(matches!(
            store.remove(&uuids(&["a"]), &[]).unwrap_err(),
            AppError::IndexNotInitialized
        ));
        assert!(matches!(
            store.persist().unwrap_err(),
            AppError::IndexNotInitialized
        ));
        assert!(matches!(
            store.clear().unwrap_err(),
            AppError::IndexNotInitialized
        ));

        // Allowed while uninitialized
        assert!(!store.exists());
        store.delete().unwrap();
    }

    #[test]
    fn test_add_with_uuid_and_query() {
        let temp = TempDir::new().unwrap();
        let mut store = tracked_store(&temp);

        assert_eq!(store.add(Some("uuid-A"), &[1.0, 0.0]).unwrap(), 0);
        assert_eq!(store.add(Some("uuid-B"), &[0.0, 1.0]).unwrap(), 1);

        let hits = store.query(&[0.1, 0.9], 1, None).unwrap();
        assert_eq!(hits, vec![QueryHit::Uuid("uuid-B".to_string())]);
    }

    #[test]
    fn test_add_uuid_to_positional_index_fails() {
        let temp = TempDir::new().unwrap();
        let mut store = VectorStore::open(temp.path()).unwrap();
        store.initialize_index(InitOptions::flat(2)).unwrap();

        let err = store.add(Some("uuid-A"), &[1.0, 0.0]).unwrap_err();
        assert!(matches!(err, AppError::IdentityTrackingRequired));
        assert!(store.identity().is_empty());

        assert_eq!(store.add(None, &[1.0, 0.0]).unwrap(), 0);
        let hits = store.query(&[1.0, 0.0], 5, None).unwrap();
        assert_eq!(hits, vec![QueryHit::Handle(0)]);
    }

    #[test]
    fn test_failed_insert_rolls_back_binding() {
        let temp = TempDir::new().unwrap();
        let mut store = tracked_store(&temp);

        let err = store.add(Some("uuid-A"), &[1.0, 0.0, 0.0]).unwrap_err();
        assert!(matches!(err, AppError::DimensionMismatch { .. }));
        assert!(store.identity().is_empty());
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn test_duplicate_uuid_conflicts() {
        let temp = TempDir::new().unwrap();
        let mut store = tracked_store(&temp);
        store.add(Some("uuid-A"), &[1.0, 0.0]).unwrap();

        let err = store.add(Some("uuid-A"), &[0.0, 1.0]).unwrap_err();
        assert!(matches!(err, AppError::IdentityConflict(_)));
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_tracked_and_untracked_adds_do_not_mix() {
        let temp = TempDir::new().unwrap();
        let mut store = tracked_store(&temp);
        store.add(Some("uuid-A"), &[1.0, 0.0]).unwrap();

        let err = store.add(None, &[2.0, 0.0]).unwrap_err();
        assert!(matches!(err, AppError::IdentityTrackingRequired));
        assert_eq!(store.count(), 1);

        let temp = TempDir::new().unwrap();
        let mut store = tracked_store(&temp);
        store.add(None, &[1.0, 0.0]).unwrap();

        let err = store.add(Some("uuid-A"), &[2.0, 0.0]).unwrap_err();
        assert!(matches!(err, AppError::IdentityTrackingRequired));
        assert!(store.identity().is_empty());
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_uuid_add_into_untracked_clustered_index_fails() {
        let temp = TempDir::new().unwrap();
        let mut store = VectorStore::open(temp.path()).unwrap();
        let training = vec![vec![0.0, 0.0], vec![1.0, 1.0], vec![5.0, 5.0]];
        store
            .initialize_index(InitOptions::clustered(2, training, 3))
            .unwrap();

        let err = store.add(Some("uuid-A"), &[0.5, 0.5]).unwrap_err();
        assert!(matches!(err, AppError::IdentityTrackingRequired));
        assert_eq!(store.count(), 3);
    }

    #[test]
    fn test_query_with_huge_top_k() {
        let temp = TempDir::new().unwrap();
        let mut store = tracked_store(&temp);
        store.add(Some("uuid-A"), &[1.0, 0.0]).unwrap();

        let hits = store.query(&[1.0, 0.0], usize::MAX, None).unwrap();
        assert_eq!(hits, vec![QueryHit::Uuid("uuid-A".to_string())]);
    }

    #[test]
    fn test_remove_by_uuid_requires_identity() {
        let temp = TempDir::new().unwrap();
        let mut store = tracked_store(&temp);
        store.add(None, &[1.0, 0.0]).unwrap();

        let err = store.remove(&uuids(&["uuid-A"]), &[]).unwrap_err();
        assert!(matches!(err, AppError::IdentityTrackingRequired));
        assert_eq!(store.remove(&[], &[]).unwrap(), 0);
    }

    #[test]
    fn test_remove_handles_take_precedence() {
        let temp = TempDir::new().unwrap();
        let mut store = tracked_store(&temp);
        store.add(Some("uuid-A"), &[1.0, 0.0]).unwrap();
        store.add(Some("uuid-B"), &[0.0, 1.0]).unwrap();

        let removed = store.remove(&uuids(&["uuid-A"]), &[1]).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.identity().resolve_reverse("uuid-A"), Some(0));
        assert_eq!(store.identity().resolve_reverse("uuid-B"), None);
    }

    #[test]
    fn test_remove_unknown_uuid_is_noop() {
        let temp = TempDir::new().unwrap();
        let mut store = tracked_store(&temp);
        store.add(Some("uuid-A"), &[1.0, 0.0]).unwrap();

        assert_eq!(store.remove(&uuids(&["missing"]), &[]).unwrap(), 0);
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_persist_and_reload() {
        let temp = TempDir::new().unwrap();
        let mut store = tracked_store(&temp);
        store.add(Some("uuid-A"), &[1.0, 0.0]).unwrap();
        store.add(Some("uuid-B"), &[0.0, 1.0]).unwrap();
        store.persist().unwrap();
        assert!(store.exists());
        assert!(!temp.path().join("mem_db.idx.tmp").exists());

        let reloaded = VectorStore::open(temp.path()).unwrap();
        assert_eq!(reloaded.count(), 2);
        assert_eq!(reloaded.topology(), Some(Topology::Flat));
        assert_eq!(
            reloaded.query(&[1.0, 0.0], 2, None).unwrap(),
            store.query(&[1.0, 0.0], 2, None).unwrap()
        );
    }

    #[test]
    fn test_clear_keeps_file() {
        let temp = TempDir::new().unwrap();
        let mut store = tracked_store(&temp);
        store.add(Some("uuid-A"), &[1.0, 0.0]).unwrap();
        store.persist().unwrap();

        store.clear().unwrap();
        assert_eq!(store.count(), 0);
        assert!(store.identity().is_empty());
        assert!(store.exists());
        assert!(store.is_initialized());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let mut store = tracked_store(&temp);
        store.add(Some("uuid-A"), &[1.0, 0.0]).unwrap();
        store.persist().unwrap();

        store.delete().unwrap();
        assert!(!store.exists());
        assert!(!store.is_initialized());
        store.delete().unwrap();
    }

    #[test]
    fn test_training_uuid_mismatch() {
        let temp = TempDir::new().unwrap();
        let mut store = VectorStore::open(temp.path()).unwrap();
        let options = InitOptions::clustered(2, vec![vec![0.0, 0.0], vec![1.0, 1.0]], 100)
            .with_training_uuids(uuids(&["only-one"]));

        let err = store.initialize_index(options).unwrap_err();
        assert!(matches!(
            err,
            AppError::TrainingSetSizeMismatch {
                vectors: 2,
                uuids: 1
            }
        ));
        assert!(!store.is_initialized());
    }

    #[test]
    fn test_clustered_binds_training_uuids() {
        let temp = TempDir::new().unwrap();
        let mut store = VectorStore::open(temp.path()).unwrap();
        let training = vec![vec![0.0, 0.0], vec![10.0, 10.0], vec![20.0, 0.0]];
        let options = InitOptions::clustered(2, training, 100)
            .with_training_uuids(uuids(&["t-0", "t-1", "t-2"]));
        store.initialize_index(options).unwrap();

        assert_eq!(store.count(), 3);
        assert_eq!(store.identity().resolve(1), Some("t-1"));

        let handle = store.add(Some("new"), &[10.0, 9.0]).unwrap();
        assert_eq!(handle, 3);

        let hits = store.query(&[10.0, 10.0], 1, Some(100)).unwrap();
        assert_eq!(hits, vec![QueryHit::Uuid("t-1".to_string())]);
    }

    #[test]
    fn test_from_config_uses_filename_and_lenient() {
        let temp = TempDir::new().unwrap();
        let config = LibraryConfig {
            index_filename: "images.idx".to_string(),
            lenient_load: true,
            ..Default::default()
        };

        let mut store = VectorStore::from_config(temp.path(), &config).unwrap();
        store.initialize_index(InitOptions::flat(1)).unwrap();
        store.add(None, &[1.0]).unwrap();
        store.persist().unwrap();
        assert!(temp.path().join("images.idx").is_file());
    }
}
