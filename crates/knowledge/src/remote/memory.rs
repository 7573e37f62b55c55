//! In-process [`SearchClient`] used by tests.

use super::client::{IndexCreation, PendingOp, SearchClient};
use mnemo_core::{AppError, AppResult};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct MemorySearchClient {
    docs: Mutex<BTreeMap<String, Vec<f32>>>,
    indexes: Mutex<HashMap<String, (String, usize)>>,
    batches: AtomicUsize,
    saves: AtomicUsize,
    reject_batches: AtomicBool,
}

impl MemorySearchClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        self.docs.lock().unwrap().keys().cloned().collect()
    }

    pub fn batches(&self) -> usize {
        self.batches.load(AtomicOrdering::SeqCst)
    }

    pub fn saves(&self) -> usize {
        self.saves.load(AtomicOrdering::SeqCst)
    }

    /// Make every following batch fail until reset.
    pub fn reject_batches(&self, reject: bool) {
        self.reject_batches.store(reject, AtomicOrdering::SeqCst);
    }

    pub fn has_index(&self, index_name: &str) -> bool {
        self.indexes.lock().unwrap().contains_key(index_name)
    }
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        1.0
    } else {
        1.0 - dot / (na * nb)
    }
}

impl SearchClient for MemorySearchClient {
    fn create_index(
        &self,
        index_name: &str,
        prefix: &str,
        dimension: usize,
    ) -> AppResult<IndexCreation> {
        let mut indexes = self.indexes.lock().unwrap();
        if indexes.contains_key(index_name) {
            return Ok(IndexCreation::AlreadyExists);
        }
        indexes.insert(index_name.to_string(), (prefix.to_string(), dimension));
        Ok(IndexCreation::Created)
    }

    fn drop_index(&self, index_name: &str) -> AppResult<bool> {
        Ok(self.indexes.lock().unwrap().remove(index_name).is_some())
    }

    fn set_vector(&self, key: &str, vector: &[f32]) -> AppResult<()> {
        self.docs
            .lock()
            .unwrap()
            .insert(key.to_string(), vector.to_vec());
        Ok(())
    }

    fn delete_key(&self, key: &str) -> AppResult<()> {
        self.docs.lock().unwrap().remove(key);
        Ok(())
    }

    fn delete_by_prefix(&self, prefix: &str) -> AppResult<usize> {
        let mut docs = self.docs.lock().unwrap();
        let before = docs.len();
        docs.retain(|key, _| !key.starts_with(prefix));
        Ok(before - docs.len())
    }

    fn first_key_with_prefix(&self, prefix: &str) -> AppResult<Option<String>> {
        Ok(self
            .docs
            .lock()
            .unwrap()
            .keys()
            .find(|key| key.starts_with(prefix))
            .cloned())
    }

    fn knn(&self, index_name: &str, vector: &[f32], top_k: usize) -> AppResult<Vec<String>> {
        let (prefix, _) = self
            .indexes
            .lock()
            .unwrap()
            .get(index_name)
            .cloned()
            .ok_or_else(|| AppError::Remote(format!("{}: no such index", index_name)))?;

        let docs = self.docs.lock().unwrap();
        let mut scored: Vec<(&String, f32)> = docs
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(key, doc)| (key, cosine_distance(vector, doc)))
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(key, _)| key.clone())
            .collect())
    }

    fn execute_batch(&self, ops: &[PendingOp]) -> AppResult<()> {
        if self.reject_batches.load(AtomicOrdering::SeqCst) {
            return Err(AppError::Remote("connection reset".to_string()));
        }
        for op in ops {
            match op {
                PendingOp::SetVector { key, vector } => self.set_vector(key, vector)?,
                PendingOp::Delete { key } => self.delete_key(key)?,
            }
        }
        self.batches.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(())
    }

    fn snapshot(&self) -> AppResult<()> {
        Ok(())
    }

    fn save(&self) -> AppResult<()> {
        self.saves.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(())
    }
}
