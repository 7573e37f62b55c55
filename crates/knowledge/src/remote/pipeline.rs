//! Batched write pipeline for the remote store.

use super::client::{PendingOp, SearchClient};
use mnemo_core::AppResult;

/// Queues writes and sends them in batches.
///
/// The queue is flushed once it holds `batch_size` operations, on
/// [`BatchedPipeline::finish`], and on drop. A failed flush keeps the queue
/// intact so it can be retried. A flush failure during drop can only be
/// logged and the queued operations are lost; call `finish` to observe it.
pub struct BatchedPipeline<'a, C: SearchClient + ?Sized> {
    client: &'a C,
    batch_size: usize,
    pending: Vec<PendingOp>,
    flushed: usize,
}

impl<'a, C: SearchClient + ?Sized> BatchedPipeline<'a, C> {
    pub fn new(client: &'a C, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            client,
            batch_size,
            pending: Vec::with_capacity(batch_size),
            flushed: 0,
        }
    }

    pub fn set_vector(&mut self, key: String, vector: Vec<f32>) -> AppResult<()> {
        self.push(PendingOp::SetVector { key, vector })
    }

    pub fn delete(&mut self, key: String) -> AppResult<()> {
        self.push(PendingOp::Delete { key })
    }

    /// Operations queued but not yet sent.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Operations sent so far.
    pub fn flushed(&self) -> usize {
        self.flushed
    }

    /// Send everything queued.
    pub fn flush(&mut self) -> AppResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        tracing::debug!("Flushing {} pipelined operations", self.pending.len());
        self.client.execute_batch(&self.pending)?;
        self.flushed += self.pending.len();
        self.pending.clear();
        Ok(())
    }

    /// Flush and close the pipeline.
    pub fn finish(mut self) -> AppResult<usize> {
        self.flush()?;
        Ok(self.flushed)
    }

    fn push(&mut self, op: PendingOp) -> AppResult<()> {
        self.pending.push(op);
        if self.pending.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }
}

impl<C: SearchClient + ?Sized> Drop for BatchedPipeline<'_, C> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::error!(
                "Failed to flush pipeline on close, {} operations dropped: {}",
                self.pending.len(),
                e
            );
        }
    }
}
