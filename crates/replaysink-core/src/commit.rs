//! Batch commit to blob storage.
//!
//! `CommitExecutor` uploads a batch one fragment at a time, in order, and
//! stops at the first failure. Whatever the cause, the caller only sees
//! `BufferCommitFailed` and must leave the batch's offsets uncommitted.

use crate::error::BufferCommitFailed;
use crate::fragment::Fragment;
use crate::storage::BlobStorage;
use std::sync::Arc;
use tracing::{debug, error};

/// Stateless batch uploader shared by all partition workers.
#[derive(Clone)]
pub struct CommitExecutor {
    storage: Arc<dyn BlobStorage>,
}

impl CommitExecutor {
    /// Create an executor over the given storage.
    pub fn new(storage: Arc<dyn BlobStorage>) -> Self {
        Self { storage }
    }

    /// Upload every fragment in `batch`, first to last.
    ///
    /// Returns `Ok(())` only if every upload succeeded. There is no retry
    /// here: redelivery from the stream re-supplies the batch.
    pub async fn commit(&self, batch: &[Fragment]) -> Result<(), BufferCommitFailed> {
        for (position, fragment) in batch.iter().enumerate() {
            if let Err(e) = self.storage.upload(fragment).await {
                error!(
                    offset = %fragment.offset,
                    position,
                    batch_len = batch.len(),
                    error = %e,
                    "Fragment upload failed, abandoning batch"
                );
                return Err(BufferCommitFailed);
            }
        }

        debug!(
            fragments = batch.len(),
            bytes = batch.iter().map(|f| f.size).sum::<u64>(),
            "Batch committed"
        );
        Ok(())
    }
}

impl std::fmt::Debug for CommitExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitExecutor").finish_non_exhaustive()
    }
}
