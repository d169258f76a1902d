//! Background queue that persists uploads off the request path.
//!
//! A single worker drains jobs in submission order. Failures are logged and
//! dropped; nothing waits on the outcome except [`UploadQueue::shutdown`].

use std::sync::Mutex;

use bytes::Bytes;
use tokio::task::JoinHandle;

use crate::storage::StorageUploader;

/// Jobs held in memory while the worker is busy. Each one keeps a whole image
/// alive, so a stalled bucket sheds uploads instead of accumulating them.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// One image to persist.
#[derive(Debug, Clone)]
pub struct UploadJob {
    pub filename: String,
    pub data: Bytes,
    pub content_type: String,
}

pub struct UploadQueue {
    job_tx: async_channel::Sender<UploadJob>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl UploadQueue {
    /// Spawn the worker task. Must be called from within a Tokio runtime.
    pub fn new(uploader: StorageUploader) -> Self {
        Self::with_capacity(uploader, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(uploader: StorageUploader, capacity: usize) -> Self {
        let (job_tx, job_rx) = async_channel::bounded::<UploadJob>(capacity.max(1));
        let worker = tokio::spawn(worker_loop(job_rx, uploader));
        Self {
            job_tx,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queue a job. Returns `false` if the queue is full or has been shut down.
    pub fn submit(&self, job: UploadJob) -> bool {
        match self.job_tx.try_send(job) {
            Ok(()) => true,
            Err(async_channel::TrySendError::Full(job)) => {
                tracing::warn!(
                    filename = %job.filename,
                    pending = self.pending(),
                    "upload queue full, dropping upload"
                );
                false
            }
            Err(async_channel::TrySendError::Closed(job)) => {
                tracing::warn!(filename = %job.filename, "upload queue closed, dropping upload");
                false
            }
        }
    }

    /// Number of jobs waiting for the worker.
    pub fn pending(&self) -> usize {
        self.job_tx.len()
    }

    /// Stop accepting jobs and wait until every queued upload has finished.
    pub async fn shutdown(&self) {
        self.job_tx.close();
        let handle = self.worker.lock().unwrap().take();
        if let Some(h) = handle {
            let _ = h.await;
        }
    }
}

async fn worker_loop(job_rx: async_channel::Receiver<UploadJob>, uploader: StorageUploader) {
    while let Ok(job) = job_rx.recv().await {
        match uploader
            .upload(job.data, &job.filename, &job.content_type)
            .await
        {
            Ok(url) => tracing::debug!(filename = %job.filename, %url, "background upload stored"),
            Err(e) => {
                tracing::warn!(filename = %job.filename, error = %e, "background upload failed")
            }
        }
    }
}
