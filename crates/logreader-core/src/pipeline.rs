//! Per-request extraction: store each image, ask the model about it, and
//! join the answers in submission order.
//!
//! Files are processed strictly one after another. Nothing in a batch
//! overlaps, so output order always equals input order.

use std::sync::Arc;

use thiserror::Error;

use crate::image;
use crate::model::{ModelError, Part, VisionModel};
use crate::storage::{StorageError, StorageUploader};
use crate::upload_queue::{UploadJob, UploadQueue};
use crate::{Config, FailurePolicy, UploadMode, UploadedFile};

/// The step of a file's processing that failed.
#[derive(Error, Debug)]
pub enum StepError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// A failure while processing one file of a batch.
#[derive(Error, Debug)]
#[error("{source}")]
pub struct PipelineError {
    /// 1-based position of the file in the batch.
    pub index: usize,
    pub filename: String,
    pub source: StepError,
}

impl PipelineError {
    /// Message shown to the person who submitted the batch.
    pub fn user_message(&self) -> String {
        format!("Error processing image: {}", self.source)
    }
}

/// Result or error for one file, in best-effort mode.
#[derive(Debug)]
pub struct FileOutcome {
    pub filename: String,
    pub result: Result<String, PipelineError>,
}

pub struct ExtractionPipeline {
    uploader: StorageUploader,
    model: Arc<dyn VisionModel>,
    prompt: String,
    default_mime_type: String,
    upload_mode: UploadMode,
    failure_policy: FailurePolicy,
    queue: Option<UploadQueue>,
}

impl ExtractionPipeline {
    /// Build a pipeline. In background upload mode this spawns the upload
    /// worker, so it must run inside a Tokio runtime.
    pub fn new(
        uploader: StorageUploader,
        model: Arc<dyn VisionModel>,
        config: &Config,
    ) -> Self {
        let queue = match config.upload_mode {
            UploadMode::Background => Some(UploadQueue::new(uploader.clone())),
            UploadMode::Blocking => None,
        };
        Self {
            uploader,
            model,
            prompt: config.prompt.clone(),
            default_mime_type: config.default_mime_type.clone(),
            upload_mode: config.upload_mode,
            failure_policy: config.failure_policy,
            queue,
        }
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    pub fn upload_mode(&self) -> UploadMode {
        self.upload_mode
    }

    /// Process every file, aborting on the first failure.
    ///
    /// Files after a failing one are never touched and no partial output is
    /// returned.
    pub async fn extract(&self, files: &[UploadedFile]) -> Result<String, PipelineError> {
        let mut texts = Vec::with_capacity(files.len());
        for (i, file) in files.iter().enumerate() {
            texts.push(self.process_file(i + 1, file).await?);
        }
        Ok(texts.join("\n"))
    }

    /// Process every file regardless of earlier failures.
    pub async fn extract_each(&self, files: &[UploadedFile]) -> Vec<FileOutcome> {
        let mut outcomes = Vec::with_capacity(files.len());
        for (i, file) in files.iter().enumerate() {
            outcomes.push(FileOutcome {
                filename: file.filename.clone(),
                result: self.process_file(i + 1, file).await,
            });
        }
        outcomes
    }

    /// Wait for queued background uploads to finish.
    pub async fn shutdown(&self) {
        if let Some(ref queue) = self.queue {
            queue.shutdown().await;
        }
    }

    async fn process_file(
        &self,
        index: usize,
        file: &UploadedFile,
    ) -> Result<String, PipelineError> {
        let fail = |source: StepError| PipelineError {
            index,
            filename: file.filename.clone(),
            source,
        };
        let mime_type = image::mime_type_for(
            file.content_type.as_deref(),
            &file.data,
            &self.default_mime_type,
        );

        match self.queue {
            Some(ref queue) => {
                queue.submit(UploadJob {
                    filename: file.filename.clone(),
                    data: file.data.clone(),
                    content_type: mime_type.to_string(),
                });
            }
            None => {
                let url = self
                    .uploader
                    .upload(file.data.clone(), &file.filename, mime_type)
                    .await
                    .map_err(|e| fail(e.into()))?;
                tracing::debug!(index, filename = %file.filename, %url, "image stored");
            }
        }

        let parts = [
            Part::Text(self.prompt.clone()),
            Part::InlineImage {
                mime_type: mime_type.to_string(),
                data: file.data.clone(),
            },
        ];
        let text = self
            .model
            .generate(&parts)
            .await
            .map_err(|e| fail(e.into()))?;

        tracing::info!(index, filename = %file.filename, chars = text.len(), "extracted");
        Ok(text)
    }
}
