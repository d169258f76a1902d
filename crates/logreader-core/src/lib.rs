use std::path::PathBuf;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod backend;
pub mod config_file;
pub mod credentials;
pub mod image;
pub mod mock;
pub mod model;
pub mod pipeline;
pub mod storage;
pub mod upload_queue;

// Re-export for convenience
pub use backend::{BackendFactory, GoogleCloudBackend};
pub use credentials::CredentialError;
pub use model::{ModelError, Part, VisionModel};
pub use pipeline::{ExtractionPipeline, FileOutcome, PipelineError, StepError};
pub use storage::{ObjectStore, StorageError, StorageUploader, StoredObject};

/// Instruction sent alongside every image.
pub const DEFAULT_PROMPT: &str = "Extract all relevant information from the document";
pub const DEFAULT_MODEL: &str = "gemini-pro-vision";
pub const DEFAULT_LOCATION: &str = "us-central1";
pub const DEFAULT_KEY_PREFIX: &str = "user_images/";
pub const DEFAULT_MIME_TYPE: &str = "image/png";
pub const DEFAULT_PORT: u16 = 8080;

/// One image submitted in a request.
///
/// The bytes are held in memory for the lifetime of the request, so "rewinding"
/// before the model call is a cheap clone of the [`Bytes`] handle.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub data: Bytes,
    /// Content type declared by the client, if any.
    pub content_type: Option<String>,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            data: data.into(),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Where the storage upload sits relative to the extraction call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UploadMode {
    /// Upload before the model call; a storage failure fails the file.
    Blocking,
    /// Hand the upload to a background queue; storage failures are only logged.
    #[default]
    Background,
}

impl FromStr for UploadMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "blocking" => Ok(UploadMode::Blocking),
            "background" => Ok(UploadMode::Background),
            other => Err(format!(
                "unknown upload mode '{other}' (expected 'blocking' or 'background')"
            )),
        }
    }
}

/// What happens to the rest of a batch when one file fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Abort on the first failure and report only that error.
    #[default]
    FailFast,
    /// Process every file and report a result or error per file.
    BestEffort,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "fail-fast" => Ok(FailurePolicy::FailFast),
            "best-effort" => Ok(FailurePolicy::BestEffort),
            other => Err(format!(
                "unknown failure policy '{other}' (expected 'fail-fast' or 'best-effort')"
            )),
        }
    }
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("credential error: {0}")]
    Credentials(#[from] CredentialError),
    #[error("configuration error: {0}")]
    Config(String),
}

/// Resolved runtime configuration.
#[derive(Clone)]
pub struct Config {
    /// Service-account key file used to authorize storage and model calls.
    pub credentials_path: PathBuf,
    /// Pre-issued OAuth2 access token. Skips the key file when set.
    pub access_token: Option<String>,
    /// Cloud project. Falls back to the key file's `project_id`.
    pub project_id: Option<String>,
    pub location: String,
    pub model: String,
    /// Override for the model API base URL (defaults to the regional endpoint).
    pub model_endpoint: Option<String>,
    /// Storage bucket. Falls back to `<project>.appspot.com`.
    pub bucket: Option<String>,
    pub key_prefix: String,
    pub upload_endpoint: String,
    pub download_endpoint: String,
    pub upload_mode: UploadMode,
    pub prompt: String,
    pub default_mime_type: String,
    pub failure_policy: FailurePolicy,
    pub request_timeout_secs: u64,
    pub port: u16,
    pub max_upload_mb: usize,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("credentials_path", &self.credentials_path)
            .field("access_token", &self.access_token.as_ref().map(|_| "***"))
            .field("project_id", &self.project_id)
            .field("location", &self.location)
            .field("model", &self.model)
            .field("model_endpoint", &self.model_endpoint)
            .field("bucket", &self.bucket)
            .field("key_prefix", &self.key_prefix)
            .field("upload_endpoint", &self.upload_endpoint)
            .field("download_endpoint", &self.download_endpoint)
            .field("upload_mode", &self.upload_mode)
            .field("prompt", &self.prompt)
            .field("default_mime_type", &self.default_mime_type)
            .field("failure_policy", &self.failure_policy)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("port", &self.port)
            .field("max_upload_mb", &self.max_upload_mb)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            credentials_path: PathBuf::from("service-account.json"),
            access_token: None,
            project_id: None,
            location: DEFAULT_LOCATION.to_string(),
            model: DEFAULT_MODEL.to_string(),
            model_endpoint: None,
            bucket: None,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            upload_endpoint: storage::GCS_UPLOAD_ENDPOINT.to_string(),
            download_endpoint: storage::FIREBASE_DOWNLOAD_ENDPOINT.to_string(),
            upload_mode: UploadMode::default(),
            prompt: DEFAULT_PROMPT.to_string(),
            default_mime_type: DEFAULT_MIME_TYPE.to_string(),
            failure_policy: FailurePolicy::default(),
            request_timeout_secs: 120,
            port: DEFAULT_PORT,
            max_upload_mb: 50,
        }
    }
}
