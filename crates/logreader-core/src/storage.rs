//! Object storage for uploaded images.
//!
//! Uses raw reqwest against the Cloud Storage JSON API, no cloud SDK needed.
//! Objects are written with a Firebase download token in their metadata so a
//! non-expiring retrieval URL can be derived without another round trip.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use uuid::Uuid;

use crate::credentials::{CredentialError, TokenProvider};

pub const GCS_UPLOAD_ENDPOINT: &str = "https://storage.googleapis.com";
pub const FIREBASE_DOWNLOAD_ENDPOINT: &str = "https://firebasestorage.googleapis.com";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("storage returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error(transparent)]
    Credentials(#[from] CredentialError),
    #[error("{0}")]
    Backend(String),
}

/// A blob that has been written to a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bucket: String,
    pub key: String,
    /// Token granting unauthenticated read access, if the backend issues one.
    pub download_token: Option<String>,
}

/// A bucket that can accept new objects.
pub trait ObjectStore: Send + Sync {
    /// Write `data` under `key`, replacing nothing: keys are expected to be fresh.
    fn put<'a>(
        &'a self,
        key: &'a str,
        data: Bytes,
        content_type: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<StoredObject, StorageError>> + Send + 'a>>;

    /// URL that retrieves `object` without further authentication.
    fn retrieval_url(&self, object: &StoredObject) -> String;
}

/// Compose a storage key: `<prefix><uuid>-<original filename>`.
///
/// The identifier is freshly generated on every call, so identical filenames
/// never collide.
pub fn object_key(prefix: &str, filename: &str) -> String {
    format!("{prefix}{}-{filename}", Uuid::new_v4())
}

/// Persists uploaded images under unique keys.
#[derive(Clone)]
pub struct StorageUploader {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl StorageUploader {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    /// Store `data` under a new key derived from `filename` and return its
    /// retrieval URL.
    pub async fn upload(
        &self,
        data: Bytes,
        filename: &str,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let key = object_key(&self.prefix, filename);
        let size = data.len();
        let object = self.store.put(&key, data, content_type).await?;
        tracing::debug!(bucket = %object.bucket, key = %object.key, size, "stored upload");
        Ok(self.store.retrieval_url(&object))
    }
}

/// Google Cloud Storage bucket (as provisioned by Firebase).
pub struct GcsStore {
    client: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
    bucket: String,
    upload_endpoint: String,
    download_endpoint: String,
}

impl GcsStore {
    pub fn new(
        client: reqwest::Client,
        tokens: Arc<dyn TokenProvider>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            client,
            tokens,
            bucket: bucket.into(),
            upload_endpoint: GCS_UPLOAD_ENDPOINT.to_string(),
            download_endpoint: FIREBASE_DOWNLOAD_ENDPOINT.to_string(),
        }
    }

    /// Point uploads and retrieval URLs at different hosts (emulators, tests).
    pub fn with_endpoints(
        mut self,
        upload_endpoint: impl Into<String>,
        download_endpoint: impl Into<String>,
    ) -> Self {
        self.upload_endpoint = upload_endpoint.into().trim_end_matches('/').to_string();
        self.download_endpoint = download_endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

/// Build a `multipart/related` body: JSON metadata part followed by the media.
fn related_body(
    boundary: &str,
    metadata: &serde_json::Value,
    content_type: &str,
    data: &[u8],
) -> Vec<u8> {
    let mut body = Vec::with_capacity(data.len() + 512);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata.to_string().as_bytes());
    body.extend_from_slice(format!("\r\n--{boundary}\r\n").as_bytes());
    body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

impl ObjectStore for GcsStore {
    fn put<'a>(
        &'a self,
        key: &'a str,
        data: Bytes,
        content_type: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<StoredObject, StorageError>> + Send + 'a>> {
        Box::pin(async move {
            let token = self.tokens.access_token().await?;
            let download_token = Uuid::new_v4().to_string();
            let metadata = serde_json::json!({
                "name": key,
                "contentType": content_type,
                "metadata": { "firebaseStorageDownloadTokens": download_token },
            });
            let boundary = format!("logreader-{}", Uuid::new_v4().simple());
            let body = related_body(&boundary, &metadata, content_type, &data);

            let url = format!(
                "{}/upload/storage/v1/b/{}/o?uploadType=multipart",
                self.upload_endpoint,
                urlencoding::encode(&self.bucket)
            );

            let resp = self
                .client
                .post(&url)
                .bearer_auth(token)
                .header(
                    CONTENT_TYPE,
                    format!("multipart/related; boundary={boundary}"),
                )
                .body(body)
                .send()
                .await?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(StorageError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            Ok(StoredObject {
                bucket: self.bucket.clone(),
                key: key.to_string(),
                download_token: Some(download_token),
            })
        })
    }

    fn retrieval_url(&self, object: &StoredObject) -> String {
        let mut url = format!(
            "{}/v0/b/{}/o/{}?alt=media",
            self.download_endpoint,
            urlencoding::encode(&object.bucket),
            urlencoding::encode(&object.key)
        );
        if let Some(ref token) = object.download_token {
            url.push_str(&format!("&token={}", urlencoding::encode(token)));
        }
        url
    }
}
