use std::sync::Arc;
use std::time::Duration;

use crate::credentials::{self, ServiceAccountTokens, StaticToken, TokenProvider};
use crate::model::VertexGemini;
use crate::pipeline::ExtractionPipeline;
use crate::storage::{GcsStore, StorageUploader};
use crate::{Config, CoreError};

/// Builds the extraction pipeline and the clients it talks through.
///
/// This is where credentials are loaded, so callers run it once per process
/// and share the result.
pub trait BackendFactory: Send + Sync {
    fn build(&self) -> Result<ExtractionPipeline, CoreError>;
}

/// Cloud Storage + Vertex AI, authorized by one service account.
pub struct GoogleCloudBackend {
    config: Config,
}

impl GoogleCloudBackend {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl BackendFactory for GoogleCloudBackend {
    fn build(&self) -> Result<ExtractionPipeline, CoreError> {
        let config = &self.config;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;

        let (tokens, key_project): (Arc<dyn TokenProvider>, Option<String>) =
            match config.access_token {
                Some(ref token) => (Arc::new(StaticToken(token.clone())), None),
                None => {
                    let key = credentials::load_service_account(&config.credentials_path)?;
                    tracing::info!(
                        path = %config.credentials_path.display(),
                        client_email = %key.client_email,
                        "loaded service account"
                    );
                    let project = key.project_id.clone();
                    (
                        Arc::new(ServiceAccountTokens::new(key, client.clone())),
                        project,
                    )
                }
            };

        let project = config.project_id.clone().or(key_project).ok_or_else(|| {
            CoreError::Config(
                "no project id: set LOGREADER_PROJECT or use a key file with project_id".into(),
            )
        })?;
        let bucket = config
            .bucket
            .clone()
            .unwrap_or_else(|| format!("{project}.appspot.com"));

        let store = GcsStore::new(client.clone(), tokens.clone(), bucket)
            .with_endpoints(&config.upload_endpoint, &config.download_endpoint);
        let mut model = VertexGemini::new(
            client,
            tokens,
            project.clone(),
            config.location.clone(),
            config.model.clone(),
        );
        if let Some(ref endpoint) = config.model_endpoint {
            model = model.with_endpoint(endpoint);
        }

        tracing::info!(
            project = %project,
            bucket = %store.bucket(),
            model = %config.model,
            upload_mode = ?config.upload_mode,
            failure_policy = ?config.failure_policy,
            "extraction backend ready"
        );

        let uploader = StorageUploader::new(Arc::new(store), config.key_prefix.clone());
        Ok(ExtractionPipeline::new(uploader, Arc::new(model), config))
    }
}
