use std::sync::Arc;

use logreader_core::{BackendFactory, CoreError, ExtractionPipeline};
use tokio::sync::OnceCell;

/// Shared application state accessible from all handlers.
pub struct AppState {
    factory: Arc<dyn BackendFactory>,
    /// Built on the first extraction request. Concurrent first requests wait
    /// on the same initialization; a failed attempt leaves the cell empty.
    pipeline: OnceCell<Arc<ExtractionPipeline>>,
}

impl AppState {
    pub fn new(factory: Arc<dyn BackendFactory>) -> Self {
        Self {
            factory,
            pipeline: OnceCell::new(),
        }
    }

    /// The shared pipeline, building it on first use.
    pub async fn pipeline(&self) -> Result<Arc<ExtractionPipeline>, CoreError> {
        self.pipeline
            .get_or_try_init(|| async {
                tracing::info!("initializing extraction backend");
                self.factory.build().map(Arc::new)
            })
            .await
            .cloned()
    }

    /// Flush background uploads if the pipeline was ever built.
    pub async fn shutdown(&self) {
        if let Some(pipeline) = self.pipeline.get() {
            pipeline.shutdown().await;
        }
    }
}
