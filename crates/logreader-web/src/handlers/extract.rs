use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

use logreader_core::{FailurePolicy, FileOutcome};

use crate::error::ExtractError;
use crate::state::AppState;
use crate::template;
use crate::upload;

pub async fn extract_info(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ExtractError> {
    // A body that is not multipart/form-data cannot carry the images field.
    let multipart = multipart.map_err(|rejection| {
        tracing::info!(reason = %rejection.body_text(), "rejected non-multipart request");
        ExtractError::NoImages
    })?;
    let files = upload::parse_multipart(multipart).await.inspect_err(|e| {
        tracing::info!(reason = %e, "rejected extraction request");
    })?;
    tracing::info!(files = files.len(), "extraction requested");

    let pipeline = state.pipeline().await.inspect_err(|e| {
        tracing::error!(error = %e, "failed to initialize extraction backend");
    })?;

    match pipeline.failure_policy() {
        FailurePolicy::FailFast => {
            let text = pipeline.extract(&files).await.inspect_err(|e| {
                tracing::error!(
                    index = e.index,
                    filename = %e.filename,
                    error = %e,
                    "extraction failed"
                );
            })?;
            Ok(template::render_index(&text).into_response())
        }
        FailurePolicy::BestEffort => {
            let outcomes = pipeline.extract_each(&files).await;
            Ok(render_outcomes(&outcomes))
        }
    }
}

/// One line per file in submission order; failed files show their error.
/// Only a batch where every file failed is a server error.
fn render_outcomes(outcomes: &[FileOutcome]) -> Response {
    let mut lines = Vec::with_capacity(outcomes.len());
    let mut failures = 0;
    for outcome in outcomes {
        match outcome.result {
            Ok(ref text) => lines.push(text.clone()),
            Err(ref e) => {
                failures += 1;
                tracing::error!(
                    index = e.index,
                    filename = %e.filename,
                    error = %e,
                    "extraction failed"
                );
                lines.push(format!("{}: {}", outcome.filename, e.user_message()));
            }
        }
    }

    let status = if !outcomes.is_empty() && failures == outcomes.len() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    (status, template::render_index(&lines.join("\n"))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router;
    use axum::body::Body;
    use axum::http::{Request, header};
    use logreader_core::mock::{MockModel, MockReply, MockStore};
    use logreader_core::{
        BackendFactory, Config, CoreError, ExtractionPipeline, StorageUploader, UploadMode,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    const BOUNDARY: &str = "XyZboundary";

    /// Builds pipelines over shared mocks and counts how often it was asked to.
    struct CountingFactory {
        config: Config,
        store: Arc<MockStore>,
        model: Arc<MockModel>,
        builds: AtomicUsize,
        fail: bool,
    }

    impl CountingFactory {
        fn new(model: MockModel) -> Self {
            Self::with_store(MockStore::new(), model)
        }

        fn with_store(store: MockStore, model: MockModel) -> Self {
            Self {
                config: Config {
                    upload_mode: UploadMode::Blocking,
                    ..Config::default()
                },
                store: Arc::new(store),
                model: Arc::new(model),
                builds: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn best_effort(mut self) -> Self {
            self.config.failure_policy = FailurePolicy::BestEffort;
            self
        }

        fn background(mut self) -> Self {
            self.config.upload_mode = UploadMode::Background;
            self
        }

        fn broken(mut self) -> Self {
            self.fail = true;
            self
        }

        fn builds(&self) -> usize {
            self.builds.load(Ordering::SeqCst)
        }

        fn backend_calls(&self) -> usize {
            self.store.call_count() + self.model.call_count()
        }
    }

    impl BackendFactory for CountingFactory {
        fn build(&self) -> Result<ExtractionPipeline, CoreError> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CoreError::Config("credential file missing".into()));
            }
            Ok(ExtractionPipeline::new(
                StorageUploader::new(self.store.clone(), self.config.key_prefix.clone()),
                self.model.clone(),
                &self.config,
            ))
        }
    }

    fn app(factory: &Arc<CountingFactory>) -> axum::Router {
        let state = Arc::new(AppState::new(factory.clone()));
        router(state, 10 * 1024 * 1024)
    }

    /// A multipart body with one part per `(field, filename, data)`.
    fn multipart_body(parts: &[(&str, &str, &str)]) -> Vec<u8> {
        let mut body = Vec::new();
        for (field, filename, data) in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
            body.extend_from_slice(data.as_bytes());
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn post(body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/extract-info")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn send(app: axum::Router, req: Request<Body>) -> (StatusCode, String) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn two_images_render_in_order() {
        let factory = Arc::new(CountingFactory::new(MockModel::texts([
            "Name: Alice",
            "Name: Bob",
        ])));
        let body = multipart_body(&[("images", "a.png", "AAA"), ("images", "b.png", "BBB")]);

        let (status, html) = send(app(&factory), post(body)).await;

        assert_eq!(status, StatusCode::OK);
        assert!(html.contains("Name: Alice\nName: Bob"));
        assert_eq!(factory.store.call_count(), 2);
    }

    #[tokio::test]
    async fn missing_images_field_is_rejected_without_backend() {
        let factory = Arc::new(CountingFactory::new(MockModel::texts(["unused"])));
        let body = multipart_body(&[("other", "notes.txt", "hello")]);

        let (status, html) = send(app(&factory), post(body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(html.contains("No images uploaded"));
        assert_eq!(factory.builds(), 0);
        assert_eq!(factory.backend_calls(), 0);
    }

    #[tokio::test]
    async fn non_multipart_post_renders_page_without_backend() {
        let factory = Arc::new(CountingFactory::new(MockModel::texts(["unused"])));

        let urlencoded = Request::builder()
            .method("POST")
            .uri("/api/extract-info")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("x=1"))
            .unwrap();
        let bare = Request::builder()
            .method("POST")
            .uri("/api/extract-info")
            .body(Body::empty())
            .unwrap();

        for req in [urlencoded, bare] {
            let (status, html) = send(app(&factory), req).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert!(html.contains("<form"));
            assert!(html.contains("No images uploaded"));
        }
        assert_eq!(factory.builds(), 0);
        assert_eq!(factory.backend_calls(), 0);
    }

    #[tokio::test]
    async fn oversized_body_is_payload_too_large() {
        let factory = Arc::new(CountingFactory::new(MockModel::texts(["unused"])));
        let state = Arc::new(AppState::new(factory.clone()));
        let big = "A".repeat(4096);
        let body = multipart_body(&[("images", "big.png", big.as_str())]);

        let (status, html) = send(router(state, 256), post(body)).await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(html.contains("<form"));
        assert_eq!(factory.builds(), 0);
    }

    #[tokio::test]
    async fn blank_file_picker_is_rejected_without_backend() {
        let factory = Arc::new(CountingFactory::new(MockModel::texts(["unused"])));
        let body = multipart_body(&[("images", "", "")]);

        let (status, html) = send(app(&factory), post(body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(html.contains("No file selected"));
        assert_eq!(factory.builds(), 0);
        assert_eq!(factory.backend_calls(), 0);
    }

    #[tokio::test]
    async fn kth_failure_aborts_and_hides_partial_results() {
        let factory = Arc::new(CountingFactory::new(MockModel::with_sequence(vec![
            MockReply::Text("first result".into()),
            MockReply::Error("model overloaded".into()),
            MockReply::Text("third result".into()),
        ])));
        let body = multipart_body(&[
            ("images", "1.png", "1"),
            ("images", "2.png", "2"),
            ("images", "3.png", "3"),
        ]);

        let (status, html) = send(app(&factory), post(body)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(html.contains("Error processing image: model overloaded"));
        assert!(!html.contains("first result"));
        // Files 1 and 2 reached storage and the model; file 3 reached neither.
        assert_eq!(factory.store.call_count(), 2);
        assert_eq!(factory.model.call_count(), 2);
    }

    #[tokio::test]
    async fn storage_failure_is_a_server_error() {
        let factory = Arc::new(CountingFactory::with_store(
            MockStore::failing("bucket not found"),
            MockModel::texts(["unused"]),
        ));
        let body = multipart_body(&[("images", "a.png", "A"), ("images", "b.png", "B")]);

        let (status, html) = send(app(&factory), post(body)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(html.contains("Error processing image: bucket not found"));
        assert_eq!(factory.backend_calls(), 1);
    }

    #[tokio::test]
    async fn background_upload_failure_still_returns_text() {
        let factory = Arc::new(
            CountingFactory::with_store(
                MockStore::failing("bucket offline"),
                MockModel::texts(["Name: Alice"]),
            )
            .background(),
        );
        let state = Arc::new(AppState::new(factory.clone()));
        let body = multipart_body(&[("images", "a.png", "A")]);

        let (status, html) = send(router(state.clone(), 10 * 1024 * 1024), post(body)).await;

        assert_eq!(status, StatusCode::OK);
        assert!(html.contains("Name: Alice"));
        assert!(!html.contains("bucket offline"));

        // Draining the queue runs the failed upload without touching the response.
        state.shutdown().await;
        assert_eq!(factory.store.call_count(), 1);
        assert_eq!(factory.model.call_count(), 1);
    }

    #[tokio::test]
    async fn backend_is_initialized_once() {
        let factory = Arc::new(CountingFactory::new(MockModel::texts(["ok"])));
        let app = app(&factory);

        for _ in 0..5 {
            let body = multipart_body(&[("images", "a.png", "A")]);
            let (status, _) = send(app.clone(), post(body)).await;
            assert_eq!(status, StatusCode::OK);
        }

        assert_eq!(factory.builds(), 1);
        assert_eq!(factory.model.call_count(), 5);
    }

    #[tokio::test]
    async fn failed_initialization_is_reported_and_retried() {
        let factory = Arc::new(CountingFactory::new(MockModel::texts(["ok"])).broken());
        let app = app(&factory);

        for _ in 0..2 {
            let body = multipart_body(&[("images", "a.png", "A")]);
            let (status, html) = send(app.clone(), post(body)).await;
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            assert!(html.contains("credential file missing"));
        }
        assert_eq!(factory.builds(), 2);
    }

    #[tokio::test]
    async fn model_markup_is_escaped() {
        let factory = Arc::new(CountingFactory::new(MockModel::texts([
            "<b>Total</b> & <i>sum</i>",
        ])));
        let body = multipart_body(&[("images", "a.png", "A")]);

        let (status, html) = send(app(&factory), post(body)).await;

        assert_eq!(status, StatusCode::OK);
        assert!(!html.contains("<b>Total</b>"));
        assert!(html.contains("&lt;b&gt;Total&lt;"));
        assert!(html.contains("&amp;"));
    }

    #[tokio::test]
    async fn error_markup_is_escaped() {
        let factory = Arc::new(CountingFactory::new(MockModel::new(MockReply::Error(
            "<html>bad gateway</html>".into(),
        ))));
        let body = multipart_body(&[("images", "a.png", "A")]);

        let (status, html) = send(app(&factory), post(body)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!html.contains("<html>bad gateway"));
        assert!(html.contains("&lt;html&gt;bad gateway"));
    }

    #[tokio::test]
    async fn best_effort_reports_each_file() {
        let factory = Arc::new(
            CountingFactory::new(MockModel::with_sequence(vec![
                MockReply::Text("Name: Alice".into()),
                MockReply::Error("unreadable".into()),
            ]))
            .best_effort(),
        );
        let body = multipart_body(&[("images", "a.png", "A"), ("images", "b.png", "B")]);

        let (status, html) = send(app(&factory), post(body)).await;

        assert_eq!(status, StatusCode::OK);
        assert!(html.contains("Name: Alice\nb.png: Error processing image: unreadable"));
    }

    #[tokio::test]
    async fn best_effort_all_failed_is_server_error() {
        let factory = Arc::new(
            CountingFactory::new(MockModel::new(MockReply::Error("down".into()))).best_effort(),
        );
        let body = multipart_body(&[("images", "a.png", "A"), ("images", "b.png", "B")]);

        let (status, _) = send(app(&factory), post(body)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(factory.model.call_count(), 2);
    }

    #[tokio::test]
    async fn index_and_health() {
        let factory = Arc::new(CountingFactory::new(MockModel::texts(["unused"])));

        let (status, html) = send(
            app(&factory),
            Request::get("/").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(html.contains("Hand-Completed Log Reader"));

        let (status, text) = send(
            app(&factory),
            Request::get("/health").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(text, "ok");
        assert_eq!(factory.builds(), 0);
    }
}
