//! Vision-capable generative model client.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::credentials::{CredentialError, TokenProvider};

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("model returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("model returned no text (finish reason: {})", .finish_reason.as_deref().unwrap_or("unknown"))]
    NoText { finish_reason: Option<String> },
    #[error(transparent)]
    Credentials(#[from] CredentialError),
    #[error("{0}")]
    Backend(String),
}

/// One part of a single-turn prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Text(String),
    InlineImage { mime_type: String, data: Bytes },
}

/// A model that turns a text instruction plus images into text.
pub trait VisionModel: Send + Sync {
    fn generate<'a>(
        &'a self,
        parts: &'a [Part],
    ) -> Pin<Box<dyn Future<Output = Result<String, ModelError>> + Send + 'a>>;
}

// ── Wire format ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<WirePart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WirePart {
    Text {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    InlineData {
        inline_data: Blob,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Blob {
    mime_type: String,
    data: String,
}

impl From<&Part> for WirePart {
    fn from(part: &Part) -> Self {
        match part {
            Part::Text(text) => WirePart::Text { text: text.clone() },
            Part::InlineImage { mime_type, data } => WirePart::InlineData {
                inline_data: Blob {
                    mime_type: mime_type.clone(),
                    data: STANDARD.encode(data),
                },
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GenerateContentResponse {
    /// Concatenated text of the first candidate.
    fn into_text(self) -> Result<String, ModelError> {
        let block_reason = self.prompt_feedback.and_then(|f| f.block_reason);
        let Some(candidate) = self.candidates.into_iter().next() else {
            return Err(ModelError::NoText {
                finish_reason: block_reason,
            });
        };

        let texts: Vec<String> = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if texts.is_empty() {
            return Err(ModelError::NoText {
                finish_reason: candidate.finish_reason.or(block_reason),
            });
        }
        Ok(texts.concat())
    }
}

// ── Vertex AI ───────────────────────────────────────────────────────────

/// Gemini served from Vertex AI for a given project and region.
pub struct VertexGemini {
    client: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
    endpoint: String,
    project: String,
    location: String,
    model: String,
}

impl VertexGemini {
    pub fn new(
        client: reqwest::Client,
        tokens: Arc<dyn TokenProvider>,
        project: impl Into<String>,
        location: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let location = location.into();
        Self {
            client,
            tokens,
            endpoint: format!("https://{location}-aiplatform.googleapis.com"),
            project: project.into(),
            location,
            model: model.into(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn url(&self) -> String {
        format!(
            "{}/v1/projects/{}/locations/{}/publishers/google/models/{}:generateContent",
            self.endpoint, self.project, self.location, self.model
        )
    }
}

impl VisionModel for VertexGemini {
    fn generate<'a>(
        &'a self,
        parts: &'a [Part],
    ) -> Pin<Box<dyn Future<Output = Result<String, ModelError>> + Send + 'a>> {
        Box::pin(async move {
            let token = self.tokens.access_token().await?;
            let request = GenerateContentRequest {
                contents: vec![Content {
                    role: "user",
                    parts: parts.iter().map(WirePart::from).collect(),
                }],
            };

            let resp = self
                .client
                .post(self.url())
                .bearer_auth(token)
                .json(&request)
                .send()
                .await?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(ModelError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            let response: GenerateContentResponse = resp.json().await?;
            let text = response.into_text()?;
            tracing::debug!(model = %self.model, chars = text.len(), "model responded");
            Ok(text)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticToken;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> VertexGemini {
        VertexGemini::new(
            reqwest::Client::new(),
            Arc::new(StaticToken("tok".into())),
            "demo",
            "us-central1",
            "gemini-pro-vision",
        )
        .with_endpoint(server.uri())
    }

    fn prompt() -> Vec<Part> {
        vec![
            Part::Text("Extract all relevant information from the document".into()),
            Part::InlineImage {
                mime_type: "image/png".into(),
                data: Bytes::from_static(b"hello"),
            },
        ]
    }

    #[test]
    fn default_endpoint_is_regional() {
        let model = VertexGemini::new(
            reqwest::Client::new(),
            Arc::new(StaticToken("t".into())),
            "demo",
            "europe-west4",
            "gemini-1.5-flash",
        );
        assert_eq!(
            model.url(),
            "https://europe-west4-aiplatform.googleapis.com/v1/projects/demo/locations/europe-west4/publishers/google/models/gemini-1.5-flash:generateContent"
        );
    }

    #[tokio::test]
    async fn sends_single_turn_with_inline_image() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(
                "/v1/projects/demo/locations/us-central1/publishers/google/models/gemini-pro-vision:generateContent",
            ))
            .and(header("authorization", "Bearer tok"))
            .and(body_json(serde_json::json!({
                "contents": [{
                    "role": "user",
                    "parts": [
                        { "text": "Extract all relevant information from the document" },
                        { "inlineData": { "mimeType": "image/png", "data": "aGVsbG8=" } }
                    ]
                }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{
                    "content": { "role": "model", "parts": [{ "text": "Name: " }, { "text": "Alice" }] },
                    "finishReason": "STOP"
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let text = client_for(&server).generate(&prompt()).await.unwrap();
        assert_eq!(text, "Name: Alice");
    }

    #[tokio::test]
    async fn safety_block_is_no_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{ "finishReason": "SAFETY" }]
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).generate(&prompt()).await.unwrap_err();
        assert!(matches!(
            err,
            ModelError::NoText { finish_reason: Some(ref r) } if r == "SAFETY"
        ));
        assert_eq!(err.to_string(), "model returned no text (finish reason: SAFETY)");
    }

    #[tokio::test]
    async fn blocked_prompt_reports_block_reason() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "promptFeedback": { "blockReason": "OTHER" }
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).generate(&prompt()).await.unwrap_err();
        assert!(err.to_string().contains("OTHER"));
    }

    #[tokio::test]
    async fn http_error_carries_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("model not found"))
            .mount(&server)
            .await;

        let err = client_for(&server).generate(&prompt()).await.unwrap_err();
        assert!(matches!(err, ModelError::Status { status: 404, .. }));
        assert!(err.to_string().contains("model not found"));
    }
}
