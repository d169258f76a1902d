use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use logreader_core::{CoreError, PipelineError};
use thiserror::Error;

use crate::template;

/// Everything that can end an extraction request early.
///
/// Each variant renders the index page with a message in the output area.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("No images uploaded")]
    NoImages,
    #[error("No file selected")]
    NoFileSelected,
    /// The form body could not be read. Oversized bodies carry 413.
    #[error("{message}")]
    Multipart { message: String, status: StatusCode },
    /// The storage/model clients could not be initialized.
    #[error("Error processing image: {0}")]
    Backend(#[from] CoreError),
    #[error("Error processing image: {0}")]
    Pipeline(#[from] PipelineError),
}

impl ExtractError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ExtractError::NoImages | ExtractError::NoFileSelected => StatusCode::BAD_REQUEST,
            ExtractError::Multipart { status, .. } => *status,
            ExtractError::Backend(_) | ExtractError::Pipeline(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ExtractError {
    fn into_response(self) -> Response {
        (self.status_code(), template::render_index(&self.to_string())).into_response()
    }
}
