use axum::extract::Multipart;
use axum::extract::multipart::MultipartError;
use logreader_core::UploadedFile;

use crate::error::ExtractError;

/// Multipart field carrying the images.
pub const IMAGES_FIELD: &str = "images";

/// Parse a multipart form upload into the submitted images, in order.
///
/// Browsers send one empty part with an empty filename when the file picker
/// is left blank; such parts are dropped. Other fields are ignored.
pub async fn parse_multipart(
    mut multipart: Multipart,
) -> Result<Vec<UploadedFile>, ExtractError> {
    let mut saw_images_field = false;
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error("Failed to read form field", e))?
    {
        if field.name() != Some(IMAGES_FIELD) {
            // Ignore unknown fields
            let _ = field.bytes().await;
            continue;
        }
        saw_images_field = true;

        let filename = field.file_name().unwrap_or("").to_string();
        let content_type = field.content_type().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| multipart_error("Failed to read file data", e))?;

        if filename.is_empty() && data.is_empty() {
            continue;
        }

        files.push(UploadedFile {
            filename,
            data,
            content_type,
        });
    }

    if !saw_images_field {
        return Err(ExtractError::NoImages);
    }
    if files.is_empty() {
        return Err(ExtractError::NoFileSelected);
    }
    Ok(files)
}

fn multipart_error(context: &str, e: MultipartError) -> ExtractError {
    ExtractError::Multipart {
        status: e.status(),
        message: format!("{context}: {}", e.body_text()),
    }
}
