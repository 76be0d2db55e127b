use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};

use crate::app::AppState;
use crate::error::AppError;

pub(crate) fn is_safe_media_file_name(value: &str) -> bool {
    !value.is_empty()
        && !value.contains('/')
        && !value.contains('\\')
        && !value.contains("..")
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

fn content_type_for(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit('.')
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

/// Serves generated documents by their opaque file name.
pub async fn serve_stored_media(
    Path(file_name): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, AppError> {
    if !is_safe_media_file_name(&file_name) {
        return Err(AppError::validation("fileName", "invalid media file name"));
    }
    let bytes = tokio::fs::read(state.media_storage_dir.join(&file_name))
        .await
        .map_err(|_| AppError::NotFound("media file not found".to_string()))?;

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000, immutable"),
    );
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for(&file_name)),
    );
    Ok(response.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_names_are_rejected() {
        assert!(is_safe_media_file_name("3f2a-44.pdf"));
        assert!(!is_safe_media_file_name("../secrets.env"));
        assert!(!is_safe_media_file_name("a/b.pdf"));
        assert!(!is_safe_media_file_name(""));
    }

    #[test]
    fn pdfs_are_served_as_pdf() {
        assert_eq!(content_type_for("quote.PDF"), "application/pdf");
        assert_eq!(content_type_for("blob"), "application/octet-stream");
    }
}
