use axum::extract::multipart::{Field, MultipartError};
use axum::http::StatusCode;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use tracing::{debug, warn};

use crate::common::response::ApiError;

/// Buffers a binary multipart field in memory. The body limit layer caps how big this gets.
pub async fn read_field_bytes(mut field: Field<'_>) -> Result<Bytes, MultipartError> {
    let mut buffer = BytesMut::new();

    while let Some(chunk) = field.next().await {
        buffer.extend_from_slice(&chunk?);
    }

    debug!(bytes = buffer.len(), "multipart field received");
    Ok(buffer.freeze())
}

/// Oversized bodies keep their 413; anything else is a malformed request.
pub fn multipart_error(e: MultipartError) -> ApiError {
    let status = e.status();
    warn!("multipart error: {}", e.body_text());

    if status == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::new(status, "payload_too_large", Some(e.body_text()))
    } else {
        ApiError::new(StatusCode::BAD_REQUEST, "invalid_request", Some(e.body_text()))
    }
}
