use std::pin::Pin;
use std::task::{Context, Poll};

use axum::{
    body::Body,
    extract::{Multipart, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures_util::Stream;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::dto::{RenderForm, RenderUpload, ARCHIVE_FIELD};
use super::error::RenderError;
use super::service::{RenderOutput, RenderService};
use crate::common::response::{ApiError, ErrorBody};
use crate::common::upload::{multipart_error, read_field_bytes};
use crate::infrastructure::storage::workspace::Workspace;
use crate::state::AppState;

const DOWNLOAD_NAME: &str = "output.mp4";

/// Render a ZIP of frames into an MP4
#[utoipa::path(
    post,
    path = "/render",
    request_body(content = RenderUpload, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Encoded video", content_type = "video/mp4", body = Vec<u8>),
        (status = 400, description = "Bad request, unreadable archive or no usable frame", body = ErrorBody),
        (status = 413, description = "Upload too large"),
        (status = 422, description = "A frame could not be normalized", body = ErrorBody),
        (status = 500, description = "Encoder failed", body = ErrorBody),
        (status = 503, description = "Encoder not installed", body = ErrorBody),
        (status = 504, description = "Encoder deadline expired", body = ErrorBody)
    ),
    tag = "Render"
)]
pub async fn render(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut form = RenderForm::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or("").to_string();

        if name == ARCHIVE_FIELD {
            let file_name = field.file_name().unwrap_or("frames.zip").to_string();
            let archive = read_field_bytes(field).await.map_err(multipart_error)?;
            info!(file_name = %file_name, bytes = archive.len(), "archive received");
            form.archive = Some(archive);
        } else if field.file_name().is_some() {
            // Stray file parts are drained and dropped.
            read_field_bytes(field).await.map_err(multipart_error)?;
        } else {
            let value = field.text().await.map_err(multipart_error)?;
            form.set_text(&name, value);
        }
    }

    let (archive, overrides) = form.into_parts().inspect_err(|e| {
        warn!("rejected render request: {}", e);
    })?;

    let output = RenderService::render(&state, archive, overrides).await?;
    video_response(output).await
}

async fn video_response(output: RenderOutput) -> Result<Response, ApiError> {
    let file = tokio::fs::File::open(&output.path)
        .await
        .map_err(|e| ApiError::from(RenderError::from(e)))?;

    let RenderOutput {
        job_id,
        size,
        workspace,
        ..
    } = output;

    let headers = [
        (header::CONTENT_TYPE, HeaderValue::from_static("video/mp4")),
        (
            header::CONTENT_DISPOSITION,
            HeaderValue::from_static("attachment; filename=\"output.mp4\""),
        ),
        (header::CONTENT_LENGTH, HeaderValue::from(size)),
    ];
    debug!(job_id = %job_id, file = DOWNLOAD_NAME, size, "streaming video");

    let body = Body::from_stream(WorkspaceStream {
        inner: ReaderStream::new(file),
        job_id,
        sent: 0,
        size,
        _workspace: workspace,
    });

    Ok((headers, body).into_response())
}

/// Response body that owns the job's workspace.
///
/// Hyper drops the body once it has been written out or the connection is
/// gone, and the workspace goes with it.
struct WorkspaceStream<S> {
    inner: S,
    job_id: Uuid,
    sent: u64,
    size: u64,
    _workspace: Workspace,
}

impl<S> Stream for WorkspaceStream<S>
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin,
{
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = Pin::new(&mut self.inner).poll_next(cx);
        if let Poll::Ready(Some(Ok(chunk))) = &polled {
            self.sent += chunk.len() as u64;
        }
        polled
    }
}

impl<S> Drop for WorkspaceStream<S> {
    fn drop(&mut self) {
        if self.sent < self.size {
            info!(
                job_id = %self.job_id,
                sent = self.sent,
                size = self.size,
                "response aborted before the video was fully sent"
            );
        } else {
            debug!(job_id = %self.job_id, "video delivered");
        }
    }
}
