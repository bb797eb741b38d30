/// HTTP serving for stored files.
///
/// `GET /files/{id}` serves a blob; when a `?token=` parameter is present
/// it is validated against the presign contract before anything is read.
/// Without a token the file is served as-is (public serving when a base
/// URL is configured).
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tracing::warn;

use crate::context::Context;
use crate::files::{FileId, FilesystemStore};
use crate::files::FileStore;

/// Build a router serving `/files/{id}` from the given store.
pub fn router(store: FilesystemStore) -> Router {
    Router::new()
        .route("/files/:id", get(serve_file))
        .with_state(store)
}

#[derive(Debug, Deserialize)]
struct ServeParams {
    token: Option<String>,
}

async fn serve_file(
    State(store): State<FilesystemStore>,
    Path(id): Path<String>,
    Query(params): Query<ServeParams>,
) -> Response {
    // A file id is a fixed-length hex slice; anything else (including
    // traversal attempts) is simply not a known file.
    let Some(file_id) = FileId::parse(&id) else {
        return (StatusCode::NOT_FOUND, "file not found").into_response();
    };

    if let Some(token) = params.token.as_deref() {
        if !store.validate_token(file_id.as_str(), token) {
            return (StatusCode::UNAUTHORIZED, "invalid or expired token").into_response();
        }
    }

    let ctx = Context::background();
    match store.retrieve(&ctx, &file_id).await {
        Ok((mut reader, meta)) => {
            let mut body = Vec::with_capacity(meta.size as usize);
            if let Err(e) = reader.read_to_end(&mut body).await {
                warn!(id = %file_id, error = %e, "failed to read stored file");
                return (StatusCode::INTERNAL_SERVER_ERROR, "read failed").into_response();
            }
            let content_type = if meta.content_type.is_empty() {
                "application/octet-stream".to_string()
            } else {
                meta.content_type
            };
            ([(header::CONTENT_TYPE, content_type)], body).into_response()
        }
        Err(e) if e.is_record_not_found() => {
            (StatusCode::NOT_FOUND, "file not found").into_response()
        }
        Err(e) => {
            warn!(id = %file_id, error = %e, "failed to serve file");
            (StatusCode::INTERNAL_SERVER_ERROR, "serve failed").into_response()
        }
    }
}
