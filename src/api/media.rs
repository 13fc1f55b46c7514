//! Streams a previously-uploaded image back out of the object store.
//! Grounded on `src/repo/mod.rs::serve_file`: route to storage, infer
//! content type, 404 on anything missing, instead of disk I/O route to
//! the `ObjectStore`.

use crate::api::AppState;
use crate::error::{Error, Result};
use crate::gallery::gallery_by_slug;
use axum::{
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct MediaQuery {
    pub guild_id: String,
}

/// `GET /{galleryName}/{yyyy}-{mm}-{dd}/*` — `gallery_slug` is what the
/// route actually carries (storage keys are always slug-based); the raw
/// gallery name is recovered only for the benefit of callers that still
/// pass it, via `gallery_by_slug`.
pub async fn serve_media(
    State(state): State<Arc<AppState>>,
    Path((gallery_slug, date, rest)): Path<(String, String, String)>,
    Query(query): Query<MediaQuery>,
) -> Result<impl IntoResponse> {
    if gallery_by_slug(state.gallery_directory.as_ref(), &query.guild_id, &gallery_slug).is_none() {
        return Err(Error::not_found(format!("gallery '{gallery_slug}' in guild '{}'", query.guild_id)));
    }

    let key = format!("{gallery_slug}/uploads/{date}/{rest}");
    let object = state.object_store.get(&key).await?;

    let content_type = object.content_type.unwrap_or_else(|| "application/octet-stream".to_string());

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_LENGTH, object.content_length.to_string()),
        ],
        object.bytes,
    ))
}
