//! The five core chunked-upload endpoints. Handler shape (state
//! extraction, `Result<impl IntoResponse>`, `#[utoipa::path]` docs) is
//! grounded on the teacher's `api/upload.rs`; the session/finalize
//! semantics come from `upload::session` and `upload::finalize`.

use crate::api::AppState;
use crate::auth::AuthContext;
use crate::error::{Error, Result};
use crate::upload::finalize::FinalizePipeline;
use crate::upload::session::InitiateUpload;
use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
pub struct InitiateUploadRequest {
    pub file_name: String,
    pub file_type: String,
    pub gallery_name: String,
    pub guild_id: String,
    pub total_size: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InitiateUploadResponse {
    pub upload_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UploadChunkResponse {
    pub success: bool,
    pub index: u32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChunkQuery {
    pub upload_id: String,
    pub index: u32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct FinalizeRequest {
    pub upload_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FinalizeResponse {
    pub success: bool,
    pub file_path: String,
    pub checksums: FinalizeChecksums,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FinalizeChecksums {
    pub crc32: String,
    pub md5: String,
}

/// Open a chunked upload session. `requiresGuildMembership` is resolved
/// from the request body per spec.md §4.7.
#[utoipa::path(
    post,
    path = "/uploads/initiate",
    request_body = InitiateUploadRequest,
    responses(
        (status = 201, description = "Upload session created", body = InitiateUploadResponse),
        (status = 400, description = "Invalid request"),
    ),
    tag = "uploads"
)]
pub async fn initiate_upload(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Json(req): Json<InitiateUploadRequest>,
) -> Result<impl IntoResponse> {
    crate::auth::require_guild_membership(&ctx, &req.guild_id)?;

    if req.total_size == 0 {
        return Err(Error::invalid("total_size must be greater than zero"));
    }

    state.gallery_directory.ensure(&req.guild_id, &req.gallery_name);

    let upload_id = state
        .upload_sessions
        .initiate(InitiateUpload {
            file_name: req.file_name,
            file_type: req.file_type,
            gallery_name: req.gallery_name,
            guild_id: req.guild_id,
            total_size: req.total_size,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(InitiateUploadResponse { upload_id })))
}

/// Append one chunk. The request body is capped by `DefaultBodyLimit` at
/// the configured `max_chunk_size` before this handler ever sees it.
#[utoipa::path(
    post,
    path = "/uploads/chunk",
    params(
        ("upload_id" = String, Query, description = "Upload session id"),
        ("index" = u32, Query, description = "Zero-based chunk index"),
    ),
    request_body(content = Vec<u8>, content_type = "application/octet-stream"),
    responses(
        (status = 200, description = "Chunk stored", body = UploadChunkResponse),
        (status = 400, description = "Invalid chunk"),
        (status = 404, description = "Unknown upload session"),
        (status = 413, description = "Chunk exceeds max_chunk_size"),
    ),
    tag = "uploads"
)]
pub async fn upload_chunk(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChunkQuery>,
    body: Bytes,
) -> Result<impl IntoResponse> {
    if body.len() as u64 > state.config.server.max_chunk_size {
        return Err(Error::PayloadTooLarge {
            msg: format!("chunk exceeds max_chunk_size of {} bytes", state.config.server.max_chunk_size),
        });
    }

    state.upload_sessions.save_chunk(&query.upload_id, query.index, &body).await?;

    Ok(Json(UploadChunkResponse { success: true, index: query.index }))
}

/// Assemble staged chunks, upload to the object store, verify the
/// checksum round trip, and enqueue the gradient job.
#[utoipa::path(
    post,
    path = "/uploads/finalize",
    request_body = FinalizeRequest,
    responses(
        (status = 200, description = "Upload finalized", body = FinalizeResponse),
        (status = 400, description = "Invalid upload"),
        (status = 404, description = "Unknown upload session"),
        (status = 500, description = "Checksum mismatch or storage failure"),
    ),
    tag = "uploads"
)]
pub async fn finalize_upload(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FinalizeRequest>,
) -> Result<impl IntoResponse> {
    let pipeline = FinalizePipeline {
        sessions: state.upload_sessions.clone(),
        gallery_directory: state.gallery_directory.clone(),
        object_store: state.object_store.clone(),
        meta_store: state.meta_store.clone(),
        gradient_enqueuer: state.gradient_enqueuer.clone(),
    };

    let outcome = pipeline.finalize(&req.upload_id).await?;

    Ok(Json(FinalizeResponse {
        success: true,
        file_path: outcome.storage_key,
        checksums: FinalizeChecksums { crc32: outcome.crc32_base64, md5: outcome.md5_base64 },
    }))
}

#[utoipa::path(
    get,
    path = "/uploads/{upload_id}/progress",
    params(("upload_id" = String, Path, description = "Upload session id")),
    responses(
        (status = 200, description = "Upload progress", body = crate::upload::UploadProgress),
        (status = 404, description = "Unknown or expired upload session"),
    ),
    tag = "uploads"
)]
pub async fn get_progress(
    State(state): State<Arc<AppState>>,
    Path(upload_id): Path<String>,
) -> Result<impl IntoResponse> {
    let progress = state.upload_sessions.get_progress(&upload_id).await?;
    Ok(Json(progress))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CancelUploadResponse {
    pub success: bool,
}

#[utoipa::path(
    delete,
    path = "/uploads/{upload_id}",
    params(("upload_id" = String, Path, description = "Upload session id")),
    responses((status = 200, description = "Upload cancelled", body = CancelUploadResponse)),
    tag = "uploads"
)]
pub async fn cancel_upload(
    State(state): State<Arc<AppState>>,
    Path(upload_id): Path<String>,
) -> Result<impl IntoResponse> {
    state.upload_sessions.cleanup(&upload_id).await?;
    Ok(Json(CancelUploadResponse { success: true }))
}
