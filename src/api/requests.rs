//! HTTP surface over `RequestService`: the user-request lifecycle
//! (create/list/view/cancel/approve/deny/close/delete) plus comments.

use crate::api::AppState;
use crate::auth::AuthContext;
use crate::error::Result;
use crate::requests::{Comment, CreateRequest, RequestAction, RequestService, UserRequest};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

#[utoipa::path(
    post,
    path = "/requests",
    request_body = CreateRequest,
    responses(
        (status = 201, description = "Request created", body = UserRequest),
        (status = 403, description = "Not an admin of the guild"),
    ),
    tag = "requests"
)]
pub async fn create_request(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Json(req): Json<CreateRequest>,
) -> Result<impl IntoResponse> {
    let service = RequestService::new(state.meta_store.as_ref());
    let request = service.create(&ctx, req).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ListRequestsQuery {
    pub guild_id: String,
}

#[utoipa::path(
    get,
    path = "/requests",
    params(("guild_id" = String, Query, description = "Guild to list requests for")),
    responses(
        (status = 200, description = "Requests in the guild", body = Vec<UserRequest>),
        (status = 403, description = "Not an admin or not a guild member"),
    ),
    tag = "requests"
)]
pub async fn list_requests(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Query(query): Query<ListRequestsQuery>,
) -> Result<impl IntoResponse> {
    let service = RequestService::new(state.meta_store.as_ref());
    let requests = service.list_for_guild(&ctx, &query.guild_id).await?;
    Ok(Json(requests))
}

#[utoipa::path(
    get,
    path = "/requests/{request_id}",
    params(("request_id" = String, Path, description = "Request id")),
    responses(
        (status = 200, description = "Request", body = UserRequest),
        (status = 403, description = "Not owner, superAdmin, or guild admin"),
        (status = 404, description = "Not found"),
    ),
    tag = "requests"
)]
pub async fn get_request(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Path(request_id): Path<String>,
) -> Result<impl IntoResponse> {
    let service = RequestService::new(state.meta_store.as_ref());
    let request = service.get_authorized(&ctx, &request_id).await?;
    Ok(Json(request))
}

#[utoipa::path(
    post,
    path = "/requests/{request_id}/cancel",
    params(("request_id" = String, Path, description = "Request id")),
    responses(
        (status = 200, description = "Request cancelled", body = UserRequest),
        (status = 400, description = "Invalid status transition"),
        (status = 403, description = "Not the owner, or not open"),
    ),
    tag = "requests"
)]
pub async fn cancel_request(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Path(request_id): Path<String>,
) -> Result<impl IntoResponse> {
    let service = RequestService::new(state.meta_store.as_ref());
    let request = service.cancel(&ctx, &request_id).await?;
    Ok(Json(request))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChangeStatusRequest {
    pub action: ChangeStatusAction,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatusAction {
    Approve,
    Deny,
    Close,
}

impl From<ChangeStatusAction> for RequestAction {
    fn from(action: ChangeStatusAction) -> Self {
        match action {
            ChangeStatusAction::Approve => RequestAction::Approve,
            ChangeStatusAction::Deny => RequestAction::Deny,
            ChangeStatusAction::Close => RequestAction::Close,
        }
    }
}

#[utoipa::path(
    post,
    path = "/requests/{request_id}/status",
    params(("request_id" = String, Path, description = "Request id")),
    request_body = ChangeStatusRequest,
    responses(
        (status = 200, description = "Status changed", body = UserRequest),
        (status = 400, description = "Invalid status transition"),
        (status = 403, description = "Not a superAdmin"),
    ),
    tag = "requests"
)]
pub async fn change_request_status(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Path(request_id): Path<String>,
    Json(req): Json<ChangeStatusRequest>,
) -> Result<impl IntoResponse> {
    let service = RequestService::new(state.meta_store.as_ref());
    let request = service.change_status(&ctx, &request_id, req.action.into()).await?;
    Ok(Json(request))
}

#[utoipa::path(
    delete,
    path = "/requests/{request_id}",
    params(("request_id" = String, Path, description = "Request id")),
    responses(
        (status = 204, description = "Request deleted"),
        (status = 403, description = "Not a superAdmin"),
    ),
    tag = "requests"
)]
pub async fn delete_request(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Path(request_id): Path<String>,
) -> Result<impl IntoResponse> {
    let service = RequestService::new(state.meta_store.as_ref());
    service.delete(&ctx, &request_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/requests/{request_id}/comments",
    params(("request_id" = String, Path, description = "Request id")),
    responses((status = 200, description = "Comments", body = Vec<Comment>)),
    tag = "requests"
)]
pub async fn list_comments(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Path(request_id): Path<String>,
) -> Result<impl IntoResponse> {
    let service = RequestService::new(state.meta_store.as_ref());
    let comments = service.list_comments(&ctx, &request_id).await?;
    Ok(Json(comments))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddCommentRequest {
    pub content: String,
}

#[utoipa::path(
    post,
    path = "/requests/{request_id}/comments",
    params(("request_id" = String, Path, description = "Request id")),
    request_body = AddCommentRequest,
    responses(
        (status = 201, description = "Comment added", body = Comment),
        (status = 403, description = "Not a viewer, or request is not open"),
    ),
    tag = "requests"
)]
pub async fn add_comment(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Path(request_id): Path<String>,
    Json(req): Json<AddCommentRequest>,
) -> Result<impl IntoResponse> {
    let service = RequestService::new(state.meta_store.as_ref());
    let comment = service.add_comment(&ctx, &request_id, req.content).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}
