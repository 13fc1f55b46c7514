pub mod auth;
pub mod media;
pub mod requests;
pub mod upload;

use crate::config::{AuthConfig, Config};
use crate::gallery::InMemoryGalleryDirectory;
use crate::gradient::GradientEnqueuer;
use crate::meta_store::MetaStore;
use crate::object_store::ObjectStore;
use crate::upload::UploadSessionStore;
use axum::extract::FromRef;
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;

pub struct AppState {
    pub config: Config,
    pub object_store: Arc<dyn ObjectStore>,
    pub meta_store: Arc<dyn MetaStore>,
    pub gallery_directory: Arc<InMemoryGalleryDirectory>,
    pub upload_sessions: UploadSessionStore,
    pub gradient_enqueuer: Arc<dyn GradientEnqueuer>,
}

/// `AuthContext`'s `FromRequestParts` impl needs `AuthConfig` out of
/// whatever state type the router uses; axum's blanket `FromRef` impl only
/// covers `T: Clone`, so `Arc<AppState>` needs this manual hop.
impl FromRef<Arc<AppState>> for AuthConfig {
    fn from_ref(state: &Arc<AppState>) -> AuthConfig {
        state.config.auth.clone()
    }
}

#[derive(OpenApi)]
#[openapi(
    components(
        schemas(
            upload::InitiateUploadRequest,
            upload::InitiateUploadResponse,
            upload::UploadChunkResponse,
            upload::FinalizeRequest,
            upload::FinalizeResponse,
            upload::CancelUploadResponse,
            crate::upload::UploadProgress,
            crate::upload::UploadStatus,
            crate::upload::UploadPhase,
            crate::upload::ProgressCounters,
            crate::requests::UserRequest,
            crate::requests::RequestStatus,
            crate::requests::Comment,
            crate::requests::CreateRequest,
            requests::ChangeStatusRequest,
            requests::ChangeStatusAction,
            requests::AddCommentRequest,
            auth::MeResponse
        )
    ),
    tags(
        (name = "uploads", description = "Chunked photo upload endpoints"),
        (name = "requests", description = "User request lifecycle endpoints"),
        (name = "auth", description = "Session introspection")
    )
)]
pub struct ApiDoc;

pub fn create_api_router(state: Arc<AppState>) -> OpenApiRouter {
    OpenApiRouter::with_openapi(ApiDoc::openapi())
        .routes(routes!(upload::initiate_upload))
        .routes(routes!(upload::upload_chunk))
        .routes(routes!(upload::finalize_upload))
        .routes(routes!(upload::get_progress))
        .routes(routes!(upload::cancel_upload))
        .routes(routes!(requests::create_request))
        .routes(routes!(requests::list_requests))
        .routes(routes!(requests::get_request))
        .routes(routes!(requests::cancel_request))
        .routes(routes!(requests::change_request_status))
        .routes(routes!(requests::delete_request))
        .routes(routes!(requests::list_comments))
        .routes(routes!(requests::add_comment))
        .routes(routes!(auth::me))
        .with_state(state)
}
