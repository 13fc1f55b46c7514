use axum::Router;
use axum::extract::DefaultBodyLimit;
use gallery_core::api::{AppState, create_api_router};
use gallery_core::auth::{AuthContext, create_session_token};
use gallery_core::config::Config;
use gallery_core::gallery::InMemoryGalleryDirectory;
use gallery_core::gradient::fake::FakeGradientEnqueuer;
use gallery_core::gradient::GradientEnqueuer;
use gallery_core::meta_store::fake::FakeMetaStore;
use gallery_core::meta_store::MetaStore;
use gallery_core::object_store::fake::FakeObjectStore;
use gallery_core::object_store::ObjectStore;
use gallery_core::upload::UploadSessionStore;
use std::collections::HashSet;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
}

pub async fn setup_test_app() -> TestApp {
    let config = Config::default();

    let object_store: Arc<dyn ObjectStore> = Arc::new(FakeObjectStore::default());
    let meta_store: Arc<dyn MetaStore> = Arc::new(FakeMetaStore::default());
    let gallery_directory = Arc::new(InMemoryGalleryDirectory::new());
    let upload_sessions = UploadSessionStore::new();
    let gradient_enqueuer: Arc<dyn GradientEnqueuer> = Arc::new(FakeGradientEnqueuer::default());

    let state = Arc::new(AppState {
        config,
        object_store,
        meta_store,
        gallery_directory,
        upload_sessions,
        gradient_enqueuer,
    });

    let (api_router, _api_doc) = create_api_router(state.clone()).split_for_parts();

    let media_routes = Router::new()
        .route(
            "/{gallery_slug}/{date}/{*rest}",
            axum::routing::get(gallery_core::api::media::serve_media),
        )
        .with_state(state.clone());

    let max_chunk_size = state.config.server.max_chunk_size;
    let router = Router::new()
        .nest("/api", api_router)
        .merge(media_routes)
        .layer(DefaultBodyLimit::max(max_chunk_size as usize + 4096))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    TestApp { router, state }
}

/// Mint a bearer token for a user belonging to `guild_ids`, optionally a
/// guild admin or super admin, signed with the test app's own `AuthConfig`.
pub fn session_token(app: &TestApp, user_id: &str, is_admin: bool, is_super_admin: bool, guild_ids: &[&str]) -> String {
    let ctx = AuthContext {
        user_id: user_id.to_string(),
        is_admin,
        is_super_admin,
        guild_ids: guild_ids.iter().map(|g| g.to_string()).collect::<HashSet<_>>(),
    };
    create_session_token(&app.state.config.auth, &ctx).unwrap()
}
