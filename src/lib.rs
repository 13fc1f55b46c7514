pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod gallery;
pub mod gradient;
pub mod meta_store;
pub mod object_store;
pub mod requests;
pub mod upload;

use api::{AppState, create_api_router};
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use config::Config;
use gallery::InMemoryGalleryDirectory;
use gradient::{GradientComputer, GradientWorker, GradientWorkerConfig, GradientWorkerHandle, ImageGradientComputer};
use meta_store::{MetaStore, RedisMetaStore};
use object_store::{ObjectStore, S3ObjectStore};
use std::io::IsTerminal;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use upload::UploadSessionStore;
use utoipa_rapidoc::RapiDoc;

/// Periodic sweep interval for expired upload sessions and stale terminal
/// progress records.
const UPLOAD_CLEANUP_INTERVAL_SECS: u64 = 60;

/// Running in a terminal gets human-readable `fmt` output; running as a
/// service logs to journald, same split the teacher's `init_tracing` uses.
pub fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "gallery_core=info,tower_http=warn".into());

    if std::io::stdout().is_terminal() {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_journald::layer().expect("failed to connect to journald"))
            .init();
    }
}

pub async fn run_service(config_path: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    tracing::info!("gallery-core version {}", env!("CARGO_PKG_VERSION"));

    let config = Config::load(config_path).unwrap_or_else(|_| {
        tracing::warn!("failed to load config, using defaults");
        Config::default()
    });

    tracing::info!("starting server with config: {:?}", config);

    let object_store: Arc<dyn ObjectStore> = Arc::new(
        S3ObjectStore::new(
            &config.storage.s3_endpoint,
            &config.storage.s3_region,
            &config.storage.bucket,
            config.storage.access_key_id.as_deref(),
            config.storage.secret_access_key.as_deref(),
        )
        .await,
    );

    let meta_store: Arc<dyn MetaStore> = Arc::new(RedisMetaStore::connect(&config.redis.url).await?);

    let gallery_directory = Arc::new(InMemoryGalleryDirectory::new());

    let upload_sessions = UploadSessionStore::new();
    upload::spawn_cleanup_task(upload_sessions.clone(), UPLOAD_CLEANUP_INTERVAL_SECS);

    let computer: Arc<dyn GradientComputer> = Arc::new(ImageGradientComputer::default());
    let worker = Arc::new(GradientWorker::new(
        object_store.clone(),
        meta_store.clone(),
        computer,
        GradientWorkerConfig {
            enabled: config.gradient_worker.enabled,
            concurrency: config.gradient_worker.concurrency,
            max_retries: config.gradient_worker.max_retries,
            poll_interval_ms: config.gradient_worker.poll_interval_ms,
        },
    ));
    let worker_handle = worker.clone().spawn().await;

    let state = Arc::new(AppState {
        config: config.clone(),
        object_store,
        meta_store,
        gallery_directory,
        upload_sessions,
        gradient_enqueuer: worker,
    });

    let (api_router, api_doc) = create_api_router(state.clone()).split_for_parts();

    let media_routes = Router::new()
        .route("/{gallery_slug}/{date}/{*rest}", get(api::media::serve_media))
        .with_state(state.clone());

    let doc_routes = Router::new()
        .merge(RapiDoc::with_openapi("/api-docs/openapi.json", api_doc).path("/api-docs"));

    let app = Router::new()
        .nest("/api", api_router)
        .merge(media_routes)
        .merge(doc_routes)
        .layer(DefaultBodyLimit::max(config.server.max_chunk_size as usize + 4096))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("server listening on {}", addr);
    tracing::info!("api documentation available at http://{}/api-docs", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(worker_handle))
        .await?;

    Ok(())
}

async fn shutdown_signal(worker: GradientWorkerHandle) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, draining gradient worker");
    worker.shutdown().await;
}
