mod handlers;

use std::path::PathBuf;

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::service::SnapshotService;

/// Router for the editor page: the JSON API under `/api`, and, when
/// `static_root` is given, every other path served from that directory
/// (the editor page, the catalog and the snapshot pages).
pub fn create_router(service: SnapshotService, static_root: Option<PathBuf>) -> Router {
    let api = Router::new()
        .route("/latest", get(handlers::latest_document))
        .route("/versions", get(handlers::list_versions))
        .route("/save", post(handlers::save_document));

    let router = Router::new()
        .nest("/api", api)
        .route("/health", get(handlers::health));

    let router = match static_root {
        Some(root) => router.fallback_service(ServeDir::new(root)),
        None => router,
    };

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(service)
}
