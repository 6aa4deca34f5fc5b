use axum::{
    Router,
    extract::{Path, State},
    http::HeaderMap,
    response::Response,
    routing::{delete, get, post},
};
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::handlers::{self, blob, cache_admin, image};
use crate::infra::app_state::AppState;
use crate::infra::errors::AppResult;

/// Assemble the application router: the IIIF routes (optionally nested
/// under the configured mount point), the cache admin API, and the static
/// docroot fallback.
pub fn create_app(state: AppState) -> Router {
    let iiif = Router::new()
        .route("/{prefix}/{identifier}", get(blob_entry_handler))
        .route(
            "/{prefix}/{identifier}/{command}",
            get(handlers::command_handler),
        )
        .route(
            "/{prefix}/{identifier}/{region}/{size}/{rotation}/{quality_format}",
            get(image::iiif_image_handler),
        );

    let admin = Router::new()
        .route("/api/cache", get(cache_admin::list_cache_handler))
        .route("/api/cache/purge", post(cache_admin::purge_cache_handler))
        .route(
            "/api/cache/{*canonical}",
            delete(cache_admin::remove_cache_entry_handler),
        );

    let mut app = Router::new().merge(admin);

    let route = state.config.route.trim_matches('/').to_string();
    app = if route.is_empty() {
        app.merge(iiif)
    } else {
        app.nest(&format!("/{route}"), iiif)
    };

    if let Some(docroot) = &state.config.docroot {
        app = app.fallback_service(ServeDir::new(docroot));
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

/// GET /{prefix}/{identifier} - bare identifier streams the original.
async fn blob_entry_handler(
    State(state): State<AppState>,
    Path((prefix, identifier)): Path<(String, String)>,
    headers: HeaderMap,
) -> AppResult<Response> {
    blob::send_blob(state, prefix, identifier, headers).await
}
