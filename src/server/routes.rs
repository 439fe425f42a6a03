// src/server/routes.rs
//! Axum router configuration for the updraft server
//!
//! - Client routes are uncompressed: multipart manifests must reach the
//!   client byte for byte and assets are already compressed or redirected
//! - Admin routes are gzip-compressed and gated by the bearer token

use crate::server::handlers::{admin, assets, manifest};
use crate::server::SharedState;
use axum::{
    http::HeaderValue,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the main application router
pub fn create_router(state: SharedState) -> Router {
    let cors = cors_layer(&state.cors_allowed_origins);

    let client_routes = Router::new()
        .route("/health", get(health_check))
        .route("/manifest", get(manifest::get_manifest))
        .route("/assets/:hash", get(assets::get_asset))
        .route("/objects/:hash", get(assets::get_object))
        .with_state(state.clone());

    let admin_routes = Router::new()
        .route("/admin/publish", post(admin::publish))
        .route("/admin/promote", post(admin::promote))
        .route("/admin/rollout", post(admin::rollout))
        .route("/admin/rollback", post(admin::rollback))
        .route("/admin/directive", post(admin::set_directive))
        .route("/admin/updates", get(admin::list_updates))
        .route("/admin/status", get(admin::status))
        .route("/admin/metrics", get(admin::metrics))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            admin::require_admin_token,
        ))
        .layer(CompressionLayer::new())
        .with_state(state);

    Router::new()
        .merge(client_routes)
        .merge(admin_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Any origin when none are configured
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    if allowed.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(allowed))
    }
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
