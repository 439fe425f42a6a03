// src/server/handlers/assets.rs
//! Asset endpoints
//!
//! `/assets/:hash` redirects to wherever the store says the asset lives.
//! `/objects/:hash` serves the bytes directly for backends that host their
//! own assets. Both are content-addressed, so object responses are
//! immutable and infinitely cacheable.

use super::ApiResult;
use crate::server::SharedState;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};

/// GET /assets/:hash
///
/// Returns:
/// - 302 Found with Location of the asset
/// - 404 Not Found if the asset was never stored
pub async fn get_asset(
    State(state): State<SharedState>,
    Path(hash): Path<String>,
) -> ApiResult<Response> {
    let Some(url) = state.engine.resolve_asset(&hash).await? else {
        return Ok((StatusCode::NOT_FOUND, "Asset not found").into_response());
    };

    Ok(match HeaderValue::from_str(&url) {
        Ok(location) => (StatusCode::FOUND, [(header::LOCATION, location)]).into_response(),
        Err(_) => {
            tracing::error!("Asset {} resolved to unusable location {:?}", hash, url);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    })
}

/// GET /objects/:hash
///
/// Raw asset bytes with their stored content type.
pub async fn get_object(
    State(state): State<SharedState>,
    Path(hash): Path<String>,
) -> ApiResult<Response> {
    let Some(asset) = state.engine.store().read_asset(&hash).await? else {
        return Ok((StatusCode::NOT_FOUND, "Object not found").into_response());
    };

    let content_type = HeaderValue::from_str(&asset.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    let mut response = Response::new(Body::from(asset.bytes));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000, immutable"),
    );
    if let Ok(etag) = HeaderValue::from_str(&format!("\"{}\"", hash)) {
        headers.insert(header::ETAG, etag);
    }
    Ok(response)
}
