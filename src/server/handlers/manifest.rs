// src/server/handlers/manifest.rs
//! Manifest endpoint for Expo clients

use super::ApiResult;
use crate::engine::ManifestRequest;
use crate::protocol::ProtocolResponse;
use crate::server::SharedState;
use axum::{
    extract::{Query, State},
    http::HeaderMap,
};
use std::collections::{BTreeMap, HashMap};

/// First value of every header, keyed by lowercase name
fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            out.entry(name.as_str().to_string())
                .or_insert_with(|| value.to_string());
        }
    }
    out
}

/// Header value, falling back to a query parameter
fn field(
    headers: &BTreeMap<String, String>,
    header: &str,
    query: &HashMap<String, String>,
    param: &str,
) -> Option<String> {
    headers
        .get(header)
        .or_else(|| query.get(param))
        .cloned()
}

/// Build the engine request from headers and query fallbacks
pub fn manifest_request(headers: &HeaderMap, query: &HashMap<String, String>) -> ManifestRequest {
    let headers = header_map(headers);
    ManifestRequest {
        platform: field(&headers, "expo-platform", query, "platform"),
        runtime_version: field(&headers, "expo-runtime-version", query, "runtimeVersion"),
        channel: field(&headers, "expo-channel-name", query, "channel"),
        current_update_id: headers.get("expo-current-update-id").cloned(),
        headers,
    }
}

/// GET /manifest
///
/// Returns:
/// - 200 multipart manifest or directive
/// - 204 when the client has nothing to apply
/// - 400 when platform or runtime version is missing
pub async fn get_manifest(
    State(state): State<SharedState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> ApiResult<ProtocolResponse> {
    let request = manifest_request(&headers, &query);
    Ok(state.engine.resolve_manifest(request).await?)
}
