// src/server/handlers/admin.rs
//! Admin endpoints
//!
//! Thin JSON wrappers over [`AdminService`](crate::admin::AdminService).
//! Every route here sits behind [`require_admin_token`].

use super::{ApiError, ApiResult};
use crate::admin::{
    Ack, DirectiveRequest, ListQuery, PromoteRequest, PublishRequest, RollbackRequest,
    RolloutRequest, StatusList, UpdateList,
};
use crate::error::Error;
use crate::server::SharedState;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, Request, State,
    },
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

/// Reject requests whose `Authorization` is not exactly `Bearer <token>`
///
/// With no token configured every request passes.
pub async fn require_admin_token(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(ref token) = state.admin_token {
        let presented = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        let expected = format!("Bearer {token}");
        if presented != Some(expected.as_str()) {
            tracing::warn!("Rejected admin request to {}", request.uri().path());
            state.metrics.record_auth_failure();
            return ApiError(Error::Unauthorized).into_response();
        }
    }
    next.run(request).await
}

/// POST /admin/publish
pub async fn publish(
    State(state): State<SharedState>,
    body: Result<Json<PublishRequest>, JsonRejection>,
) -> ApiResult<Json<Ack>> {
    let Json(request) = body?;
    Ok(Json(state.admin.publish(request).await?))
}

/// POST /admin/promote
pub async fn promote(
    State(state): State<SharedState>,
    body: Result<Json<PromoteRequest>, JsonRejection>,
) -> ApiResult<Json<Ack>> {
    let Json(request) = body?;
    Ok(Json(state.admin.promote(request).await?))
}

/// POST /admin/rollout
pub async fn rollout(
    State(state): State<SharedState>,
    body: Result<Json<RolloutRequest>, JsonRejection>,
) -> ApiResult<Json<Ack>> {
    let Json(request) = body?;
    Ok(Json(state.admin.rollout(request).await?))
}

/// POST /admin/rollback
pub async fn rollback(
    State(state): State<SharedState>,
    body: Result<Json<RollbackRequest>, JsonRejection>,
) -> ApiResult<Json<Ack>> {
    let Json(request) = body?;
    Ok(Json(state.admin.rollback(request).await?))
}

/// POST /admin/directive
pub async fn set_directive(
    State(state): State<SharedState>,
    body: Result<Json<DirectiveRequest>, JsonRejection>,
) -> ApiResult<Json<Ack>> {
    let Json(request) = body?;
    Ok(Json(state.admin.set_directive(request).await?))
}

/// GET /admin/updates?runtimeVersion=..&platform=..[&channel=..][&limit=..]
pub async fn list_updates(
    State(state): State<SharedState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Json<UpdateList>> {
    let Query(query) = query?;
    Ok(Json(state.admin.list_updates(query).await?))
}

/// GET /admin/status
pub async fn status(State(state): State<SharedState>) -> ApiResult<Json<StatusList>> {
    Ok(Json(state.admin.status().await?))
}

/// GET /admin/metrics
///
/// Prometheus text exposition format.
pub async fn metrics(State(state): State<SharedState>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render_prometheus(),
    )
        .into_response()
}
