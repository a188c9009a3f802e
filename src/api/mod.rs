use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use subtle::ConstantTimeEq;
use tower_http::trace::TraceLayer;

use crate::errors::AppError;
use crate::AppState;

pub mod handlers;
pub mod pages;
pub mod redemption;

/// Full application router: health, metrics, public redemption routes and
/// the admin-key protected management API under `/api/v1`.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        // Health endpoints (no auth)
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .nest("/approval-status", redemption::router())
        .nest("/api/v1", api_router(state.clone()))
        .fallback(fallback_404)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
        .layer(middleware::from_fn(security_headers_middleware))
}

/// Build the Management API router.
/// All routes are relative; the caller mounts this under `/api/v1`.
pub fn api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/projects/:project_id/invitations",
            post(handlers::create_invitations),
        )
        .route(
            "/projects/:project_id/approvals",
            get(handlers::list_approvals),
        )
        .route(
            "/projects/:project_id/relations/:relation",
            get(handlers::list_relation).post(handlers::attach_to_relation),
        )
        .layer(middleware::from_fn_with_state(state, admin_auth))
}

async fn fallback_404() -> AppError {
    AppError::NotFound
}

async fn readiness_check(State(state): State<Arc<AppState>>) -> Result<&'static str, AppError> {
    state.engine.ping().await?;
    Ok("ok")
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let body = state.engine.metrics().render()?;
    Ok((
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        body,
    )
        .into_response())
}

/// Middleware: validates `X-Admin-Key` (or `Authorization: Bearer`) against the
/// configured admin key.
async fn admin_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let provided_key = req
        .headers()
        .get("x-admin-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            req.headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|t| t.trim())
        });

    let expected = state.config.admin_key.as_bytes();

    match provided_key {
        Some(k) if bool::from(k.as_bytes().ct_eq(expected)) => Ok(next.run(req).await),
        Some(k) => {
            // Never log the expected key or the full provided key
            let masked = if k.len() > 8 {
                format!("{}…{}", &k[..4], &k[k.len() - 4..])
            } else {
                "****".to_string()
            };
            tracing::warn!("admin API: invalid key (provided: '{}')", masked);
            Err(AppError::Unauthorized)
        }
        None => {
            tracing::warn!("admin API: missing X-Admin-Key header");
            Err(AppError::Unauthorized)
        }
    }
}

/// Middleware: injects a unique X-Request-Id into every response.
async fn request_id_middleware(req: Request, next: Next) -> Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// Middleware: injects security headers into every response.
async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert("Cache-Control", HeaderValue::from_static("no-store"));
    // Redemption links carry the token in the query string.
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));
    headers.remove("Server");

    resp
}
