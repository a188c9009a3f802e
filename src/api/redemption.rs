//! Public token routes, mounted under `/approval-status`. No admin key: the
//! token in the query string is the only credential.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::pages;
use crate::errors::{AppError, ApprovalError};
use crate::models::approval::ApprovalDetails;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

impl TokenQuery {
    fn require(self) -> Result<String, AppError> {
        self.token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::BadRequest("token query parameter is required".into()))
    }
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/details", get(details))
        .route("/approve-page", get(approve_page))
        .route("/approve", post(approve))
        .route("/approve-member", post(approve_member))
        .route("/approve-encadrant", post(approve_encadrant))
        .route("/approve-jury", post(approve_jury))
        .route("/reject", post(reject))
}

/// GET /approval-status/details?token=
async fn details(
    State(state): State<Arc<AppState>>,
    Query(q): Query<TokenQuery>,
) -> Result<Json<ApprovalDetails>, AppError> {
    let token = q.require()?;
    Ok(Json(state.engine.approval_details(&token).await?))
}

/// GET /approval-status/approve-page?token=: the page invitation emails link to.
async fn approve_page(State(state): State<Arc<AppState>>, Query(q): Query<TokenQuery>) -> Response {
    let Some(token) = q.token.filter(|t| !t.trim().is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Html(pages::error_page("Token is required")),
        )
            .into_response();
    };

    match state.engine.approval_details(&token).await {
        Ok(details) => Html(pages::approval_page(&details)).into_response(),
        Err(ApprovalError::Store(e)) => {
            tracing::error!("approval page lookup failed: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(pages::error_page("Something went wrong. Please try again later.")),
            )
                .into_response()
        }
        Err(_) => (
            StatusCode::NOT_FOUND,
            Html(pages::error_page("This invitation is invalid or has expired.")),
        )
            .into_response(),
    }
}

/// POST /approval-status/approve?token=: redeem into the stored relation.
async fn approve(
    State(state): State<Arc<AppState>>,
    Query(q): Query<TokenQuery>,
) -> Result<Json<Value>, AppError> {
    redeem(&state, q, None).await
}

async fn approve_member(
    State(state): State<Arc<AppState>>,
    Query(q): Query<TokenQuery>,
) -> Result<Json<Value>, AppError> {
    redeem(&state, q, Some("members")).await
}

async fn approve_encadrant(
    State(state): State<Arc<AppState>>,
    Query(q): Query<TokenQuery>,
) -> Result<Json<Value>, AppError> {
    redeem(&state, q, Some("encadrants")).await
}

async fn approve_jury(
    State(state): State<Arc<AppState>>,
    Query(q): Query<TokenQuery>,
) -> Result<Json<Value>, AppError> {
    redeem(&state, q, Some("juryMembers")).await
}

async fn redeem(
    state: &AppState,
    q: TokenQuery,
    relation: Option<&str>,
) -> Result<Json<Value>, AppError> {
    let token = q.require()?;
    let message = state.engine.approve_request(&token, relation).await?;
    Ok(Json(json!({ "message": message })))
}

/// POST /approval-status/reject?token=
async fn reject(
    State(state): State<Arc<AppState>>,
    Query(q): Query<TokenQuery>,
) -> Result<Json<Value>, AppError> {
    let token = q.require()?;
    let message = state.engine.reject_request(&token).await?;
    Ok(Json(json!({ "message": message })))
}
