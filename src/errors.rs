use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::models::relation::Relation;

/// Failures of the invitation/approval workflow.
#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("project {0} not found")]
    ProjectNotFound(uuid::Uuid),

    #[error("invalid or expired token")]
    TokenNotFound,

    #[error("token already redeemed")]
    AlreadyRedeemed,

    #[error("invitation already {0}")]
    AlreadyDecided(&'static str),

    #[error("token belongs to relation '{stored}', not '{requested}'")]
    RelationMismatch { stored: Relation, requested: Relation },

    #[error("{0}")]
    Validation(String),

    #[error("user with email {0} does not exist")]
    UnknownEmail(String),

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Approval(#[from] ApprovalError),

    #[error("unauthorized")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error("not found")]
    NotFound,

    #[error("internal error: {0}")]
    Internal(anyhow::Error),
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, &'static str, String) {
        match self {
            AppError::Approval(e) => match e {
                ApprovalError::ProjectNotFound(_) => (
                    StatusCode::NOT_FOUND,
                    "not_found_error",
                    "project_not_found",
                    "project not found".to_string(),
                ),
                // Used, rejected and unknown tokens all look the same from outside.
                ApprovalError::TokenNotFound
                | ApprovalError::AlreadyRedeemed
                | ApprovalError::AlreadyDecided(_) => (
                    StatusCode::NOT_FOUND,
                    "not_found_error",
                    "invalid_token",
                    "invalid or expired token".to_string(),
                ),
                ApprovalError::RelationMismatch { .. } => (
                    StatusCode::BAD_REQUEST,
                    "invalid_request_error",
                    "relation_mismatch",
                    "token does not belong to this relation".to_string(),
                ),
                ApprovalError::Validation(msg) => (
                    StatusCode::BAD_REQUEST,
                    "invalid_request_error",
                    "validation_failed",
                    msg.clone(),
                ),
                ApprovalError::UnknownEmail(_) => (
                    StatusCode::BAD_REQUEST,
                    "invalid_request_error",
                    "unknown_email",
                    e.to_string(),
                ),
                ApprovalError::Store(inner) => {
                    tracing::error!("approval store error: {:#}", inner);
                    internal()
                }
            },
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "unauthorized",
                "missing or invalid admin key".to_string(),
            ),
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "bad_request",
                msg.clone(),
            ),
            AppError::NotFound => (
                StatusCode::NOT_FOUND,
                "not_found_error",
                "not_found",
                "resource not found".to_string(),
            ),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:#}", e);
                internal()
            }
        }
    }
}

fn internal() -> (StatusCode, &'static str, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        "internal_server_error",
        "internal server error".to_string(),
    )
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::Internal(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = self.parts();

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        (status, body).into_response()
    }
}
