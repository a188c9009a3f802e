use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::approval::{ApprovalRequest, ApprovalStatus};
use crate::models::identity::Identity;
use crate::models::relation::Relation;
use crate::AppState;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Deserialize)]
pub struct CreateInvitationsRequest {
    pub relation: String,
    pub emails: Vec<String>,
}

/// Approval as exposed over the management API. The token is deliberately
/// absent: it only ever travels to the invitee's inbox.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApprovalView {
    pub id: Uuid,
    pub project_id: Uuid,
    pub relation: Relation,
    pub invited_user_id: Uuid,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub notified: bool,
    pub delivery_attempts: i32,
}

impl From<ApprovalRequest> for ApprovalView {
    fn from(r: ApprovalRequest) -> Self {
        Self {
            id: r.id,
            project_id: r.project_id,
            relation: r.relation,
            invited_user_id: r.invited_user_id,
            status: r.status,
            created_at: r.created_at,
            decided_at: r.decided_at,
            notified: r.notified_at.is_some(),
            delivery_attempts: r.delivery_attempts,
        }
    }
}

#[derive(Deserialize)]
pub struct ApprovalFilter {
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct AttachRequest {
    /// User id or email.
    pub user: String,
}

#[derive(Serialize)]
pub struct AttachResponse {
    pub user: Identity,
    pub relation: String,
    pub created: bool,
}

// ── Handlers ─────────────────────────────────────────────────

/// POST /api/v1/projects/:project_id/invitations: invite a batch of emails
pub async fn create_invitations(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<Uuid>,
    Json(payload): Json<CreateInvitationsRequest>,
) -> Result<(StatusCode, Json<Vec<ApprovalView>>), AppError> {
    let created = state
        .engine
        .generate_approval_requests(&payload.emails, project_id, &payload.relation)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(created.into_iter().map(ApprovalView::from).collect()),
    ))
}

/// GET /api/v1/projects/:project_id/approvals: list approvals, optionally by status
pub async fn list_approvals(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<Uuid>,
    Query(filter): Query<ApprovalFilter>,
) -> Result<Json<Vec<ApprovalView>>, AppError> {
    let status = filter
        .status
        .as_deref()
        .map(str::parse::<ApprovalStatus>)
        .transpose()
        .map_err(AppError::BadRequest)?;

    let rows = state.engine.list_approvals(project_id, status).await?;
    Ok(Json(rows.into_iter().map(ApprovalView::from).collect()))
}

/// GET /api/v1/projects/:project_id/relations/:relation: users in a relation
pub async fn list_relation(
    State(state): State<Arc<AppState>>,
    Path((project_id, relation)): Path<(Uuid, String)>,
) -> Result<Json<Vec<Identity>>, AppError> {
    let users = state.engine.relation_members(project_id, &relation).await?;
    Ok(Json(users))
}

/// POST /api/v1/projects/:project_id/relations/:relation: attach a user directly
pub async fn attach_to_relation(
    State(state): State<Arc<AppState>>,
    Path((project_id, relation)): Path<(Uuid, String)>,
    Json(payload): Json<AttachRequest>,
) -> Result<(StatusCode, Json<AttachResponse>), AppError> {
    let (user, created) = state
        .engine
        .attach_user(project_id, &relation, &payload.user)
        .await?;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(AttachResponse {
            user,
            relation,
            created,
        }),
    ))
}
