pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::approval::{ApprovalRequest, ApprovalStatus};
use crate::models::identity::{Identity, Project};
use crate::models::relation::Relation;

/// Lookup of registered users. Owned by the account system.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Case-insensitive lookup by email.
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<Identity>>;

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<Identity>>;
}

/// Projects and their user relations.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn find_project(&self, id: Uuid) -> anyhow::Result<Option<Project>>;

    async fn project_exists(&self, id: Uuid) -> anyhow::Result<bool> {
        Ok(self.find_project(id).await?.is_some())
    }

    /// Add `user_id` to the relation if absent.
    /// Returns `true` when a new edge was created, `false` when it already existed.
    async fn attach_user(
        &self,
        project_id: Uuid,
        relation: Relation,
        user_id: Uuid,
    ) -> anyhow::Result<bool>;

    async fn relation_members(
        &self,
        project_id: Uuid,
        relation: Relation,
    ) -> anyhow::Result<Vec<Identity>>;
}

/// Outcome of a compare-and-swap on an approval's status.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// This call moved the row out of PENDING.
    Applied(ApprovalRequest),
    /// The row had already left PENDING; carries the status it was found in.
    AlreadyDecided(ApprovalStatus),
    NotFound,
}

/// Persistence of approval requests.
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    /// Insert every request or none of them.
    async fn insert_batch(&self, requests: &[ApprovalRequest]) -> anyhow::Result<()>;

    async fn find_by_token(&self, token: &str) -> anyhow::Result<Option<ApprovalRequest>>;

    async fn list_for_project(
        &self,
        project_id: Uuid,
        status: Option<ApprovalStatus>,
    ) -> anyhow::Result<Vec<ApprovalRequest>>;

    /// Atomically move the request PENDING → APPROVED and attach the invited
    /// user to the stored relation. At most one caller per token observes
    /// [`Transition::Applied`].
    async fn redeem(&self, token: &str) -> anyhow::Result<Transition>;

    /// Atomically move the request PENDING → REJECTED.
    async fn reject(&self, token: &str) -> anyhow::Result<Transition>;

    /// Stamp the first successful invitation delivery.
    async fn mark_notified(&self, id: Uuid, at: DateTime<Utc>) -> anyhow::Result<()>;

    /// Count a failed invitation send and stamp when it happened.
    async fn record_delivery_failure(&self, id: Uuid, at: DateTime<Utc>) -> anyhow::Result<()>;

    /// PENDING requests created before `created_before` whose invitation never
    /// went out and that have failed fewer than `max_attempts` times.
    /// Never-retried rows come first, then the least recently attempted.
    async fn list_undelivered(
        &self,
        created_before: DateTime<Utc>,
        max_attempts: i32,
        limit: i64,
    ) -> anyhow::Result<Vec<ApprovalRequest>>;

    /// Connectivity check behind `/readyz`.
    async fn ping(&self) -> anyhow::Result<()>;
}
