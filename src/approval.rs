//! Invitation / approval workflow.
//!
//! 1. [`ApprovalEngine::generate_approval_requests`] validates a batch of invitee
//!    emails, persists one PENDING request per invitee in a single atomic write,
//!    then emails each invitee a redemption link.
//! 2. [`ApprovalEngine::approve_request`] redeems a token: the status
//!    compare-and-swap and the relation edge insert happen in one store
//!    operation, so a token attaches its user at most once.
//!
//! Email delivery always happens after persistence and outside any store
//! transaction. A failed delivery is logged, counted on the row and left for
//! [`ApprovalEngine::redeliver_pending`]; it never undoes a stored invitation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use crate::errors::ApprovalError;
use crate::metrics::WorkflowMetrics;
use crate::models::approval::{token_hint, ApprovalDetails, ApprovalRequest, ApprovalStatus};
use crate::models::identity::Identity;
use crate::models::relation::Relation;
use crate::notification::invitation::{render_invitation, InvitationLinks};
use crate::notification::{EmailMessage, NotificationSender};
use crate::store::{ApprovalStore, IdentityStore, ProjectStore, Transition};

static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").expect("valid email regex")
});

/// Upper bound on invitees per batch.
pub const MAX_BATCH_SIZE: usize = 100;

/// Failed sends after which an invitation is no longer redelivered.
pub const MAX_DELIVERY_ATTEMPTS: i32 = 5;

#[derive(Clone)]
pub struct ApprovalEngine {
    approvals: Arc<dyn ApprovalStore>,
    projects: Arc<dyn ProjectStore>,
    identities: Arc<dyn IdentityStore>,
    notifier: Arc<dyn NotificationSender>,
    links: InvitationLinks,
    metrics: WorkflowMetrics,
}

impl ApprovalEngine {
    pub fn new(
        approvals: Arc<dyn ApprovalStore>,
        projects: Arc<dyn ProjectStore>,
        identities: Arc<dyn IdentityStore>,
        notifier: Arc<dyn NotificationSender>,
        links: InvitationLinks,
        metrics: WorkflowMetrics,
    ) -> Self {
        Self {
            approvals,
            projects,
            identities,
            notifier,
            links,
            metrics,
        }
    }

    pub fn metrics(&self) -> &WorkflowMetrics {
        &self.metrics
    }

    pub async fn ping(&self) -> anyhow::Result<()> {
        self.approvals.ping().await
    }

    // -- Invitation Batches --

    /// Invite every address in `emails` into `relation_name` on the project.
    ///
    /// Either every invitee gets a stored PENDING request or none does. The
    /// returned records carry `notified_at` for invitees whose email went out.
    pub async fn generate_approval_requests(
        &self,
        emails: &[String],
        project_id: Uuid,
        relation_name: &str,
    ) -> Result<Vec<ApprovalRequest>, ApprovalError> {
        let relation = parse_invitable(relation_name)?;
        let emails = normalize_emails(emails)?;

        let project = self
            .projects
            .find_project(project_id)
            .await?
            .ok_or(ApprovalError::ProjectNotFound(project_id))?;

        let mut invitees: Vec<Identity> = Vec::with_capacity(emails.len());
        for email in &emails {
            let identity = self
                .identities
                .find_by_email(email)
                .await?
                .ok_or_else(|| ApprovalError::UnknownEmail(email.clone()))?;
            invitees.push(identity);
        }

        let mut requests: Vec<ApprovalRequest> = invitees
            .iter()
            .map(|user| ApprovalRequest::pending(project.id, relation, user.id))
            .collect();

        self.approvals.insert_batch(&requests).await.map_err(|e| {
            tracing::error!(
                project_id = %project.id,
                relation = %relation,
                count = requests.len(),
                "failed to persist invitation batch: {:#}",
                e
            );
            ApprovalError::Store(e)
        })?;

        self.metrics
            .invitation_created(relation.as_str(), requests.len() as u64);
        tracing::info!(
            project_id = %project.id,
            relation = %relation,
            count = requests.len(),
            "invitation batch stored"
        );

        if !self.notifier.is_configured() {
            tracing::warn!(
                project_id = %project.id,
                count = requests.len(),
                "mail delivery disabled, invitations left for redelivery"
            );
            return Ok(requests);
        }

        for (req, user) in requests.iter_mut().zip(&invitees) {
            if self.deliver(&project.name, req, &user.email).await {
                req.notified_at = Some(Utc::now());
            } else {
                req.delivery_attempts += 1;
                req.last_attempt_at = Some(Utc::now());
            }
        }

        Ok(requests)
    }

    /// Render and send one invitation; returns whether it was delivered.
    async fn deliver(&self, project_name: &str, req: &ApprovalRequest, email: &str) -> bool {
        let link = self.links.approval_link(&req.token);
        let content = render_invitation(project_name, req.relation, &link);
        let message = EmailMessage {
            to: email.to_string(),
            subject: content.subject,
            text_body: content.text,
            html_body: content.html,
        };

        match self.notifier.send(&message).await {
            Ok(()) => {
                self.metrics.notification("sent");
                if let Err(e) = self.approvals.mark_notified(req.id, Utc::now()).await {
                    // The email went out; worst case the sweep sends it again.
                    tracing::warn!(approval_id = %req.id, "failed to record delivery: {:#}", e);
                }
                true
            }
            Err(e) => {
                self.metrics.notification("failed");
                tracing::warn!(
                    approval_id = %req.id,
                    token = %req.token_hint(),
                    to = %email,
                    attempt = req.delivery_attempts + 1,
                    "invitation delivery failed: {:#}",
                    e
                );
                if let Err(e) = self
                    .approvals
                    .record_delivery_failure(req.id, Utc::now())
                    .await
                {
                    tracing::warn!(approval_id = %req.id, "failed to record delivery failure: {:#}", e);
                }
                if req.delivery_attempts + 1 >= MAX_DELIVERY_ATTEMPTS {
                    tracing::error!(
                        approval_id = %req.id,
                        to = %email,
                        "giving up on invitation delivery after {} attempts",
                        MAX_DELIVERY_ATTEMPTS
                    );
                }
                false
            }
        }
    }

    /// Re-send invitations that are still PENDING and were never delivered,
    /// skipping anything younger than `grace` (the request that created it may
    /// still be sending) and anything that already failed
    /// [`MAX_DELIVERY_ATTEMPTS`] times. Least recently attempted rows go
    /// first, so a bouncing address cannot starve the rest.
    /// Returns how many were delivered.
    pub async fn redeliver_pending(
        &self,
        grace: Duration,
        limit: i64,
    ) -> Result<usize, ApprovalError> {
        if !self.notifier.is_configured() {
            return Ok(0);
        }
        let grace = chrono::Duration::from_std(grace)
            .map_err(|e| ApprovalError::Validation(format!("invalid grace period: {}", e)))?;
        let rows = self
            .approvals
            .list_undelivered(Utc::now() - grace, MAX_DELIVERY_ATTEMPTS, limit)
            .await?;

        let mut project_names: HashMap<Uuid, String> = HashMap::new();
        let mut delivered = 0;

        for req in rows {
            let cached = project_names.get(&req.project_id).cloned();
            let name = match cached {
                Some(n) => n,
                None => match self.projects.find_project(req.project_id).await? {
                    Some(p) => {
                        project_names.insert(p.id, p.name.clone());
                        p.name
                    }
                    None => {
                        tracing::warn!(approval_id = %req.id, "project vanished, skipping redelivery");
                        continue;
                    }
                },
            };
            let Some(user) = self.identities.find_by_id(req.invited_user_id).await? else {
                tracing::warn!(approval_id = %req.id, "invitee vanished, skipping redelivery");
                continue;
            };
            if self.deliver(&name, &req, &user.email).await {
                delivered += 1;
            }
        }

        Ok(delivered)
    }

    // -- Redemption --

    /// Redeem `token`. When `relation_name` is given it must match the relation
    /// stored on the invitation; the stored relation is what gets populated.
    pub async fn approve_request(
        &self,
        token: &str,
        relation_name: Option<&str>,
    ) -> Result<String, ApprovalError> {
        let hint = relation_name
            .map(|name| {
                name.parse::<Relation>()
                    .map_err(ApprovalError::Validation)
            })
            .transpose()?;

        let token = token.trim();
        let existing = self.lookup(token).await?;

        if let Some(requested) = hint {
            if requested != existing.relation {
                self.metrics.redemption("relation_mismatch");
                tracing::warn!(
                    approval_id = %existing.id,
                    stored = %existing.relation,
                    requested = %requested,
                    "redemption attempted against a different relation"
                );
                return Err(ApprovalError::RelationMismatch {
                    stored: existing.relation,
                    requested,
                });
            }
        }

        match self.approvals.redeem(token).await? {
            Transition::Applied(req) => {
                self.metrics.redemption("approved");
                tracing::info!(
                    approval_id = %req.id,
                    project_id = %req.project_id,
                    user_id = %req.invited_user_id,
                    relation = %req.relation,
                    "invitation approved"
                );
                Ok(format!("{} approval successful.", req.relation))
            }
            other => Err(self.refused(token, other)),
        }
    }

    /// Decline `token`: PENDING → REJECTED. No relation is touched.
    pub async fn reject_request(&self, token: &str) -> Result<String, ApprovalError> {
        let token = token.trim();
        match self.approvals.reject(token).await? {
            Transition::Applied(req) => {
                self.metrics.redemption("rejected");
                tracing::info!(
                    approval_id = %req.id,
                    project_id = %req.project_id,
                    relation = %req.relation,
                    "invitation rejected"
                );
                Ok(format!("{} invitation declined.", req.relation))
            }
            other => Err(self.refused(token, other)),
        }
    }

    fn refused(&self, token: &str, outcome: Transition) -> ApprovalError {
        match outcome {
            Transition::NotFound => {
                self.metrics.redemption("not_found");
                ApprovalError::TokenNotFound
            }
            Transition::AlreadyDecided(status) => {
                self.metrics.redemption("already_decided");
                tracing::warn!(token = %token_hint(token), status = status.as_str(), "token reuse refused");
                match status {
                    ApprovalStatus::Approved => ApprovalError::AlreadyRedeemed,
                    ApprovalStatus::Rejected => ApprovalError::AlreadyDecided("rejected"),
                    ApprovalStatus::Pending => ApprovalError::Store(anyhow::anyhow!(
                        "approval still pending after a refused transition"
                    )),
                }
            }
            Transition::Applied(req) => ApprovalError::Store(anyhow::anyhow!(
                "unexpected applied transition for approval {}",
                req.id
            )),
        }
    }

    async fn lookup(&self, token: &str) -> Result<ApprovalRequest, ApprovalError> {
        if token.is_empty() {
            self.metrics.redemption("not_found");
            return Err(ApprovalError::TokenNotFound);
        }
        match self.approvals.find_by_token(token).await? {
            Some(req) => Ok(req),
            None => {
                self.metrics.redemption("not_found");
                Err(ApprovalError::TokenNotFound)
            }
        }
    }

    /// Project name and invitee for a still-pending token.
    pub async fn approval_details(&self, token: &str) -> Result<ApprovalDetails, ApprovalError> {
        let token = token.trim();
        let req = match self.approvals.find_by_token(token).await? {
            Some(req) if !token.is_empty() && req.status == ApprovalStatus::Pending => req,
            _ => return Err(ApprovalError::TokenNotFound),
        };

        let project = self
            .projects
            .find_project(req.project_id)
            .await?
            .ok_or(ApprovalError::TokenNotFound)?;
        let user = self
            .identities
            .find_by_id(req.invited_user_id)
            .await?
            .ok_or(ApprovalError::TokenNotFound)?;

        Ok(ApprovalDetails {
            project_name: project.name,
            user_email: user.email.clone(),
            user_name: user.display_name(),
            relation: req.relation,
            status: req.status,
            token: req.token,
        })
    }

    // -- Project Queries --

    pub async fn list_approvals(
        &self,
        project_id: Uuid,
        status: Option<ApprovalStatus>,
    ) -> Result<Vec<ApprovalRequest>, ApprovalError> {
        if !self.projects.project_exists(project_id).await? {
            return Err(ApprovalError::ProjectNotFound(project_id));
        }
        Ok(self.approvals.list_for_project(project_id, status).await?)
    }

    pub async fn relation_members(
        &self,
        project_id: Uuid,
        relation_name: &str,
    ) -> Result<Vec<Identity>, ApprovalError> {
        let relation: Relation = relation_name.parse().map_err(ApprovalError::Validation)?;
        if !self.projects.project_exists(project_id).await? {
            return Err(ApprovalError::ProjectNotFound(project_id));
        }
        Ok(self.projects.relation_members(project_id, relation).await?)
    }

    /// Attach a user (by id or email) directly, without an invitation.
    /// Returns the user and whether a new edge was created.
    pub async fn attach_user(
        &self,
        project_id: Uuid,
        relation_name: &str,
        user_identifier: &str,
    ) -> Result<(Identity, bool), ApprovalError> {
        let relation: Relation = relation_name.parse().map_err(ApprovalError::Validation)?;
        if !self.projects.project_exists(project_id).await? {
            return Err(ApprovalError::ProjectNotFound(project_id));
        }

        let identifier = user_identifier.trim();
        let user = match Uuid::parse_str(identifier) {
            Ok(id) => self.identities.find_by_id(id).await?,
            Err(_) => self.identities.find_by_email(identifier).await?,
        }
        .ok_or_else(|| ApprovalError::UnknownEmail(identifier.to_string()))?;

        let created = self.projects.attach_user(project_id, relation, user.id).await?;
        tracing::info!(
            project_id = %project_id,
            user_id = %user.id,
            relation = %relation,
            created,
            "user attached to project relation"
        );
        Ok((user, created))
    }
}

fn parse_invitable(relation_name: &str) -> Result<Relation, ApprovalError> {
    let relation: Relation = relation_name.parse().map_err(ApprovalError::Validation)?;
    if !relation.is_invitable() {
        return Err(ApprovalError::Validation(format!(
            "relation '{}' does not accept invitations",
            relation
        )));
    }
    Ok(relation)
}

/// Trim, syntax-check and de-duplicate (case-insensitively) the invitee list,
/// keeping first-seen order.
fn normalize_emails(emails: &[String]) -> Result<Vec<String>, ApprovalError> {
    if emails.is_empty() {
        return Err(ApprovalError::Validation("at least one email is required".into()));
    }
    if emails.len() > MAX_BATCH_SIZE {
        return Err(ApprovalError::Validation(format!(
            "at most {} invitees per batch",
            MAX_BATCH_SIZE
        )));
    }

    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(emails.len());
    for raw in emails {
        let email = raw.trim();
        if !EMAIL_REGEX.is_match(email) {
            return Err(ApprovalError::Validation(format!(
                "invalid email address: {}",
                email
            )));
        }
        if seen.insert(email.to_ascii_lowercase()) {
            out.push(email.to_string());
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_normalize_dedupes_case_insensitively() {
        let out = normalize_emails(&strings(&[" a@x.com", "A@X.com", "b@x.com"])).unwrap();
        assert_eq!(out, strings(&["a@x.com", "b@x.com"]));
    }

    #[test]
    fn test_normalize_rejects_malformed_and_empty() {
        assert!(matches!(
            normalize_emails(&[]),
            Err(ApprovalError::Validation(_))
        ));
        let err = normalize_emails(&strings(&["a@x.com", "not-an-email"])).unwrap_err();
        assert!(err.to_string().contains("not-an-email"));
    }

    #[test]
    fn test_normalize_caps_batch_size() {
        let many: Vec<String> = (0..=MAX_BATCH_SIZE).map(|i| format!("u{}@x.com", i)).collect();
        assert!(normalize_emails(&many).is_err());
    }

    #[test]
    fn test_parse_invitable_rejects_owners_and_unknown() {
        assert_eq!(parse_invitable("juryMembers").unwrap(), Relation::JuryMembers);
        assert!(matches!(parse_invitable("owners"), Err(ApprovalError::Validation(_))));
        assert!(matches!(parse_invitable("admins"), Err(ApprovalError::Validation(_))));
    }
}
