//! In-process store used by tests and local demos.
//!
//! Every trait operation takes the single state lock for its whole duration,
//! which gives the same atomicity the Postgres transactions provide.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{ApprovalStore, IdentityStore, ProjectStore, Transition};
use crate::models::approval::{ApprovalRequest, ApprovalStatus};
use crate::models::identity::{Identity, Project};
use crate::models::relation::Relation;

#[derive(Default)]
struct State {
    users: HashMap<Uuid, Identity>,
    projects: HashMap<Uuid, Project>,
    // Insertion-ordered edges; the set guards against duplicates.
    edges: Vec<(Uuid, Relation, Uuid)>,
    edge_set: HashSet<(Uuid, Relation, Uuid)>,
    approvals: Vec<ApprovalRequest>,
}

impl State {
    fn attach(&mut self, project_id: Uuid, relation: Relation, user_id: Uuid) -> bool {
        let edge = (project_id, relation, user_id);
        if self.edge_set.insert(edge) {
            self.edges.push(edge);
            true
        } else {
            false
        }
    }

    fn transition(&mut self, token: &str, to: ApprovalStatus) -> Transition {
        let Some(req) = self.approvals.iter_mut().find(|r| r.token == token) else {
            return Transition::NotFound;
        };
        if req.status != ApprovalStatus::Pending {
            return Transition::AlreadyDecided(req.status);
        }
        req.status = to;
        req.decided_at = Some(Utc::now());
        Transition::Applied(req.clone())
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
    fail_writes: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, email: &str, first_name: &str, last_name: &str) -> Identity {
        let user = Identity {
            id: Uuid::new_v4(),
            email: email.to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
        };
        self.state.lock().await.users.insert(user.id, user.clone());
        user
    }

    pub async fn add_project(&self, name: &str) -> Project {
        let project = Project {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        self.state
            .lock()
            .await
            .projects
            .insert(project.id, project.clone());
        project
    }

    /// Make every subsequent write fail, simulating an unavailable database.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> anyhow::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("store unavailable");
        }
        Ok(())
    }

    pub async fn approval_count(&self) -> usize {
        self.state.lock().await.approvals.len()
    }
}

#[async_trait]
impl IdentityStore for InMemoryStore {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<Identity>> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<Identity>> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }
}

#[async_trait]
impl ProjectStore for InMemoryStore {
    async fn find_project(&self, id: Uuid) -> anyhow::Result<Option<Project>> {
        Ok(self.state.lock().await.projects.get(&id).cloned())
    }

    async fn attach_user(
        &self,
        project_id: Uuid,
        relation: Relation,
        user_id: Uuid,
    ) -> anyhow::Result<bool> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        if !state.projects.contains_key(&project_id) {
            anyhow::bail!("project {} does not exist", project_id);
        }
        if !state.users.contains_key(&user_id) {
            anyhow::bail!("user {} does not exist", user_id);
        }
        Ok(state.attach(project_id, relation, user_id))
    }

    async fn relation_members(
        &self,
        project_id: Uuid,
        relation: Relation,
    ) -> anyhow::Result<Vec<Identity>> {
        let state = self.state.lock().await;
        Ok(state
            .edges
            .iter()
            .filter(|(p, r, _)| *p == project_id && *r == relation)
            .filter_map(|(_, _, u)| state.users.get(u).cloned())
            .collect())
    }
}

#[async_trait]
impl ApprovalStore for InMemoryStore {
    async fn insert_batch(&self, requests: &[ApprovalRequest]) -> anyhow::Result<()> {
        self.check_writable()?;
        let mut state = self.state.lock().await;

        // Validate the whole batch before touching state.
        let mut seen: HashSet<&str> = state.approvals.iter().map(|r| r.token.as_str()).collect();
        for req in requests {
            if !seen.insert(req.token.as_str()) {
                anyhow::bail!("duplicate approval token");
            }
            if !state.projects.contains_key(&req.project_id) {
                anyhow::bail!("project {} does not exist", req.project_id);
            }
        }

        state.approvals.extend(requests.iter().cloned());
        Ok(())
    }

    async fn find_by_token(&self, token: &str) -> anyhow::Result<Option<ApprovalRequest>> {
        let state = self.state.lock().await;
        Ok(state.approvals.iter().find(|r| r.token == token).cloned())
    }

    async fn list_for_project(
        &self,
        project_id: Uuid,
        status: Option<ApprovalStatus>,
    ) -> anyhow::Result<Vec<ApprovalRequest>> {
        let state = self.state.lock().await;
        Ok(state
            .approvals
            .iter()
            .filter(|r| r.project_id == project_id)
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect())
    }

    async fn redeem(&self, token: &str) -> anyhow::Result<Transition> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        let outcome = state.transition(token, ApprovalStatus::Approved);
        if let Transition::Applied(ref req) = outcome {
            state.attach(req.project_id, req.relation, req.invited_user_id);
        }
        Ok(outcome)
    }

    async fn reject(&self, token: &str) -> anyhow::Result<Transition> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        Ok(state.transition(token, ApprovalStatus::Rejected))
    }

    async fn mark_notified(&self, id: Uuid, at: DateTime<Utc>) -> anyhow::Result<()> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        if let Some(req) = state.approvals.iter_mut().find(|r| r.id == id) {
            req.notified_at.get_or_insert(at);
        }
        Ok(())
    }

    async fn record_delivery_failure(&self, id: Uuid, at: DateTime<Utc>) -> anyhow::Result<()> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        if let Some(req) = state.approvals.iter_mut().find(|r| r.id == id) {
            req.delivery_attempts += 1;
            req.last_attempt_at = Some(at);
        }
        Ok(())
    }

    async fn list_undelivered(
        &self,
        created_before: DateTime<Utc>,
        max_attempts: i32,
        limit: i64,
    ) -> anyhow::Result<Vec<ApprovalRequest>> {
        let state = self.state.lock().await;
        let mut rows: Vec<ApprovalRequest> = state
            .approvals
            .iter()
            .filter(|r| {
                r.status == ApprovalStatus::Pending
                    && r.notified_at.is_none()
                    && r.delivery_attempts < max_attempts
                    && r.created_at < created_before
            })
            .cloned()
            .collect();
        // `None < Some(_)`: never-attempted rows sort first.
        rows.sort_by_key(|r| (r.last_attempt_at, r.created_at));
        rows.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        Ok(rows)
    }

    async fn ping(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
