use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::relation::Relation;

/// One invitation of one identity into one project relation.
///
/// The `token` is the redemption credential delivered by email. It stays on the
/// row after redemption so the audit trail is complete, but the status guard
/// makes it unusable a second time.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub project_id: Uuid,
    pub relation: Relation,
    pub invited_user_id: Uuid,
    pub token: String,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub notified_at: Option<DateTime<Utc>>,
    /// Failed invitation sends so far.
    pub delivery_attempts: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl ApprovalRequest {
    /// Build a fresh PENDING request with a newly generated token.
    pub fn pending(project_id: Uuid, relation: Relation, invited_user_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            relation,
            invited_user_id,
            token: generate_token(),
            status: ApprovalStatus::Pending,
            created_at: Utc::now(),
            decided_at: None,
            notified_at: None,
            delivery_attempts: 0,
            last_attempt_at: None,
        }
    }

    /// Short, log-safe prefix of the token.
    pub fn token_hint(&self) -> &str {
        token_hint(&self.token)
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for ApprovalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(ApprovalStatus::Pending),
            "approved" => Ok(ApprovalStatus::Approved),
            "rejected" => Ok(ApprovalStatus::Rejected),
            other => Err(format!("unknown approval status: {}", other)),
        }
    }
}

/// Human-readable view of an approval, shown on the confirmation page.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalDetails {
    pub project_name: String,
    pub user_email: String,
    pub user_name: String,
    pub relation: Relation,
    pub status: ApprovalStatus,
    pub token: String,
}

/// Generate a redemption token: 32 bytes from the OS CSPRNG, hex-encoded.
///
/// The 256-bit space makes collisions negligible; the unique index on
/// `approval_requests.token` is the backstop.
pub fn generate_token() -> String {
    use rand::rngs::OsRng;
    use rand::RngCore;

    let mut random_bytes = [0u8; 32];
    OsRng.fill_bytes(&mut random_bytes);
    hex::encode(random_bytes)
}

pub fn token_hint(token: &str) -> &str {
    token.get(..8).unwrap_or(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_tokens_are_long_hex_and_distinct() {
        let tokens: HashSet<String> = (0..500).map(|_| generate_token()).collect();
        assert_eq!(tokens.len(), 500);
        for t in &tokens {
            assert_eq!(t.len(), 64);
            assert!(t.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn test_pending_request_starts_undecided() {
        let req = ApprovalRequest::pending(Uuid::new_v4(), Relation::Members, Uuid::new_v4());
        assert_eq!(req.status, ApprovalStatus::Pending);
        assert!(req.decided_at.is_none());
        assert!(req.notified_at.is_none());
        assert_eq!(req.token_hint().len(), 8);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&ApprovalStatus::Approved).unwrap();
        assert_eq!(json, "\"approved\"");
        assert_eq!("PENDING".parse::<ApprovalStatus>(), Ok(ApprovalStatus::Pending));
        assert!("expired".parse::<ApprovalStatus>().is_err());
    }

    #[test]
    fn test_token_hint_handles_short_input() {
        assert_eq!(token_hint("abc"), "abc");
        assert_eq!(token_hint("0123456789abcdef"), "01234567");
    }
}
