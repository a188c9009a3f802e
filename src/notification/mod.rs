pub mod email;
pub mod invitation;

use async_trait::async_trait;
use serde::Serialize;

/// A fully rendered outbound email.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

/// Delivers emails. Failures are transient from the workflow's point of view:
/// callers log them and move on, they never roll back approval state.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> anyhow::Result<()>;

    /// `false` when there is nowhere to send to. Invitations are then left
    /// undelivered so a later, configured process picks them up.
    fn is_configured(&self) -> bool {
        true
    }
}
