//! Prometheus counters for the invitation workflow, served at `/metrics`.

use prometheus::{opts, Encoder, IntCounterVec, Registry, TextEncoder};

/// Workflow metrics. Each instance owns its registry so several engines can
/// coexist in one process (tests build many).
#[derive(Clone)]
pub struct WorkflowMetrics {
    registry: Registry,
    invitations_total: IntCounterVec,
    notifications_total: IntCounterVec,
    redemptions_total: IntCounterVec,
}

impl WorkflowMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let invitations_total = IntCounterVec::new(
            opts!("incubator_invitations_total", "Approval requests created"),
            &["relation"],
        )?;
        let notifications_total = IntCounterVec::new(
            opts!("incubator_notifications_total", "Invitation email deliveries"),
            &["outcome"],
        )?;
        let redemptions_total = IntCounterVec::new(
            opts!("incubator_redemptions_total", "Token redemption attempts"),
            &["outcome"],
        )?;

        registry.register(Box::new(invitations_total.clone()))?;
        registry.register(Box::new(notifications_total.clone()))?;
        registry.register(Box::new(redemptions_total.clone()))?;

        Ok(Self {
            registry,
            invitations_total,
            notifications_total,
            redemptions_total,
        })
    }

    pub fn invitation_created(&self, relation: &str, count: u64) {
        self.invitations_total
            .with_label_values(&[relation])
            .inc_by(count);
    }

    /// `outcome` is one of `sent`, `failed`.
    pub fn notification(&self, outcome: &str) {
        self.notifications_total.with_label_values(&[outcome]).inc();
    }

    /// `outcome` is one of `approved`, `rejected`, `not_found`, `already_decided`,
    /// `relation_mismatch`.
    pub fn redemption(&self, outcome: &str) {
        self.redemptions_total.with_label_values(&[outcome]).inc();
    }

    /// Render all metrics in the Prometheus text exposition format.
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}
