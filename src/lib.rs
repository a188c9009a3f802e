//! Incubator backend: project invitations and token-based approvals.
//!
//! The binary in `main.rs` wires these modules together; integration tests
//! in `tests/` drive them through [`approval::ApprovalEngine`] and the router
//! from [`api::app`].

pub mod api;
pub mod approval;
pub mod cli;
pub mod config;
pub mod errors;
pub mod jobs;
pub mod metrics;
pub mod models;
pub mod notification;
pub mod store;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub engine: approval::ApprovalEngine,
    pub config: config::Config,
}
