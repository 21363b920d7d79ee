//! Business logic services.
//!
//! This module contains the Gerrit client and the decision engine that
//! turns query results into approvals.
//!
//! Everything except `gerrit_client` talks to the server only through the
//! [`ReviewService`] trait and can be driven by a fake in tests.

pub mod detail_loader;
pub mod eligibility;
pub mod gerrit_client;
pub mod poll_loop;
pub mod review_service;
pub mod seen_state;
pub mod status_server;

pub use eligibility::EligibilityEvaluator;
pub use gerrit_client::GerritClient;
pub use poll_loop::{CycleReport, PollConfig, PollHandle, PollLoop};
pub use review_service::{ReviewReply, ReviewService};
pub use seen_state::SeenStateStore;
pub use status_server::StatusServer;
