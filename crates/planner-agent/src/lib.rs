//! Client for the planning capability inquest consumes as an opaque
//! request/response contract: ordered conversation messages in, a batch of
//! `{kind, payload}` actions plus reasoning out.

pub mod client;
pub mod error;
pub mod types;

pub use client::{HttpPlanner, PlannerClient};
pub use error::{PlannerAgentError, Result};
pub use types::{PlanOutcome, PlannedAction, PlannerMessage, Role};
