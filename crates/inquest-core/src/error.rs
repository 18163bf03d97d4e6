use thiserror::Error;

#[derive(Debug, Error)]
pub enum InquestError {
    #[error("integration not found: {0}")]
    IntegrationNotFound(u64),

    #[error("issue not found: {0}")]
    IssueNotFound(u64),

    #[error("event log entry not found: {0}")]
    EventLogNotFound(u64),

    #[error("gap not found: {0}")]
    GapNotFound(u64),

    #[error("no issue tracker registered for provider: {0}")]
    TrackerNotRegistered(String),

    #[error("no event mapper registered for provider: {0}")]
    MapperNotRegistered(String),

    #[error("unrecognized event: {0}")]
    UnrecognizedEvent(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("action execution: {0}")]
    ActionExecution(String),

    #[error("invalid gap transition from {from} to {to}")]
    InvalidGapTransition { from: String, to: String },

    #[error("store error: {0}")]
    Store(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("tracker error: {0}")]
    Tracker(String),

    #[error("planner error: {0}")]
    Planner(#[from] planner_agent::PlannerAgentError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl InquestError {
    /// Wrap any displayable storage-layer error.
    pub(crate) fn store(e: impl std::fmt::Display) -> Self {
        InquestError::Store(e.to_string())
    }

    /// Wrap any displayable queue-layer error.
    pub(crate) fn queue(e: impl std::fmt::Display) -> Self {
        InquestError::Queue(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, InquestError>;
