use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlannerAgentError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse planner response: {source}\n  body: {body}")]
    Parse {
        body: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Planner endpoint returned status {status}: {body}")]
    Endpoint { status: u16, body: String },
}

pub type Result<T> = std::result::Result<T, PlannerAgentError>;
