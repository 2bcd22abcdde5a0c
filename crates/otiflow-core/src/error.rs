use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(i64),

    #[error("Invalid workflow: {0}")]
    InvalidWorkflow(String),

    #[error("Invalid run status: {0}")]
    InvalidRunStatus(String),

    #[error("Invalid log status: {0}")]
    InvalidLogStatus(String),

    #[error("Invalid run id: {0}")]
    InvalidRunId(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Rejected query: {0}")]
    RejectedQuery(String),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
