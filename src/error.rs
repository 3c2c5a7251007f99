//! Error types for the research orchestrator
//!
//! Only orchestration-layer failures live here. Tool failures are values
//! (`tools::ToolError`) and worker failures are recorded as failed steps,
//! so neither ever crosses the Orchestrator boundary as an error.

use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Core Pipeline Errors
    // =============================

    #[error("Invalid task: {0}")]
    InvalidTask(String),

    #[error("Routing deadlock: {0}")]
    RoutingDeadlock(String),

    #[error("Router contract violation: {0}")]
    ContractViolation(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("LLM call timed out after {0}s")]
    LlmTimeout(u64),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("File context error: {0}")]
    FileError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("UUID parse error: {0}")]
    UuidError(#[from] uuid::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<sqlx::Error> for OrchestrationError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => OrchestrationError::NotFound("row not found".to_string()),
            other => OrchestrationError::DatabaseError(other.to_string()),
        }
    }
}
