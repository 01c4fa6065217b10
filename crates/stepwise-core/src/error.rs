use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::provider::ProviderStage;

#[derive(Debug, Error)]
pub enum StepwiseError {
    // Registry errors
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Workflow already registered with a different definition: {0}")]
    DuplicateWorkflow(String),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("No active execution: {0}")]
    NoActiveExecution(String),

    #[error("Execution already active: {0}")]
    ExecutionAlreadyActive(String),

    #[error("Execution {execution_id} is not suspended (status: {status})")]
    NotSuspended { execution_id: String, status: String },

    #[error("Execution {execution_id} is not running (status: {status})")]
    NotRunning { execution_id: String, status: String },

    // Input errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // Generation provider errors
    #[error("Provider error during {stage}: {message}")]
    Provider {
        message: String,
        stage: ProviderStage,
        status_code: Option<u16>,
    },

    // Streaming errors
    #[error("Stream error: {0}")]
    Stream(String),

    // Step errors
    #[error("Step failed: {0}")]
    Step(String),

    #[error("Execution {execution_id} failed at step {step_id}: {message}")]
    ExecutionFailed {
        execution_id: String,
        step_id: String,
        message: String,
    },

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Caller-facing error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    ValidationError,
    ProviderError,
    StreamError,
    ExecutionFailed,
    Internal,
}

impl StepwiseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::WorkflowNotFound(_) | Self::ExecutionNotFound(_) | Self::NoActiveExecution(_) => {
                ErrorKind::NotFound
            }
            Self::DuplicateWorkflow(_)
            | Self::ExecutionAlreadyActive(_)
            | Self::NotSuspended { .. }
            | Self::NotRunning { .. } => ErrorKind::InvalidState,
            Self::Validation(_) => ErrorKind::ValidationError,
            Self::Provider { .. } => ErrorKind::ProviderError,
            Self::Stream(_) => ErrorKind::StreamError,
            Self::Step(_) | Self::ExecutionFailed { .. } => ErrorKind::ExecutionFailed,
            Self::Config(_)
            | Self::ConfigNotFound(_)
            | Self::Database(_)
            | Self::Internal(_)
            | Self::Io(_)
            | Self::Json(_) => ErrorKind::Internal,
        }
    }

    /// Shorthand for a step body failure.
    pub fn step(message: impl Into<String>) -> Self {
        Self::Step(message.into())
    }
}

pub type Result<T> = std::result::Result<T, StepwiseError>;
