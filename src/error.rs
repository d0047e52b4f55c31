//! Error types for the financial report orchestrator

use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Run-terminating Errors
    // =============================

    #[error("Unknown capability: {0}")]
    UnknownCapability(String),

    #[error("Planning failed: {reason}")]
    PlanningFailed {
        reason: String,
        /// Raw response of the last rejected attempt, kept for diagnostics
        last_plan: Option<String>,
    },

    #[error("Capability '{capability}' is missing required context field '{field}'")]
    MissingContextField { capability: String, field: String },

    #[error("Invalid capability registry: {0}")]
    InvalidRegistry(String),

    // =============================
    // Collaborator Errors
    // =============================

    #[error("Capability error: {0}")]
    CapabilityError(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl OrchestrationError {
    /// Whether this error ends a run rather than a single step.
    pub fn is_run_terminating(&self) -> bool {
        matches!(
            self,
            OrchestrationError::UnknownCapability(_)
                | OrchestrationError::PlanningFailed { .. }
                | OrchestrationError::MissingContextField { .. }
                | OrchestrationError::InvalidRegistry(_)
        )
    }
}
