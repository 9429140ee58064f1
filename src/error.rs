use thiserror::Error;

/// Main error type for the treasury decision engine
#[derive(Error, Debug)]
pub enum GuardError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Submission errors (never enqueued)
    #[error("Validation failed: {0}")]
    Validation(String),

    // Execution errors
    #[error("Action execution failed: {0}")]
    Execution(#[from] ActionError),

    #[error("No handler registered for action type {0}")]
    HandlerMissing(String),

    // Profile errors
    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Profile already exists: {0}")]
    ProfileExists(String),

    #[error("Profile is locked: {0}")]
    ProfileLocked(String),

    // Startup errors
    #[error("Invalid conflict rule table: {0}")]
    RuleTable(String),

    // Channel errors
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for GuardError
pub type Result<T> = std::result::Result<T, GuardError>;

/// Specific error types for action execution
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActionError {
    #[error("Handler failed: {0}")]
    Failed(String),

    #[error("Timeout after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Gave up after {attempts} attempts: {last}")]
    MaxAttemptsExceeded { attempts: u32, last: String },
}

impl ActionError {
    pub fn failed(reason: impl Into<String>) -> Self {
        ActionError::Failed(reason.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_error_converts_into_guard_error() {
        let err: GuardError = ActionError::Timeout { elapsed_ms: 250 }.into();
        assert_eq!(err.to_string(), "Action execution failed: Timeout after 250ms");
    }

    #[test]
    fn test_validation_message() {
        let err = GuardError::Validation("priority 7 out of range".into());
        assert!(err.to_string().contains("priority 7"));
    }
}
