// src/infra/errors.rs — Error types for promptkoi

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OptimizerError {
    // Provider errors (recovered per unit inside a batch)
    #[error("Provider '{provider}' error: {message}")]
    Provider {
        provider: String,
        message: String,
        retriable: bool,
    },

    // User / setup errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Task '{task_id}' not found")]
    TaskNotFound { task_id: String },

    #[error("Iteration '{iteration_id}' not found in task '{task_id}'")]
    IterationNotFound {
        task_id: String,
        iteration_id: String,
    },

    #[error("Iteration '{iteration_id}' is not waiting for feedback")]
    NotAwaitingFeedback { iteration_id: String },

    #[error("Task '{task_id}' is already running")]
    AlreadyRunning { task_id: String },

    /// Cooperative stop. Not a fault: callers map it to a paused task.
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Template error: {0}")]
    Template(String),

    // Infra
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OptimizerError {
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            OptimizerError::Provider {
                retriable: true,
                ..
            }
        )
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, OptimizerError::Cancelled)
    }
}

impl From<minijinja::Error> for OptimizerError {
    fn from(e: minijinja::Error) -> Self {
        OptimizerError::Template(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_distinguishable() {
        assert!(OptimizerError::Cancelled.is_cancellation());
        assert!(!OptimizerError::Configuration("x".into()).is_cancellation());
    }

    #[test]
    fn test_retriable_provider_error() {
        let e = OptimizerError::Provider {
            provider: "qwen".into(),
            message: "timeout".into(),
            retriable: true,
        };
        assert!(e.is_retriable());
        assert!(!OptimizerError::Cancelled.is_retriable());
    }

    #[test]
    fn test_display_messages() {
        let e = OptimizerError::TaskNotFound {
            task_id: "t-1".into(),
        };
        assert_eq!(e.to_string(), "Task 't-1' not found");
        let e = OptimizerError::Configuration("missing target model".into());
        assert_eq!(e.to_string(), "Configuration error: missing target model");
    }
}
