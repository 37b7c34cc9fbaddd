//! Error types for the onboarding service.

use uuid::Uuid;

use crate::onboarding::Step;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Onboarding step {step} failed: {source}")]
    Step {
        step: Step,
        #[source]
        source: CollaboratorError,
    },

    #[error("Consumer error: {0}")]
    Consumer(#[from] ConsumerError),
}

impl Error {
    /// The onboarding step that failed, if this error came from a run.
    pub fn step(&self) -> Option<Step> {
        match self {
            Self::Step { step, .. } => Some(*step),
            _ => None,
        }
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Failures raised by the external collaborators the orchestrator calls.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("{service} unavailable: {reason}")]
    Unavailable { service: String, reason: String },

    #[error("{service} rejected request for user {user_id}: {reason}")]
    Rejected {
        service: String,
        user_id: String,
        reason: String,
    },

    #[error("Storage failure: {0}")]
    Database(#[from] DatabaseError),
}

/// Event consumer errors.
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("Event queue closed")]
    QueueClosed,

    #[error("Event queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("Event {event_id} exhausted {attempts} attempts")]
    Exhausted { event_id: Uuid, attempts: u32 },
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_error_exposes_step() {
        let err = Error::Step {
            step: Step::Enrollment,
            source: CollaboratorError::Unavailable {
                service: "league".into(),
                reason: "timeout".into(),
            },
        };
        assert_eq!(err.step(), Some(Step::Enrollment));
        assert!(err.to_string().contains("enrollment"));
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn non_step_errors_have_no_step() {
        let err: Error = DatabaseError::Query("boom".into()).into();
        assert_eq!(err.step(), None);
    }
}
