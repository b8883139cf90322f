//! Error types for the knuto operator

use thiserror::Error;

/// Errors that can occur during operator operations
#[derive(Error, Debug)]
pub enum OperatorError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Resource not found
    #[error("Resource not found: {kind}/{name} in namespace {namespace}")]
    NotFound {
        kind: String,
        name: String,
        namespace: String,
    },

    /// A create raced with another writer and lost
    #[error("Resource already exists: {kind}/{name} in namespace {namespace}")]
    AlreadyExists {
        kind: String,
        name: String,
        namespace: String,
    },

    /// Optimistic concurrency check failed on update
    #[error("Conflicting update of {kind}/{name} in namespace {namespace}")]
    Conflict {
        kind: String,
        name: String,
        namespace: String,
    },

    /// The target of a mirror exists but was not mirrored from the requesting source
    #[error("{kind} {namespace}/{name} already exists and is not mirrored from {requested_by}")]
    ForeignObject {
        kind: String,
        name: String,
        namespace: String,
        requested_by: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Reconciliation failed
    #[error("Reconciliation failed: {0}")]
    ReconcileFailed(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// YAML serialization error
    #[error("YAML serialization error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Configuration file could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for operator operations
pub type Result<T> = std::result::Result<T, OperatorError>;

impl OperatorError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OperatorError::KubeError(_)
                | OperatorError::AlreadyExists { .. }
                | OperatorError::Conflict { .. }
                | OperatorError::ReconcileFailed(_)
        )
    }

    /// Get a suggested requeue delay for retryable errors
    pub fn requeue_delay(&self) -> Option<std::time::Duration> {
        match self {
            // Another writer just touched the object; the next attempt sees a fresh version.
            OperatorError::AlreadyExists { .. } | OperatorError::Conflict { .. } => {
                Some(std::time::Duration::from_secs(1))
            }
            e if e.is_retryable() => Some(std::time::Duration::from_secs(30)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OperatorError::NotFound {
            kind: "KafkaUser".to_string(),
            name: "team-a-svc".to_string(),
            namespace: "kafka".to_string(),
        };
        assert!(err.to_string().contains("KafkaUser"));
        assert!(err.to_string().contains("team-a-svc"));
        assert!(err.to_string().contains("kafka"));
    }

    #[test]
    fn test_retryable_errors() {
        let conflict = OperatorError::Conflict {
            kind: "KafkaTopic".to_string(),
            name: "ns-t".to_string(),
            namespace: "kafka".to_string(),
        };
        assert!(conflict.is_retryable());

        let config_err = OperatorError::InvalidConfig("test".to_string());
        assert!(!config_err.is_retryable());

        let not_found = OperatorError::NotFound {
            kind: "Secret".to_string(),
            name: "x".to_string(),
            namespace: "y".to_string(),
        };
        assert!(!not_found.is_retryable());
    }

    #[test]
    fn test_foreign_object_is_final() {
        let err = OperatorError::ForeignObject {
            kind: "KafkaUser".to_string(),
            name: "team-a-svc".to_string(),
            namespace: "kafka".to_string(),
            requested_by: "team/a-svc".to_string(),
        };
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "KafkaUser kafka/team-a-svc already exists and is not mirrored from team/a-svc"
        );
    }

    #[test]
    fn test_requeue_delay() {
        let already_exists = OperatorError::AlreadyExists {
            kind: "KafkaUser".to_string(),
            name: "ns-user".to_string(),
            namespace: "kafka".to_string(),
        };
        assert_eq!(
            already_exists.requeue_delay(),
            Some(std::time::Duration::from_secs(1))
        );

        let retryable = OperatorError::ReconcileFailed("test".to_string());
        assert_eq!(
            retryable.requeue_delay(),
            Some(std::time::Duration::from_secs(30))
        );

        let not_retryable = OperatorError::InvalidConfig("test".to_string());
        assert!(not_retryable.requeue_delay().is_none());
    }
}
