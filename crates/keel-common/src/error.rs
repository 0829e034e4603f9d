//! Error types shared across keel crates
//!
//! Errors are structured with fields to aid debugging in production.
//! Variants carry the cluster name or the operational context where the
//! failure happened so operators can tell which run broke.

use thiserror::Error;

/// Main error type for keel common operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Validation error for cluster inputs
    #[error("validation error for {cluster}: {message}")]
    Validation {
        /// Name of the cluster with invalid input
        cluster: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field (e.g., "kube_version")
        field: Option<String>,
    },

    /// Configuration could not be loaded or is inconsistent
    #[error("config error: {message}")]
    Config {
        /// Description of what failed
        message: String,
        /// Configuration key involved, if known
        key: Option<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The document kind being serialized (if known)
        kind: Option<String>,
    },

    /// Filesystem or process I/O error
    #[error("io error [{context}]: {source}")]
    Io {
        /// What was being done when the error happened
        context: String,
        /// The underlying I/O error
        source: std::io::Error,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "apply_manifest", "create_client")
        context: String,
    },
}

impl Error {
    /// Create a validation error with cluster context and field name
    pub fn validation_for_field(
        cluster: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            cluster: cluster.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
            key: None,
        }
    }

    /// Create a config error for a specific key
    pub fn config_for_key(key: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
            key: Some(key.into()),
        }
    }

    /// Create a serialization error with document kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Wrap an I/O error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation, config and serialization errors need an input fix.
    /// Kubernetes errors are retryable unless the API rejected the request.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::Validation { .. } => false,
            Error::Config { .. } => false,
            Error::Serialization { .. } => false,
            Error::Io { .. } => true,
            Error::Internal { .. } => true,
        }
    }

    /// Get the cluster name if this error is associated with a specific cluster
    pub fn cluster(&self) -> Option<&str> {
        match self {
            Error::Validation { cluster, .. } => Some(cluster),
            _ => None,
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Io { context, .. } => Some(context),
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // Story Tests: Errors surfaced while preparing a provisioning run
    // ==========================================================================

    /// Story: a bad version string is rejected before anything runs
    #[test]
    fn story_validation_names_cluster_and_field() {
        let err = Error::validation_for_field("prod", "kube_version", "version is empty");
        assert!(err.to_string().contains("validation error for prod"));
        assert_eq!(err.cluster(), Some("prod"));
        match &err {
            Error::Validation { field, .. } => assert_eq!(field.as_deref(), Some("kube_version")),
            _ => panic!("Expected Validation variant"),
        }
        assert!(!err.is_retryable());
    }

    /// Story: config problems are never retried
    #[test]
    fn story_config_errors_require_operator_fix() {
        let err = Error::config_for_key("KEEL_ANSIBLE_ROOT", "path is empty");
        assert!(err.to_string().contains("config error"));
        assert!(!err.is_retryable());
        assert_eq!(err.cluster(), None);
    }

    /// Story: I/O failures keep the step that failed
    #[test]
    fn story_io_errors_keep_context() {
        let err = Error::io(
            "write inventory",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.context(), Some("write inventory"));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("write inventory"));
    }

    #[test]
    fn internal_errors_report_where_they_happened() {
        let err = Error::internal_with_context("apply_manifest", "boom");
        assert_eq!(err.context(), Some("apply_manifest"));
        assert!(err.is_retryable());
    }

    #[test]
    fn serialization_errors_are_not_retryable() {
        let err = Error::serialization_for_kind("KubesprayVars", "bad");
        assert!(!err.is_retryable());
        match err {
            Error::Serialization { kind, .. } => assert_eq!(kind.as_deref(), Some("KubesprayVars")),
            _ => panic!("Expected Serialization variant"),
        }
    }
}
