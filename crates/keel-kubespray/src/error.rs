//! Errors raised while preparing and running a playbook

use std::path::PathBuf;

use thiserror::Error;

use crate::executor::ExitCode;

/// Errors from inventory construction, variable resolution and playbook runs
#[derive(Debug, Error)]
pub enum Error {
    /// Input rejected before any process was started
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
        /// Host the problem belongs to, if any
        host: Option<String>,
    },

    /// SSH private key material could not be parsed
    #[error("invalid ssh private key for {host}: {reason}")]
    InvalidPrivateKey {
        /// Host the key was attached to
        host: String,
        /// Why parsing failed
        reason: String,
    },

    /// Kubernetes version string is empty or malformed
    #[error("invalid kubernetes version {version:?}: {reason}")]
    Version {
        /// The offending input
        version: String,
        /// Why it was rejected
        reason: String,
    },

    /// Playbook file does not exist under the playbook set
    #[error("playbook not found: {}", path.display())]
    PlaybookNotFound {
        /// Path that was checked
        path: PathBuf,
    },

    /// The playbook runner could not be started
    #[error("failed to start {program}: {source}")]
    Spawn {
        /// Binary that was launched
        program: String,
        /// Underlying spawn error
        source: std::io::Error,
    },

    /// The playbook runner exited unsuccessfully
    #[error("ansible-playbook error: {code}\n\n{stderr}")]
    Playbook {
        /// Classified exit status
        code: ExitCode,
        /// Captured stderr
        stderr: String,
    },

    /// Reading the runner's output failed mid-run
    #[error("error managing results output: {message}")]
    OutputStream {
        /// Description of what failed
        message: String,
    },

    /// The run exceeded its time budget and was killed
    #[error("playbook {action} timed out after {secs}s")]
    Timeout {
        /// Action label of the run
        action: String,
        /// Budget that was exceeded
        secs: u64,
    },

    /// One or more temporary artifacts could not be removed
    #[error("cleanup failed: {}", join_errors(errors))]
    Cleanup {
        /// Every failure, one per artifact
        errors: Vec<String>,
    },

    /// Filesystem error while materializing run artifacts
    #[error("io error [{context}]: {source}")]
    Io {
        /// What was being done
        context: String,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Variables could not be serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn join_errors(errors: &[String]) -> String {
    errors.join("; ")
}

impl Error {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            host: None,
        }
    }

    /// Create a validation error scoped to one host
    pub fn validation_for_host(host: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            host: Some(host.into()),
        }
    }

    /// Create a version error
    pub fn version(version: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Version {
            version: version.into(),
            reason: reason.into(),
        }
    }

    /// Wrap an I/O error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// True for errors detected before any subprocess was launched
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Error::Validation { .. }
                | Error::InvalidPrivateKey { .. }
                | Error::Version { .. }
                | Error::PlaybookNotFound { .. }
        )
    }

    /// Exit classification, if this error came from a finished run
    pub fn exit_code(&self) -> Option<ExitCode> {
        match self {
            Error::Playbook { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playbook_errors_lead_with_classification() {
        let err = Error::Playbook {
            code: ExitCode::HostUnreachable,
            stderr: "fatal: [node2]: UNREACHABLE!".to_string(),
        };
        let text = err.to_string();
        assert!(text.starts_with("ansible-playbook error: one or more host unreachable"));
        assert!(text.contains("UNREACHABLE"));
        assert_eq!(err.exit_code(), Some(ExitCode::HostUnreachable));
        assert!(!err.is_precondition());
    }

    #[test]
    fn cleanup_errors_list_every_failure() {
        let err = Error::Cleanup {
            errors: vec!["clear host node1: denied".into(), "clear host node2: busy".into()],
        };
        let text = err.to_string();
        assert!(text.contains("node1"));
        assert!(text.contains("node2"));
    }

    #[test]
    fn missing_playbook_is_a_precondition() {
        let err = Error::PlaybookNotFound {
            path: PathBuf::from("/opt/yunion/ansible/kubespray/cluster.yml"),
        };
        assert!(err.is_precondition());
        assert!(err.to_string().contains("cluster.yml"));
    }
}
