//! Errors raised while driving lifecycle workflows

use thiserror::Error;

/// Errors from workflow stages and their collaborators
#[derive(Debug, Error)]
pub enum Error {
    /// Inventory, vars or playbook failure
    #[error(transparent)]
    Kubespray(#[from] keel_kubespray::Error),

    /// Shared configuration, kube or I/O failure
    #[error(transparent)]
    Common(#[from] keel_common::Error),

    /// A cluster or machine driver rejected the request
    #[error("driver error [{driver}]: {message}")]
    Driver {
        /// Driver that failed (e.g. "kubespray")
        driver: String,
        /// Description of what failed
        message: String,
    },

    /// Cluster, machine or resource records could not be read or written
    #[error("store error for {object}: {message}")]
    Store {
        /// Object id the operation targeted
        object: String,
        /// Description of what failed
        message: String,
    },

    /// Helm release lookup or mutation failed
    #[error("helm error for {namespace}/{release}: {message}")]
    Helm {
        /// Release namespace
        namespace: String,
        /// Release name
        release: String,
        /// Description of what failed
        message: String,
    },

    /// The task runtime refused or lost a task
    #[error("task runtime error for {task}: {message}")]
    Runtime {
        /// Task the operation targeted
        task: String,
        /// Description of what failed
        message: String,
    },

    /// The cluster is already registered with the client registry
    #[error("cluster {cluster} already added to client registry")]
    AlreadyRegistered {
        /// Cluster id
        cluster: String,
    },

    /// A workflow stopped at a failed stage
    #[error("task {task} failed at stage {stage}: {reason}")]
    WorkflowFailed {
        /// Task that failed
        task: String,
        /// Last stage entered
        stage: String,
        /// Reason handed to the failure handler
        reason: String,
    },
}

impl Error {
    /// Create a driver error
    pub fn driver(driver: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Driver {
            driver: driver.into(),
            message: msg.into(),
        }
    }

    /// Create a store error for an object
    pub fn store(object: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Store {
            object: object.into(),
            message: msg.into(),
        }
    }

    /// Create a helm error for a release
    pub fn helm(
        namespace: impl Into<String>,
        release: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Helm {
            namespace: namespace.into(),
            release: release.into(),
            message: msg.into(),
        }
    }

    /// Create a runtime error for a task
    pub fn runtime(task: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Runtime {
            task: task.into(),
            message: msg.into(),
        }
    }

    /// True when the error only says the cluster is registered already
    pub fn is_already_registered(&self) -> bool {
        matches!(self, Self::AlreadyRegistered { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kubespray_errors_keep_their_message() {
        let err: Error = keel_kubespray::Error::validation("etcd nodes is empty").into();
        assert_eq!(err.to_string(), "validation error: etcd nodes is empty");
    }

    #[test]
    fn workflow_failure_names_task_and_stage() {
        let err = Error::WorkflowFailed {
            task: "cluster-create/c1".to_string(),
            stage: "addons-applied".to_string(),
            reason: "boom".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "task cluster-create/c1 failed at stage addons-applied: boom"
        );
    }

    #[test]
    fn only_registration_conflicts_are_tolerable() {
        assert!(Error::AlreadyRegistered {
            cluster: "c1".to_string()
        }
        .is_already_registered());
        assert!(!Error::store("c1", "gone").is_already_registered());
    }
}
