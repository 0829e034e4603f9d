//! Operation log events
//!
//! Every workflow completion and failure emits one event with the
//! `action`, `object`, `success` and `reason` fields. Collectors filter on
//! the `keel::oplog` target.

use std::fmt;

use tracing::{info, warn};

/// Operation recorded in the log
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    ClusterCreate,
    ClusterCreateMachines,
    ClusterDeployMachines,
    ClusterApplyAddons,
    ClusterSyncStatus,
    ClusterSync,
    ClusterDeleteMachines,
    ClusterDelete,
    MachineCreate,
    MachinePrepare,
    MachineTerminate,
    ResourceCreate,
    ResourceUpdate,
    ResourceDelete,
    ResourceSync,
}

impl Action {
    /// Name written to the `action` field
    pub fn as_str(self) -> &'static str {
        match self {
            Action::ClusterCreate => "cluster_create",
            Action::ClusterCreateMachines => "cluster_create_machines",
            Action::ClusterDeployMachines => "cluster_deploy_machines",
            Action::ClusterApplyAddons => "cluster_apply_addons",
            Action::ClusterSyncStatus => "cluster_sync_status",
            Action::ClusterSync => "cluster_sync",
            Action::ClusterDeleteMachines => "cluster_delete_machines",
            Action::ClusterDelete => "cluster_delete",
            Action::MachineCreate => "machine_create",
            Action::MachinePrepare => "machine_prepare",
            Action::MachineTerminate => "machine_terminate",
            Action::ResourceCreate => "resource_create",
            Action::ResourceUpdate => "resource_update",
            Action::ResourceDelete => "resource_delete",
            Action::ResourceSync => "resource_sync",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record a successful operation on `object`
pub fn success(action: Action, object: &str) {
    info!(
        target: "keel::oplog",
        action = %action,
        object = %object,
        success = true,
        "operation succeeded"
    );
}

/// Record a failed operation on `object`
pub fn failure(action: Action, object: &str, reason: &str) {
    warn!(
        target: "keel::oplog",
        action = %action,
        object = %object,
        success = false,
        reason = %reason,
        "operation failed"
    );
}
