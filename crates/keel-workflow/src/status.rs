//! Status codes written to clusters, machines and cluster resources
//!
//! The string forms are persisted by the domain layer and shown to
//! operators, so they never change once released.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a cluster
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    /// Record exists, nothing provisioned
    #[default]
    Init,
    /// Create workflow started
    Creating,
    /// Create workflow failed outside a more specific stage
    CreateFail,
    /// Machines are being created
    CreatingMachine,
    /// Machine creation failed
    CreateMachineFail,
    /// A playbook run is in flight
    Deploying,
    /// A playbook run failed
    DeployFail,
    /// Addon manifests or releases failed to apply
    ApplyAddonsFail,
    /// API server answered
    Running,
    /// API server stopped answering
    Lost,
    /// API server never answered after provisioning
    Unknown,
    /// Node removal failed
    Error,
    /// Delete workflow started
    Deleting,
    /// Delete workflow failed
    DeleteFail,
}

impl ClusterStatus {
    /// Persisted string form
    pub fn as_str(self) -> &'static str {
        match self {
            ClusterStatus::Init => "init",
            ClusterStatus::Creating => "creating",
            ClusterStatus::CreateFail => "create_fail",
            ClusterStatus::CreatingMachine => "creating_machine",
            ClusterStatus::CreateMachineFail => "create_machine_fail",
            ClusterStatus::Deploying => "deploying",
            ClusterStatus::DeployFail => "deploy_fail",
            ClusterStatus::ApplyAddonsFail => "apply_addons_fail",
            ClusterStatus::Running => "running",
            ClusterStatus::Lost => "lost",
            ClusterStatus::Unknown => "unknown",
            ClusterStatus::Error => "error",
            ClusterStatus::Deleting => "deleting",
            ClusterStatus::DeleteFail => "delete_fail",
        }
    }

    /// True for the terminal `*_fail` codes and `error`
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            ClusterStatus::CreateFail
                | ClusterStatus::CreateMachineFail
                | ClusterStatus::DeployFail
                | ClusterStatus::ApplyAddonsFail
                | ClusterStatus::Error
                | ClusterStatus::DeleteFail
        )
    }
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a machine
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineStatus {
    /// Record exists, nothing provisioned
    #[default]
    Init,
    /// Create workflow started
    Creating,
    /// Create workflow failed
    CreateFail,
    /// Backing resource is being prepared
    Prepare,
    /// Preparing the backing resource failed
    PrepareFail,
    /// Backing resource is up with a private IP
    Running,
    /// Joined the cluster
    Ready,
    /// Delete workflow started
    Deleting,
    /// Delete workflow failed
    DeleteFail,
    /// Backing resource is being released
    Terminating,
    /// Releasing the backing resource failed
    TerminateFail,
}

impl MachineStatus {
    /// Persisted string form
    pub fn as_str(self) -> &'static str {
        match self {
            MachineStatus::Init => "init",
            MachineStatus::Creating => "creating",
            MachineStatus::CreateFail => "create_fail",
            MachineStatus::Prepare => "prepare",
            MachineStatus::PrepareFail => "prepare_fail",
            MachineStatus::Running => "running",
            MachineStatus::Ready => "ready",
            MachineStatus::Deleting => "deleting",
            MachineStatus::DeleteFail => "delete_fail",
            MachineStatus::Terminating => "terminating",
            MachineStatus::TerminateFail => "terminate_fail",
        }
    }

    /// Machine has a live backing resource
    pub fn is_up(self) -> bool {
        matches!(self, MachineStatus::Running | MachineStatus::Ready)
    }
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a generic cluster sub-resource (component, secret, storage class...)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Creating,
    CreateFail,
    Updating,
    UpdateFail,
    Deleting,
    DeleteFail,
    Syncing,
    SyncFail,
    Active,
}

impl ResourceStatus {
    /// Persisted string form
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceStatus::Creating => "creating",
            ResourceStatus::CreateFail => "create_fail",
            ResourceStatus::Updating => "updating",
            ResourceStatus::UpdateFail => "update_fail",
            ResourceStatus::Deleting => "deleting",
            ResourceStatus::DeleteFail => "delete_fail",
            ResourceStatus::Syncing => "syncing",
            ResourceStatus::SyncFail => "sync_fail",
            ResourceStatus::Active => "active",
        }
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
