//! Domain objects and the collaborators workflows consume
//!
//! Cluster and machine records are owned by the domain layer. Workflows
//! read them and write status transitions through [`ClusterStore`]; every
//! other side effect goes through one of the traits below so that tests
//! can substitute mocks.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};

use keel_kubespray::{DeployAction, ExtraConfig, ProviderType};

use crate::engine::Payload;
use crate::status::{ClusterStatus, MachineStatus, ResourceStatus};
use crate::Result;

/// A logical Kubernetes cluster
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Record id
    pub id: String,
    /// Display name
    pub name: String,
    /// Target Kubernetes version, e.g. "v1.22.9"
    pub kube_version: String,
    /// Infrastructure the machines run on
    pub provider: ProviderType,
    /// Current status
    pub status: ClusterStatus,
    /// Registry settings
    #[serde(default)]
    pub extra_config: Option<ExtraConfig>,
}

/// Role of a machine inside its cluster
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineRole {
    /// Runs the control plane and etcd
    Controlplane,
    /// Runs workloads only
    Node,
}

/// A member machine of a cluster
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    /// Record id
    pub id: String,
    /// Name, also used as the inventory hostname
    pub name: String,
    /// Owning cluster
    pub cluster_id: String,
    /// Role in the cluster
    pub role: MachineRole,
    /// Current status
    pub status: MachineStatus,
    /// Private IP once the backing resource is prepared
    #[serde(default)]
    pub private_ip: Option<String>,
}

/// Request to add one machine to a cluster
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateMachineData {
    /// Machine name
    pub name: String,
    /// Role in the cluster
    pub role: MachineRole,
    /// Driver-specific settings (image, flavor, network...)
    #[serde(default)]
    pub config: Payload,
}

/// An addon chart to keep installed on a cluster
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HelmChart {
    /// Release namespace
    pub namespace: String,
    /// Release name
    pub release: String,
    /// Chart reference, e.g. "stable/monitor-stack"
    pub chart: String,
    /// Chart version; latest when unset
    #[serde(default)]
    pub version: Option<String>,
    /// Values passed to install or upgrade
    #[serde(default)]
    pub values: Payload,
}

/// An installed Helm release
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Release {
    /// Release namespace
    pub namespace: String,
    /// Release name
    pub name: String,
    /// Deployed chart version
    pub version: Option<String>,
}

/// A generic cluster sub-resource (component, secret, storage class...)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClusterResource {
    /// Record id
    pub id: String,
    /// Resource kind, e.g. "StorageClass"
    pub kind: String,
    /// Resource name
    pub name: String,
    /// Owning cluster
    pub cluster_id: String,
    /// Namespace for namespaced kinds
    #[serde(default)]
    pub namespace: Option<String>,
    /// Current status
    pub status: ResourceStatus,
}

/// SSH access to one machine
#[derive(Clone, Default, PartialEq, Eq)]
pub struct LoginInfo {
    /// Address reachable over SSH
    pub address: String,
    /// Login user
    pub user: String,
    /// Login password
    pub password: Option<String>,
    /// PEM private key material
    pub private_key: Option<String>,
    /// External id of the machine's cloud region, e.g. `aws/ap-southeast-1`
    pub region_external_id: Option<String>,
}

impl std::fmt::Debug for LoginInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginInfo")
            .field("address", &self.address)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("private_key", &self.private_key.as_ref().map(|_| "[REDACTED]"))
            .field("region_external_id", &self.region_external_id)
            .finish()
    }
}

/// Cluster and machine records
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Fetch a cluster by id
    async fn get_cluster(&self, id: &str) -> Result<Cluster>;

    /// All machines of a cluster
    async fn list_machines(&self, cluster_id: &str) -> Result<Vec<Machine>>;

    /// Fetch a machine by id
    async fn get_machine(&self, id: &str) -> Result<Machine>;

    /// Write a cluster status with a reason for operators
    async fn set_cluster_status(&self, id: &str, status: ClusterStatus, reason: &str)
        -> Result<()>;

    /// Record the version the API server reported
    async fn set_cluster_version(&self, id: &str, version: &str) -> Result<()>;

    /// Generate CA and service-account keys for a new cluster
    async fn generate_certificates(&self, id: &str) -> Result<()>;

    /// Create machine records in `init` state
    async fn create_machine_records(
        &self,
        cluster_id: &str,
        machines: &[CreateMachineData],
    ) -> Result<Vec<Machine>>;

    /// Write a machine status with a reason for operators
    async fn set_machine_status(&self, id: &str, status: MachineStatus, reason: &str)
        -> Result<()>;

    /// Record a machine's private IP
    async fn set_machine_ip(&self, id: &str, ip: &str) -> Result<()>;

    /// Remove machine records
    async fn delete_machine_records(&self, ids: &[String]) -> Result<()>;

    /// Admin kubeconfig of a provisioned cluster
    async fn kubeconfig(&self, cluster_id: &str) -> Result<String>;

    /// Remove the cluster record
    async fn real_delete(&self, cluster_id: &str) -> Result<()>;
}

/// Per-cluster-type provisioning hooks
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterDriver: Send + Sync {
    /// Whether this cluster type provisions its own machines
    fn need_create_machines(&self, cluster: &Cluster) -> bool;

    /// Addon manifest to apply after deploy; empty means none
    async fn addons_manifest(&self, cluster: &Cluster) -> Result<String>;

    /// Addon charts to keep installed
    async fn addons_helm_charts(&self, cluster: &Cluster) -> Result<Vec<HelmChart>>;

    /// Run `action` against `machines` (the targets, not the whole cluster)
    async fn request_deploy_machines(
        &self,
        cluster: &Cluster,
        action: DeployAction,
        machines: &[Machine],
    ) -> Result<()>;

    /// Release whatever the driver holds for `machines`
    async fn request_delete_machines(&self, cluster: &Cluster, machines: &[Machine])
        -> Result<()>;
}

/// Backing resources (VMs, bare-metal hosts) of machines
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MachineDriver: Send + Sync {
    /// Create or claim the backing resource
    async fn prepare_resource(&self, machine: &Machine) -> Result<()>;

    /// Private IP of the backing resource
    async fn private_ip(&self, machine: &Machine) -> Result<String>;

    /// Release the backing resource
    async fn terminate_resource(&self, machine: &Machine) -> Result<()>;
}

/// SSH login info per machine
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LoginInfoSource: Send + Sync {
    /// Login info for `machine`
    async fn login_info(&self, machine: &Machine) -> Result<LoginInfo>;
}

/// Helm releases on a cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait HelmClient: Send + Sync {
    /// Installed release, if any
    async fn get_release(
        &self,
        cluster: &Cluster,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Release>>;

    /// Install a new release
    async fn install(&self, cluster: &Cluster, chart: &HelmChart) -> Result<()>;

    /// Upgrade an existing release
    async fn update(&self, cluster: &Cluster, chart: &HelmChart) -> Result<()>;
}

/// Reachability of a cluster's API server
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterProbe: Send + Sync {
    /// Server version string, e.g. "v1.22.9"
    async fn server_version(&self, kubeconfig: &str) -> Result<String>;
}

/// Applies declarative manifests to a cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ManifestApplier: Send + Sync {
    /// Apply every document in `manifest`, returning how many were applied
    async fn apply(&self, kubeconfig: &str, manifest: &str) -> Result<usize>;
}

/// Cache of API clients for provisioned clusters
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClientRegistry: Send + Sync {
    /// Register a cluster; [`crate::Error::AlreadyRegistered`] if present
    async fn add_client(&self, cluster: &Cluster) -> Result<()>;

    /// Replace a cluster's client, registering it if absent
    async fn update_client(&self, cluster: &Cluster) -> Result<()>;

    /// Pull live state of the cluster into local records
    async fn sync(&self, cluster: &Cluster) -> Result<()>;
}

/// Remote objects behind cluster sub-resources
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceBackend: Send + Sync {
    /// Fetch a resource record
    async fn get(&self, id: &str) -> Result<ClusterResource>;

    /// Write a resource status with a reason
    async fn set_status(&self, id: &str, status: ResourceStatus, reason: &str) -> Result<()>;

    /// Create the remote object from `params`, returning it
    async fn remote_create(&self, resource: &ClusterResource, params: &Payload) -> Result<Payload>;

    /// Update the remote object from `params`, returning it
    async fn remote_update(&self, resource: &ClusterResource, params: &Payload) -> Result<Payload>;

    /// Delete the remote object
    async fn remote_delete(&self, resource: &ClusterResource) -> Result<()>;

    /// Refresh the local record from the remote object
    async fn sync(&self, resource: &ClusterResource) -> Result<()>;

    /// Remove the local record
    async fn real_delete(&self, resource: &ClusterResource) -> Result<()>;
}
