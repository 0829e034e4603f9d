//! Shared collaborators handed to every workflow

use std::sync::Arc;
use std::time::Duration;

use keel_common::retry::RetryConfig;

use crate::domain::{
    ClientRegistry, ClusterDriver, ClusterProbe, ClusterStore, HelmClient, MachineDriver,
    ManifestApplier, ResourceBackend,
};
use crate::runtime::TaskRuntime;
use crate::Result;

/// Attempts made while waiting for a new API server
pub const SYNC_STATUS_ATTEMPTS: u32 = 30;

/// Interval between API server probes
pub const SYNC_STATUS_INTERVAL: Duration = Duration::from_secs(10);

/// Collaborators of the lifecycle workflows (trait objects for testability)
#[derive(Clone)]
pub struct Context {
    /// Task persistence and exclusion
    pub runtime: Arc<dyn TaskRuntime>,
    /// Cluster and machine records
    pub store: Arc<dyn ClusterStore>,
    /// Cluster type hooks
    pub cluster_driver: Arc<dyn ClusterDriver>,
    /// Machine backing resources
    pub machine_driver: Arc<dyn MachineDriver>,
    /// Addon releases
    pub helm: Arc<dyn HelmClient>,
    /// API server reachability
    pub probe: Arc<dyn ClusterProbe>,
    /// Addon manifests
    pub applier: Arc<dyn ManifestApplier>,
    /// Client cache
    pub registry: Arc<dyn ClientRegistry>,
    /// Cluster sub-resources
    pub resources: Arc<dyn ResourceBackend>,
    /// Polling policy of the sync-status stage
    pub sync_status_retry: RetryConfig,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(runtime: Arc<dyn TaskRuntime>, store: Arc<dyn ClusterStore>) -> ContextBuilder {
        ContextBuilder::new(runtime, store)
    }
}

/// Builder for [`Context`]
pub struct ContextBuilder {
    runtime: Arc<dyn TaskRuntime>,
    store: Arc<dyn ClusterStore>,
    cluster_driver: Option<Arc<dyn ClusterDriver>>,
    machine_driver: Option<Arc<dyn MachineDriver>>,
    helm: Option<Arc<dyn HelmClient>>,
    probe: Option<Arc<dyn ClusterProbe>>,
    applier: Option<Arc<dyn ManifestApplier>>,
    registry: Option<Arc<dyn ClientRegistry>>,
    resources: Option<Arc<dyn ResourceBackend>>,
    sync_status_retry: RetryConfig,
}

impl ContextBuilder {
    fn new(runtime: Arc<dyn TaskRuntime>, store: Arc<dyn ClusterStore>) -> Self {
        Self {
            runtime,
            store,
            cluster_driver: None,
            machine_driver: None,
            helm: None,
            probe: None,
            applier: None,
            registry: None,
            resources: None,
            sync_status_retry: RetryConfig::fixed(SYNC_STATUS_ATTEMPTS, SYNC_STATUS_INTERVAL),
        }
    }

    /// Set the cluster driver
    pub fn cluster_driver(mut self, driver: Arc<dyn ClusterDriver>) -> Self {
        self.cluster_driver = Some(driver);
        self
    }

    /// Set the machine driver
    pub fn machine_driver(mut self, driver: Arc<dyn MachineDriver>) -> Self {
        self.machine_driver = Some(driver);
        self
    }

    /// Set the Helm client
    pub fn helm(mut self, helm: Arc<dyn HelmClient>) -> Self {
        self.helm = Some(helm);
        self
    }

    /// Set the API server probe
    pub fn probe(mut self, probe: Arc<dyn ClusterProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Set the manifest applier
    pub fn applier(mut self, applier: Arc<dyn ManifestApplier>) -> Self {
        self.applier = Some(applier);
        self
    }

    /// Set the client registry
    pub fn registry(mut self, registry: Arc<dyn ClientRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the resource backend
    pub fn resources(mut self, resources: Arc<dyn ResourceBackend>) -> Self {
        self.resources = Some(resources);
        self
    }

    /// Override the sync-status polling policy (primarily for testing)
    pub fn sync_status_retry(mut self, retry: RetryConfig) -> Self {
        self.sync_status_retry = retry;
        self
    }

    /// Build the context; every collaborator must be set
    pub fn build(self) -> Result<Context> {
        fn required<T: ?Sized>(value: Option<Arc<T>>, name: &str) -> Result<Arc<T>> {
            value.ok_or_else(|| {
                keel_common::Error::config_for_key(name, format!("{name} is not configured"))
                    .into()
            })
        }

        Ok(Context {
            runtime: self.runtime,
            store: self.store,
            cluster_driver: required(self.cluster_driver, "cluster_driver")?,
            machine_driver: required(self.machine_driver, "machine_driver")?,
            helm: required(self.helm, "helm")?,
            probe: required(self.probe, "probe")?,
            applier: required(self.applier, "applier")?,
            registry: required(self.registry, "registry")?,
            resources: required(self.resources, "resources")?,
            sync_status_retry: self.sync_status_retry,
        })
    }
}
