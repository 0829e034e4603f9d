//! Stage graphs of the cluster, machine and resource lifecycles
//!
//! | workflow | stages after init |
//! |---|---|
//! | [`ClusterCreate`] | machines-created, addons-applied, status-synced, synced |
//! | [`CreateMachines`] | machines-created, machines-deployed, addons-applied |
//! | [`DeployMachines`] | deployed, status-synced, synced |
//! | [`ApplyAddons`] | applied |
//! | [`SyncStatus`] | synced |
//! | [`ClusterSync`] | synced |
//! | [`DeleteMachines`] | nodes-removed, machines-deleted, status-synced |
//! | [`ClusterDelete`] | machines-deleted, deleted |
//! | [`MachineCreate`] / [`MachinePrepare`] / [`MachineTerminate`] | one stage each |
//! | [`ResourceCreate`] / [`ResourceUpdate`] | done, synced |
//! | [`ResourceDelete`] / [`ResourceSync`] | one stage each |
//!
//! Failure handlers write a stage-specific status and stop the task. Prior
//! stages are never rolled back.

use tracing::warn;

use crate::context::Context;
use crate::engine::Transition;
use crate::oplog::{self, Action};
use crate::status::{ClusterStatus, MachineStatus, ResourceStatus};

/// Display impl mapping stage variants to their persisted names
macro_rules! stage_names {
    ($ty:ty { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(match self {
                    $(Self::$variant => $name),+
                })
            }
        }
    };
}

/// `Workflow` impl plus `as_child_of` for structs with `ctx` and `task` fields
macro_rules! workflow_task {
    ($wf:ty, $stage:ty) => {
        impl $crate::engine::Workflow for $wf {
            type Stage = $stage;

            fn task(&self) -> &$crate::runtime::TaskId {
                &self.task
            }

            fn runtime(&self) -> &dyn $crate::runtime::TaskRuntime {
                self.ctx.runtime.as_ref()
            }
        }

        impl $wf {
            /// Run as a sub-task of `parent`
            pub fn as_child_of(mut self, parent: &$crate::runtime::TaskId) -> Self {
                self.task = $crate::runtime::TaskId::child_of(
                    parent,
                    self.task.name(),
                    self.task.object().to_string(),
                );
                self
            }
        }
    };
}

mod apply_addons;
mod cluster_create;
mod cluster_delete;
mod create_machines;
mod delete_machines;
mod deploy_machines;
mod machine;
mod resource;
mod sync;
mod sync_status;

pub use apply_addons::{ApplyAddons, ApplyAddonsStage};
pub use cluster_create::{ClusterCreate, ClusterCreateStage};
pub use cluster_delete::{ClusterDelete, ClusterDeleteStage};
pub use create_machines::{CreateMachines, CreateMachinesStage};
pub use delete_machines::{DeleteMachines, DeleteMachinesStage};
pub use deploy_machines::{DeployMachines, DeployMachinesStage};
pub use machine::{
    MachineCreate, MachineCreateStage, MachinePrepare, MachinePrepareStage, MachineTerminate,
    MachineTerminateStage,
};
pub use resource::{
    ResourceCreate, ResourceDelete, ResourceDeleteStage, ResourceSync, ResourceSyncStage,
    ResourceUpdate, ResourceWrite, ResourceWriteStage, WriteOp,
};
pub use sync::{ClusterSync, ClusterSyncStage};
pub use sync_status::{SyncStatus, SyncStatusStage};

/// Write a cluster failure status, log the operation and stop the task
pub(crate) async fn fail_cluster<'a, S>(
    ctx: &Context,
    action: Action,
    cluster_id: &str,
    status: ClusterStatus,
    reason: String,
) -> Transition<'a, S> {
    if let Err(e) = ctx
        .store
        .set_cluster_status(cluster_id, status, &reason)
        .await
    {
        warn!(cluster = %cluster_id, status = %status, error = %e, "failed to record cluster status");
    }
    oplog::failure(action, cluster_id, &reason);
    Transition::Fail(reason)
}

/// Write a machine failure status, log the operation and stop the task
pub(crate) async fn fail_machine<'a, S>(
    ctx: &Context,
    action: Action,
    machine_id: &str,
    status: MachineStatus,
    reason: String,
) -> Transition<'a, S> {
    if let Err(e) = ctx
        .store
        .set_machine_status(machine_id, status, &reason)
        .await
    {
        warn!(machine = %machine_id, status = %status, error = %e, "failed to record machine status");
    }
    oplog::failure(action, machine_id, &reason);
    Transition::Fail(reason)
}

/// Write a resource failure status, log the operation and stop the task
pub(crate) async fn fail_resource<'a, S>(
    ctx: &Context,
    action: Action,
    resource_id: &str,
    status: ResourceStatus,
    reason: String,
) -> Transition<'a, S> {
    if let Err(e) = ctx.resources.set_status(resource_id, status, &reason).await {
        warn!(resource = %resource_id, status = %status, error = %e, "failed to record resource status");
    }
    oplog::failure(action, resource_id, &reason);
    Transition::Fail(reason)
}

/// Log the operation and stop the task without touching any status
pub(crate) fn fail_quietly<'a, S>(action: Action, object: &str, reason: String) -> Transition<'a, S> {
    oplog::failure(action, object, &reason);
    Transition::Fail(reason)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Mock wiring shared by the workflow tests

    use std::sync::Arc;
    use std::time::Duration;

    use keel_common::retry::RetryConfig;
    use keel_kubespray::ProviderType;

    use crate::context::Context;
    use crate::domain::{
        Cluster, Machine, MachineRole, MockClientRegistry, MockClusterDriver, MockClusterProbe,
        MockClusterStore, MockHelmClient, MockMachineDriver, MockManifestApplier,
        MockResourceBackend,
    };
    use crate::runtime::InMemoryRuntime;
    use crate::status::{ClusterStatus, MachineStatus};

    /// Mocks for every collaborator; tests set expectations then call `build`
    #[derive(Default)]
    pub struct Mocks {
        pub store: MockClusterStore,
        pub cluster_driver: MockClusterDriver,
        pub machine_driver: MockMachineDriver,
        pub helm: MockHelmClient,
        pub probe: MockClusterProbe,
        pub applier: MockManifestApplier,
        pub registry: MockClientRegistry,
        pub resources: MockResourceBackend,
    }

    impl Mocks {
        pub fn build(self, runtime: &InMemoryRuntime) -> Arc<Context> {
            let ctx = Context::builder(Arc::new(runtime.clone()), Arc::new(self.store))
                .cluster_driver(Arc::new(self.cluster_driver))
                .machine_driver(Arc::new(self.machine_driver))
                .helm(Arc::new(self.helm))
                .probe(Arc::new(self.probe))
                .applier(Arc::new(self.applier))
                .registry(Arc::new(self.registry))
                .resources(Arc::new(self.resources))
                .sync_status_retry(RetryConfig::fixed(3, Duration::from_millis(1)))
                .build()
                .expect("all collaborators are set");
            Arc::new(ctx)
        }
    }

    pub fn cluster(id: &str, status: ClusterStatus) -> Cluster {
        Cluster {
            id: id.to_string(),
            name: format!("{id}-name"),
            kube_version: "v1.22.9".to_string(),
            provider: ProviderType::Onecloud,
            status,
            extra_config: None,
        }
    }

    pub fn machine(id: &str, role: MachineRole, status: MachineStatus) -> Machine {
        Machine {
            id: id.to_string(),
            name: id.to_string(),
            cluster_id: "c1".to_string(),
            role,
            status,
            private_ip: None,
        }
    }
}
