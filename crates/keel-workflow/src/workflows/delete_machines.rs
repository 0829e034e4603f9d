//! Remove machines from a cluster and release their resources

use std::sync::Arc;

use futures::future::{join_all, try_join_all, BoxFuture};
use futures::FutureExt;
use serde_json::json;
use tracing::info;

use keel_kubespray::DeployAction;

use crate::context::Context;
use crate::engine::{run_workflow, subflow, work, Handlers, Payload, Stage, Transition};
use crate::oplog::{self, Action};
use crate::runtime::TaskId;
use crate::status::ClusterStatus;
use crate::Result;

use super::{fail_cluster, DeployMachines, MachineTerminate, SyncStatus};

/// Stages of [`DeleteMachines`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteMachinesStage {
    Init,
    NodesRemoved,
    MachinesDeleted,
    StatusSynced,
}

stage_names!(DeleteMachinesStage {
    Init => "init",
    NodesRemoved => "nodes-removed",
    MachinesDeleted => "machines-deleted",
    StatusSynced => "status-synced",
});

impl Stage<DeleteMachines> for DeleteMachinesStage {
    const INIT: Self = DeleteMachinesStage::Init;

    fn handlers(self) -> Handlers<DeleteMachines, Self> {
        match self {
            DeleteMachinesStage::Init => Handlers {
                on_success: DeleteMachines::on_init,
                on_failure: DeleteMachines::on_delete_failed,
            },
            DeleteMachinesStage::NodesRemoved => Handlers {
                on_success: DeleteMachines::on_nodes_removed,
                on_failure: DeleteMachines::on_delete_failed,
            },
            DeleteMachinesStage::MachinesDeleted => Handlers {
                on_success: DeleteMachines::on_machines_deleted,
                on_failure: DeleteMachines::on_delete_failed,
            },
            DeleteMachinesStage::StatusSynced => Handlers {
                on_success: DeleteMachines::on_status_synced,
                on_failure: DeleteMachines::on_delete_failed,
            },
        }
    }
}

/// Drain machines out of the cluster, then terminate and forget them
///
/// When the whole cluster is being deleted the remove-node deploy and the
/// trailing status sync are skipped.
pub struct DeleteMachines {
    ctx: Arc<Context>,
    task: TaskId,
    cluster_id: String,
    machine_ids: Vec<String>,
}

workflow_task!(DeleteMachines, DeleteMachinesStage);

impl DeleteMachines {
    /// Workflow name
    pub const NAME: &'static str = "cluster-delete-machines";

    /// Delete `machine_ids` of `cluster_id`
    pub fn new(ctx: Arc<Context>, cluster_id: impl Into<String>, machine_ids: Vec<String>) -> Self {
        let cluster_id = cluster_id.into();
        Self {
            task: TaskId::new(Self::NAME, cluster_id.clone()),
            ctx,
            cluster_id,
            machine_ids,
        }
    }

    async fn cluster_deleting(&self) -> Result<bool> {
        let cluster = self.ctx.store.get_cluster(&self.cluster_id).await?;
        Ok(cluster.status == ClusterStatus::Deleting)
    }

    fn on_init(&self, _: Payload) -> BoxFuture<'_, Transition<'_, DeleteMachinesStage>> {
        async move {
            match self.cluster_deleting().await {
                Ok(true) => self.on_nodes_removed(Payload::Null).await,
                Ok(false) => {
                    let remove = DeployMachines::new(
                        self.ctx.clone(),
                        &self.cluster_id,
                        DeployAction::RemoveNode,
                        self.machine_ids.clone(),
                    )
                    .as_child_of(&self.task);
                    Transition::next(DeleteMachinesStage::NodesRemoved, subflow(remove))
                }
                Err(e) => self.fail(e.to_string()).await,
            }
        }
        .boxed()
    }

    fn on_nodes_removed(&self, _: Payload) -> BoxFuture<'_, Transition<'_, DeleteMachinesStage>> {
        async move {
            Transition::next(
                DeleteMachinesStage::MachinesDeleted,
                work(self.delete_machines()),
            )
        }
        .boxed()
    }

    async fn delete_machines(&self) -> Result<Payload> {
        let cluster = self.ctx.store.get_cluster(&self.cluster_id).await?;
        let machines = try_join_all(
            self.machine_ids
                .iter()
                .map(|id| self.ctx.store.get_machine(id)),
        )
        .await?;

        info!(cluster = %cluster.name, machines = machines.len(), "deleting machines");
        self.ctx
            .cluster_driver
            .request_delete_machines(&cluster, &machines)
            .await?;

        let runs = self.machine_ids.iter().map(|id| async move {
            let terminate = MachineTerminate::new(self.ctx.clone(), id).as_child_of(&self.task);
            run_workflow(&terminate).await
        });
        for result in join_all(runs).await {
            result?;
        }

        self.ctx
            .store
            .delete_machine_records(&self.machine_ids)
            .await?;
        Ok(json!(self.machine_ids))
    }

    fn on_machines_deleted(&self, _: Payload) -> BoxFuture<'_, Transition<'_, DeleteMachinesStage>> {
        async move {
            match self.cluster_deleting().await {
                Ok(true) => self.on_status_synced(Payload::Null).await,
                Ok(false) => {
                    let sync_status =
                        SyncStatus::new(self.ctx.clone(), &self.cluster_id).as_child_of(&self.task);
                    Transition::next(DeleteMachinesStage::StatusSynced, subflow(sync_status))
                }
                Err(e) => self.fail(e.to_string()).await,
            }
        }
        .boxed()
    }

    fn on_status_synced(&self, _: Payload) -> BoxFuture<'_, Transition<'_, DeleteMachinesStage>> {
        async move {
            oplog::success(Action::ClusterDeleteMachines, &self.cluster_id);
            Transition::done()
        }
        .boxed()
    }

    fn on_delete_failed(&self, reason: String) -> BoxFuture<'_, Transition<'_, DeleteMachinesStage>> {
        async move { self.fail(reason).await }.boxed()
    }

    async fn fail(&self, reason: String) -> Transition<'_, DeleteMachinesStage> {
        fail_cluster(
            &self.ctx,
            Action::ClusterDeleteMachines,
            &self.cluster_id,
            ClusterStatus::Error,
            reason,
        )
        .await
    }
}
