//! Run a deploy action against machines, then refresh cluster state

use std::sync::Arc;

use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use serde_json::json;
use tracing::info;

use keel_kubespray::DeployAction;

use crate::context::Context;
use crate::engine::{subflow, work, Handlers, Payload, Stage, Transition};
use crate::oplog::{self, Action};
use crate::runtime::TaskId;
use crate::status::ClusterStatus;
use crate::Result;

use super::{fail_cluster, ClusterSync, SyncStatus};

/// Stages of [`DeployMachines`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeployMachinesStage {
    Init,
    Deployed,
    StatusSynced,
    Synced,
}

stage_names!(DeployMachinesStage {
    Init => "init",
    Deployed => "deployed",
    StatusSynced => "status-synced",
    Synced => "synced",
});

impl Stage<DeployMachines> for DeployMachinesStage {
    const INIT: Self = DeployMachinesStage::Init;

    fn handlers(self) -> Handlers<DeployMachines, Self> {
        match self {
            DeployMachinesStage::Init => Handlers {
                on_success: DeployMachines::on_init,
                on_failure: DeployMachines::on_deploy_failed,
            },
            DeployMachinesStage::Deployed => Handlers {
                on_success: DeployMachines::on_deployed,
                on_failure: DeployMachines::on_deploy_failed,
            },
            DeployMachinesStage::StatusSynced => Handlers {
                on_success: DeployMachines::on_status_synced,
                on_failure: DeployMachines::on_deploy_failed,
            },
            DeployMachinesStage::Synced => Handlers {
                on_success: DeployMachines::on_synced,
                on_failure: DeployMachines::on_deploy_failed,
            },
        }
    }
}

/// Hand `machine_ids` to the cluster driver with `action`
///
/// Status and registry sync follow unless turned off with [`Self::sync`].
pub struct DeployMachines {
    ctx: Arc<Context>,
    task: TaskId,
    cluster_id: String,
    action: DeployAction,
    machine_ids: Vec<String>,
    sync: bool,
}

workflow_task!(DeployMachines, DeployMachinesStage);

impl DeployMachines {
    /// Workflow name
    pub const NAME: &'static str = "cluster-deploy-machines";

    /// Deploy `machine_ids` of `cluster_id` with `action`
    pub fn new(
        ctx: Arc<Context>,
        cluster_id: impl Into<String>,
        action: DeployAction,
        machine_ids: Vec<String>,
    ) -> Self {
        let cluster_id = cluster_id.into();
        Self {
            task: TaskId::new(Self::NAME, cluster_id.clone()),
            ctx,
            cluster_id,
            action,
            machine_ids,
            sync: true,
        }
    }

    /// Run `SyncStatus` and `ClusterSync` after the deploy (default on)
    pub fn sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    fn on_init(&self, _: Payload) -> BoxFuture<'_, Transition<'_, DeployMachinesStage>> {
        async move {
            if let Err(e) = self
                .ctx
                .store
                .set_cluster_status(&self.cluster_id, ClusterStatus::Deploying, "")
                .await
            {
                return self.fail(e.to_string()).await;
            }
            Transition::next(DeployMachinesStage::Deployed, work(self.deploy()))
        }
        .boxed()
    }

    async fn deploy(&self) -> Result<Payload> {
        let cluster = self.ctx.store.get_cluster(&self.cluster_id).await?;
        let machines = try_join_all(
            self.machine_ids
                .iter()
                .map(|id| self.ctx.store.get_machine(id)),
        )
        .await?;

        info!(
            cluster = %cluster.name,
            action = %self.action,
            machines = machines.len(),
            "deploying machines"
        );
        self.ctx
            .cluster_driver
            .request_deploy_machines(&cluster, self.action, &machines)
            .await?;
        Ok(json!({ "action": self.action, "machines": self.machine_ids }))
    }

    fn on_deployed(&self, payload: Payload) -> BoxFuture<'_, Transition<'_, DeployMachinesStage>> {
        async move {
            if !self.sync {
                return self.on_synced(payload).await;
            }
            let sync_status =
                SyncStatus::new(self.ctx.clone(), &self.cluster_id).as_child_of(&self.task);
            Transition::next(DeployMachinesStage::StatusSynced, subflow(sync_status))
        }
        .boxed()
    }

    fn on_status_synced(&self, _: Payload) -> BoxFuture<'_, Transition<'_, DeployMachinesStage>> {
        async move {
            let sync = ClusterSync::new(self.ctx.clone(), &self.cluster_id).as_child_of(&self.task);
            Transition::next(DeployMachinesStage::Synced, subflow(sync))
        }
        .boxed()
    }

    fn on_synced(&self, _: Payload) -> BoxFuture<'_, Transition<'_, DeployMachinesStage>> {
        async move {
            oplog::success(Action::ClusterDeployMachines, &self.cluster_id);
            Transition::done()
        }
        .boxed()
    }

    fn on_deploy_failed(&self, reason: String) -> BoxFuture<'_, Transition<'_, DeployMachinesStage>> {
        async move { self.fail(reason).await }.boxed()
    }

    async fn fail(&self, reason: String) -> Transition<'_, DeployMachinesStage> {
        fail_cluster(
            &self.ctx,
            Action::ClusterDeployMachines,
            &self.cluster_id,
            ClusterStatus::DeployFail,
            reason,
        )
        .await
    }
}
