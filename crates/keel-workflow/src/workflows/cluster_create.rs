//! Bring a new cluster from records to a running, registered cluster

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::info;

use crate::context::Context;
use crate::domain::CreateMachineData;
use crate::engine::{subflow, Handlers, Payload, Stage, Transition};
use crate::oplog::{self, Action};
use crate::runtime::TaskId;
use crate::status::ClusterStatus;
use crate::Result;

use super::{fail_cluster, ApplyAddons, ClusterSync, CreateMachines, SyncStatus};

/// Stages of [`ClusterCreate`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClusterCreateStage {
    Init,
    MachinesCreated,
    AddonsApplied,
    StatusSynced,
    Synced,
}

stage_names!(ClusterCreateStage {
    Init => "init",
    MachinesCreated => "machines-created",
    AddonsApplied => "addons-applied",
    StatusSynced => "status-synced",
    Synced => "synced",
});

impl Stage<ClusterCreate> for ClusterCreateStage {
    const INIT: Self = ClusterCreateStage::Init;

    fn handlers(self) -> Handlers<ClusterCreate, Self> {
        match self {
            ClusterCreateStage::Init => Handlers {
                on_success: ClusterCreate::on_init,
                on_failure: ClusterCreate::on_create_failed,
            },
            ClusterCreateStage::MachinesCreated => Handlers {
                on_success: ClusterCreate::on_machines_created,
                on_failure: ClusterCreate::on_machines_failed,
            },
            ClusterCreateStage::AddonsApplied => Handlers {
                on_success: ClusterCreate::on_addons_applied,
                on_failure: ClusterCreate::on_addons_failed,
            },
            ClusterCreateStage::StatusSynced => Handlers {
                on_success: ClusterCreate::on_status_synced,
                on_failure: ClusterCreate::on_status_failed,
            },
            ClusterCreateStage::Synced => Handlers {
                on_success: ClusterCreate::on_synced,
                on_failure: ClusterCreate::on_create_failed,
            },
        }
    }
}

/// Create a cluster: machines, addons, status, registration
///
/// Clusters whose driver provisions no machines, or requests that carry
/// none, go straight to the addons stage.
pub struct ClusterCreate {
    ctx: Arc<Context>,
    task: TaskId,
    cluster_id: String,
    machines: Vec<CreateMachineData>,
}

workflow_task!(ClusterCreate, ClusterCreateStage);

impl ClusterCreate {
    /// Workflow name
    pub const NAME: &'static str = "cluster-create";

    /// Create `cluster_id` with `machines`
    pub fn new(
        ctx: Arc<Context>,
        cluster_id: impl Into<String>,
        machines: Vec<CreateMachineData>,
    ) -> Self {
        let cluster_id = cluster_id.into();
        Self {
            task: TaskId::new(Self::NAME, cluster_id.clone()),
            ctx,
            cluster_id,
            machines,
        }
    }

    fn on_init(&self, _: Payload) -> BoxFuture<'_, Transition<'_, ClusterCreateStage>> {
        async move {
            match self.start().await {
                Ok(next) => next,
                Err(e) => self.fail(ClusterStatus::CreateFail, e.to_string()).await,
            }
        }
        .boxed()
    }

    async fn start(&self) -> Result<Transition<'_, ClusterCreateStage>> {
        let cluster = self.ctx.store.get_cluster(&self.cluster_id).await?;
        self.ctx
            .store
            .set_cluster_status(&cluster.id, ClusterStatus::Creating, "")
            .await?;

        if !self.ctx.cluster_driver.need_create_machines(&cluster) || self.machines.is_empty() {
            info!(cluster = %cluster.name, "no machines to create");
            return Ok(self.apply_addons());
        }

        self.ctx.store.generate_certificates(&cluster.id).await?;
        let create = CreateMachines::new(self.ctx.clone(), &cluster.id, self.machines.clone())
            .apply_addons(false)
            .sync_after_deploy(false)
            .as_child_of(&self.task);
        Ok(Transition::next(
            ClusterCreateStage::MachinesCreated,
            subflow(create),
        ))
    }

    fn apply_addons(&self) -> Transition<'_, ClusterCreateStage> {
        let addons = ApplyAddons::new(self.ctx.clone(), &self.cluster_id).as_child_of(&self.task);
        Transition::next(ClusterCreateStage::AddonsApplied, subflow(addons))
    }

    fn on_machines_created(&self, _: Payload) -> BoxFuture<'_, Transition<'_, ClusterCreateStage>> {
        async move { self.apply_addons() }.boxed()
    }

    fn on_addons_applied(&self, _: Payload) -> BoxFuture<'_, Transition<'_, ClusterCreateStage>> {
        async move {
            let sync_status =
                SyncStatus::new(self.ctx.clone(), &self.cluster_id).as_child_of(&self.task);
            Transition::next(ClusterCreateStage::StatusSynced, subflow(sync_status))
        }
        .boxed()
    }

    fn on_status_synced(&self, _: Payload) -> BoxFuture<'_, Transition<'_, ClusterCreateStage>> {
        async move {
            let sync = ClusterSync::new(self.ctx.clone(), &self.cluster_id).as_child_of(&self.task);
            Transition::next(ClusterCreateStage::Synced, subflow(sync))
        }
        .boxed()
    }

    fn on_synced(&self, _: Payload) -> BoxFuture<'_, Transition<'_, ClusterCreateStage>> {
        async move {
            oplog::success(Action::ClusterCreate, &self.cluster_id);
            Transition::done()
        }
        .boxed()
    }

    fn on_create_failed(&self, reason: String) -> BoxFuture<'_, Transition<'_, ClusterCreateStage>> {
        async move { self.fail(ClusterStatus::CreateFail, reason).await }.boxed()
    }

    fn on_machines_failed(&self, reason: String) -> BoxFuture<'_, Transition<'_, ClusterCreateStage>> {
        async move { self.fail(ClusterStatus::CreateMachineFail, reason).await }.boxed()
    }

    fn on_addons_failed(&self, reason: String) -> BoxFuture<'_, Transition<'_, ClusterCreateStage>> {
        async move { self.fail(ClusterStatus::ApplyAddonsFail, reason).await }.boxed()
    }

    fn on_status_failed(&self, reason: String) -> BoxFuture<'_, Transition<'_, ClusterCreateStage>> {
        async move { self.fail(ClusterStatus::Unknown, reason).await }.boxed()
    }

    async fn fail(&self, status: ClusterStatus, reason: String) -> Transition<'_, ClusterCreateStage> {
        fail_cluster(
            &self.ctx,
            Action::ClusterCreate,
            &self.cluster_id,
            status,
            reason,
        )
        .await
    }
}
