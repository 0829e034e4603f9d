//! Tear down a cluster and its machines

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use crate::context::Context;
use crate::engine::{subflow, work, Handlers, Payload, Stage, Transition};
use crate::oplog::{self, Action};
use crate::runtime::TaskId;
use crate::status::ClusterStatus;
use crate::Result;

use super::{fail_cluster, DeleteMachines};

/// Stages of [`ClusterDelete`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClusterDeleteStage {
    Init,
    MachinesDeleted,
    Deleted,
}

stage_names!(ClusterDeleteStage {
    Init => "init",
    MachinesDeleted => "machines-deleted",
    Deleted => "deleted",
});

impl Stage<ClusterDelete> for ClusterDeleteStage {
    const INIT: Self = ClusterDeleteStage::Init;

    fn handlers(self) -> Handlers<ClusterDelete, Self> {
        match self {
            ClusterDeleteStage::Init => Handlers {
                on_success: ClusterDelete::on_init,
                on_failure: ClusterDelete::on_delete_failed,
            },
            ClusterDeleteStage::MachinesDeleted => Handlers {
                on_success: ClusterDelete::on_machines_deleted,
                on_failure: ClusterDelete::on_delete_failed,
            },
            ClusterDeleteStage::Deleted => Handlers {
                on_success: ClusterDelete::on_deleted,
                on_failure: ClusterDelete::on_delete_failed,
            },
        }
    }
}

/// Mark the cluster deleting, delete all its machines, drop the record
pub struct ClusterDelete {
    ctx: Arc<Context>,
    task: TaskId,
    cluster_id: String,
}

workflow_task!(ClusterDelete, ClusterDeleteStage);

impl ClusterDelete {
    /// Workflow name
    pub const NAME: &'static str = "cluster-delete";

    /// Delete `cluster_id`
    pub fn new(ctx: Arc<Context>, cluster_id: impl Into<String>) -> Self {
        let cluster_id = cluster_id.into();
        Self {
            task: TaskId::new(Self::NAME, cluster_id.clone()),
            ctx,
            cluster_id,
        }
    }

    fn on_init(&self, _: Payload) -> BoxFuture<'_, Transition<'_, ClusterDeleteStage>> {
        async move {
            match self.start().await {
                Ok(Some(next)) => next,
                Ok(None) => self.on_machines_deleted(Value::Null).await,
                Err(e) => self.fail(e.to_string()).await,
            }
        }
        .boxed()
    }

    /// `None` when there is no machine to delete
    async fn start(&self) -> Result<Option<Transition<'_, ClusterDeleteStage>>> {
        self.ctx
            .store
            .set_cluster_status(&self.cluster_id, ClusterStatus::Deleting, "")
            .await?;
        let machines = self.ctx.store.list_machines(&self.cluster_id).await?;
        if machines.is_empty() {
            return Ok(None);
        }

        let ids = machines.into_iter().map(|m| m.id).collect();
        let delete = DeleteMachines::new(self.ctx.clone(), &self.cluster_id, ids)
            .as_child_of(&self.task);
        Ok(Some(Transition::next(
            ClusterDeleteStage::MachinesDeleted,
            subflow(delete),
        )))
    }

    fn on_machines_deleted(&self, _: Payload) -> BoxFuture<'_, Transition<'_, ClusterDeleteStage>> {
        async move {
            Transition::next(
                ClusterDeleteStage::Deleted,
                work(async move {
                    self.ctx.store.real_delete(&self.cluster_id).await?;
                    Ok(Value::Null)
                }),
            )
        }
        .boxed()
    }

    fn on_deleted(&self, _: Payload) -> BoxFuture<'_, Transition<'_, ClusterDeleteStage>> {
        async move {
            oplog::success(Action::ClusterDelete, &self.cluster_id);
            Transition::done()
        }
        .boxed()
    }

    fn on_delete_failed(&self, reason: String) -> BoxFuture<'_, Transition<'_, ClusterDeleteStage>> {
        async move { self.fail(reason).await }.boxed()
    }

    async fn fail(&self, reason: String) -> Transition<'_, ClusterDeleteStage> {
        fail_cluster(
            &self.ctx,
            Action::ClusterDelete,
            &self.cluster_id,
            ClusterStatus::DeleteFail,
            reason,
        )
        .await
    }
}
