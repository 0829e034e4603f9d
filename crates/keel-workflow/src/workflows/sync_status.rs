//! Probe a cluster's API server and record its version

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::json;
use tracing::info;

use keel_common::retry::retry_with_backoff;

use crate::context::Context;
use crate::domain::Cluster;
use crate::engine::{work, Handlers, Payload, Stage, Transition};
use crate::oplog::{self, Action};
use crate::runtime::TaskId;
use crate::status::ClusterStatus;
use crate::Result;

use super::fail_cluster;

/// Stages of [`SyncStatus`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncStatusStage {
    Init,
    Synced,
}

stage_names!(SyncStatusStage {
    Init => "init",
    Synced => "synced",
});

impl Stage<SyncStatus> for SyncStatusStage {
    const INIT: Self = SyncStatusStage::Init;

    fn handlers(self) -> Handlers<SyncStatus, Self> {
        match self {
            SyncStatusStage::Init => Handlers {
                on_success: SyncStatus::on_init,
                on_failure: SyncStatus::on_sync_failed,
            },
            SyncStatusStage::Synced => Handlers {
                on_success: SyncStatus::on_synced,
                on_failure: SyncStatus::on_sync_failed,
            },
        }
    }
}

/// Wait for the API server to answer, then mark the cluster running
///
/// A cluster that provisions its own machines but has none yet is put
/// back to `init` without probing.
pub struct SyncStatus {
    ctx: Arc<Context>,
    task: TaskId,
    cluster_id: String,
}

workflow_task!(SyncStatus, SyncStatusStage);

impl SyncStatus {
    /// Workflow name
    pub const NAME: &'static str = "cluster-sync-status";

    /// Sync the status of `cluster_id`
    pub fn new(ctx: Arc<Context>, cluster_id: impl Into<String>) -> Self {
        let cluster_id = cluster_id.into();
        Self {
            task: TaskId::new(Self::NAME, cluster_id.clone()),
            ctx,
            cluster_id,
        }
    }

    fn on_init(&self, _: Payload) -> BoxFuture<'_, Transition<'_, SyncStatusStage>> {
        async move {
            match self.start().await {
                Ok(next) => next,
                Err(e) => self.fail(e.to_string()).await,
            }
        }
        .boxed()
    }

    async fn start(&self) -> Result<Transition<'_, SyncStatusStage>> {
        let cluster = self.ctx.store.get_cluster(&self.cluster_id).await?;
        let machines = self.ctx.store.list_machines(&cluster.id).await?;

        if machines.is_empty() && self.ctx.cluster_driver.need_create_machines(&cluster) {
            self.ctx
                .store
                .set_cluster_status(&cluster.id, ClusterStatus::Init, "no machines")
                .await?;
            return Ok(Transition::done());
        }

        Ok(Transition::next(
            SyncStatusStage::Synced,
            work(self.probe(cluster)),
        ))
    }

    async fn probe(&self, cluster: Cluster) -> Result<Payload> {
        let kubeconfig = self.ctx.store.kubeconfig(&cluster.id).await?;
        if kubeconfig.trim().is_empty() {
            return Err(keel_common::Error::validation_for_field(
                &cluster.name,
                "kubeconfig",
                "cluster has no kubeconfig",
            )
            .into());
        }
        let kubeconfig = kubeconfig.as_str();
        let probe = self.ctx.probe.as_ref();
        let version = retry_with_backoff(
            &self.ctx.sync_status_retry,
            "cluster_server_version",
            move || probe.server_version(kubeconfig),
        )
        .await?;

        info!(cluster = %cluster.name, version = %version, "cluster api server is up");
        self.ctx
            .store
            .set_cluster_status(&cluster.id, ClusterStatus::Running, "")
            .await?;
        self.ctx
            .store
            .set_cluster_version(&cluster.id, &version)
            .await?;
        Ok(json!({ "version": version }))
    }

    fn on_synced(&self, _: Payload) -> BoxFuture<'_, Transition<'_, SyncStatusStage>> {
        async move {
            oplog::success(Action::ClusterSyncStatus, &self.cluster_id);
            Transition::done()
        }
        .boxed()
    }

    fn on_sync_failed(&self, reason: String) -> BoxFuture<'_, Transition<'_, SyncStatusStage>> {
        async move { self.fail(reason).await }.boxed()
    }

    async fn fail(&self, reason: String) -> Transition<'_, SyncStatusStage> {
        fail_cluster(
            &self.ctx,
            Action::ClusterSyncStatus,
            &self.cluster_id,
            ClusterStatus::Unknown,
            reason,
        )
        .await
    }
}
