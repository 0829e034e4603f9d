//! Register a cluster with the client registry and pull its live state

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tracing::debug;

use crate::context::Context;
use crate::engine::{work, Handlers, Payload, Stage, Transition};
use crate::oplog::{self, Action};
use crate::runtime::TaskId;
use crate::status::ClusterStatus;
use crate::Result;

use super::fail_quietly;

/// Stages of [`ClusterSync`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClusterSyncStage {
    Init,
    Synced,
}

stage_names!(ClusterSyncStage {
    Init => "init",
    Synced => "synced",
});

impl Stage<ClusterSync> for ClusterSyncStage {
    const INIT: Self = ClusterSyncStage::Init;

    fn handlers(self) -> Handlers<ClusterSync, Self> {
        match self {
            ClusterSyncStage::Init => Handlers {
                on_success: ClusterSync::on_init,
                on_failure: ClusterSync::on_sync_failed,
            },
            ClusterSyncStage::Synced => Handlers {
                on_success: ClusterSync::on_synced,
                on_failure: ClusterSync::on_sync_failed,
            },
        }
    }
}

/// Make sure the registry has a client for the cluster, then sync it
///
/// In force mode the client is replaced and the cluster is marked running.
pub struct ClusterSync {
    ctx: Arc<Context>,
    task: TaskId,
    cluster_id: String,
    force: bool,
}

workflow_task!(ClusterSync, ClusterSyncStage);

impl ClusterSync {
    /// Workflow name
    pub const NAME: &'static str = "cluster-sync";

    /// Sync `cluster_id`
    pub fn new(ctx: Arc<Context>, cluster_id: impl Into<String>) -> Self {
        let cluster_id = cluster_id.into();
        Self {
            task: TaskId::new(Self::NAME, cluster_id.clone()),
            ctx,
            cluster_id,
            force: false,
        }
    }

    /// Replace the registered client and mark the cluster running
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    fn on_init(&self, _: Payload) -> BoxFuture<'_, Transition<'_, ClusterSyncStage>> {
        async move { Transition::next(ClusterSyncStage::Synced, work(self.sync())) }.boxed()
    }

    async fn sync(&self) -> Result<Payload> {
        let cluster = self.ctx.store.get_cluster(&self.cluster_id).await?;

        if self.force {
            self.ctx.registry.update_client(&cluster).await?;
            self.ctx
                .store
                .set_cluster_status(&cluster.id, ClusterStatus::Running, "by syncing")
                .await?;
        } else if let Err(e) = self.ctx.registry.add_client(&cluster).await {
            if !e.is_already_registered() {
                return Err(e);
            }
            debug!(cluster = %cluster.name, "client already registered");
        }

        self.ctx.registry.sync(&cluster).await?;
        Ok(Value::Null)
    }

    fn on_synced(&self, _: Payload) -> BoxFuture<'_, Transition<'_, ClusterSyncStage>> {
        async move {
            oplog::success(Action::ClusterSync, &self.cluster_id);
            Transition::done()
        }
        .boxed()
    }

    fn on_sync_failed(&self, reason: String) -> BoxFuture<'_, Transition<'_, ClusterSyncStage>> {
        async move { fail_quietly(Action::ClusterSync, &self.cluster_id, reason) }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::run_workflow;
    use crate::runtime::InMemoryRuntime;
    use crate::workflows::testing::{cluster, Mocks};
    use crate::Error;
    use mockall::predicate::*;

    fn with_cluster(mocks: &mut Mocks) {
        mocks
            .store
            .expect_get_cluster()
            .returning(|id| Ok(cluster(id, ClusterStatus::Running)));
    }

    #[tokio::test]
    async fn already_registered_cluster_still_syncs() {
        let mut mocks = Mocks::default();
        with_cluster(&mut mocks);
        mocks.registry.expect_add_client().returning(|c| {
            Err(Error::AlreadyRegistered {
                cluster: c.id.clone(),
            })
        });
        mocks.registry.expect_sync().times(1).returning(|_| Ok(()));

        let runtime = InMemoryRuntime::new();
        let wf = ClusterSync::new(mocks.build(&runtime), "c1");
        run_workflow(&wf).await.expect("sync should succeed");
    }

    #[tokio::test]
    async fn registry_errors_fail_the_sync() {
        let mut mocks = Mocks::default();
        with_cluster(&mut mocks);
        mocks
            .registry
            .expect_add_client()
            .returning(|_| Err(Error::driver("registry", "bad kubeconfig")));
        mocks.registry.expect_sync().never();

        let runtime = InMemoryRuntime::new();
        let wf = ClusterSync::new(mocks.build(&runtime), "c1");
        let err = run_workflow(&wf).await.unwrap_err();
        assert!(err.to_string().contains("bad kubeconfig"));
    }

    #[tokio::test]
    async fn force_mode_replaces_client_and_marks_running() {
        let mut mocks = Mocks::default();
        with_cluster(&mut mocks);
        mocks.registry.expect_add_client().never();
        mocks
            .registry
            .expect_update_client()
            .times(1)
            .returning(|_| Ok(()));
        mocks
            .store
            .expect_set_cluster_status()
            .with(eq("c1"), eq(ClusterStatus::Running), always())
            .times(1)
            .returning(|_, _, _| Ok(()));
        mocks.registry.expect_sync().times(1).returning(|_| Ok(()));

        let runtime = InMemoryRuntime::new();
        let wf = ClusterSync::new(mocks.build(&runtime), "c1").force(true);
        run_workflow(&wf).await.expect("forced sync should succeed");
    }
}
