//! Apply addon manifests and reconcile addon Helm releases

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::json;
use tracing::{debug, info};

use crate::context::Context;
use crate::domain::{Cluster, HelmChart, HelmClient};
use crate::engine::{work, Handlers, Payload, Stage, Transition};
use crate::oplog::{self, Action};
use crate::runtime::TaskId;
use crate::status::ClusterStatus;
use crate::Result;

use super::fail_cluster;

/// Stages of [`ApplyAddons`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyAddonsStage {
    Init,
    Applied,
}

stage_names!(ApplyAddonsStage {
    Init => "init",
    Applied => "applied",
});

impl Stage<ApplyAddons> for ApplyAddonsStage {
    const INIT: Self = ApplyAddonsStage::Init;

    fn handlers(self) -> Handlers<ApplyAddons, Self> {
        match self {
            ApplyAddonsStage::Init => Handlers {
                on_success: ApplyAddons::on_init,
                on_failure: ApplyAddons::on_apply_failed,
            },
            ApplyAddonsStage::Applied => Handlers {
                on_success: ApplyAddons::on_applied,
                on_failure: ApplyAddons::on_apply_failed,
            },
        }
    }
}

/// Apply the driver's addon manifest, then install or upgrade each addon chart
pub struct ApplyAddons {
    ctx: Arc<Context>,
    task: TaskId,
    cluster_id: String,
}

workflow_task!(ApplyAddons, ApplyAddonsStage);

impl ApplyAddons {
    /// Workflow name
    pub const NAME: &'static str = "cluster-apply-addons";

    /// Apply addons to `cluster_id`
    pub fn new(ctx: Arc<Context>, cluster_id: impl Into<String>) -> Self {
        let cluster_id = cluster_id.into();
        Self {
            task: TaskId::new(Self::NAME, cluster_id.clone()),
            ctx,
            cluster_id,
        }
    }

    fn on_init(&self, _: Payload) -> BoxFuture<'_, Transition<'_, ApplyAddonsStage>> {
        async move { Transition::next(ApplyAddonsStage::Applied, work(self.apply())) }.boxed()
    }

    async fn apply(&self) -> Result<Payload> {
        let cluster = self.ctx.store.get_cluster(&self.cluster_id).await?;

        let manifest = self.ctx.cluster_driver.addons_manifest(&cluster).await?;
        let applied = if manifest.trim().is_empty() {
            debug!(cluster = %cluster.name, "no addon manifest");
            0
        } else {
            let kubeconfig = self.ctx.store.kubeconfig(&cluster.id).await?;
            self.ctx.applier.apply(&kubeconfig, &manifest).await?
        };

        let charts = self.ctx.cluster_driver.addons_helm_charts(&cluster).await?;
        for chart in &charts {
            reconcile_chart(self.ctx.helm.as_ref(), &cluster, chart).await?;
        }

        Ok(json!({ "documents": applied, "charts": charts.len() }))
    }

    fn on_applied(&self, _: Payload) -> BoxFuture<'_, Transition<'_, ApplyAddonsStage>> {
        async move {
            oplog::success(Action::ClusterApplyAddons, &self.cluster_id);
            Transition::done()
        }
        .boxed()
    }

    fn on_apply_failed(&self, reason: String) -> BoxFuture<'_, Transition<'_, ApplyAddonsStage>> {
        async move {
            fail_cluster(
                &self.ctx,
                Action::ClusterApplyAddons,
                &self.cluster_id,
                ClusterStatus::ApplyAddonsFail,
                reason,
            )
            .await
        }
        .boxed()
    }
}

/// Upgrade the chart's release if it exists, install it otherwise
async fn reconcile_chart(helm: &dyn HelmClient, cluster: &Cluster, chart: &HelmChart) -> Result<()> {
    let existing = helm
        .get_release(cluster, &chart.namespace, &chart.release)
        .await?;
    match existing {
        Some(release) => {
            info!(
                cluster = %cluster.name,
                namespace = %chart.namespace,
                release = %chart.release,
                from = ?release.version,
                to = ?chart.version,
                "upgrading addon release"
            );
            helm.update(cluster, chart).await
        }
        None => {
            info!(
                cluster = %cluster.name,
                namespace = %chart.namespace,
                release = %chart.release,
                "installing addon release"
            );
            helm.install(cluster, chart).await
        }
    }
}
