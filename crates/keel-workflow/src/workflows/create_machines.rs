//! Add machines to a cluster: create, join, re-apply addons

use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde_json::json;
use tracing::info;

use keel_kubespray::DeployAction;

use crate::context::Context;
use crate::domain::CreateMachineData;
use crate::engine::{run_workflow, subflow, work, Handlers, Payload, Stage, Transition};
use crate::oplog::{self, Action};
use crate::runtime::TaskId;
use crate::status::ClusterStatus;
use crate::Result;

use super::{fail_cluster, ApplyAddons, DeployMachines, MachineCreate};

/// Stages of [`CreateMachines`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateMachinesStage {
    Init,
    MachinesCreated,
    MachinesDeployed,
    AddonsApplied,
}

stage_names!(CreateMachinesStage {
    Init => "init",
    MachinesCreated => "machines-created",
    MachinesDeployed => "machines-deployed",
    AddonsApplied => "addons-applied",
});

impl Stage<CreateMachines> for CreateMachinesStage {
    const INIT: Self = CreateMachinesStage::Init;

    fn handlers(self) -> Handlers<CreateMachines, Self> {
        match self {
            CreateMachinesStage::Init => Handlers {
                on_success: CreateMachines::on_init,
                on_failure: CreateMachines::on_create_failed,
            },
            CreateMachinesStage::MachinesCreated => Handlers {
                on_success: CreateMachines::on_machines_created,
                on_failure: CreateMachines::on_create_failed,
            },
            CreateMachinesStage::MachinesDeployed => Handlers {
                on_success: CreateMachines::on_machines_deployed,
                on_failure: CreateMachines::on_deploy_failed,
            },
            CreateMachinesStage::AddonsApplied => Handlers {
                on_success: CreateMachines::on_addons_applied,
                on_failure: CreateMachines::on_addons_failed,
            },
        }
    }
}

/// Create machine records and resources, join them, then re-apply addons
///
/// The first deploy of a cluster uses [`DeployAction::Create`]; once any
/// other machine is up the batch joins with [`DeployAction::Scale`].
///
/// [`ClusterCreate`](super::ClusterCreate) runs the addon and sync stages
/// itself, so it turns both off here.
pub struct CreateMachines {
    ctx: Arc<Context>,
    task: TaskId,
    cluster_id: String,
    machines: Vec<CreateMachineData>,
    apply_addons: bool,
    sync_after_deploy: bool,
}

workflow_task!(CreateMachines, CreateMachinesStage);

impl CreateMachines {
    /// Workflow name
    pub const NAME: &'static str = "cluster-create-machines";

    /// Add `machines` to `cluster_id`
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
            apply_addons: true,
            sync_after_deploy: true,
        }
    }

    /// Re-apply addons once the batch is deployed (default on)
    pub fn apply_addons(mut self, apply: bool) -> Self {
        self.apply_addons = apply;
        self
    }

    /// Let the deploy refresh status and registry state (default on)
    pub fn sync_after_deploy(mut self, sync: bool) -> Self {
        self.sync_after_deploy = sync;
        self
    }

    fn on_init(&self, _: Payload) -> BoxFuture<'_, Transition<'_, CreateMachinesStage>> {
        async move {
            if let Err(e) = self
                .ctx
                .store
                .set_cluster_status(&self.cluster_id, ClusterStatus::CreatingMachine, "")
                .await
            {
                return self.fail(ClusterStatus::CreateMachineFail, e.to_string()).await;
            }
            Transition::next(
                CreateMachinesStage::MachinesCreated,
                work(self.create_machines()),
            )
        }
        .boxed()
    }

    async fn create_machines(&self) -> Result<Payload> {
        let records = self
            .ctx
            .store
            .create_machine_records(&self.cluster_id, &self.machines)
            .await?;
        let ids: Vec<String> = records.into_iter().map(|m| m.id).collect();

        info!(cluster = %self.cluster_id, machines = ids.len(), "creating machines");
        let runs = ids.iter().map(|id| async move {
            let create = MachineCreate::new(self.ctx.clone(), id).as_child_of(&self.task);
            run_workflow(&create).await
        });
        for result in join_all(runs).await {
            result?;
        }

        Ok(json!(ids))
    }

    fn on_machines_created(
        &self,
        payload: Payload,
    ) -> BoxFuture<'_, Transition<'_, CreateMachinesStage>> {
        async move {
            match self.deploy(payload).await {
                Ok(next) => next,
                Err(e) => self.fail(ClusterStatus::CreateMachineFail, e.to_string()).await,
            }
        }
        .boxed()
    }

    async fn deploy(&self, payload: Payload) -> Result<Transition<'_, CreateMachinesStage>> {
        let ids: Vec<String> = serde_json::from_value(payload)
            .map_err(|e| keel_common::Error::serialization_for_kind("machine ids", e.to_string()))?;
        let machines = self.ctx.store.list_machines(&self.cluster_id).await?;
        let joined = machines
            .iter()
            .any(|m| !ids.contains(&m.id) && m.status.is_up());
        let action = if joined {
            DeployAction::Scale
        } else {
            DeployAction::Create
        };

        let deploy = DeployMachines::new(self.ctx.clone(), &self.cluster_id, action, ids)
            .sync(self.sync_after_deploy)
            .as_child_of(&self.task);
        Ok(Transition::next(
            CreateMachinesStage::MachinesDeployed,
            subflow(deploy),
        ))
    }

    fn on_machines_deployed(&self, payload: Payload) -> BoxFuture<'_, Transition<'_, CreateMachinesStage>> {
        async move {
            if !self.apply_addons {
                return self.on_addons_applied(payload).await;
            }
            let addons = ApplyAddons::new(self.ctx.clone(), &self.cluster_id).as_child_of(&self.task);
            Transition::next(CreateMachinesStage::AddonsApplied, subflow(addons))
        }
        .boxed()
    }

    fn on_addons_applied(&self, _: Payload) -> BoxFuture<'_, Transition<'_, CreateMachinesStage>> {
        async move {
            oplog::success(Action::ClusterCreateMachines, &self.cluster_id);
            Transition::done()
        }
        .boxed()
    }

    fn on_create_failed(&self, reason: String) -> BoxFuture<'_, Transition<'_, CreateMachinesStage>> {
        async move { self.fail(ClusterStatus::CreateMachineFail, reason).await }.boxed()
    }

    fn on_deploy_failed(&self, reason: String) -> BoxFuture<'_, Transition<'_, CreateMachinesStage>> {
        async move { self.fail(ClusterStatus::DeployFail, reason).await }.boxed()
    }

    fn on_addons_failed(&self, reason: String) -> BoxFuture<'_, Transition<'_, CreateMachinesStage>> {
        async move { self.fail(ClusterStatus::ApplyAddonsFail, reason).await }.boxed()
    }

    async fn fail(&self, status: ClusterStatus, reason: String) -> Transition<'_, CreateMachinesStage> {
        fail_cluster(
            &self.ctx,
            Action::ClusterCreateMachines,
            &self.cluster_id,
            status,
            reason,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Machine, MachineRole};
    use crate::runtime::InMemoryRuntime;
    use crate::status::MachineStatus;
    use crate::workflows::testing::{cluster, machine, Mocks};
    use crate::workflows::{ClusterSync, MachinePrepare, SyncStatus};
    use crate::Error;
    use mockall::predicate::*;
    use serde_json::Value;
    use std::sync::Mutex;

    fn request(name: &str, role: MachineRole) -> CreateMachineData {
        CreateMachineData {
            name: name.to_string(),
            role,
            config: Value::Null,
        }
    }

    fn cluster_status(mocks: &mut Mocks, status: ClusterStatus) {
        mocks
            .store
            .expect_set_cluster_status()
            .with(eq("c1"), eq(status), always())
            .returning(|_, _, _| Ok(()));
    }

    /// Store whose machine list is `existing` plus whatever gets created
    fn records(mocks: &mut Mocks, existing: Vec<Machine>) {
        let all = Arc::new(Mutex::new(existing));
        let created = all.clone();
        mocks
            .store
            .expect_create_machine_records()
            .returning(move |cluster_id, reqs| {
                let new: Vec<Machine> = reqs
                    .iter()
                    .map(|r| Machine {
                        id: r.name.clone(),
                        name: r.name.clone(),
                        cluster_id: cluster_id.to_string(),
                        role: r.role,
                        status: MachineStatus::Init,
                        private_ip: None,
                    })
                    .collect();
                created.lock().unwrap().extend(new.clone());
                Ok(new)
            });
        let listed = all.clone();
        mocks
            .store
            .expect_list_machines()
            .returning(move |_| Ok(listed.lock().unwrap().clone()));
        mocks
            .store
            .expect_get_machine()
            .returning(|id| Ok(machine(id, MachineRole::Node, MachineStatus::Init)));
        mocks
            .store
            .expect_set_machine_status()
            .returning(|_, _, _| Ok(()));
        mocks.store.expect_set_machine_ip().returning(|_, _| Ok(()));
        mocks
            .store
            .expect_get_cluster()
            .returning(|id| Ok(cluster(id, ClusterStatus::Running)));
    }

    fn downstream_succeeds(mocks: &mut Mocks) {
        mocks
            .machine_driver
            .expect_prepare_resource()
            .returning(|_| Ok(()));
        mocks
            .machine_driver
            .expect_private_ip()
            .returning(|m| Ok(format!("10.0.0.{}", m.id.len())));
        mocks
            .store
            .expect_kubeconfig()
            .returning(|_| Ok("kubeconfig".to_string()));
        mocks
            .probe
            .expect_server_version()
            .returning(|_| Ok("v1.22.9".to_string()));
        mocks
            .store
            .expect_set_cluster_version()
            .returning(|_, _| Ok(()));
        mocks.registry.expect_add_client().returning(|_| Ok(()));
        mocks.registry.expect_sync().returning(|_| Ok(()));
        mocks
            .cluster_driver
            .expect_addons_manifest()
            .returning(|_| Ok(String::new()));
        mocks
            .cluster_driver
            .expect_addons_helm_charts()
            .returning(|_| Ok(vec![]));
    }

    #[tokio::test]
    async fn scale_out_joins_new_machines_with_scale_action() {
        let mut mocks = Mocks::default();
        records(
            &mut mocks,
            vec![machine("cp1", MachineRole::Controlplane, MachineStatus::Running)],
        );
        downstream_succeeds(&mut mocks);
        cluster_status(&mut mocks, ClusterStatus::CreatingMachine);
        cluster_status(&mut mocks, ClusterStatus::Deploying);
        cluster_status(&mut mocks, ClusterStatus::Running);
        mocks
            .cluster_driver
            .expect_request_deploy_machines()
            .withf(|_, action, machines| *action == DeployAction::Scale && machines.len() == 2)
            .times(1)
            .returning(|_, _, _| Ok(()));

        let runtime = InMemoryRuntime::new();
        let wf = CreateMachines::new(
            mocks.build(&runtime),
            "c1",
            vec![
                request("w1", MachineRole::Node),
                request("w2", MachineRole::Node),
            ],
        );
        run_workflow(&wf).await.expect("scale out should succeed");

        assert_eq!(
            runtime.stages_of(CreateMachines::NAME),
            vec!["machines-created", "machines-deployed", "addons-applied"]
        );
        let started = runtime.started_tasks();
        assert_eq!(
            started
                .iter()
                .filter(|name| **name == MachinePrepare::NAME)
                .count(),
            2
        );
        assert!(started.contains(&SyncStatus::NAME));
        assert!(started.contains(&ClusterSync::NAME));
        assert_eq!(started.last(), Some(&ApplyAddons::NAME));
    }

    #[tokio::test]
    async fn first_machines_of_a_cluster_deploy_with_create_action() {
        let mut mocks = Mocks::default();
        records(&mut mocks, vec![]);
        downstream_succeeds(&mut mocks);
        cluster_status(&mut mocks, ClusterStatus::CreatingMachine);
        cluster_status(&mut mocks, ClusterStatus::Deploying);
        cluster_status(&mut mocks, ClusterStatus::Running);
        mocks
            .cluster_driver
            .expect_request_deploy_machines()
            .withf(|_, action, _| *action == DeployAction::Create)
            .times(1)
            .returning(|_, _, _| Ok(()));

        let runtime = InMemoryRuntime::new();
        let wf = CreateMachines::new(
            mocks.build(&runtime),
            "c1",
            vec![request("cp1", MachineRole::Controlplane)],
        );
        run_workflow(&wf).await.expect("create should succeed");
    }

    #[tokio::test]
    async fn one_failed_machine_fails_the_batch_before_deploy() {
        let mut mocks = Mocks::default();
        records(&mut mocks, vec![]);
        cluster_status(&mut mocks, ClusterStatus::CreatingMachine);
        mocks
            .store
            .expect_set_cluster_status()
            .with(eq("c1"), eq(ClusterStatus::CreateMachineFail), always())
            .times(1)
            .returning(|_, _, _| Ok(()));
        mocks
            .machine_driver
            .expect_prepare_resource()
            .returning(|m| {
                if m.id == "w2" {
                    Err(Error::driver("onecloud", "quota exceeded"))
                } else {
                    Ok(())
                }
            });
        mocks
            .machine_driver
            .expect_private_ip()
            .returning(|_| Ok("10.0.0.5".to_string()));
        mocks.cluster_driver.expect_request_deploy_machines().never();

        let runtime = InMemoryRuntime::new();
        let wf = CreateMachines::new(
            mocks.build(&runtime),
            "c1",
            vec![
                request("w1", MachineRole::Node),
                request("w2", MachineRole::Node),
            ],
        );
        let err = run_workflow(&wf).await.unwrap_err();

        assert!(err.to_string().contains("quota exceeded"));
        assert!(!runtime.started_tasks().contains(&DeployMachines::NAME));
    }
}
