//! Machine create, prepare and terminate

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::json;
use tracing::info;

use crate::context::Context;
use crate::engine::{subflow, work, Handlers, Payload, Stage, Transition};
use crate::oplog::{self, Action};
use crate::runtime::TaskId;
use crate::status::MachineStatus;
use crate::Result;

use super::fail_machine;

// =============================================================================
// MachineCreate
// =============================================================================

/// Stages of [`MachineCreate`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MachineCreateStage {
    Init,
    Prepared,
}

stage_names!(MachineCreateStage {
    Init => "init",
    Prepared => "prepared",
});

impl Stage<MachineCreate> for MachineCreateStage {
    const INIT: Self = MachineCreateStage::Init;

    fn handlers(self) -> Handlers<MachineCreate, Self> {
        match self {
            MachineCreateStage::Init => Handlers {
                on_success: MachineCreate::on_init,
                on_failure: MachineCreate::on_create_failed,
            },
            MachineCreateStage::Prepared => Handlers {
                on_success: MachineCreate::on_prepared,
                on_failure: MachineCreate::on_create_failed,
            },
        }
    }
}

/// Bring up one machine's backing resource
pub struct MachineCreate {
    ctx: Arc<Context>,
    task: TaskId,
    machine_id: String,
}

workflow_task!(MachineCreate, MachineCreateStage);

impl MachineCreate {
    /// Workflow name
    pub const NAME: &'static str = "machine-create";

    /// Create `machine_id`
    pub fn new(ctx: Arc<Context>, machine_id: impl Into<String>) -> Self {
        let machine_id = machine_id.into();
        Self {
            task: TaskId::new(Self::NAME, machine_id.clone()),
            ctx,
            machine_id,
        }
    }

    fn on_init(&self, _: Payload) -> BoxFuture<'_, Transition<'_, MachineCreateStage>> {
        async move {
            if let Err(e) = self
                .ctx
                .store
                .set_machine_status(&self.machine_id, MachineStatus::Creating, "")
                .await
            {
                return self.fail(e.to_string()).await;
            }
            let prepare =
                MachinePrepare::new(self.ctx.clone(), &self.machine_id).as_child_of(&self.task);
            Transition::next(MachineCreateStage::Prepared, subflow(prepare))
        }
        .boxed()
    }

    fn on_prepared(&self, payload: Payload) -> BoxFuture<'_, Transition<'_, MachineCreateStage>> {
        async move {
            oplog::success(Action::MachineCreate, &self.machine_id);
            Transition::Complete(payload)
        }
        .boxed()
    }

    fn on_create_failed(&self, reason: String) -> BoxFuture<'_, Transition<'_, MachineCreateStage>> {
        async move { self.fail(reason).await }.boxed()
    }

    async fn fail(&self, reason: String) -> Transition<'_, MachineCreateStage> {
        fail_machine(
            &self.ctx,
            Action::MachineCreate,
            &self.machine_id,
            MachineStatus::CreateFail,
            reason,
        )
        .await
    }
}

// =============================================================================
// MachinePrepare
// =============================================================================

/// Stages of [`MachinePrepare`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MachinePrepareStage {
    Init,
    Prepared,
}

stage_names!(MachinePrepareStage {
    Init => "init",
    Prepared => "prepared",
});

impl Stage<MachinePrepare> for MachinePrepareStage {
    const INIT: Self = MachinePrepareStage::Init;

    fn handlers(self) -> Handlers<MachinePrepare, Self> {
        match self {
            MachinePrepareStage::Init => Handlers {
                on_success: MachinePrepare::on_init,
                on_failure: MachinePrepare::on_prepare_failed,
            },
            MachinePrepareStage::Prepared => Handlers {
                on_success: MachinePrepare::on_prepared,
                on_failure: MachinePrepare::on_prepare_failed,
            },
        }
    }
}

/// Prepare the backing resource, record its private IP and mark the machine running
pub struct MachinePrepare {
    ctx: Arc<Context>,
    task: TaskId,
    machine_id: String,
}

workflow_task!(MachinePrepare, MachinePrepareStage);

impl MachinePrepare {
    /// Workflow name
    pub const NAME: &'static str = "machine-prepare";

    /// Prepare `machine_id`
    pub fn new(ctx: Arc<Context>, machine_id: impl Into<String>) -> Self {
        let machine_id = machine_id.into();
        Self {
            task: TaskId::new(Self::NAME, machine_id.clone()),
            ctx,
            machine_id,
        }
    }

    fn on_init(&self, _: Payload) -> BoxFuture<'_, Transition<'_, MachinePrepareStage>> {
        async move { Transition::next(MachinePrepareStage::Prepared, work(self.prepare())) }.boxed()
    }

    async fn prepare(&self) -> Result<Payload> {
        self.ctx
            .store
            .set_machine_status(&self.machine_id, MachineStatus::Prepare, "")
            .await?;
        let machine = self.ctx.store.get_machine(&self.machine_id).await?;

        self.ctx.machine_driver.prepare_resource(&machine).await?;
        let ip = self.ctx.machine_driver.private_ip(&machine).await?;
        self.ctx.store.set_machine_ip(&machine.id, &ip).await?;
        self.ctx
            .store
            .set_machine_status(&machine.id, MachineStatus::Running, "")
            .await?;

        info!(machine = %machine.name, ip = %ip, "machine prepared");
        Ok(json!({ "id": machine.id, "private_ip": ip }))
    }

    fn on_prepared(&self, payload: Payload) -> BoxFuture<'_, Transition<'_, MachinePrepareStage>> {
        async move {
            oplog::success(Action::MachinePrepare, &self.machine_id);
            Transition::Complete(payload)
        }
        .boxed()
    }

    fn on_prepare_failed(
        &self,
        reason: String,
    ) -> BoxFuture<'_, Transition<'_, MachinePrepareStage>> {
        async move {
            fail_machine(
                &self.ctx,
                Action::MachinePrepare,
                &self.machine_id,
                MachineStatus::PrepareFail,
                reason,
            )
            .await
        }
        .boxed()
    }
}

// =============================================================================
// MachineTerminate
// =============================================================================

/// Stages of [`MachineTerminate`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MachineTerminateStage {
    Init,
    Terminated,
}

stage_names!(MachineTerminateStage {
    Init => "init",
    Terminated => "terminated",
});

impl Stage<MachineTerminate> for MachineTerminateStage {
    const INIT: Self = MachineTerminateStage::Init;

    fn handlers(self) -> Handlers<MachineTerminate, Self> {
        match self {
            MachineTerminateStage::Init => Handlers {
                on_success: MachineTerminate::on_init,
                on_failure: MachineTerminate::on_terminate_failed,
            },
            MachineTerminateStage::Terminated => Handlers {
                on_success: MachineTerminate::on_terminated,
                on_failure: MachineTerminate::on_terminate_failed,
            },
        }
    }
}

/// Release one machine's backing resource
pub struct MachineTerminate {
    ctx: Arc<Context>,
    task: TaskId,
    machine_id: String,
}

workflow_task!(MachineTerminate, MachineTerminateStage);

impl MachineTerminate {
    /// Workflow name
    pub const NAME: &'static str = "machine-terminate";

    /// Terminate `machine_id`
    pub fn new(ctx: Arc<Context>, machine_id: impl Into<String>) -> Self {
        let machine_id = machine_id.into();
        Self {
            task: TaskId::new(Self::NAME, machine_id.clone()),
            ctx,
            machine_id,
        }
    }

    fn on_init(&self, _: Payload) -> BoxFuture<'_, Transition<'_, MachineTerminateStage>> {
        async move {
            Transition::next(MachineTerminateStage::Terminated, work(self.terminate()))
        }
        .boxed()
    }

    async fn terminate(&self) -> Result<Payload> {
        self.ctx
            .store
            .set_machine_status(&self.machine_id, MachineStatus::Terminating, "")
            .await?;
        let machine = self.ctx.store.get_machine(&self.machine_id).await?;
        self.ctx.machine_driver.terminate_resource(&machine).await?;
        Ok(Payload::Null)
    }

    fn on_terminated(&self, _: Payload) -> BoxFuture<'_, Transition<'_, MachineTerminateStage>> {
        async move {
            oplog::success(Action::MachineTerminate, &self.machine_id);
            Transition::done()
        }
        .boxed()
    }

    fn on_terminate_failed(
        &self,
        reason: String,
    ) -> BoxFuture<'_, Transition<'_, MachineTerminateStage>> {
        async move {
            fail_machine(
                &self.ctx,
                Action::MachineTerminate,
                &self.machine_id,
                MachineStatus::TerminateFail,
                reason,
            )
            .await
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MachineRole;
    use crate::engine::run_workflow;
    use crate::runtime::InMemoryRuntime;
    use crate::workflows::testing::{machine, Mocks};
    use crate::Error;
    use mockall::predicate::*;
    use mockall::Sequence;

    fn record_status(mocks: &mut Mocks, status: MachineStatus) {
        mocks
            .store
            .expect_set_machine_status()
            .with(eq("m1"), eq(status), always())
            .times(1)
            .returning(|_, _, _| Ok(()));
    }

    fn with_machine(mocks: &mut Mocks) {
        mocks
            .store
            .expect_get_machine()
            .returning(|id| Ok(machine(id, MachineRole::Node, MachineStatus::Init)));
    }

    #[tokio::test]
    async fn create_prepares_resource_and_records_ip() {
        let mut mocks = Mocks::default();
        with_machine(&mut mocks);
        record_status(&mut mocks, MachineStatus::Creating);
        record_status(&mut mocks, MachineStatus::Prepare);
        record_status(&mut mocks, MachineStatus::Running);

        let mut seq = Sequence::new();
        mocks
            .machine_driver
            .expect_prepare_resource()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        mocks
            .machine_driver
            .expect_private_ip()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok("10.0.0.21".to_string()));
        mocks
            .store
            .expect_set_machine_ip()
            .with(eq("m1"), eq("10.0.0.21"))
            .times(1)
            .returning(|_, _| Ok(()));

        let runtime = InMemoryRuntime::new();
        let wf = MachineCreate::new(mocks.build(&runtime), "m1");
        let result = run_workflow(&wf).await.expect("create should succeed");

        assert_eq!(result["private_ip"], "10.0.0.21");
        assert_eq!(
            runtime.started_tasks(),
            vec![MachineCreate::NAME, MachinePrepare::NAME]
        );
    }

    #[tokio::test]
    async fn prepare_failure_marks_prepare_fail_then_create_fail() {
        let mut mocks = Mocks::default();
        with_machine(&mut mocks);
        record_status(&mut mocks, MachineStatus::Creating);
        record_status(&mut mocks, MachineStatus::Prepare);
        record_status(&mut mocks, MachineStatus::PrepareFail);
        record_status(&mut mocks, MachineStatus::CreateFail);
        mocks
            .machine_driver
            .expect_prepare_resource()
            .returning(|_| Err(Error::driver("onecloud", "no capacity")));
        mocks.machine_driver.expect_private_ip().never();

        let runtime = InMemoryRuntime::new();
        let wf = MachineCreate::new(mocks.build(&runtime), "m1");
        let err = run_workflow(&wf).await.unwrap_err();
        assert!(err.to_string().contains("no capacity"));
    }

    #[tokio::test]
    async fn terminate_failure_marks_terminate_fail() {
        let mut mocks = Mocks::default();
        with_machine(&mut mocks);
        record_status(&mut mocks, MachineStatus::Terminating);
        record_status(&mut mocks, MachineStatus::TerminateFail);
        mocks
            .machine_driver
            .expect_terminate_resource()
            .returning(|_| Err(Error::driver("onecloud", "server locked")));

        let runtime = InMemoryRuntime::new();
        let wf = MachineTerminate::new(mocks.build(&runtime), "m1");
        assert!(run_workflow(&wf).await.is_err());
        assert_eq!(
            runtime.stages_of(MachineTerminate::NAME),
            vec!["terminated"]
        );
    }
}
