//! Generic cluster sub-resource lifecycles
//!
//! Create and update share one stage graph: mark the resource pending,
//! run the remote mutation, then sync the local record from the remote
//! object. Delete drops the local record once the remote object is gone.

use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tracing::debug;

use crate::context::Context;
use crate::domain::{ClusterResource, ResourceBackend};
use crate::engine::{subflow, work, Handlers, Payload, Stage, Transition, Workflow};
use crate::oplog::{self, Action};
use crate::runtime::{TaskId, TaskRuntime};
use crate::status::ResourceStatus;
use crate::Result;

use super::{fail_quietly, fail_resource};

// =============================================================================
// Create / update
// =============================================================================

/// A remote mutation run by [`ResourceWrite`]
pub trait WriteOp: Send + Sync + 'static {
    /// Workflow name
    const NAME: &'static str;
    /// Operation log action
    const ACTION: Action;
    /// Status while the mutation runs
    const PENDING: ResourceStatus;
    /// Status when the mutation fails
    const FAILED: ResourceStatus;

    /// Run the mutation and return the remote object
    fn remote<'a>(
        backend: &'a dyn ResourceBackend,
        resource: &'a ClusterResource,
        params: &'a Payload,
    ) -> BoxFuture<'a, Result<Payload>>;
}

/// Create the remote object
pub enum Create {}

impl WriteOp for Create {
    const NAME: &'static str = "resource-create";
    const ACTION: Action = Action::ResourceCreate;
    const PENDING: ResourceStatus = ResourceStatus::Creating;
    const FAILED: ResourceStatus = ResourceStatus::CreateFail;

    fn remote<'a>(
        backend: &'a dyn ResourceBackend,
        resource: &'a ClusterResource,
        params: &'a Payload,
    ) -> BoxFuture<'a, Result<Payload>> {
        backend.remote_create(resource, params)
    }
}

/// Update the remote object
pub enum Update {}

impl WriteOp for Update {
    const NAME: &'static str = "resource-update";
    const ACTION: Action = Action::ResourceUpdate;
    const PENDING: ResourceStatus = ResourceStatus::Updating;
    const FAILED: ResourceStatus = ResourceStatus::UpdateFail;

    fn remote<'a>(
        backend: &'a dyn ResourceBackend,
        resource: &'a ClusterResource,
        params: &'a Payload,
    ) -> BoxFuture<'a, Result<Payload>> {
        backend.remote_update(resource, params)
    }
}

/// Create a sub-resource
pub type ResourceCreate = ResourceWrite<Create>;

/// Update a sub-resource
pub type ResourceUpdate = ResourceWrite<Update>;

/// Stages of [`ResourceCreate`] and [`ResourceUpdate`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceWriteStage {
    Init,
    Done,
    Synced,
}

stage_names!(ResourceWriteStage {
    Init => "init",
    Done => "done",
    Synced => "synced",
});

impl<O: WriteOp> Stage<ResourceWrite<O>> for ResourceWriteStage {
    const INIT: Self = ResourceWriteStage::Init;

    fn handlers(self) -> Handlers<ResourceWrite<O>, Self> {
        match self {
            ResourceWriteStage::Init => Handlers {
                on_success: ResourceWrite::<O>::on_init,
                on_failure: ResourceWrite::<O>::on_write_failed,
            },
            ResourceWriteStage::Done => Handlers {
                on_success: ResourceWrite::<O>::on_done,
                on_failure: ResourceWrite::<O>::on_write_failed,
            },
            ResourceWriteStage::Synced => Handlers {
                on_success: ResourceWrite::<O>::on_synced,
                on_failure: ResourceWrite::<O>::on_sync_failed,
            },
        }
    }
}

/// Mutate a remote object, then sync its record
pub struct ResourceWrite<O> {
    ctx: Arc<Context>,
    task: TaskId,
    resource_id: String,
    params: Payload,
    op: PhantomData<fn() -> O>,
}

impl<O: WriteOp> Workflow for ResourceWrite<O> {
    type Stage = ResourceWriteStage;

    fn task(&self) -> &TaskId {
        &self.task
    }

    fn runtime(&self) -> &dyn TaskRuntime {
        self.ctx.runtime.as_ref()
    }
}

impl<O: WriteOp> ResourceWrite<O> {
    /// Workflow name
    pub const NAME: &'static str = O::NAME;

    /// Mutate `resource_id` with `params`
    pub fn new(ctx: Arc<Context>, resource_id: impl Into<String>, params: Payload) -> Self {
        let resource_id = resource_id.into();
        Self {
            task: TaskId::new(O::NAME, resource_id.clone()),
            ctx,
            resource_id,
            params,
            op: PhantomData,
        }
    }

    fn on_init(&self, _: Payload) -> BoxFuture<'_, Transition<'_, ResourceWriteStage>> {
        async move { Transition::next(ResourceWriteStage::Done, work(self.write())) }.boxed()
    }

    async fn write(&self) -> Result<Payload> {
        let resources = self.ctx.resources.as_ref();
        resources.set_status(&self.resource_id, O::PENDING, "").await?;
        let resource = resources.get(&self.resource_id).await?;
        let remote = O::remote(resources, &resource, &self.params).await?;
        debug!(kind = %resource.kind, name = %resource.name, "remote object written");
        Ok(remote)
    }

    fn on_done(&self, _: Payload) -> BoxFuture<'_, Transition<'_, ResourceWriteStage>> {
        async move {
            let sync = ResourceSync::new(self.ctx.clone(), &self.resource_id).as_child_of(&self.task);
            Transition::next(ResourceWriteStage::Synced, subflow(sync))
        }
        .boxed()
    }

    fn on_synced(&self, _: Payload) -> BoxFuture<'_, Transition<'_, ResourceWriteStage>> {
        async move {
            oplog::success(O::ACTION, &self.resource_id);
            Transition::done()
        }
        .boxed()
    }

    fn on_write_failed(&self, reason: String) -> BoxFuture<'_, Transition<'_, ResourceWriteStage>> {
        async move {
            fail_resource(&self.ctx, O::ACTION, &self.resource_id, O::FAILED, reason).await
        }
        .boxed()
    }

    /// The sync task already recorded `sync_fail`
    fn on_sync_failed(&self, reason: String) -> BoxFuture<'_, Transition<'_, ResourceWriteStage>> {
        async move { fail_quietly(O::ACTION, &self.resource_id, reason) }.boxed()
    }
}

// =============================================================================
// Delete
// =============================================================================

/// Stages of [`ResourceDelete`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceDeleteStage {
    Init,
    Deleted,
}

stage_names!(ResourceDeleteStage {
    Init => "init",
    Deleted => "deleted",
});

impl Stage<ResourceDelete> for ResourceDeleteStage {
    const INIT: Self = ResourceDeleteStage::Init;

    fn handlers(self) -> Handlers<ResourceDelete, Self> {
        match self {
            ResourceDeleteStage::Init => Handlers {
                on_success: ResourceDelete::on_init,
                on_failure: ResourceDelete::on_delete_failed,
            },
            ResourceDeleteStage::Deleted => Handlers {
                on_success: ResourceDelete::on_deleted,
                on_failure: ResourceDelete::on_delete_failed,
            },
        }
    }
}

/// Delete the remote object, then the local record
pub struct ResourceDelete {
    ctx: Arc<Context>,
    task: TaskId,
    resource_id: String,
}

workflow_task!(ResourceDelete, ResourceDeleteStage);

impl ResourceDelete {
    /// Workflow name
    pub const NAME: &'static str = "resource-delete";

    /// Delete `resource_id`
    pub fn new(ctx: Arc<Context>, resource_id: impl Into<String>) -> Self {
        let resource_id = resource_id.into();
        Self {
            task: TaskId::new(Self::NAME, resource_id.clone()),
            ctx,
            resource_id,
        }
    }

    fn on_init(&self, _: Payload) -> BoxFuture<'_, Transition<'_, ResourceDeleteStage>> {
        async move { Transition::next(ResourceDeleteStage::Deleted, work(self.delete())) }.boxed()
    }

    async fn delete(&self) -> Result<Payload> {
        let resources = self.ctx.resources.as_ref();
        resources
            .set_status(&self.resource_id, ResourceStatus::Deleting, "")
            .await?;
        let resource = resources.get(&self.resource_id).await?;
        resources.remote_delete(&resource).await?;
        resources.real_delete(&resource).await?;
        Ok(Value::Null)
    }

    fn on_deleted(&self, _: Payload) -> BoxFuture<'_, Transition<'_, ResourceDeleteStage>> {
        async move {
            oplog::success(Action::ResourceDelete, &self.resource_id);
            Transition::done()
        }
        .boxed()
    }

    fn on_delete_failed(&self, reason: String) -> BoxFuture<'_, Transition<'_, ResourceDeleteStage>> {
        async move {
            fail_resource(
                &self.ctx,
                Action::ResourceDelete,
                &self.resource_id,
                ResourceStatus::DeleteFail,
                reason,
            )
            .await
        }
        .boxed()
    }
}

// =============================================================================
// Sync
// =============================================================================

/// Stages of [`ResourceSync`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceSyncStage {
    Init,
    Synced,
}

stage_names!(ResourceSyncStage {
    Init => "init",
    Synced => "synced",
});

impl Stage<ResourceSync> for ResourceSyncStage {
    const INIT: Self = ResourceSyncStage::Init;

    fn handlers(self) -> Handlers<ResourceSync, Self> {
        match self {
            ResourceSyncStage::Init => Handlers {
                on_success: ResourceSync::on_init,
                on_failure: ResourceSync::on_sync_failed,
            },
            ResourceSyncStage::Synced => Handlers {
                on_success: ResourceSync::on_synced,
                on_failure: ResourceSync::on_sync_failed,
            },
        }
    }
}

/// Refresh a resource record from its remote object and mark it active
pub struct ResourceSync {
    ctx: Arc<Context>,
    task: TaskId,
    resource_id: String,
}

workflow_task!(ResourceSync, ResourceSyncStage);

impl ResourceSync {
    /// Workflow name
    pub const NAME: &'static str = "resource-sync";

    /// Sync `resource_id`
    pub fn new(ctx: Arc<Context>, resource_id: impl Into<String>) -> Self {
        let resource_id = resource_id.into();
        Self {
            task: TaskId::new(Self::NAME, resource_id.clone()),
            ctx,
            resource_id,
        }
    }

    fn on_init(&self, _: Payload) -> BoxFuture<'_, Transition<'_, ResourceSyncStage>> {
        async move { Transition::next(ResourceSyncStage::Synced, work(self.sync())) }.boxed()
    }

    async fn sync(&self) -> Result<Payload> {
        let resources = self.ctx.resources.as_ref();
        resources
            .set_status(&self.resource_id, ResourceStatus::Syncing, "")
            .await?;
        let resource = resources.get(&self.resource_id).await?;
        resources.sync(&resource).await?;
        resources
            .set_status(&self.resource_id, ResourceStatus::Active, "")
            .await?;
        Ok(Value::Null)
    }

    fn on_synced(&self, _: Payload) -> BoxFuture<'_, Transition<'_, ResourceSyncStage>> {
        async move {
            oplog::success(Action::ResourceSync, &self.resource_id);
            Transition::done()
        }
        .boxed()
    }

    fn on_sync_failed(&self, reason: String) -> BoxFuture<'_, Transition<'_, ResourceSyncStage>> {
        async move {
            fail_resource(
                &self.ctx,
                Action::ResourceSync,
                &self.resource_id,
                ResourceStatus::SyncFail,
                reason,
            )
            .await
        }
        .boxed()
    }
}
