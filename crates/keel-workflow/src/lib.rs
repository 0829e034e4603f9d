//! Cluster lifecycle workflows for keel
//!
//! Every lifecycle operation (create, scale out, deploy, delete, addon and
//! status sync, sub-resource writes) is a staged workflow driven by
//! [`engine::run_workflow`]. Workflows only touch the outside world through
//! the collaborator traits in [`domain`], gathered in a [`Context`].

pub mod apiserver;
pub mod context;
pub mod domain;
pub mod driver;
pub mod engine;
pub mod error;
pub mod oplog;
pub mod runtime;
pub mod status;
pub mod workflows;

pub use apiserver::{KubeClusterProbe, KubeManifestApplier};
pub use context::{Context, ContextBuilder};
pub use driver::KubesprayClusterDriver;
pub use engine::{run_workflow, Payload, Stage, Transition, Workflow};
pub use error::Error;
pub use runtime::{InMemoryRuntime, TaskGuard, TaskId, TaskRuntime};
pub use status::{ClusterStatus, MachineStatus, ResourceStatus};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
