//! Kubespray driving for keel
//!
//! Turns a host list and a target Kubernetes version into an
//! `ansible-playbook` invocation:
//!
//! - [`host`] and [`inventory`]: machines, roles and the rendered inventory
//! - [`version`], [`resolver`] and [`provider`]: the extra-vars for a version
//! - [`planner`]: which playbook runs against which hosts
//! - [`executor`]: running the playbook and cleaning up after it

pub mod error;
pub mod executor;
pub mod host;
pub mod inventory;
pub mod planner;
pub mod playbook;
pub mod provider;
pub mod resolver;
pub mod vars;
pub mod version;

pub use error::Error;
pub use executor::{AnsibleExecutor, ExitCode, PlaybookRun, PlaybookRunner, RunContext, RunOutput};
pub use host::{Host, HostSpec, Role};
pub use inventory::{GroupNaming, Inventory};
pub use planner::{DeployAction, Planner};
pub use playbook::{Playbook, PlaybookSet};
pub use provider::{create_hook, ProviderType, VarsHook};
pub use resolver::VarsResolver;
pub use vars::{ExtraConfig, KubesprayVars};
pub use version::{KubeVersion, VersionBand};

#[cfg(test)]
pub use executor::MockPlaybookRunner;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
