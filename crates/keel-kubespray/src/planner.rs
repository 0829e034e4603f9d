//! Chooses the playbook and host subset for each deploy action

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::executor::PlaybookRun;
use crate::host::{Host, Role};
use crate::inventory::Inventory;
use crate::playbook::{Playbook, PlaybookSet};
use crate::vars::KubesprayVars;
use crate::version::VersionBand;
use crate::{Error, Result};

/// etcd retry budget when masters join an existing cluster
pub const MASTER_JOIN_ETCD_RETRIES: u32 = 20;

/// Deploy actions understood by the planner
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeployAction {
    /// Build a new cluster from every host
    Create,
    /// Same as `Create`
    Run,
    /// Add hosts to a running cluster
    Scale,
    /// Remove hosts from a running cluster
    RemoveNode,
}

impl fmt::Display for DeployAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeployAction::Create => write!(f, "create"),
            DeployAction::Run => write!(f, "run"),
            DeployAction::Scale => write!(f, "scale"),
            DeployAction::RemoveNode => write!(f, "remove-node"),
        }
    }
}

impl FromStr for DeployAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(DeployAction::Create),
            "run" => Ok(DeployAction::Run),
            "scale" => Ok(DeployAction::Scale),
            "remove-node" | "remove_node" => Ok(DeployAction::RemoveNode),
            _ => Err(Error::validation(format!(
                "unsupported deploy action: {s}, expected one of: create, run, scale, remove-node"
            ))),
        }
    }
}

/// Builds [`PlaybookRun`]s for a resolved variable set
#[derive(Clone, Debug)]
pub struct Planner {
    playbook_set: PlaybookSet,
    band: VersionBand,
    vars: KubesprayVars,
    debug: bool,
}

impl Planner {
    /// Plan against `ansible_root` using the playbook set named by `vars`
    pub fn new(ansible_root: impl Into<std::path::PathBuf>, band: VersionBand, vars: KubesprayVars) -> Self {
        let playbook_set = PlaybookSet::new(ansible_root, vars.kubespray_version.clone());
        Self {
            playbook_set,
            band,
            vars,
            debug: false,
        }
    }

    /// Pass `-vvv` to every planned run
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Playbook set runs are taken from
    pub fn playbook_set(&self) -> &PlaybookSet {
        &self.playbook_set
    }

    fn inventory(&self, hosts: Vec<Host>) -> Result<Inventory> {
        Inventory::new(hosts, self.band.pins().group_naming)
    }

    fn run(&self, action: DeployAction, playbook: Playbook, inventory: Inventory, vars: KubesprayVars) -> PlaybookRun {
        info!(
            action = %action,
            playbook = %playbook,
            playbook_set = %self.playbook_set.version(),
            hosts = inventory.len(),
            "planned playbook run"
        );
        PlaybookRun::new(action.to_string(), self.playbook_set.clone(), playbook, inventory, vars)
            .with_debug(self.debug)
    }

    /// Dispatch on `action`; `targets` names the added or removed hosts
    pub fn plan(&self, action: DeployAction, hosts: Vec<Host>, targets: &[String]) -> Result<PlaybookRun> {
        match action {
            DeployAction::Create | DeployAction::Run => self.create(hosts),
            DeployAction::Scale => self.scale(hosts, targets),
            DeployAction::RemoveNode => self.remove(hosts, targets),
        }
    }

    /// Full cluster playbook against every host
    pub fn create(&self, hosts: Vec<Host>) -> Result<PlaybookRun> {
        let inventory = self.inventory(hosts)?;
        Ok(self.run(DeployAction::Create, Playbook::Cluster, inventory, self.vars.clone()))
    }

    /// Add `added` (hostnames in `hosts`) to the cluster
    ///
    /// Added hosts must share one role set. A batch of masters needs the full
    /// cluster playbook limited to the etcd and master groups; anything else
    /// runs the scale playbook limited to the new hosts.
    pub fn scale(&self, hosts: Vec<Host>, added: &[String]) -> Result<PlaybookRun> {
        let inventory = self.inventory(hosts)?;
        let master_added = check_target_roles(&inventory, added)?;

        if master_added {
            let mut vars = self.vars.clone();
            vars.ignore_assert_errors = Some("yes".to_string());
            vars.etcd_retries = Some(MASTER_JOIN_ETCD_RETRIES);
            let groups = [inventory.group_name(Role::Etcd), inventory.group_name(Role::Master)];
            let mut run = self.run(DeployAction::Scale, Playbook::Cluster, inventory, vars);
            run.add_limit(false, groups)?;
            Ok(run)
        } else {
            let mut run = self.run(DeployAction::Scale, Playbook::Scale, inventory, self.vars.clone());
            run.add_limit(true, added.iter().cloned())?;
            Ok(run)
        }
    }

    /// Remove `removed` (hostnames in `hosts`) from the cluster
    ///
    /// The remove-node playbook needs the whole cluster in its inventory, so
    /// no limit is applied.
    pub fn remove(&self, hosts: Vec<Host>, removed: &[String]) -> Result<PlaybookRun> {
        if removed.is_empty() {
            return Err(Error::validation("empty removed host"));
        }
        let inventory = self.inventory(hosts)?;
        if let Some(missing) = removed.iter().find(|name| !inventory.contains(name)) {
            return Err(Error::validation_for_host(
                missing.as_str(),
                format!("inventory not include host {missing}"),
            ));
        }

        let mut vars = self.vars.clone();
        vars.node = Some(removed.join(","));
        vars.delete_nodes_confirmation = Some("yes".to_string());
        Ok(self.run(DeployAction::RemoveNode, Playbook::RemoveNode, inventory, vars))
    }

    /// Rolling upgrade of every host
    pub fn upgrade(&self, hosts: Vec<Host>) -> Result<PlaybookRun> {
        let inventory = self.inventory(hosts)?;
        Ok(PlaybookRun::new(
            "upgrade",
            self.playbook_set.clone(),
            Playbook::UpgradeCluster,
            inventory,
            self.vars.clone(),
        )
        .with_debug(self.debug))
    }
}

/// Verify the added hosts share one role set; returns whether it includes master
fn check_target_roles(inventory: &Inventory, added: &[String]) -> Result<bool> {
    let mut roles: Option<&BTreeSet<Role>> = None;
    for name in added {
        let host = inventory.get(name).ok_or_else(|| {
            Error::validation_for_host(name.as_str(), format!("inventory not include host {name}"))
        })?;
        match roles {
            None => roles = Some(host.roles()),
            Some(expected) if expected != host.roles() => {
                return Err(Error::validation(format!(
                    "added host role not same, {:?} != {:?}",
                    expected,
                    host.roles()
                )));
            }
            Some(_) => {}
        }
    }
    let roles = roles.ok_or_else(|| Error::validation("empty added host"))?;
    Ok(roles.contains(&Role::Master))
}
