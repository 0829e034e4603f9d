//! Cluster driver that deploys machines with kubespray

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::{debug, info};

use keel_common::KeelConfig;
use keel_kubespray::{
    create_hook, DeployAction, Host, Inventory, KubeVersion, Planner, PlaybookRunner, Role, VarsHook,
    VarsResolver,
};

use crate::domain::{
    Cluster, ClusterDriver, ClusterStore, HelmChart, LoginInfoSource, Machine, MachineRole,
};
use crate::Result;

/// Roles a machine gets in the inventory
fn inventory_roles(role: MachineRole) -> &'static [Role] {
    match role {
        MachineRole::Controlplane => &[Role::Master, Role::Etcd, Role::Worker],
        MachineRole::Node => &[Role::Worker],
    }
}

/// Runs kubespray playbooks against the machines of a cluster
///
/// The inventory always holds every machine of the cluster; the machines
/// handed to [`ClusterDriver::request_deploy_machines`] only select the
/// scale or removal targets.
pub struct KubesprayClusterDriver {
    config: KeelConfig,
    store: Arc<dyn ClusterStore>,
    logins: Arc<dyn LoginInfoSource>,
    runner: Arc<dyn PlaybookRunner>,
    addons_manifest: String,
    addons_charts: Vec<HelmChart>,
    debug: bool,
}

impl KubesprayClusterDriver {
    /// Create a driver with no addons
    pub fn new(
        config: KeelConfig,
        store: Arc<dyn ClusterStore>,
        logins: Arc<dyn LoginInfoSource>,
        runner: Arc<dyn PlaybookRunner>,
    ) -> Self {
        Self {
            config,
            store,
            logins,
            runner,
            addons_manifest: String::new(),
            addons_charts: Vec::new(),
            debug: false,
        }
    }

    /// Manifest applied after every deploy
    pub fn with_addons_manifest(mut self, manifest: impl Into<String>) -> Self {
        self.addons_manifest = manifest.into();
        self
    }

    /// Charts kept installed after every deploy
    pub fn with_addons_charts(mut self, charts: Vec<HelmChart>) -> Self {
        self.addons_charts = charts;
        self
    }

    /// Run playbooks with `-vvv`
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Inventory host of one machine, from its login info
    ///
    /// The hostname comes from the provider hook and may differ from the
    /// machine name.
    async fn host(&self, machine: &Machine, hook: &dyn VarsHook) -> Result<Host> {
        let login = self.logins.login_info(machine).await?;
        let hostname = hook.hostname(
            &machine.name,
            machine.private_ip.as_deref(),
            login.region_external_id.as_deref(),
        )?;
        let mut host = Host::new(
            &hostname,
            &login.address,
            &login.user,
            login.password.clone(),
            inventory_roles(machine.role).iter().copied(),
        )?;
        if let Some(key) = login.private_key.as_deref() {
            host.set_private_key(key.as_bytes())?;
        }
        if let Some(ip) = machine.private_ip.as_deref() {
            host = host.with_ip(ip);
        }
        Ok(host.with_access_ip(&login.address))
    }
}

#[async_trait]
impl ClusterDriver for KubesprayClusterDriver {
    fn need_create_machines(&self, _cluster: &Cluster) -> bool {
        true
    }

    async fn addons_manifest(&self, _cluster: &Cluster) -> Result<String> {
        Ok(self.addons_manifest.clone())
    }

    async fn addons_helm_charts(&self, _cluster: &Cluster) -> Result<Vec<HelmChart>> {
        Ok(self.addons_charts.clone())
    }

    async fn request_deploy_machines(
        &self,
        cluster: &Cluster,
        action: DeployAction,
        machines: &[Machine],
    ) -> Result<()> {
        let version = KubeVersion::parse(&cluster.kube_version)?;
        let hook = create_hook(cluster.provider);
        hook.ensure_supported(&version)?;
        let mut vars =
            VarsResolver::new(&self.config).resolve(&version, cluster.extra_config.as_ref(), hook.as_ref());

        let all = self.store.list_machines(&cluster.id).await?;
        let hosts = try_join_all(all.iter().map(|m| self.host(m, hook.as_ref()))).await?;

        let mut targets = Vec::with_capacity(machines.len());
        for machine in machines {
            let Some(index) = all.iter().position(|m| m.id == machine.id) else {
                return Err(
                    keel_kubespray::Error::validation_for_host(
                        &machine.name,
                        "not found inventory host by name",
                    )
                    .into(),
                );
            };
            targets.push(hosts[index].hostname().to_string());
        }

        let inventory = Inventory::new(hosts, version.band().pins().group_naming)?;
        vars.supplementary_addresses_in_ssl_keys = inventory.supplementary_addresses();

        let run = Planner::new(&self.config.ansible_root, version.band(), vars)
            .with_debug(self.debug)
            .plan(action, inventory.into_hosts(), &targets)?;
        debug!(cluster = %cluster.name, playbook = %run.playbook(), "running playbook");

        let output = self.runner.run(run).await?;
        info!(
            cluster = %cluster.name,
            action = %action,
            elapsed_secs = output.elapsed.as_secs(),
            "playbook finished"
        );
        Ok(())
    }

    async fn request_delete_machines(&self, cluster: &Cluster, machines: &[Machine]) -> Result<()> {
        debug!(cluster = %cluster.name, machines = machines.len(), "nothing to release for kubespray machines");
        Ok(())
    }
}
